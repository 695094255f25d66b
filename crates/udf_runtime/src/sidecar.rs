//! Client for an external HTTP sandbox service implementing the compiler
//! contract: compile source into a sandbox, invoke it per event, tear it
//! down on close. The service answers 410 Gone once a sandbox has been
//! disposed, which maps onto the distinguished disposed error.

use std::sync::atomic::{
    AtomicBool,
    Ordering,
};

use async_trait::async_trait;
use common::knobs::SIDECAR_REQUEST_TIMEOUT;
use errors::ErrorMetadata;
use serde::Deserialize;
use serde_json::{
    json,
    Value as JsonValue,
};
use url::Url;

use crate::{
    UdfCompiler,
    UdfContext,
    UdfOutcome,
    UdfWrapper,
};

pub struct SidecarUdfCompiler {
    base_url: Url,
    client: reqwest::Client,
}

impl SidecarUdfCompiler {
    pub fn new(base_url: Url) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(*SIDECAR_REQUEST_TIMEOUT)
            .build()?;
        Ok(Self { base_url, client })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{path}", self.base_url.as_str().trim_end_matches('/'))
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CompileResponse {
    sandbox_id: String,
}

#[derive(Deserialize)]
struct InvokeResponse {
    result: JsonValue,
}

#[async_trait]
impl UdfCompiler for SidecarUdfCompiler {
    async fn compile(
        &self,
        function_id: &str,
        name: &str,
        code: &str,
    ) -> anyhow::Result<Box<dyn UdfWrapper>> {
        let response = self
            .client
            .post(self.endpoint("compile"))
            .json(&json!({
                "functionId": function_id,
                "name": name,
                "code": code,
            }))
            .send()
            .await
            .map_err(|e| {
                anyhow::anyhow!(e).context(ErrorMetadata::transient_downstream(
                    "UdfSidecarUnavailable",
                    "The UDF sidecar could not be reached for compilation",
                ))
            })?;
        let status = response.status();
        if status.is_client_error() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!(ErrorMetadata::udf_runtime(
                "UdfCompileFailed",
                format!("Function {name} failed to compile: {body}"),
            ));
        }
        if !status.is_success() {
            anyhow::bail!(ErrorMetadata::transient_downstream(
                "UdfSidecarError",
                format!("The UDF sidecar answered {status} during compilation"),
            ));
        }
        let compiled: CompileResponse = response.json().await?;
        Ok(Box::new(SidecarWrapper {
            client: self.client.clone(),
            invoke_url: self.endpoint(&format!("invoke/{}", compiled.sandbox_id)),
            close_url: self.endpoint(&format!("sandbox/{}", compiled.sandbox_id)),
            function_id: function_id.to_owned(),
            closed: AtomicBool::new(false),
        }))
    }
}

struct SidecarWrapper {
    client: reqwest::Client,
    invoke_url: String,
    close_url: String,
    function_id: String,
    closed: AtomicBool,
}

#[async_trait]
impl UdfWrapper for SidecarWrapper {
    async fn invoke(&self, event: &JsonValue, ctx: &UdfContext) -> anyhow::Result<UdfOutcome> {
        let response = self
            .client
            .post(&self.invoke_url)
            .json(&json!({
                "event": event,
                "context": ctx.event_context,
                "props": ctx.function_options,
                "connectionId": ctx.store.connection_id(),
            }))
            .send()
            .await
            .map_err(|e| {
                anyhow::anyhow!(e).context(ErrorMetadata::transient_downstream(
                    "UdfSidecarUnavailable",
                    "The UDF sidecar could not be reached for invocation",
                ))
            })?;
        let status = response.status();
        if status == reqwest::StatusCode::GONE {
            anyhow::bail!(ErrorMetadata::sandbox_disposed(&self.function_id));
        }
        if status.is_client_error() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!(ErrorMetadata::udf_runtime(
                "UdfThrew",
                format!("Function {} failed: {body}", self.function_id),
            ));
        }
        if !status.is_success() {
            anyhow::bail!(ErrorMetadata::transient_downstream(
                "UdfSidecarError",
                format!("The UDF sidecar answered {status} during invocation"),
            ));
        }
        let invoked: InvokeResponse = response.json().await?;
        let outcome = match invoked.result {
            JsonValue::Null => UdfOutcome::Drop,
            JsonValue::String(s) if s == "drop" => UdfOutcome::Drop,
            JsonValue::Array(events) => UdfOutcome::Events(events),
            event => UdfOutcome::Event(event),
        };
        Ok(outcome)
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let client = self.client.clone();
        let close_url = self.close_url.clone();
        let function_id = self.function_id.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = client.delete(&close_url).send().await {
                        tracing::warn!("Failed to release sandbox for {function_id}: {e}");
                    }
                });
            },
            Err(_) => {
                tracing::warn!("No runtime available to release sandbox for {function_id}");
            },
        }
    }
}
