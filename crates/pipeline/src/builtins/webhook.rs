use std::sync::Arc;

use async_trait::async_trait;
use common::types::EventContext;
use errors::ErrorMetadata;
use serde_json::Value as JsonValue;

use super::BuiltinContext;
use crate::{
    FuncReturn,
    StepFunction,
};

pub(super) fn webhook_factory(ctx: &BuiltinContext) -> anyhow::Result<Arc<dyn StepFunction>> {
    let url = ctx
        .connection
        .credentials
        .get("url")
        .and_then(|v| v.as_str())
        .ok_or_else(|| {
            ErrorMetadata::config_error(
                "MissingWebhookUrl",
                format!(
                    "Connection {} uses the webhook destination but has no url credential",
                    ctx.connection.id
                ),
            )
        })?
        .to_owned();
    let headers = ctx
        .connection
        .credentials
        .get("headers")
        .and_then(|v| v.as_object())
        .map(|headers| {
            headers
                .iter()
                .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_owned())))
                .collect()
        })
        .unwrap_or_default();
    Ok(Arc::new(WebhookDestination {
        client: ctx.system.http_client.clone(),
        url,
        headers,
    }))
}

/// Direct delivery of each event to an operator-configured HTTP endpoint.
pub struct WebhookDestination {
    client: reqwest::Client,
    url: String,
    headers: Vec<(String, String)>,
}

#[async_trait]
impl StepFunction for WebhookDestination {
    async fn exec(&self, event: JsonValue, _ctx: &EventContext) -> anyhow::Result<FuncReturn> {
        let mut request = self.client.post(&self.url).json(&event);
        for (name, value) in &self.headers {
            request = request.header(name, value);
        }
        let response = request.send().await.map_err(|e| {
            anyhow::anyhow!(e).context(ErrorMetadata::transient_downstream(
                "WebhookUnavailable",
                format!("Request to webhook {} failed", self.url),
            ))
        })?;
        let status = response.status();
        if status.is_server_error() {
            anyhow::bail!(ErrorMetadata::transient_downstream(
                "WebhookUnavailable",
                format!("Webhook {} answered {status}", self.url),
            ));
        }
        if !status.is_success() {
            anyhow::bail!(ErrorMetadata::config_error(
                "WebhookRejectedEvent",
                format!("Webhook {} rejected the event with {status}", self.url),
            ));
        }
        Ok(FuncReturn::Event(event))
    }
}
