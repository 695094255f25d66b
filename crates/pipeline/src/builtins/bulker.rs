use std::sync::Arc;

use async_trait::async_trait;
use common::types::{
    DataLayout,
    EventContext,
    EventType,
};
use errors::ErrorMetadata;
use serde_json::Value as JsonValue;

use super::BuiltinContext;
use crate::{
    FuncReturn,
    StepFunction,
};

pub(super) fn bulker_factory(ctx: &BuiltinContext) -> anyhow::Result<Arc<dyn StepFunction>> {
    let table_override = ctx
        .options
        .and_then(|o| o.get("tableName"))
        .and_then(|v| v.as_str())
        .map(str::to_owned);
    Ok(Arc::new(BulkerDestination {
        client: ctx.system.http_client.clone(),
        post_url: format!(
            "{}/post/{}",
            ctx.system.bulker.base_url.as_str().trim_end_matches('/'),
            // Deliveries are keyed by the connection id, which is what
            // bulker provisions tables under.
            ctx.connection.id,
        ),
        auth_token: ctx.system.bulker.auth_token.clone(),
        data_layout: ctx
            .connection
            .options
            .data_layout
            .unwrap_or(DataLayout::SegmentSingleTable),
        table_override,
    }))
}

/// Terminal delivery into the bulker HTTP service, which performs the final
/// write to analytical destinations.
pub struct BulkerDestination {
    client: reqwest::Client,
    post_url: String,
    auth_token: String,
    data_layout: DataLayout,
    table_override: Option<String>,
}

impl BulkerDestination {
    fn table_name(&self, event: &JsonValue) -> String {
        if let Some(ref table) = self.table_override {
            return table.clone();
        }
        match self.data_layout {
            DataLayout::Segment => event
                .get("type")
                .and_then(|v| v.as_str())
                .and_then(|s| serde_json::from_value::<EventType>(JsonValue::String(s.to_owned())).ok())
                .map(|t| t.table_name().to_owned())
                .unwrap_or_else(|| "events".to_owned()),
            DataLayout::JitsuLegacy
            | DataLayout::SegmentSingleTable
            | DataLayout::Passthrough => "events".to_owned(),
        }
    }
}

#[async_trait]
impl StepFunction for BulkerDestination {
    async fn exec(&self, event: JsonValue, _ctx: &EventContext) -> anyhow::Result<FuncReturn> {
        let table = self.table_name(&event);
        let response = self
            .client
            .post(&self.post_url)
            .query(&[
                ("tableName", table.as_str()),
                ("dataLayout", self.data_layout.as_str()),
            ])
            .bearer_auth(&self.auth_token)
            .json(&event)
            .send()
            .await
            .map_err(|e| {
                anyhow::anyhow!(e).context(ErrorMetadata::transient_downstream(
                    "BulkerUnavailable",
                    format!("Request to bulker failed for {}", self.post_url),
                ))
            })?;
        let status = response.status();
        if status.is_server_error() {
            anyhow::bail!(ErrorMetadata::transient_downstream(
                "BulkerUnavailable",
                format!("Bulker answered {status} for {}", self.post_url),
            ));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!(ErrorMetadata::config_error(
                "BulkerRejectedEvent",
                format!("Bulker rejected the event with {status}: {body}"),
            ));
        }
        Ok(FuncReturn::Event(event))
    }
}
