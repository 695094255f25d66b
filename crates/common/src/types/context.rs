use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value as JsonValue;

use super::{
    connection::{
        ConnectionId,
        EnrichedConnection,
    },
    events::IngestMessage,
};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceInfo {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DestinationInfo {
    pub id: String,
    #[serde(rename = "type")]
    pub destination_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credentials_hash: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionInfo {
    pub id: ConnectionId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    pub options: JsonValue,
}

/// The per-message context handed to every step. This is the entire surface
/// user code gets to see; platform-internal services live in the pipeline's
/// separate system context and never reach a UDF.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventContext {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub geo: Option<JsonValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub headers: Option<BTreeMap<String, String>>,
    pub retries: u32,
    pub source: SourceInfo,
    pub destination: DestinationInfo,
    pub connection: ConnectionInfo,
}

impl EventContext {
    pub fn for_message(
        message: &IngestMessage,
        connection: &EnrichedConnection,
        retries: u32,
    ) -> Self {
        Self {
            geo: message.geo.clone(),
            headers: message.http_headers.clone(),
            retries,
            source: SourceInfo {
                id: connection.stream_id.clone(),
                domain: message.origin.as_ref().and_then(|o| o.domain.clone()),
            },
            destination: DestinationInfo {
                id: connection.destination_id.clone(),
                destination_type: connection.destination_type.clone(),
                updated_at: connection.updated_at.clone(),
                credentials_hash: connection.credentials_hash.clone(),
            },
            connection: ConnectionInfo {
                id: connection.id.clone(),
                mode: connection.mode.clone(),
                options: serde_json::to_value(&connection.options).unwrap_or(JsonValue::Null),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::EventContext;
    use crate::types::{
        EnrichedConnection,
        IngestMessage,
    };

    #[test]
    fn test_event_context_assembles_message_fields() {
        let message: IngestMessage = serde_json::from_value(json!({
            "connectionId": "c1",
            "messageId": "m1",
            "type": "track",
            "httpPayload": {"event": "click"},
            "geo": {"country": "DE"},
            "origin": {"domain": "shop.example.com"},
        }))
        .unwrap();
        let connection: EnrichedConnection = serde_json::from_value(json!({
            "id": "c1",
            "workspaceId": "w1",
            "streamId": "s1",
            "destinationId": "d1",
            "type": "clickhouse",
            "credentialsHash": "abc123",
        }))
        .unwrap();
        let ctx = EventContext::for_message(&message, &connection, 2);
        assert_eq!(ctx.retries, 2);
        assert_eq!(ctx.source.id, "s1");
        assert_eq!(ctx.source.domain.as_deref(), Some("shop.example.com"));
        assert_eq!(ctx.destination.destination_type, "clickhouse");
        assert_eq!(ctx.destination.credentials_hash.as_deref(), Some("abc123"));
        assert_eq!(ctx.geo, Some(json!({"country": "DE"})));
    }
}
