use std::collections::BTreeMap;

use serde::{
    Deserialize,
    Serialize,
};
use serde_json::Value as JsonValue;

use super::connection::ConnectionId;

/// The analytics event taxonomy. The event body itself stays free-form; only
/// the tag is typed because routing and table naming dispatch on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    Track,
    Page,
    Identify,
    Group,
    Alias,
    Screen,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Track => "track",
            EventType::Page => "page",
            EventType::Identify => "identify",
            EventType::Group => "group",
            EventType::Alias => "alias",
            EventType::Screen => "screen",
        }
    }

    /// Table name under the per-type `segment` data layout.
    pub fn table_name(&self) -> &'static str {
        match self {
            EventType::Track => "tracks",
            EventType::Page => "pages",
            EventType::Identify => "identifies",
            EventType::Group => "groups",
            EventType::Alias => "aliases",
            EventType::Screen => "screens",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageOrigin {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
}

/// The decoded bus payload. `connection_id` is the sole routing key; the
/// event body in `http_payload` is carried opaquely through the chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestMessage {
    pub connection_id: ConnectionId,
    pub message_id: String,
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub http_payload: JsonValue,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_headers: Option<BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub geo: Option<JsonValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<MessageOrigin>,
}
