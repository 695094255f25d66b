use std::fmt;

use serde::{
    Deserialize,
    Serialize,
};
use serde_json::Value as JsonValue;

use super::function::FunctionReference;

/// Routing key binding an event stream to a configured destination.
/// Connection ids never contain `:` so they can be embedded in namespaced
/// store keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(String);

impl ConnectionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkspaceId(String);

impl WorkspaceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WorkspaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How bulker lays event rows out in the warehouse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataLayout {
    #[serde(rename = "segment")]
    Segment,
    #[serde(rename = "jitsu-legacy")]
    JitsuLegacy,
    #[serde(rename = "segment-single-table")]
    SegmentSingleTable,
    #[serde(rename = "passthrough")]
    Passthrough,
}

impl DataLayout {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataLayout::Segment => "segment",
            DataLayout::JitsuLegacy => "jitsu-legacy",
            DataLayout::SegmentSingleTable => "segment-single-table",
            DataLayout::Passthrough => "passthrough",
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionOptions {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub functions: Vec<FunctionReference>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_layout: Option<DataLayout>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, JsonValue>,
}

/// The cached description of how to process events for one connection id.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrichedConnection {
    pub id: ConnectionId,
    pub workspace_id: WorkspaceId,
    pub stream_id: String,
    pub destination_id: String,
    #[serde(rename = "type")]
    pub destination_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    #[serde(default)]
    pub options: ConnectionOptions,
    #[serde(default)]
    pub uses_bulker: bool,
    #[serde(default, skip_serializing_if = "JsonValue::is_null")]
    pub credentials: JsonValue,
}
