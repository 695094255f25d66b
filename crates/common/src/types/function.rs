use serde::{
    Deserialize,
    Serialize,
};
use serde_json::Value as JsonValue;

use super::connection::WorkspaceId;
use ::errors::ErrorMetadata;

pub const BUILTIN_TRANSFORMATION_PREFIX: &str = "builtin.transformation.";
pub const BUILTIN_DESTINATION_PREFIX: &str = "builtin.destination.";
pub const UDF_PREFIX: &str = "udf.";

/// Step id of the synthetic pipeline step that wraps a connection's UDFs.
pub const UDF_PIPELINE_STEP_ID: &str = "udf.PIPELINE";

/// One element of a connection's ordered function list.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionReference {
    pub function_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function_options: Option<JsonValue>,
}

/// A user function's stored definition. The code hash derived from `code`
/// keys the compiled-artifact cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionDefinition {
    pub id: String,
    pub workspace_id: WorkspaceId,
    pub name: String,
    pub code: String,
}

/// A function id's namespace, parsed once at the chain-building boundary so
/// the rest of the pipeline dispatches on a tagged variant instead of string
/// prefixes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FunctionKind {
    /// `builtin.transformation.<name>`: a pure event mapper.
    BuiltinTransformation(String),
    /// `builtin.destination.<name>`: terminal delivery.
    BuiltinDestination(String),
    /// `udf.<id>`: user code, where `<id>` is the definition's primary key.
    Udf(String),
}

impl FunctionKind {
    pub fn parse(function_id: &str) -> anyhow::Result<Self> {
        if let Some(name) = function_id.strip_prefix(BUILTIN_TRANSFORMATION_PREFIX) {
            return Ok(FunctionKind::BuiltinTransformation(name.to_owned()));
        }
        if let Some(name) = function_id.strip_prefix(BUILTIN_DESTINATION_PREFIX) {
            return Ok(FunctionKind::BuiltinDestination(name.to_owned()));
        }
        if let Some(id) = function_id.strip_prefix(UDF_PREFIX) {
            return Ok(FunctionKind::Udf(id.to_owned()));
        }
        Err(ErrorMetadata::unknown_function_type(function_id).into())
    }
}
