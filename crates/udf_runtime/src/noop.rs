use async_trait::async_trait;
use errors::ErrorMetadata;

use crate::{
    UdfCompiler,
    UdfWrapper,
};

/// Stands in for the compiler when the worker runs without a UDF sidecar.
/// Connections without user functions are unaffected; any connection that
/// references one fails with a fatal configuration error.
pub struct NoopUdfCompiler;

impl NoopUdfCompiler {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl UdfCompiler for NoopUdfCompiler {
    async fn compile(
        &self,
        function_id: &str,
        _name: &str,
        _code: &str,
    ) -> anyhow::Result<Box<dyn UdfWrapper>> {
        anyhow::bail!(ErrorMetadata::config_error(
            "UdfRuntimeUnavailable",
            format!(
                "This worker was started without a UDF sidecar; function {function_id} cannot run"
            ),
        ));
    }
}
