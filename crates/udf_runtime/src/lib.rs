//! Lifecycle of compiled user-defined functions.
//!
//! The compiler itself is an external collaborator: this crate owns the
//! contract ([`UdfCompiler`], [`UdfWrapper`]) and the registry that caches
//! compiled sandboxes by function id, revalidates them against the source's
//! content hash, and closes them when they fall out of cache.

use std::sync::Arc;

use async_trait::async_trait;
use common::{
    sha256::CodeHash,
    types::EventContext,
};
use config_store::ConnectionStore;
use serde_json::Value as JsonValue;

mod metrics;
mod noop;
mod registry;
mod sidecar;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use crate::{
    noop::NoopUdfCompiler,
    registry::UdfRegistry,
    sidecar::SidecarUdfCompiler,
};

/// What a user function did with an event.
#[derive(Debug, Clone)]
pub enum UdfOutcome {
    Event(JsonValue),
    Events(Vec<JsonValue>),
    Drop,
}

/// Everything user code gets to see: the reduced event context, the
/// function's own options, and the connection-scoped store. The pipeline's
/// system context is deliberately absent.
#[derive(Clone)]
pub struct UdfContext {
    pub event_context: EventContext,
    pub function_options: Option<JsonValue>,
    pub store: ConnectionStore,
}

/// Handle to a live sandbox produced by the external compiler.
///
/// Wrappers are re-entrant: the registry hands the same wrapper to
/// concurrent handlers. `invoke` may fail with the distinguished disposed
/// error (see [`errors::ErrorMetadata::sandbox_disposed`]) when the sandbox
/// was torn down behind our back; callers rebuild and retry once.
#[async_trait]
pub trait UdfWrapper: Send + Sync {
    async fn invoke(&self, event: &JsonValue, ctx: &UdfContext) -> anyhow::Result<UdfOutcome>;

    /// Release the sandbox. Idempotent, and must tolerate being called
    /// concurrently with shutdown.
    fn close(&self);
}

/// The external compiler factory: turns source code into a live sandbox.
#[async_trait]
pub trait UdfCompiler: Send + Sync {
    async fn compile(
        &self,
        function_id: &str,
        name: &str,
        code: &str,
    ) -> anyhow::Result<Box<dyn UdfWrapper>>;
}

/// A compiled UDF paired with the content hash of the source that produced
/// it. Immutable once cached; a code change produces a fresh one.
pub struct CompiledUdf {
    function_id: String,
    hash: CodeHash,
    wrapper: Arc<dyn UdfWrapper>,
}

impl std::fmt::Debug for CompiledUdf {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledUdf")
            .field("function_id", &self.function_id)
            .field("hash", &self.hash)
            .finish()
    }
}

impl CompiledUdf {
    pub fn new(function_id: String, hash: CodeHash, wrapper: Arc<dyn UdfWrapper>) -> Self {
        Self {
            function_id,
            hash,
            wrapper,
        }
    }

    pub fn function_id(&self) -> &str {
        &self.function_id
    }

    pub fn hash(&self) -> CodeHash {
        self.hash
    }

    pub async fn invoke(&self, event: &JsonValue, ctx: &UdfContext) -> anyhow::Result<UdfOutcome> {
        self.wrapper.invoke(event, ctx).await
    }

    pub(crate) fn close(&self) {
        crate::metrics::log_udf_wrapper_closed();
        self.wrapper.close();
    }
}
