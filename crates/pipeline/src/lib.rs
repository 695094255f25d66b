//! The function chain: building an ordered list of executable steps from a
//! connection's configuration, and running events through it.
//!
//! Builtin steps receive the privileged [`SystemContext`]; user code runs
//! inside the synthetic `udf.PIPELINE` step and only ever sees the reduced
//! [`EventContext`](common::types::EventContext) plus its connection store.
//! The separation is by construction: nothing in a UDF step's type carries
//! the system context.

use std::sync::Arc;

use async_trait::async_trait;
use common::types::EventContext;
use serde_json::Value as JsonValue;
use udf_runtime::UdfOutcome;
use url::Url;

pub mod builder;
pub mod builtins;
mod exec_log;
mod executor;
mod metrics;
#[cfg(test)]
mod tests;

pub use crate::{
    builder::{
        ChainBuilder,
        FunctionsFilter,
    },
    builtins::BuiltinRegistry,
    exec_log::{
        check_error,
        ExecLog,
        ExecLogEntry,
        StepError,
        StepStatus,
    },
    executor::{
        execute_chain,
        ChainResult,
    },
};

/// Where the bulker builtin delivers, shared by every chain this worker
/// builds.
#[derive(Clone)]
pub struct BulkerConfig {
    pub base_url: Url,
    pub auth_token: String,
}

/// Platform-internal services available to builtin steps only.
#[derive(Clone)]
pub struct SystemContext {
    pub http_client: reqwest::Client,
    pub bulker: BulkerConfig,
}

/// The three step classes, decided once when the chain is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepKind {
    BuiltinTransformation,
    UdfPipeline,
    BuiltinDestination,
}

impl StepKind {
    pub fn metric_value(&self) -> &'static str {
        match self {
            StepKind::BuiltinTransformation => "transformation",
            StepKind::UdfPipeline => "udf_pipeline",
            StepKind::BuiltinDestination => "destination",
        }
    }
}

/// What a step did with an event.
#[derive(Debug, Clone)]
pub enum FuncReturn {
    /// Replace the event.
    Event(JsonValue),
    /// Fan out, preserving order.
    Events(Vec<JsonValue>),
    /// Remove the event from the chain.
    Drop,
}

impl From<UdfOutcome> for FuncReturn {
    fn from(outcome: UdfOutcome) -> Self {
        match outcome {
            UdfOutcome::Event(event) => FuncReturn::Event(event),
            UdfOutcome::Events(events) => FuncReturn::Events(events),
            UdfOutcome::Drop => FuncReturn::Drop,
        }
    }
}

#[async_trait]
pub trait StepFunction: Send + Sync {
    async fn exec(&self, event: JsonValue, ctx: &EventContext) -> anyhow::Result<FuncReturn>;
}

/// A step's executable form. The `udf.PIPELINE` step is a whole nested
/// chain rather than a function so the executor can surface its inner
/// execution log.
pub enum StepImpl {
    Func(Arc<dyn StepFunction>),
    Pipeline(FunctionChain),
}

pub struct ChainStep {
    pub id: String,
    pub kind: StepKind,
    pub imp: StepImpl,
}

impl std::fmt::Debug for ChainStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChainStep")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .finish()
    }
}

/// The ordered, executable form of a connection's function list.
pub struct FunctionChain {
    pub steps: Vec<ChainStep>,
}

impl std::fmt::Debug for FunctionChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FunctionChain")
            .field("steps", &self.steps)
            .finish()
    }
}

impl FunctionChain {
    pub fn step_ids(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.id.as_str()).collect()
    }
}
