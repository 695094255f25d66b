//! Platform-provided functions, looked up by the last segment of their
//! `builtin.transformation.*` / `builtin.destination.*` id.

use std::{
    collections::HashMap,
    sync::Arc,
};

use common::types::EnrichedConnection;
use errors::ErrorMetadata;
use serde_json::Value as JsonValue;

use crate::{
    StepFunction,
    SystemContext,
};

mod bulker;
mod transformations;
mod webhook;

pub use bulker::BulkerDestination;
pub use transformations::{
    AddTimestamp,
    AnonymizeIp,
};
pub use webhook::WebhookDestination;

/// Everything a builtin factory may draw on. Builtins are the only steps
/// that see the system context.
pub struct BuiltinContext<'a> {
    pub system: &'a SystemContext,
    pub connection: &'a EnrichedConnection,
    pub options: Option<&'a JsonValue>,
}

type Factory = fn(&BuiltinContext) -> anyhow::Result<Arc<dyn StepFunction>>;

pub struct BuiltinRegistry {
    transformations: HashMap<&'static str, Factory>,
    destinations: HashMap<&'static str, Factory>,
}

impl BuiltinRegistry {
    pub fn standard() -> Self {
        let mut transformations: HashMap<&'static str, Factory> = HashMap::new();
        transformations.insert("addTimestamp", transformations::add_timestamp_factory);
        transformations.insert("anonymizeIp", transformations::anonymize_ip_factory);
        let mut destinations: HashMap<&'static str, Factory> = HashMap::new();
        destinations.insert("bulker", bulker::bulker_factory);
        destinations.insert("webhook", webhook::webhook_factory);
        Self {
            transformations,
            destinations,
        }
    }

    pub fn transformation(
        &self,
        name: &str,
        ctx: &BuiltinContext,
    ) -> anyhow::Result<Arc<dyn StepFunction>> {
        let factory = self.transformations.get(name).ok_or_else(|| {
            ErrorMetadata::config_error(
                "UnknownTransformation",
                format!("No builtin transformation named {name}"),
            )
        })?;
        factory(ctx)
    }

    pub fn destination(
        &self,
        name: &str,
        ctx: &BuiltinContext,
    ) -> anyhow::Result<Arc<dyn StepFunction>> {
        let factory = self.destinations.get(name).ok_or_else(|| {
            ErrorMetadata::config_error(
                "UnknownDestination",
                format!("No destination builtin for type {name}"),
            )
        })?;
        factory(ctx)
    }
}
