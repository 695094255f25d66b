//! Read-through access to the external config store, plus the
//! connection-scoped key-value binding handed to user functions.
//!
//! Lookups cache for a short TTL so config edits propagate within seconds.
//! A nil answer is never memoized: the next event for the same key retries
//! the fetch.

use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use common::{
    knobs::{
        CACHE_SWEEP_INTERVAL,
        CONNECTION_CACHE_TTL,
        FUNCTION_CACHE_TTL,
    },
    runtime::Runtime,
    types::{
        ConnectionId,
        EnrichedConnection,
        FunctionDefinition,
    },
};
use errors::{
    ErrorMetadata,
    ErrorMetadataAnyhowExt,
};
use serde_json::Value as JsonValue;
use ttl_cache::TtlCache;

mod http;
mod kv;
mod metrics;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use crate::{
    http::HttpConfigFetcher,
    kv::{
        ConnectionStore,
        InMemoryKvStore,
        KvStore,
    },
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConfigKind {
    Connection,
    Function,
}

impl ConfigKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConfigKind::Connection => "connection",
            ConfigKind::Function => "function",
        }
    }
}

/// The external read path: `(kind, key) -> record | nil`. Implementations
/// tag infrastructure failures as retryable; a clean nil means the key does
/// not exist right now.
#[async_trait]
pub trait ConfigFetcher: Send + Sync {
    async fn fetch(&self, kind: ConfigKind, key: &str) -> anyhow::Result<Option<JsonValue>>;
}

pub struct ConfigStore<RT: Runtime> {
    fetcher: Arc<dyn ConfigFetcher>,
    connections: TtlCache<RT, EnrichedConnection>,
    functions: TtlCache<RT, FunctionDefinition>,
}

impl<RT: Runtime> Clone for ConfigStore<RT> {
    fn clone(&self) -> Self {
        Self {
            fetcher: self.fetcher.clone(),
            connections: self.connections.clone(),
            functions: self.functions.clone(),
        }
    }
}

impl<RT: Runtime> ConfigStore<RT> {
    pub fn new(rt: RT, fetcher: Arc<dyn ConfigFetcher>) -> Self {
        Self {
            fetcher,
            connections: TtlCache::new(rt.clone(), "connections", *CACHE_SWEEP_INTERVAL, None),
            functions: TtlCache::new(rt, "functions", *CACHE_SWEEP_INTERVAL, None),
        }
    }

    /// Resolve the enriched connection for a message's routing key.
    /// A nil from the store is fatal for the message (UnknownConnection) but
    /// is not cached, so a connection created moments later is picked up.
    pub async fn enriched_connection(
        &self,
        id: &ConnectionId,
    ) -> anyhow::Result<Arc<EnrichedConnection>> {
        if let Some(connection) = self.connections.get(id.as_str()) {
            return Ok(connection);
        }
        let timer = metrics::connection_fetch_timer();
        let record = self
            .fetch_record(ConfigKind::Connection, id.as_str())
            .await?;
        let Some(record) = record else {
            metrics::log_config_negative_miss(ConfigKind::Connection);
            return Err(ErrorMetadata::unknown_connection(id.as_str()).into());
        };
        let connection: EnrichedConnection = serde_json::from_value(record).map_err(|e| {
            anyhow::anyhow!(e).context(ErrorMetadata::config_error(
                "InvalidConnectionRecord",
                format!("Config store returned an unparseable connection for {id}"),
            ))
        })?;
        let connection = Arc::new(connection);
        self.connections
            .set(id.as_str(), connection.clone(), *CONNECTION_CACHE_TTL);
        timer.finish();
        Ok(connection)
    }

    /// Resolve a function definition by its primary key (the `<id>` part of
    /// a `udf.<id>` reference).
    pub async fn function_definition(
        &self,
        function_id: &str,
    ) -> anyhow::Result<Arc<FunctionDefinition>> {
        if let Some(definition) = self.functions.get(function_id) {
            return Ok(definition);
        }
        let timer = metrics::function_fetch_timer();
        let record = self.fetch_record(ConfigKind::Function, function_id).await?;
        let Some(record) = record else {
            metrics::log_config_negative_miss(ConfigKind::Function);
            return Err(ErrorMetadata::unknown_function(function_id).into());
        };
        let definition: FunctionDefinition = serde_json::from_value(record).map_err(|e| {
            anyhow::anyhow!(e).context(ErrorMetadata::config_error(
                "InvalidFunctionRecord",
                format!("Config store returned an unparseable function for {function_id}"),
            ))
        })?;
        let definition = Arc::new(definition);
        self.functions
            .set(function_id, definition.clone(), *FUNCTION_CACHE_TTL);
        timer.finish();
        Ok(definition)
    }

    async fn fetch_record(
        &self,
        kind: ConfigKind,
        key: &str,
    ) -> anyhow::Result<Option<JsonValue>> {
        let result = self
            .fetcher
            .fetch(kind, key)
            .await
            .with_context(|| format!("Fetching {} {key}", kind.as_str()));
        match result {
            Ok(record) => Ok(record),
            // A store outage must redeliver the message, even if the fetcher
            // forgot to classify its own failure.
            Err(e) if e.error_code().is_none() => Err(e.context(
                ErrorMetadata::transient_downstream(
                    "ConfigStoreUnavailable",
                    "The config store could not be reached",
                ),
            )),
            Err(e) => Err(e),
        }
    }
}
