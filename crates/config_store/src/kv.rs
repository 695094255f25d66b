use std::collections::HashMap;

use anyhow::Context;
use async_trait::async_trait;
use common::types::ConnectionId;
use parking_lot::Mutex;
use serde_json::Value as JsonValue;
use std::sync::Arc;

/// The external shared cache: a flat hash-map interface under string keys.
/// Namespacing is the binding's job, not the store's.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> anyhow::Result<Option<String>>;
    async fn set(&self, key: &str, value: String) -> anyhow::Result<()>;
    async fn delete(&self, key: &str) -> anyhow::Result<()>;
}

/// Process-local store used when no external shared cache is configured,
/// and by tests.
pub struct InMemoryKvStore {
    entries: Mutex<HashMap<String, String>>,
}

impl InMemoryKvStore {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl KvStore for InMemoryKvStore {
    async fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        Ok(self.entries.lock().get(key).cloned())
    }

    async fn set(&self, key: &str, value: String) -> anyhow::Result<()> {
        self.entries.lock().insert(key.to_owned(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> anyhow::Result<()> {
        self.entries.lock().remove(key);
        Ok(())
    }
}

const STORE_KEY_PREFIX: &str = "store:";

/// Per-connection view over the shared store, passed by value into every
/// UDF invocation. Holds no local state; values are JSON on the wire.
/// Connection ids never contain `:`, so logical keys cannot collide across
/// connections.
#[derive(Clone)]
pub struct ConnectionStore {
    store: Arc<dyn KvStore>,
    connection_id: ConnectionId,
}

impl ConnectionStore {
    pub fn new(store: Arc<dyn KvStore>, connection_id: ConnectionId) -> Self {
        debug_assert!(!connection_id.as_str().contains(':'));
        Self {
            store,
            connection_id,
        }
    }

    pub fn connection_id(&self) -> &ConnectionId {
        &self.connection_id
    }

    fn external_key(&self, key: &str) -> String {
        format!("{STORE_KEY_PREFIX}{}:{key}", self.connection_id)
    }

    pub async fn get(&self, key: &str) -> anyhow::Result<Option<JsonValue>> {
        let Some(raw) = self.store.get(&self.external_key(key)).await? else {
            return Ok(None);
        };
        let value = serde_json::from_str(&raw)
            .with_context(|| format!("Invalid JSON stored under {key}"))?;
        Ok(Some(value))
    }

    pub async fn set(&self, key: &str, value: &JsonValue) -> anyhow::Result<()> {
        self.store
            .set(&self.external_key(key), serde_json::to_string(value)?)
            .await
    }

    pub async fn delete(&self, key: &str) -> anyhow::Result<()> {
        self.store.delete(&self.external_key(key)).await
    }
}
