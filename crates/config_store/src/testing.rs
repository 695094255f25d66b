//! Test double for the external config store.

use std::collections::HashMap;

use async_trait::async_trait;
use errors::ErrorMetadata;
use parking_lot::Mutex;
use serde_json::Value as JsonValue;

use crate::{
    ConfigFetcher,
    ConfigKind,
};

/// An in-memory `ConfigFetcher` with per-key fetch counting and a switch to
/// simulate a store outage.
pub struct StaticConfigFetcher {
    records: Mutex<HashMap<(ConfigKind, String), JsonValue>>,
    fetch_counts: Mutex<HashMap<(ConfigKind, String), usize>>,
    unavailable: Mutex<bool>,
}

impl StaticConfigFetcher {
    pub fn new() -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
            fetch_counts: Mutex::new(HashMap::new()),
            unavailable: Mutex::new(false),
        }
    }

    pub fn insert(&self, kind: ConfigKind, key: &str, record: JsonValue) {
        self.records.lock().insert((kind, key.to_owned()), record);
    }

    pub fn remove(&self, kind: ConfigKind, key: &str) {
        self.records.lock().remove(&(kind, key.to_owned()));
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        *self.unavailable.lock() = unavailable;
    }

    pub fn fetch_count(&self, kind: ConfigKind, key: &str) -> usize {
        self.fetch_counts
            .lock()
            .get(&(kind, key.to_owned()))
            .copied()
            .unwrap_or(0)
    }
}

#[async_trait]
impl ConfigFetcher for StaticConfigFetcher {
    async fn fetch(&self, kind: ConfigKind, key: &str) -> anyhow::Result<Option<JsonValue>> {
        *self
            .fetch_counts
            .lock()
            .entry((kind, key.to_owned()))
            .or_insert(0) += 1;
        if *self.unavailable.lock() {
            anyhow::bail!(ErrorMetadata::transient_downstream(
                "ConfigStoreUnavailable",
                "Simulated config store outage",
            ));
        }
        Ok(self.records.lock().get(&(kind, key.to_owned())).cloned())
    }
}
