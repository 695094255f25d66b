use async_trait::async_trait;
use common::knobs::CONFIG_FETCH_TIMEOUT;
use errors::ErrorMetadata;
use serde_json::Value as JsonValue;
use url::Url;

use crate::{
    ConfigFetcher,
    ConfigKind,
};

/// Production fetcher speaking `GET {base}/api/config/{kind}/{key}` against
/// the low-latency config service. 404 means the key does not exist; any
/// other failure is a retryable outage.
pub struct HttpConfigFetcher {
    base_url: Url,
    client: reqwest::Client,
}

impl HttpConfigFetcher {
    pub fn new(base_url: Url) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(*CONFIG_FETCH_TIMEOUT)
            .build()?;
        Ok(Self { base_url, client })
    }

    fn url_for(&self, kind: ConfigKind, key: &str) -> String {
        format!(
            "{}/api/config/{}/{}",
            self.base_url.as_str().trim_end_matches('/'),
            kind.as_str(),
            key
        )
    }
}

#[async_trait]
impl ConfigFetcher for HttpConfigFetcher {
    async fn fetch(&self, kind: ConfigKind, key: &str) -> anyhow::Result<Option<JsonValue>> {
        let url = self.url_for(kind, key);
        let response = self.client.get(&url).send().await.map_err(|e| {
            anyhow::anyhow!(e).context(ErrorMetadata::transient_downstream(
                "ConfigStoreUnavailable",
                format!("Request to the config store failed for {url}"),
            ))
        })?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            anyhow::bail!(ErrorMetadata::transient_downstream(
                "ConfigStoreError",
                format!("Config store answered {} for {url}", response.status()),
            ));
        }
        let record = response.json().await.map_err(|e| {
            anyhow::anyhow!(e).context(ErrorMetadata::transient_downstream(
                "ConfigStoreBadPayload",
                format!("Config store returned an unreadable body for {url}"),
            ))
        })?;
        Ok(Some(record))
    }
}
