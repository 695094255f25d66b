use std::sync::Arc;

use async_trait::async_trait;
use clap::Parser;
use cmd_util::env::config_service;
use common::{
    errors::MainError,
    shutdown::ShutdownSignal,
};
use config_store::{
    ConfigFetcher,
    ConfigKind,
    HttpConfigFetcher,
    InMemoryKvStore,
};
use futures::FutureExt;
use pipeline::BulkerConfig;
use rotor::{
    http::{
        router,
        serve,
    },
    RotorConfig,
    RotorService,
    ServiceDeps,
};
use runtime::prod::ProdRuntime;
use serde_json::Value as JsonValue;
use udf_runtime::{
    NoopUdfCompiler,
    SidecarUdfCompiler,
    UdfCompiler,
};

fn main() -> Result<(), MainError> {
    config_service();
    let config = RotorConfig::parse();
    tracing::info!("Starting rotor with {config:?}");

    let tokio = ProdRuntime::init_tokio()?;
    let runtime = ProdRuntime::new(&tokio);
    let runtime_ = runtime.clone();
    runtime.block_on("main", async move {
        run_worker(runtime_, config).await?;
        Ok(())
    })
}

async fn run_worker(runtime: ProdRuntime, config: RotorConfig) -> anyhow::Result<()> {
    let fetcher: Arc<dyn ConfigFetcher> = match &config.config_store_url {
        Some(url) => Arc::new(HttpConfigFetcher::new(url.clone())?),
        None => {
            tracing::warn!(
                "No CONFIG_STORE_URL configured; every connection will resolve as unknown"
            );
            Arc::new(NoConfigStore)
        },
    };
    let compiler: Arc<dyn UdfCompiler> = match &config.udf_sidecar_url {
        Some(url) => Arc::new(SidecarUdfCompiler::new(url.clone())?),
        None => {
            tracing::warn!(
                "No UDF_SIDECAR_URL configured; connections with user functions will fail"
            );
            Arc::new(NoopUdfCompiler::new())
        },
    };
    let service = RotorService::new(
        runtime.clone(),
        ServiceDeps {
            fetcher,
            compiler,
            kv_store: Arc::new(InMemoryKvStore::new()),
            bulker: BulkerConfig {
                base_url: config.bulker_url.clone(),
                auth_token: config.bulker_auth_key.clone(),
            },
        },
    )?;

    // Used by the bus adapter to preempt the worker on a fatal consumer
    // error; the adapter also drives `service.handler` as its MessageSink.
    let (preempt_tx, mut preempt_rx) = async_broadcast::broadcast(1);
    let _preempt_signal = ShutdownSignal::new(preempt_tx, "rotor".to_owned());
    tracing::info!("Message handler ready; the bus adapter drives it through MessageSink");

    let shutdown = async move {
        futures::select! {
            r = tokio::signal::ctrl_c().fuse() => {
                if let Err(e) = r {
                    tracing::error!("Failed to listen for shutdown signal: {e}");
                }
                tracing::info!("Shutdown signal received; draining");
            },
            msg = preempt_rx.recv().fuse() => {
                if let Ok(msg) = msg {
                    tracing::error!("Preempted by fatal error: {}", msg.error);
                }
            },
        }
    };
    serve(router(service.router_state()), config.http_port(), shutdown).await?;
    service.shutdown().await;
    Ok(())
}

/// Fetcher used when the worker boots without a config store: every key is
/// absent.
struct NoConfigStore;

#[async_trait]
impl ConfigFetcher for NoConfigStore {
    async fn fetch(&self, _kind: ConfigKind, _key: &str) -> anyhow::Result<Option<JsonValue>> {
        Ok(None)
    }
}
