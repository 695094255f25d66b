//! Dependency wiring. The worker is instantiated with exactly the clients
//! it needs; there are no global toggles.

use std::sync::Arc;

use common::{
    knobs::{
        DOWNSTREAM_REQUEST_TIMEOUT,
        SHUTDOWN_DRAIN_GRACE,
    },
    runtime::Runtime,
};
use config_store::{
    ConfigFetcher,
    ConfigStore,
    KvStore,
};
use pipeline::{
    builder::ChainBuilder,
    BuiltinRegistry,
    BulkerConfig,
    SystemContext,
};
use udf_runtime::{
    UdfCompiler,
    UdfRegistry,
};

use crate::{
    handler::MessageHandler,
    http::RouterState,
};

/// The external collaborators a worker is built around.
pub struct ServiceDeps {
    pub fetcher: Arc<dyn ConfigFetcher>,
    pub compiler: Arc<dyn UdfCompiler>,
    pub kv_store: Arc<dyn KvStore>,
    pub bulker: BulkerConfig,
}

pub struct RotorService<RT: Runtime> {
    rt: RT,
    pub config_store: ConfigStore<RT>,
    pub udf_registry: UdfRegistry<RT>,
    pub chain_builder: ChainBuilder<RT>,
    pub kv_store: Arc<dyn KvStore>,
    /// Handed to the bus adapter as its [`MessageSink`](crate::MessageSink).
    pub handler: Arc<MessageHandler<RT>>,
}

impl<RT: Runtime> RotorService<RT> {
    pub fn new(rt: RT, deps: ServiceDeps) -> anyhow::Result<Self> {
        let config_store = ConfigStore::new(rt.clone(), deps.fetcher);
        let udf_registry = UdfRegistry::new(rt.clone(), deps.compiler);
        let system = SystemContext {
            http_client: reqwest::Client::builder()
                .timeout(*DOWNSTREAM_REQUEST_TIMEOUT)
                .build()?,
            bulker: deps.bulker,
        };
        let chain_builder = ChainBuilder::new(
            config_store.clone(),
            udf_registry.clone(),
            Arc::new(BuiltinRegistry::standard()),
            system,
        );
        let handler = Arc::new(MessageHandler::new(
            rt.clone(),
            config_store.clone(),
            deps.kv_store.clone(),
            chain_builder.clone(),
        ));
        Ok(Self {
            rt,
            config_store,
            udf_registry,
            chain_builder,
            kv_store: deps.kv_store,
            handler,
        })
    }

    pub fn router_state(&self) -> RouterState<RT> {
        RouterState {
            config_store: self.config_store.clone(),
            chain_builder: self.chain_builder.clone(),
            kv_store: self.kv_store.clone(),
        }
    }

    /// The bus adapter has already stopped when this runs: give in-flight
    /// handlers the drain grace, then evict the UDF cache, closing every
    /// sandbox.
    pub async fn shutdown(&self) {
        self.rt.wait(*SHUTDOWN_DRAIN_GRACE).await;
        let closed = self.udf_registry.clear();
        tracing::info!("Shut down after closing {closed} cached sandboxes");
    }
}
