//! Turns a connection's configured function list into an executable chain.
//!
//! Declared interleavings are not preserved: the chain always runs builtin
//! transformations first, then a single synthetic `udf.PIPELINE` step
//! wrapping the connection's user functions in declared order, then the
//! destination steps. The terminal destination is appended before
//! partitioning, so it goes through the same classification as everything
//! else.

use std::sync::Arc;

use common::{
    runtime::Runtime,
    types::{
        EnrichedConnection,
        FunctionDefinition,
        FunctionKind,
        UDF_PIPELINE_STEP_ID,
    },
};
use config_store::{
    ConfigStore,
    ConnectionStore,
};
use errors::{
    ErrorMetadata,
    ErrorMetadataAnyhowExt,
};
use parking_lot::Mutex;
use serde_json::Value as JsonValue;
use udf_runtime::{
    CompiledUdf,
    UdfContext,
    UdfRegistry,
};

use crate::{
    builtins::{
        BuiltinContext,
        BuiltinRegistry,
    },
    ChainStep,
    FuncReturn,
    FunctionChain,
    StepFunction,
    StepImpl,
    StepKind,
    SystemContext,
};

/// Predicate over function ids, used for dry runs and single-function
/// debugging. Skipping a UDF also skips its definition fetch and compile.
pub type FunctionsFilter = Arc<dyn Fn(&str) -> bool + Send + Sync>;

pub struct ChainBuilder<RT: Runtime> {
    config_store: ConfigStore<RT>,
    udf_registry: UdfRegistry<RT>,
    builtins: Arc<BuiltinRegistry>,
    system: SystemContext,
}

impl<RT: Runtime> Clone for ChainBuilder<RT> {
    fn clone(&self) -> Self {
        Self {
            config_store: self.config_store.clone(),
            udf_registry: self.udf_registry.clone(),
            builtins: self.builtins.clone(),
            system: self.system.clone(),
        }
    }
}

struct RawRef {
    id: String,
    kind: FunctionKind,
    options: Option<JsonValue>,
}

struct UdfChainLink<RT: Runtime> {
    step_id: String,
    udf_id: String,
    definition: Arc<FunctionDefinition>,
    options: Option<JsonValue>,
    compiled: Arc<CompiledUdf>,
    registry: UdfRegistry<RT>,
}

impl<RT: Runtime> ChainBuilder<RT> {
    pub fn new(
        config_store: ConfigStore<RT>,
        udf_registry: UdfRegistry<RT>,
        builtins: Arc<BuiltinRegistry>,
        system: SystemContext,
    ) -> Self {
        Self {
            config_store,
            udf_registry,
            builtins,
            system,
        }
    }

    pub fn system(&self) -> &SystemContext {
        &self.system
    }

    pub async fn build(
        &self,
        connection: &EnrichedConnection,
        store: ConnectionStore,
        filter: Option<&FunctionsFilter>,
    ) -> anyhow::Result<FunctionChain> {
        let mut raw = Vec::with_capacity(connection.options.functions.len() + 1);
        for reference in &connection.options.functions {
            raw.push(RawRef {
                kind: FunctionKind::parse(&reference.function_id)?,
                id: reference.function_id.clone(),
                options: reference.function_options.clone(),
            });
        }
        raw.push(self.terminal_ref(connection));
        if let Some(filter) = filter {
            raw.retain(|r| filter(&r.id));
        }

        // Single pass into the ordered triple; order within each class is
        // the declared order.
        let mut transformations = Vec::new();
        let mut udf_refs = Vec::new();
        let mut destinations = Vec::new();
        for r in raw {
            match r.kind {
                FunctionKind::BuiltinTransformation(name) => {
                    transformations.push((r.id, name, r.options))
                },
                FunctionKind::Udf(udf_id) => udf_refs.push((r.id, udf_id, r.options)),
                FunctionKind::BuiltinDestination(name) => {
                    destinations.push((r.id, name, r.options))
                },
            }
        }

        let mut links = Vec::with_capacity(udf_refs.len());
        for (step_id, udf_id, options) in udf_refs {
            let definition = self.config_store.function_definition(&udf_id).await?;
            if definition.workspace_id != connection.workspace_id {
                anyhow::bail!(ErrorMetadata::workspace_mismatch(
                    &step_id,
                    definition.workspace_id.as_str(),
                    connection.workspace_id.as_str(),
                ));
            }
            let compiled = self
                .udf_registry
                .acquire(&udf_id, &definition.name, &definition.code)
                .await?;
            links.push(UdfChainLink {
                step_id,
                udf_id,
                definition,
                options,
                compiled,
                registry: self.udf_registry.clone(),
            });
        }

        let mut steps = Vec::new();
        for (id, name, options) in transformations {
            let ctx = BuiltinContext {
                system: &self.system,
                connection,
                options: options.as_ref(),
            };
            steps.push(ChainStep {
                id,
                kind: StepKind::BuiltinTransformation,
                imp: StepImpl::Func(self.builtins.transformation(&name, &ctx)?),
            });
        }
        if !links.is_empty() {
            let inner = FunctionChain {
                steps: links
                    .into_iter()
                    .map(|link| link.into_step(store.clone()))
                    .collect(),
            };
            steps.push(ChainStep {
                id: UDF_PIPELINE_STEP_ID.to_owned(),
                kind: StepKind::UdfPipeline,
                imp: StepImpl::Pipeline(inner),
            });
        }
        for (id, name, options) in destinations {
            let ctx = BuiltinContext {
                system: &self.system,
                connection,
                options: options.as_ref(),
            };
            steps.push(ChainStep {
                id,
                kind: StepKind::BuiltinDestination,
                imp: StepImpl::Func(self.builtins.destination(&name, &ctx)?),
            });
        }
        Ok(FunctionChain { steps })
    }

    /// Chain consisting of a single user function and no destination, for
    /// the ad-hoc run endpoint. The result is returned to the caller rather
    /// than delivered.
    pub async fn build_single_udf(
        &self,
        udf_id: &str,
        options: Option<JsonValue>,
        store: ConnectionStore,
    ) -> anyhow::Result<FunctionChain> {
        let definition = self.config_store.function_definition(udf_id).await?;
        let compiled = self
            .udf_registry
            .acquire(udf_id, &definition.name, &definition.code)
            .await?;
        let link = UdfChainLink {
            step_id: format!("udf.{udf_id}"),
            udf_id: udf_id.to_owned(),
            definition,
            options,
            compiled,
            registry: self.udf_registry.clone(),
        };
        Ok(FunctionChain {
            steps: vec![ChainStep {
                id: UDF_PIPELINE_STEP_ID.to_owned(),
                kind: StepKind::UdfPipeline,
                imp: StepImpl::Pipeline(FunctionChain {
                    steps: vec![link.into_step(store)],
                }),
            }],
        })
    }

    fn terminal_ref(&self, connection: &EnrichedConnection) -> RawRef {
        let name = if connection.uses_bulker {
            "bulker".to_owned()
        } else {
            connection.destination_type.clone()
        };
        RawRef {
            id: format!("builtin.destination.{name}"),
            kind: FunctionKind::BuiltinDestination(name),
            options: None,
        }
    }
}

impl<RT: Runtime> UdfChainLink<RT> {
    fn into_step(self, store: ConnectionStore) -> ChainStep {
        let current = Mutex::new(self.compiled.clone());
        ChainStep {
            id: self.step_id.clone(),
            kind: StepKind::UdfPipeline,
            imp: StepImpl::Func(Arc::new(UdfStep {
                link: self,
                store,
                current,
            })),
        }
    }
}

/// One user function inside the pipeline step. Detects the disposed-sandbox
/// signal, rebuilds through the registry exactly once, and retries; a second
/// disposal in a row propagates as fatal.
struct UdfStep<RT: Runtime> {
    link: UdfChainLink<RT>,
    store: ConnectionStore,
    current: Mutex<Arc<CompiledUdf>>,
}

#[async_trait::async_trait]
impl<RT: Runtime> StepFunction for UdfStep<RT> {
    async fn exec(
        &self,
        event: JsonValue,
        ctx: &common::types::EventContext,
    ) -> anyhow::Result<FuncReturn> {
        let udf_ctx = UdfContext {
            event_context: ctx.clone(),
            function_options: self.link.options.clone(),
            store: self.store.clone(),
        };
        let mut compiled = self.current.lock().clone();
        let mut attempts = 0;
        loop {
            attempts += 1;
            match compiled.invoke(&event, &udf_ctx).await {
                Ok(outcome) => return Ok(outcome.into()),
                Err(e) if e.is_sandbox_disposed() && attempts < 2 => {
                    compiled = self
                        .link
                        .registry
                        .rebuild(
                            &self.link.udf_id,
                            &self.link.definition.name,
                            &self.link.definition.code,
                        )
                        .await?;
                    *self.current.lock() = compiled.clone();
                },
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use common::{
        runtime::testing::TestRuntime,
        types::ConnectionId,
    };
    use config_store::{
        testing::StaticConfigFetcher,
        ConfigKind,
        ConfigStore,
        ConnectionStore,
        InMemoryKvStore,
    };
    use errors::{
        ErrorCode,
        ErrorMetadataAnyhowExt,
    };
    use serde_json::json;
    use udf_runtime::{
        testing::ScriptedCompiler,
        UdfRegistry,
    };
    use url::Url;

    use super::{
        ChainBuilder,
        FunctionsFilter,
    };
    use crate::{
        BuiltinRegistry,
        BulkerConfig,
        StepKind,
        SystemContext,
    };

    struct Harness {
        fetcher: Arc<StaticConfigFetcher>,
        compiler: Arc<ScriptedCompiler>,
        builder: ChainBuilder<TestRuntime>,
    }

    fn harness() -> Harness {
        let rt = TestRuntime::new();
        let fetcher = Arc::new(StaticConfigFetcher::new());
        let compiler = Arc::new(ScriptedCompiler::new());
        let builder = ChainBuilder::new(
            ConfigStore::new(rt.clone(), fetcher.clone()),
            UdfRegistry::new(rt, compiler.clone()),
            Arc::new(BuiltinRegistry::standard()),
            SystemContext {
                http_client: reqwest::Client::new(),
                bulker: BulkerConfig {
                    base_url: Url::parse("http://bulker.local").unwrap(),
                    auth_token: "token".to_owned(),
                },
            },
        );
        Harness {
            fetcher,
            compiler,
            builder,
        }
    }

    fn function_record(id: &str, workspace_id: &str) -> serde_json::Value {
        json!({
            "id": id,
            "workspaceId": workspace_id,
            "name": format!("Function {id}"),
            "code": "export default e => e",
        })
    }

    fn connection(functions: serde_json::Value) -> common::types::EnrichedConnection {
        serde_json::from_value(json!({
            "id": "c1",
            "workspaceId": "w1",
            "streamId": "s1",
            "destinationId": "d1",
            "type": "clickhouse",
            "usesBulker": true,
            "options": {"functions": functions},
        }))
        .unwrap()
    }

    fn store() -> ConnectionStore {
        ConnectionStore::new(Arc::new(InMemoryKvStore::new()), ConnectionId::new("c1"))
    }

    #[tokio::test(start_paused = true)]
    async fn test_declared_interleaving_is_partitioned() -> anyhow::Result<()> {
        let h = harness();
        h.fetcher
            .insert(ConfigKind::Function, "f1", function_record("f1", "w1"));
        // Declared order interleaves the classes; the chain comes out
        // transformation, pipeline, destination.
        let connection = connection(json!([
            {"functionId": "udf.f1"},
            {"functionId": "builtin.transformation.addTimestamp"},
        ]));
        let chain = h.builder.build(&connection, store(), None).await?;
        assert_eq!(
            chain.step_ids(),
            vec![
                "builtin.transformation.addTimestamp",
                "udf.PIPELINE",
                "builtin.destination.bulker",
            ]
        );
        assert_eq!(
            chain.steps.iter().map(|s| s.kind).collect::<Vec<_>>(),
            vec![
                StepKind::BuiltinTransformation,
                StepKind::UdfPipeline,
                StepKind::BuiltinDestination,
            ]
        );
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_functions_yields_terminal_only() -> anyhow::Result<()> {
        let h = harness();
        let chain = h.builder.build(&connection(json!([])), store(), None).await?;
        assert_eq!(chain.step_ids(), vec!["builtin.destination.bulker"]);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn test_workspace_mismatch_is_fatal_and_skips_compile() {
        let h = harness();
        h.fetcher
            .insert(ConfigKind::Function, "f9", function_record("f9", "w2"));
        let connection = connection(json!([{"functionId": "udf.f9"}]));
        let err = h.builder.build(&connection, store(), None).await.unwrap_err();
        assert_eq!(err.error_code(), Some(ErrorCode::WorkspaceMismatch));
        assert_eq!(h.compiler.compile_count("f9"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_function_namespace_is_fatal() {
        let h = harness();
        let connection = connection(json!([{"functionId": "plugin.mystery"}]));
        let err = h.builder.build(&connection, store(), None).await.unwrap_err();
        assert_eq!(err.error_code(), Some(ErrorCode::UnknownFunctionType));
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_destination_builtin_is_config_error() {
        let h = harness();
        let connection: common::types::EnrichedConnection = serde_json::from_value(json!({
            "id": "c1",
            "workspaceId": "w1",
            "streamId": "s1",
            "destinationId": "d1",
            "type": "fax-machine",
            "usesBulker": false,
        }))
        .unwrap();
        let err = h.builder.build(&connection, store(), None).await.unwrap_err();
        assert_eq!(err.error_code(), Some(ErrorCode::ConfigError));
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_udf_definition_is_fatal() {
        let h = harness();
        let connection = connection(json!([{"functionId": "udf.absent"}]));
        let err = h.builder.build(&connection, store(), None).await.unwrap_err();
        assert_eq!(err.error_code(), Some(ErrorCode::UnknownFunction));
    }

    #[tokio::test(start_paused = true)]
    async fn test_filter_skips_udf_resolution() -> anyhow::Result<()> {
        let h = harness();
        let connection = connection(json!([
            {"functionId": "udf.f1"},
            {"functionId": "builtin.transformation.addTimestamp"},
        ]));
        let filter: FunctionsFilter = Arc::new(|id: &str| !id.starts_with("udf."));
        let chain = h.builder.build(&connection, store(), Some(&filter)).await?;
        assert_eq!(
            chain.step_ids(),
            vec![
                "builtin.transformation.addTimestamp",
                "builtin.destination.bulker",
            ]
        );
        // The filtered UDF was never fetched or compiled.
        assert_eq!(h.fetcher.fetch_count(ConfigKind::Function, "f1"), 0);
        assert_eq!(h.compiler.compile_count("f1"), 0);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn test_webhook_destination_needs_url_credential() {
        let h = harness();
        let mut connection = connection(json!([]));
        connection.uses_bulker = false;
        connection.destination_type = "webhook".to_owned();
        let err = h.builder.build(&connection, store(), None).await.unwrap_err();
        assert_eq!(err.error_code(), Some(ErrorCode::ConfigError));

        connection.credentials = json!({"url": "http://hook.local/events"});
        assert!(h.builder.build(&connection, store(), None).await.is_ok());
    }
}
