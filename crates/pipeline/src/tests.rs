//! Whole-chain tests: build from a connection, execute, inspect the log.

use std::sync::Arc;

use common::{
    runtime::testing::TestRuntime,
    types::{
        ConnectionId,
        EnrichedConnection,
        EventContext,
        IngestMessage,
    },
};
use config_store::{
    testing::StaticConfigFetcher,
    ConfigKind,
    ConfigStore,
    ConnectionStore,
    InMemoryKvStore,
};
use errors::ErrorCode;
use serde_json::json;
use udf_runtime::{
    testing::{
        ScriptedCompiler,
        TestBehavior,
    },
    UdfRegistry,
};
use url::Url;

use crate::{
    check_error,
    builder::{
        ChainBuilder,
        FunctionsFilter,
    },
    execute_chain,
    BuiltinRegistry,
    BulkerConfig,
    StepStatus,
    SystemContext,
};

struct Harness {
    fetcher: Arc<StaticConfigFetcher>,
    compiler: Arc<ScriptedCompiler>,
    builder: ChainBuilder<TestRuntime>,
    store: ConnectionStore,
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
        store: ConnectionStore::new(Arc::new(InMemoryKvStore::new()), ConnectionId::new("c1")),
    }
}

fn connection_with_udf(udf_id: &str) -> EnrichedConnection {
    serde_json::from_value(json!({
        "id": "c1",
        "workspaceId": "w1",
        "streamId": "s1",
        "destinationId": "d1",
        "type": "clickhouse",
        "usesBulker": true,
        "options": {"functions": [{"functionId": format!("udf.{udf_id}")}]},
    }))
    .unwrap()
}

fn seed_function(h: &Harness, udf_id: &str) {
    h.fetcher.insert(
        ConfigKind::Function,
        udf_id,
        json!({
            "id": udf_id,
            "workspaceId": "w1",
            "name": format!("Function {udf_id}"),
            "code": format!("export default e => e // {udf_id}"),
        }),
    );
}

fn context(connection: &EnrichedConnection) -> EventContext {
    let message: IngestMessage = serde_json::from_value(json!({
        "connectionId": "c1",
        "messageId": "m1",
        "type": "track",
        "httpPayload": {"event": "click"},
    }))
    .unwrap();
    EventContext::for_message(&message, connection, 0)
}

/// Build the connection's chain without its destination steps, so tests can
/// execute it without a live downstream.
async fn udf_only_chain(
    h: &Harness,
    connection: &EnrichedConnection,
) -> anyhow::Result<crate::FunctionChain> {
    let filter: FunctionsFilter = Arc::new(|id: &str| !id.starts_with("builtin.destination."));
    h.builder.build(connection, h.store.clone(), Some(&filter)).await
}

#[tokio::test(start_paused = true)]
async fn test_udf_transforms_event_through_pipeline_step() -> anyhow::Result<()> {
    let h = harness();
    seed_function(&h, "f1");
    h.compiler
        .set_behavior("f1", TestBehavior::AppendField("enriched".to_owned(), json!(true)));
    let connection = connection_with_udf("f1");
    let chain = udf_only_chain(&h, &connection).await?;

    let result = execute_chain(&chain, json!({"event": "click"}), &context(&connection)).await;
    assert_eq!(result.events, vec![json!({"event": "click", "enriched": true})]);
    let ids: Vec<&str> = result.log.entries().iter().map(|e| e.function_id.as_str()).collect();
    assert_eq!(ids, vec!["udf.f1", "udf.PIPELINE"]);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_udf_fan_out_preserves_order() -> anyhow::Result<()> {
    let h = harness();
    seed_function(&h, "f1");
    h.compiler.set_behavior("f1", TestBehavior::FanOut(3));
    let connection = connection_with_udf("f1");
    let chain = udf_only_chain(&h, &connection).await?;

    let result = execute_chain(&chain, json!({"event": "click"}), &context(&connection)).await;
    let seqs: Vec<i64> = result.events.iter().map(|e| e["seq"].as_i64().unwrap()).collect();
    assert_eq!(seqs, vec![0, 1, 2]);
    assert!(matches!(
        result.log.entries().last().unwrap().status,
        StepStatus::Ok { events: 3 }
    ));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_disposed_sandbox_recovers_with_one_rebuild() -> anyhow::Result<()> {
    let h = harness();
    seed_function(&h, "f1");
    h.compiler.set_behavior("f1", TestBehavior::disposed_times(1));
    let connection = connection_with_udf("f1");
    let chain = udf_only_chain(&h, &connection).await?;

    let result = execute_chain(&chain, json!({"event": "click"}), &context(&connection)).await;
    assert_eq!(result.events.len(), 1);
    assert!(check_error(&result.log).is_ok());
    assert_eq!(result.log.error_count(), 0);
    // One compile up front, one transparent rebuild; the disposed wrapper
    // was closed on the way out.
    assert_eq!(h.compiler.compile_count("f1"), 2);
    assert_eq!(h.compiler.close_count("f1"), 1);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_second_disposal_in_a_row_is_fatal() -> anyhow::Result<()> {
    let h = harness();
    seed_function(&h, "f1");
    h.compiler.set_behavior("f1", TestBehavior::disposed_times(2));
    let connection = connection_with_udf("f1");
    let chain = udf_only_chain(&h, &connection).await?;

    let result = execute_chain(&chain, json!({"event": "click"}), &context(&connection)).await;
    assert!(result.events.is_empty());
    let entry = &result.log.entries()[0];
    match &entry.status {
        StepStatus::Error { error } => {
            assert_eq!(error.code, Some(ErrorCode::SandboxDisposed));
        },
        other => panic!("expected an error entry, got {other:?}"),
    }
    // Fatal, not retryable: the message would be acked with the failure
    // recorded.
    assert!(check_error(&result.log).is_ok());
    assert_eq!(h.compiler.compile_count("f1"), 2);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_udf_state_persists_across_invocations() -> anyhow::Result<()> {
    let h = harness();
    seed_function(&h, "f1");
    h.compiler
        .set_behavior("f1", TestBehavior::StoreCounter("seen".to_owned()));
    let connection = connection_with_udf("f1");
    let chain = udf_only_chain(&h, &connection).await?;
    let ctx = context(&connection);

    let first = execute_chain(&chain, json!({"event": "click"}), &ctx).await;
    let second = execute_chain(&chain, json!({"event": "click"}), &ctx).await;
    assert_eq!(first.events[0]["count"], json!(1));
    assert_eq!(second.events[0]["count"], json!(2));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_stale_function_definition_recompiles() -> anyhow::Result<()> {
    let h = harness();
    seed_function(&h, "f1");
    let connection = connection_with_udf("f1");
    udf_only_chain(&h, &connection).await?;
    assert_eq!(h.compiler.compile_count("f1"), 1);

    // The function's source changes. Once the definition cache expires, the
    // next chain build sees the new hash, compiles a replacement, and closes
    // the stale sandbox.
    h.fetcher.insert(
        ConfigKind::Function,
        "f1",
        json!({
            "id": "f1",
            "workspaceId": "w1",
            "name": "Function f1",
            "code": "export default e => ({...e, v: 2})",
        }),
    );
    tokio::time::sleep(std::time::Duration::from_secs(30)).await;
    let chain = udf_only_chain(&h, &connection).await?;
    assert_eq!(h.compiler.compile_count("f1"), 2);
    assert_eq!(h.compiler.close_count("f1"), 1);

    let result = execute_chain(&chain, json!({"event": "click"}), &context(&connection)).await;
    assert_eq!(result.events.len(), 1);
    assert!(check_error(&result.log).is_ok());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_udf_throw_is_recorded_not_raised() -> anyhow::Result<()> {
    let h = harness();
    seed_function(&h, "f1");
    h.compiler
        .set_behavior("f1", TestBehavior::Fail("boom".to_owned()));
    let connection = connection_with_udf("f1");
    let chain = udf_only_chain(&h, &connection).await?;

    let result = execute_chain(&chain, json!({"event": "click"}), &context(&connection)).await;
    assert!(result.events.is_empty());
    match &result.log.entries()[0].status {
        StepStatus::Error { error } => {
            assert_eq!(error.code, Some(ErrorCode::UdfRuntime));
        },
        other => panic!("expected an error entry, got {other:?}"),
    }
    assert!(check_error(&result.log).is_ok());
    Ok(())
}
