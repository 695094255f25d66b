//! End-to-end scenarios: real messages through the handler, delivered to a
//! loopback downstream server.

use std::sync::{
    atomic::{
        AtomicUsize,
        Ordering,
    },
    Arc,
};

use axum::response::IntoResponse;
use common::runtime::testing::TestRuntime;
use config_store::{
    testing::StaticConfigFetcher,
    ConfigKind,
    InMemoryKvStore,
};
use parking_lot::Mutex;
use pipeline::BulkerConfig;
use serde_json::{
    json,
    Value as JsonValue,
};
use udf_runtime::testing::{
    ScriptedCompiler,
    TestBehavior,
};
use url::Url;

use crate::{
    bus::testing::InMemoryBus,
    handler::EventDisposition,
    http::{
        router,
        serve,
    },
    RotorService,
    ServiceDeps,
};

#[derive(Debug, Clone)]
struct CapturedRequest {
    path: String,
    query: String,
    authorization: Option<String>,
    body: JsonValue,
}

/// Loopback HTTP server standing in for bulker and webhook endpoints.
/// Answers 503 for the first `fail_first` requests, then 200.
#[derive(Clone)]
struct Downstream {
    base_url: String,
    requests: Arc<Mutex<Vec<CapturedRequest>>>,
    fail_first: Arc<AtomicUsize>,
    served: Arc<AtomicUsize>,
}

impl Downstream {
    async fn spawn() -> Self {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let downstream = Self {
            base_url: format!("http://{addr}"),
            requests: Arc::new(Mutex::new(Vec::new())),
            fail_first: Arc::new(AtomicUsize::new(0)),
            served: Arc::new(AtomicUsize::new(0)),
        };
        let state = downstream.clone();
        let app = axum::Router::new().fallback(
            move |uri: axum::http::Uri,
                  headers: axum::http::HeaderMap,
                  body: axum::body::Bytes| {
                let state = state.clone();
                async move {
                    state.requests.lock().push(CapturedRequest {
                        path: uri.path().to_owned(),
                        query: uri.query().unwrap_or("").to_owned(),
                        authorization: headers
                            .get("authorization")
                            .and_then(|v| v.to_str().ok())
                            .map(str::to_owned),
                        body: serde_json::from_slice(&body).unwrap_or(JsonValue::Null),
                    });
                    let n = state.served.fetch_add(1, Ordering::SeqCst);
                    let status = if n < state.fail_first.load(Ordering::SeqCst) {
                        axum::http::StatusCode::SERVICE_UNAVAILABLE
                    } else {
                        axum::http::StatusCode::OK
                    };
                    (status, "{}").into_response()
                }
            },
        );
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        downstream
    }

    fn requests(&self) -> Vec<CapturedRequest> {
        self.requests.lock().clone()
    }
}

struct Harness {
    fetcher: Arc<StaticConfigFetcher>,
    compiler: Arc<ScriptedCompiler>,
    service: RotorService<TestRuntime>,
}

fn harness(bulker_url: &str) -> Harness {
    let fetcher = Arc::new(StaticConfigFetcher::new());
    let compiler = Arc::new(ScriptedCompiler::new());
    let service = RotorService::new(
        TestRuntime::new(),
        ServiceDeps {
            fetcher: fetcher.clone(),
            compiler: compiler.clone(),
            kv_store: Arc::new(InMemoryKvStore::new()),
            bulker: BulkerConfig {
                base_url: Url::parse(bulker_url).unwrap(),
                auth_token: "test-token".to_owned(),
            },
        },
    )
    .unwrap();
    Harness {
        fetcher,
        compiler,
        service,
    }
}

fn bulker_connection(id: &str, data_layout: &str, functions: JsonValue) -> JsonValue {
    json!({
        "id": id,
        "workspaceId": "w1",
        "streamId": "s1",
        "destinationId": format!("dest-{id}"),
        "type": "clickhouse",
        "usesBulker": true,
        "options": {"dataLayout": data_layout, "functions": functions},
    })
}

fn webhook_connection(id: &str, url: &str, functions: JsonValue) -> JsonValue {
    json!({
        "id": id,
        "workspaceId": "w1",
        "streamId": "s1",
        "destinationId": format!("dest-{id}"),
        "type": "webhook",
        "usesBulker": false,
        "options": {"functions": functions},
        "credentials": {"url": url},
    })
}

fn message(connection_id: &str, message_id: &str, payload: JsonValue) -> Vec<u8> {
    serde_json::to_vec(&json!({
        "connectionId": connection_id,
        "messageId": message_id,
        "type": "track",
        "httpPayload": payload,
    }))
    .unwrap()
}

fn seed_function(h: &Harness, udf_id: &str, behavior: TestBehavior) {
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
    h.compiler.set_behavior(udf_id, behavior);
}

#[tokio::test]
async fn test_passthrough_delivers_to_bulker() {
    let downstream = Downstream::spawn().await;
    let h = harness(&downstream.base_url);
    h.fetcher.insert(
        ConfigKind::Connection,
        "c1",
        bulker_connection("c1", "segment", json!([])),
    );

    let disposition = h
        .service
        .handler
        .handle(&message("c1", "m1", json!({"event": "click"})), 0)
        .await;
    assert_eq!(disposition, EventDisposition::Ack);

    let requests = downstream.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].path, "/post/c1");
    assert!(requests[0].query.contains("dataLayout=segment"));
    assert!(requests[0].query.contains("tableName=events"));
    assert_eq!(requests[0].authorization.as_deref(), Some("Bearer test-token"));
    assert_eq!(requests[0].body, json!({"event": "click"}));
}

#[tokio::test]
async fn test_builtin_transform_adds_timestamp() {
    let downstream = Downstream::spawn().await;
    let h = harness(&downstream.base_url);
    h.fetcher.insert(
        ConfigKind::Connection,
        "c2",
        bulker_connection(
            "c2",
            "segment-single-table",
            json!([{"functionId": "builtin.transformation.addTimestamp"}]),
        ),
    );

    let disposition = h
        .service
        .handler
        .handle(&message("c2", "m2", json!({"event": "click"})), 0)
        .await;
    assert_eq!(disposition, EventDisposition::Ack);

    let requests = downstream.requests();
    assert_eq!(requests.len(), 1);
    assert!(requests[0].body["timestamp"].is_string());
    assert_eq!(requests[0].body["event"], "click");
}

#[tokio::test]
async fn test_udf_fan_out_delivers_in_order() {
    let downstream = Downstream::spawn().await;
    let h = harness(&downstream.base_url);
    let webhook_url = format!("{}/events", downstream.base_url);
    h.fetcher.insert(
        ConfigKind::Connection,
        "c3",
        webhook_connection("c3", &webhook_url, json!([{"functionId": "udf.f3"}])),
    );
    seed_function(&h, "f3", TestBehavior::FanOut(2));

    let disposition = h
        .service
        .handler
        .handle(&message("c3", "m3", json!({"event": "click"})), 0)
        .await;
    assert_eq!(disposition, EventDisposition::Ack);

    let requests = downstream.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].path, "/events");
    assert_eq!(requests[0].body["seq"], json!(0));
    assert_eq!(requests[1].body["seq"], json!(1));
}

#[tokio::test]
async fn test_workspace_mismatch_drops_without_delivery() {
    let downstream = Downstream::spawn().await;
    let h = harness(&downstream.base_url);
    h.fetcher.insert(
        ConfigKind::Connection,
        "c5",
        bulker_connection("c5", "segment", json!([{"functionId": "udf.f9"}])),
    );
    h.fetcher.insert(
        ConfigKind::Function,
        "f9",
        json!({
            "id": "f9",
            "workspaceId": "w2",
            "name": "Foreign function",
            "code": "export default e => e",
        }),
    );

    let disposition = h
        .service
        .handler
        .handle(&message("c5", "m5", json!({"event": "click"})), 0)
        .await;
    // Fatal: acked so the partition keeps moving, and nothing was invoked
    // or delivered.
    assert_eq!(disposition, EventDisposition::Ack);
    assert!(downstream.requests().is_empty());
    assert_eq!(h.compiler.compile_count("f9"), 0);
}

#[tokio::test]
async fn test_transient_503_redelivers_with_incremented_retries() {
    let downstream = Downstream::spawn().await;
    let h = harness(&downstream.base_url);
    let webhook_url = format!("{}/events", downstream.base_url);
    h.fetcher.insert(
        ConfigKind::Connection,
        "c6",
        webhook_connection("c6", &webhook_url, json!([{"functionId": "udf.f6"}])),
    );
    seed_function(&h, "f6", TestBehavior::TagRetries);
    downstream.fail_first.store(1, Ordering::SeqCst);

    let bus = InMemoryBus::new(3);
    bus.publish(message("c6", "m6", json!({"event": "click"})));
    let history = bus.run(&*h.service.handler).await;
    assert_eq!(
        history,
        vec![(0, EventDisposition::Retry), (1, EventDisposition::Ack)]
    );

    let requests = downstream.requests();
    assert_eq!(requests.len(), 2);
    // The redelivered invocation saw the incremented retry count.
    assert_eq!(requests[0].body["retries"], json!(0));
    assert_eq!(requests[1].body["retries"], json!(1));
}

#[tokio::test]
async fn test_malformed_message_is_dropped_not_retried() {
    let downstream = Downstream::spawn().await;
    let h = harness(&downstream.base_url);

    let disposition = h.service.handler.handle(b"not json at all", 0).await;
    assert_eq!(disposition, EventDisposition::Ack);
    assert!(downstream.requests().is_empty());
}

#[tokio::test]
async fn test_unknown_connection_is_dropped() {
    let downstream = Downstream::spawn().await;
    let h = harness(&downstream.base_url);

    let disposition = h
        .service
        .handler
        .handle(&message("ghost", "m9", json!({})), 0)
        .await;
    assert_eq!(disposition, EventDisposition::Ack);
}

#[tokio::test]
async fn test_config_store_outage_asks_for_redelivery() {
    let downstream = Downstream::spawn().await;
    let h = harness(&downstream.base_url);
    h.fetcher.set_unavailable(true);

    let disposition = h
        .service
        .handler
        .handle(&message("c1", "m1", json!({})), 0)
        .await;
    assert_eq!(disposition, EventDisposition::Retry);
}

#[tokio::test]
async fn test_operator_endpoints() {
    let downstream = Downstream::spawn().await;
    let h = harness(&downstream.base_url);
    seed_function(
        &h,
        "f1",
        TestBehavior::AppendField("debugged".to_owned(), json!(true)),
    );

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    let router = router(h.service.router_state());
    tokio::spawn(async move {
        serve(router, port, std::future::pending::<()>()).await.unwrap();
    });
    // Give the listener a moment to bind.
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    let base = format!("http://127.0.0.1:{port}");
    let client = reqwest::Client::new();

    let health = client.get(format!("{base}/health")).send().await.unwrap();
    assert_eq!(health.status(), reqwest::StatusCode::OK);
    assert_eq!(health.text().await.unwrap(), "OK");

    let run: JsonValue = client
        .post(format!("{base}/udfrun"))
        .json(&json!({"functionId": "udf.f1", "event": {"event": "click"}}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(run["events"], json!([{"event": "click", "debugged": true}]));
    assert_eq!(run["execLog"][0]["functionId"], "udf.f1");
    assert_eq!(run["execLog"][0]["status"], "ok");

    let metrics_body = client
        .get(format!("{base}/metrics"))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert!(metrics_body.contains("ttl_cache"));
}
