//! Operator endpoints: liveness, Prometheus exposition, and ad-hoc UDF
//! execution for debugging. None of these touch the bus.

use std::sync::Arc;

use axum::{
    extract::State,
    response::{
        IntoResponse,
        Response,
    },
    routing::{
        get,
        post,
    },
    Json,
    Router,
};
use common::{
    runtime::Runtime,
    types::{
        ConnectionId,
        ConnectionInfo,
        DestinationInfo,
        EventContext,
        SourceInfo,
    },
};
use config_store::{
    ConfigStore,
    ConnectionStore,
    KvStore,
};
use errors::ErrorMetadataAnyhowExt;
use pipeline::{
    builder::ChainBuilder,
    execute_chain,
    ExecLog,
};
use serde::{
    Deserialize,
    Serialize,
};
use serde_json::{
    json,
    Value as JsonValue,
};

pub struct RouterState<RT: Runtime> {
    pub config_store: ConfigStore<RT>,
    pub chain_builder: ChainBuilder<RT>,
    pub kv_store: Arc<dyn KvStore>,
}

impl<RT: Runtime> Clone for RouterState<RT> {
    fn clone(&self) -> Self {
        Self {
            config_store: self.config_store.clone(),
            chain_builder: self.chain_builder.clone(),
            kv_store: self.kv_store.clone(),
        }
    }
}

pub fn router<RT: Runtime>(st: RouterState<RT>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics_exposition))
        .route("/udfrun", post(udf_run::<RT>))
        .with_state(st)
}

async fn health() -> &'static str {
    "OK"
}

async fn metrics_exposition() -> Response {
    match metrics::render() {
        Ok(body) => (
            axum::http::StatusCode::OK,
            [(axum::http::header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(e) => (
            axum::http::StatusCode::INTERNAL_SERVER_ERROR,
            format!("Failed to render metrics: {e:#}"),
        )
            .into_response(),
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UdfRunRequest {
    /// A `udf.<id>` reference or the bare `<id>`.
    function_id: String,
    event: JsonValue,
    #[serde(default)]
    function_options: Option<JsonValue>,
    /// When set, the run borrows this connection's context and store
    /// namespace; otherwise a synthetic debugging context is used.
    #[serde(default)]
    connection_id: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct UdfRunResponse {
    events: Vec<JsonValue>,
    exec_log: ExecLog,
}

async fn udf_run<RT: Runtime>(
    State(st): State<RouterState<RT>>,
    Json(request): Json<UdfRunRequest>,
) -> Response {
    match run_udf(st, request).await {
        Ok(response) => Json(response).into_response(),
        Err(e) => (
            e.http_status(),
            Json(json!({
                "error": e.msg(),
                "shortMsg": e.short_msg(),
            })),
        )
            .into_response(),
    }
}

async fn run_udf<RT: Runtime>(
    st: RouterState<RT>,
    request: UdfRunRequest,
) -> anyhow::Result<UdfRunResponse> {
    let udf_id = request
        .function_id
        .strip_prefix(common::types::UDF_PREFIX)
        .unwrap_or(&request.function_id);
    let (ctx, store_id) = match request.connection_id {
        Some(connection_id) => {
            let connection_id = ConnectionId::new(connection_id);
            let connection = st.config_store.enriched_connection(&connection_id).await?;
            (debugging_context_for(&connection), connection_id)
        },
        None => (synthetic_context(), ConnectionId::new("udfrun")),
    };
    let store = ConnectionStore::new(st.kv_store.clone(), store_id);
    let chain = st
        .chain_builder
        .build_single_udf(udf_id, request.function_options, store)
        .await?;
    let result = execute_chain(&chain, request.event, &ctx).await;
    Ok(UdfRunResponse {
        events: result.events,
        exec_log: result.log,
    })
}

fn debugging_context_for(connection: &common::types::EnrichedConnection) -> EventContext {
    EventContext {
        geo: None,
        headers: None,
        retries: 0,
        source: SourceInfo {
            id: connection.stream_id.clone(),
            domain: None,
        },
        destination: DestinationInfo {
            id: connection.destination_id.clone(),
            destination_type: connection.destination_type.clone(),
            updated_at: connection.updated_at.clone(),
            credentials_hash: connection.credentials_hash.clone(),
        },
        connection: ConnectionInfo {
            id: connection.id.clone(),
            mode: connection.mode.clone(),
            options: serde_json::to_value(&connection.options).unwrap_or(JsonValue::Null),
        },
    }
}

fn synthetic_context() -> EventContext {
    EventContext {
        geo: None,
        headers: None,
        retries: 0,
        source: SourceInfo {
            id: "udfrun".to_owned(),
            domain: None,
        },
        destination: DestinationInfo {
            id: "udfrun".to_owned(),
            destination_type: "udfrun".to_owned(),
            updated_at: None,
            credentials_hash: None,
        },
        connection: ConnectionInfo {
            id: ConnectionId::new("udfrun"),
            mode: None,
            options: json!({}),
        },
    }
}

/// Serve the operator endpoints until `shutdown` resolves.
pub async fn serve(
    router: Router,
    port: u16,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    tracing::info!("Operator endpoints listening on {}", listener.local_addr()?);
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}
