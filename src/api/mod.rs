//! Read-only HTTP view of the stored aggregate document

mod report;

pub use report::render_report;

use crate::storage::CheckpointStore;
use axum::{
    Router,
    extract::State,
    http::StatusCode,
    response::{Html, IntoResponse, Json, Response},
    routing::get,
};
use serde_json::{Value, json};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};

/// Shared state of the report server
#[derive(Clone)]
pub struct ApiState {
    store: Arc<dyn CheckpointStore>,
}

impl ApiState {
    pub fn new(store: Arc<dyn CheckpointStore>) -> Self {
        Self { store }
    }
}

/// Document served when nothing has been harvested yet
pub fn no_data_document() -> Value {
    json!({
        "error": "No data yet. Run `swap-harvest harvest` first.",
        "chains": {},
        "totals": {"1_month": {}, "3_months": {}}
    })
}

pub fn create_app(store: Arc<dyn CheckpointStore>) -> Router {
    Router::new()
        .route("/", get(report_handler))
        .route("/api/data", get(data_handler))
        .with_state(ApiState::new(store))
}

/// Serve the report until ctrl-c
pub async fn start_server(store: Arc<dyn CheckpointStore>, bind_address: &str) -> eyre::Result<()> {
    let app = create_app(store);

    let listener = TcpListener::bind(bind_address).await?;
    info!("Report server listening on http://{}", bind_address);

    axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await?;
    info!("Report server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
    }
}

/// The document is read from the store on every request, so a harvest running
/// next to the server shows up without a restart
async fn data_handler(State(state): State<ApiState>) -> Response {
    match state.store.read().await {
        Ok(Some(document)) => Json(document).into_response(),
        Ok(None) => Json(no_data_document()).into_response(),
        Err(e) => {
            error!("Failed to read state document: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({"error": e.to_string()}))).into_response()
        }
    }
}

async fn report_handler(State(state): State<ApiState>) -> Response {
    match state.store.read().await {
        Ok(document) => Html(render_report(document.as_ref())).into_response(),
        Err(e) => {
            error!("Failed to read state document: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, Html(format!("<p>State document unavailable: {}</p>", e))).into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logic::{AggregateState, ChainResult, LiquiditySnapshot, WindowSummary};
    use crate::storage::{JsonFileStore, MemoryStore};
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use chrono::Utc;
    use tower::ServiceExt;

    async fn get_body(app: Router, uri: &str) -> (StatusCode, String) {
        let response = app.oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap()).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, String::from_utf8(bytes.to_vec()).unwrap())
    }

    fn sample_state() -> AggregateState {
        let mut state = AggregateState::default();
        let summary = WindowSummary { swap_count: 4, volume_native: 0.1 + 0.2, volume_usd: Some(1.5) };
        state.insert_result(
            "bsc",
            ChainResult {
                name: "BSC".to_string(),
                pool_address: "0x351A295AfBAB020Bc7eedcB7fd5A823c01A95Fda".to_string(),
                current_block: 42,
                liquidity: LiquiditySnapshot::new("BUSD", Some((10.0, 2.0)), Some(0.5)),
                short_window: summary,
                long_window: summary,
                scanned_from: 1,
                price: None,
                unresolved_gaps: vec![],
            },
            Some(0.5),
            Utc::now(),
        );
        state
    }

    #[tokio::test]
    async fn test_api_data_no_data() {
        let (status, body) = get_body(create_app(Arc::new(MemoryStore::new())), "/api/data").await;
        assert_eq!(status, StatusCode::OK);
        let value: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(value, no_data_document());
    }

    #[tokio::test]
    async fn test_api_data_returns_document() {
        let state = sample_state();
        let store = Arc::new(MemoryStore::with_state(&state).unwrap());

        let (status, body) = get_body(create_app(store), "/api/data").await;
        assert_eq!(status, StatusCode::OK);
        let served: AggregateState = serde_json::from_str(&body).unwrap();
        assert_eq!(served, state);
        assert!(body.contains("\"1_month\""));
    }

    #[tokio::test]
    async fn test_report_page() {
        let (status, body) = get_body(create_app(Arc::new(MemoryStore::new())), "/").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("No data yet"));

        let store = Arc::new(MemoryStore::with_state(&sample_state()).unwrap());
        let (_, body) = get_body(create_app(store), "/").await;
        assert!(body.contains("BSC"));
        assert!(body.contains("$10.00"));
    }

    #[tokio::test]
    async fn test_corrupt_document_is_server_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, "{").unwrap();

        let (status, _) = get_body(create_app(Arc::new(JsonFileStore::new(&path))), "/api/data").await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    }
}
