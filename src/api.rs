//! HTTP API layer, grounded on the teacher's `api.rs::create_router`/
//! `AppState` shape and on `original_source/api/app/routers/ask.py`,
//! `intent.py`, and `graph.py` for the route surface.

use std::sync::Arc;

use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use tower_http::cors::CorsLayer;

use crate::config::PipelineConfig;
use crate::coordinator::Coordinator;
use crate::graph_client::GraphStoreClient;
use crate::llm_client::LlmClient;
use crate::model::{GroundedEntity, Response, SubgraphResponse};

#[derive(Clone)]
pub struct AppState {
    coordinator: Arc<Coordinator>,
}

pub fn create_router(
    config: PipelineConfig,
    graph: Arc<dyn GraphStoreClient>,
    llm: Arc<dyn LlmClient>,
) -> Router {
    let coordinator = Arc::new(Coordinator::new(config, graph, llm));
    let state = AppState { coordinator };

    Router::new()
        .route("/health", get(health))
        .route("/ask", post(ask))
        .route("/classify", post(classify))
        .route("/subgraph", post(subgraph))
        .route("/admin/clear-response-cache", post(clear_response_cache))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}

#[derive(serde::Deserialize)]
struct AskRequest {
    query: String,
}

async fn ask(State(state): State<AppState>, Json(body): Json<AskRequest>) -> Json<Response> {
    let response = state.coordinator.answer(&body.query).await;
    Json(response)
}

#[derive(serde::Serialize)]
struct ClassifyResponse {
    intent: String,
    confidence: f64,
    entities: Vec<GroundedEntity>,
}

async fn classify(State(state): State<AppState>, Json(body): Json<AskRequest>) -> Json<ClassifyResponse> {
    let result = state.coordinator.classify(&body.query).await;
    Json(ClassifyResponse {
        intent: result.intent,
        confidence: result.confidence,
        entities: result.entities,
    })
}

#[derive(serde::Deserialize)]
struct SubgraphRequest {
    ticker: String,
    #[serde(default = "default_top_n")]
    top_n: i64,
    #[serde(default)]
    min_weight: f64,
}

fn default_top_n() -> i64 {
    15
}

async fn subgraph(
    State(state): State<AppState>,
    Json(body): Json<SubgraphRequest>,
) -> Json<SubgraphResponse> {
    let result = state
        .coordinator
        .subgraph(&body.ticker, body.top_n, body.min_weight)
        .await
        .unwrap_or_default();
    Json(result)
}

async fn clear_response_cache(State(state): State<AppState>) -> &'static str {
    state.coordinator.clear_response_cache();
    "cleared"
}
