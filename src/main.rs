//! ETF GraphRAG pipeline — binary entrypoint.
//! Boots the Axum HTTP server, wiring configuration, tracing, the graph
//! and LLM collaborators, the metrics recorder, and the pipeline routes.
//!
//! ## Endpoints
//! - `GET /health` — liveness check
//! - `POST /ask` — run a question through the full pipeline
//! - `POST /classify` — intent classification only, no query execution
//! - `POST /subgraph` — alias for `/ask`, used by graph-focused clients
//! - `POST /admin/clear-response-cache` — drops the response cache
//! - `GET /metrics` — Prometheus exposition

use etf_graphrag_pipeline::config::PipelineConfig;
use etf_graphrag_pipeline::graph_client::{GraphStoreClient, HttpGraphClient};
use etf_graphrag_pipeline::llm_client::{HttpLlmClient, LlmClient};
use etf_graphrag_pipeline::metrics::Metrics;
use etf_graphrag_pipeline::{api, PIPELINE_VERSION};
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .json()
        .init();

    let config = PipelineConfig::load_from_file(std::path::Path::new("config/pipeline.toml"));

    let graph: Arc<dyn GraphStoreClient> = Arc::new(HttpGraphClient::new(
        config.graph.endpoint.clone(),
        config.graph.username.clone(),
        config.graph.password.clone(),
        Duration::from_secs(config.graph.timeout_secs),
    ));

    let llm: Arc<dyn LlmClient> = Arc::new(HttpLlmClient::new(
        config.llm.endpoint.clone(),
        config.llm.model.clone(),
        config.llm.api_key.clone(),
        config.llm.temperature,
        config.llm.max_tokens,
        Duration::from_secs(config.llm.timeout_secs),
    ));

    let metrics = Metrics::init();

    let app = api::create_router(config, graph, llm).merge(metrics.router());

    tracing::info!(version = PIPELINE_VERSION, "starting etf-graphrag-pipeline");

    let listener = tokio::net::TcpListener::bind("0.0.0.0:8080").await?;
    axum::serve(listener, app).await?;

    Ok(())
}
