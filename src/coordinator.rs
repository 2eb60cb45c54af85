//! Pipeline Coordinator (§4.8): owns the three caches and both
//! collaborators and drives the seven pipeline stages end to end.
//! Grounded on `pipeline.py`'s `GraphRAGPipeline.process_query` and the
//! teacher's `api.rs::decide_batch` timing-dict pattern. Unlike the
//! teacher, state is owned by an explicit `Coordinator` instance rather
//! than a process-wide `OnceLock` singleton, so tests can construct
//! independent pipelines with mock collaborators.

use crate::cache::{SingletonTtlCache, TtlCache};
use crate::config::PipelineConfig;
use crate::entity_grounder;
use crate::error::PipelineError;
use crate::graph_client::GraphStoreClient;
use crate::intent_classifier::IntentClassifier;
use crate::llm_client::LlmClient;
use crate::metrics;
use crate::model::{IntentResult, QueryResult, Response, ResponseMetadata, SubgraphResponse, Value};
use crate::parameter_fulfiller;
use crate::preprocessor;
use crate::query_executor;
use crate::synthesizer::{self, SynthesisMode};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

const LOW_CONFIDENCE_THRESHOLD: f64 = 0.6;

pub struct Coordinator {
    config: PipelineConfig,
    graph: Arc<dyn GraphStoreClient>,
    llm: Arc<dyn LlmClient>,
    classifier: IntentClassifier,
    response_cache: TtlCache<String, Response>,
    comprehensive_cache: SingletonTtlCache<QueryResult>,
}

impl Coordinator {
    pub fn new(config: PipelineConfig, graph: Arc<dyn GraphStoreClient>, llm: Arc<dyn LlmClient>) -> Self {
        let classifier = IntentClassifier::new(
            std::time::Duration::from_secs(config.cache.classification_ttl_secs),
            config.cache.classification_capacity,
        );
        let response_cache = TtlCache::new(
            std::time::Duration::from_secs(config.cache.response_ttl_secs),
            config.cache.response_capacity,
        );
        let comprehensive_cache =
            SingletonTtlCache::new(std::time::Duration::from_secs(config.cache.comprehensive_ttl_secs));

        Self {
            config,
            graph,
            llm,
            classifier,
            response_cache,
            comprehensive_cache,
        }
    }

    /// Runs the full seven-stage pipeline for `query_text`.
    pub async fn answer(&self, query_text: &str) -> Response {
        let started = Instant::now();
        let mut timing_ms: HashMap<String, f64> = HashMap::new();

        if self.validate_input(query_text).is_err() {
            metrics::record_error("validation");
            return Response::error_envelope(query_text, elapsed_ms(started));
        }

        let stage_started = Instant::now();
        let preprocessed = preprocessor::process(query_text);
        timing_ms.insert("preprocess".to_string(), elapsed_ms(stage_started));

        let stage_started = Instant::now();
        let entities = entity_grounder::ground_entities(&preprocessed, self.graph.as_ref()).await;
        timing_ms.insert("entity_grounding".to_string(), elapsed_ms(stage_started));

        let stage_started = Instant::now();
        let intent_result = self
            .classifier
            .classify(query_text, &entities, self.llm.as_ref())
            .await;
        timing_ms.insert("intent_classification".to_string(), elapsed_ms(stage_started));

        let stage_started = Instant::now();
        let fulfillment = parameter_fulfiller::fulfill(&intent_result.intent, &entities, &self.config);
        timing_ms.insert("parameter_fulfillment".to_string(), elapsed_ms(stage_started));

        if !fulfillment.is_complete && intent_result.intent != "general_llm" {
            metrics::record_request(&intent_result.intent, false);
            return self.missing_params_response(
                query_text,
                &intent_result.intent,
                &fulfillment.missing_parameters,
                &timing_ms,
                elapsed_ms(started),
            );
        }

        let response_cache_key =
            self.response_cache_key(query_text, &intent_result.intent, &entities, &fulfillment.parameters);

        if let Some(mut cached) = self.response_cache.get(&response_cache_key) {
            cached.metadata.cache_hit = true;
            metrics::record_request(&intent_result.intent, true);
            return cached;
        }

        let low_confidence = intent_result.confidence <= LOW_CONFIDENCE_THRESHOLD;

        let stage_started = Instant::now();
        let query_result = if intent_result.intent == "general_llm" {
            Ok(general_llm_query_result())
        } else {
            self.execute_with_fallback(&intent_result.intent, &fulfillment.parameters, low_confidence)
                .await
        };
        timing_ms.insert("query_execution".to_string(), elapsed_ms(stage_started));

        let query_result = match query_result {
            Ok(result) => result,
            Err(e) => {
                metrics::record_error(error_kind(&e));
                return Response::error_envelope(query_text, elapsed_ms(started));
            }
        };

        let mode = if query_result.is_fallback {
            SynthesisMode::Comprehensive
        } else {
            SynthesisMode::Standard
        };

        let stage_started = Instant::now();
        let answer = synthesizer::synthesize(
            &intent_result.intent,
            &query_result,
            mode,
            self.llm.as_ref(),
            &self.config.whitelisted_tickers,
        )
        .await;
        timing_ms.insert("synthesis".to_string(), elapsed_ms(stage_started));

        let total_ms = elapsed_ms(started);
        timing_ms.insert("total_pipeline".to_string(), total_ms);
        metrics::record_total_latency_ms(total_ms);
        metrics::record_request(&intent_result.intent, false);

        let response = Response {
            answer,
            rows: query_result.rows,
            intent: intent_result.intent.clone(),
            query_text: query_text.to_string(),
            entities,
            metadata: ResponseMetadata {
                timing_ms,
                cache_hit: false,
                confidence: intent_result.confidence,
                node_count: query_result.node_count,
                edge_count: query_result.edge_count,
                pipeline_version: crate::PIPELINE_VERSION,
            },
        };

        self.response_cache.insert(response_cache_key, response.clone());
        metrics::set_response_cache_size(self.response_cache.len() as f64);
        response
    }

    /// Runs stages 1-4 only (preprocess, ground, classify, nothing past
    /// that), for diagnostics. Shares the coordinator's classification
    /// cache rather than standing up a throwaway classifier per call.
    pub async fn classify(&self, query_text: &str) -> IntentResult {
        let preprocessed = preprocessor::process(query_text);
        let entities = entity_grounder::ground_entities(&preprocessed, self.graph.as_ref()).await;
        self.classifier.classify(query_text, &entities, self.llm.as_ref()).await
    }

    /// Thin wrapper over the `top_holdings_subgraph` intent (§6), bypassing
    /// classification and parameter fulfilment since the caller already
    /// supplies typed parameters directly.
    pub async fn subgraph(
        &self,
        ticker: &str,
        top_n: i64,
        min_weight: f64,
    ) -> Result<SubgraphResponse, PipelineError> {
        let capped_top_n = top_n.clamp(1, self.config.max_row_limit as i64);
        let mut params: HashMap<String, Value> = HashMap::new();
        params.insert("ticker".to_string(), Value::Text(ticker.to_string()));
        params.insert("top_n".to_string(), Value::Int(capped_top_n));

        let result = query_executor::execute("top_holdings_subgraph", &params, self.graph.as_ref()).await?;
        Ok(query_executor::build_subgraph(&result.rows, min_weight))
    }

    fn validate_input(&self, query_text: &str) -> Result<(), PipelineError> {
        if query_text.trim().is_empty() {
            return Err(PipelineError::Validation("empty query".to_string()));
        }
        if query_text.len() > self.config.max_query_length {
            return Err(PipelineError::Validation("query too long".to_string()));
        }
        Ok(())
    }

    /// Runs the classified template; on zero rows, failure, incomplete
    /// parameters, or low classification confidence, falls back to the
    /// cached comprehensive dataset, matching the graceful-degradation
    /// rule in §4.6/§4.9. Never called for `general_llm`, which skips
    /// query execution entirely (§8 scenario 5).
    async fn execute_with_fallback(
        &self,
        intent: &str,
        params: &HashMap<String, Value>,
        low_confidence: bool,
    ) -> Result<QueryResult, PipelineError> {
        if low_confidence {
            return self.comprehensive_fallback().await;
        }

        match query_executor::execute(intent, params, self.graph.as_ref()).await {
            Ok(result) if !result.rows.is_empty() => Ok(result),
            Ok(_) => self.comprehensive_fallback().await,
            Err(PipelineError::Security(_)) => self.comprehensive_fallback().await,
            Err(e @ PipelineError::ExecutionTransient(_)) => {
                tracing::warn!(error = %e, "query execution failed transiently, falling back");
                self.comprehensive_fallback().await
            }
            Err(e) => Err(e),
        }
    }

    async fn comprehensive_fallback(&self) -> Result<QueryResult, PipelineError> {
        if let Some(cached) = self.comprehensive_cache.get() {
            let mut result = cached;
            result.is_fallback = true;
            return Ok(result);
        }

        let params = HashMap::new();
        let mut result = query_executor::execute("comprehensive_data", &params, self.graph.as_ref()).await?;
        self.comprehensive_cache.set(result.clone());
        result.is_fallback = true;
        Ok(result)
    }

    fn missing_params_response(
        &self,
        query_text: &str,
        intent: &str,
        missing: &[String],
        timing_ms: &HashMap<String, f64>,
        total_ms: f64,
    ) -> Response {
        let hints = join_with_oxford_and(
            &missing
                .iter()
                .map(|param| missing_param_hint(param, &self.config))
                .collect::<Vec<_>>(),
        );
        let mut timing_ms = timing_ms.clone();
        timing_ms.insert("total_pipeline".to_string(), total_ms);
        Response {
            answer: format!("To complete your query, I need additional information: {hints}"),
            rows: Vec::new(),
            intent: intent.to_string(),
            query_text: query_text.to_string(),
            entities: Vec::new(),
            metadata: ResponseMetadata {
                timing_ms,
                cache_hit: false,
                confidence: 0.0,
                node_count: None,
                edge_count: None,
                pipeline_version: crate::PIPELINE_VERSION,
            },
        }
    }

    /// `MD5("query:" + normalised + "|intent:" + intent + "|entities:" +
    /// sorted "type:name" + "|params:" + sorted "key=value")`, computed
    /// only after classification/grounding/fulfilment have all run, per
    /// §4.8/§4.9.
    fn response_cache_key(
        &self,
        query_text: &str,
        intent: &str,
        entities: &[crate::model::GroundedEntity],
        params: &HashMap<String, Value>,
    ) -> String {
        let normalized = query_text.to_lowercase().trim().to_string();

        let mut entity_parts: Vec<String> = entities
            .iter()
            .map(|e| format!("{}:{}", e.entity_type.as_str(), e.name))
            .collect();
        entity_parts.sort_unstable();

        let mut param_parts: Vec<String> = params.iter().map(|(k, v)| format!("{k}={v}")).collect();
        param_parts.sort_unstable();

        let raw = format!(
            "query:{normalized}|intent:{intent}|entities:{}|params:{}",
            entity_parts.join(","),
            param_parts.join(",")
        );
        format!("{:x}", md5::compute(raw.as_bytes()))
    }

    pub fn clear_response_cache(&self) {
        self.response_cache.clear();
    }
}

fn elapsed_ms(started: Instant) -> f64 {
    started.elapsed().as_secs_f64() * 1000.0
}

/// A `general_llm` query touches neither the template catalogue nor the
/// graph client: this stands in for the executor's output so synthesis
/// and response assembly can proceed through the normal code path with
/// an always-empty, never-fallback result.
fn general_llm_query_result() -> QueryResult {
    QueryResult {
        query_text: String::new(),
        parameters: HashMap::new(),
        rows: Vec::new(),
        execution_time_ms: 0.0,
        node_count: None,
        edge_count: None,
        is_fallback: false,
    }
}

fn error_kind(e: &PipelineError) -> &'static str {
    match e {
        PipelineError::Validation(_) => "validation",
        PipelineError::Security(_) => "security",
        PipelineError::ExecutionTransient(_) => "execution_transient",
        PipelineError::SynthesisFailure(_) => "synthesis_failure",
        PipelineError::Fatal(_) => "fatal",
    }
}

/// Parameter name -> human-readable hint, matching `_generate_missing_params_message`.
/// The ticker hint enumerates `config.whitelisted_tickers` rather than naming
/// a couple of examples.
fn missing_param_hint(param: &str, config: &PipelineConfig) -> String {
    match param {
        "ticker" | "ticker1" | "ticker2" => format!(
            "please specify an ETF ticker ({})",
            config.whitelisted_tickers.join(", ")
        ),
        "symbol" => "please include a company ticker symbol, like AAPL".to_string(),
        "sector" => "please name a sector, like Technology or Healthcare".to_string(),
        "threshold" => "please include a minimum exposure percentage".to_string(),
        "top_n" => "please say how many holdings to show".to_string(),
        _ => "please include more detail in your question".to_string(),
    }
}

/// Joins hints into a single sentence fragment with a trailing Oxford "and",
/// matching `_generate_missing_params_message`'s join of all hints rather
/// than just the first missing parameter.
fn join_with_oxford_and(hints: &[String]) -> String {
    match hints {
        [] => "please include more detail in your question".to_string(),
        [only] => only.clone(),
        [first, second] => format!("{first}, and {second}"),
        _ => {
            let (last, rest) = hints.split_last().unwrap();
            format!("{}, and {last}", rest.join(", "))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity_grounder::GraphLookup;
    use crate::graph_client::GraphError;
    use crate::llm_client::LlmError;
    use crate::model::Row;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct MockGraph {
        etf_rows: Vec<Row>,
        comprehensive_rows: Vec<Row>,
        calls: Mutex<usize>,
    }

    #[async_trait]
    impl GraphLookup for MockGraph {
        async fn lookup_etf(&self, ticker: &str) -> Option<String> {
            (ticker == "SPY").then(|| "SPDR S&P 500".to_string())
        }
        async fn lookup_company(&self, _symbol: &str) -> Option<String> {
            None
        }
        async fn lookup_sector(&self, _name: &str) -> Option<String> {
            None
        }
        async fn lookup_sector_alias(&self, _token: &str) -> Option<String> {
            None
        }
    }

    #[async_trait]
    impl GraphStoreClient for MockGraph {
        async fn execute(
            &self,
            query_text: &str,
            _params: &HashMap<String, Value>,
        ) -> Result<Vec<Row>, GraphError> {
            *self.calls.lock().unwrap() += 1;
            if query_text.contains("comprehensive") || query_text.contains("total_holdings") {
                Ok(self.comprehensive_rows.clone())
            } else {
                Ok(self.etf_rows.clone())
            }
        }
    }

    struct StubLlm;

    #[async_trait]
    impl LlmClient for StubLlm {
        async fn complete(&self, _prompt: &str) -> Result<String, LlmError> {
            Err(LlmError::Unavailable("no llm in tests".to_string()))
        }
    }

    fn holdings_row() -> Row {
        let mut row = HashMap::new();
        row.insert("sector".to_string(), Value::Text("Technology".to_string()));
        row.insert("exposure_percent".to_string(), Value::Float(28.4));
        row
    }

    fn build_coordinator(etf_rows: Vec<Row>, comprehensive_rows: Vec<Row>) -> Coordinator {
        let graph = Arc::new(MockGraph {
            etf_rows,
            comprehensive_rows,
            calls: Mutex::new(0),
        });
        Coordinator::new(PipelineConfig::default(), graph, Arc::new(StubLlm))
    }

    #[tokio::test]
    async fn empty_query_returns_error_envelope() {
        let coordinator = build_coordinator(vec![holdings_row()], vec![]);
        let response = coordinator.answer("").await;
        assert_eq!(response.intent, "error");
    }

    #[tokio::test]
    async fn sector_exposure_query_returns_non_error_response() {
        let coordinator = build_coordinator(vec![holdings_row()], vec![]);
        let response = coordinator.answer("sector exposure of SPY").await;
        assert_ne!(response.intent, "error");
        assert_eq!(response.intent, "sector_exposure");
    }

    #[tokio::test]
    async fn identical_query_hits_response_cache_second_time() {
        let coordinator = build_coordinator(vec![holdings_row()], vec![]);
        let first = coordinator.answer("sector exposure of SPY").await;
        let second = coordinator.answer("sector exposure of SPY").await;
        assert!(!first.metadata.cache_hit);
        assert!(second.metadata.cache_hit);
    }

    #[tokio::test]
    async fn zero_rows_falls_back_to_comprehensive_dataset() {
        let coordinator = build_coordinator(vec![], vec![holdings_row()]);
        let response = coordinator.answer("sector exposure of SPY").await;
        assert!(!response.rows.is_empty());
    }

    #[tokio::test]
    async fn general_llm_query_never_touches_the_graph_client() {
        let graph = Arc::new(MockGraph {
            etf_rows: vec![holdings_row()],
            comprehensive_rows: vec![holdings_row()],
            calls: Mutex::new(0),
        });
        let coordinator = Coordinator::new(PipelineConfig::default(), graph.clone(), Arc::new(StubLlm));
        let response = coordinator.answer("what is the time in Tokyo").await;
        assert_eq!(response.intent, "general_llm");
        assert!(response.rows.is_empty());
        assert_eq!(*graph.calls.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn classify_reuses_the_coordinators_classification_cache() {
        let coordinator = build_coordinator(vec![holdings_row()], vec![]);
        let first = coordinator.classify("sector exposure of SPY").await;
        let second = coordinator.classify("sector exposure of SPY").await;
        assert_eq!(first.intent, second.intent);
    }

    #[tokio::test]
    async fn subgraph_caps_top_n_and_returns_nodes_and_edges() {
        let mut row = HashMap::new();
        row.insert("e".to_string(), Value::Text("SPY".to_string()));
        row.insert("c".to_string(), Value::Text("AAPL".to_string()));
        row.insert("s".to_string(), Value::Text("Technology".to_string()));
        row.insert("h".to_string(), Value::Float(0.05));
        let coordinator = build_coordinator(vec![row], vec![]);
        let result = coordinator.subgraph("SPY", 9999, 0.0).await.unwrap();
        assert!(!result.nodes.is_empty());
        assert!(!result.edges.is_empty());
    }

    #[tokio::test]
    async fn clear_response_cache_forces_recompute() {
        let coordinator = build_coordinator(vec![holdings_row()], vec![]);
        let _ = coordinator.answer("sector exposure of SPY").await;
        coordinator.clear_response_cache();
        let response = coordinator.answer("sector exposure of SPY").await;
        assert!(!response.metadata.cache_hit);
    }
}
