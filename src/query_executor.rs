//! Query Executor (§4.6): security-validates a template fresh at call
//! time, binds parameters, executes against the graph store, and times the
//! round trip. Grounded on `cypher_executor.py`'s `execute`/
//! `_validate_template_security`.

use crate::error::PipelineError;
use crate::graph_client::{GraphError, GraphStoreClient};
use crate::model::{QueryResult, Row, SubgraphEdge, SubgraphNode, SubgraphResponse, Value};
use crate::templates::{self, Template};
use std::collections::HashMap;
use std::time::Instant;

pub async fn execute(
    intent: &str,
    params: &HashMap<String, Value>,
    graph: &dyn GraphStoreClient,
) -> Result<QueryResult, PipelineError> {
    let template = templates::get(intent)
        .ok_or_else(|| PipelineError::Validation(format!("unknown intent: {intent}")))?;

    validate_security(template)?;

    let missing = template.validate_params(params);
    if !missing.is_empty() {
        return Err(PipelineError::Validation(format!(
            "missing parameters: {}",
            missing.join(", ")
        )));
    }

    let started = Instant::now();
    let rows = graph
        .execute(template.query_text, params)
        .await
        .map_err(map_graph_error)?;
    let execution_time_ms = started.elapsed().as_secs_f64() * 1000.0;

    let (node_count, edge_count) = if intent == "top_holdings_subgraph" {
        count_subgraph(&rows)
    } else {
        (None, None)
    };

    Ok(QueryResult {
        query_text: template.query_text.to_string(),
        parameters: params.clone(),
        rows,
        execution_time_ms,
        node_count,
        edge_count,
        is_fallback: false,
    })
}

/// Re-checked on every call, never cached from registration, so a template
/// tampered with after catalogue construction can't slip a write or a
/// denylisted procedure through. `general_llm`'s query text is empty and
/// therefore always fails the LIMIT check below — by design, the
/// coordinator never routes that intent through here at all.
fn validate_security(template: &Template) -> Result<(), PipelineError> {
    if !template.has_limit() {
        tracing::warn!(intent = template.intent_key, "template missing LIMIT clause");
        return Err(PipelineError::Security("template failed security validation".to_string()));
    }
    if !template.is_read_only() {
        tracing::warn!(intent = template.intent_key, "template contains a write keyword");
        return Err(PipelineError::Security("template failed security validation".to_string()));
    }
    if let Some(pattern) = template.dangerous_pattern() {
        tracing::warn!(intent = template.intent_key, pattern, "template matched denylist");
        return Err(PipelineError::Security("template failed security validation".to_string()));
    }
    Ok(())
}

fn map_graph_error(err: GraphError) -> PipelineError {
    match err {
        GraphError::Timeout | GraphError::Unavailable(_) => {
            PipelineError::ExecutionTransient(err.to_string())
        }
        GraphError::Malformed(_) => PipelineError::Fatal(err.to_string()),
    }
}

/// Accumulates unique `ETF:`/`Company:`/`Sector:` node identifiers across
/// every row (not just the first) and counts rows carrying a `h` edge key,
/// matching `_count_graph_elements`'s per-row set accumulation.
fn count_subgraph(rows: &[crate::model::Row]) -> (Option<usize>, Option<usize>) {
    if rows.is_empty() {
        return (None, None);
    }
    let mut nodes: std::collections::HashSet<String> = std::collections::HashSet::new();
    let mut edges = 0usize;
    for row in rows {
        if let Some(v) = row.get("e").and_then(|v| v.as_str()) {
            nodes.insert(format!("ETF:{v}"));
        }
        if let Some(v) = row.get("c").and_then(|v| v.as_str()) {
            nodes.insert(format!("Company:{v}"));
        }
        if let Some(v) = row.get("s").and_then(|v| v.as_str()) {
            nodes.insert(format!("Sector:{v}"));
        }
        if row.contains_key("h") {
            edges += 1;
        }
    }
    (Some(nodes.len()), Some(edges))
}

/// Materialises `top_holdings_subgraph` rows into the `{nodes, edges}` shape
/// the `subgraph()` core surface operation returns, reusing the same
/// `e`/`c`/`s`/`h` column convention as [`count_subgraph`]. `min_weight` is
/// applied against the `exposure_percent` column when present, since the
/// template's flat rows carry that field even when they lack `h`.
pub fn build_subgraph(rows: &[Row], min_weight: f64) -> SubgraphResponse {
    let mut nodes: Vec<SubgraphNode> = Vec::new();
    let mut seen: std::collections::HashSet<String> = std::collections::HashSet::new();
    let mut edges = Vec::new();
    let mut etf_id = None;

    for row in rows {
        let passes_weight = row
            .get("exposure_percent")
            .and_then(Value::as_f64)
            .map(|pct| pct / 100.0 >= min_weight)
            .unwrap_or(true);
        if !passes_weight {
            continue;
        }

        let mut push_node = |id: String, kind: &'static str, label: String| {
            if seen.insert(id.clone()) {
                nodes.push(SubgraphNode { id, kind, label });
            }
        };

        let mut company_id = None;
        if let Some(v) = row.get("e").and_then(|v| v.as_str()) {
            let id = format!("ETF:{v}");
            push_node(id.clone(), "ETF", v.to_string());
            etf_id = Some(id);
        }
        if let Some(v) = row.get("c").and_then(|v| v.as_str()) {
            let id = format!("Company:{v}");
            push_node(id.clone(), "Company", v.to_string());
            company_id = Some(id);
        }
        if let Some(v) = row.get("s").and_then(|v| v.as_str()) {
            push_node(format!("Sector:{v}"), "Sector", v.to_string());
        }
        if row.contains_key("h") {
            if let (Some(from), Some(to)) = (etf_id.clone(), company_id) {
                edges.push(SubgraphEdge { from, to });
            }
        }
    }

    SubgraphResponse { nodes, edges }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity_grounder::GraphLookup;
    use async_trait::async_trait;

    struct MockGraph {
        rows: Vec<crate::model::Row>,
    }

    #[async_trait]
    impl GraphLookup for MockGraph {
        async fn lookup_etf(&self, _ticker: &str) -> Option<String> {
            None
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
            _query_text: &str,
            _params: &HashMap<String, Value>,
        ) -> Result<Vec<crate::model::Row>, GraphError> {
            Ok(self.rows.clone())
        }
    }

    #[tokio::test]
    async fn missing_required_parameter_is_validation_error() {
        let graph = MockGraph { rows: vec![] };
        let params = HashMap::new();
        let result = execute("etf_exposure_to_company", &params, &graph).await;
        assert!(matches!(result, Err(PipelineError::Validation(_))));
    }

    #[tokio::test]
    async fn unknown_intent_is_validation_error() {
        let graph = MockGraph { rows: vec![] };
        let params = HashMap::new();
        let result = execute("not_a_real_intent", &params, &graph).await;
        assert!(matches!(result, Err(PipelineError::Validation(_))));
    }

    #[tokio::test]
    async fn general_llm_template_fails_security_validation_if_ever_executed() {
        // The coordinator never calls execute() for general_llm; this
        // confirms the executor itself stays fail-closed if it ever did.
        let graph = MockGraph { rows: vec![] };
        let params = HashMap::new();
        let result = execute("general_llm", &params, &graph).await;
        assert!(matches!(result, Err(PipelineError::Security(_))));
    }

    #[tokio::test]
    async fn top_holdings_subgraph_counts_nodes_and_edges() {
        let mut row = HashMap::new();
        row.insert("e".to_string(), Value::Text("SPY".to_string()));
        row.insert("c".to_string(), Value::Text("AAPL".to_string()));
        row.insert("s".to_string(), Value::Text("Technology".to_string()));
        row.insert("h".to_string(), Value::Float(0.05));
        let graph = MockGraph { rows: vec![row] };
        let mut params = HashMap::new();
        params.insert("ticker".to_string(), Value::Text("SPY".to_string()));
        params.insert("top_n".to_string(), Value::Int(10));
        let result = execute("top_holdings_subgraph", &params, &graph).await.unwrap();
        assert_eq!(result.node_count, Some(3));
        assert_eq!(result.edge_count, Some(1));
    }

    #[tokio::test]
    async fn top_holdings_subgraph_dedupes_nodes_shared_across_rows() {
        let mut row_a = HashMap::new();
        row_a.insert("e".to_string(), Value::Text("SPY".to_string()));
        row_a.insert("c".to_string(), Value::Text("AAPL".to_string()));
        row_a.insert("h".to_string(), Value::Float(0.05));
        let mut row_b = HashMap::new();
        row_b.insert("e".to_string(), Value::Text("SPY".to_string()));
        row_b.insert("c".to_string(), Value::Text("MSFT".to_string()));
        row_b.insert("h".to_string(), Value::Float(0.04));
        let graph = MockGraph { rows: vec![row_a, row_b] };
        let mut params = HashMap::new();
        params.insert("ticker".to_string(), Value::Text("SPY".to_string()));
        params.insert("top_n".to_string(), Value::Int(10));
        let result = execute("top_holdings_subgraph", &params, &graph).await.unwrap();
        assert_eq!(result.node_count, Some(3));
        assert_eq!(result.edge_count, Some(2));
    }

    #[test]
    fn build_subgraph_dedupes_nodes_and_links_etf_to_company() {
        let mut row = HashMap::new();
        row.insert("e".to_string(), Value::Text("SPY".to_string()));
        row.insert("c".to_string(), Value::Text("AAPL".to_string()));
        row.insert("s".to_string(), Value::Text("Technology".to_string()));
        row.insert("h".to_string(), Value::Float(0.05));
        let subgraph = build_subgraph(&[row], 0.0);
        assert_eq!(subgraph.nodes.len(), 3);
        assert_eq!(subgraph.edges.len(), 1);
        assert_eq!(subgraph.edges[0].from, "ETF:SPY");
        assert_eq!(subgraph.edges[0].to, "Company:AAPL");
    }

    #[test]
    fn build_subgraph_filters_rows_below_min_weight() {
        let mut row = HashMap::new();
        row.insert("e".to_string(), Value::Text("SPY".to_string()));
        row.insert("c".to_string(), Value::Text("AAPL".to_string()));
        row.insert("h".to_string(), Value::Float(0.01));
        row.insert("exposure_percent".to_string(), Value::Float(1.0));
        let subgraph = build_subgraph(&[row], 0.5);
        assert!(subgraph.nodes.is_empty());
        assert!(subgraph.edges.is_empty());
    }
}
