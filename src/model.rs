//! Core in-memory types shared across pipeline stages.

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;

/// A JSON-ish scalar used for template parameters and entity properties.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    List(Vec<Value>),
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Float(f) => Some(*f as i64),
            _ => None,
        }
    }
}

impl fmt_helper::Display for Value {
    fn fmt(&self, f: &mut fmt_helper::Formatter<'_>) -> fmt_helper::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(n) => write!(f, "{n}"),
            Value::Text(s) => write!(f, "{s}"),
            Value::List(items) => {
                let parts: Vec<String> = items.iter().map(|v| v.to_string()).collect();
                write!(f, "[{}]", parts.join(","))
            }
        }
    }
}

mod fmt_helper {
    pub use std::fmt::{Display, Formatter, Result};
}

/// A row returned by the graph store: column alias -> value.
pub type Row = HashMap<String, Value>;

/// Output of the Preprocessor stage (§4.2).
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PreprocessedText {
    pub original_text: String,
    pub normalized_text: String,
    pub tokens: Vec<String>,
    pub potential_tickers: Vec<String>,
    pub percentages: Vec<f64>,
    pub decimals: Vec<f64>,
    pub counts: Vec<i64>,
    pub thresholds: Vec<f64>,
}

/// The typed category a surface form was grounded to.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum EntityType {
    #[serde(rename = "ETF")]
    Etf,
    Company,
    Sector,
    Percent,
    Count,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Etf => "ETF",
            EntityType::Company => "Company",
            EntityType::Sector => "Sector",
            EntityType::Percent => "Percent",
            EntityType::Count => "Count",
        }
    }
}

/// A surface form resolved to a typed graph entity with a confidence score.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GroundedEntity {
    pub name: String,
    #[serde(rename = "type")]
    pub entity_type: EntityType,
    pub confidence: f64,
    #[serde(default)]
    pub properties: HashMap<String, Value>,
}

impl GroundedEntity {
    pub fn new(name: impl Into<String>, entity_type: EntityType, confidence: f64) -> Self {
        Self {
            name: name.into(),
            entity_type,
            confidence,
            properties: HashMap::new(),
        }
    }

    pub fn with_property(mut self, key: impl Into<String>, value: Value) -> Self {
        self.properties.insert(key.into(), value);
        self
    }
}

/// Output of the Intent Classifier stage (§4.4).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IntentResult {
    pub intent: String,
    pub confidence: f64,
    pub entities: Vec<GroundedEntity>,
    pub required_parameters: Vec<String>,
}

/// Output of the Parameter Fulfiller stage (§4.5).
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ParameterFulfillment {
    pub parameters: HashMap<String, Value>,
    pub missing_parameters: Vec<String>,
    pub is_complete: bool,
}

/// Output of the Query Executor stage (§4.6).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct QueryResult {
    pub query_text: String,
    pub parameters: HashMap<String, Value>,
    pub rows: Vec<Row>,
    pub execution_time_ms: f64,
    pub node_count: Option<usize>,
    pub edge_count: Option<usize>,
    #[serde(default)]
    pub is_fallback: bool,
}

/// Per-request diagnostic metadata attached to a `Response`.
#[derive(Clone, Debug, Default, Serialize)]
pub struct ResponseMetadata {
    pub timing_ms: HashMap<String, f64>,
    pub cache_hit: bool,
    pub confidence: f64,
    pub node_count: Option<usize>,
    pub edge_count: Option<usize>,
    pub pipeline_version: &'static str,
}

// `pipeline_version` is `&'static str`, which serde's `#[derive(Deserialize)]`
// cannot support directly (the derive requires the generated impl's `'de` to
// outlive `'static`, which then cannot be proven when this type is nested
// inside another `#[derive(Deserialize)]` type such as `Response`). Deserialize
// through a shadow type with an owned `String` field instead, leaking it to
// obtain the `&'static str`.
#[derive(Deserialize)]
struct ResponseMetadataShadow {
    timing_ms: HashMap<String, f64>,
    cache_hit: bool,
    confidence: f64,
    node_count: Option<usize>,
    edge_count: Option<usize>,
    pipeline_version: String,
}

impl From<ResponseMetadataShadow> for ResponseMetadata {
    fn from(s: ResponseMetadataShadow) -> Self {
        ResponseMetadata {
            timing_ms: s.timing_ms,
            cache_hit: s.cache_hit,
            confidence: s.confidence,
            node_count: s.node_count,
            edge_count: s.edge_count,
            pipeline_version: Box::leak(s.pipeline_version.into_boxed_str()),
        }
    }
}

impl<'de> Deserialize<'de> for ResponseMetadata {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        ResponseMetadataShadow::deserialize(deserializer).map(ResponseMetadata::from)
    }
}

/// A node surfaced by the `subgraph()` wrapper, identified the same way
/// `_count_graph_elements` identifies graph elements (`"ETF:SPY"`, etc).
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct SubgraphNode {
    pub id: String,
    pub kind: &'static str,
    pub label: String,
}

// See the note on `ResponseMetadataShadow` above: `kind` is `&'static str`,
// so `SubgraphNode` is deserialized through an owned-`String` shadow type.
#[derive(Deserialize)]
struct SubgraphNodeShadow {
    id: String,
    kind: String,
    label: String,
}

impl From<SubgraphNodeShadow> for SubgraphNode {
    fn from(s: SubgraphNodeShadow) -> Self {
        SubgraphNode {
            id: s.id,
            kind: Box::leak(s.kind.into_boxed_str()),
            label: s.label,
        }
    }
}

impl<'de> Deserialize<'de> for SubgraphNode {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        SubgraphNodeShadow::deserialize(deserializer).map(SubgraphNode::from)
    }
}

/// A `HOLDS`-style edge between an ETF and a company in the subgraph wrapper.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SubgraphEdge {
    pub from: String,
    pub to: String,
}

/// Output of the `subgraph()` core surface operation (§6).
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SubgraphResponse {
    pub nodes: Vec<SubgraphNode>,
    pub edges: Vec<SubgraphEdge>,
}

/// The final assembled answer returned by `answer()`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Response {
    pub answer: String,
    pub rows: Vec<Row>,
    pub intent: String,
    pub query_text: String,
    pub entities: Vec<GroundedEntity>,
    pub metadata: ResponseMetadata,
}

impl Response {
    pub fn error_envelope(query_text: &str, total_time_ms: f64) -> Self {
        let mut timing_ms = HashMap::new();
        timing_ms.insert("total_pipeline".to_string(), total_time_ms);
        Response {
            answer: "Sorry, I encountered an error processing your query. Please try rephrasing your question or check that you're using valid ETF tickers and company symbols.".to_string(),
            rows: Vec::new(),
            intent: "error".to_string(),
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
}
