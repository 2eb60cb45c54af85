//! The graph store collaborator, grounded on `analyze/ai_adapter.rs`'s
//! provider-trait split. `GraphStoreClient` extends the grounder's
//! `GraphLookup` so one implementation (real or mock) backs both entity
//! grounding and query execution.

use crate::entity_grounder::GraphLookup;
use crate::model::{Row, Value};
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

#[derive(Debug)]
pub enum GraphError {
    Unavailable(String),
    Timeout,
    Malformed(String),
}

impl fmt::Display for GraphError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GraphError::Unavailable(msg) => write!(f, "graph store unavailable: {msg}"),
            GraphError::Timeout => write!(f, "graph query timed out"),
            GraphError::Malformed(msg) => write!(f, "malformed graph response: {msg}"),
        }
    }
}

impl std::error::Error for GraphError {}

#[async_trait]
pub trait GraphStoreClient: GraphLookup {
    /// Executes a parameter-bound Cypher query. Implementations MUST NOT
    /// interpolate `params` into `query_text` themselves — the driver binds
    /// them, preserving the guarantee the Query Executor relies on.
    async fn execute(
        &self,
        query_text: &str,
        params: &HashMap<String, Value>,
    ) -> Result<Vec<Row>, GraphError>;
}

/// Talks to a Bolt-speaking graph store over HTTP (a transaction-endpoint
/// proxy), matching the teacher's reqwest-with-timeout request shape.
pub struct HttpGraphClient {
    client: reqwest::Client,
    endpoint: String,
    username: String,
    password: String,
}

impl HttpGraphClient {
    pub fn new(
        endpoint: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .unwrap_or_default(),
            endpoint: endpoint.into(),
            username: username.into(),
            password: password.into(),
        }
    }
}

#[async_trait]
impl GraphLookup for HttpGraphClient {
    async fn lookup_etf(&self, ticker: &str) -> Option<String> {
        let rows = self
            .execute(
                "MATCH (e:ETF {ticker: $ticker}) RETURN e.name as name LIMIT 1",
                &HashMap::from([("ticker".to_string(), Value::Text(ticker.to_string()))]),
            )
            .await
            .ok()?;
        rows.first()?.get("name")?.as_str().map(str::to_string)
    }

    async fn lookup_company(&self, symbol: &str) -> Option<String> {
        let rows = self
            .execute(
                "MATCH (c:Company {symbol: $symbol}) RETURN c.name as name LIMIT 1",
                &HashMap::from([("symbol".to_string(), Value::Text(symbol.to_string()))]),
            )
            .await
            .ok()?;
        rows.first()?.get("name")?.as_str().map(str::to_string)
    }

    async fn lookup_sector(&self, name: &str) -> Option<String> {
        let rows = self
            .execute(
                "MATCH (s:Sector) WHERE toLower(s.name) = $name RETURN s.name as name LIMIT 1",
                &HashMap::from([("name".to_string(), Value::Text(name.to_string()))]),
            )
            .await
            .ok()?;
        rows.first()?.get("name")?.as_str().map(str::to_string)
    }

    async fn lookup_sector_alias(&self, token: &str) -> Option<String> {
        let rows = self
            .execute(
                "MATCH (t:Term {normalized: $token})-[:ALIAS_OF]->(:Entity)-[:REFERS_TO]->(s:Sector) RETURN s.name as name LIMIT 1",
                &HashMap::from([("token".to_string(), Value::Text(token.to_string()))]),
            )
            .await
            .ok()?;
        rows.first()?.get("name")?.as_str().map(str::to_string)
    }
}

#[async_trait]
impl GraphStoreClient for HttpGraphClient {
    async fn execute(
        &self,
        query_text: &str,
        params: &HashMap<String, Value>,
    ) -> Result<Vec<Row>, GraphError> {
        let resp = self
            .client
            .post(&self.endpoint)
            .basic_auth(&self.username, Some(&self.password))
            .json(&serde_json::json!({ "query": query_text, "params": params }))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    GraphError::Timeout
                } else {
                    GraphError::Unavailable(e.to_string())
                }
            })?;

        let rows: Vec<Row> = resp
            .json()
            .await
            .map_err(|e| GraphError::Malformed(e.to_string()))?;

        Ok(rows)
    }
}
