//! Pipeline configuration: TOML file + environment-variable overrides.
//!
//! Follows the `ENV`-sentinel convention from `config/ai.rs` in the
//! codebase this crate grew out of: a secret field whose TOML value is the
//! literal string `"ENV"` is resolved from an environment variable instead
//! of being stored in the file.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
    pub endpoint: String,
    pub username: String,
    pub password: String,
    pub timeout_secs: u64,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            endpoint: "bolt://localhost:7687".to_string(),
            username: "neo4j".to_string(),
            password: "ENV".to_string(),
            timeout_secs: 30,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub endpoint: String,
    pub model: String,
    pub api_key: String,
    pub temperature: f64,
    pub max_tokens: u32,
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:11434/api/generate".to_string(),
            model: "llama3".to_string(),
            api_key: "ENV".to_string(),
            temperature: 0.2,
            max_tokens: 500,
            timeout_secs: 30,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub response_ttl_secs: u64,
    pub response_capacity: usize,
    pub classification_ttl_secs: u64,
    pub classification_capacity: usize,
    pub comprehensive_ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            response_ttl_secs: 5 * 3600,
            response_capacity: 100,
            classification_ttl_secs: 3600,
            classification_capacity: 100,
            comprehensive_ttl_secs: 10 * 3600,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub whitelisted_tickers: Vec<String>,
    pub max_query_length: usize,
    pub max_row_limit: usize,
    pub graph: GraphConfig,
    pub llm: LlmConfig,
    pub cache: CacheConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            whitelisted_tickers: vec![
                "SPY".to_string(),
                "QQQ".to_string(),
                "IWM".to_string(),
                "IJH".to_string(),
                "IVE".to_string(),
                "IVW".to_string(),
            ],
            max_query_length: 512,
            max_row_limit: 50,
            graph: GraphConfig::default(),
            llm: LlmConfig::default(),
            cache: CacheConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Load from a TOML file, falling back to defaults on any read/parse
    /// error (mirrors `source_weights::load_from_file`'s
    /// fall-back-to-baked-in-default behaviour).
    pub fn load_from_file(path: &Path) -> Self {
        match fs::read_to_string(path) {
            Ok(contents) => match toml::from_str::<PipelineConfig>(&contents) {
                Ok(mut cfg) => {
                    cfg.resolve_env_secrets();
                    cfg
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "failed to parse config file, using defaults");
                    Self::default()
                }
            },
            Err(e) => {
                tracing::info!(path = %path.display(), error = %e, "config file not found, using defaults");
                Self::default()
            }
        }
    }

    /// Resolve any field holding the literal sentinel `"ENV"` from the
    /// corresponding environment variable.
    fn resolve_env_secrets(&mut self) {
        if self.graph.password == "ENV" {
            self.graph.password = std::env::var("GRAPH_PASSWORD").unwrap_or_default();
        }
        if self.llm.api_key == "ENV" {
            self.llm.api_key = std::env::var("LLM_API_KEY")
                .or_else(|_| std::env::var("OPENAI_API_KEY"))
                .unwrap_or_default();
        }
    }

    pub fn is_whitelisted(&self, ticker: &str) -> bool {
        self.whitelisted_tickers.iter().any(|t| t == ticker)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_whitelists_six_tickers() {
        let cfg = PipelineConfig::default();
        assert_eq!(cfg.whitelisted_tickers.len(), 6);
        assert!(cfg.is_whitelisted("SPY"));
        assert!(!cfg.is_whitelisted("TSLA"));
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let cfg = PipelineConfig::load_from_file(Path::new("/nonexistent/path/config.toml"));
        assert_eq!(cfg.max_query_length, 512);
    }
}
