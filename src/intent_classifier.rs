//! Intent Classifier (§4.4): two-stage rule/LLM hybrid with an MD5-keyed
//! cache and an entity-consistency predicate, grounded on
//! `intent_classifier.py`'s `_fallback_classification` priority ladder and
//! `_validate_intent_entity_match` predicate.

use crate::cache::TtlCache;
use crate::llm_client::LlmClient;
use crate::model::{EntityType, GroundedEntity, IntentResult};
use crate::templates;
use std::time::Duration;

/// Counts of grounded entities by type, used by both the consistency
/// predicate and the rule-based fallback ladder.
struct EntityCounts {
    etf_count: usize,
    company_count: usize,
    sector_count: usize,
    has_percentage: bool,
    has_count: bool,
}

impl EntityCounts {
    fn from(entities: &[GroundedEntity]) -> Self {
        Self {
            etf_count: entities.iter().filter(|e| e.entity_type == EntityType::Etf).count(),
            company_count: entities
                .iter()
                .filter(|e| e.entity_type == EntityType::Company)
                .count(),
            sector_count: entities
                .iter()
                .filter(|e| e.entity_type == EntityType::Sector)
                .count(),
            has_percentage: entities.iter().any(|e| e.entity_type == EntityType::Percent),
            has_count: entities.iter().any(|e| e.entity_type == EntityType::Count),
        }
    }
}

pub struct IntentClassifier {
    cache: TtlCache<String, IntentResult>,
}

impl IntentClassifier {
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            cache: TtlCache::new(ttl, capacity),
        }
    }

    /// Classifies `query` given its already-grounded `entities`. Tries the
    /// LLM first; falls back to the rule ladder on any LLM failure, a
    /// malformed response, or a classification inconsistent with the
    /// grounded entities.
    pub async fn classify(
        &self,
        query: &str,
        entities: &[GroundedEntity],
        llm: &dyn LlmClient,
    ) -> IntentResult {
        let cache_key = Self::cache_key(query, entities);
        if let Some(cached) = self.cache.get(&cache_key) {
            return cached;
        }

        let counts = EntityCounts::from(entities);
        let result = if let Some(forced) = jaccard_keyword_override(query, &counts, entities) {
            forced
        } else {
            match self.classify_with_llm(query, entities, llm).await {
                Some(result) if is_consistent(&result.intent, &counts, query) => result,
                _ => fallback_classification(query, entities),
            }
        };

        self.cache.insert(cache_key, result.clone());
        result
    }

    async fn classify_with_llm(
        &self,
        query: &str,
        entities: &[GroundedEntity],
        llm: &dyn LlmClient,
    ) -> Option<IntentResult> {
        let prompt = build_classification_prompt(query, entities);
        let raw = llm.complete(&prompt).await.ok()?;
        parse_classification_response(&raw, entities)
    }

    /// `MD5("{lowercased_trimmed_query}|{sorted entity names}")`, matching
    /// `_get_cache_key` exactly so identical queries across equivalent
    /// entity sets share one cache entry.
    fn cache_key(query: &str, entities: &[GroundedEntity]) -> String {
        let mut names: Vec<&str> = entities.iter().map(|e| e.name.as_str()).collect();
        names.sort_unstable();
        let raw = format!("{}|{}", query.to_lowercase().trim(), names.join(","));
        format!("{:x}", md5::compute(raw.as_bytes()))
    }

}

fn build_classification_prompt(query: &str, entities: &[GroundedEntity]) -> String {
    let entity_summary: Vec<String> = entities
        .iter()
        .map(|e| format!("{} ({})", e.name, e.entity_type.as_str()))
        .collect();
    format!(
        "Classify the user's question into exactly one of the following intents: \
        etf_exposure_to_company, etf_overlap_weighted, etf_overlap_jaccard, sector_exposure, \
        etfs_by_sector_threshold, top_holdings_subgraph, company_rankings, general_llm. \
        Respond with a JSON object: {{\"intent\": \"...\", \"confidence\": 0.0}}.\n\
        Question: {query}\nGrounded entities: {}",
        entity_summary.join(", ")
    )
}

/// Mirrors `_parse_classification_response`: finds the first `{`..last `}`
/// span and parses it strictly as JSON, falling back to `None` (not a text
/// scrape) on any failure so the caller demotes to the rule ladder.
fn parse_classification_response(raw: &str, entities: &[GroundedEntity]) -> Option<IntentResult> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    if end < start {
        return None;
    }
    let json_slice = &raw[start..=end];
    let parsed: serde_json::Value = serde_json::from_str(json_slice).ok()?;
    let intent = parsed.get("intent")?.as_str()?.to_string();
    if !templates::is_known_intent(&intent) {
        return None;
    }
    let confidence = parsed.get("confidence").and_then(|v| v.as_f64()).unwrap_or(0.7);
    let required_parameters = required_params_for(&intent);
    Some(IntentResult {
        intent,
        confidence,
        entities: entities.to_vec(),
        required_parameters,
    })
}

/// Two whitelisted ETFs plus the literal word "jaccard" always wins, even
/// over an LLM response that disagrees — the keyword is an unambiguous
/// signal the rule ladder alone can't express through entity shape.
fn jaccard_keyword_override(
    query: &str,
    counts: &EntityCounts,
    entities: &[GroundedEntity],
) -> Option<IntentResult> {
    if counts.etf_count < 2 || !query.to_lowercase().contains("jaccard") {
        return None;
    }
    Some(IntentResult {
        intent: "etf_overlap_jaccard".to_string(),
        confidence: 1.0,
        entities: entities.to_vec(),
        required_parameters: required_params_for("etf_overlap_jaccard"),
    })
}

/// Ports `_validate_intent_entity_match`: each intent has a shape of
/// grounded entities (and sometimes a keyword) it cannot plausibly apply
/// without. Unrecognised intents default to valid, matching the source's
/// catch-all `return True`.
fn is_consistent(intent: &str, counts: &EntityCounts, query: &str) -> bool {
    let query_lower = query.to_lowercase();
    let which_etf = query_lower.contains("which etf") || query_lower.contains("what etf");
    match intent {
        "etf_exposure_to_company" => counts.etf_count == 1 && counts.company_count == 1,
        "etf_overlap_weighted" | "etf_overlap_jaccard" => counts.etf_count >= 2,
        "sector_exposure" => counts.etf_count >= 1 && counts.company_count == 0,
        "etfs_by_sector_threshold" => {
            counts.sector_count >= 1 && counts.company_count == 0 && (which_etf || counts.has_percentage)
        }
        "company_rankings" => counts.company_count >= 1 && counts.etf_count == 0,
        "general_llm" => true,
        _ => true,
    }
}

/// Ports `_fallback_classification`'s priority ladder verbatim, with one
/// addition: a single grounded ETF plus an exposure/hold/position keyword
/// but no grounded company still routes to `etf_exposure_to_company`
/// (rather than falling all the way to `general_llm`), so the parameter
/// fulfiller can report the missing company symbol instead of the
/// pipeline silently answering from general knowledge.
fn fallback_classification(query: &str, entities: &[GroundedEntity]) -> IntentResult {
    let counts = EntityCounts::from(entities);
    let query_lower = query.to_lowercase();

    let exposure_kw =
        query_lower.contains("exposure") || query_lower.contains("hold") || query_lower.contains("position");
    let which_etf = query_lower.contains("which etf") || query_lower.contains("what etf");
    let overlap_kw = query_lower.contains("overlap") || query_lower.contains("similar");

    let (intent, confidence) = if counts.etf_count == 1 && counts.company_count == 1 && exposure_kw {
        ("etf_exposure_to_company", 0.95)
    } else if which_etf && counts.company_count >= 1 {
        ("company_rankings", 0.9)
    } else if which_etf && counts.sector_count >= 1 {
        ("etfs_by_sector_threshold", 0.9)
    } else if counts.etf_count >= 2 && counts.company_count == 1 {
        ("company_rankings", 0.85)
    } else if counts.etf_count == 1 && counts.company_count == 1 {
        ("etf_exposure_to_company", 0.85)
    } else if counts.etf_count == 2 && overlap_kw {
        if query_lower.contains("jaccard") || query_lower.contains("count") || query_lower.contains("percentage") {
            ("etf_overlap_jaccard", 0.8)
        } else {
            ("etf_overlap_weighted", 0.8)
        }
    } else if counts.etf_count == 1 && counts.sector_count >= 1 {
        ("sector_exposure", 0.8)
    } else if counts.sector_count >= 1 && counts.has_percentage {
        ("etfs_by_sector_threshold", 0.75)
    } else if counts.company_count == 1 && counts.etf_count == 0 {
        ("company_rankings", 0.8)
    } else if counts.has_count && (query_lower.contains("top") || query_lower.contains("holdings")) {
        ("top_holdings_subgraph", 0.75)
    } else if counts.etf_count == 1 && counts.company_count == 0 && exposure_kw {
        ("etf_exposure_to_company", 0.6)
    } else {
        ("general_llm", 0.8)
    };

    IntentResult {
        intent: intent.to_string(),
        confidence,
        entities: entities.to_vec(),
        required_parameters: required_params_for(intent),
    }
}

fn required_params_for(intent: &str) -> Vec<String> {
    templates::get(intent)
        .map(|t| t.required_params.iter().map(|p| p.to_string()).collect())
        .unwrap_or_default()
}
