//! The Template Catalogue (§4.1): a static, immutable mapping from intent
//! key to a parameterised, security-checkable graph query.
//!
//! The declarative-table shape is grounded on `analyze/rules.rs`'s
//! condition/action registry, but the hot-reload wrapper is deliberately
//! not carried over — §9 requires the catalogue to be immutable after
//! construction.

use once_cell::sync::Lazy;
use std::collections::HashMap;

/// Keywords that disqualify a template from being read-only.
const WRITE_KEYWORDS: &[&str] = &["CREATE", "DELETE", "SET", "MERGE", "DROP", "REMOVE"];

/// Dangerous procedure/clause prefixes, carried over verbatim from the
/// original Python source's `_validate_template_security` denylist.
const DANGEROUS_PATTERNS: &[&str] = &[
    "CALL APOC",
    "CALL DB.",
    "LOAD CSV",
    "PERIODIC COMMIT",
    "CALL { CREATE",
    "CALL { MERGE",
    "CALL { DELETE",
];

/// A single catalogue entry.
#[derive(Clone, Debug)]
pub struct Template {
    pub intent_key: &'static str,
    pub query_text: &'static str,
    pub required_params: &'static [&'static str],
    pub description: &'static str,
}

impl Template {
    pub fn validate_params(&self, params: &HashMap<String, crate::model::Value>) -> Vec<String> {
        self.required_params
            .iter()
            .filter(|p| !params.contains_key(**p))
            .map(|p| p.to_string())
            .collect()
    }

    pub fn has_limit(&self) -> bool {
        self.query_text.to_uppercase().contains("LIMIT")
    }

    pub fn is_read_only(&self) -> bool {
        let upper = self.query_text.to_uppercase();
        !WRITE_KEYWORDS.iter().any(|kw| upper.contains(kw))
    }

    /// Returns the first denylisted pattern found in the template text, if
    /// any. Called fresh at execution time (§4.6), never cached from
    /// registration, so a tampered catalogue cannot bypass the check.
    pub fn dangerous_pattern(&self) -> Option<&'static str> {
        let upper = self.query_text.to_uppercase();
        DANGEROUS_PATTERNS.iter().copied().find(|p| upper.contains(p))
    }
}

pub static CATALOGUE: Lazy<HashMap<&'static str, Template>> = Lazy::new(|| {
    let entries = [
        Template {
            intent_key: "etf_exposure_to_company",
            query_text: r#"
                MATCH (e:ETF {ticker: $ticker})-[h:HOLDS]->(c:Company {symbol: $symbol})
                RETURN e.ticker as etf_ticker, e.name as etf_name,
                       c.symbol, c.name as company_name,
                       round(h.weight * 100, 3) as exposure_percent
                ORDER BY h.weight DESC
                LIMIT 50
            "#,
            required_params: &["ticker", "symbol"],
            description: "Find ETF exposure to specific company",
        },
        Template {
            intent_key: "etf_overlap_weighted",
            query_text: r#"
                MATCH (e1:ETF {ticker: $ticker1})-[h1:HOLDS]->(c:Company)<-[h2:HOLDS]-(e2:ETF {ticker: $ticker2})
                RETURN c.symbol, c.name as company_name,
                       round(h1.weight * 100, 3) as percent_etf1,
                       round(h2.weight * 100, 3) as percent_etf2,
                       round((h1.weight + h2.weight) * 100, 3) as combined_percent,
                       round(abs(h1.weight - h2.weight) * 100, 3) as difference_percent
                ORDER BY (h1.weight + h2.weight) DESC
                LIMIT 50
            "#,
            required_params: &["ticker1", "ticker2"],
            description: "Calculate weighted overlap between two ETFs",
        },
        Template {
            intent_key: "etf_overlap_jaccard",
            query_text: r#"
                MATCH (e1:ETF {ticker: $ticker1})-[:HOLDS]->(c:Company)<-[:HOLDS]-(e2:ETF {ticker: $ticker2})
                WITH count(c) as intersection
                MATCH (e1:ETF {ticker: $ticker1})-[:HOLDS]->(c1:Company)
                WITH intersection, count(c1) as count1
                MATCH (e2:ETF {ticker: $ticker2})-[:HOLDS]->(c2:Company)
                WITH intersection, count1, count(c2) as count2
                RETURN intersection, count1, count2,
                       toFloat(intersection) / (count1 + count2 - intersection) as jaccard_similarity,
                       toFloat(intersection) / count1 as overlap_ratio_etf1,
                       toFloat(intersection) / count2 as overlap_ratio_etf2,
                       round(toFloat(intersection) / (count1 + count2 - intersection) * 100, 2) as jaccard_percent
                LIMIT 1
            "#,
            required_params: &["ticker1", "ticker2"],
            description: "Calculate Jaccard overlap coefficient between ETFs",
        },
        Template {
            intent_key: "sector_exposure",
            query_text: r#"
                MATCH (e:ETF {ticker: $ticker})-[h:HOLDS]->(c:Company)-[:IN_SECTOR]->(s:Sector)
                WITH s.name as sector,
                     count(c) as company_count,
                     sum(h.weight) as total_weight,
                     avg(h.weight) as avg_weight,
                     max(h.weight) as max_weight
                RETURN sector,
                       company_count,
                       round(total_weight * 100, 2) as exposure_percent,
                       round(avg_weight * 100, 3) as avg_exposure_percent,
                       round(max_weight * 100, 3) as max_exposure_percent
                ORDER BY total_weight DESC
                LIMIT 50
            "#,
            required_params: &["ticker"],
            description: "Show sector distribution for ETF",
        },
        Template {
            intent_key: "etfs_by_sector_threshold",
            query_text: r#"
                MATCH (s:Sector)
                WHERE s.name = $sector OR s.name CONTAINS $sector
                WITH s
                MATCH (s)<-[:IN_SECTOR]-(c:Company)<-[h:HOLDS]-(e:ETF)
                WITH e, sum(h.weight) as sector_exposure
                WHERE sector_exposure >= $threshold
                RETURN e.ticker, e.name as etf_name,
                       round(sector_exposure * 100, 2) as exposure_percent
                ORDER BY sector_exposure DESC
                LIMIT 50
            "#,
            required_params: &["sector", "threshold"],
            description: "Find ETFs with minimum sector exposure",
        },
        Template {
            intent_key: "top_holdings_subgraph",
            query_text: r#"
                MATCH (e:ETF {ticker: $ticker})-[h:HOLDS]->(c:Company)-[:IN_SECTOR]->(s:Sector)
                RETURN c.symbol, c.name as company_name, s.name as sector,
                       round(h.weight * 100, 3) as exposure_percent
                ORDER BY h.weight DESC
                LIMIT $top_n
            "#,
            required_params: &["ticker", "top_n"],
            description: "Get top holdings with weights and sectors",
        },
        Template {
            intent_key: "company_rankings",
            query_text: r#"
                MATCH (c:Company {symbol: $symbol})<-[h:HOLDS]-(e:ETF)
                WHERE ($etf_tickers IS NULL OR e.ticker IN $etf_tickers)
                RETURN e.ticker, e.name as etf_name,
                       round(h.weight * 100, 3) as exposure_percent
                ORDER BY h.weight DESC
                LIMIT 50
            "#,
            required_params: &["symbol"],
            description: "Rank ETFs by exposure to specific company",
        },
        Template {
            intent_key: "general_llm",
            query_text: "",
            required_params: &[],
            description: "Handle general questions with LLM knowledge",
        },
        Template {
            intent_key: "comprehensive_data",
            query_text: r#"
                MATCH (e:ETF)-[h:HOLDS]->(c:Company)-[:IN_SECTOR]->(s:Sector)
                WITH e, c, s, h
                ORDER BY e.ticker, h.weight DESC
                WITH e,
                     collect({
                         symbol: c.symbol,
                         name: c.name,
                         sector: s.name,
                         weight: h.weight,
                         exposure_percent: round(h.weight * 100, 3)
                     })[0..50] as holdings,
                     count(c) as total_holdings
                MATCH (e)-[h2:HOLDS]->(c2:Company)-[:IN_SECTOR]->(s2:Sector)
                WITH e, holdings, total_holdings,
                     s2.name as sector,
                     sum(h2.weight) as sector_weight,
                     count(c2) as sector_count
                WITH e, holdings, total_holdings,
                     collect({
                         sector: sector,
                         weight: round(sector_weight * 100, 2),
                         count: sector_count
                     }) as sectors
                RETURN e.ticker as etf_ticker,
                       e.name as etf_name,
                       total_holdings,
                       holdings,
                       sectors
                ORDER BY e.ticker
                LIMIT 10
            "#,
            required_params: &[],
            description: "Get comprehensive ETF holdings and sector data for all ETFs",
        },
    ];
    entries.into_iter().map(|t| (t.intent_key, t)).collect()
});

pub fn get(intent_key: &str) -> Option<&'static Template> {
    CATALOGUE.get(intent_key)
}

pub fn list_intents() -> Vec<&'static str> {
    let mut keys: Vec<&'static str> = CATALOGUE.keys().copied().collect();
    keys.sort_unstable();
    keys
}

pub fn is_known_intent(intent_key: &str) -> bool {
    CATALOGUE.contains_key(intent_key)
}
