//! Answer Synthesizer (§4.7): turns query rows into prose, LLM-primary with
//! a deterministic template fallback, grounded on `llm_synthesizer.py`.

use crate::llm_client::LlmClient;
use crate::model::{QueryResult, Row, Value};
use once_cell::sync::Lazy;
use regex::Regex;

/// Which word budget and row scope a synthesis call operates under.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SynthesisMode {
    Standard,
    Comprehensive,
}

impl SynthesisMode {
    fn word_limit(self) -> usize {
        match self {
            SynthesisMode::Standard => 150,
            SynthesisMode::Comprehensive => 400,
        }
    }
}

static PERCENT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+(\.\d+)?%").unwrap());
static DOLLAR_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\$\d+(\.\d+)?").unwrap());
static DECIMAL_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b\d+\.\d+\b").unwrap());
static INTEGER_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b\d+\b").unwrap());
static SENTENCE_END_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[.!?]\s").unwrap());

pub async fn synthesize(
    intent: &str,
    query_result: &QueryResult,
    mode: SynthesisMode,
    llm: &dyn LlmClient,
    whitelisted_tickers: &[String],
) -> String {
    if intent == "general_llm" {
        return synthesize_general_llm(mode, llm).await;
    }

    if query_result.rows.is_empty() {
        return no_results_response(whitelisted_tickers);
    }

    let prompt = build_synthesis_prompt(intent, query_result, mode);
    let draft = match llm.complete(&prompt).await {
        Ok(text) if !text.trim().is_empty() => text,
        _ => return fallback_response(intent, query_result),
    };

    let with_number = ensure_concrete_number(&draft, &query_result.rows);
    enforce_word_limit(&with_number, mode.word_limit())
}

/// `general_llm` carries no rows by design: pass "respond using your
/// knowledge" as the data summary and skip the numeric-literal
/// post-condition entirely, per §4.7's standard path.
async fn synthesize_general_llm(mode: SynthesisMode, llm: &dyn LlmClient) -> String {
    let scope = match mode {
        SynthesisMode::Standard => "Answer concisely in plain English.",
        SynthesisMode::Comprehensive => "Answer thoroughly and precisely.",
    };
    let prompt = format!("Intent: general_llm\n{scope}\nData: respond using your knowledge.");

    match llm.complete(&prompt).await {
        Ok(text) if !text.trim().is_empty() => enforce_word_limit(&text, mode.word_limit()),
        _ => general_llm_fallback_response(),
    }
}

/// Fixed apology string, matching `general_llm`'s deterministic-fallback
/// behaviour on LLM failure (§4.7).
fn general_llm_fallback_response() -> String {
    "I'm not able to reach my knowledge model right now, so I can't answer that question.".to_string()
}

fn build_synthesis_prompt(intent: &str, query_result: &QueryResult, mode: SynthesisMode) -> String {
    let scope = match mode {
        SynthesisMode::Standard => "Answer concisely in plain English.",
        SynthesisMode::Comprehensive => {
            "Answer thoroughly, covering the holdings and sector breakdown below."
        }
    };
    let summary = summarize_rows(intent, &query_result.rows);
    format!(
        "Intent: {intent}\n{scope}\nAlways include at least one concrete number from the data.\n\
        Data:\n{summary}"
    )
}

fn format_row(row: &Row) -> String {
    let mut pairs: Vec<String> = row.iter().map(|(k, v)| format!("{k}={v}")).collect();
    pairs.sort_unstable();
    pairs.join(", ")
}

/// Tagged-variant dispatch over the first up-to-5 rows, one summariser per
/// intent, mirroring `_create_results_summary`'s if/elif ladder rather than
/// a generic key=value dump.
fn summarize_rows(intent: &str, rows: &[Row]) -> String {
    let top_rows = &rows[..rows.len().min(5)];
    match intent {
        "etf_exposure_to_company" => summarize_exposure(top_rows),
        "etf_overlap_weighted" => summarize_overlap(top_rows),
        "etf_overlap_jaccard" => summarize_jaccard(top_rows),
        "sector_exposure" => summarize_sectors(top_rows),
        "etfs_by_sector_threshold" => summarize_sector_etfs(top_rows),
        "company_rankings" => summarize_company_rankings(top_rows),
        "top_holdings_subgraph" => summarize_top_holdings(top_rows),
        _ => summarize_generic(rows, top_rows),
    }
}

fn row_text<'a>(row: &'a Row, key: &str, default: &'a str) -> &'a str {
    row.get(key).and_then(Value::as_str).unwrap_or(default)
}

fn row_num(row: &Row, key: &str) -> f64 {
    row.get(key).and_then(Value::as_f64).unwrap_or(0.0)
}

fn summarize_exposure(rows: &[Row]) -> String {
    let Some(row) = rows.first() else {
        return "No exposure data found.".to_string();
    };
    let etf = row_text(row, "etf_ticker", "ETF");
    let exposure_percent = row_num(row, "exposure_percent");
    let company = row
        .get("company_name")
        .or_else(|| row.get("c.symbol"))
        .and_then(Value::as_str)
        .unwrap_or("company");
    format!("ETF {etf} holds {exposure_percent:.2}% in {company}.")
}

fn summarize_overlap(rows: &[Row]) -> String {
    let Some(top) = rows.first() else {
        return "No overlap data found.".to_string();
    };
    let total_companies = rows.len();
    let combined_percent = row_num(top, "combined_percent");
    let company_name = row_text(top, "company_name", "Unknown");
    let total_combined: f64 = rows.iter().take(10).map(|r| row_num(r, "combined_percent")).sum();
    format!(
        "Found {total_companies} overlapping holdings with total combined exposure of \
        {total_combined:.2}%. Top overlap: {company_name} with {combined_percent:.2}% combined exposure."
    )
}

fn summarize_jaccard(rows: &[Row]) -> String {
    let Some(row) = rows.first() else {
        return "No Jaccard data found.".to_string();
    };
    let intersection = row.get("intersection").and_then(Value::as_i64).unwrap_or(0);
    let jaccard = row_num(row, "jaccard_similarity");
    let jaccard_percent = row.get("jaccard_percent").and_then(Value::as_f64).unwrap_or(jaccard * 100.0);
    let count1 = row.get("count1").and_then(Value::as_i64).unwrap_or(0);
    let count2 = row.get("count2").and_then(Value::as_i64).unwrap_or(0);
    format!(
        "Jaccard similarity: {jaccard:.4} ({jaccard_percent:.2}%). Intersection: {intersection} \
        companies. ETF1 holdings: {count1}, ETF2 holdings: {count2}"
    )
}

fn summarize_sectors(rows: &[Row]) -> String {
    let Some(top) = rows.first() else {
        return "No sector data found.".to_string();
    };
    let total_sectors = rows.len();
    let sector_name = row_text(top, "sector", "Unknown");
    let exposure_percent = row_num(top, "exposure_percent");
    let company_count = top.get("company_count").and_then(Value::as_i64).unwrap_or(0);
    format!(
        "ETF has exposure to {total_sectors} sectors. Largest sector exposure: {sector_name} \
        at {exposure_percent:.2}% with {company_count} companies."
    )
}

fn summarize_sector_etfs(rows: &[Row]) -> String {
    let Some(top) = rows.first() else {
        return "No ETFs meet the sector threshold criteria.".to_string();
    };
    let count = rows.len();
    let ticker = row_text(top, "ticker", "Unknown");
    let exposure_percent = row_num(top, "exposure_percent");
    format!("Found {count} ETFs meeting sector criteria. Highest exposure: {ticker} at {exposure_percent:.2}%.")
}

fn summarize_company_rankings(rows: &[Row]) -> String {
    if rows.is_empty() {
        return "No ETF holdings found for this company.".to_string();
    }
    let count = rows.len();
    let holdings: Vec<String> = rows
        .iter()
        .map(|row| {
            let ticker = row_text(row, "e.ticker", "Unknown");
            let etf_name = row_text(row, "etf_name", "Unknown ETF");
            let exposure_percent = row_num(row, "exposure_percent");
            format!("{ticker} ({etf_name}): {exposure_percent:.2}%")
        })
        .collect();
    let mut holdings_list = holdings.iter().take(3).cloned().collect::<Vec<_>>().join(", ");
    if rows.len() > 3 {
        holdings_list.push_str(&format!(" and {} more", rows.len() - 3));
    }
    format!("Company held by {count} ETFs. Rankings: {holdings_list}.")
}

fn summarize_top_holdings(rows: &[Row]) -> String {
    if rows.is_empty() {
        return "No holdings data found.".to_string();
    }
    let count = rows.len();
    let percentages: Vec<f64> = rows.iter().map(|r| row_num(r, "exposure_percent")).collect();
    let top_company = rows[0]
        .get("company_name")
        .or_else(|| rows[0].get("c.symbol"))
        .and_then(Value::as_str)
        .unwrap_or("Unknown");
    let total_exposure: f64 = percentages.iter().sum();
    let max_exposure = percentages.iter().cloned().fold(0.0, f64::max);
    format!("Top {count} holdings include {top_company} ({max_exposure:.2}%), with total exposure of {total_exposure:.2}%.")
}

fn summarize_generic(all_rows: &[Row], top_rows: &[Row]) -> String {
    let preview: Vec<String> = top_rows.iter().take(3).map(format_row).collect();
    format!("Query returned {} results. Top results: {}", all_rows.len(), preview.join("; "))
}

/// Matches `_contains_concrete_number`'s four patterns; appends a
/// parenthetical pulled from the first row's first positive numeric field
/// when none of them match the draft.
fn ensure_concrete_number(draft: &str, rows: &[Row]) -> String {
    if contains_concrete_number(draft) {
        return draft.to_string();
    }
    match first_positive_numeric_field(rows) {
        Some((field, value)) => format!("{draft} ({field}: {value})"),
        None => draft.to_string(),
    }
}

fn contains_concrete_number(text: &str) -> bool {
    PERCENT_RE.is_match(text)
        || DOLLAR_RE.is_match(text)
        || DECIMAL_RE.is_match(text)
        || INTEGER_RE.is_match(text)
}

fn first_positive_numeric_field(rows: &[Row]) -> Option<(String, f64)> {
    for row in rows {
        let mut keys: Vec<&String> = row.keys().collect();
        keys.sort_unstable();
        for key in keys {
            if let Some(value) = row[key].as_f64() {
                if value > 0.0 {
                    return Some((key.clone(), value));
                }
            }
        }
    }
    None
}

/// Truncates at the last sentence boundary within 70% of `limit` words;
/// otherwise hard-cuts at the word boundary with no ellipsis, matching
/// `_ensure_word_limit`.
fn enforce_word_limit(text: &str, limit: usize) -> String {
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.len() <= limit {
        return text.to_string();
    }

    let truncated = words[..limit].join(" ");
    let threshold = (limit as f64 * 0.7) as usize;

    let mut last_boundary = None;
    for mat in SENTENCE_END_RE.find_iter(&truncated) {
        last_boundary = Some(mat.start() + 1);
    }

    match last_boundary {
        Some(pos) if words_in(&truncated[..pos]) >= threshold => truncated[..pos].trim().to_string(),
        _ => truncated,
    }
}

fn words_in(text: &str) -> usize {
    text.split_whitespace().count()
}

/// Always the same fixed sentence naming the whitelisted ETF set, matching
/// `_get_no_results_response`, which always returns its first template
/// rather than rotating over several.
fn no_results_response(whitelisted_tickers: &[String]) -> String {
    let tickers = whitelisted_tickers.join(", ");
    format!(
        "No matching holdings found for the specified parameters. Our database covers \
        {tickers} with their complete portfolio compositions. Please verify ticker symbols \
        or try alternative search terms."
    )
}

fn fallback_response(intent: &str, query_result: &QueryResult) -> String {
    let row_count = query_result.rows.len();
    match first_positive_numeric_field(&query_result.rows) {
        Some((field, value)) => format!(
            "Based on {row_count} matching record(s) for {intent}, the {field} is {value:.3}."
        ),
        None => format!("Found {row_count} matching record(s) for {intent}."),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm_client::LlmError;
    use async_trait::async_trait;
    use std::collections::HashMap;

    struct StaticLlm(&'static str);

    #[async_trait]
    impl LlmClient for StaticLlm {
        async fn complete(&self, _prompt: &str) -> Result<String, LlmError> {
            Ok(self.0.to_string())
        }
    }

    struct FailingLlm;

    #[async_trait]
    impl LlmClient for FailingLlm {
        async fn complete(&self, _prompt: &str) -> Result<String, LlmError> {
            Err(LlmError::Unavailable("down".to_string()))
        }
    }

    fn whitelist() -> Vec<String> {
        vec![
            "SPY".to_string(),
            "QQQ".to_string(),
            "IWM".to_string(),
            "IJH".to_string(),
            "IVE".to_string(),
            "IVW".to_string(),
        ]
    }

    fn sample_result() -> QueryResult {
        let mut row = HashMap::new();
        row.insert("exposure_percent".to_string(), Value::Float(12.5));
        QueryResult {
            query_text: "MATCH ...".to_string(),
            parameters: HashMap::new(),
            rows: vec![row],
            execution_time_ms: 1.0,
            node_count: None,
            edge_count: None,
            is_fallback: false,
        }
    }

    #[tokio::test]
    async fn empty_rows_short_circuit_to_no_results_response() {
        let mut result = sample_result();
        result.rows.clear();
        let answer = synthesize("sector_exposure", &result, SynthesisMode::Standard, &FailingLlm, &whitelist()).await;
        assert!(answer.contains("SPY"));
    }

    #[tokio::test]
    async fn no_results_response_is_deterministic_across_calls() {
        let mut result = sample_result();
        result.rows.clear();
        let first = synthesize("sector_exposure", &result, SynthesisMode::Standard, &FailingLlm, &whitelist()).await;
        let second = synthesize("sector_exposure", &result, SynthesisMode::Standard, &FailingLlm, &whitelist()).await;
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn llm_failure_falls_back_to_deterministic_template() {
        let result = sample_result();
        let answer = synthesize("sector_exposure", &result, SynthesisMode::Standard, &FailingLlm, &whitelist()).await;
        assert!(answer.contains("12.500") || answer.contains("1 matching"));
    }

    #[tokio::test]
    async fn draft_without_a_number_gets_one_appended() {
        let result = sample_result();
        let llm = StaticLlm("Technology makes up a large portion of the exposure.");
        let answer = synthesize("sector_exposure", &result, SynthesisMode::Standard, &llm, &whitelist()).await;
        assert!(contains_concrete_number(&answer));
    }

    #[tokio::test]
    async fn general_llm_with_empty_rows_gets_a_real_llm_answer_not_no_results() {
        let mut result = sample_result();
        result.rows.clear();
        let llm = StaticLlm("Tokyo is currently nine hours ahead of UTC.");
        let answer = synthesize("general_llm", &result, SynthesisMode::Standard, &llm, &whitelist()).await;
        assert!(!answer.contains("couldn't find any data"));
        assert!(answer.contains("Tokyo"));
    }

    #[tokio::test]
    async fn general_llm_llm_failure_yields_fixed_apology_not_no_results() {
        let mut result = sample_result();
        result.rows.clear();
        let answer = synthesize("general_llm", &result, SynthesisMode::Standard, &FailingLlm, &whitelist()).await;
        assert!(!answer.contains("couldn't find any data"));
        assert!(answer.contains("not able to reach"));
    }

    #[test]
    fn long_text_is_truncated_to_word_limit() {
        let words = vec!["word"; 300].join(" ");
        let truncated = enforce_word_limit(&words, 150);
        assert!(words_in(&truncated) <= 150);
    }

    #[test]
    fn truncation_prefers_sentence_boundary_when_within_threshold() {
        let mut sentence = "Short sentence here. ".repeat(40);
        sentence.push_str(&"extra word ".repeat(200));
        let truncated = enforce_word_limit(&sentence, 150);
        assert!(truncated.ends_with('.'));
    }
}
