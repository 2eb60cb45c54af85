//! Preprocessor (§4.2): a pure function of raw text. No network or DB calls.

use crate::model::PreprocessedText;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;

static PERCENTAGE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d+(?:\.\d+)?)\s*%").unwrap());
static DECIMAL_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"0\.\d+").unwrap());
static COUNT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(?:top|first|best)\s+(\d+)\b").unwrap());
static THRESHOLD_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(?:>=|at least|minimum of|more than)\s*(\d+(?:\.\d+)?)\s*%?").unwrap()
});
static TICKER_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b[A-Z]{2,5}\b").unwrap());
static WHITESPACE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());
static NON_WORD_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^\w\s]").unwrap());

/// Common all-caps English words that would otherwise look like tickers.
static STOP_WORDS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "THE", "AND", "FOR", "ARE", "BUT", "NOT", "YOU", "ALL", "CAN", "HER", "WAS", "ONE", "OUR",
        "HAD", "HIS", "HAS", "WHO", "WITH", "FROM", "THEY", "KNOW", "WANT", "BEEN", "GOOD",
        "MUCH", "SOME", "TIME", "VERY", "WHEN", "COME", "HERE", "HOW", "JUST", "LIKE", "LONG",
        "MAKE", "MANY", "OVER", "SUCH", "TAKE", "THAN", "THEM", "WELL", "WHAT", "WHERE",
    ]
    .into_iter()
    .collect()
});

/// Runs the full preprocessing pipeline over `text`.
pub fn process(text: &str) -> PreprocessedText {
    let normalized_text = normalize_text(text);
    let tokens = tokenize(&normalized_text);
    let potential_tickers = extract_tickers(text);

    let percentages: Vec<f64> = PERCENTAGE_RE
        .captures_iter(text)
        .filter_map(|c| c.get(1)?.as_str().parse::<f64>().ok())
        .map(|v| v / 100.0)
        .collect();

    let decimals: Vec<f64> = DECIMAL_RE
        .find_iter(text)
        .filter_map(|m| m.as_str().parse::<f64>().ok())
        .collect();

    let counts: Vec<i64> = COUNT_RE
        .captures_iter(text)
        .filter_map(|c| c.get(1)?.as_str().parse::<i64>().ok())
        .collect();

    let thresholds: Vec<f64> = THRESHOLD_RE
        .captures_iter(text)
        .filter_map(|c| c.get(1)?.as_str().parse::<f64>().ok())
        .map(|v| if v > 1.0 { v / 100.0 } else { v })
        .collect();

    tracing::info!(
        text_length = text.len(),
        numbers_found = percentages.len() + counts.len(),
        tickers_found = potential_tickers.len(),
        tokens_count = tokens.len(),
        "text preprocessed"
    );

    PreprocessedText {
        original_text: text.to_string(),
        normalized_text,
        tokens,
        potential_tickers,
        percentages,
        decimals,
        counts,
        thresholds,
    }
}

fn normalize_text(text: &str) -> String {
    let lower = text.to_lowercase();
    WHITESPACE_RE.replace_all(lower.trim(), " ").to_string()
}

fn tokenize(normalized_text: &str) -> Vec<String> {
    let cleaned = NON_WORD_RE.replace_all(normalized_text, " ");
    cleaned
        .split_whitespace()
        .filter(|t| t.len() > 1)
        .map(|t| t.to_string())
        .collect()
}

fn extract_tickers(text: &str) -> Vec<String> {
    TICKER_RE
        .find_iter(&text.to_uppercase())
        .map(|m| m.as_str().to_string())
        .filter(|t| !STOP_WORDS.contains(t.as_str()))
        .collect()
}
