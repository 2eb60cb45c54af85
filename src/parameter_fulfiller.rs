//! Parameter Fulfiller (§4.5): maps grounded entities onto the named
//! parameters a template requires, a direct port of the per-intent logic in
//! `parameter_fulfiller.py`.

use crate::config::PipelineConfig;
use crate::model::{EntityType, GroundedEntity, ParameterFulfillment, Value};
use crate::templates;

const DEFAULT_THRESHOLD: f64 = 0.05;
const DEFAULT_TOP_N: i64 = 10;
const MAX_TOP_N: i64 = 50;

pub fn fulfill(intent: &str, entities: &[GroundedEntity], config: &PipelineConfig) -> ParameterFulfillment {
    let mut parameters = match intent {
        "etf_exposure_to_company" => fulfill_etf_exposure_to_company(entities),
        "etf_overlap_weighted" | "etf_overlap_jaccard" => fulfill_etf_overlap(entities),
        "sector_exposure" => fulfill_sector_exposure(entities),
        "etfs_by_sector_threshold" => fulfill_etfs_by_sector_threshold(entities),
        "top_holdings_subgraph" => fulfill_top_holdings_subgraph(entities),
        "company_rankings" => fulfill_company_rankings(entities),
        _ => Default::default(),
    };

    reject_non_whitelisted_tickers(&mut parameters, config);

    let missing_parameters = match templates::get(intent) {
        Some(template) => template.validate_params(&parameters),
        None => Vec::new(),
    };
    let is_complete = missing_parameters.is_empty();

    if !is_complete {
        parameters.clear();
    }

    ParameterFulfillment {
        parameters,
        missing_parameters,
        is_complete,
    }
}

/// Enforces §6's "whitelisted ETF tickers | Set membership enforced in
/// parameter validation": a ticker-shaped parameter naming an ETF outside
/// `config.whitelisted_tickers` is dropped so it surfaces as a missing
/// parameter instead of reaching the graph client.
fn reject_non_whitelisted_tickers(
    parameters: &mut std::collections::HashMap<String, Value>,
    config: &PipelineConfig,
) {
    for key in ["ticker", "ticker1", "ticker2"] {
        let passes = parameters
            .get(key)
            .and_then(Value::as_str)
            .map(|t| config.is_whitelisted(t))
            .unwrap_or(true);
        if !passes {
            parameters.remove(key);
        }
    }
}

/// Picks the entity of `entity_type` with the highest `(confidence, name
/// length)` tuple, matching `_find_entity_value`'s tie-break.
fn find_entity_value<'a>(
    entities: &'a [GroundedEntity],
    entity_type: EntityType,
) -> Option<&'a GroundedEntity> {
    entities
        .iter()
        .filter(|e| e.entity_type == entity_type)
        .max_by(|a, b| {
            a.confidence
                .partial_cmp(&b.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.name.len().cmp(&b.name.len()))
        })
}

fn find_all_entity_values(
    entities: &[GroundedEntity],
    entity_type: EntityType,
) -> Vec<&GroundedEntity> {
    entities.iter().filter(|e| e.entity_type == entity_type).collect()
}

fn fulfill_etf_exposure_to_company(
    entities: &[GroundedEntity],
) -> std::collections::HashMap<String, Value> {
    let mut params = std::collections::HashMap::new();
    if let Some(etf) = find_entity_value(entities, EntityType::Etf) {
        params.insert("ticker".to_string(), Value::Text(etf.name.clone()));
    }
    if let Some(company) = find_entity_value(entities, EntityType::Company) {
        params.insert("symbol".to_string(), Value::Text(company.name.clone()));
    }
    params
}

fn fulfill_etf_overlap(entities: &[GroundedEntity]) -> std::collections::HashMap<String, Value> {
    let mut params = std::collections::HashMap::new();
    let etfs = find_all_entity_values(entities, EntityType::Etf);
    if let Some(first) = etfs.first() {
        params.insert("ticker1".to_string(), Value::Text(first.name.clone()));
    }
    if let Some(second) = etfs.get(1) {
        params.insert("ticker2".to_string(), Value::Text(second.name.clone()));
    }
    params
}

fn fulfill_sector_exposure(entities: &[GroundedEntity]) -> std::collections::HashMap<String, Value> {
    let mut params = std::collections::HashMap::new();
    if let Some(etf) = find_entity_value(entities, EntityType::Etf) {
        params.insert("ticker".to_string(), Value::Text(etf.name.clone()));
    }
    params
}

fn fulfill_etfs_by_sector_threshold(
    entities: &[GroundedEntity],
) -> std::collections::HashMap<String, Value> {
    let mut params = std::collections::HashMap::new();
    if let Some(sector) = find_entity_value(entities, EntityType::Sector) {
        params.insert("sector".to_string(), Value::Text(sector.name.clone()));
    }
    let threshold = find_entity_value(entities, EntityType::Percent)
        .and_then(|e| e.properties.get("value"))
        .and_then(Value::as_f64)
        .unwrap_or(DEFAULT_THRESHOLD);
    params.insert("threshold".to_string(), Value::Float(threshold));
    params
}

fn fulfill_top_holdings_subgraph(
    entities: &[GroundedEntity],
) -> std::collections::HashMap<String, Value> {
    let mut params = std::collections::HashMap::new();
    if let Some(etf) = find_entity_value(entities, EntityType::Etf) {
        params.insert("ticker".to_string(), Value::Text(etf.name.clone()));
    }
    let top_n = find_entity_value(entities, EntityType::Count)
        .and_then(|e| e.properties.get("value"))
        .and_then(Value::as_i64)
        .unwrap_or(DEFAULT_TOP_N)
        .min(MAX_TOP_N);
    params.insert("top_n".to_string(), Value::Int(top_n));
    params
}

fn fulfill_company_rankings(
    entities: &[GroundedEntity],
) -> std::collections::HashMap<String, Value> {
    let mut params = std::collections::HashMap::new();
    if let Some(company) = find_entity_value(entities, EntityType::Company) {
        params.insert("symbol".to_string(), Value::Text(company.name.clone()));
    }
    let etfs = find_all_entity_values(entities, EntityType::Etf);
    if !etfs.is_empty() {
        let tickers: Vec<Value> = etfs.iter().map(|e| Value::Text(e.name.clone())).collect();
        params.insert("etf_tickers".to_string(), Value::List(tickers));
    }
    params
}
