//! Entity Grounder (§4.3): resolves preprocessed surface forms to typed
//! graph entities via a `GraphStoreClient`, order grounded on
//! `entity_grounder.py`'s `ground_entities` orchestration: ETFs, then
//! companies (excluding tickers already matched as ETFs), then sectors,
//! then raw numbers.

use crate::model::{EntityType, GroundedEntity, PreprocessedText, Value};
use async_trait::async_trait;
use std::collections::HashMap;

/// The subset of graph lookups the grounder needs. Kept separate from the
/// executor's `GraphStoreClient` trait is deliberately avoided — both share
/// one trait (see `graph_client.rs`) so a single mock backs every stage in
/// tests.
#[async_trait]
pub trait GraphLookup: Send + Sync {
    async fn lookup_etf(&self, ticker: &str) -> Option<String>;
    async fn lookup_company(&self, symbol: &str) -> Option<String>;
    /// Direct sector-name match.
    async fn lookup_sector(&self, name: &str) -> Option<String>;
    /// Alias match via `Term{norm}-[:ALIAS_OF]->Entity-[:REFERS_TO]->Sector`.
    async fn lookup_sector_alias(&self, token: &str) -> Option<String>;
}

/// Grounds every surface form in `text` against `graph`.
pub async fn ground_entities(
    text: &PreprocessedText,
    graph: &dyn GraphLookup,
) -> Vec<GroundedEntity> {
    let mut entities = Vec::new();
    let mut matched_tickers = Vec::new();

    ground_etfs(text, graph, &mut entities, &mut matched_tickers).await;
    ground_companies(text, graph, &mut entities, &matched_tickers).await;
    ground_sectors(text, graph, &mut entities).await;
    ground_numbers(text, &mut entities);

    dedupe_sectors_by_highest_confidence(entities)
}

async fn ground_etfs(
    text: &PreprocessedText,
    graph: &dyn GraphLookup,
    entities: &mut Vec<GroundedEntity>,
    matched_tickers: &mut Vec<String>,
) {
    for ticker in &text.potential_tickers {
        if let Some(name) = graph.lookup_etf(ticker).await {
            entities.push(
                GroundedEntity::new(ticker.clone(), EntityType::Etf, 1.0)
                    .with_property("name", Value::Text(name)),
            );
            matched_tickers.push(ticker.clone());
        }
    }
}

async fn ground_companies(
    text: &PreprocessedText,
    graph: &dyn GraphLookup,
    entities: &mut Vec<GroundedEntity>,
    matched_tickers: &[String],
) {
    for symbol in &text.potential_tickers {
        if matched_tickers.contains(symbol) {
            continue;
        }
        if let Some(name) = graph.lookup_company(symbol).await {
            entities.push(
                GroundedEntity::new(symbol.clone(), EntityType::Company, 1.0)
                    .with_property("name", Value::Text(name)),
            );
        }
    }
}

async fn ground_sectors(
    text: &PreprocessedText,
    graph: &dyn GraphLookup,
    entities: &mut Vec<GroundedEntity>,
) {
    for token in &text.tokens {
        if let Some(sector_name) = graph.lookup_sector(token).await {
            entities.push(GroundedEntity::new(sector_name, EntityType::Sector, 0.8));
            continue;
        }
        if let Some(sector_name) = graph.lookup_sector_alias(token).await {
            entities.push(GroundedEntity::new(sector_name, EntityType::Sector, 0.9));
        }
    }
}

fn ground_numbers(text: &PreprocessedText, entities: &mut Vec<GroundedEntity>) {
    for pct in text.percentages.iter().chain(text.thresholds.iter()) {
        entities.push(
            GroundedEntity::new(format!("{pct}"), EntityType::Percent, 1.0)
                .with_property("value", Value::Float(*pct)),
        );
    }
    for count in &text.counts {
        entities.push(
            GroundedEntity::new(format!("{count}"), EntityType::Count, 1.0)
                .with_property("value", Value::Int(*count)),
        );
    }
}

/// Deviates from `entity_grounder.py`'s keep-first-seen dedup: when the
/// same sector name is matched twice (once direct, once by alias) the
/// higher-confidence grounding wins.
fn dedupe_sectors_by_highest_confidence(entities: Vec<GroundedEntity>) -> Vec<GroundedEntity> {
    let mut best: HashMap<String, GroundedEntity> = HashMap::new();
    let mut non_sectors = Vec::new();

    for entity in entities {
        if entity.entity_type != EntityType::Sector {
            non_sectors.push(entity);
            continue;
        }
        match best.get(&entity.name) {
            Some(existing) if existing.confidence >= entity.confidence => {}
            _ => {
                best.insert(entity.name.clone(), entity);
            }
        }
    }

    non_sectors.extend(best.into_values());
    non_sectors
}
