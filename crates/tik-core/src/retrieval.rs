//! Hybrid retrieval.
//!
//! Scores every entity by
//!
//! 1. cosine similarity between the query and entity embeddings
//! 2. a flat keyword boost when any query token is one of the entity's query
//!    patterns
//! 3. dropping entities whose static weight is below `minWeight`
//! 4. graph expansion: every survivor adds `centrality(d) * expansionFactor`
//!    to each of its first `descendantLimit` descendants `d` (breadth-first),
//!    creating the entry of a descendant that has none
//!
//! and returns the `topK` best, ties broken by key ascending. A descendant
//! dropped by the weight filter can come back through expansion alone.

use std::collections::{BTreeMap, HashMap};

use serde::Serialize;

use crate::config::RetrievalConfig;
use crate::embedding::EmbeddingStore;
use crate::entity::Entity;
use crate::graph::DependencyGraph;

/// One ranked result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievalHit {
    pub key: String,
    pub score: f64,
}

/// Lowercased, whitespace-split query tokens with surrounding punctuation
/// removed.
pub fn query_tokens(query: &str) -> Vec<String> {
    query
        .to_lowercase()
        .split_whitespace()
        .map(|t| {
            t.trim_matches(|c: char| !(c.is_alphanumeric() || c == '_' || c == '.'))
                .trim_end_matches('.')
                .to_string()
        })
        .filter(|t| !t.is_empty())
        .collect()
}

/// Read-only view used for one query.
#[derive(Debug, Clone, Copy)]
pub struct HybridRetriever<'a> {
    pub entities: &'a BTreeMap<String, Entity>,
    pub graph: &'a DependencyGraph,
    pub embeddings: &'a EmbeddingStore,
    pub pagerank: &'a HashMap<String, f64>,
    pub config: &'a RetrievalConfig,
}

impl HybridRetriever<'_> {
    /// Rank entities for `query`. Never fails: an empty query or entity set
    /// gives an empty result, and a failing query embedding scores every
    /// entity 0 before boosts.
    pub fn retrieve(&self, query: &str, top_k: usize) -> Vec<RetrievalHit> {
        let tokens = query_tokens(query);
        if tokens.is_empty() || self.entities.is_empty() || top_k == 0 {
            return Vec::new();
        }

        let query_vector = match self.embeddings.embed_query(query) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!("Query embedding failed, ranking without similarity: {e}");
                Vec::new()
            }
        };
        let keys: Vec<&String> = self.entities.keys().collect();
        let similarities = self.embeddings.similarity(&query_vector, &keys);

        let mut scores: BTreeMap<String, f64> = BTreeMap::new();
        for (key, similarity) in keys.iter().zip(similarities) {
            let entity = &self.entities[key.as_str()];
            if entity.weight < self.config.min_weight {
                continue;
            }
            let mut score = similarity;
            if entity.matches_any(&tokens) {
                score += self.config.keyword_boost;
            }
            scores.insert((*key).clone(), score);
        }

        let survivors: Vec<String> = scores.keys().cloned().collect();
        for key in &survivors {
            for descendant in self.graph.descendants(key, self.config.descendant_limit) {
                let centrality = self.pagerank.get(&descendant).copied().unwrap_or(0.0);
                let boost = centrality * self.config.expansion_factor;
                *scores.entry(descendant).or_insert(0.0) += boost;
            }
        }

        let mut ranked: Vec<RetrievalHit> = scores
            .into_iter()
            .map(|(key, score)| RetrievalHit { key, score })
            .collect();
        ranked.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.key.cmp(&b.key)));
        ranked.truncate(top_k);

        tracing::debug!(
            query = %query,
            hits = ranked.len(),
            "Retrieved entities"
        );
        ranked
    }
}
