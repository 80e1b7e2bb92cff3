//! Neighborhood Builder (spec §4.C5, stage S1).
//!
//! Bounded-concurrency fan-out (`futures::stream::iter(..)
//! .buffer_unordered(W)` over per-item provider calls), applied here to
//! per-seed neighbor queries.

use std::collections::{HashMap, HashSet};

use futures::stream::{self, StreamExt};
use tokio::time::Instant;

use crate::error::PipelineError;
use crate::model::{Gene, Interaction, Neighborhood};
use crate::providers::InteractionProvider;
use crate::resilience::{self, ProviderCaller};

pub struct NeighborhoodResult {
    pub neighborhood: Neighborhood,
    pub warnings: Vec<String>,
}

pub struct NeighborhoodBuilder {
    provider: std::sync::Arc<dyn InteractionProvider>,
    caller: ProviderCaller,
    max_workers: usize,
    max_neighbors: u32,
    min_score: f64,
}

impl NeighborhoodBuilder {
    pub fn new(
        provider: std::sync::Arc<dyn InteractionProvider>,
        caller: ProviderCaller,
        max_workers: usize,
        max_neighbors: u32,
        min_score: f64,
    ) -> Self {
        NeighborhoodBuilder { provider, caller, max_workers, max_neighbors, min_score }
    }

    /// Builds F_N = seeds ∪ union-over-seeds(neighbors(seed)). A per-seed
    /// provider failure yields an empty neighbor/interaction set for that
    /// seed rather than aborting the stage (spec §4.C5 edge case), and is
    /// recorded as a warning rather than dropped silently.
    pub async fn build(
        &self,
        seeds: Vec<Gene>,
        analysis_id: uuid::Uuid,
        deadline: Instant,
    ) -> Result<NeighborhoodResult, PipelineError> {
        if seeds.is_empty() {
            return Err(PipelineError::InvalidInput("seed list is empty".to_string()));
        }

        let seed_symbols: HashSet<String> = seeds.iter().map(|g| g.symbol.clone()).collect();
        let provider = self.provider.clone();
        let caller = self.caller.clone();
        let min_score = self.min_score;
        let max_neighbors = self.max_neighbors;

        // Fetch per-seed neighbor sets with bounded concurrency, preserving
        // input order in the result vector for deterministic contribution
        // accounting below.
        let fetches = stream::iter(seeds.iter().cloned().enumerate())
            .map(|(idx, seed)| {
                let provider = provider.clone();
                let caller = caller.clone();
                async move {
                    if let Err(err) = resilience::check_deadline(analysis_id, "s1_neighborhood", deadline) {
                        return (idx, seed, Err(err));
                    }
                    let cache_key = serde_json::json!({
                        "symbol": seed.symbol,
                        "min_score": min_score,
                        "max_neighbors": max_neighbors,
                    });
                    let result = caller
                        .call(deadline, &cache_key, || {
                            let provider = provider.clone();
                            let seed = seed.clone();
                            async move { provider.neighbors(&seed, min_score, max_neighbors).await }
                        })
                        .await;
                    (idx, seed, result)
                }
            })
            .buffer_unordered(self.max_workers.max(1))
            .collect::<Vec<_>>()
            .await;

        let mut warnings = Vec::new();
        let mut by_index: HashMap<usize, (Gene, (Vec<Gene>, Vec<Interaction>))> = HashMap::new();
        for (idx, seed, result) in fetches {
            let payload = match result {
                Ok(payload) => payload,
                Err(PipelineError::Cancelled { analysis_id, stage }) => {
                    return Err(PipelineError::Cancelled { analysis_id, stage });
                }
                Err(err) => {
                    warnings.push(format!("s1_neighborhood: neighbor lookup for `{}` failed: {err}", seed.symbol));
                    (Vec::new(), Vec::new())
                }
            };
            by_index.insert(idx, (seed, payload));
        }

        let mut neighbors: Vec<Gene> = Vec::new();
        let mut seen: HashSet<String> = seed_symbols.clone();
        let mut contributions: HashMap<String, u32> = HashMap::new();
        let mut sources: HashMap<String, HashSet<String>> = HashMap::new();
        let mut interactions_by_key: HashMap<(String, String), Interaction> = HashMap::new();

        for idx in 0..seeds.len() {
            let (seed, (seed_neighbors, seed_interactions)) = by_index.remove(&idx).expect("index present");
            let mut new_count = 0u32;
            for neighbor in seed_neighbors {
                if seed_symbols.contains(&neighbor.symbol) {
                    continue; // never place a seed into the neighbor set
                }
                sources
                    .entry(neighbor.symbol.clone())
                    .or_default()
                    .insert("interaction_provider".to_string());
                if seen.insert(neighbor.symbol.clone()) {
                    neighbors.push(neighbor);
                    new_count += 1;
                }
            }
            contributions.insert(seed.symbol.clone(), new_count);

            for interaction in seed_interactions {
                interactions_by_key.entry(interaction.edge_key()).or_insert(interaction);
            }
        }

        Ok(NeighborhoodResult {
            neighborhood: Neighborhood {
                seeds,
                neighbors,
                interactions: interactions_by_key.into_values().collect(),
                contributions,
                sources,
            },
            warnings,
        })
    }
}
