//! Top-Gene Aggregation (spec §4.C15, stage S6).
//!
//! Runs after the mandatory name filter (S5c) over the already-final
//! pathway list. Not one of the explicitly bounded-fan-out stages in §5, but
//! still issues one `DiseaseAssociationProvider` call per distinct evidence
//! gene, so it reuses the same bounded-concurrency idiom as the other
//! provider-calling stages to avoid serializing an unbounded gene set.

use std::collections::HashMap;

use futures::stream::{self, StreamExt};
use tokio::time::Instant;

use crate::error::PipelineError;
use crate::model::{ScoredPathway, TopGene};
use crate::providers::DiseaseAssociationProvider;
use crate::resilience::{self, ProviderCaller};
use crate::stages::validators::{APPROVED_DRUG_TARGETS, CLINICAL_STAGE_TARGETS, DRUGGABLE_GENE_FAMILY};

const TOP_PATHWAYS_CONSIDERED: usize = 50;
const TOP_GENES_RETURNED: usize = 20;

fn druggability_bonus(gene: &str) -> f64 {
    if APPROVED_DRUG_TARGETS.contains(&gene) {
        1.0
    } else if CLINICAL_STAGE_TARGETS.contains(&gene) {
        0.5
    } else if DRUGGABLE_GENE_FAMILY.contains(&gene) {
        0.25
    } else {
        0.0
    }
}

pub struct TopGeneAggregator {
    disease_association: std::sync::Arc<dyn DiseaseAssociationProvider>,
    caller: ProviderCaller,
    max_workers: usize,
    require_all_providers: bool,
}

impl TopGeneAggregator {
    pub fn new(
        disease_association: std::sync::Arc<dyn DiseaseAssociationProvider>,
        caller: ProviderCaller,
        max_workers: usize,
        require_all_providers: bool,
    ) -> Self {
        TopGeneAggregator { disease_association, caller, max_workers, require_all_providers }
    }

    /// `importance_score = Σ over pathways of (51 - rank)/50`, taken over the
    /// top 50 pathways by `nes_score`; `final_score = importance · (1 +
    /// druggability_bonus + 0.75·cardiac_disease_score)` (spec §4.C15).
    pub async fn run(
        &self,
        pathways: &[ScoredPathway],
        analysis_id: uuid::Uuid,
        deadline: Instant,
    ) -> Result<(Vec<TopGene>, Vec<String>), PipelineError> {
        let mut top_pathways: Vec<&ScoredPathway> = pathways.iter().collect();
        top_pathways.sort_by(|a, b| b.nes_score.partial_cmp(&a.nes_score).unwrap_or(std::cmp::Ordering::Equal));
        top_pathways.truncate(TOP_PATHWAYS_CONSIDERED);

        let mut importance: HashMap<String, f64> = HashMap::new();
        let mut appearances: HashMap<String, u32> = HashMap::new();

        for pathway in &top_pathways {
            let weight = (51.0 - pathway.rank as f64) / 50.0;
            for gene in pathway.evidence_genes() {
                *importance.entry(gene.clone()).or_insert(0.0) += weight;
                *appearances.entry(gene.clone()).or_insert(0) += 1;
            }
        }

        let genes: Vec<String> = importance.keys().cloned().collect();
        let provider = self.disease_association.clone();
        let caller = self.caller.clone();
        let require_all_providers = self.require_all_providers;
        let results = stream::iter(genes.into_iter())
            .map(|gene| {
                let provider = provider.clone();
                let caller = caller.clone();
                async move {
                    resilience::check_deadline(analysis_id, "s6_top_genes", deadline)?;
                    let cache_key = serde_json::json!({ "gene": gene });
                    let result = caller
                        .call(deadline, &cache_key, || {
                            let provider = provider.clone();
                            let gene = gene.clone();
                            async move { provider.score(&gene).await }
                        })
                        .await;
                    match result {
                        Ok(score) => Ok((gene, score, None)),
                        Err(err) if require_all_providers => Err(err),
                        Err(err) => {
                            let warning = format!("s6_top_genes: disease association score for `{gene}` failed: {err}");
                            Ok((gene, 0.0, Some(warning)))
                        }
                    }
                }
            })
            .buffer_unordered(self.max_workers.max(1))
            .collect::<Vec<_>>()
            .await;

        let mut disease_scores: HashMap<String, f64> = HashMap::new();
        let mut warnings = Vec::new();
        for result in results {
            let (gene, score, warning) = result?;
            disease_scores.insert(gene, score);
            if let Some(warning) = warning {
                warnings.push(warning);
            }
        }

        let mut genes_out: Vec<TopGene> = importance
            .into_iter()
            .map(|(symbol, importance_score)| {
                let disease_score = disease_scores.get(&symbol).copied().unwrap_or(0.0);
                let drug_bonus = druggability_bonus(&symbol);
                let disease_bonus = 0.75 * disease_score;
                let final_score = importance_score * (1.0 + drug_bonus + disease_bonus);
                TopGene {
                    symbol: symbol.clone(),
                    importance_score,
                    druggability_bonus: drug_bonus,
                    disease_bonus,
                    final_score,
                    appearances: appearances.get(&symbol).copied().unwrap_or(0),
                }
            })
            .collect();

        genes_out.sort_by(|a, b| {
            b.final_score
                .partial_cmp(&a.final_score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.symbol.cmp(&b.symbol))
        });
        genes_out.truncate(TOP_GENES_RETURNED);
        Ok((genes_out, warnings))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::model::{AggregatedPathway, PathwayEntry, SourceDb};
    use crate::providers::testing::FakeDiseaseAssociationProvider;
    use crate::rate_limit::RateLimiterRegistry;
    use std::collections::HashMap as Map;
    use std::collections::HashSet;
    use std::time::Duration;

    fn test_caller() -> ProviderCaller {
        let config = Config::default();
        let cache = std::sync::Arc::new(crate::cache::Cache::new(1024 * 1024));
        ProviderCaller::new(cache, &RateLimiterRegistry::new(), &config, "disease_association")
    }

    fn far_deadline() -> Instant {
        Instant::now() + Duration::from_secs(60)
    }

    fn pathway(id: &str, genes: &[&str], rank: u32, nes: f64) -> ScoredPathway {
        ScoredPathway {
            aggregated: AggregatedPathway {
                pathway: PathwayEntry {
                    id: id.to_string(),
                    name: id.to_string(),
                    source_db: SourceDb::Reac,
                    p_value: 0.01,
                    p_adj: 0.01,
                    evidence_count: genes.len() as u32,
                    evidence_genes: genes.iter().map(|g| g.to_string()).collect(),
                },
                support_count: 1,
                source_primary_pathways: HashSet::new(),
                source_secondary_pathways: vec![],
                aggregation_score: 0.0,
                combined_p_value: 0.01,
                aggregated_nes: nes,
                consistency_score: 1.0,
                confidence_score: 0.5,
                support_fraction: 1.0,
                contributing_seed_genes: HashSet::new(),
            },
            nes_score: nes,
            rank,
            score_components: Map::new(),
            traced_seed_genes: HashSet::new(),
            literature_associations: Default::default(),
            cardiac_disease_score: 0.0,
            tissue_expression: None,
            permutation: None,
            druggability: None,
        }
    }

    #[tokio::test]
    async fn approved_drug_target_outranks_equally_important_gene() {
        let pathways = vec![pathway("P1", &["ACE", "FOO1"], 1, 10.0)];
        let provider = FakeDiseaseAssociationProvider::default();
        let aggregator = TopGeneAggregator::new(std::sync::Arc::new(provider), test_caller(), 4, false);
        let (genes, _warnings) = aggregator.run(&pathways, uuid::Uuid::new_v4(), far_deadline()).await.unwrap();
        let ace = genes.iter().find(|g| g.symbol == "ACE").unwrap();
        let foo1 = genes.iter().find(|g| g.symbol == "FOO1").unwrap();
        assert!(ace.final_score > foo1.final_score);
        assert_eq!(ace.druggability_bonus, 1.0);
    }

    #[tokio::test]
    async fn appearances_counts_distinct_contributing_pathways() {
        let pathways = vec![pathway("P1", &["TP53"], 1, 10.0), pathway("P2", &["TP53"], 2, 9.0)];
        let provider = FakeDiseaseAssociationProvider::default();
        let aggregator = TopGeneAggregator::new(std::sync::Arc::new(provider), test_caller(), 4, false);
        let (genes, _warnings) = aggregator.run(&pathways, uuid::Uuid::new_v4(), far_deadline()).await.unwrap();
        let tp53 = genes.iter().find(|g| g.symbol == "TP53").unwrap();
        assert_eq!(tp53.appearances, 2);
    }

    #[tokio::test]
    async fn returns_at_most_twenty_genes() {
        let genes: Vec<String> = (0..30).map(|i| format!("G{i}")).collect();
        let gene_refs: Vec<&str> = genes.iter().map(|s| s.as_str()).collect();
        let pathways = vec![pathway("P1", &gene_refs, 1, 10.0)];
        let provider = FakeDiseaseAssociationProvider::default();
        let aggregator = TopGeneAggregator::new(std::sync::Arc::new(provider), test_caller(), 4, false);
        let (result, _warnings) = aggregator.run(&pathways, uuid::Uuid::new_v4(), far_deadline()).await.unwrap();
        assert!(result.len() <= 20);
    }
}
