//! Primary Enrichment (spec §4.C6, stage S2a).

use std::collections::{HashMap, HashSet};

use tokio::time::Instant;

use crate::config::Config;
use crate::error::PipelineError;
use crate::model::{Neighborhood, PathwayEntry, ScoredPathwayEntry, SourceDb};
use crate::providers::{EnrichmentProvider, KnownPathwayProvider};
use crate::resilience::{degrade_or_require, ProviderCaller};

pub fn preliminary_nes(p_adj: f64, evidence_count: u32, db_weight: f64) -> f64 {
    (-(p_adj.max(1e-50).log10())).min(50.0) * evidence_count as f64 * db_weight
}

pub struct PrimaryEnrichmentResult {
    /// Novel pathways, sorted by `preliminary_nes` descending.
    pub primary_pathways: Vec<ScoredPathwayEntry>,
    /// Pathway ids already known to be annotated on the seed set.
    pub known_pathways: HashSet<String>,
    /// How many primary pathways each seed contributed to.
    pub filtering_contributions: HashMap<String, u32>,
    pub warnings: Vec<String>,
}

pub struct PrimaryEnrichment {
    enrichment: std::sync::Arc<dyn EnrichmentProvider>,
    known_pathways: std::sync::Arc<dyn KnownPathwayProvider>,
    enrichment_caller: ProviderCaller,
    known_pathways_caller: ProviderCaller,
}

impl PrimaryEnrichment {
    pub fn new(
        enrichment: std::sync::Arc<dyn EnrichmentProvider>,
        known_pathways: std::sync::Arc<dyn KnownPathwayProvider>,
        enrichment_caller: ProviderCaller,
        known_pathways_caller: ProviderCaller,
    ) -> Self {
        PrimaryEnrichment { enrichment, known_pathways, enrichment_caller, known_pathways_caller }
    }

    pub async fn run(
        &self,
        neighborhood: &Neighborhood,
        sources: &[SourceDb],
        config: &Config,
        deadline: Instant,
    ) -> Result<PrimaryEnrichmentResult, PipelineError> {
        let all_genes: Vec<String> = neighborhood.all_symbols().into_iter().collect();
        let seed_symbols = neighborhood.seed_symbols();
        let mut warnings = Vec::new();

        let enrichment = self.enrichment.clone();
        let enrich_key = serde_json::json!({ "genes": all_genes, "sources": sources, "fdr": config.fdr_threshold });
        let enrich_result = self
            .enrichment_caller
            .call(deadline, &enrich_key, || {
                let enrichment = enrichment.clone();
                let all_genes = all_genes.clone();
                let sources = sources.to_vec();
                async move { enrichment.enrich(&all_genes, &sources, config.fdr_threshold).await }
            })
            .await;
        let entries: Vec<PathwayEntry> = degrade_or_require(
            config.require_all_providers,
            &mut warnings,
            "s2a_primary_enrichment: enrich",
            enrich_result,
        )?;

        let seed_list: Vec<String> = seed_symbols.iter().cloned().collect();
        let known_pathways = self.known_pathways.clone();
        let known_key = serde_json::json!({ "genes": seed_list });
        let known_result = self
            .known_pathways_caller
            .call(deadline, &known_key, || {
                let known_pathways = known_pathways.clone();
                let seed_list = seed_list.clone();
                async move { known_pathways.pathways_for(&seed_list).await }
            })
            .await;
        let known_ids: HashSet<String> = degrade_or_require(
            config.require_all_providers,
            &mut warnings,
            "s2a_primary_enrichment: known_pathways",
            known_result,
        )?
        .unwrap_or_default()
        .into_iter()
        .collect();

        let mut primary_pathways = Vec::new();
        let mut known_pathways = HashSet::new();
        let mut filtering_contributions: HashMap<String, u32> = HashMap::new();

        for entry in entries {
            let db_weight = config.db_weight(entry.source_db.as_str());
            let nes = preliminary_nes(entry.p_adj, entry.evidence_count, db_weight);

            let evidence_set: HashSet<&String> = entry.evidence_genes.iter().collect();
            let overlap: HashSet<String> = seed_symbols
                .iter()
                .filter(|s| evidence_set.contains(s))
                .cloned()
                .collect();
            let contributing_seed_genes = if overlap.is_empty() { seed_symbols.clone() } else { overlap.clone() };

            let overlap_ratio = if entry.evidence_genes.is_empty() {
                0.0
            } else {
                overlap.len() as f64 / entry.evidence_genes.len() as f64
            };
            let is_known = known_ids.contains(&entry.id) || overlap_ratio > config.seed_overlap_threshold;

            if is_known {
                known_pathways.insert(entry.id.clone());
                continue;
            }

            for seed in &contributing_seed_genes {
                *filtering_contributions.entry(seed.clone()).or_insert(0) += 1;
            }

            primary_pathways.push(ScoredPathwayEntry {
                pathway: entry,
                preliminary_nes: nes,
                contributing_seed_genes,
                source_primary_pathway: None,
                literature_support: None,
            });
        }

        primary_pathways.sort_by(|a, b| b.preliminary_nes.partial_cmp(&a.preliminary_nes).unwrap());

        Ok(PrimaryEnrichmentResult { primary_pathways, known_pathways, filtering_contributions, warnings })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Gene;
    use crate::providers::testing::{FakeEnrichmentProvider, FakeKnownPathwayProvider};
    use crate::rate_limit::RateLimiterRegistry;
    use std::time::Duration;

    fn test_caller(namespace: &'static str) -> ProviderCaller {
        let config = Config::default();
        let cache = std::sync::Arc::new(crate::cache::Cache::new(1024 * 1024));
        ProviderCaller::new(cache, &RateLimiterRegistry::new(), &config, namespace)
    }

    fn far_deadline() -> Instant {
        Instant::now() + Duration::from_secs(60)
    }

    fn neighborhood_with_seeds(symbols: &[&str]) -> Neighborhood {
        Neighborhood {
            seeds: symbols.iter().map(|s| Gene::fallback(*s, *s, "human")).collect(),
            neighbors: Vec::new(),
            interactions: Vec::new(),
            contributions: HashMap::new(),
            sources: HashMap::new(),
        }
    }

    #[test]
    fn preliminary_nes_matches_scenario_2() {
        // spec §8 scenario 2: p_adj=1e-4, evidence_count=3, REAC weight=2.0 -> 24.0
        let nes = preliminary_nes(1e-4, 3, 2.0);
        assert!((nes - 24.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn scenario_2_single_seed_two_pathways_one_passes_fdr() {
        let pathways = vec![
            PathwayEntry {
                id: "P1".into(),
                name: "p53 pathway".into(),
                source_db: SourceDb::Reac,
                p_value: 1e-4,
                p_adj: 1e-4,
                evidence_count: 3,
                evidence_genes: vec!["TP53".into(), "MDM2".into(), "CDKN1A".into()],
            },
            PathwayEntry {
                id: "P2".into(),
                name: "unrelated".into(),
                source_db: SourceDb::Reac,
                p_value: 0.2,
                p_adj: 0.2,
                evidence_count: 1,
                evidence_genes: vec!["TP53".into()],
            },
        ];
        let enrichment = FakeEnrichmentProvider { pathways };
        let known = FakeKnownPathwayProvider { known: Some(Vec::new()) };
        let stage = PrimaryEnrichment::new(
            std::sync::Arc::new(enrichment),
            std::sync::Arc::new(known),
            test_caller("enrichment"),
            test_caller("known_pathways"),
        );
        let neighborhood = neighborhood_with_seeds(&["TP53"]);
        let config = Config::default();

        let result = stage.run(&neighborhood, &[SourceDb::Reac], &config, far_deadline()).await.unwrap();
        assert_eq!(result.primary_pathways.len(), 1);
        assert_eq!(result.primary_pathways[0].pathway.id, "P1");
        assert!((result.primary_pathways[0].preliminary_nes - 24.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn pathway_known_to_seeds_is_excluded_from_primary() {
        let pathways = vec![PathwayEntry {
            id: "KNOWN1".into(),
            name: "known pathway".into(),
            source_db: SourceDb::Kegg,
            p_value: 0.001,
            p_adj: 0.001,
            evidence_count: 2,
            evidence_genes: vec!["TP53".into(), "MDM2".into()],
        }];
        let enrichment = FakeEnrichmentProvider { pathways };
        let known = FakeKnownPathwayProvider { known: Some(vec!["KNOWN1".to_string()]) };
        let stage = PrimaryEnrichment::new(
            std::sync::Arc::new(enrichment),
            std::sync::Arc::new(known),
            test_caller("enrichment"),
            test_caller("known_pathways"),
        );
        let neighborhood = neighborhood_with_seeds(&["TP53"]);
        let config = Config::default();

        let result = stage.run(&neighborhood, &[SourceDb::Kegg], &config, far_deadline()).await.unwrap();
        assert!(result.primary_pathways.is_empty());
        assert!(result.known_pathways.contains("KNOWN1"));
    }
}
