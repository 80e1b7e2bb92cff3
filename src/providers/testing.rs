//! Deterministic in-memory fake providers (SPEC_FULL.md §4.E), used by stage
//! unit tests and `tests/pipeline_scenarios.rs`. Plain in-memory maps rather
//! than HTTP-level mocks, since the core never touches HTTP transport
//! directly.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::PipelineError;
use crate::model::{Gene, Interaction, PathwayEntry, SourceDb};

use super::{
    CardiacExpressionProfile, DiseaseAssociationProvider, EnrichmentProvider, EpigenomicProvider,
    IdResolver, InteractionProvider, KnownPathwayProvider, LiteratureProvider, LiteratureRecord,
    RegulatoryProfile, ResolveOutcome, TissueExpressionProvider,
};

/// Resolves a fixed raw_id → Gene map; anything else is `NotFound`, unless
/// `unavailable` names it, in which case resolution returns
/// `ProviderUnavailable` so callers can exercise the id-normalizer's
/// fallback path (spec §4.C4 step 3, scenario 6).
#[derive(Default)]
pub struct FakeIdResolver {
    pub resolutions: HashMap<String, Gene>,
    pub unavailable: Vec<String>,
}

#[async_trait]
impl IdResolver for FakeIdResolver {
    async fn resolve(&self, raw_id: &str) -> Result<ResolveOutcome, PipelineError> {
        if self.unavailable.iter().any(|id| id == raw_id) {
            return Err(PipelineError::provider_unavailable("id_resolver", "stubbed outage"));
        }
        Ok(match self.resolutions.get(raw_id) {
            Some(gene) => ResolveOutcome::Found(gene.clone()),
            None => ResolveOutcome::NotFound,
        })
    }
}

/// Fixed neighbor/interaction response per seed symbol.
#[derive(Default)]
pub struct FakeInteractionProvider {
    pub neighbors_by_symbol: HashMap<String, (Vec<Gene>, Vec<Interaction>)>,
}

#[async_trait]
impl InteractionProvider for FakeInteractionProvider {
    async fn neighbors(
        &self,
        gene: &Gene,
        _min_score: f64,
        max_neighbors: u32,
    ) -> Result<(Vec<Gene>, Vec<Interaction>), PipelineError> {
        match self.neighbors_by_symbol.get(&gene.symbol) {
            Some((genes, interactions)) => {
                let capped: Vec<Gene> = genes.iter().take(max_neighbors as usize).cloned().collect();
                Ok((capped, interactions.clone()))
            }
            None => Ok((Vec::new(), Vec::new())),
        }
    }
}

/// Returns a fixed pathway list for any gene-set query, already sorted by
/// `p_adj` ascending and filtered by `fdr_threshold`, matching the contract
/// `EnrichmentProvider::enrich` promises its callers.
#[derive(Default)]
pub struct FakeEnrichmentProvider {
    pub pathways: Vec<PathwayEntry>,
}

#[async_trait]
impl EnrichmentProvider for FakeEnrichmentProvider {
    async fn enrich(
        &self,
        genes: &[String],
        _sources: &[SourceDb],
        fdr_threshold: f64,
    ) -> Result<Vec<PathwayEntry>, PipelineError> {
        let gene_set: std::collections::HashSet<&String> = genes.iter().collect();
        let mut matches: Vec<PathwayEntry> = self
            .pathways
            .iter()
            .filter(|p| p.p_adj <= fdr_threshold)
            .filter(|p| p.evidence_genes.iter().any(|g| gene_set.contains(g)))
            .cloned()
            .collect();
        matches.sort_by(|a, b| a.p_adj.partial_cmp(&b.p_adj).unwrap());
        Ok(matches)
    }
}

/// `known: None` makes every query return `Ok(None)` ("unknown", never
/// "none known" — spec §4.C1 item 4).
#[derive(Default)]
pub struct FakeKnownPathwayProvider {
    pub known: Option<Vec<String>>,
}

#[async_trait]
impl KnownPathwayProvider for FakeKnownPathwayProvider {
    async fn pathways_for(&self, _genes: &[String]) -> Result<Option<Vec<String>>, PipelineError> {
        Ok(self.known.clone())
    }
}

#[derive(Default)]
pub struct FakeLiteratureProvider {
    pub records_by_query_substring: Vec<(String, Vec<LiteratureRecord>)>,
}

#[async_trait]
impl LiteratureProvider for FakeLiteratureProvider {
    async fn search(&self, query: &str, max_results: u32) -> Result<Vec<LiteratureRecord>, PipelineError> {
        for (substring, records) in &self.records_by_query_substring {
            if query.contains(substring.as_str()) {
                return Ok(records.iter().take(max_results as usize).cloned().collect());
            }
        }
        Ok(Vec::new())
    }
}

#[derive(Default)]
pub struct FakeTissueExpressionProvider {
    pub profiles: HashMap<String, CardiacExpressionProfile>,
}

#[async_trait]
impl TissueExpressionProvider for FakeTissueExpressionProvider {
    async fn cardiac_profile(&self, gene: &str) -> Result<Option<CardiacExpressionProfile>, PipelineError> {
        Ok(self.profiles.get(gene).copied())
    }
}

#[derive(Default)]
pub struct FakeEpigenomicProvider {
    pub profiles: HashMap<String, RegulatoryProfile>,
}

#[async_trait]
impl EpigenomicProvider for FakeEpigenomicProvider {
    async fn regulatory(&self, gene: &str) -> Result<Option<RegulatoryProfile>, PipelineError> {
        Ok(self.profiles.get(gene).cloned())
    }
}

#[derive(Default)]
pub struct FakeDiseaseAssociationProvider {
    pub scores: HashMap<String, f64>,
}

#[async_trait]
impl DiseaseAssociationProvider for FakeDiseaseAssociationProvider {
    async fn score(&self, gene: &str) -> Result<f64, PipelineError> {
        Ok(self.scores.get(gene).copied().unwrap_or(0.0))
    }
}

/// Counts calls made through a wrapped provider, for assertions like "the
/// literature expander skipped a generic pathway" (call count stays 0).
pub struct CallCounter<P> {
    pub inner: P,
    pub calls: Mutex<u32>,
}

impl<P> CallCounter<P> {
    pub fn new(inner: P) -> Self {
        CallCounter { inner, calls: Mutex::new(0) }
    }

    pub fn call_count(&self) -> u32 {
        *self.calls.lock().unwrap()
    }
}

#[async_trait]
impl<P: LiteratureProvider> LiteratureProvider for CallCounter<P> {
    async fn search(&self, query: &str, max_results: u32) -> Result<Vec<LiteratureRecord>, PipelineError> {
        *self.calls.lock().unwrap() += 1;
        self.inner.search(query, max_results).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Gene;

    #[tokio::test]
    async fn fake_id_resolver_returns_not_found_for_unknown_input() {
        let resolver = FakeIdResolver::default();
        let outcome = resolver.resolve("TP53").await.unwrap();
        assert!(matches!(outcome, ResolveOutcome::NotFound));
    }

    #[tokio::test]
    async fn fake_id_resolver_returns_unavailable_for_configured_outage() {
        let resolver = FakeIdResolver {
            unavailable: vec!["UNKNOWN_GENE1".to_string()],
            ..Default::default()
        };
        let err = resolver.resolve("UNKNOWN_GENE1").await.unwrap_err();
        assert!(matches!(err, PipelineError::ProviderUnavailable { .. }));
    }

    #[tokio::test]
    async fn fake_enrichment_sorts_and_filters_by_fdr() {
        let provider = FakeEnrichmentProvider {
            pathways: vec![
                PathwayEntry {
                    id: "P1".into(),
                    name: "Apoptosis".into(),
                    source_db: SourceDb::Reac,
                    p_value: 1e-4,
                    p_adj: 1e-4,
                    evidence_count: 3,
                    evidence_genes: vec!["TP53".into(), "MDM2".into(), "CDKN1A".into()],
                },
                PathwayEntry {
                    id: "P2".into(),
                    name: "Cellular process".into(),
                    source_db: SourceDb::GoBp,
                    p_value: 0.2,
                    p_adj: 0.2,
                    evidence_count: 1,
                    evidence_genes: vec!["TP53".into()],
                },
            ],
        };
        let result = provider
            .enrich(&["TP53".to_string()], &[SourceDb::Reac], 0.05)
            .await
            .unwrap();
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].id, "P1");
    }

    #[tokio::test]
    async fn fake_interaction_provider_caps_at_max_neighbors() {
        let gene = Gene::fallback("TP53", "TP53", "human");
        let neighbor = Gene::fallback("MDM2", "MDM2", "human");
        let mut neighbors_by_symbol = HashMap::new();
        neighbors_by_symbol.insert("TP53".to_string(), (vec![neighbor.clone(), neighbor], vec![]));
        let provider = FakeInteractionProvider { neighbors_by_symbol };
        let (neighbors, _) = provider.neighbors(&gene, 0.5, 1).await.unwrap();
        assert_eq!(neighbors.len(), 1);
    }
}
