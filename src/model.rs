//! Cross-stage data model (spec §3).
//!
//! Every entity here is a value object created by exactly one stage and
//! consumed read-only by downstream stages, except `ScoredPathway`'s
//! `score_components` and `rank`, which later stages update in place
//! (append-only for new keys, dense re-rank on every re-sort).

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

/// A resolved gene. `canonical_id` is `"unknown"` for the id-normalizer's
/// conservative fallback path (spec §4.C4 step 3).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Gene {
    pub input_id: String,
    pub canonical_id: String,
    pub symbol: String,
    pub species: String,
}

impl Gene {
    pub fn fallback(input_id: impl Into<String>, symbol: impl Into<String>, species: impl Into<String>) -> Self {
        Gene {
            input_id: input_id.into(),
            canonical_id: "unknown".to_string(),
            symbol: symbol.into(),
            species: species.into(),
        }
    }
}

/// Per-channel evidence scores backing an interaction's combined score.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EvidenceChannels {
    pub experimental: f64,
    pub database: f64,
    pub textmining: f64,
    pub coexpression: f64,
}

/// Undirected gene-gene interaction. Canonical edge key is the
/// lexicographically sorted pair, so duplicates collapse at union time
/// regardless of discovery order (spec §3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Interaction {
    pub gene_a: String,
    pub gene_b: String,
    pub combined_score: f64,
    pub evidence: EvidenceChannels,
}

impl Interaction {
    pub fn new(gene_a: impl Into<String>, gene_b: impl Into<String>, combined_score: f64, evidence: EvidenceChannels) -> Self {
        let (gene_a, gene_b) = Self::canonical_pair(gene_a.into(), gene_b.into());
        Interaction { gene_a, gene_b, combined_score, evidence }
    }

    /// The sorted-pair key used for edge dedup.
    pub fn edge_key(&self) -> (String, String) {
        (self.gene_a.clone(), self.gene_b.clone())
    }

    fn canonical_pair(a: String, b: String) -> (String, String) {
        if a <= b { (a, b) } else { (b, a) }
    }
}

/// The functional neighborhood F_N = seeds ∪ union-over-seeds(neighbors).
/// Invariant: no seed symbol ever appears in `neighbors`; `size` =
/// `seeds.len() + neighbors.len()` (spec §4.C5, tested in §8).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Neighborhood {
    pub seeds: Vec<Gene>,
    pub neighbors: Vec<Gene>,
    pub interactions: Vec<Interaction>,
    /// How many *new* neighbors each seed introduced, in iteration order.
    pub contributions: HashMap<String, u32>,
    /// Which provider tags contributed evidence for a given gene symbol.
    pub sources: HashMap<String, HashSet<String>>,
}

impl Neighborhood {
    pub fn size(&self) -> usize {
        self.seeds.len() + self.neighbors.len()
    }

    pub fn all_symbols(&self) -> HashSet<String> {
        self.seeds
            .iter()
            .chain(self.neighbors.iter())
            .map(|g| g.symbol.clone())
            .collect()
    }

    pub fn seed_symbols(&self) -> HashSet<String> {
        self.seeds.iter().map(|g| g.symbol.clone()).collect()
    }
}

/// The pathway source databases known to the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SourceDb {
    Reac,
    Kegg,
    Wp,
    #[serde(rename = "GO:BP")]
    GoBp,
    #[serde(rename = "GO:MF")]
    GoMf,
    #[serde(rename = "GO:CC")]
    GoCc,
}

impl SourceDb {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceDb::Reac => "REAC",
            SourceDb::Kegg => "KEGG",
            SourceDb::Wp => "WP",
            SourceDb::GoBp => "GO:BP",
            SourceDb::GoMf => "GO:MF",
            SourceDb::GoCc => "GO:CC",
        }
    }
}

/// A pathway returned by an enrichment query, pre-scoring.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathwayEntry {
    pub id: String,
    pub name: String,
    pub source_db: SourceDb,
    pub p_value: f64,
    pub p_adj: f64,
    pub evidence_count: u32,
    pub evidence_genes: Vec<String>,
}

/// `PathwayEntry` enriched with preliminary scoring (S2a/S2b output).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredPathwayEntry {
    pub pathway: PathwayEntry,
    pub preliminary_nes: f64,
    pub contributing_seed_genes: HashSet<String>,
    pub source_primary_pathway: Option<String>,
    pub literature_support: Option<LiteratureSupport>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiteratureSupport {
    pub evidence_genes: Vec<String>,
    pub pmids: Vec<String>,
}

/// One secondary-pathway instance folded into an `AggregatedPathway`
/// (spec §5's aggregation-score lineage supplement).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecondaryInstance {
    pub pathway_id: String,
    pub pathway_name: String,
    pub source_db: SourceDb,
    pub p_adj: f64,
    pub preliminary_nes: f64,
    pub evidence_count: u32,
    pub source_primary_pathway: Option<String>,
}

/// A pathway aggregated across one or more secondary-enrichment instances
/// (or a single primary, in the fallback path).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregatedPathway {
    pub pathway: PathwayEntry,
    pub support_count: u32,
    pub source_primary_pathways: HashSet<String>,
    pub source_secondary_pathways: Vec<SecondaryInstance>,
    pub aggregation_score: f64,
    pub combined_p_value: f64,
    pub aggregated_nes: f64,
    pub consistency_score: f64,
    pub confidence_score: f64,
    pub support_fraction: f64,
    pub contributing_seed_genes: HashSet<String>,
}

/// A scalar component feeding a composite score, retained for provenance.
pub type ScoreComponents = HashMap<String, f64>;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TissueExpressionRecord {
    pub cardiac_expression_ratio: f64,
    pub validation_passed: bool,
    pub used_fallback_set: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PermutationRecord {
    pub observed_overlap: u32,
    pub n_permutations_run: u32,
    pub empirical_p: f64,
    pub z_score: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DruggabilityTier {
    High,
    Medium,
    Low,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DruggabilityRecord {
    pub druggable_ratio: f64,
    pub approved_count: u32,
    pub clinical_count: u32,
    pub tier: Option<DruggabilityTier>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LiteratureAssociations {
    pub has_literature_support: bool,
    pub checked: bool,
    pub per_seed_pmids: HashMap<String, Vec<String>>,
    pub per_seed_citation_count: HashMap<String, u32>,
}

/// Final ranked hypothesis. `score_components` and `rank` are the only
/// fields later stages mutate in place (spec §3 lifecycle note).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredPathway {
    pub aggregated: AggregatedPathway,
    pub nes_score: f64,
    pub rank: u32,
    pub score_components: ScoreComponents,
    pub traced_seed_genes: HashSet<String>,
    pub literature_associations: LiteratureAssociations,
    pub cardiac_disease_score: f64,
    pub tissue_expression: Option<TissueExpressionRecord>,
    pub permutation: Option<PermutationRecord>,
    pub druggability: Option<DruggabilityRecord>,
}

impl ScoredPathway {
    pub fn evidence_genes(&self) -> &[String] {
        &self.aggregated.pathway.evidence_genes
    }

    pub fn evidence_gene_set(&self) -> HashSet<String> {
        self.evidence_genes().iter().cloned().collect()
    }
}

/// Re-ranks `pathways` by `nes_score` descending, ties broken by pathway id
/// lexicographically, assigning dense 1-based ranks (spec §5 ordering
/// guarantee; spec §8 testable property).
pub fn rerank(pathways: &mut [ScoredPathway]) {
    pathways.sort_by(|a, b| {
        b.nes_score
            .partial_cmp(&a.nes_score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.aggregated.pathway.id.cmp(&b.aggregated.pathway.id))
    });
    for (i, pathway) in pathways.iter_mut().enumerate() {
        pathway.rank = (i + 1) as u32;
    }
}

/// A gene surfaced by S6 top-gene aggregation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopGene {
    pub symbol: String,
    pub importance_score: f64,
    pub druggability_bonus: f64,
    pub disease_bonus: f64,
    pub final_score: f64,
    pub appearances: u32,
}

/// A per-stage record summarizing what the stage produced, for the
/// persisted artifact and progress reporting.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StageRecord {
    pub stage: String,
    pub input_count: u32,
    pub output_count: u32,
    pub dropped_count: u32,
    pub duration_ms: u64,
    pub warnings: Vec<String>,
}

/// Full pipeline output, matching the `<output_dir>/<analysis_id>/results.json`
/// layout of spec §6.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineResult {
    pub analysis_id: uuid::Uuid,
    pub stage_0: StageRecord,
    pub stage_1: StageRecord,
    pub stage_2a: StageRecord,
    pub stage_2b: StageRecord,
    pub stage_2c: StageRecord,
    pub stage_3: StageRecord,
    pub stage_4a: StageRecord,
    pub stage_4b: StageRecord,
    pub stage_4c: StageRecord,
    pub stage_5a: StageRecord,
    pub stage_5b: StageRecord,
    pub stage_5c: StageRecord,
    pub stage_6: StageRecord,
    pub pathways: Vec<ScoredPathway>,
    pub top_genes: Vec<TopGene>,
    pub warnings: Vec<String>,
    pub cache_stats: crate::cache::CacheStats,
    pub incomplete: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pathway(id: &str, nes: f64) -> ScoredPathway {
        ScoredPathway {
            aggregated: AggregatedPathway {
                pathway: PathwayEntry {
                    id: id.to_string(),
                    name: "x".to_string(),
                    source_db: SourceDb::Reac,
                    p_value: 0.01,
                    p_adj: 0.01,
                    evidence_count: 3,
                    evidence_genes: vec!["TP53".to_string()],
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
            rank: 0,
            score_components: HashMap::new(),
            traced_seed_genes: HashSet::new(),
            literature_associations: LiteratureAssociations::default(),
            cardiac_disease_score: 0.0,
            tissue_expression: None,
            permutation: None,
            druggability: None,
        }
    }

    #[test]
    fn rerank_assigns_dense_unique_ranks_desc_by_nes() {
        let mut pathways = vec![pathway("P2", 5.0), pathway("P1", 10.0), pathway("P3", 5.0)];
        rerank(&mut pathways);
        assert_eq!(pathways[0].aggregated.pathway.id, "P1");
        assert_eq!(pathways[0].rank, 1);
        // Tie between P2 and P3 broken lexicographically.
        assert_eq!(pathways[1].aggregated.pathway.id, "P2");
        assert_eq!(pathways[1].rank, 2);
        assert_eq!(pathways[2].aggregated.pathway.id, "P3");
        assert_eq!(pathways[2].rank, 3);
    }

    #[test]
    fn interaction_canonicalizes_pair_order() {
        let a = Interaction::new("B", "A", 0.9, EvidenceChannels::default());
        let b = Interaction::new("A", "B", 0.9, EvidenceChannels::default());
        assert_eq!(a.edge_key(), b.edge_key());
    }

    #[test]
    fn neighborhood_size_is_seeds_plus_neighbors() {
        let n = Neighborhood {
            seeds: vec![Gene::fallback("TP53", "TP53", "human")],
            neighbors: vec![Gene::fallback("MDM2", "MDM2", "human")],
            interactions: vec![],
            contributions: HashMap::new(),
            sources: HashMap::new(),
        };
        assert_eq!(n.size(), 2);
    }
}
