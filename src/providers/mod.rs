//! Provider interfaces (spec §4.C1): the eight abstract contracts the core
//! consumes. Concrete transports (HTTP, local library) live behind these
//! traits and are explicitly out of scope here — `testing` supplies
//! deterministic fakes for the stage/orchestrator test suites.
//!
//! Narrow, per-source client traits expressed as `async_trait` interfaces so
//! the core depends on capability, not transport.

pub mod testing;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::PipelineError;
use crate::model::{Gene, Interaction, PathwayEntry};

/// Provider names, shared by `Config::provider_policies`, `RateLimiterRegistry`,
/// and `Cache` namespacing so the three agree on identity (spec §4.C2/§4.C3).
pub const ID_RESOLVER: &str = "id_resolver";
pub const INTERACTIONS: &str = "interactions";
pub const ENRICHMENT: &str = "enrichment";
pub const KNOWN_PATHWAYS: &str = "known_pathways";
pub const LITERATURE: &str = "literature";
pub const TISSUE_EXPRESSION: &str = "tissue_expression";
pub const EPIGENOMIC: &str = "epigenomic";
pub const DISEASE_ASSOCIATION: &str = "disease_association";

pub const ALL_PROVIDER_NAMES: &[&str] = &[
    ID_RESOLVER,
    INTERACTIONS,
    ENRICHMENT,
    KNOWN_PATHWAYS,
    LITERATURE,
    TISSUE_EXPRESSION,
    EPIGENOMIC,
    DISEASE_ASSOCIATION,
];

/// `IdResolver.resolve` outcome: either a resolved gene or an explicit
/// not-found (distinct from a provider error, which is retried/contained by
/// C2 rather than surfaced here).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ResolveOutcome {
    Found(Gene),
    NotFound,
}

/// Resolves raw identifiers to canonical genes. Must be idempotent and
/// side-effect-free modulo cache (spec §4.C1 item 1).
#[async_trait]
pub trait IdResolver: Send + Sync {
    async fn resolve(&self, raw_id: &str) -> Result<ResolveOutcome, PipelineError>;
}

/// Returns up to `max_neighbors` interaction partners of `gene` at combined
/// score ≥ `min_score`, plus the interaction edges (spec §4.C1 item 2).
#[async_trait]
pub trait InteractionProvider: Send + Sync {
    async fn neighbors(
        &self,
        gene: &Gene,
        min_score: f64,
        max_neighbors: u32,
    ) -> Result<(Vec<Gene>, Vec<Interaction>), PipelineError>;
}

/// Functional enrichment over a gene set. Must return results sorted by
/// `p_adj` ascending with entries above `fdr_threshold` already excluded
/// (spec §4.C1 item 3).
#[async_trait]
pub trait EnrichmentProvider: Send + Sync {
    async fn enrich(
        &self,
        genes: &[String],
        sources: &[crate::model::SourceDb],
        fdr_threshold: f64,
    ) -> Result<Vec<PathwayEntry>, PipelineError>;
}

/// Novelty-filter lookup: pathways already known to be annotated on a gene
/// set. An empty result is ambiguous ("unknown") and must never be treated
/// as "none known" (spec §4.C1 item 4).
#[async_trait]
pub trait KnownPathwayProvider: Send + Sync {
    async fn pathways_for(&self, genes: &[String]) -> Result<Option<Vec<String>>, PipelineError>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiteratureRecord {
    pub pmid: String,
    pub title: String,
    pub abstract_text: String,
    pub year: Option<i32>,
    pub authors: Vec<String>,
    pub citation_count: Option<u32>,
}

/// Full-text/abstract literature search (spec §4.C1 item 5).
#[async_trait]
pub trait LiteratureProvider: Send + Sync {
    async fn search(&self, query: &str, max_results: u32) -> Result<Vec<LiteratureRecord>, PipelineError>;
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CardiacExpressionProfile {
    pub median_tpm: f64,
    pub specificity_ratio: f64,
}

/// Cardiac tissue expression lookup (spec §4.C1 item 6). `None` means
/// no-data, not zero-expression.
#[async_trait]
pub trait TissueExpressionProvider: Send + Sync {
    async fn cardiac_profile(&self, gene: &str) -> Result<Option<CardiacExpressionProfile>, PipelineError>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegulatoryProfile {
    pub has_cardiac_regulatory: bool,
    pub regulatory_score: f64,
    pub marks: Vec<String>,
}

/// Cardiac-relevant epigenomic annotation lookup (spec §4.C1 item 7).
#[async_trait]
pub trait EpigenomicProvider: Send + Sync {
    async fn regulatory(&self, gene: &str) -> Result<Option<RegulatoryProfile>, PipelineError>;
}

/// Cardiac disease-association score in `[0,1]` (spec §4.C1 item 8).
#[async_trait]
pub trait DiseaseAssociationProvider: Send + Sync {
    async fn score(&self, gene: &str) -> Result<f64, PipelineError>;
}

/// The full bundle of providers a pipeline run is constructed with. Grouped
/// behind `Arc` so the orchestrator can hand clones to bounded worker pools
/// without lifetime entanglement.
pub struct Providers {
    pub id_resolver: std::sync::Arc<dyn IdResolver>,
    pub interactions: std::sync::Arc<dyn InteractionProvider>,
    pub enrichment: std::sync::Arc<dyn EnrichmentProvider>,
    pub known_pathways: std::sync::Arc<dyn KnownPathwayProvider>,
    pub literature: std::sync::Arc<dyn LiteratureProvider>,
    pub tissue_expression: std::sync::Arc<dyn TissueExpressionProvider>,
    pub epigenomic: std::sync::Arc<dyn EpigenomicProvider>,
    pub disease_association: std::sync::Arc<dyn DiseaseAssociationProvider>,
}
