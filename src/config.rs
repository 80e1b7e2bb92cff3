//! Pipeline configuration (spec §6, §9 Open Questions; ambient stack §4.C of
//! SPEC_FULL.md). Mirrors `NETSConfig`/`PipelineConfig` from the Python
//! source this pipeline was ported from: one flat, validated settings
//! struct, snapshotted (deep-cloned) into the orchestrator at construction
//! so per-run overrides never leak across analyses.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::PipelineError;

/// Execution-mode presets balancing speed vs. statistical rigor, ported from
/// `pipeline_config.py::PipelineMode`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineMode {
    UltraFast,
    Fast,
    Balanced,
    Rigorous,
}

impl Default for PipelineMode {
    fn default() -> Self {
        PipelineMode::Balanced
    }
}

/// Per-provider retry/backoff/rate-limit/concurrency knobs (spec §4.C2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub backoff_multiplier: f64,
    pub max_delay: Duration,
    pub request_timeout: Duration,
    /// Sustained requests/second for the token bucket.
    pub rate_per_second: u32,
    /// Token-bucket burst capacity.
    pub burst: u32,
    /// Bound on simultaneous in-flight requests to this provider.
    pub max_concurrency: usize,
}

impl Default for ProviderPolicy {
    fn default() -> Self {
        ProviderPolicy {
            max_attempts: 3,
            initial_delay: Duration::from_millis(250),
            backoff_multiplier: 2.0,
            max_delay: Duration::from_secs(10),
            request_timeout: Duration::from_secs(20),
            rate_per_second: 5,
            burst: 5,
            max_concurrency: 8,
        }
    }
}

/// Per-namespace cache TTLs (spec §9 Open Question: the original's TTLs
/// diverge per call site — 24h for most, 7d for epigenomic data; the target
/// makes this explicit per-namespace configuration instead of a hardcoded
/// constant per client).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    pub default_ttl: Duration,
    pub namespace_ttls: HashMap<String, Duration>,
    pub max_size_bytes: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        let mut namespace_ttls = HashMap::new();
        namespace_ttls.insert("epigenomic".to_string(), Duration::from_secs(7 * 24 * 3600));
        CacheConfig {
            default_ttl: Duration::from_secs(24 * 3600),
            namespace_ttls,
            max_size_bytes: 500 * 1024 * 1024,
        }
    }
}

impl CacheConfig {
    pub fn ttl_for(&self, namespace: &str) -> Duration {
        self.namespace_ttls
            .get(namespace)
            .copied()
            .unwrap_or(self.default_ttl)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregationStrategy {
    Intersection,
    Frequency,
    Weighted,
}

/// Full pipeline configuration. Constructed once via [`Config::for_mode`] or
/// [`Config::default`], then optionally adjusted with [`Config::apply_overrides`]
/// before being deep-cloned into the orchestrator snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub mode: PipelineMode,
    pub target_species: String,

    // Neighborhood (S1)
    pub string_neighbor_count: usize,
    pub string_score_threshold: f64,
    pub neighborhood_max_workers: usize,

    // Enrichment (S2a/S2b)
    pub fdr_threshold: f64,
    pub db_weights: HashMap<String, f64>,
    pub top_hypotheses_count: usize,
    pub seed_overlap_threshold: f64,
    pub secondary_max_workers: usize,

    // Literature (C7)
    pub pubmed_max_results: usize,
    pub literature_relevance_threshold: f64,
    pub literature_search_budget_per_pathway: usize,
    pub generic_pathway_terms: Vec<String>,

    // Aggregation (S2c)
    pub min_support_threshold: usize,
    pub aggregation_strategy: AggregationStrategy,

    // Semantic filter (S4a/S5c)
    pub semantic_relevance_threshold: f64,
    pub disease_context: Option<String>,
    pub disease_synonyms: Vec<String>,
    pub disease_synonym_boost: f64,
    pub enforce_final_name_filter: bool,
    pub semantic_max_workers: usize,

    // Redundancy (S4b)
    pub enable_redundancy_detection: bool,
    pub redundancy_jaccard_threshold: f64,

    // Enhanced validators (S4c)
    pub enhanced_validation_top_k: usize,
    pub tissue_expression_validation: bool,
    pub min_cardiac_expression_ratio: f64,
    pub permutation_test_enabled: bool,
    pub min_permutations: usize,
    pub max_permutations: usize,
    pub validator_max_workers: usize,
    pub druggability_analysis: bool,

    // Seed tracer (S5b)
    pub seed_trace_top_m: usize,
    pub seed_trace_max_workers: usize,

    // Resilience
    pub require_all_providers: bool,
    /// Per-provider retry/rate-limit/timeout knobs, keyed by the provider
    /// names in `crate::providers::ALL_PROVIDER_NAMES`. Looked up through
    /// [`Config::policy_for`], which falls back to `ProviderPolicy::default()`
    /// for any name not present in the map.
    pub provider_policies: HashMap<String, ProviderPolicy>,
    pub cache: CacheConfig,

    /// Hard deadline for the whole run, threaded through every provider call
    /// as a cancellation point (spec §5).
    pub overall_deadline: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Config::for_mode(PipelineMode::Balanced)
    }
}

impl Config {
    pub fn for_mode(mode: PipelineMode) -> Self {
        let mut db_weights = HashMap::new();
        db_weights.insert("REAC".to_string(), 2.0);
        db_weights.insert("KEGG".to_string(), 1.8);
        db_weights.insert("WP".to_string(), 1.5);
        db_weights.insert("GO:BP".to_string(), 1.3);

        let (min_permutations, max_permutations, neighborhood_max_workers, fdr_threshold, min_cardiac_expression_ratio) =
            match mode {
                PipelineMode::UltraFast => (25, 50, 12, 0.10, 0.1),
                PipelineMode::Fast => (50, 100, 8, 0.05, 0.2),
                PipelineMode::Balanced => (100, 500, 6, 0.05, 0.30),
                PipelineMode::Rigorous => (500, 1000, 4, 0.01, 0.30),
            };

        Config {
            mode,
            target_species: "human".to_string(),

            string_neighbor_count: 100,
            string_score_threshold: 0.70,
            neighborhood_max_workers,

            fdr_threshold,
            db_weights,
            top_hypotheses_count: 20,
            seed_overlap_threshold: 0.5,
            secondary_max_workers: 6,

            pubmed_max_results: 50,
            literature_relevance_threshold: 0.40,
            literature_search_budget_per_pathway: 8,
            generic_pathway_terms: default_generic_pathway_terms(),

            min_support_threshold: 1,
            aggregation_strategy: AggregationStrategy::Weighted,

            semantic_relevance_threshold: 0.15,
            disease_context: None,
            disease_synonyms: Vec::new(),
            disease_synonym_boost: 0.15,
            enforce_final_name_filter: true,
            semantic_max_workers: 6,

            enable_redundancy_detection: true,
            redundancy_jaccard_threshold: 0.7,

            enhanced_validation_top_k: 25,
            tissue_expression_validation: true,
            min_cardiac_expression_ratio,
            permutation_test_enabled: true,
            min_permutations,
            max_permutations,
            validator_max_workers: 6,
            druggability_analysis: true,

            seed_trace_top_m: 10,
            seed_trace_max_workers: 4,

            require_all_providers: false,
            provider_policies: crate::providers::ALL_PROVIDER_NAMES
                .iter()
                .map(|name| (name.to_string(), ProviderPolicy::default()))
                .collect(),
            cache: CacheConfig::default(),

            overall_deadline: Duration::from_secs(600),
        }
    }

    pub fn db_weight(&self, source_db: &str) -> f64 {
        self.db_weights.get(source_db).copied().unwrap_or(1.0)
    }

    /// Resolves a provider's retry/rate-limit policy, falling back to
    /// `ProviderPolicy::default()` for a name with no explicit entry.
    pub fn policy_for(&self, provider: &str) -> ProviderPolicy {
        self.provider_policies.get(provider).cloned().unwrap_or_default()
    }

    /// Apply the closed set of overrides from spec §6. Unknown keys are a
    /// validation error — tighter than the original's "log and ignore".
    pub fn apply_overrides(&mut self, overrides: ConfigOverrides) -> Result<(), PipelineError> {
        macro_rules! set_if {
            ($field:ident) => {
                if let Some(v) = overrides.$field {
                    self.$field = v;
                }
            };
        }

        set_if!(string_neighbor_count);
        set_if!(string_score_threshold);
        set_if!(fdr_threshold);
        set_if!(top_hypotheses_count);
        set_if!(min_support_threshold);
        set_if!(pubmed_max_results);
        set_if!(literature_relevance_threshold);
        set_if!(semantic_relevance_threshold);
        set_if!(seed_overlap_threshold);
        set_if!(tissue_expression_validation);
        set_if!(min_cardiac_expression_ratio);
        set_if!(permutation_test_enabled);
        set_if!(druggability_analysis);
        set_if!(enforce_final_name_filter);
        set_if!(redundancy_jaccard_threshold);
        set_if!(enable_redundancy_detection);

        if let Some(n) = overrides.n_permutations {
            self.max_permutations = n;
            self.min_permutations = self.min_permutations.min(n);
        }
        if let Some(strategy) = overrides.aggregation_strategy {
            self.aggregation_strategy = strategy;
        }
        if let Some(ctx) = overrides.disease_context {
            self.disease_context = Some(ctx);
        }
        if let Some(syn) = overrides.disease_synonyms {
            self.disease_synonyms = syn;
        }

        self.validate()
    }

    fn validate(&self) -> Result<(), PipelineError> {
        if !(0.0..=1.0).contains(&self.fdr_threshold) {
            return Err(PipelineError::InvalidInput(format!(
                "fdr_threshold must be in [0,1], got {}",
                self.fdr_threshold
            )));
        }
        if !(0.0..=1.0).contains(&self.semantic_relevance_threshold) {
            return Err(PipelineError::InvalidInput(
                "semantic_relevance_threshold must be in [0,1]".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.redundancy_jaccard_threshold) {
            return Err(PipelineError::InvalidInput(
                "redundancy_jaccard_threshold must be in [0,1]".into(),
            ));
        }
        if self.min_support_threshold == 0 {
            return Err(PipelineError::InvalidInput(
                "min_support_threshold must be >= 1".into(),
            ));
        }
        if self.max_permutations < self.min_permutations {
            return Err(PipelineError::InvalidInput(
                "max_permutations must be >= min_permutations".into(),
            ));
        }
        Ok(())
    }
}

fn default_generic_pathway_terms() -> Vec<String> {
    // Externally-curated in production (spec §9 Open Question); a small
    // representative default is carried so the pipeline is runnable without
    // an external data file.
    [
        "system process",
        "multicellular organismal process",
        "biological process",
        "cellular process",
        "metabolic process",
        "single-organism process",
        "biological regulation",
        "regulation of biological process",
        "cellular component organization",
        "localization",
        "response to stimulus",
        "developmental process",
        "multicellular organism development",
        "anatomical structure development",
        "cell differentiation",
        "tissue development",
        "organ development",
    ]
    .into_iter()
    .map(str::to_string)
    .collect()
}

/// Closed set of user-facing overrides accepted by [`Config::apply_overrides`]
/// (spec §6).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigOverrides {
    pub string_neighbor_count: Option<usize>,
    pub string_score_threshold: Option<f64>,
    pub fdr_threshold: Option<f64>,
    pub top_hypotheses_count: Option<usize>,
    pub min_support_threshold: Option<usize>,
    pub pubmed_max_results: Option<usize>,
    pub literature_relevance_threshold: Option<f64>,
    pub semantic_relevance_threshold: Option<f64>,
    pub seed_overlap_threshold: Option<f64>,
    pub tissue_expression_validation: Option<bool>,
    pub min_cardiac_expression_ratio: Option<f64>,
    pub permutation_test_enabled: Option<bool>,
    pub n_permutations: Option<usize>,
    pub druggability_analysis: Option<bool>,
    pub aggregation_strategy: Option<AggregationStrategy>,
    pub enforce_final_name_filter: Option<bool>,
    pub redundancy_jaccard_threshold: Option<f64>,
    pub enable_redundancy_detection: Option<bool>,
    pub disease_context: Option<String>,
    pub disease_synonyms: Option<Vec<String>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn modes_scale_permutations_and_fdr_together() {
        let fast = Config::for_mode(PipelineMode::UltraFast);
        let rigorous = Config::for_mode(PipelineMode::Rigorous);
        assert!(fast.max_permutations < rigorous.max_permutations);
        assert!(fast.fdr_threshold > rigorous.fdr_threshold);
    }

    #[test]
    fn apply_overrides_rejects_out_of_range_threshold() {
        let mut cfg = Config::default();
        let overrides = ConfigOverrides {
            fdr_threshold: Some(1.5),
            ..Default::default()
        };
        assert!(cfg.apply_overrides(overrides).is_err());
    }

    #[test]
    fn apply_overrides_updates_disease_context() {
        let mut cfg = Config::default();
        let overrides = ConfigOverrides {
            disease_context: Some("heart failure".to_string()),
            ..Default::default()
        };
        cfg.apply_overrides(overrides).unwrap();
        assert_eq!(cfg.disease_context.as_deref(), Some("heart failure"));
    }

    #[test]
    fn policy_for_unknown_provider_falls_back_to_default() {
        let cfg = Config::default();
        let default = ProviderPolicy::default();
        let fallback = cfg.policy_for("not_a_real_provider");
        assert_eq!(fallback.max_attempts, default.max_attempts);
        assert_eq!(fallback.rate_per_second, default.rate_per_second);
    }

    #[test]
    fn cache_config_falls_back_to_default_ttl() {
        let cache = CacheConfig::default();
        assert_eq!(cache.ttl_for("network"), cache.default_ttl);
        assert_ne!(cache.ttl_for("epigenomic"), cache.default_ttl);
    }
}
