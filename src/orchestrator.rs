//! Pipeline Orchestrator (spec §4.C15): sequences S0→S6, reports progress,
//! contains per-stage failures, and assembles the persisted result.
//!
//! Grounded in the original's `pipeline.py::PipelineOrchestrator.run_pipeline`
//! for the stage sequence and try/except-per-stage containment, and the
//! teacher's `#[tracing::instrument]`-per-call-site logging idiom.

use std::path::PathBuf;

use tokio::time::Instant;
use tracing::{info, instrument, warn};

use crate::cache::Cache;
use crate::config::{Config, ConfigOverrides};
use crate::error::{PipelineError, StageName};
use crate::model::{PipelineResult, SourceDb, StageRecord, TopGene};
use crate::providers::{self, Providers};
use crate::rate_limit::RateLimiterRegistry;
use crate::resilience::ProviderCaller;
use crate::stages::aggregator::Aggregator;
use crate::stages::id_normalizer::IdNormalizer;
use crate::stages::literature_expander::LiteratureExpander;
use crate::stages::neighborhood::NeighborhoodBuilder;
use crate::stages::primary_enrichment::PrimaryEnrichment;
use crate::stages::redundancy;
use crate::stages::scorer::Scorer;
use crate::stages::secondary_enrichment::SecondaryEnrichment;
use crate::stages::seed_tracer::SeedTracer;
use crate::stages::semantic_filter;
use crate::stages::top_genes::TopGeneAggregator;
use crate::stages::validators::Validators;

/// `Fn(stage_name, percent_complete 0..100, message)`, matching the
/// teacher's preference for a boxed trait-object callback over a generic
/// threaded through every stage signature (spec §6).
pub type ProgressSink = Box<dyn Fn(&str, u8, &str) + Send + Sync>;

const ENABLED_SOURCES: [SourceDb; 4] = [SourceDb::Reac, SourceDb::Kegg, SourceDb::Wp, SourceDb::GoBp];

fn noop_stage(stage: &str, count: u32) -> StageRecord {
    StageRecord { stage: stage.to_string(), input_count: count, output_count: count, dropped_count: 0, duration_ms: 0, warnings: Vec::new() }
}

pub struct Pipeline {
    providers: Providers,
    config: Config,
    cache: std::sync::Arc<Cache>,
    rate_limiters: RateLimiterRegistry,
    output_dir: PathBuf,
}

impl Pipeline {
    /// `config` is deep-cloned into an immutable snapshot here so later
    /// mutation of the caller's copy can never leak into an in-flight or
    /// future run (spec §9 "Singleton cache and settings" redesign flag).
    pub fn new(providers: Providers, config: Config, output_dir: impl Into<PathBuf>) -> Self {
        let cache = std::sync::Arc::new(Cache::new(config.cache.max_size_bytes));
        Pipeline {
            providers,
            config: config.clone(),
            cache,
            rate_limiters: RateLimiterRegistry::new(),
            output_dir: output_dir.into(),
        }
    }

    /// Builds the cache/rate-limit/retry bundle for one named provider
    /// (spec §4.C2/§4.C3), using the run's own config snapshot rather than
    /// `self.config` so per-run overrides are honored.
    fn caller(&self, config: &Config, namespace: &'static str) -> ProviderCaller {
        ProviderCaller::new(self.cache.clone(), &self.rate_limiters, config, namespace)
    }

    fn report_progress(progress: &Option<ProgressSink>, stage: &str, percent: u8, message: &str) {
        if let Some(sink) = progress {
            sink(stage, percent, message);
        }
    }

    /// Runs a mandatory stage: any error propagates, wrapped with stage
    /// context (spec §7: S0/S1/S2a/S2c/S3/S4a/S5c are mandatory).
    async fn mandatory<T, F>(analysis_id: uuid::Uuid, stage: StageName, fut: F) -> Result<T, PipelineError>
    where
        F: std::future::Future<Output = Result<T, PipelineError>>,
    {
        fut.await.map_err(|e| e.stage(analysis_id, stage))
    }

    pub async fn run(
        &self,
        seeds: Vec<String>,
        overrides: Option<ConfigOverrides>,
        progress: Option<ProgressSink>,
    ) -> Result<PipelineResult, PipelineError> {
        let analysis_id = uuid::Uuid::new_v4();

        if seeds.is_empty() {
            return Err(PipelineError::InvalidInput("seed list is empty".to_string()));
        }

        let mut config = self.config.clone();
        if let Some(overrides) = overrides {
            config.apply_overrides(overrides)?;
        }

        let deadline = Instant::now() + config.overall_deadline;
        let mut warnings: Vec<String> = Vec::new();
        let mut incomplete = false;

        info!(%analysis_id, seed_count = seeds.len(), "pipeline started");

        // S0: id normalization (mandatory).
        Self::report_progress(&progress, "s0_id_normalization", 0, "resolving seed identifiers");
        let normalizer = IdNormalizer::new(
            self.providers.id_resolver.clone(),
            self.caller(&config, providers::ID_RESOLVER),
            config.target_species.clone(),
        );
        let norm_start = Instant::now();
        let normalized =
            Self::mandatory(analysis_id, "s0", normalizer.normalize(&seeds, deadline)).await?;
        warnings.extend(normalized.warnings.clone());
        let stage_0 = StageRecord {
            stage: "s0_id_normalization".to_string(),
            input_count: seeds.len() as u32,
            output_count: normalized.valid.len() as u32,
            dropped_count: (seeds.len().saturating_sub(normalized.valid.len())) as u32,
            duration_ms: norm_start.elapsed().as_millis() as u64,
            warnings: normalized.warnings,
        };

        // S1: neighborhood expansion (mandatory).
        Self::report_progress(&progress, "s1_neighborhood", 10, "expanding functional neighborhood");
        let neighborhood_builder = NeighborhoodBuilder::new(
            self.providers.interactions.clone(),
            self.caller(&config, providers::INTERACTIONS),
            config.neighborhood_max_workers,
            config.string_neighbor_count as u32,
            config.string_score_threshold,
        );
        let s1_start = Instant::now();
        let neighborhood_result = Self::mandatory(
            analysis_id,
            "s1",
            neighborhood_builder.build(normalized.valid.clone(), analysis_id, deadline),
        )
        .await?;
        let neighborhood = neighborhood_result.neighborhood;
        warnings.extend(neighborhood_result.warnings.clone());
        let stage_1 = StageRecord {
            stage: "s1_neighborhood".to_string(),
            input_count: normalized.valid.len() as u32,
            output_count: neighborhood.size() as u32,
            dropped_count: 0,
            duration_ms: s1_start.elapsed().as_millis() as u64,
            warnings: neighborhood_result.warnings,
        };

        // S2a: primary enrichment (mandatory).
        Self::report_progress(&progress, "s2a_primary_enrichment", 20, "running primary enrichment");
        let primary_enrichment = PrimaryEnrichment::new(
            self.providers.enrichment.clone(),
            self.providers.known_pathways.clone(),
            self.caller(&config, providers::ENRICHMENT),
            self.caller(&config, providers::KNOWN_PATHWAYS),
        );
        let s2a_start = Instant::now();
        let primary_result = Self::mandatory(
            analysis_id,
            "s2a",
            primary_enrichment.run(&neighborhood, &ENABLED_SOURCES, &config, deadline),
        )
        .await?;
        warnings.extend(primary_result.warnings.clone());
        let stage_2a = StageRecord {
            stage: "s2a_primary_enrichment".to_string(),
            input_count: neighborhood.size() as u32,
            output_count: primary_result.primary_pathways.len() as u32,
            dropped_count: primary_result.known_pathways.len() as u32,
            duration_ms: s2a_start.elapsed().as_millis() as u64,
            warnings: primary_result.warnings,
        };

        // S2b: secondary enrichment (best-effort per spec §4 control flow;
        // its failure is absorbed into the S2c fallback path, not fatal).
        Self::report_progress(&progress, "s2b_secondary_enrichment", 35, "expanding top hypotheses");
        let literature_expander = LiteratureExpander::new(
            self.providers.literature.clone(),
            self.caller(&config, providers::LITERATURE),
            config.literature_search_budget_per_pathway,
            config.literature_relevance_threshold,
            config.generic_pathway_terms.clone(),
            config.require_all_providers,
        );
        let secondary_enrichment = SecondaryEnrichment::new(
            self.providers.enrichment.clone(),
            self.providers.known_pathways.clone(),
            literature_expander,
            self.caller(&config, providers::ENRICHMENT),
            self.caller(&config, providers::KNOWN_PATHWAYS),
            config.secondary_max_workers,
        );
        let s2b_start = Instant::now();
        let secondary_result = match secondary_enrichment
            .run(&primary_result.primary_pathways, &neighborhood, &ENABLED_SOURCES, &config, analysis_id, deadline)
            .await
        {
            Ok(result) => result,
            Err(err) => {
                warn!(%analysis_id, error = %err, "s2b secondary enrichment failed, continuing with no secondary groups");
                warnings.push(format!("s2b_secondary_enrichment degraded: {err}"));
                crate::stages::secondary_enrichment::SecondaryEnrichmentResult { groups: Vec::new(), warnings: Vec::new() }
            }
        };
        warnings.extend(secondary_result.warnings.clone());
        let stage_2b = StageRecord {
            stage: "s2b_secondary_enrichment".to_string(),
            input_count: primary_result.primary_pathways.len() as u32,
            output_count: secondary_result.groups.len() as u32,
            dropped_count: 0,
            duration_ms: s2b_start.elapsed().as_millis() as u64,
            warnings: secondary_result.warnings,
        };

        // S2c: rigorous aggregation (mandatory).
        Self::report_progress(&progress, "s2c_aggregation", 45, "aggregating across hypotheses");
        let s2c_start = Instant::now();
        let aggregated = Aggregator::aggregate(
            &secondary_result.groups,
            &primary_result.primary_pathways,
            primary_result.primary_pathways.len(),
            &config,
        );
        let stage_2c = StageRecord {
            stage: "s2c_aggregation".to_string(),
            input_count: secondary_result.groups.len() as u32,
            output_count: aggregated.len() as u32,
            dropped_count: (secondary_result.groups.len().saturating_sub(aggregated.len())) as u32,
            duration_ms: s2c_start.elapsed().as_millis() as u64,
            warnings: Vec::new(),
        };

        // S3: final scoring (mandatory).
        Self::report_progress(&progress, "s3_scoring", 55, "scoring pathways");
        let s3_start = Instant::now();
        let scored = Scorer::score(aggregated, &config);
        let stage_3 = StageRecord {
            stage: "s3_scoring".to_string(),
            input_count: scored.len() as u32,
            output_count: scored.len() as u32,
            dropped_count: 0,
            duration_ms: s3_start.elapsed().as_millis() as u64,
            warnings: Vec::new(),
        };

        // S4a: semantic filter (mandatory).
        Self::report_progress(&progress, "s4a_semantic_filter", 65, "scoring cardiac relevance");
        let s4a_start = Instant::now();
        let semantic_result = semantic_filter::apply_relevance_and_tiered_filter(scored, &config);
        let stage_4a = StageRecord {
            stage: "s4a_semantic_filter".to_string(),
            input_count: (semantic_result.kept.len() as u32) + semantic_result.dropped_count,
            output_count: semantic_result.kept.len() as u32,
            dropped_count: semantic_result.dropped_count,
            duration_ms: s4a_start.elapsed().as_millis() as u64,
            warnings: Vec::new(),
        };

        // S4b: redundancy filter (best-effort toggle; never fatal).
        Self::report_progress(&progress, "s4b_redundancy_filter", 72, "removing redundant pathways");
        let s4b_start = Instant::now();
        let (after_redundancy, redundancy_dropped) = if config.enable_redundancy_detection {
            redundancy::filter_redundant(semantic_result.kept, config.redundancy_jaccard_threshold)
        } else {
            (semantic_result.kept, 0)
        };
        let stage_4b = StageRecord {
            stage: "s4b_redundancy_filter".to_string(),
            input_count: (after_redundancy.len() as u32) + redundancy_dropped,
            output_count: after_redundancy.len() as u32,
            dropped_count: redundancy_dropped,
            duration_ms: s4b_start.elapsed().as_millis() as u64,
            warnings: Vec::new(),
        };

        // S4c: enhanced validators, top-K only (best-effort).
        Self::report_progress(&progress, "s4c_enhanced_validators", 80, "running enhanced validators");
        let validators = Validators::new(
            self.providers.tissue_expression.clone(),
            self.providers.disease_association.clone(),
            self.caller(&config, providers::TISSUE_EXPRESSION),
            self.caller(&config, providers::DISEASE_ASSOCIATION),
            config.validator_max_workers,
            config.require_all_providers,
        );
        let s4c_start = Instant::now();
        let interactions = neighborhood.interactions.clone();
        // No standalone genome-background provider exists among the C1
        // interfaces, so the functional neighborhood's own gene set stands
        // in for both the "observed" set and the permutation universe
        // (documented as an Open Question resolution in DESIGN.md).
        let universe: Vec<String> = neighborhood.all_symbols().into_iter().collect();
        let after_validation = if deadline > Instant::now() {
            let pre_validation = after_redundancy.clone();
            match validators.run(after_redundancy, &universe, &interactions, &config, analysis_id, deadline).await {
                Ok((validated, validator_warnings)) => {
                    warnings.extend(validator_warnings);
                    validated
                }
                Err(err) => {
                    warn!(%analysis_id, error = %err, "s4c enhanced validators failed, continuing with pre-validation pathways");
                    warnings.push(format!("s4c_enhanced_validators degraded: {err}"));
                    incomplete = true;
                    pre_validation
                }
            }
        } else {
            warnings.push("s4c_enhanced_validators skipped: deadline exceeded".to_string());
            incomplete = true;
            after_redundancy
        };
        let stage_4c = StageRecord {
            stage: "s4c_enhanced_validators".to_string(),
            input_count: after_validation.len() as u32,
            output_count: after_validation.len() as u32,
            dropped_count: 0,
            duration_ms: s4c_start.elapsed().as_millis() as u64,
            warnings: Vec::new(),
        };

        // S5a: literature citation check. Folded into S5b below — the only
        // literature-citation lookup spec §4 actually specifies is the
        // per-seed co-mention search of C14, so S5a's record is a pass-
        // through marker rather than a distinct lookup (see DESIGN.md).
        let stage_5a = noop_stage("s5a_literature_citations", after_validation.len() as u32);

        // S5b: seed tracing (best-effort).
        Self::report_progress(&progress, "s5b_seed_tracing", 88, "tracing seed gene literature support");
        let seed_tracer = SeedTracer::new(
            self.providers.literature.clone(),
            self.caller(&config, providers::LITERATURE),
            config.seed_trace_top_m,
            config.seed_trace_max_workers,
            config.generic_pathway_terms.clone(),
            config.require_all_providers,
        );
        let s5b_start = Instant::now();
        let pre_trace = after_validation.clone();
        let (traced, traced_warnings) = match seed_tracer.run(after_validation, analysis_id, deadline).await {
            Ok((traced, traced_warnings)) => (traced, traced_warnings),
            Err(err) => {
                warn!(%analysis_id, error = %err, "s5b seed tracing failed, continuing with untraced pathways");
                warnings.push(format!("s5b_seed_tracing degraded: {err}"));
                incomplete = true;
                (pre_trace, Vec::new())
            }
        };
        warnings.extend(traced_warnings.clone());
        let stage_5b = StageRecord {
            stage: "s5b_seed_tracing".to_string(),
            input_count: traced.len() as u32,
            output_count: traced.len() as u32,
            dropped_count: 0,
            duration_ms: s5b_start.elapsed().as_millis() as u64,
            warnings: traced_warnings,
        };

        // S5c: mandatory strict name filter.
        Self::report_progress(&progress, "s5c_mandatory_name_filter", 93, "applying mandatory cardiac name filter");
        let s5c_start = Instant::now();
        let (final_pathways, name_filter_dropped) = if config.enforce_final_name_filter {
            semantic_filter::apply_mandatory_name_filter(traced)
        } else {
            (traced, 0)
        };
        if name_filter_dropped > 0 && final_pathways.is_empty() {
            warnings.push("s5c_mandatory_name_filter removed all pathways".to_string());
        }
        let stage_5c = StageRecord {
            stage: "s5c_mandatory_name_filter".to_string(),
            input_count: (final_pathways.len() as u32) + name_filter_dropped,
            output_count: final_pathways.len() as u32,
            dropped_count: name_filter_dropped,
            duration_ms: s5c_start.elapsed().as_millis() as u64,
            warnings: Vec::new(),
        };

        // S6: top-gene aggregation.
        Self::report_progress(&progress, "s6_top_genes", 97, "aggregating important genes");
        let top_gene_aggregator = TopGeneAggregator::new(
            self.providers.disease_association.clone(),
            self.caller(&config, providers::DISEASE_ASSOCIATION),
            config.validator_max_workers,
            config.require_all_providers,
        );
        let s6_start = Instant::now();
        let (top_genes, top_gene_warnings): (Vec<TopGene>, Vec<String>) =
            match top_gene_aggregator.run(&final_pathways, analysis_id, deadline).await {
                Ok((genes, genes_warnings)) => (genes, genes_warnings),
                Err(err) => {
                    warn!(%analysis_id, error = %err, "s6 top-gene aggregation failed, continuing with no top genes");
                    warnings.push(format!("s6_top_genes degraded: {err}"));
                    incomplete = true;
                    (Vec::new(), Vec::new())
                }
            };
        warnings.extend(top_gene_warnings.clone());
        let stage_6 = StageRecord {
            stage: "s6_top_genes".to_string(),
            input_count: final_pathways.len() as u32,
            output_count: top_genes.len() as u32,
            dropped_count: 0,
            duration_ms: s6_start.elapsed().as_millis() as u64,
            warnings: top_gene_warnings,
        };

        let result = PipelineResult {
            analysis_id,
            stage_0,
            stage_1,
            stage_2a,
            stage_2b,
            stage_2c,
            stage_3,
            stage_4a,
            stage_4b,
            stage_4c,
            stage_5a,
            stage_5b,
            stage_5c,
            stage_6,
            pathways: final_pathways,
            top_genes,
            warnings,
            cache_stats: self.cache.stats(),
            incomplete,
        };

        if let Err(err) = self.persist(&result).await {
            warn!(%analysis_id, error = %err, "failed to persist results artifact");
        }

        Self::report_progress(&progress, "complete", 100, "pipeline complete");
        info!(%analysis_id, pathway_count = result.pathways.len(), "pipeline finished");
        Ok(result)
    }

    #[instrument(skip(self, result), fields(analysis_id = %result.analysis_id))]
    async fn persist(&self, result: &PipelineResult) -> Result<(), PipelineError> {
        let dir = self.output_dir.join(result.analysis_id.to_string());
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| PipelineError::ReportFailed(format!("creating output dir: {e}")))?;
        let path = dir.join("results.json");
        let bytes = serde_json::to_vec_pretty(result)
            .map_err(|e| PipelineError::ReportFailed(format!("serializing result: {e}")))?;
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| PipelineError::ReportFailed(format!("writing {}: {e}", path.display())))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineMode;
    use crate::model::{EvidenceChannels, Gene, Interaction, PathwayEntry};
    use crate::providers::testing::*;
    use std::collections::HashMap as Map;

    fn gene(symbol: &str) -> Gene {
        Gene::fallback(symbol, symbol, "human")
    }

    fn test_providers() -> Providers {
        let mut resolutions = Map::new();
        resolutions.insert("TP53".to_string(), gene("TP53"));

        let mut neighbors_by_symbol = Map::new();
        neighbors_by_symbol.insert(
            "TP53".to_string(),
            (
                vec![gene("MDM2")],
                vec![Interaction::new("TP53", "MDM2", 0.9, EvidenceChannels::default())],
            ),
        );

        let pathways = vec![PathwayEntry {
            id: "P1".to_string(),
            name: "Cardiac muscle contraction".to_string(),
            source_db: SourceDb::Reac,
            p_value: 1e-5,
            p_adj: 1e-4,
            evidence_count: 2,
            evidence_genes: vec!["TP53".to_string(), "MDM2".to_string()],
        }];

        Providers {
            id_resolver: std::sync::Arc::new(FakeIdResolver { resolutions, unavailable: vec![] }),
            interactions: std::sync::Arc::new(FakeInteractionProvider { neighbors_by_symbol }),
            enrichment: std::sync::Arc::new(FakeEnrichmentProvider { pathways }),
            known_pathways: std::sync::Arc::new(FakeKnownPathwayProvider { known: Some(Vec::new()) }),
            literature: std::sync::Arc::new(FakeLiteratureProvider::default()),
            tissue_expression: std::sync::Arc::new(FakeTissueExpressionProvider::default()),
            epigenomic: std::sync::Arc::new(FakeEpigenomicProvider::default()),
            disease_association: std::sync::Arc::new(FakeDiseaseAssociationProvider::default()),
        }
    }

    #[tokio::test]
    async fn empty_seed_list_is_rejected_before_any_stage() {
        let pipeline = Pipeline::new(test_providers(), Config::default(), std::env::temp_dir());
        let err = pipeline.run(Vec::new(), None, None).await.unwrap_err();
        assert!(matches!(err, PipelineError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn happy_path_produces_a_cardiac_pathway_and_persists_a_result() {
        let config = Config::for_mode(PipelineMode::UltraFast);
        let pipeline = Pipeline::new(test_providers(), config, std::env::temp_dir());
        let result = pipeline.run(vec!["TP53".to_string()], None, None).await.unwrap();
        assert!(!result.pathways.is_empty());
        assert_eq!(result.stage_0.output_count, 1);
    }
}
