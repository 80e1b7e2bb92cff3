//! Enhanced Validators (spec §4.C13, stage S4c, top-K only).
//!
//! Grounded in the original's `permutation_tester.py`
//! (`calculate_degree_preserving_pvalue`) for the null model and the
//! teacher's bounded-concurrency fan-out for per-pathway validator
//! scheduling. Every sub-validator writes into `score_components`/typed
//! record fields and never drops a pathway (spec §4.C13 preamble).
//!
//! Gene-set membership data (druggable/approved/clinical tiers, the tissue
//! expression fallback set) is hardcoded in production's source and is
//! explicitly an Open Question for external configuration (spec §9); the
//! constants below are a representative default, not curated biology.

use std::collections::{HashMap, HashSet};

use futures::stream::{self, StreamExt};
use rand::Rng;
use tokio::time::Instant;

use crate::config::Config;
use crate::error::PipelineError;
use crate::model::{DruggabilityRecord, DruggabilityTier, Interaction, PermutationRecord, ScoredPathway, TissueExpressionRecord};
use crate::providers::{DiseaseAssociationProvider, TissueExpressionProvider};
use crate::resilience::{self, ProviderCaller};

const FALLBACK_CARDIAC_EXPRESSED_GENES: &[&str] =
    &["TNNT2", "MYH7", "NPPA", "NPPB", "RYR2", "SCN5A", "PLN", "TTN", "MYBPC3", "GJA1"];

pub(crate) const APPROVED_DRUG_TARGETS: &[&str] = &["ACE", "ADRB1", "HMGCR", "SCN5A", "KCNH2"];
pub(crate) const CLINICAL_STAGE_TARGETS: &[&str] = &["RYR2", "TTN", "PLN"];
pub(crate) const DRUGGABLE_GENE_FAMILY: &[&str] =
    &["ACE", "ADRB1", "HMGCR", "SCN5A", "KCNH2", "RYR2", "TTN", "PLN", "CACNA1C", "KCNQ1"];

/// Degree histogram over a gene universe, binned into three tertiles so the
/// permutation null preserves each observed gene's connectivity class
/// (spec §4.C13 item 2 "degree bins").
pub struct DegreeBins {
    bin_of_gene: HashMap<String, usize>,
    genes_by_bin: HashMap<usize, Vec<String>>,
}

impl DegreeBins {
    pub fn build(universe: &[String], interactions: &[Interaction]) -> Self {
        let mut degree: HashMap<String, u32> = universe.iter().map(|g| (g.clone(), 0)).collect();
        for interaction in interactions {
            *degree.entry(interaction.gene_a.clone()).or_insert(0) += 1;
            *degree.entry(interaction.gene_b.clone()).or_insert(0) += 1;
        }

        let mut sorted_degrees: Vec<u32> = degree.values().copied().collect();
        sorted_degrees.sort_unstable();
        let tertile = |q: f64| -> u32 {
            if sorted_degrees.is_empty() {
                return 0;
            }
            let idx = ((sorted_degrees.len() as f64 - 1.0) * q).round() as usize;
            sorted_degrees[idx]
        };
        let low_bound = tertile(0.33);
        let high_bound = tertile(0.66);

        let bin_for = |d: u32| -> usize {
            if d <= low_bound {
                0
            } else if d <= high_bound {
                1
            } else {
                2
            }
        };

        let mut bin_of_gene = HashMap::new();
        let mut genes_by_bin: HashMap<usize, Vec<String>> = HashMap::new();
        for (gene, d) in degree {
            let bin = bin_for(d);
            bin_of_gene.insert(gene.clone(), bin);
            genes_by_bin.entry(bin).or_default().push(gene);
        }

        DegreeBins { bin_of_gene, genes_by_bin }
    }

    fn sample_preserving_bins(&self, observed_genes: &[String], universe: &[String]) -> HashSet<String> {
        let mut rng = rand::thread_rng();
        let mut sample = HashSet::new();
        for gene in observed_genes {
            let bin = self.bin_of_gene.get(gene).copied().unwrap_or(0);
            let pool = self.genes_by_bin.get(&bin).filter(|p| !p.is_empty());
            let chosen = match pool {
                Some(pool) => pool[rng.gen_range(0..pool.len())].clone(),
                None if !universe.is_empty() => universe[rng.gen_range(0..universe.len())].clone(),
                None => gene.clone(),
            };
            sample.insert(chosen);
        }
        sample
    }
}

/// Degree-preserving permutation test (spec §4.C13 item 2; SPEC_FULL.md §5
/// supplements the simpler uniform permutation with this). `universe` is
/// the gene population sampled from; the pipeline has no standalone
/// "genome background" provider, so the orchestrator passes the functional
/// neighborhood's own gene set as the universe (documented in DESIGN.md).
pub fn permutation_test(
    pathway_genes: &HashSet<String>,
    functional_neighborhood: &[String],
    universe: &[String],
    bins: &DegreeBins,
    min_permutations: usize,
    max_permutations: usize,
) -> PermutationRecord {
    let observed_overlap = functional_neighborhood.iter().filter(|g| pathway_genes.contains(*g)).count() as u32;

    let mut null_overlaps: Vec<u32> = Vec::new();
    let mut ge_count = 0u32;
    let mut n_run = 0usize;

    for i in 1..=max_permutations.max(1) {
        let sample = bins.sample_preserving_bins(functional_neighborhood, universe);
        let null_overlap = sample.iter().filter(|g| pathway_genes.contains(*g)).count() as u32;
        null_overlaps.push(null_overlap);
        if null_overlap >= observed_overlap {
            ge_count += 1;
        }
        n_run = i;

        if i >= min_permutations {
            let p = (ge_count as f64 + 1.0) / (i as f64 + 1.0);
            if p < 0.001 || p > 0.1 {
                break;
            }
        }
    }

    let empirical_p = (ge_count as f64 + 1.0) / (n_run as f64 + 1.0);
    let mean = null_overlaps.iter().sum::<u32>() as f64 / null_overlaps.len().max(1) as f64;
    let variance = null_overlaps.iter().map(|v| (*v as f64 - mean).powi(2)).sum::<f64>() / null_overlaps.len().max(1) as f64;
    let std_dev = variance.sqrt();
    let z_score = if std_dev > 0.0 { Some((observed_overlap as f64 - mean) / std_dev) } else { None };

    PermutationRecord { observed_overlap, n_permutations_run: n_run as u32, empirical_p, z_score }
}

fn druggability(pathway_genes: &[String]) -> DruggabilityRecord {
    let gene_set: HashSet<&String> = pathway_genes.iter().collect();
    let approved_count = APPROVED_DRUG_TARGETS.iter().filter(|g| gene_set.contains(&g.to_string())).count() as u32;
    let clinical_count = CLINICAL_STAGE_TARGETS.iter().filter(|g| gene_set.contains(&g.to_string())).count() as u32;
    let druggable_count = DRUGGABLE_GENE_FAMILY.iter().filter(|g| gene_set.contains(&g.to_string())).count();
    let druggable_ratio = if pathway_genes.is_empty() { 0.0 } else { druggable_count as f64 / pathway_genes.len() as f64 };

    let tier = if druggable_ratio >= 0.3 && approved_count >= 2 {
        DruggabilityTier::High
    } else if druggable_ratio >= 0.2 || approved_count >= 1 {
        DruggabilityTier::Medium
    } else {
        DruggabilityTier::Low
    };

    DruggabilityRecord { druggable_ratio, approved_count, clinical_count, tier: Some(tier) }
}

pub struct Validators {
    tissue_expression: std::sync::Arc<dyn TissueExpressionProvider>,
    disease_association: std::sync::Arc<dyn DiseaseAssociationProvider>,
    tissue_caller: ProviderCaller,
    disease_caller: ProviderCaller,
    max_workers: usize,
    require_all_providers: bool,
}

impl Validators {
    pub fn new(
        tissue_expression: std::sync::Arc<dyn TissueExpressionProvider>,
        disease_association: std::sync::Arc<dyn DiseaseAssociationProvider>,
        tissue_caller: ProviderCaller,
        disease_caller: ProviderCaller,
        max_workers: usize,
        require_all_providers: bool,
    ) -> Self {
        Validators {
            tissue_expression,
            disease_association,
            tissue_caller,
            disease_caller,
            max_workers,
            require_all_providers,
        }
    }

    /// Mean `DiseaseAssociationProvider` score across a pathway's evidence
    /// genes — the `cardiac_disease_score` field of `ScoredPathway` (spec
    /// §3). Distinct from the per-gene score `top_genes` looks up directly
    /// for its own disease bonus.
    async fn cardiac_disease_score(
        caller: &ProviderCaller,
        provider: &dyn DiseaseAssociationProvider,
        genes: &[String],
        deadline: Instant,
        require_all_providers: bool,
        warnings: &mut Vec<String>,
    ) -> Result<f64, PipelineError> {
        if genes.is_empty() {
            return Ok(0.0);
        }
        let mut total = 0.0;
        for gene in genes {
            let cache_key = serde_json::json!({ "gene": gene });
            let result =
                caller.call(deadline, &cache_key, || async move { provider.score(gene).await }).await;
            let score = match result {
                Ok(score) => score,
                Err(err) if require_all_providers => return Err(err),
                Err(err) => {
                    warnings.push(format!("s4c_validators: disease association score for `{gene}` failed: {err}"));
                    0.0
                }
            };
            total += score;
        }
        Ok(total / genes.len() as f64)
    }

    async fn tissue_expression_record(
        caller: &ProviderCaller,
        provider: &dyn TissueExpressionProvider,
        genes: &[String],
        min_ratio: f64,
        deadline: Instant,
        require_all_providers: bool,
        warnings: &mut Vec<String>,
    ) -> Result<TissueExpressionRecord, PipelineError> {
        let mut profiles: HashMap<String, f64> = HashMap::new();
        for gene in genes {
            let cache_key = serde_json::json!({ "gene": gene });
            let result = caller
                .call(deadline, &cache_key, || async move { provider.cardiac_profile(gene).await })
                .await;
            match result {
                Ok(Some(profile)) => {
                    profiles.insert(gene.clone(), profile.specificity_ratio);
                }
                Ok(None) => {}
                Err(err) if require_all_providers => return Err(err),
                Err(err) => {
                    warnings.push(format!("s4c_validators: tissue expression for `{gene}` failed: {err}"));
                }
            }
        }

        if profiles.is_empty() {
            let fallback: HashSet<&str> = FALLBACK_CARDIAC_EXPRESSED_GENES.iter().copied().collect();
            let expressed = genes.iter().filter(|g| fallback.contains(g.as_str())).count();
            let ratio = if genes.is_empty() { 0.0 } else { expressed as f64 / genes.len() as f64 };
            return Ok(TissueExpressionRecord {
                cardiac_expression_ratio: ratio,
                validation_passed: ratio >= min_ratio,
                used_fallback_set: true,
            });
        }

        let expressed = profiles.values().filter(|ratio| **ratio >= min_ratio).count();
        let ratio = expressed as f64 / genes.len().max(1) as f64;
        Ok(TissueExpressionRecord {
            cardiac_expression_ratio: ratio,
            validation_passed: ratio >= min_ratio,
            used_fallback_set: false,
        })
    }

    /// Runs all three sub-validators over the top `config.enhanced_validation_top_k`
    /// pathways in bounded parallel. Pathways beyond the top-K are returned
    /// untouched.
    pub async fn run(
        &self,
        mut pathways: Vec<ScoredPathway>,
        functional_neighborhood: &[String],
        interactions: &[Interaction],
        config: &Config,
        analysis_id: uuid::Uuid,
        deadline: Instant,
    ) -> Result<(Vec<ScoredPathway>, Vec<String>), PipelineError> {
        let top_k = config.enhanced_validation_top_k.min(pathways.len());
        let (head, tail) = pathways.split_at_mut(top_k);
        let universe = functional_neighborhood.to_vec();
        let bins = std::sync::Arc::new(DegreeBins::build(&universe, interactions));

        let tissue_enabled = config.tissue_expression_validation;
        let min_ratio = config.min_cardiac_expression_ratio;
        let permutation_enabled = config.permutation_test_enabled;
        let min_permutations = config.min_permutations;
        let max_permutations = config.max_permutations;
        let druggability_enabled = config.druggability_analysis;
        let require_all_providers = self.require_all_providers;

        let tissue_provider = self.tissue_expression.clone();
        let disease_provider = self.disease_association.clone();
        let tissue_caller = self.tissue_caller.clone();
        let disease_caller = self.disease_caller.clone();
        let results = stream::iter(head.iter().cloned())
            .map(|mut pathway| {
                let bins = bins.clone();
                let universe = universe.clone();
                let tissue_provider = tissue_provider.clone();
                let disease_provider = disease_provider.clone();
                let tissue_caller = tissue_caller.clone();
                let disease_caller = disease_caller.clone();
                async move {
                    resilience::check_deadline(analysis_id, "s4c_validators", deadline)?;

                    let mut warnings = Vec::new();
                    let genes = pathway.evidence_genes().to_vec();
                    let gene_set: HashSet<String> = genes.iter().cloned().collect();

                    pathway.cardiac_disease_score = Validators::cardiac_disease_score(
                        &disease_caller,
                        disease_provider.as_ref(),
                        &genes,
                        deadline,
                        require_all_providers,
                        &mut warnings,
                    )
                    .await?;

                    if tissue_enabled {
                        pathway.tissue_expression = Some(
                            Validators::tissue_expression_record(
                                &tissue_caller,
                                tissue_provider.as_ref(),
                                &genes,
                                min_ratio,
                                deadline,
                                require_all_providers,
                                &mut warnings,
                            )
                            .await?,
                        );
                    }

                    if permutation_enabled {
                        let record = permutation_test(&gene_set, &universe, &universe, &bins, min_permutations, max_permutations);
                        pathway.score_components.insert("permutation_empirical_p".to_string(), record.empirical_p);
                        pathway.permutation = Some(record);
                    }

                    if druggability_enabled {
                        let record = druggability(&genes);
                        pathway.score_components.insert("druggable_ratio".to_string(), record.druggable_ratio);
                        pathway.druggability = Some(record);
                    }

                    Ok((pathway, warnings))
                }
            })
            .buffer_unordered(self.max_workers.max(1))
            .collect::<Vec<Result<(ScoredPathway, Vec<String>), PipelineError>>>()
            .await;

        let mut validated = Vec::with_capacity(results.len());
        let mut warnings = Vec::new();
        for result in results {
            let (pathway, local_warnings) = result?;
            validated.push(pathway);
            warnings.extend(local_warnings);
        }

        let mut by_id: HashMap<String, ScoredPathway> =
            validated.into_iter().map(|p| (p.aggregated.pathway.id.clone(), p)).collect();

        let mut result: Vec<ScoredPathway> = Vec::with_capacity(head.len() + tail.len());
        for p in head.iter() {
            if let Some(validated) = by_id.remove(&p.aggregated.pathway.id) {
                result.push(validated);
            }
        }
        result.extend(tail.iter().cloned());
        pathways.clear();
        Ok((result, warnings))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empirical_p_is_never_exactly_zero() {
        let genes = vec!["A".to_string(), "B".to_string()];
        let universe: Vec<String> = ('A'..='T').map(|c| c.to_string()).collect();
        let interactions = vec![];
        let bins = DegreeBins::build(&universe, &interactions);
        let pathway_genes: HashSet<String> = genes.iter().cloned().collect();
        let record = permutation_test(&pathway_genes, &genes, &universe, &bins, 50, 100);
        assert!(record.empirical_p > 0.0);
        assert!(record.empirical_p <= 1.0);
    }

    #[test]
    fn druggability_tier_high_requires_ratio_and_approved_count() {
        let genes = vec!["ACE".to_string(), "ADRB1".to_string(), "SCN5A".to_string()];
        let record = druggability(&genes);
        assert_eq!(record.tier, Some(DruggabilityTier::High));
    }

    #[test]
    fn druggability_tier_low_for_unrelated_genes() {
        let genes = vec!["FOO1".to_string(), "FOO2".to_string()];
        let record = druggability(&genes);
        assert_eq!(record.tier, Some(DruggabilityTier::Low));
    }
}
