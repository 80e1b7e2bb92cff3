//! Rigorous Aggregator (spec §4.C9, stage S2c).
//!
//! Grounded in the original's `pathway_aggregator_rigorous.py`; the
//! chi-square CDF backing Fisher's combined p-value is computed with
//! `statrs` in place of `scipy.stats.chi2.cdf` (SPEC_FULL.md §5).

use std::collections::HashSet;

use statrs::distribution::{ChiSquared, ContinuousCDF};

use crate::config::{AggregationStrategy, Config};
use crate::model::{AggregatedPathway, ScoredPathwayEntry, SecondaryInstance};
use crate::stages::secondary_enrichment::SecondaryGroup;

/// Fisher's method: χ² = −2·Σ ln(p_i) over `p_values` with p_i>0, df=2k.
/// combined_p = 1 − CDF(χ²_df). Returns the lone p-value when k=1 (spec
/// §4.C8/§GLOSSARY, tested against spec §8 scenarios 3 and the testable
/// properties of §8: k=1 returns the input p; k≥2 with all p_i=1e-10 gives
/// combined_p ≤ min(p_i)).
pub fn fisher_combined_p(p_values: &[f64]) -> f64 {
    let positive: Vec<f64> = p_values.iter().copied().filter(|p| *p > 0.0).collect();
    if positive.is_empty() {
        return 1.0;
    }
    if positive.len() == 1 {
        return positive[0];
    }
    let chi_sq: f64 = -2.0 * positive.iter().map(|p| p.ln()).sum::<f64>();
    let df = 2 * positive.len();
    let dist = ChiSquared::new(df as f64).expect("positive degrees of freedom");
    (1.0 - dist.cdf(chi_sq)).clamp(0.0, 1.0)
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

fn std_dev(values: &[f64], mean_value: f64) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let variance = values.iter().map(|v| (v - mean_value).powi(2)).sum::<f64>() / values.len() as f64;
    variance.sqrt()
}

/// 1 − coefficient of variation, clamped to `[0,1]`; 1.0 for a single
/// instance (spec §GLOSSARY "Consistency score").
pub fn consistency_score(nes_values: &[f64]) -> f64 {
    if nes_values.len() <= 1 {
        return 1.0;
    }
    let m = mean(nes_values);
    if m == 0.0 {
        return 0.0;
    }
    (1.0 - std_dev(nes_values, m) / m).max(0.0)
}

pub struct Aggregator;

impl Aggregator {
    /// Converts S2b groups into `AggregatedPathway`s (spec §4.C9). When
    /// `groups` is empty, falls back to converting the top primaries
    /// directly with `support_count=1`, `support_fraction=1`,
    /// `confidence=0.5` (the fallback marker).
    pub fn aggregate(
        groups: &[SecondaryGroup],
        primaries: &[ScoredPathwayEntry],
        total_primaries: usize,
        config: &Config,
    ) -> Vec<AggregatedPathway> {
        if groups.is_empty() {
            return primaries
                .iter()
                .map(|primary| AggregatedPathway {
                    pathway: primary.pathway.clone(),
                    support_count: 1,
                    source_primary_pathways: primary.source_primary_pathway.clone().into_iter().collect(),
                    source_secondary_pathways: Vec::new(),
                    aggregation_score: primary.preliminary_nes,
                    combined_p_value: primary.pathway.p_value,
                    aggregated_nes: primary.preliminary_nes,
                    consistency_score: 1.0,
                    confidence_score: 0.5,
                    support_fraction: 1.0,
                    contributing_seed_genes: primary.contributing_seed_genes.clone(),
                })
                .collect();
        }

        let total_primaries = total_primaries.max(1);

        let mut aggregated: Vec<AggregatedPathway> = groups
            .iter()
            .filter(|g| {
                g.instances.iter().any(|i| i.pathway.p_adj <= 0.05 && i.preliminary_nes.abs() >= 1.0)
            })
            .map(|group| {
                let instances: Vec<&ScoredPathwayEntry> = group
                    .instances
                    .iter()
                    .filter(|i| i.pathway.p_adj <= 0.05 && i.preliminary_nes.abs() >= 1.0)
                    .collect();

                let nes_values: Vec<f64> = instances.iter().map(|i| i.preliminary_nes).collect();

                // Ported from `pathway_aggregator.py`'s strategy branch: `weighted`
                // is the rigorous, evidence/db-weighted mean (the default and the
                // only strategy with a statistical weighting scheme); `frequency`
                // and `intersection` fall back to the original's simpler plain
                // mean, differing only in downstream filtering (min_support is
                // applied uniformly below regardless of strategy).
                let aggregated_nes = match config.aggregation_strategy {
                    AggregationStrategy::Weighted => {
                        let weights: Vec<f64> = instances
                            .iter()
                            .map(|i| {
                                let db_weight = config.db_weight(i.pathway.source_db.as_str());
                                (-(i.pathway.p_adj.max(1e-300).log10()))
                                    * ((i.pathway.evidence_count as f64 + 1.0).ln())
                                    * db_weight
                            })
                            .collect();
                        let weight_sum: f64 = weights.iter().sum::<f64>().max(1e-12);
                        nes_values.iter().zip(weights.iter()).map(|(nes, w)| nes * w / weight_sum).sum()
                    }
                    AggregationStrategy::Frequency | AggregationStrategy::Intersection => mean(&nes_values),
                };
                let weighted_nes = aggregated_nes;

                let p_values: Vec<f64> = instances.iter().map(|i| i.pathway.p_value).collect();
                let combined_p = fisher_combined_p(&p_values);
                let consistency = consistency_score(&nes_values);

                let source_primary_pathways: HashSet<String> =
                    instances.iter().filter_map(|i| i.source_primary_pathway.clone()).collect();
                let support_count = source_primary_pathways.len() as u32;
                let support_fraction = (support_count as f64 / total_primaries as f64).min(1.0);

                let confidence = 0.30 * support_fraction
                    + 0.30 * (1.0 - combined_p)
                    + 0.25 * (weighted_nes / 100.0).min(1.0)
                    + 0.15 * consistency;

                let source_secondary_pathways: Vec<SecondaryInstance> = instances
                    .iter()
                    .map(|i| SecondaryInstance {
                        pathway_id: i.pathway.id.clone(),
                        pathway_name: i.pathway.name.clone(),
                        source_db: i.pathway.source_db,
                        p_adj: i.pathway.p_adj,
                        preliminary_nes: i.preliminary_nes,
                        evidence_count: i.pathway.evidence_count,
                        source_primary_pathway: i.source_primary_pathway.clone(),
                    })
                    .collect();

                let contributing_seed_genes: HashSet<String> =
                    instances.iter().flat_map(|i| i.contributing_seed_genes.iter().cloned()).collect();

                let representative = instances[0];

                AggregatedPathway {
                    pathway: representative.pathway.clone(),
                    support_count,
                    source_primary_pathways,
                    source_secondary_pathways,
                    aggregation_score: weighted_nes,
                    combined_p_value: combined_p,
                    aggregated_nes: weighted_nes,
                    consistency_score: consistency,
                    confidence_score: confidence,
                    support_fraction,
                    contributing_seed_genes,
                }
            })
            .filter(|agg| {
                agg.support_count as usize >= config.min_support_threshold
                    && agg.combined_p_value <= 0.05
                    && agg.confidence_score >= 0.1
            })
            .collect();

        aggregated.sort_by(|a, b| b.confidence_score.partial_cmp(&a.confidence_score).unwrap());
        aggregated
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fisher_combined_p_returns_input_when_k_is_one() {
        assert!((fisher_combined_p(&[0.037]) - 0.037).abs() < 1e-12);
    }

    #[test]
    fn fisher_combined_p_is_at_most_min_p_for_k_ge_two() {
        let combined = fisher_combined_p(&[1e-10, 1e-10]);
        assert!(combined <= 1e-10);
    }

    #[test]
    fn scenario_3_two_identical_p_adj_gives_expected_combined_p() {
        // spec §8 scenario 3: p=0.01 twice -> chi_sq = -2*(ln0.01+ln0.01) ≈ 18.42, df=4
        let combined = fisher_combined_p(&[0.01, 0.01]);
        assert!((combined - 0.0010).abs() < 0.0005);
    }

    #[test]
    fn consistency_score_is_one_for_single_instance() {
        assert_eq!(consistency_score(&[5.0]), 1.0);
    }

    #[test]
    fn consistency_score_is_lower_for_more_variable_instances() {
        let stable = consistency_score(&[10.0, 10.0, 10.0]);
        let variable = consistency_score(&[2.0, 10.0, 30.0]);
        assert!(stable > variable);
    }
}
