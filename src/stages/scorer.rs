//! Final Scorer (spec §4.C10, stage S3).

use std::collections::HashMap;

use crate::config::Config;
use crate::model::{rerank, AggregatedPathway, ScoredPathway};

pub struct Scorer;

impl Scorer {
    /// `base = min(-log10(max(p_adj,1e-50)),50) · evidence_count · db_weight`,
    /// `agg_weight = 1 + log(support_count+1)·0.25`,
    /// `nes_score = base · agg_weight · (0.5 + 0.5·confidence_score)`.
    /// `score_components` records each multiplicand; rank is assigned
    /// descending by `nes_score` (dense, ties broken lexicographically).
    pub fn score(aggregated: Vec<AggregatedPathway>, config: &Config) -> Vec<ScoredPathway> {
        let mut scored: Vec<ScoredPathway> = aggregated
            .into_iter()
            .map(|pathway| {
                let db_weight = config.db_weight(pathway.pathway.source_db.as_str());
                let base = (-(pathway.pathway.p_adj.max(1e-50).log10())).min(50.0)
                    * pathway.pathway.evidence_count as f64
                    * db_weight;
                let agg_weight = 1.0 + ((pathway.support_count as f64 + 1.0).ln()) * 0.25;
                let nes_score = base * agg_weight * (0.5 + 0.5 * pathway.confidence_score);

                let mut score_components: HashMap<String, f64> = HashMap::new();
                score_components.insert("base".to_string(), base);
                score_components.insert("db_weight".to_string(), db_weight);
                score_components.insert("agg_weight".to_string(), agg_weight);
                score_components.insert("confidence_score".to_string(), pathway.confidence_score);

                ScoredPathway {
                    // populated by the seed tracer stage (spec §4.C14)
                    traced_seed_genes: Default::default(),
                    aggregated: pathway,
                    nes_score,
                    rank: 0,
                    score_components,
                    literature_associations: Default::default(),
                    cardiac_disease_score: 0.0,
                    tissue_expression: None,
                    permutation: None,
                    druggability: None,
                }
            })
            .collect();

        rerank(&mut scored);
        scored
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{PathwayEntry, SourceDb};
    use std::collections::HashSet;

    fn aggregated(id: &str, p_adj: f64, evidence_count: u32, support_count: u32, confidence: f64) -> AggregatedPathway {
        AggregatedPathway {
            pathway: PathwayEntry {
                id: id.to_string(),
                name: "x".to_string(),
                source_db: SourceDb::Reac,
                p_value: p_adj,
                p_adj,
                evidence_count,
                evidence_genes: vec!["TP53".to_string()],
            },
            support_count,
            source_primary_pathways: HashSet::new(),
            source_secondary_pathways: Vec::new(),
            aggregation_score: 0.0,
            combined_p_value: p_adj,
            aggregated_nes: 0.0,
            consistency_score: 1.0,
            confidence_score: confidence,
            support_fraction: 1.0,
            contributing_seed_genes: HashSet::new(),
        }
    }

    #[test]
    fn higher_confidence_and_support_yields_higher_nes_score() {
        let config = Config::default();
        let low = aggregated("P1", 1e-4, 3, 1, 0.2);
        let high = aggregated("P2", 1e-4, 3, 5, 0.9);
        let scored = Scorer::score(vec![low, high], &config);
        assert_eq!(scored[0].aggregated.pathway.id, "P2");
        assert_eq!(scored[0].rank, 1);
        assert_eq!(scored[1].rank, 2);
    }

    #[test]
    fn score_components_record_each_multiplicand() {
        let config = Config::default();
        let pathway = aggregated("P1", 1e-4, 3, 1, 0.5);
        let scored = Scorer::score(vec![pathway], &config);
        assert!(scored[0].score_components.contains_key("base"));
        assert!(scored[0].score_components.contains_key("agg_weight"));
    }
}
