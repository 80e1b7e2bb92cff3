//! Redundancy Filter (spec §4.C12, stage S4b).

use std::collections::HashSet;

use crate::model::{rerank, ScoredPathway};

fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    let intersection = a.intersection(b).count();
    let union = a.union(b).count();
    if union == 0 { 0.0 } else { intersection as f64 / union as f64 }
}

/// Walks `pathways` in `nes_score` order, keeping the current pathway iff
/// its evidence-gene Jaccard similarity to every already-kept pathway is
/// strictly below `threshold`. Deterministic and stable (spec §4.C12).
pub fn filter_redundant(mut pathways: Vec<ScoredPathway>, threshold: f64) -> (Vec<ScoredPathway>, u32) {
    rerank(&mut pathways);
    let before = pathways.len();
    let mut kept: Vec<ScoredPathway> = Vec::new();
    let mut kept_gene_sets: Vec<HashSet<String>> = Vec::new();

    for pathway in pathways {
        let gene_set = pathway.evidence_gene_set();
        let is_redundant = kept_gene_sets.iter().any(|kept_set| jaccard(&gene_set, kept_set) >= threshold);
        if !is_redundant {
            kept_gene_sets.push(gene_set);
            kept.push(pathway);
        }
    }

    let dropped = (before - kept.len()) as u32;
    rerank(&mut kept);
    (kept, dropped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AggregatedPathway, PathwayEntry, SourceDb};
    use std::collections::HashMap;

    fn pathway(id: &str, nes: f64, genes: &[&str]) -> ScoredPathway {
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
            rank: 0,
            score_components: HashMap::new(),
            traced_seed_genes: HashSet::new(),
            literature_associations: Default::default(),
            cardiac_disease_score: 0.0,
            tissue_expression: None,
            permutation: None,
            druggability: None,
        }
    }

    #[test]
    fn threshold_one_removes_only_exact_duplicates() {
        let pathways = vec![
            pathway("P1", 10.0, &["A", "B", "C"]),
            pathway("P2", 9.0, &["A", "B", "C"]),
            pathway("P3", 8.0, &["A", "B"]),
        ];
        let (kept, dropped) = filter_redundant(pathways, 1.0);
        assert_eq!(dropped, 1);
        assert_eq!(kept.len(), 2);
    }

    #[test]
    fn threshold_zero_reduces_to_at_most_one() {
        let pathways = vec![
            pathway("P1", 10.0, &["A"]),
            pathway("P2", 9.0, &["B"]),
            pathway("P3", 8.0, &["C"]),
        ];
        let (kept, _dropped) = filter_redundant(pathways, 0.0);
        assert!(kept.len() <= 1);
    }
}
