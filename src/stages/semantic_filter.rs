//! Semantic Filter (spec §4.C11): cardiac-relevance scoring and tiered
//! adaptive filtering (S4a), plus the mandatory final name filter (S5c).
//!
//! The underlying keyword category lists are externally curated in
//! production (spec §1 Non-goals); the constants below are a representative
//! default so the stage is runnable standalone, mirroring how
//! `Config::generic_pathway_terms` stands in for the literature expander's
//! disallow list.

use regex::Regex;

use crate::config::Config;
use crate::model::{rerank, ScoredPathway};

const DIRECT_CARDIAC_TERMS: &[&str] =
    &["cardiac", "heart", "myocardial", "cardiovascular", "coronary", "ventricular", "atrial"];
const CARDIAC_PROCESS_TERMS: &[&str] =
    &["contraction", "conduction", "electrophysiology", "hypertrophy", "remodeling"];
const DISEASE_TERMS: &[&str] = &["failure", "infarction", "arrhythmia", "fibrillation", "ischemia", "hypertension"];
const NEGATIVE_TERMS: &[&str] = &["neuronal", "renal", "hepatic", "epidermal", "osteogenic", "unrelated"];

const APPROVED_CARDIAC_SUBSTRINGS: &[&str] = &[
    "cardiac",
    "cardiovascular",
    "heart",
    "myocardial",
    "myocardium",
    "coronary",
    "ventricular",
    "atrial",
    "cardiomyocyte",
];

fn cardiac_stem_regex() -> Regex {
    Regex::new(r"(?i)\b(cardio\w*|myocardi\w*|coronar\w*|heart\s+\w+)\b").expect("static regex")
}

fn fuzzy_regex() -> Regex {
    Regex::new(r"(?i)card[a-z]*vasc[a-z]*").expect("static regex")
}

fn keyword_score(text: &str, terms: &[&str], per_match: f64, cap: f64) -> f64 {
    let lower = text.to_lowercase();
    let matches = terms.iter().filter(|t| lower.contains(*t)).count();
    (matches as f64 * per_match).min(cap)
}

/// Whether `name` matches an approved cardiac substring or stem regex (spec
/// §4.C11 mandatory name filter condition; also used as the "explicit
/// cardiac term" check in the adaptive tier 31..100 rule).
pub fn matches_cardiac_name(name: &str) -> bool {
    let lower = name.to_lowercase();
    APPROVED_CARDIAC_SUBSTRINGS.iter().any(|s| lower.contains(s)) || cardiac_stem_regex().is_match(name)
}

/// Cardiac relevance in `[0,1]`: weighted, capped category sum minus
/// penalty, shifted/normalized, raised to power 1.2 (spec §4.C11,
/// §GLOSSARY "Cardiac relevance").
pub fn relevance(name: &str, config: &Config) -> f64 {
    let direct = keyword_score(name, DIRECT_CARDIAC_TERMS, 0.03, 0.10);
    let processes = keyword_score(name, CARDIAC_PROCESS_TERMS, 0.03, 0.15);

    let mut disease_terms: Vec<&str> = DISEASE_TERMS.to_vec();
    if let Some(ctx) = &config.disease_context {
        disease_terms.push(ctx.as_str());
    }
    for syn in &config.disease_synonyms {
        disease_terms.push(syn.as_str());
    }
    let disease = keyword_score(name, &disease_terms, 0.05, 0.40);

    let name_level = if cardiac_stem_regex().is_match(name) { 0.15 } else { 0.0 };
    let negative = keyword_score(name, NEGATIVE_TERMS, 0.10, 0.50);
    let fuzzy_bonus = if fuzzy_regex().is_match(name) { 0.02 } else { 0.0 };

    let lower = name.to_lowercase();
    let disease_synonym_hit = config
        .disease_context
        .as_ref()
        .map(|ctx| lower.contains(&ctx.to_lowercase()))
        .unwrap_or(false)
        || config.disease_synonyms.iter().any(|syn| lower.contains(&syn.to_lowercase()));
    let disease_boost = if disease_synonym_hit { config.disease_synonym_boost } else { 0.0 };

    let raw = direct + processes + disease + name_level + fuzzy_bonus + disease_boost - negative;
    let normalized = ((raw + 0.5) / 1.35).clamp(0.0, 1.0);
    normalized.powf(1.2)
}

pub struct SemanticFilterResult {
    pub kept: Vec<ScoredPathway>,
    pub dropped_count: u32,
}

/// Scores every pathway's relevance, folds it into `nes_score`, re-ranks,
/// then applies the adaptive tiered filter by rank (spec §4.C11 S4a;
/// SPEC_FULL.md §9 clarifies tiers are applied before any results cap).
pub fn apply_relevance_and_tiered_filter(mut pathways: Vec<ScoredPathway>, config: &Config) -> SemanticFilterResult {
    for pathway in &mut pathways {
        let r = relevance(&pathway.aggregated.pathway.name, config);
        pathway.score_components.insert("semantic_relevance".to_string(), r);
        pathway.nes_score *= 1.0 + r;
    }
    rerank(&mut pathways);

    let before = pathways.len();
    let mut kept: Vec<ScoredPathway> = pathways
        .into_iter()
        .filter(|pathway| {
            let r = *pathway.score_components.get("semantic_relevance").unwrap_or(&0.0);
            match pathway.rank {
                1..=30 => true,
                31..=100 => r >= 0.30 || matches_cardiac_name(&pathway.aggregated.pathway.name),
                101..=150 => r >= 0.50,
                _ => false,
            }
        })
        .collect();
    let dropped_count = (before - kept.len()) as u32;
    rerank(&mut kept);

    SemanticFilterResult { kept, dropped_count }
}

/// Mandatory final name filter (spec §4.C11 S5c): drops any pathway whose
/// name does not match an approved cardiac substring or stem regex, no
/// matter how high it scored.
pub fn apply_mandatory_name_filter(mut pathways: Vec<ScoredPathway>) -> (Vec<ScoredPathway>, u32) {
    let before = pathways.len();
    pathways.retain(|pathway| matches_cardiac_name(&pathway.aggregated.pathway.name));
    let dropped = (before - pathways.len()) as u32;
    rerank(&mut pathways);
    (pathways, dropped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AggregatedPathway, PathwayEntry, SourceDb};
    use std::collections::HashMap;
    use std::collections::HashSet;

    fn pathway(name: &str, nes: f64, rank: u32) -> ScoredPathway {
        ScoredPathway {
            aggregated: AggregatedPathway {
                pathway: PathwayEntry {
                    id: name.to_string(),
                    name: name.to_string(),
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
            rank,
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
    fn relevance_is_zero_for_purely_negative_generic_name() {
        let config = Config::default();
        let r = relevance("unrelated renal hepatic process", &config);
        assert_eq!(r, 0.0);
    }

    #[test]
    fn relevance_is_in_unit_interval_for_strongly_cardiac_name() {
        let config = Config::default();
        let r = relevance("Cardiac muscle contraction in heart failure", &config);
        assert!(r > 0.0 && r <= 1.0);
    }

    #[test]
    fn mandatory_name_filter_drops_generic_pathway() {
        let pathways = vec![pathway("Cellular process", 10.0, 1)];
        let (kept, dropped) = apply_mandatory_name_filter(pathways);
        assert!(kept.is_empty());
        assert_eq!(dropped, 1);
    }

    #[test]
    fn mandatory_name_filter_keeps_explicit_cardiac_name() {
        let pathways = vec![pathway("Cardiac muscle contraction", 10.0, 1)];
        let (kept, dropped) = apply_mandatory_name_filter(pathways);
        assert_eq!(kept.len(), 1);
        assert_eq!(dropped, 0);
    }

    #[test]
    fn tiered_filter_drops_beyond_rank_150() {
        let config = Config::default();
        let mut pathways = Vec::new();
        for i in 0..200 {
            pathways.push(pathway(&format!("Generic process {i}"), 200.0 - i as f64, 0));
        }
        let result = apply_relevance_and_tiered_filter(pathways, &config);
        assert!(result.kept.len() <= 150);
        assert!(result.dropped_count > 0);
    }
}
