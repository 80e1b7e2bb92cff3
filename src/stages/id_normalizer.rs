//! Id Normalizer (spec §4.C4, stage S0).
//!
//! Symbol aliasing ahead of a provider round-trip, with an explicit
//! conservative fallback path for provider outages.

use std::collections::HashMap;

use tokio::time::Instant;

use crate::error::PipelineError;
use crate::model::Gene;
use crate::providers::{IdResolver, ResolveOutcome};
use crate::resilience::ProviderCaller;

/// A small static alias map for common synonyms (spec §4.C4 step 1). A
/// production deployment would load this from configuration; the pipeline
/// ships a representative default so it is runnable standalone.
fn alias_map() -> HashMap<&'static str, &'static str> {
    HashMap::from([
        ("P53", "TP53"),
        ("ERBB1", "EGFR"),
        ("NFKB", "NFKB1"),
        ("HER2", "ERBB2"),
        ("PKB", "AKT1"),
    ])
}

/// Known typographic/Greek-letter substitutions (e.g. `IL-6` vs `IL6`,
/// `PPARα` vs `PPARA`).
fn normalize_typography(raw: &str) -> String {
    let mut s = raw.trim().to_string();
    let substitutions: &[(&str, &str)] = &[
        ("α", "A"),
        ("β", "B"),
        ("γ", "G"),
        ("δ", "D"),
        ("κ", "K"),
        ("‐", "-"),
        ("–", "-"),
        ("—", "-"),
    ];
    for (from, to) in substitutions {
        s = s.replace(from, to);
    }
    s.to_ascii_uppercase()
}

const APPROVED_NO_VOWEL_ABBREVIATIONS: &[&str] = &["TNF", "CFTR", "GSK3"];

/// The symbol-shape heuristic used when the resolver is unavailable (spec
/// §4.C4 step 3): 3-15 alphanumerics (+ hyphen), starts with a letter, does
/// not end with 3+ digits, no 3+ consecutive identical letters, and either
/// contains a vowel or is an approved abbreviation.
fn passes_symbol_shape(symbol: &str) -> bool {
    if symbol.len() < 3 || symbol.len() > 15 {
        return false;
    }
    let Some(first) = symbol.chars().next() else { return false };
    if !first.is_ascii_alphabetic() {
        return false;
    }
    if !symbol.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
        return false;
    }
    let trailing_digits = symbol.chars().rev().take_while(|c| c.is_ascii_digit()).count();
    if trailing_digits >= 3 {
        return false;
    }
    let chars: Vec<char> = symbol.chars().collect();
    if chars.windows(3).any(|w| w[0] == w[1] && w[1] == w[2]) {
        return false;
    }
    let has_vowel = symbol.chars().any(|c| "AEIOU".contains(c));
    has_vowel || APPROVED_NO_VOWEL_ABBREVIATIONS.contains(&symbol)
}

#[derive(Debug, Default)]
pub struct NormalizationResult {
    pub valid: Vec<Gene>,
    pub invalid: Vec<String>,
    pub warnings: Vec<String>,
}

pub struct IdNormalizer {
    resolver: std::sync::Arc<dyn IdResolver>,
    caller: ProviderCaller,
    target_species: String,
}

impl IdNormalizer {
    pub fn new(resolver: std::sync::Arc<dyn IdResolver>, caller: ProviderCaller, target_species: impl Into<String>) -> Self {
        IdNormalizer { resolver, caller, target_species: target_species.into() }
    }

    pub async fn normalize(&self, raw_ids: &[String], deadline: Instant) -> Result<NormalizationResult, PipelineError> {
        if raw_ids.is_empty() {
            return Err(PipelineError::InvalidInput("seed list is empty".to_string()));
        }

        let mut result = NormalizationResult::default();
        let mut seen_symbols: HashMap<String, String> = HashMap::new();

        for raw in raw_ids {
            let normalized = normalize_typography(raw);
            let aliases = alias_map();
            let candidate = aliases.get(normalized.as_str()).copied().unwrap_or(normalized.as_str());

            let resolver = self.resolver.clone();
            let cache_key = serde_json::json!({ "candidate": candidate });
            let outcome = self
                .caller
                .call(deadline, &cache_key, || {
                    let resolver = resolver.clone();
                    let candidate = candidate.to_string();
                    async move { resolver.resolve(&candidate).await }
                })
                .await;

            let gene = match outcome {
                Ok(ResolveOutcome::Found(gene)) => {
                    if gene.species != self.target_species {
                        result.invalid.push(raw.clone());
                        continue;
                    }
                    Some(gene)
                }
                Ok(ResolveOutcome::NotFound) => None,
                Err(_) => {
                    if passes_symbol_shape(candidate) {
                        result
                            .warnings
                            .push(format!("provider unavailable for `{raw}`; accepted via shape fallback"));
                        Some(Gene::fallback(raw.clone(), candidate, self.target_species.clone()))
                    } else {
                        None
                    }
                }
            };

            match gene {
                Some(gene) => {
                    if let Some(first_raw) = seen_symbols.get(&gene.symbol) {
                        result
                            .warnings
                            .push(format!("`{raw}` and `{first_raw}` both resolved to symbol `{}`", gene.symbol));
                    } else {
                        seen_symbols.insert(gene.symbol.clone(), raw.clone());
                        result.valid.push(gene);
                    }
                }
                None => result.invalid.push(raw.clone()),
            }
        }

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, ProviderPolicy};
    use crate::providers::testing::FakeIdResolver;
    use crate::rate_limit::RateLimiterRegistry;
    use std::time::Duration;

    fn resolver_with(symbol_to_gene: Vec<(&str, &str)>) -> FakeIdResolver {
        let resolutions = symbol_to_gene
            .into_iter()
            .map(|(input, symbol)| (input.to_string(), Gene::fallback(input, symbol, "human")))
            .collect();
        FakeIdResolver { resolutions, unavailable: Vec::new() }
    }

    /// A caller with no retries/delay so outage tests run instantly.
    fn test_caller() -> ProviderCaller {
        let mut config = Config::default();
        config.provider_policies.insert(
            "id_resolver".to_string(),
            ProviderPolicy {
                max_attempts: 1,
                initial_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(1),
                ..ProviderPolicy::default()
            },
        );
        let cache = std::sync::Arc::new(crate::cache::Cache::new(1024 * 1024));
        ProviderCaller::new(cache, &RateLimiterRegistry::new(), &config, "id_resolver")
    }

    fn far_deadline() -> Instant {
        Instant::now() + Duration::from_secs(60)
    }

    #[tokio::test]
    async fn empty_seed_list_is_invalid_input() {
        let normalizer = IdNormalizer::new(std::sync::Arc::new(FakeIdResolver::default()), test_caller(), "human");
        let err = normalizer.normalize(&[], far_deadline()).await.unwrap_err();
        assert!(matches!(err, PipelineError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn alias_map_redirects_before_resolution() {
        let resolver = resolver_with(vec![("TP53", "TP53")]);
        let normalizer = IdNormalizer::new(std::sync::Arc::new(resolver), test_caller(), "human");
        let result = normalizer.normalize(&["P53".to_string()], far_deadline()).await.unwrap();
        assert_eq!(result.valid.len(), 1);
        assert_eq!(result.valid[0].symbol, "TP53");
    }

    #[tokio::test]
    async fn provider_outage_falls_back_to_shape_heuristic() {
        // Underscores fail `passes_symbol_shape`'s alphanumeric-or-hyphen check
        // (matching the original's character filter), so the fallback symbol
        // here is shape-compatible unlike a raw id such as "UNKNOWN_GENE1".
        let resolver = FakeIdResolver {
            unavailable: vec!["UNKNOWNGENEA".to_string()],
            ..Default::default()
        };
        let normalizer = IdNormalizer::new(std::sync::Arc::new(resolver), test_caller(), "human");
        let result = normalizer.normalize(&["UNKNOWNGENEA".to_string()], far_deadline()).await.unwrap();
        assert_eq!(result.valid.len(), 1);
        assert_eq!(result.valid[0].canonical_id, "unknown");
        assert_eq!(result.warnings.len(), 1);
    }

    #[tokio::test]
    async fn provider_outage_with_unshaped_symbol_is_rejected_not_faked() {
        let resolver = FakeIdResolver {
            unavailable: vec!["UNKNOWN_GENE1".to_string()],
            ..Default::default()
        };
        let normalizer = IdNormalizer::new(std::sync::Arc::new(resolver), test_caller(), "human");
        let result = normalizer.normalize(&["UNKNOWN_GENE1".to_string()], far_deadline()).await.unwrap();
        assert!(result.valid.is_empty());
        assert_eq!(result.invalid, vec!["UNKNOWN_GENE1".to_string()]);
    }

    #[tokio::test]
    async fn duplicate_symbols_collapse_with_warning() {
        let resolver = resolver_with(vec![("TP53", "TP53"), ("P53ALIAS", "TP53")]);
        let normalizer = IdNormalizer::new(std::sync::Arc::new(resolver), test_caller(), "human");
        let result = normalizer
            .normalize(&["TP53".to_string(), "P53ALIAS".to_string()], far_deadline())
            .await
            .unwrap();
        assert_eq!(result.valid.len(), 1);
        assert_eq!(result.warnings.len(), 1);
    }

    #[test]
    fn symbol_shape_rejects_trailing_digit_runs_and_repeats() {
        assert!(!passes_symbol_shape("AB111"));
        assert!(!passes_symbol_shape("AAABCD"));
        assert!(passes_symbol_shape("TNF"));
        assert!(!passes_symbol_shape("9ABCDE"));
    }
}
