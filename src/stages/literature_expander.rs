//! Literature Expander (spec §4.C7).
//!
//! A query-driven co-occurrence expander over literature search results
//! (upper-case token extraction over title+abstract), with cardiac-priority
//! weighting.

use std::collections::{HashMap, HashSet};

use regex::Regex;
use tokio::time::Instant;

use crate::error::PipelineError;
use crate::providers::{LiteratureProvider, LiteratureRecord};
use crate::resilience::{self, ProviderCaller};

const HIGH_PRIORITY_TERMS: &[&str] = &["cardiac", "heart failure", "myocardial infarction"];
const MEDIUM_PRIORITY_TERMS: &[&str] = &["cardiovascular", "ventricular"];
const LOW_PRIORITY_TERMS: &[&str] = &["cardiomyocyte", "cardiac muscle"];

const STOPWORDS: &[&str] = &[
    "AND", "THE", "FOR", "WITH", "FROM", "INTO", "THIS", "THAT", "WERE", "HAVE", "WAS", "ARE",
    "NOT", "BUT", "ALL", "CAN", "HAS", "ITS", "WHO", "WHICH", "WHEN", "WHERE", "WHAT", "ALSO",
    "ONE", "TWO", "USE", "USED", "USING", "MAY", "NEW", "OUR",
];

pub struct LiteratureExpansion {
    /// Candidate gene symbol → relevance in `[0,1]`.
    pub candidates: HashMap<String, f64>,
    pub evidence: HashMap<String, Vec<String>>,
    pub warnings: Vec<String>,
}

pub struct LiteratureExpander {
    provider: std::sync::Arc<dyn LiteratureProvider>,
    caller: ProviderCaller,
    budget_per_pathway: usize,
    relevance_threshold: f64,
    generic_terms: Vec<String>,
    token_regex: Regex,
    require_all_providers: bool,
}

/// Per-paper keyword weighting, averaged across the papers mentioning a
/// candidate symbol. A paper with no keyword matches at all is excluded
/// from the average rather than scored zero.
fn keyword_score_for_papers(pmids: &[String], papers: &HashMap<String, LiteratureRecord>) -> f64 {
    let mut total_weight = 0.0;
    let mut count = 0;

    for pmid in pmids {
        let Some(record) = papers.get(pmid) else { continue };
        let text = format!("{} {}", record.title, record.abstract_text).to_lowercase();

        let high = HIGH_PRIORITY_TERMS.iter().filter(|k| text.contains(**k)).count() as f64;
        let medium = MEDIUM_PRIORITY_TERMS.iter().filter(|k| text.contains(**k)).count() as f64;
        let low = LOW_PRIORITY_TERMS.iter().filter(|k| text.contains(**k)).count() as f64;
        let total_matches = high + medium + low;
        if total_matches > 0.0 {
            total_weight += (high * 2.0 + medium * 1.5 + low * 1.0) / total_matches;
            count += 1;
        }
    }

    if count > 0 {
        (total_weight / count as f64 / 2.0).min(1.0)
    } else {
        0.5
    }
}

impl LiteratureExpander {
    pub fn new(
        provider: std::sync::Arc<dyn LiteratureProvider>,
        caller: ProviderCaller,
        budget_per_pathway: usize,
        relevance_threshold: f64,
        generic_terms: Vec<String>,
        require_all_providers: bool,
    ) -> Self {
        LiteratureExpander {
            provider,
            caller,
            budget_per_pathway,
            relevance_threshold,
            generic_terms,
            token_regex: Regex::new(r"\b[A-Z][A-Z0-9-]{1,14}\b").expect("static regex"),
            require_all_providers,
        }
    }

    pub fn is_generic(&self, pathway_name: &str) -> bool {
        let lower = pathway_name.to_lowercase();
        self.generic_terms.iter().any(|term| lower == term.to_lowercase())
    }

    pub async fn expand(
        &self,
        pathway_name: &str,
        member_genes: &[String],
        analysis_id: uuid::Uuid,
        deadline: Instant,
    ) -> Result<LiteratureExpansion, PipelineError> {
        if self.is_generic(pathway_name) {
            return Ok(LiteratureExpansion { candidates: HashMap::new(), evidence: HashMap::new(), warnings: Vec::new() });
        }

        let keywords: Vec<&str> =
            HIGH_PRIORITY_TERMS.iter().chain(MEDIUM_PRIORITY_TERMS).chain(LOW_PRIORITY_TERMS).copied().collect();

        let gene_clause = member_genes.join(" ");
        let mut papers_by_pmid: HashMap<String, LiteratureRecord> = HashMap::new();
        let mut warnings = Vec::new();

        for keyword in keywords.into_iter().take(self.budget_per_pathway.max(1)) {
            resilience::check_deadline(analysis_id, "s3_literature_expander", deadline)?;
            let query = format!("{pathway_name} {gene_clause} {keyword}");
            let cache_key = serde_json::json!({ "query": query, "max_results": 10 });
            let provider = self.provider.clone();
            let result = self
                .caller
                .call(deadline, &cache_key, || {
                    let provider = provider.clone();
                    let query = query.clone();
                    async move { provider.search(&query, 10).await }
                })
                .await;
            let records: Vec<LiteratureRecord> = resilience::degrade_or_require(
                self.require_all_providers,
                &mut warnings,
                &format!("s3_literature_expander: search for `{pathway_name}` keyword `{keyword}`"),
                result,
            )?;
            for record in records {
                papers_by_pmid.entry(record.pmid.clone()).or_insert(record);
            }
        }

        if papers_by_pmid.is_empty() {
            return Ok(LiteratureExpansion { candidates: HashMap::new(), evidence: HashMap::new(), warnings });
        }

        let known_genes: HashSet<String> = member_genes.iter().cloned().collect();
        let mut mentions: HashMap<String, Vec<String>> = HashMap::new(); // symbol -> pmids

        for (pmid, record) in &papers_by_pmid {
            let text = format!("{} {}", record.title, record.abstract_text);
            let mentioned_known = known_genes.iter().any(|g| text.contains(g.as_str()));
            if !mentioned_known {
                continue;
            }
            let mut seen_in_paper: HashSet<String> = HashSet::new();
            for capture in self.token_regex.find_iter(&text) {
                let token = capture.as_str().to_string();
                if STOPWORDS.contains(&token.as_str()) || known_genes.contains(&token) {
                    continue;
                }
                if seen_in_paper.insert(token.clone()) {
                    mentions.entry(token).or_default().push(pmid.clone());
                }
            }
        }

        if mentions.is_empty() {
            return Ok(LiteratureExpansion { candidates: HashMap::new(), evidence: HashMap::new(), warnings });
        }

        let max_support = mentions.values().map(|v| v.len()).max().unwrap_or(1).max(1) as f64;

        let mut candidates = HashMap::new();
        let mut evidence = HashMap::new();
        for (symbol, pmids) in mentions {
            let support_count = pmids.len() as f64;
            let keyword_score = keyword_score_for_papers(&pmids, &papers_by_pmid);
            let relevance = (support_count / max_support) * keyword_score;
            if relevance >= self.relevance_threshold {
                evidence.insert(symbol.clone(), pmids);
                candidates.insert(symbol, relevance);
            }
        }

        Ok(LiteratureExpansion { candidates, evidence, warnings })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::providers::testing::FakeLiteratureProvider;
    use crate::rate_limit::RateLimiterRegistry;
    use std::time::Duration;

    fn record(pmid: &str, title: &str, abstract_text: &str) -> LiteratureRecord {
        LiteratureRecord {
            pmid: pmid.to_string(),
            title: title.to_string(),
            abstract_text: abstract_text.to_string(),
            year: Some(2020),
            authors: vec![],
            citation_count: None,
        }
    }

    fn test_caller() -> ProviderCaller {
        let config = Config::default();
        let cache = std::sync::Arc::new(crate::cache::Cache::new(1024 * 1024));
        ProviderCaller::new(cache, &RateLimiterRegistry::new(), &config, "literature")
    }

    fn far_deadline() -> Instant {
        Instant::now() + Duration::from_secs(60)
    }

    #[tokio::test]
    async fn generic_pathway_name_skips_expansion_entirely() {
        let provider = FakeLiteratureProvider::default();
        let expander = LiteratureExpander::new(
            std::sync::Arc::new(provider),
            test_caller(),
            8,
            0.4,
            vec!["cellular process".to_string()],
            false,
        );
        let result = expander
            .expand("Cellular process", &["TP53".to_string()], uuid::Uuid::new_v4(), far_deadline())
            .await
            .unwrap();
        assert!(result.candidates.is_empty());
    }

    #[tokio::test]
    async fn candidate_supported_by_known_gene_mention_surfaces_with_relevance() {
        let records = vec![record(
            "1",
            "TP53 and NOTCH1 in cardiac remodeling",
            "TP53 interacts with NOTCH1 during cardiac hypertrophy",
        )];
        let provider = FakeLiteratureProvider { records_by_query_substring: vec![("cardiac".to_string(), records)] };
        let expander = LiteratureExpander::new(std::sync::Arc::new(provider), test_caller(), 8, 0.1, vec![], false);
        let result = expander
            .expand("p53 pathway", &["TP53".to_string()], uuid::Uuid::new_v4(), far_deadline())
            .await
            .unwrap();
        assert!(result.candidates.contains_key("NOTCH1"));
        assert!(result.candidates["NOTCH1"] > 0.0 && result.candidates["NOTCH1"] <= 1.0);
    }

    #[test]
    fn keyword_score_excludes_papers_with_no_keyword_matches_from_the_average() {
        let mut papers = HashMap::new();
        papers.insert("1".to_string(), record("1", "cardiac remodeling", "high priority hit"));
        papers.insert("2".to_string(), record("2", "unrelated topic", "no priority terms here"));
        let pmids = vec!["1".to_string(), "2".to_string()];
        // paper 2 contributes nothing to the average; only paper 1's
        // high-priority match (weight 2.0) should drive the score.
        let score = keyword_score_for_papers(&pmids, &papers);
        assert!((score - 1.0).abs() < 1e-9);
    }

    #[test]
    fn keyword_score_defaults_when_no_paper_has_any_keyword_match() {
        let mut papers = HashMap::new();
        papers.insert("1".to_string(), record("1", "unrelated topic", "no priority terms here"));
        let pmids = vec!["1".to_string()];
        let score = keyword_score_for_papers(&pmids, &papers);
        assert!((score - 0.5).abs() < 1e-9);
    }
}
