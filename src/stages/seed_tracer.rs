//! Seed Tracer (spec §4.C14, stage S5b).

use futures::stream::{self, StreamExt};
use tokio::time::Instant;

use crate::error::PipelineError;
use crate::model::ScoredPathway;
use crate::providers::LiteratureProvider;
use crate::resilience::{self, ProviderCaller};

pub struct SeedTracer {
    literature: std::sync::Arc<dyn LiteratureProvider>,
    caller: ProviderCaller,
    top_m: usize,
    max_workers: usize,
    generic_terms: Vec<String>,
    require_all_providers: bool,
}

impl SeedTracer {
    pub fn new(
        literature: std::sync::Arc<dyn LiteratureProvider>,
        caller: ProviderCaller,
        top_m: usize,
        max_workers: usize,
        generic_terms: Vec<String>,
        require_all_providers: bool,
    ) -> Self {
        SeedTracer { literature, caller, top_m, max_workers, generic_terms, require_all_providers }
    }

    fn is_generic(&self, name: &str) -> bool {
        let lower = name.to_lowercase();
        self.generic_terms.iter().any(|t| lower == t.to_lowercase())
    }

    /// Copies `contributing_seed_genes` into `traced_seed_genes` for every
    /// pathway, then runs bounded literature tracing over the top M
    /// *specific* (non-generic) pathways only. All provider failures
    /// degrade that seed to "no support" (recorded as a warning) rather than
    /// aborting the stage, unless `require_all_providers` is set.
    pub async fn run(
        &self,
        mut pathways: Vec<ScoredPathway>,
        analysis_id: uuid::Uuid,
        deadline: Instant,
    ) -> Result<(Vec<ScoredPathway>, Vec<String>), PipelineError> {
        for pathway in &mut pathways {
            pathway.traced_seed_genes = pathway.aggregated.contributing_seed_genes.clone();
        }

        let eligible: Vec<usize> = pathways
            .iter()
            .enumerate()
            .filter(|(_, p)| !self.is_generic(&p.aggregated.pathway.name))
            .take(self.top_m)
            .map(|(i, _)| i)
            .collect();

        let literature = self.literature.clone();
        let caller = self.caller.clone();
        let require_all_providers = self.require_all_providers;
        let results = stream::iter(eligible.into_iter().map(|idx| (idx, pathways[idx].clone())))
            .map(|(idx, mut pathway)| {
                let literature = literature.clone();
                let caller = caller.clone();
                async move {
                    resilience::check_deadline(analysis_id, "s5b_seed_tracer", deadline)?;

                    let mut warnings = Vec::new();
                    let mut any_support = false;
                    let seeds: Vec<String> = pathway.traced_seed_genes.iter().cloned().collect();
                    for seed in seeds {
                        let query = format!(
                            "\"{}\"[Title/Abstract] AND \"{}\"[Title/Abstract] AND (cardiac OR heart)",
                            pathway.aggregated.pathway.name, seed
                        );
                        let cache_key = serde_json::json!({ "query": query, "max_results": 10 });
                        let literature = literature.clone();
                        let result = caller
                            .call(deadline, &cache_key, || {
                                let literature = literature.clone();
                                let query = query.clone();
                                async move { literature.search(&query, 10).await }
                            })
                            .await;
                        let records = match result {
                            Ok(records) => records,
                            Err(err) if require_all_providers => return Err(err),
                            Err(err) => {
                                warnings.push(format!(
                                    "s5b_seed_tracer: literature search for `{seed}` in `{}` failed: {err}",
                                    pathway.aggregated.pathway.name
                                ));
                                Vec::new()
                            }
                        };
                        if records.is_empty() {
                            continue;
                        }
                        any_support = true;
                        let pmids: Vec<String> = records.iter().take(3).map(|r| r.pmid.clone()).collect();
                        let citation_count: u32 = records.iter().filter_map(|r| r.citation_count).sum();
                        pathway.literature_associations.per_seed_pmids.insert(seed.clone(), pmids);
                        pathway.literature_associations.per_seed_citation_count.insert(seed, citation_count);
                    }
                    pathway.literature_associations.has_literature_support = any_support;
                    pathway.literature_associations.checked = true;
                    Ok((idx, pathway, warnings))
                }
            })
            .buffer_unordered(self.max_workers.max(1))
            .collect::<Vec<_>>()
            .await;

        let mut warnings = Vec::new();
        for result in results {
            let (idx, pathway, local_warnings) = result?;
            pathways[idx] = pathway;
            warnings.extend(local_warnings);
        }

        Ok((pathways, warnings))
    }
}
