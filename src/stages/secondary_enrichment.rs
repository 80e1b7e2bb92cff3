//! Secondary Enrichment (spec §4.C8, stage S2b).

use std::collections::{HashMap, HashSet};

use futures::stream::{self, StreamExt};
use tokio::time::Instant;

use crate::config::Config;
use crate::error::PipelineError;
use crate::model::{Neighborhood, ScoredPathwayEntry, SourceDb};
use crate::providers::{EnrichmentProvider, KnownPathwayProvider};
use crate::resilience::{self, degrade_or_require, ProviderCaller};
use crate::stages::aggregator::fisher_combined_p;
use crate::stages::literature_expander::LiteratureExpander;
use crate::stages::primary_enrichment::preliminary_nes;

/// All secondary-enrichment instances that produced a given pathway id
/// across the top-T primaries, plus the preliminary (non-rigorous)
/// aggregation spec §4.C8 describes inline. `crate::stages::aggregator`
/// consumes `instances` to compute the rigorous statistics of C9.
pub struct SecondaryGroup {
    pub pathway_id: String,
    pub instances: Vec<ScoredPathwayEntry>,
    pub support_count: u32,
    pub combined_p_value: f64,
    pub aggregated_nes: f64,
}

pub struct SecondaryEnrichmentResult {
    pub groups: Vec<SecondaryGroup>,
    pub warnings: Vec<String>,
}

pub struct SecondaryEnrichment {
    enrichment: std::sync::Arc<dyn EnrichmentProvider>,
    known_pathways: std::sync::Arc<dyn KnownPathwayProvider>,
    literature: LiteratureExpander,
    enrichment_caller: ProviderCaller,
    known_pathways_caller: ProviderCaller,
    max_workers: usize,
}

impl SecondaryEnrichment {
    pub fn new(
        enrichment: std::sync::Arc<dyn EnrichmentProvider>,
        known_pathways: std::sync::Arc<dyn KnownPathwayProvider>,
        literature: LiteratureExpander,
        enrichment_caller: ProviderCaller,
        known_pathways_caller: ProviderCaller,
        max_workers: usize,
    ) -> Self {
        SecondaryEnrichment {
            enrichment,
            known_pathways,
            literature,
            enrichment_caller,
            known_pathways_caller,
            max_workers,
        }
    }

    pub async fn run(
        &self,
        primaries: &[ScoredPathwayEntry],
        neighborhood: &Neighborhood,
        sources: &[SourceDb],
        config: &Config,
        analysis_id: uuid::Uuid,
        deadline: Instant,
    ) -> Result<SecondaryEnrichmentResult, PipelineError> {
        let seed_symbols = neighborhood.seed_symbols();
        let top_primaries: Vec<&ScoredPathwayEntry> = primaries.iter().take(config.top_hypotheses_count).collect();
        let mut warnings = Vec::new();

        let seed_list: Vec<String> = seed_symbols.iter().cloned().collect();
        let known_pathways = self.known_pathways.clone();
        let known_key = serde_json::json!({ "genes": seed_list });
        let known_result = self
            .known_pathways_caller
            .call(deadline, &known_key, || {
                let known_pathways = known_pathways.clone();
                let seed_list = seed_list.clone();
                async move { known_pathways.pathways_for(&seed_list).await }
            })
            .await;
        let known_ids: HashSet<String> = degrade_or_require(
            config.require_all_providers,
            &mut warnings,
            "s2b_secondary_enrichment: known_pathways",
            known_result,
        )?
        .unwrap_or_default()
        .into_iter()
        .collect();

        let literature = &self.literature;
        let enrichment_caller = &self.enrichment_caller;
        let results = stream::iter(top_primaries.into_iter())
            .map(|primary| {
                let enrichment = self.enrichment.clone();
                let enrichment_caller = enrichment_caller.clone();
                let known_ids = known_ids.clone();
                let seed_symbols = seed_symbols.clone();
                let seed_overlap_threshold = config.seed_overlap_threshold;
                let fdr_threshold = config.fdr_threshold;
                let require_all_providers = config.require_all_providers;
                let sources = sources.to_vec();
                async move {
                    resilience::check_deadline(analysis_id, "s2b_secondary_enrichment", deadline)?;

                    let mut local_warnings = Vec::new();
                    let expansion_result = literature
                        .expand(&primary.pathway.name, &primary.pathway.evidence_genes, analysis_id, deadline)
                        .await;
                    let expansion = expansion_result.unwrap_or_else(|err| {
                        local_warnings.push(format!(
                            "s2b_secondary_enrichment: literature expansion for `{}` failed: {err}",
                            primary.pathway.name
                        ));
                        crate::stages::literature_expander::LiteratureExpansion {
                            candidates: HashMap::new(),
                            evidence: HashMap::new(),
                            warnings: Vec::new(),
                        }
                    });
                    local_warnings.extend(expansion.warnings);

                    let mut gene_set: HashSet<String> = primary.pathway.evidence_genes.iter().cloned().collect();
                    gene_set.extend(expansion.candidates.keys().cloned());
                    let gene_list: Vec<String> = gene_set.into_iter().collect();

                    let enrich_key = serde_json::json!({ "genes": gene_list, "sources": sources });
                    let enrich_result = enrichment_caller
                        .call(deadline, &enrich_key, || {
                            let enrichment = enrichment.clone();
                            let gene_list = gene_list.clone();
                            let sources = sources.clone();
                            async move { enrichment.enrich(&gene_list, &sources, fdr_threshold).await }
                        })
                        .await;
                    let entries = match enrich_result {
                        Ok(entries) => entries,
                        Err(err) if require_all_providers => return Err(err),
                        Err(err) => {
                            local_warnings.push(format!(
                                "s2b_secondary_enrichment: enrich for `{}` failed: {err}",
                                primary.pathway.name
                            ));
                            Vec::new()
                        }
                    };

                    let mut instances = Vec::new();
                    for entry in entries {
                        let evidence_set: HashSet<&String> = entry.evidence_genes.iter().collect();
                        let overlap_count = seed_symbols.iter().filter(|s| evidence_set.contains(s)).count();
                        let overlap_ratio = if entry.evidence_genes.is_empty() {
                            0.0
                        } else {
                            overlap_count as f64 / entry.evidence_genes.len() as f64
                        };
                        let is_known = known_ids.contains(&entry.id) || overlap_ratio > seed_overlap_threshold;
                        if is_known {
                            continue;
                        }

                        let db_weight_placeholder = entry.source_db;
                        instances.push((entry, db_weight_placeholder, primary.pathway.id.clone()));
                    }
                    Ok((instances, local_warnings))
                }
            })
            .buffer_unordered(self.max_workers.max(1))
            .collect::<Vec<_>>()
            .await;

        let mut instances_per_primary = Vec::new();
        for result in results {
            let (instances, local_warnings) = result?;
            instances_per_primary.push(instances);
            warnings.extend(local_warnings);
        }

        let mut grouped: HashMap<String, Vec<ScoredPathwayEntry>> = HashMap::new();
        for per_primary in instances_per_primary {
            for (entry, source_db, primary_id) in per_primary {
                let db_weight = config.db_weight(source_db.as_str());
                let nes = preliminary_nes(entry.p_adj, entry.evidence_count, db_weight);
                let contributing = {
                    let evidence_set: HashSet<&String> = entry.evidence_genes.iter().collect();
                    let overlap: HashSet<String> =
                        seed_symbols.iter().filter(|s| evidence_set.contains(s)).cloned().collect();
                    if overlap.is_empty() { seed_symbols.clone() } else { overlap }
                };
                let scored = ScoredPathwayEntry {
                    pathway: entry.clone(),
                    preliminary_nes: nes,
                    contributing_seed_genes: contributing,
                    source_primary_pathway: Some(primary_id),
                    literature_support: None,
                };
                grouped.entry(entry.id.clone()).or_default().push(scored);
            }
        }

        let mut groups: Vec<SecondaryGroup> = grouped
            .into_iter()
            .map(|(pathway_id, instances)| {
                let support_count = instances
                    .iter()
                    .filter_map(|i| i.source_primary_pathway.clone())
                    .collect::<HashSet<_>>()
                    .len() as u32;
                let p_values: Vec<f64> = instances.iter().map(|i| i.pathway.p_value).collect();
                let combined_p_value = fisher_combined_p(&p_values);
                let aggregated_nes = instances.iter().map(|i| i.preliminary_nes).sum::<f64>() / instances.len() as f64;
                SecondaryGroup { pathway_id, instances, support_count, combined_p_value, aggregated_nes }
            })
            .collect();

        groups.sort_by(|a, b| {
            b.support_count
                .cmp(&a.support_count)
                .then_with(|| b.aggregated_nes.partial_cmp(&a.aggregated_nes).unwrap())
        });

        Ok(SecondaryEnrichmentResult { groups, warnings })
    }
}
