//! The twelve pipeline stages (spec §4, components C4-C14). Each stage is a
//! small struct over its provider/config dependencies with a single
//! `run`-style async method; the orchestrator (`crate::orchestrator`)
//! sequences them and owns all cross-stage data.

pub mod aggregator;
pub mod id_normalizer;
pub mod literature_expander;
pub mod neighborhood;
pub mod primary_enrichment;
pub mod redundancy;
pub mod scorer;
pub mod secondary_enrichment;
pub mod seed_tracer;
pub mod semantic_filter;
pub mod top_genes;
pub mod validators;
