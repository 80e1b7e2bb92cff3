//! Local smoke-test binary. Spec §1/§6 excludes a CLI/HTTP surface from the
//! core ("library-style entry point and a progress callback"); this is not
//! that surface. It wires [`cardiopath::Pipeline`] against the in-memory
//! fake providers from [`cardiopath::providers::testing`] so the library can
//! be exercised from a terminal without a real upstream deployment.

use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use cardiopath::config::{Config, ConfigOverrides, PipelineMode};
use cardiopath::providers::testing::{
    FakeDiseaseAssociationProvider, FakeEnrichmentProvider, FakeEpigenomicProvider,
    FakeIdResolver, FakeInteractionProvider, FakeKnownPathwayProvider, FakeLiteratureProvider,
    FakeTissueExpressionProvider,
};
use cardiopath::providers::Providers;
use cardiopath::{Pipeline, ProgressSink};

#[derive(Parser, Debug)]
#[command(name = "cardiopath", about = "Gene-neighborhood pathway discovery, exercised against fake providers")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the pipeline over a set of seed genes
    Run {
        /// HGNC gene symbols, comma-separated (e.g. TTN,MYH7,SCN5A)
        genes: String,
        /// Disease context override (e.g. "hypertrophic cardiomyopathy")
        #[arg(long)]
        disease_context: Option<String>,
        /// Pipeline mode: ultra-fast, fast, balanced, rigorous
        #[arg(long, default_value = "balanced")]
        mode: String,
    },
}

fn parse_mode(value: &str) -> anyhow::Result<PipelineMode> {
    match value.to_ascii_lowercase().replace(['_', '-'], "").as_str() {
        "ultrafast" => Ok(PipelineMode::UltraFast),
        "fast" => Ok(PipelineMode::Fast),
        "balanced" => Ok(PipelineMode::Balanced),
        "rigorous" => Ok(PipelineMode::Rigorous),
        other => Err(anyhow::anyhow!("unknown --mode `{other}`")),
    }
}

fn fake_providers() -> Providers {
    Providers {
        id_resolver: Arc::new(FakeIdResolver::default()),
        interactions: Arc::new(FakeInteractionProvider::default()),
        enrichment: Arc::new(FakeEnrichmentProvider::default()),
        known_pathways: Arc::new(FakeKnownPathwayProvider::default()),
        literature: Arc::new(FakeLiteratureProvider::default()),
        tissue_expression: Arc::new(FakeTissueExpressionProvider::default()),
        epigenomic: Arc::new(FakeEpigenomicProvider::default()),
        disease_association: Arc::new(FakeDiseaseAssociationProvider::default()),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_env("CARDIOPATH_LOG").unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let Command::Run { genes, disease_context, mode } = cli.command;

    let seeds: Vec<String> = genes.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect();
    if seeds.is_empty() {
        anyhow::bail!("no seed genes given");
    }

    let config = Config::for_mode(parse_mode(&mode)?);
    let overrides = disease_context.map(|ctx| ConfigOverrides { disease_context: Some(ctx), ..Default::default() });

    let pipeline = Pipeline::new(fake_providers(), config, "./cardiopath-runs");
    let progress: ProgressSink = Box::new(|stage, percent, message| {
        eprintln!("[{percent:>3}%] {stage}: {message}");
    });

    let result = pipeline.run(seeds, overrides, Some(progress)).await?;
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}
