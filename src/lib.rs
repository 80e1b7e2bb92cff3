//! Cardiopath: gene-neighborhood expansion, multi-source enrichment,
//! statistical aggregation, and cardiac-semantic ranking, exposed as a
//! library-style entry point (spec §1/§6 — no HTTP transport, no CLI
//! surface). Callers construct a [`Providers`](providers::Providers) bundle,
//! build a [`Pipeline`](orchestrator::Pipeline), and `await` its `run`.

pub mod cache;
pub mod config;
pub mod error;
pub mod model;
pub mod orchestrator;
pub mod providers;
pub mod rate_limit;
pub mod resilience;
pub mod retry;
pub mod stages;

pub use config::{Config, ConfigOverrides, PipelineMode};
pub use error::PipelineError;
pub use model::PipelineResult;
pub use orchestrator::{Pipeline, ProgressSink};
pub use providers::Providers;
