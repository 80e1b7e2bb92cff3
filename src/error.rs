//! Error kinds produced and consumed by the pipeline core (spec §7).

use thiserror::Error;

/// Stage name, used to tag mandatory-stage failures and per-stage warnings.
pub type StageName = &'static str;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// Synchronous, pre-S0 input rejection: empty seeds, malformed overrides,
    /// out-of-range thresholds. Always fatal.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A provider exhausted its retry budget or the rate limiter deadline
    /// expired. Contained per call; only fatal if the stage that hit it is
    /// mandatory and has no fallback.
    #[error("provider `{provider}` unavailable: {message}")]
    ProviderUnavailable { provider: String, message: String },

    /// A provider responded but the payload could not be interpreted.
    /// Treated identically to `ProviderUnavailable` by callers.
    #[error("provider `{provider}` returned a malformed response: {message}")]
    ProviderMalformed { provider: String, message: String },

    /// The run's deadline elapsed or its cancellation token fired.
    #[error("analysis {analysis_id} cancelled at stage `{stage}`")]
    Cancelled {
        analysis_id: uuid::Uuid,
        stage: StageName,
    },

    /// A non-mandatory validator rejected a hypothesis. Never fatal; recorded
    /// in `ScoredPathway::score_components`, not propagated.
    #[error("validation failed: {0}")]
    ValidationFailed(String),

    /// Report/artifact assembly failed after the pipeline otherwise
    /// succeeded. Recorded as a warning; the pipeline result is still
    /// returned.
    #[error("report assembly failed: {0}")]
    ReportFailed(String),

    /// A mandatory stage failed outright.
    #[error("pipeline stage `{stage}` failed for analysis {analysis_id}: {source}")]
    Stage {
        analysis_id: uuid::Uuid,
        stage: StageName,
        #[source]
        source: Box<PipelineError>,
    },

    /// Escape hatch for failures that don't map onto the above kinds.
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl PipelineError {
    pub fn provider_unavailable(provider: impl Into<String>, message: impl Into<String>) -> Self {
        PipelineError::ProviderUnavailable {
            provider: provider.into(),
            message: message.into(),
        }
    }

    pub fn stage(self, analysis_id: uuid::Uuid, stage: StageName) -> Self {
        PipelineError::Stage {
            analysis_id,
            stage,
            source: Box::new(self),
        }
    }

    /// Whether this error kind degrades to a warning at a non-mandatory
    /// stage boundary rather than aborting the run (spec §7 propagation
    /// policy).
    pub fn is_containable(&self) -> bool {
        !matches!(self, PipelineError::Cancelled { .. } | PipelineError::InvalidInput(_))
    }
}
