use crate::registry::RuntimeFamily;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Model '{name}' has no storage reference")]
    MissingStorageRef { name: String },

    #[error("Model artifact for '{name}' not found. Tried:\n{}", format_candidates(.tried))]
    MissingArtifact { name: String, tried: Vec<PathBuf> },

    #[error("Runtime '{family}' required by '{name}' is not available in this deployment")]
    UnsupportedRuntime { name: String, family: RuntimeFamily },

    #[error("Artifact {} for '{name}' is not an invocable model: {reason}", .path.display())]
    IncompatibleCheckpoint {
        name: String,
        path: PathBuf,
        reason: String,
    },

    #[error("Inference failed for '{name}': {source}")]
    InferenceFailure {
        name: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Heatmap generation failed for '{name}': {source}")]
    HeatmapFailure {
        name: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Model '{name}' did not finish within {timeout:?}")]
    TimedOut { name: String, timeout: Duration },

    #[error("Model registry is empty; add at least one descriptor")]
    EmptyRegistry,

    #[error("Invalid model registry {}: {reason}", .path.display())]
    InvalidRegistry { path: PathBuf, reason: String },
}

impl EngineError {
    pub fn inference(name: &str, source: anyhow::Error) -> Self {
        EngineError::InferenceFailure {
            name: name.to_string(),
            source,
        }
    }

    pub fn heatmap(name: &str, source: anyhow::Error) -> Self {
        EngineError::HeatmapFailure {
            name: name.to_string(),
            source,
        }
    }

    /// Short machine-friendly tag used in logs and metric attributes.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::MissingStorageRef { .. } => "missing_storage_ref",
            EngineError::MissingArtifact { .. } => "missing_artifact",
            EngineError::UnsupportedRuntime { .. } => "unsupported_runtime",
            EngineError::IncompatibleCheckpoint { .. } => "incompatible_checkpoint",
            EngineError::InferenceFailure { .. } => "inference_failure",
            EngineError::HeatmapFailure { .. } => "heatmap_failure",
            EngineError::TimedOut { .. } => "timed_out",
            EngineError::EmptyRegistry => "empty_registry",
            EngineError::InvalidRegistry { .. } => "invalid_registry",
        }
    }
}

fn format_candidates(tried: &[PathBuf]) -> String {
    tried
        .iter()
        .map(|p| format!("  - {}", p.display()))
        .collect::<Vec<_>>()
        .join("\n")
}
