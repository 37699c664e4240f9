pub mod backend;
pub mod cache;
pub mod config;
pub mod consensus;
pub mod errors;
pub mod heatmap;
pub mod logging;
pub mod orchestrator;
pub mod registry;
pub mod resolver;
pub mod scores;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

// Re-export commonly used types for convenience
pub use backend::{Capabilities, Classifier, LoadedModel, RawOutput, RuntimeAdapter, Runtimes};
pub use cache::{ModelCache, ModelHandle};
pub use config::InferenceConfig;
pub use errors::EngineError;
pub use heatmap::HeatmapStore;
pub use orchestrator::Engine;
pub use registry::{ModelDescriptor, Registry, RuntimeFamily};
pub use resolver::{PathResolver, SearchRoots};
pub use types::{AnalysisReport, ConsensusResult, Decision, InferenceResult, Label};
