use crate::errors::EngineError;
use crate::registry::Registry;
use crate::resolver::SearchRoots;
use common::{env_flag, env_parse, env_path};
use std::path::PathBuf;
use std::time::Duration;

pub use common::Environment;

pub const DEFAULT_MAX_WORKERS: usize = 4;
pub const DEFAULT_INTRA_THREADS: usize = 4;

#[derive(Debug, Clone)]
pub struct InferenceConfig {
    pub environment: Environment,
    pub search_roots: SearchRoots,
    pub heatmap_dir: PathBuf,
    pub heatmaps_enabled: bool,
    pub max_workers: usize,
    pub intra_threads: usize,
    /// `None` waits for every model indefinitely.
    pub model_timeout: Option<Duration>,
    /// External registry file; the built-in catalog is used when unset.
    pub registry_path: Option<PathBuf>,
    pub otel_endpoint: Option<String>,
}

impl InferenceConfig {
    /// Load configuration from environment variables with sensible defaults
    pub fn from_env() -> anyhow::Result<Self> {
        let environment = Environment::from_env();

        let base_dir = match env_path("BASE_DIR") {
            Some(dir) => dir,
            None => std::env::current_dir()?,
        };

        let defaults = SearchRoots::under(&base_dir);
        let search_roots = SearchRoots {
            working_dir: base_dir.clone(),
            models_dir: env_path("MODELS_DIR").unwrap_or(defaults.models_dir),
            app_models_dir: env_path("APP_MODELS_DIR").unwrap_or(defaults.app_models_dir),
            project_root: env_path("PROJECT_ROOT").unwrap_or(defaults.project_root),
        };

        let heatmap_dir = env_path("HEATMAP_DIR")
            .unwrap_or_else(|| search_roots.project_root.join("data").join("heatmaps"));

        let max_workers = env_parse("MAX_WORKERS").unwrap_or(DEFAULT_MAX_WORKERS);
        if max_workers == 0 {
            anyhow::bail!("MAX_WORKERS must be at least 1");
        }

        let intra_threads = env_parse("INTRA_THREADS").unwrap_or(DEFAULT_INTRA_THREADS);

        let model_timeout = env_parse::<u64>("MODEL_TIMEOUT_MS")
            .filter(|&ms| ms > 0)
            .map(Duration::from_millis);

        Ok(Self {
            environment,
            search_roots,
            heatmap_dir,
            heatmaps_enabled: env_flag("HEATMAPS_ENABLED", true),
            max_workers,
            intra_threads,
            model_timeout,
            registry_path: env_path("MODEL_REGISTRY_PATH"),
            otel_endpoint: std::env::var("OTEL_ENDPOINT").ok().filter(|s| !s.is_empty()),
        })
    }

    /// The registry file if one is configured, otherwise the built-in catalog.
    pub fn registry(&self) -> Result<Registry, EngineError> {
        match &self.registry_path {
            Some(path) => Registry::from_json_file(path),
            None => Ok(Registry::builtin()),
        }
    }

    /// Create default configuration for testing
    #[cfg(test)]
    pub fn test_default() -> Self {
        Self {
            environment: Environment::Development,
            search_roots: SearchRoots::under(std::path::Path::new("/srv/backend")),
            heatmap_dir: PathBuf::from("/srv/data/heatmaps"),
            heatmaps_enabled: false,
            max_workers: DEFAULT_MAX_WORKERS,
            intra_threads: 1,
            model_timeout: None,
            registry_path: None,
            otel_endpoint: None,
        }
    }
}
