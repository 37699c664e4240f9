pub mod config;
pub mod logging;
pub mod telemetry;

pub use config::{Environment, env_flag, env_parse, env_path};
pub use logging::setup_logging;
pub use telemetry::{TelemetryConfig, TelemetryGuard};
