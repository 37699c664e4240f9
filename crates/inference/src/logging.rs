use crate::config::InferenceConfig;

/// Plain logging for runs without an OTLP collector.
pub fn setup_logging(config: &InferenceConfig) {
    common::setup_logging(config.environment);
}
