use crate::logging::init_subscriber;
use crate::{Environment, env_parse};
use opentelemetry::KeyValue;
use opentelemetry::global;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{
    Resource,
    metrics::{PeriodicReader, SdkMeterProvider},
    propagation::TraceContextPropagator,
    trace::{Sampler, SdkTracerProvider},
};
use opentelemetry_semantic_conventions::attribute::{SERVICE_NAME, SERVICE_VERSION};
use std::time::Duration;
use tracing_subscriber::Layer;

const DEFAULT_EXPORT_INTERVAL: Duration = Duration::from_secs(10);

/// Where and how often traces and metrics are exported.
#[derive(Debug, Clone, PartialEq)]
pub struct TelemetryConfig {
    pub service_name: String,
    pub endpoint: String,
    pub environment: Environment,
    /// Fraction of root traces kept, clamped to [0, 1].
    pub sample_ratio: f64,
    pub export_interval: Duration,
}

impl TelemetryConfig {
    pub fn new(service_name: &str, endpoint: &str, environment: Environment) -> Self {
        Self {
            service_name: service_name.to_string(),
            endpoint: endpoint.to_string(),
            environment,
            sample_ratio: 1.0,
            export_interval: DEFAULT_EXPORT_INTERVAL,
        }
    }

    /// Reads `OTEL_TRACES_SAMPLE_RATIO` and `OTEL_METRIC_EXPORT_INTERVAL_MS`
    /// on top of [`TelemetryConfig::new`].
    pub fn from_env(service_name: &str, endpoint: &str, environment: Environment) -> Self {
        let mut config = Self::new(service_name, endpoint, environment);
        if let Some(ratio) = env_parse::<f64>("OTEL_TRACES_SAMPLE_RATIO").filter(|r| r.is_finite()) {
            config.sample_ratio = ratio.clamp(0.0, 1.0);
        }
        if let Some(ms) = env_parse::<u64>("OTEL_METRIC_EXPORT_INTERVAL_MS").filter(|&ms| ms > 0) {
            config.export_interval = Duration::from_millis(ms);
        }
        config
    }

    fn sampler(&self) -> Sampler {
        let root = if self.sample_ratio >= 1.0 {
            Sampler::AlwaysOn
        } else {
            Sampler::TraceIdRatioBased(self.sample_ratio)
        };
        Sampler::ParentBased(Box::new(root))
    }

    fn resource(&self) -> Resource {
        Resource::builder()
            .with_attributes([
                KeyValue::new(SERVICE_NAME, self.service_name.clone()),
                KeyValue::new(SERVICE_VERSION, env!("CARGO_PKG_VERSION")),
                KeyValue::new("deployment.environment", self.environment.as_str()),
            ])
            .build()
    }
}

/// Owns the OTLP tracer and meter providers for the lifetime of an analysis
/// run and flushes them on drop.
///
/// ```ignore
/// let config = TelemetryConfig::from_env("inference", "http://localhost:4317", Environment::Production);
/// let _telemetry = TelemetryGuard::init(&config)?;
/// ```
pub struct TelemetryGuard {
    tracer_provider: SdkTracerProvider,
    meter_provider: SdkMeterProvider,
}

impl TelemetryGuard {
    /// Install global providers and the logging subscriber with an OTel layer.
    pub fn init(config: &TelemetryConfig) -> anyhow::Result<Self> {
        global::set_text_map_propagator(TraceContextPropagator::new());
        let resource = config.resource();

        let tracer_provider = tracer_provider(config, resource.clone())?;
        global::set_tracer_provider(tracer_provider.clone());

        let meter_provider = meter_provider(config, resource)?;
        global::set_meter_provider(meter_provider.clone());

        let otel_layer = tracing_opentelemetry::layer()
            .with_tracer(global::tracer(config.service_name.clone()))
            .boxed();
        init_subscriber(config.environment, otel_layer);

        tracing::info!(
            endpoint = %config.endpoint,
            sample_ratio = config.sample_ratio,
            export_interval_ms = config.export_interval.as_millis() as u64,
            "Telemetry export enabled"
        );

        Ok(Self {
            tracer_provider,
            meter_provider,
        })
    }
}

fn tracer_provider(config: &TelemetryConfig, resource: Resource) -> anyhow::Result<SdkTracerProvider> {
    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(config.endpoint.as_str())
        .build()?;

    Ok(SdkTracerProvider::builder()
        .with_resource(resource)
        .with_sampler(config.sampler())
        .with_batch_exporter(exporter)
        .build())
}

fn meter_provider(config: &TelemetryConfig, resource: Resource) -> anyhow::Result<SdkMeterProvider> {
    let exporter = opentelemetry_otlp::MetricExporter::builder()
        .with_tonic()
        .with_endpoint(config.endpoint.as_str())
        .build()?;

    let reader = PeriodicReader::builder(exporter)
        .with_interval(config.export_interval)
        .build();

    Ok(SdkMeterProvider::builder()
        .with_resource(resource)
        .with_reader(reader)
        .build())
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        if let Err(e) = self.tracer_provider.shutdown() {
            eprintln!("Failed to flush traces: {:?}", e);
        }
        if let Err(e) = self.meter_provider.shutdown() {
            eprintln!("Failed to flush metrics: {:?}", e);
        }
    }
}

/// Creates an info-level span and enters it.
#[macro_export]
macro_rules! span {
    ($name:literal) => {
        tracing::info_span!($name).entered()
    };
    ($name:literal, $($field:tt)+) => {
        tracing::info_span!($name, $($field)+).entered()
    };
}

/// Creates a debug-level span and enters it.
#[macro_export]
macro_rules! span_debug {
    ($name:literal) => {
        tracing::debug_span!($name).entered()
    };
    ($name:literal, $($field:tt)+) => {
        tracing::debug_span!($name, $($field)+).entered()
    };
}
