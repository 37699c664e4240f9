use crate::backend::Runtimes;
use crate::cache::ModelCache;
use crate::config::{DEFAULT_MAX_WORKERS, InferenceConfig};
use crate::consensus;
use crate::errors::EngineError;
use crate::heatmap::{self, HeatmapStore};
use crate::registry::{ModelDescriptor, Registry};
use crate::resolver::PathResolver;
use crate::scores::Confidences;
use crate::types::{AnalysisReport, InferenceResult};
use image::RgbImage;
use opentelemetry::{
    KeyValue, global,
    metrics::{Counter, Histogram},
};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::Instrument;

#[derive(Clone)]
struct EngineMetrics {
    duration: Histogram<f64>,
    runs: Counter<u64>,
    failures: Counter<u64>,
    heatmap_failures: Counter<u64>,
}

fn init_metrics(meter_name: &'static str) -> EngineMetrics {
    let meter = global::meter(meter_name);
    let latency_buckets = [
        0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0,
    ];
    EngineMetrics {
        duration: meter
            .f64_histogram("model_run_duration_seconds")
            .with_description("Time for one model to preprocess, predict and explain an image")
            .with_unit("s")
            .with_boundaries(latency_buckets.to_vec())
            .build(),
        runs: meter
            .u64_counter("model_runs_total")
            .with_description("Total model runs that produced a verdict")
            .build(),
        failures: meter
            .u64_counter("model_failures_total")
            .with_description("Total model runs replaced by an error result")
            .build(),
        heatmap_failures: meter
            .u64_counter("heatmap_failures_total")
            .with_description("Total heatmaps that could not be produced")
            .build(),
    }
}

/// State shared by every task of one `run_all` call.
struct TaskContext {
    cache: Arc<ModelCache>,
    heatmaps: Option<Arc<HeatmapStore>>,
    metrics: EngineMetrics,
    image: Arc<RgbImage>,
    job_id: Option<i64>,
}

/// Runs every registered classifier on an image and combines the verdicts.
pub struct Engine {
    registry: Registry,
    cache: Arc<ModelCache>,
    heatmaps: Option<Arc<HeatmapStore>>,
    max_workers: usize,
    model_timeout: Option<Duration>,
    metrics: EngineMetrics,
}

impl Engine {
    pub fn new(registry: Registry, cache: ModelCache) -> Self {
        Self {
            registry,
            cache: Arc::new(cache),
            heatmaps: None,
            max_workers: DEFAULT_MAX_WORKERS,
            model_timeout: None,
            metrics: init_metrics("inference"),
        }
    }

    pub fn from_config(config: &InferenceConfig) -> Result<Self, EngineError> {
        let registry = config.registry()?;
        let runtimes = Arc::new(Runtimes::detect(config.intra_threads));
        let cache = ModelCache::new(PathResolver::new(config.search_roots.clone()), runtimes);

        let mut engine = Self::new(registry, cache)
            .with_max_workers(config.max_workers)
            .with_model_timeout(config.model_timeout);

        if config.heatmaps_enabled {
            engine = engine.with_heatmaps(HeatmapStore::new(&config.heatmap_dir));
        }

        Ok(engine)
    }

    pub fn with_heatmaps(mut self, store: HeatmapStore) -> Self {
        self.heatmaps = Some(Arc::new(store));
        self
    }

    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers.max(1);
        self
    }

    pub fn with_model_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.model_timeout = timeout;
        self
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn cache(&self) -> &ModelCache {
        &self.cache
    }

    /// Run every registered model on the image and aggregate the verdicts.
    ///
    /// Individual model failures never fail the call: they show up as error
    /// results. Only an empty registry is an error.
    pub async fn run_all(
        &self,
        image_path: &Path,
        job_id: Option<i64>,
    ) -> Result<AnalysisReport, EngineError> {
        if self.registry.is_empty() {
            return Err(EngineError::EmptyRegistry);
        }

        let span = tracing::info_span!(
            "run_all",
            job_id = ?job_id,
            models = self.registry.len(),
            image = %image_path.display()
        );

        async {
            let models = match decode_image(image_path.to_path_buf()).await {
                Ok(image) => self.fan_out(Arc::new(image), job_id).await,
                Err(e) => {
                    tracing::error!(error = %e, "Failed to decode image, every model reports an error");
                    self.registry
                        .iter()
                        .map(|d| {
                            self.metrics.failures.add(
                                1,
                                &[
                                    KeyValue::new("model", d.name.clone()),
                                    KeyValue::new("kind", "image_decode"),
                                ],
                            );
                            InferenceResult::sentinel(&d.name, &d.version)
                        })
                        .collect()
                }
            };

            let consensus = consensus::aggregate(&models);
            tracing::info!(
                decision = %consensus.decision,
                score = consensus.score,
                failed = models.iter().filter(|r| r.is_error()).count(),
                "Analysis finished"
            );

            Ok::<_, EngineError>(AnalysisReport { models, consensus })
        }
        .instrument(span)
        .await
    }

    /// One model's full pipeline on an already decoded image, run inline.
    pub fn run_model(
        &self,
        image: &RgbImage,
        descriptor: &ModelDescriptor,
        job_id: Option<i64>,
    ) -> Result<InferenceResult, EngineError> {
        let ctx = TaskContext {
            cache: Arc::clone(&self.cache),
            heatmaps: self.heatmaps.clone(),
            metrics: self.metrics.clone(),
            image: Arc::new(image.clone()),
            job_id,
        };
        ctx.run_model(descriptor)
    }

    async fn fan_out(&self, image: Arc<RgbImage>, job_id: Option<i64>) -> Vec<InferenceResult> {
        let workers = self.max_workers.min(self.registry.len());
        let semaphore = Arc::new(Semaphore::new(workers));
        let ctx = Arc::new(TaskContext {
            cache: Arc::clone(&self.cache),
            heatmaps: self.heatmaps.clone(),
            metrics: self.metrics.clone(),
            image,
            job_id,
        });

        tracing::debug!(workers, "Dispatching models");

        let mut tasks = JoinSet::new();
        let mut pending: HashMap<tokio::task::Id, (usize, &ModelDescriptor)> = HashMap::new();

        for (index, descriptor) in self.registry.iter().enumerate() {
            let task = model_task(
                Arc::clone(&ctx),
                Arc::clone(&semaphore),
                descriptor.clone(),
                self.model_timeout,
            );
            let span = tracing::info_span!("model_task", model = %descriptor.name, job_id = ?job_id);
            let handle = tasks.spawn(task.instrument(span));
            pending.insert(handle.id(), (index, descriptor));
        }

        let mut results: Vec<(usize, InferenceResult)> = Vec::with_capacity(pending.len());

        while let Some(joined) = tasks.join_next_with_id().await {
            let id = match &joined {
                Ok((id, _)) => *id,
                Err(e) => e.id(),
            };

            let Some((index, descriptor)) = pending.remove(&id) else {
                tracing::warn!(task = %id, "Finished task has no descriptor");
                continue;
            };

            let outcome = match joined {
                Ok((_, outcome)) => outcome,
                Err(e) => {
                    let what = if e.is_panic() { "panicked" } else { "was cancelled" };
                    Err(EngineError::inference(
                        &descriptor.name,
                        anyhow::anyhow!("model task {}", what),
                    ))
                }
            };

            let result = match outcome {
                Ok(result) => {
                    let model = KeyValue::new("model", descriptor.name.clone());
                    self.metrics
                        .duration
                        .record(result.elapsed_ms / 1000.0, std::slice::from_ref(&model));
                    self.metrics
                        .runs
                        .add(1, &[model, KeyValue::new("label", result.label.as_str())]);
                    result
                }
                Err(e) => {
                    tracing::warn!(
                        model = %descriptor.name,
                        kind = e.kind(),
                        error = %e,
                        "Model failed, reporting error result"
                    );
                    self.metrics.failures.add(
                        1,
                        &[
                            KeyValue::new("model", descriptor.name.clone()),
                            KeyValue::new("kind", e.kind()),
                        ],
                    );
                    InferenceResult::sentinel(&descriptor.name, &descriptor.version)
                }
            };
            results.push((index, result));
        }

        // Every spawned task is joined above; this only guards the invariant
        for (_, (index, descriptor)) in pending {
            results.push((index, InferenceResult::sentinel(&descriptor.name, &descriptor.version)));
        }

        results.sort_by_key(|(index, _)| *index);
        results.into_iter().map(|(_, r)| r).collect()
    }
}

async fn decode_image(path: PathBuf) -> anyhow::Result<RgbImage> {
    let decoded = tokio::task::spawn_blocking(move || -> anyhow::Result<RgbImage> {
        let _s = common::span_debug!("decode_image");
        Ok(image::open(&path)?.to_rgb8())
    })
    .await??;

    if decoded.width() == 0 || decoded.height() == 0 {
        anyhow::bail!("Image has no pixels");
    }
    Ok(decoded)
}

/// Waits for a worker slot, then runs the model on the blocking pool.
///
/// The permit moves into the blocking closure so a timed-out model keeps its
/// slot until it actually returns.
async fn model_task(
    ctx: Arc<TaskContext>,
    semaphore: Arc<Semaphore>,
    descriptor: ModelDescriptor,
    timeout: Option<Duration>,
) -> Result<InferenceResult, EngineError> {
    let name = descriptor.name.clone();
    let permit = semaphore
        .acquire_owned()
        .await
        .map_err(|e| EngineError::inference(&name, e.into()))?;

    let span = tracing::Span::current();
    let work = tokio::task::spawn_blocking(move || {
        let _permit = permit;
        let _entered = span.enter();
        ctx.run_model(&descriptor)
    });

    let joined = match timeout {
        Some(limit) => match tokio::time::timeout(limit, work).await {
            Ok(joined) => joined,
            Err(_) => return Err(EngineError::TimedOut { name, timeout: limit }),
        },
        None => work.await,
    };

    match joined {
        Ok(result) => result,
        Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
        Err(e) => Err(EngineError::inference(&name, e.into())),
    }
}

impl TaskContext {
    fn run_model(&self, descriptor: &ModelDescriptor) -> Result<InferenceResult, EngineError> {
        let name = descriptor.name.as_str();
        let resolution = descriptor.input_resolution;

        let handle = self.cache.resolve_and_load(descriptor)?;
        let adapter = self
            .cache
            .runtimes()
            .adapter(handle.family)
            .ok_or_else(|| EngineError::UnsupportedRuntime {
                name: name.to_string(),
                family: handle.family,
            })?;

        let start = Instant::now();

        let predict = |image: &RgbImage| -> anyhow::Result<Vec<f32>> {
            let tensor = adapter.preprocess(image, resolution)?;
            adapter.predict(&handle.model, &tensor)
        };

        let confidences = {
            let _s = common::span!("predict", model = name);
            predict(self.image.as_ref())
                .and_then(|probs| Confidences::from_probabilities(&probs))
                .map_err(|e| EngineError::inference(name, e))?
        };

        tracing::debug!(
            model = name,
            real = confidences.real,
            fake = confidences.fake,
            "Model prediction"
        );

        let heatmap_ref = self.heatmaps.as_ref().and_then(|store| {
            let _s = common::span!("heatmap", model = name);
            let target = confidences.predicted_index();
            let persisted = heatmap::generate(&predict, &self.image, resolution, target)
                .and_then(|map| store.persist(&map, name, self.job_id))
                .map_err(|e| EngineError::heatmap(name, e));

            match persisted {
                Ok(path) => Some(path),
                Err(e) => {
                    tracing::warn!(model = name, error = %e, "Continuing without heatmap");
                    self.metrics
                        .heatmap_failures
                        .add(1, &[KeyValue::new("model", name.to_string())]);
                    None
                }
            }
        });

        let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;
        Ok(InferenceResult::scored(
            descriptor,
            confidences,
            elapsed_ms,
            heatmap_ref,
        ))
    }
}
