//! Lazily loaded, process-lifetime model handles.
//!
//! The outer map lock only covers looking up (or inserting) a key's slot.
//! The load itself runs under the slot's own lock, so two tasks racing on the
//! same key load once while different keys load in parallel.

use crate::backend::{LoadedModel, Runtimes};
use crate::errors::EngineError;
use crate::registry::{ModelDescriptor, RuntimeFamily};
use crate::resolver::PathResolver;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub name: String,
    pub path: PathBuf,
}

/// A loaded model plus the runtime that produced it.
#[derive(Clone)]
pub struct ModelHandle {
    pub model: LoadedModel,
    pub family: RuntimeFamily,
    pub path: PathBuf,
}

impl std::fmt::Debug for ModelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelHandle")
            .field("family", &self.family)
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

type Slot = Arc<Mutex<Option<ModelHandle>>>;

pub struct ModelCache {
    resolver: PathResolver,
    runtimes: Arc<Runtimes>,
    slots: Mutex<HashMap<CacheKey, Slot>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    // A panicking load leaves the slot empty, which is still a valid state.
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ModelCache {
    pub fn new(resolver: PathResolver, runtimes: Arc<Runtimes>) -> Self {
        Self {
            resolver,
            runtimes,
            slots: Mutex::new(HashMap::new()),
        }
    }

    pub fn runtimes(&self) -> &Runtimes {
        &self.runtimes
    }

    pub fn resolver(&self) -> &PathResolver {
        &self.resolver
    }

    /// Resolve the descriptor's artifact and return its cached handle,
    /// loading it on first use.
    pub fn resolve_and_load(&self, descriptor: &ModelDescriptor) -> Result<ModelHandle, EngineError> {
        let path = self.resolver.resolve(descriptor)?;
        let key = CacheKey {
            name: descriptor.name.clone(),
            path: path.clone(),
        };

        let slot = {
            let mut slots = lock(&self.slots);
            Arc::clone(slots.entry(key).or_default())
        };

        let mut loaded = lock(&slot);
        if let Some(handle) = loaded.as_ref() {
            tracing::trace!(model = %descriptor.name, "Model cache hit");
            return Ok(handle.clone());
        }

        let handle = self.load(descriptor, &path)?;
        *loaded = Some(handle.clone());
        Ok(handle)
    }

    /// Number of models currently loaded.
    pub fn loaded_count(&self) -> usize {
        let slots: Vec<Slot> = lock(&self.slots).values().cloned().collect();
        slots.iter().filter(|slot| lock(slot).is_some()).count()
    }

    fn load(&self, descriptor: &ModelDescriptor, path: &Path) -> Result<ModelHandle, EngineError> {
        let name = &descriptor.name;

        let tagged = descriptor
            .runtime_family
            .or_else(|| RuntimeFamily::from_extension(path));

        if let Some(family) = tagged {
            let adapter = self
                .runtimes
                .adapter(family)
                .ok_or_else(|| EngineError::UnsupportedRuntime {
                    name: name.clone(),
                    family,
                })?;

            let model = self.load_with(name, family, path, || adapter.load(path))?;
            return Ok(ModelHandle {
                model,
                family,
                path: path.to_path_buf(),
            });
        }

        // Untagged and ambiguous: probe each available family in order
        let mut reasons = Vec::new();
        for family in RuntimeFamily::PROBE_ORDER {
            let Some(adapter) = self.runtimes.adapter(family) else {
                continue;
            };
            match self.load_with(name, family, path, || adapter.load(path)) {
                Ok(model) => {
                    return Ok(ModelHandle {
                        model,
                        family,
                        path: path.to_path_buf(),
                    });
                }
                Err(EngineError::IncompatibleCheckpoint { reason, .. }) => {
                    reasons.push(format!("{}: {}", family, reason));
                }
                Err(other) => return Err(other),
            }
        }

        if reasons.is_empty() {
            return Err(EngineError::UnsupportedRuntime {
                name: name.clone(),
                family: RuntimeFamily::PROBE_ORDER[0],
            });
        }

        Err(EngineError::IncompatibleCheckpoint {
            name: name.clone(),
            path: path.to_path_buf(),
            reason: reasons.join("; "),
        })
    }

    fn load_with(
        &self,
        name: &str,
        family: RuntimeFamily,
        path: &Path,
        load: impl FnOnce() -> anyhow::Result<LoadedModel>,
    ) -> Result<LoadedModel, EngineError> {
        let _s = common::span!("load_model", model = name, family = family.as_str());

        match load() {
            Ok(model) => {
                tracing::info!(model = name, family = %family, path = %path.display(), "Model loaded");
                Ok(model)
            }
            Err(e) => {
                tracing::warn!(model = name, family = %family, error = %e, "Model failed to load");
                Err(EngineError::IncompatibleCheckpoint {
                    name: name.to_string(),
                    path: path.to_path_buf(),
                    reason: format!("{:#}", e),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::SearchRoots;
    use crate::testing::StubAdapter;
    use std::fs;
    use std::sync::Barrier;
    use std::thread;
    use std::time::Duration;
    use tempfile::{TempDir, tempdir};

    fn setup(adapters: Vec<Arc<StubAdapter>>) -> (TempDir, ModelCache) {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("models")).unwrap();
        let runtimes = Runtimes::with_adapters(
            adapters
                .into_iter()
                .map(|a| a as Arc<dyn crate::backend::RuntimeAdapter>)
                .collect(),
        );
        let cache = ModelCache::new(
            PathResolver::new(SearchRoots::under(dir.path())),
            Arc::new(runtimes),
        );
        (dir, cache)
    }

    fn write_model(dir: &TempDir, file: &str, content: &str) {
        fs::write(dir.path().join("models").join(file), content).unwrap();
    }

    #[test]
    fn test_cache_hit_returns_same_handle() {
        let onnx = Arc::new(StubAdapter::new(RuntimeFamily::Onnx));
        let (dir, cache) = setup(vec![onnx.clone()]);
        write_model(&dir, "a.onnx", "0.3,0.7");

        let d = ModelDescriptor::new("A", "a.onnx", None, 32);
        let first = cache.resolve_and_load(&d).unwrap();
        let second = cache.resolve_and_load(&d).unwrap();

        assert!(Arc::ptr_eq(&first.model, &second.model));
        assert_eq!(first.family, RuntimeFamily::Onnx);
        assert_eq!(onnx.load_count(), 1);
        assert_eq!(cache.loaded_count(), 1);
    }

    #[test]
    fn test_key_includes_model_name() {
        let onnx = Arc::new(StubAdapter::new(RuntimeFamily::Onnx));
        let (dir, cache) = setup(vec![onnx.clone()]);
        write_model(&dir, "shared.onnx", "0.5,0.5");

        let a = cache
            .resolve_and_load(&ModelDescriptor::new("A", "shared.onnx", None, 32))
            .unwrap();
        let b = cache
            .resolve_and_load(&ModelDescriptor::new("B", "shared.onnx", None, 32))
            .unwrap();

        assert!(!Arc::ptr_eq(&a.model, &b.model));
        assert_eq!(onnx.load_count(), 2);
    }

    #[test]
    fn test_concurrent_first_use_loads_once() {
        let onnx = Arc::new(
            StubAdapter::new(RuntimeFamily::Onnx).with_load_delay(Duration::from_millis(50)),
        );
        let (dir, cache) = setup(vec![onnx.clone()]);
        write_model(&dir, "slow.onnx", "0.1,0.9");

        let cache = Arc::new(cache);
        let barrier = Arc::new(Barrier::new(8));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    cache
                        .resolve_and_load(&ModelDescriptor::new("Slow", "slow.onnx", None, 32))
                        .unwrap()
                })
            })
            .collect();

        let loaded: Vec<ModelHandle> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(onnx.load_count(), 1);
        assert!(loaded.windows(2).all(|w| Arc::ptr_eq(&w[0].model, &w[1].model)));
    }

    #[test]
    fn test_failed_load_is_not_cached() {
        let onnx = Arc::new(StubAdapter::new(RuntimeFamily::Onnx));
        let (dir, cache) = setup(vec![onnx.clone()]);
        write_model(&dir, "flaky.onnx", "not a model");

        let d = ModelDescriptor::new("Flaky", "flaky.onnx", None, 32);
        let err = cache.resolve_and_load(&d).unwrap_err();
        assert!(matches!(err, EngineError::IncompatibleCheckpoint { .. }));
        assert_eq!(cache.loaded_count(), 0);

        write_model(&dir, "flaky.onnx", "0.4,0.6");
        assert!(cache.resolve_and_load(&d).is_ok());
        assert_eq!(onnx.load_count(), 2);
    }

    #[test]
    fn test_unavailable_family_fails_before_loading() {
        let torch = Arc::new(StubAdapter::new(RuntimeFamily::Torch).unavailable());
        let (dir, cache) = setup(vec![torch.clone()]);
        write_model(&dir, "best.pt", "0.5,0.5");

        let err = cache
            .resolve_and_load(&ModelDescriptor::new("Best", "best.pt", None, 32))
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::UnsupportedRuntime {
                family: RuntimeFamily::Torch,
                ..
            }
        ));
        assert_eq!(torch.load_count(), 0);
    }

    #[test]
    fn test_tagged_family_unavailable_fails_before_loading() {
        let torch = Arc::new(StubAdapter::new(RuntimeFamily::Torch).unavailable());
        let onnx = Arc::new(StubAdapter::new(RuntimeFamily::Onnx));
        let (dir, cache) = setup(vec![torch.clone(), onnx.clone()]);
        write_model(&dir, "weights.bin", "0.5,0.5");

        let descriptor = ModelDescriptor::new("Tagged", "weights.bin", Some(RuntimeFamily::Torch), 32);
        let err = cache.resolve_and_load(&descriptor).unwrap_err();
        assert!(matches!(
            err,
            EngineError::UnsupportedRuntime {
                family: RuntimeFamily::Torch,
                ..
            }
        ));
        assert_eq!(torch.load_count(), 0);
        assert_eq!(onnx.load_count(), 0, "a tagged family is never probed around");
        assert_eq!(cache.loaded_count(), 0);
    }

    #[test]
    fn test_tag_overrides_extension() {
        let torch = Arc::new(StubAdapter::new(RuntimeFamily::Torch));
        let onnx = Arc::new(StubAdapter::new(RuntimeFamily::Onnx));
        let (dir, cache) = setup(vec![torch.clone(), onnx.clone()]);
        write_model(&dir, "exported.pt", "0.5,0.5");

        let handle = cache
            .resolve_and_load(&ModelDescriptor::new(
                "Exported",
                "exported.pt",
                Some(RuntimeFamily::Onnx),
                32,
            ))
            .unwrap();
        assert_eq!(handle.family, RuntimeFamily::Onnx);
        assert_eq!(torch.load_count(), 0);
    }

    #[test]
    fn test_ambiguous_artifact_probes_torch_then_onnx() {
        let torch = Arc::new(StubAdapter::new(RuntimeFamily::Torch).rejecting_all());
        let onnx = Arc::new(StubAdapter::new(RuntimeFamily::Onnx));
        let (dir, cache) = setup(vec![torch.clone(), onnx.clone()]);
        write_model(&dir, "weights.bin", "0.5,0.5");

        let handle = cache
            .resolve_and_load(&ModelDescriptor::new("Weights", "weights.bin", None, 32))
            .unwrap();
        assert_eq!(handle.family, RuntimeFamily::Onnx);
        assert_eq!(torch.load_count(), 1);
        assert_eq!(onnx.load_count(), 1);
    }

    #[test]
    fn test_ambiguous_artifact_rejected_by_every_family() {
        let torch = Arc::new(StubAdapter::new(RuntimeFamily::Torch));
        let onnx = Arc::new(StubAdapter::new(RuntimeFamily::Onnx));
        let (dir, cache) = setup(vec![torch, onnx]);
        write_model(&dir, "weights.bin", "garbage");

        match cache.resolve_and_load(&ModelDescriptor::new("Weights", "weights.bin", None, 32)) {
            Err(EngineError::IncompatibleCheckpoint { reason, .. }) => {
                assert!(reason.contains("torch"), "{}", reason);
                assert!(reason.contains("onnx"), "{}", reason);
            }
            other => panic!("expected IncompatibleCheckpoint, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_artifact_propagates() {
        let (_dir, cache) = setup(vec![Arc::new(StubAdapter::new(RuntimeFamily::Onnx))]);
        let err = cache
            .resolve_and_load(&ModelDescriptor::new("Ghost", "ghost.onnx", None, 32))
            .unwrap_err();
        assert!(matches!(err, EngineError::MissingArtifact { .. }));
    }
}
