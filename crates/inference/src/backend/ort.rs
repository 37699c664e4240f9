use super::{Classifier, LoadedModel, RawOutput, RuntimeAdapter};
use crate::registry::RuntimeFamily;
use ndarray::ArrayD;
use ort::{
    session::{Session, builder::GraphOptimizationLevel},
    value::TensorRef,
};
use preprocess::TensorSpec;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionProvider {
    Cpu,
    Cuda,
}

impl ExecutionProvider {
    /// `ORT_PROVIDER=cuda` selects CUDA, anything else runs on CPU.
    pub fn from_env() -> Self {
        match std::env::var("ORT_PROVIDER")
            .unwrap_or_default()
            .to_lowercase()
            .as_str()
        {
            "cuda" | "gpu" => ExecutionProvider::Cuda,
            _ => ExecutionProvider::Cpu,
        }
    }
}

/// ONNX graphs exported from Keras: channel-last input scaled to `[0, 1]`,
/// outputs that are usually already probabilities.
pub struct OnnxAdapter {
    provider: ExecutionProvider,
    intra_threads: usize,
}

impl OnnxAdapter {
    pub fn new(provider: ExecutionProvider, intra_threads: usize) -> Self {
        Self {
            provider,
            intra_threads: intra_threads.max(1),
        }
    }

    fn load_session(&self, path: &Path) -> anyhow::Result<Session> {
        // Initialize ORT environment (idempotent)
        let _ = ort::init().commit();

        let mut builder = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(self.intra_threads)?;

        match self.provider {
            ExecutionProvider::Cuda => {
                tracing::debug!("Using CUDA execution provider");
                builder = builder.with_execution_providers([
                    ort::execution_providers::CUDAExecutionProvider::default()
                        .with_device_id(0)
                        .build()
                        .error_on_failure(),
                ])?;
            }
            ExecutionProvider::Cpu => {
                tracing::debug!("Using CPU execution provider");
            }
        }

        Ok(builder.commit_from_file(path)?)
    }
}

impl RuntimeAdapter for OnnxAdapter {
    fn family(&self) -> RuntimeFamily {
        RuntimeFamily::Onnx
    }

    fn load(&self, path: &Path) -> anyhow::Result<LoadedModel> {
        let session = self.load_session(path)?;
        Ok(Arc::new(OnnxClassifier {
            session: Mutex::new(session),
        }))
    }

    fn tensor_spec(&self) -> TensorSpec {
        TensorSpec::KERAS
    }
}

struct OnnxClassifier {
    session: Mutex<Session>,
}

impl Classifier for OnnxClassifier {
    fn forward(&self, input: &ArrayD<f32>) -> anyhow::Result<RawOutput> {
        let mut session = self.session.lock().unwrap_or_else(PoisonError::into_inner);

        let outputs = session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let mut values = Vec::new();
        for (name, value) in outputs.iter() {
            let tensor = value
                .try_extract_array::<f32>()
                .ok()
                .map(|t| t.into_owned());
            values.push((name.to_string(), tensor));
        }

        Ok(RawOutput::Named(values))
    }
}
