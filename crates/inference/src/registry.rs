//! Static catalog of the classifiers run against every image.
//!
//! Adding a model only requires appending a [`ModelDescriptor`] to the
//! registry (or to the JSON file named by `MODEL_REGISTRY_PATH`).

use crate::errors::EngineError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Neural runtime a model artifact is built for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeFamily {
    /// TorchScript modules executed through libtorch.
    Torch,
    /// ONNX graphs executed through ONNX Runtime.
    Onnx,
}

impl RuntimeFamily {
    /// Order in which families are tried when a descriptor is untagged and
    /// the file extension is ambiguous.
    pub const PROBE_ORDER: [RuntimeFamily; 2] = [RuntimeFamily::Torch, RuntimeFamily::Onnx];

    pub fn as_str(&self) -> &'static str {
        match self {
            RuntimeFamily::Torch => "torch",
            RuntimeFamily::Onnx => "onnx",
        }
    }

    /// Infer the family from an artifact extension. Returns `None` when ambiguous.
    pub fn from_extension(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "pt" | "pth" | "torchscript" => Some(RuntimeFamily::Torch),
            "onnx" => Some(RuntimeFamily::Onnx),
            _ => None,
        }
    }
}

impl fmt::Display for RuntimeFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One model to load and run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelDescriptor {
    pub name: String,
    #[serde(default = "default_version")]
    pub version: String,
    /// File name, relative path or absolute path of the artifact.
    #[serde(default)]
    pub storage_ref: String,
    /// `None` means "infer from the file extension".
    #[serde(default)]
    pub runtime_family: Option<RuntimeFamily>,
    #[serde(default = "default_input_resolution")]
    pub input_resolution: u32,
}

fn default_version() -> String {
    "1.0".to_string()
}

fn default_input_resolution() -> u32 {
    preprocess::DEFAULT_INPUT_SIZE
}

impl ModelDescriptor {
    pub fn new(
        name: impl Into<String>,
        storage_ref: impl Into<String>,
        runtime_family: Option<RuntimeFamily>,
        input_resolution: u32,
    ) -> Self {
        Self {
            name: name.into(),
            version: default_version(),
            storage_ref: storage_ref.into(),
            runtime_family,
            input_resolution,
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }
}

/// Ordered, immutable list of descriptors.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    entries: Vec<ModelDescriptor>,
}

impl Registry {
    pub fn new(entries: Vec<ModelDescriptor>) -> Self {
        Self { entries }
    }

    /// The classifiers shipped with the service.
    pub fn builtin() -> Self {
        use RuntimeFamily::{Onnx, Torch};

        Self::new(vec![
            ModelDescriptor::new("BestModelPT", "best_model-v3.pt", Some(Torch), 224),
            ModelDescriptor::new("AI_CNN", "ai_detector_cnn.onnx", Some(Onnx), 224),
            ModelDescriptor::new(
                "XceptionFake",
                "deepfake_detection_xception_180k_14epochs.onnx",
                Some(Onnx),
                299,
            ),
            ModelDescriptor::new("DenseNet121", "DenseNet121Model.onnx", Some(Onnx), 224),
            ModelDescriptor::new("Model2_Keras", "model2.onnx", Some(Onnx), 224),
        ])
    }

    /// Load descriptors from a JSON array, preserving order.
    pub fn from_json_file(path: &Path) -> Result<Self, EngineError> {
        let invalid = |reason: String| EngineError::InvalidRegistry {
            path: PathBuf::from(path),
            reason,
        };

        let raw = std::fs::read_to_string(path).map_err(|e| invalid(e.to_string()))?;
        let entries: Vec<ModelDescriptor> =
            serde_json::from_str(&raw).map_err(|e| invalid(e.to_string()))?;

        tracing::info!(
            path = %path.display(),
            models = entries.len(),
            "Loaded model registry"
        );

        Ok(Self::new(entries))
    }

    pub fn iter(&self) -> impl Iterator<Item = &ModelDescriptor> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl FromIterator<ModelDescriptor> for Registry {
    fn from_iter<I: IntoIterator<Item = ModelDescriptor>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}
