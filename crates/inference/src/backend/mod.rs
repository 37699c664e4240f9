//! Runtime adapters: one per neural runtime family.
//!
//! Every adapter turns an artifact path into a shared [`Classifier`] handle,
//! builds input tensors in the layout its family expects, and normalizes raw
//! outputs into a class probability vector.
//!
//! Handles are shared across worker threads. Each adapter serializes forward
//! passes on a handle internally, so callers never need extra locking.

use crate::registry::RuntimeFamily;
use crate::scores::{self, Activation};
use image::RgbImage;
use ndarray::ArrayD;
use preprocess::{CpuPreProcessor, Preprocess, TensorSpec};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

#[cfg(feature = "ort-backend")]
pub mod ort;

#[cfg(feature = "torch-backend")]
pub mod torch;

/// Output of a forward pass before it is reduced to class probabilities.
#[derive(Debug, Clone)]
pub enum RawOutput {
    Tensor(ArrayD<f32>),
    /// Multi-output structure in model order. Non-tensor values are `None`.
    Named(Vec<(String, Option<ArrayD<f32>>)>),
}

/// A loaded, ready-to-invoke model.
pub trait Classifier: Send + Sync {
    /// Run a forward pass without gradient tracking.
    fn forward(&self, input: &ArrayD<f32>) -> anyhow::Result<RawOutput>;
}

/// Shared handle; identity (`Arc::ptr_eq`) is what the load cache preserves.
pub type LoadedModel = Arc<dyn Classifier>;

pub trait RuntimeAdapter: Send + Sync {
    fn family(&self) -> RuntimeFamily;

    /// Whether the runtime's execution environment is present. Probed once.
    fn is_available(&self) -> bool {
        true
    }

    /// Load an artifact. Errors mean the file is not an invocable model.
    fn load(&self, path: &Path) -> anyhow::Result<LoadedModel>;

    /// Input layout and normalization for this family.
    fn tensor_spec(&self) -> TensorSpec;

    /// How raw scores become probabilities.
    fn activation(&self) -> Activation {
        Activation::SoftmaxOutsideUnitRange
    }

    fn preprocess(&self, image: &RgbImage, input_resolution: u32) -> anyhow::Result<ArrayD<f32>> {
        CpuPreProcessor::new(input_resolution, self.tensor_spec()).preprocess(image)
    }

    /// Forward pass reduced to a probability vector of length >= 2.
    fn predict(&self, model: &LoadedModel, tensor: &ArrayD<f32>) -> anyhow::Result<Vec<f32>> {
        let raw = model.forward(tensor)?;
        scores::probabilities(raw, self.activation())
    }
}

/// Which runtime families this deployment can execute.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capabilities {
    pub torch: bool,
    pub onnx: bool,
}

impl Capabilities {
    pub fn is_available(&self, family: RuntimeFamily) -> bool {
        match family {
            RuntimeFamily::Torch => self.torch,
            RuntimeFamily::Onnx => self.onnx,
        }
    }

    fn set(&mut self, family: RuntimeFamily, available: bool) {
        match family {
            RuntimeFamily::Torch => self.torch = available,
            RuntimeFamily::Onnx => self.onnx = available,
        }
    }
}

/// The adapters compiled into this build and their probed availability.
pub struct Runtimes {
    adapters: HashMap<RuntimeFamily, Arc<dyn RuntimeAdapter>>,
    capabilities: Capabilities,
}

impl Runtimes {
    /// Register adapters and probe each one exactly once.
    pub fn with_adapters(adapters: Vec<Arc<dyn RuntimeAdapter>>) -> Self {
        let mut capabilities = Capabilities::default();
        let mut by_family = HashMap::new();

        for adapter in adapters {
            let family = adapter.family();
            let available = adapter.is_available();
            tracing::info!(family = %family, available, "Probed runtime");
            capabilities.set(family, available);
            by_family.insert(family, adapter);
        }

        Self {
            adapters: by_family,
            capabilities,
        }
    }

    /// Adapters for every runtime feature enabled at compile time.
    #[allow(unused_variables, unused_mut)]
    pub fn detect(intra_threads: usize) -> Self {
        let mut adapters: Vec<Arc<dyn RuntimeAdapter>> = Vec::new();

        #[cfg(feature = "torch-backend")]
        adapters.push(Arc::new(torch::TorchAdapter::new()));

        #[cfg(feature = "ort-backend")]
        adapters.push(Arc::new(ort::OnnxAdapter::new(
            ort::ExecutionProvider::from_env(),
            intra_threads,
        )));

        Self::with_adapters(adapters)
    }

    pub fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    /// Adapter for a family, only if that family is available.
    pub fn adapter(&self, family: RuntimeFamily) -> Option<&Arc<dyn RuntimeAdapter>> {
        if !self.capabilities.is_available(family) {
            return None;
        }
        self.adapters.get(&family)
    }
}

impl std::fmt::Debug for Runtimes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtimes")
            .field("capabilities", &self.capabilities)
            .finish()
    }
}
