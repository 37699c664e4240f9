use super::{Classifier, LoadedModel, RawOutput, RuntimeAdapter};
use crate::registry::RuntimeFamily;
use crate::scores::Activation;
use ndarray::{ArrayD, IxDyn};
use preprocess::TensorSpec;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use tch::{CModule, Device, IValue, Kind, Tensor};

/// TorchScript classifiers: channel-first ImageNet-normalized input, logits out.
pub struct TorchAdapter {
    device: Device,
}

impl TorchAdapter {
    pub fn new() -> Self {
        Self {
            device: Device::Cpu,
        }
    }
}

impl Default for TorchAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl RuntimeAdapter for TorchAdapter {
    fn family(&self) -> RuntimeFamily {
        RuntimeFamily::Torch
    }

    fn load(&self, path: &Path) -> anyhow::Result<LoadedModel> {
        // Plain state dicts fail here: only scripted/traced modules are invocable
        let mut module = CModule::load_on_device(path, self.device)?;
        module.f_set_eval()?;

        tracing::debug!(path = %path.display(), "Loaded TorchScript module");

        Ok(Arc::new(TorchClassifier {
            module: Mutex::new(module),
            device: self.device,
        }))
    }

    fn tensor_spec(&self) -> TensorSpec {
        TensorSpec::TORCH
    }

    fn activation(&self) -> Activation {
        Activation::Softmax
    }
}

struct TorchClassifier {
    module: Mutex<CModule>,
    device: Device,
}

impl Classifier for TorchClassifier {
    fn forward(&self, input: &ArrayD<f32>) -> anyhow::Result<RawOutput> {
        let shape: Vec<i64> = input.shape().iter().map(|&d| d as i64).collect();
        let data: Vec<f32> = input.iter().copied().collect();
        let tensor = Tensor::from_slice(&data)
            .reshape(shape.as_slice())
            .to_device(self.device);

        let module = self.module.lock().unwrap_or_else(PoisonError::into_inner);
        let output = tch::no_grad(|| module.forward_is(&[IValue::Tensor(tensor)]))?;

        match output {
            IValue::Tensor(t) => Ok(RawOutput::Tensor(to_array(&t)?)),
            IValue::Tuple(items) | IValue::GenericList(items) => Ok(RawOutput::Named(
                items
                    .iter()
                    .enumerate()
                    .map(|(i, v)| (i.to_string(), ivalue_tensor(v)))
                    .collect(),
            )),
            IValue::TensorList(items) => Ok(RawOutput::Named(
                items
                    .iter()
                    .enumerate()
                    .map(|(i, t)| (i.to_string(), to_array(t).ok()))
                    .collect(),
            )),
            IValue::GenericDict(entries) => Ok(RawOutput::Named(
                entries
                    .iter()
                    .map(|(k, v)| {
                        let key = match k {
                            IValue::String(s) => s.clone(),
                            other => format!("{:?}", other),
                        };
                        (key, ivalue_tensor(v))
                    })
                    .collect(),
            )),
            other => anyhow::bail!("Unsupported TorchScript output: {:?}", other),
        }
    }
}

fn ivalue_tensor(value: &IValue) -> Option<ArrayD<f32>> {
    match value {
        IValue::Tensor(t) => to_array(t).ok(),
        _ => None,
    }
}

fn to_array(tensor: &Tensor) -> anyhow::Result<ArrayD<f32>> {
    let shape: Vec<usize> = tensor.size().iter().map(|&d| d as usize).collect();
    let flat = tensor
        .to_device(Device::Cpu)
        .to_kind(Kind::Float)
        .contiguous()
        .view(-1);
    let data = Vec::<f32>::try_from(&flat)?;
    Ok(ArrayD::from_shape_vec(IxDyn(&shape), data)?)
}
