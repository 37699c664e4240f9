pub mod config;
pub mod cpu;

use image::RgbImage;
use ndarray::{Array, IxDyn};

pub use config::{DEFAULT_INPUT_SIZE, IMAGENET_MEAN, IMAGENET_STD};
pub use cpu::{CpuPreProcessor, fill_color, fit_square, to_tensor};

/// Memory layout of the produced tensor (batch dimension always first).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TensorLayout {
    /// `[1, 3, H, W]`
    Nchw,
    /// `[1, H, W, 3]`
    Nhwc,
}

/// Per-channel value transform applied after scaling to `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Normalization {
    /// Plain `pixel / 255`
    Unit,
    /// `(pixel / 255 - mean) / std` with ImageNet statistics
    ImageNet,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TensorSpec {
    pub layout: TensorLayout,
    pub normalization: Normalization,
}

impl TensorSpec {
    /// Channel-first, ImageNet-normalized input (TorchScript classifiers).
    pub const TORCH: TensorSpec = TensorSpec {
        layout: TensorLayout::Nchw,
        normalization: Normalization::ImageNet,
    };

    /// Channel-last, unit-scaled input (Keras classifiers exported to ONNX).
    pub const KERAS: TensorSpec = TensorSpec {
        layout: TensorLayout::Nhwc,
        normalization: Normalization::Unit,
    };
}

/// Trait for image preprocessing implementations
pub trait Preprocess {
    /// Fit an RGB image to the square input and build the model tensor
    fn preprocess(&self, image: &RgbImage) -> anyhow::Result<Array<f32, IxDyn>>;

    /// Get the square side this preprocessor targets
    fn input_size(&self) -> u32;
}
