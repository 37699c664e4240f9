//! Occlusion sensitivity maps.
//!
//! A square patch filled with the image's average color slides over the
//! model-sized input. Wherever covering the image lowers the probability of
//! the predicted class, that region matters to the model.

pub mod colormap;
pub mod store;

pub use store::HeatmapStore;

use image::{RgbImage, imageops};
use ndarray::Array2;

/// Reference resolution the base patch size and stride are expressed in.
const REFERENCE_RESOLUTION: f32 = 224.0;
const BASE_PATCH: f32 = 32.0;
const BASE_STRIDE: f32 = 16.0;
const MIN_PATCH: u32 = 8;
const MIN_STRIDE: u32 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OcclusionParams {
    pub resolution: u32,
    pub patch: u32,
    pub stride: u32,
}

impl OcclusionParams {
    /// Patch and stride scaled with the model's input resolution.
    pub fn for_resolution(resolution: u32) -> Self {
        let scale = resolution as f32 / REFERENCE_RESOLUTION;
        Self {
            resolution,
            patch: ((BASE_PATCH * scale).round() as u32).max(MIN_PATCH),
            stride: ((BASE_STRIDE * scale).round() as u32).max(MIN_STRIDE),
        }
    }

    /// Top-left offsets visited along one axis.
    pub fn offsets(&self) -> Vec<u32> {
        if self.patch > self.resolution {
            return Vec::new();
        }
        (0..=self.resolution - self.patch)
            .step_by(self.stride as usize)
            .collect()
    }

    /// Number of extra predictions one map costs.
    pub fn occlusion_count(&self) -> usize {
        self.offsets().len().pow(2)
    }
}

fn target_probability(probs: &[f32], target_class: usize) -> anyhow::Result<f32> {
    probs
        .get(target_class)
        .or_else(|| probs.first())
        .copied()
        .ok_or_else(|| anyhow::anyhow!("Prediction returned no probabilities"))
}

/// Importance of every pixel of the model-sized input, normalized to `[0, 1]`.
pub fn sensitivity<F>(
    mut predict: F,
    fitted: &RgbImage,
    params: OcclusionParams,
    target_class: usize,
) -> anyhow::Result<Array2<f32>>
where
    F: FnMut(&RgbImage) -> anyhow::Result<Vec<f32>>,
{
    let _s = common::span_debug!("occlusion_sensitivity", patch = params.patch, stride = params.stride);

    let side = params.resolution as usize;
    if fitted.dimensions() != (params.resolution, params.resolution) {
        anyhow::bail!(
            "Expected a {}x{} input, got {:?}",
            side,
            side,
            fitted.dimensions()
        );
    }

    let base = target_probability(&predict(fitted)?, target_class)?;
    let fill = image::Rgb(preprocess::fill_color(fitted)?);

    let mut drops = Array2::<f32>::zeros((side, side));
    let mut counts = Array2::<f32>::zeros((side, side));
    let offsets = params.offsets();
    let patch = params.patch as usize;

    let mut occluded = fitted.clone();
    for &y in &offsets {
        for &x in &offsets {
            for py in y..y + params.patch {
                for px in x..x + params.patch {
                    occluded.put_pixel(px, py, fill);
                }
            }

            let p = target_probability(&predict(&occluded)?, target_class)?;
            let drop = (base - p).max(0.0);

            let (x, y) = (x as usize, y as usize);
            let mut window = drops.slice_mut(ndarray::s![y..y + patch, x..x + patch]);
            window += drop;
            let mut window = counts.slice_mut(ndarray::s![y..y + patch, x..x + patch]);
            window += 1.0;

            // Restore the patch for the next position
            for py in y..y + patch {
                for px in x..x + patch {
                    let (px, py) = (px as u32, py as u32);
                    occluded.put_pixel(px, py, *fitted.get_pixel(px, py));
                }
            }
        }
    }

    counts.mapv_inplace(|c| if c == 0.0 { 1.0 } else { c });
    let mut heat = drops / counts;
    heat.mapv_inplace(|v| v.max(0.0));

    let max = heat.iter().copied().fold(0.0f32, f32::max);
    if max > 0.0 {
        heat.mapv_inplace(|v| v / max);
    }

    tracing::trace!(
        positions = offsets.len().pow(2),
        base_probability = base,
        max_drop = max,
        "Occlusion scan finished"
    );

    Ok(heat)
}

/// Colorize a normalized map with `jet`.
pub fn colorize(heat: &Array2<f32>) -> RgbImage {
    let (rows, cols) = heat.dim();
    RgbImage::from_fn(cols as u32, rows as u32, |x, y| {
        colormap::jet(heat[[y as usize, x as usize]])
    })
}

/// Occlusion heatmap for `image`, colorized and scaled back to its size.
///
/// `predict` receives images already fitted to `input_resolution` and returns
/// the class probability vector.
pub fn generate<F>(
    predict: F,
    image: &RgbImage,
    input_resolution: u32,
    target_class: usize,
) -> anyhow::Result<RgbImage>
where
    F: FnMut(&RgbImage) -> anyhow::Result<Vec<f32>>,
{
    let (width, height) = image.dimensions();
    let fitted = preprocess::fit_square(image, input_resolution)?;
    let params = OcclusionParams::for_resolution(input_resolution);

    let heat = sensitivity(predict, &fitted, params, target_class)?;
    let colored = colorize(&heat);

    Ok(imageops::resize(
        &colored,
        width,
        height,
        imageops::FilterType::Triangle,
    ))
}
