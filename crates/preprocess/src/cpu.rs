use crate::config::{DEFAULT_INPUT_SIZE, IMAGENET_MEAN, IMAGENET_STD};
use crate::{Normalization, Preprocess, TensorLayout, TensorSpec};
use common::span_debug;
use fast_image_resize::{
    FilterType, PixelType, ResizeAlg, ResizeOptions, Resizer,
    images::{Image, ImageRef},
};
use image::RgbImage;
use ndarray::{Array, IxDyn};

/// Resizes and center-crops to a square with Lanczos3, then lays the pixels
/// out as a model tensor.
#[derive(Debug, Clone, Copy)]
pub struct CpuPreProcessor {
    pub input_size: u32,
    pub spec: TensorSpec,
}

impl CpuPreProcessor {
    pub fn new(input_size: u32, spec: TensorSpec) -> Self {
        Self { input_size, spec }
    }
}

impl Default for CpuPreProcessor {
    fn default() -> Self {
        Self::new(DEFAULT_INPUT_SIZE, TensorSpec::TORCH)
    }
}

impl Preprocess for CpuPreProcessor {
    fn preprocess(&self, image: &RgbImage) -> anyhow::Result<Array<f32, IxDyn>> {
        let fitted = fit_square(image, self.input_size)?;
        to_tensor(&fitted, self.spec)
    }

    fn input_size(&self) -> u32 {
        self.input_size
    }
}

/// Scale the image so it covers a `side x side` square, cropping the overflow
/// evenly from both ends.
pub fn fit_square(image: &RgbImage, side: u32) -> anyhow::Result<RgbImage> {
    let _s = span_debug!("fit_square", side);

    if side == 0 {
        anyhow::bail!("Target side must be positive");
    }
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        anyhow::bail!("Cannot fit a degenerate {}x{} image", width, height);
    }

    tracing::trace!(width, height, side, "Fitting image to square");

    let src = ImageRef::new(width, height, image.as_raw(), PixelType::U8x3)?;
    let mut dst = Image::new(side, side, PixelType::U8x3);

    Resizer::new().resize(
        &src,
        &mut dst,
        &ResizeOptions::new()
            .resize_alg(ResizeAlg::Convolution(FilterType::Lanczos3))
            .fit_into_destination(Some((0.5, 0.5))),
    )?;

    RgbImage::from_raw(side, side, dst.buffer().to_vec())
        .ok_or_else(|| anyhow::anyhow!("Resized buffer does not match {}x{} RGB", side, side))
}

/// Lay out an RGB image as `[1, 3, H, W]` or `[1, H, W, 3]` floats.
pub fn to_tensor(image: &RgbImage, spec: TensorSpec) -> anyhow::Result<Array<f32, IxDyn>> {
    let _s = span_debug!("to_tensor");

    let width = image.width() as usize;
    let height = image.height() as usize;
    let spatial = width * height;

    let mut output = vec![0.0f32; 3 * spatial];

    for (i, px) in image.as_raw().chunks_exact(3).enumerate() {
        for c in 0..3 {
            let scaled = px[c] as f32 / 255.0;
            let value = match spec.normalization {
                Normalization::Unit => scaled,
                Normalization::ImageNet => (scaled - IMAGENET_MEAN[c]) / IMAGENET_STD[c],
            };
            match spec.layout {
                TensorLayout::Nchw => output[i + c * spatial] = value,
                TensorLayout::Nhwc => output[i * 3 + c] = value,
            }
        }
    }

    let shape = match spec.layout {
        TensorLayout::Nchw => [1, 3, height, width],
        TensorLayout::Nhwc => [1, height, width, 3],
    };

    Ok(Array::from_shape_vec(IxDyn(&shape), output)?)
}

/// Average color of the image, obtained by downsizing it to a single pixel.
pub fn fill_color(image: &RgbImage) -> anyhow::Result<[u8; 3]> {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        anyhow::bail!("Cannot average a degenerate {}x{} image", width, height);
    }

    let src = ImageRef::new(width, height, image.as_raw(), PixelType::U8x3)?;
    let mut dst = Image::new(1, 1, PixelType::U8x3);

    Resizer::new().resize(
        &src,
        &mut dst,
        &ResizeOptions::new().resize_alg(ResizeAlg::Convolution(FilterType::Box)),
    )?;

    let px = dst.buffer();
    Ok([px[0], px[1], px[2]])
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn uniform(width: u32, height: u32, value: u8) -> RgbImage {
        RgbImage::from_pixel(width, height, Rgb([value, value, value]))
    }

    /// Three vertical bands: red | green | blue
    fn banded(band_width: u32, height: u32) -> RgbImage {
        RgbImage::from_fn(band_width * 3, height, |x, _| match x / band_width {
            0 => Rgb([255, 0, 0]),
            1 => Rgb([0, 255, 0]),
            _ => Rgb([0, 0, 255]),
        })
    }

    #[test]
    fn test_fit_square_output_size() {
        for (w, h) in [(640, 480), (100, 300), (7, 7), (1, 1)] {
            let fitted = fit_square(&uniform(w, h, 90), 224).unwrap();
            assert_eq!(fitted.dimensions(), (224, 224), "{}x{} should fit to 224", w, h);
        }
    }

    #[test]
    fn test_fit_square_crops_center() {
        // 300x100 -> 100x100 crop keeps only the green band
        let fitted = fit_square(&banded(100, 100), 20).unwrap();
        let center = fitted.get_pixel(10, 10);
        assert!(center[1] > 200, "center should be green, got {:?}", center);
        assert!(center[0] < 50 && center[2] < 50, "center should be green, got {:?}", center);
    }

    #[test]
    fn test_fit_square_rejects_degenerate_input() {
        assert!(fit_square(&uniform(10, 10, 0), 0).is_err());
        assert!(fit_square(&RgbImage::new(0, 5), 32).is_err());
    }

    #[test]
    fn test_nchw_shape_and_imagenet_normalization() {
        let tensor = to_tensor(&uniform(4, 4, 128), TensorSpec::TORCH).unwrap();
        assert_eq!(tensor.shape(), &[1, 3, 4, 4]);

        // For gray 128 (0.502) with ImageNet norm:
        //   R: (0.502 - 0.485) / 0.229 ≈ 0.074
        //   G: (0.502 - 0.456) / 0.224 ≈ 0.205
        //   B: (0.502 - 0.406) / 0.225 ≈ 0.427
        let r = tensor[[0, 0, 2, 2]];
        let g = tensor[[0, 1, 2, 2]];
        let b = tensor[[0, 2, 2, 2]];
        assert!((r - 0.074).abs() < 0.01, "R channel should be ~0.074 (got {})", r);
        assert!((g - 0.205).abs() < 0.01, "G channel should be ~0.205 (got {})", g);
        assert!((b - 0.427).abs() < 0.01, "B channel should be ~0.427 (got {})", b);
    }

    #[test]
    fn test_nhwc_shape_and_unit_scaling() {
        let mut img = uniform(3, 2, 0);
        img.put_pixel(2, 1, Rgb([255, 51, 0]));

        let tensor = to_tensor(&img, TensorSpec::KERAS).unwrap();
        assert_eq!(tensor.shape(), &[1, 2, 3, 3]);

        assert_eq!(tensor[[0, 1, 2, 0]], 1.0);
        assert!((tensor[[0, 1, 2, 1]] - 0.2).abs() < 1e-6);
        assert_eq!(tensor[[0, 1, 2, 2]], 0.0);
        assert_eq!(tensor[[0, 0, 0, 0]], 0.0);
        assert!(tensor.iter().all(|v| (0.0..=1.0).contains(v)));
    }

    #[test]
    fn test_channel_planes_do_not_overlap() {
        let img = RgbImage::from_pixel(2, 2, Rgb([255, 0, 0]));
        let spec = TensorSpec {
            layout: TensorLayout::Nchw,
            normalization: Normalization::Unit,
        };
        let tensor = to_tensor(&img, spec).unwrap();

        assert!(tensor.slice(ndarray::s![0, 0, .., ..]).iter().all(|&v| v == 1.0));
        assert!(tensor.slice(ndarray::s![0, 1, .., ..]).iter().all(|&v| v == 0.0));
        assert!(tensor.slice(ndarray::s![0, 2, .., ..]).iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_fill_color_is_average() {
        let [r, g, b] = fill_color(&uniform(17, 9, 128)).unwrap();
        for v in [r, g, b] {
            assert!((v as i32 - 128).abs() <= 1, "uniform gray should stay gray, got {}", v);
        }

        let half = RgbImage::from_fn(10, 10, |x, _| {
            if x < 5 { Rgb([0, 0, 0]) } else { Rgb([255, 255, 255]) }
        });
        let [r, g, b] = fill_color(&half).unwrap();
        for v in [r, g, b] {
            assert!((v as i32 - 128).abs() <= 2, "expected mid gray, got {}", v);
        }
    }

    #[test]
    fn test_preprocess_trait() {
        let preprocessor = CpuPreProcessor::new(32, TensorSpec::KERAS);
        let tensor = preprocessor.preprocess(&uniform(100, 60, 200)).unwrap();

        assert_eq!(preprocessor.input_size(), 32);
        assert_eq!(tensor.shape(), &[1, 32, 32, 3]);
    }
}
