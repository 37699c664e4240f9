//! Matplotlib's `jet` colormap, sampled the same way matplotlib does: a
//! 256-entry lookup table built from the piecewise-linear segment data.

use image::Rgb;

type Segment = &'static [(f32, f32)];

const RED: Segment = &[(0.0, 0.0), (0.35, 0.0), (0.66, 1.0), (0.89, 1.0), (1.0, 0.5)];
const GREEN: Segment = &[
    (0.0, 0.0),
    (0.125, 0.0),
    (0.375, 1.0),
    (0.64, 1.0),
    (0.91, 0.0),
    (1.0, 0.0),
];
const BLUE: Segment = &[(0.0, 0.5), (0.11, 1.0), (0.34, 1.0), (0.65, 0.0), (1.0, 0.0)];

const LUT_SIZE: usize = 256;

fn interpolate(segment: Segment, x: f32) -> f32 {
    for pair in segment.windows(2) {
        let (x0, y0) = pair[0];
        let (x1, y1) = pair[1];
        if x <= x1 {
            if x1 <= x0 {
                return y1;
            }
            return y0 + (y1 - y0) * (x - x0) / (x1 - x0);
        }
    }
    segment.last().map(|&(_, y)| y).unwrap_or(0.0)
}

/// Map a value in `[0, 1]` to an RGB color. Values outside are clamped.
pub fn jet(value: f32) -> Rgb<u8> {
    let value = if value.is_finite() { value.clamp(0.0, 1.0) } else { 0.0 };
    let index = ((value * LUT_SIZE as f32) as usize).min(LUT_SIZE - 1);
    let x = index as f32 / (LUT_SIZE - 1) as f32;

    let channel = |segment: Segment| (interpolate(segment, x).clamp(0.0, 1.0) * 255.0) as u8;
    Rgb([channel(RED), channel(GREEN), channel(BLUE)])
}
