//! Reduction of raw model outputs to the real/fake confidence contract.

use crate::backend::RawOutput;
use ndarray::{ArrayD, Axis};

/// Maximum deviation from 1.0 tolerated for `real + fake`.
pub const SUM_TOLERANCE: f32 = 1e-3;

/// Decimal places kept on reported confidences.
pub const CONFIDENCE_DECIMALS: i32 = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activation {
    /// Always apply softmax (classifiers that emit logits).
    Softmax,
    /// Apply softmax only if some value falls outside `[0, 1]`.
    SoftmaxOutsideUnitRange,
}

/// Pick the score tensor out of a forward pass: a value named `logits`
/// wins, otherwise the first tensor found.
pub fn select_tensor(raw: RawOutput) -> anyhow::Result<ArrayD<f32>> {
    match raw {
        RawOutput::Tensor(t) => Ok(t),
        RawOutput::Named(values) => {
            let mut first = None;
            for (name, value) in values {
                let Some(tensor) = value else { continue };
                if name == "logits" {
                    return Ok(tensor);
                }
                if first.is_none() {
                    first = Some(tensor);
                }
            }
            first.ok_or_else(|| anyhow::anyhow!("Model output contains no tensor"))
        }
    }
}

/// Drop a leading batch axis of size 1 and flatten the rest in row-major order.
pub fn class_scores(tensor: ArrayD<f32>) -> Vec<f32> {
    let tensor = if tensor.ndim() >= 2 && tensor.shape()[0] == 1 {
        tensor.index_axis_move(Axis(0), 0)
    } else {
        tensor
    };
    tensor.iter().copied().collect()
}

/// Numerically stable softmax.
pub fn softmax(values: &[f32]) -> Vec<f32> {
    let max = values.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = values.iter().map(|v| (v - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

fn within_unit_range(values: &[f32]) -> bool {
    values.iter().all(|v| (0.0..=1.0).contains(v))
}

/// Full output normalization: select, collapse, flatten, activate.
///
/// A single-unit output is a sigmoid head: it is squashed if needed and
/// expanded to `[1 - p, p]`.
pub fn probabilities(raw: RawOutput, activation: Activation) -> anyhow::Result<Vec<f32>> {
    let scores = class_scores(select_tensor(raw)?);

    if scores.is_empty() {
        anyhow::bail!("Model returned an empty output");
    }
    if scores.iter().any(|v| !v.is_finite()) {
        anyhow::bail!("Model returned non-finite scores: {:?}", scores);
    }

    if let [single] = scores[..] {
        let p = if (0.0..=1.0).contains(&single) {
            single
        } else {
            sigmoid(single)
        };
        return Ok(vec![1.0 - p, p]);
    }

    let probs = match activation {
        Activation::Softmax => softmax(&scores),
        Activation::SoftmaxOutsideUnitRange if !within_unit_range(&scores) => softmax(&scores),
        Activation::SoftmaxOutsideUnitRange => scores,
    };

    Ok(probs)
}

/// Per-model verdict derived from a probability vector.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Confidences {
    pub real: f32,
    pub fake: f32,
}

impl Confidences {
    /// Class 0 is "real", class 1 is "fake". The pair is rescaled to sum to 1
    /// when wider outputs leave mass on other classes.
    pub fn from_probabilities(probs: &[f32]) -> anyhow::Result<Self> {
        let (real, fake) = match probs {
            [] => anyhow::bail!("No class probabilities"),
            [p] => (1.0 - p, *p),
            [real, fake, ..] => (*real, *fake),
        };

        if !within_unit_range(&[real, fake]) {
            anyhow::bail!("Probabilities out of range: real={}, fake={}", real, fake);
        }

        let sum = real + fake;
        if (sum - 1.0).abs() <= SUM_TOLERANCE {
            return Ok(Self { real, fake });
        }
        if sum <= f32::EPSILON {
            return Ok(Self {
                real: 0.5,
                fake: 0.5,
            });
        }
        Ok(Self {
            real: real / sum,
            fake: fake / sum,
        })
    }

    /// `(real, fake)` as reported to callers, rounded to
    /// [`CONFIDENCE_DECIMALS`] places.
    pub fn reported(&self) -> (f64, f64) {
        (
            round_to(self.real as f64, CONFIDENCE_DECIMALS),
            round_to(self.fake as f64, CONFIDENCE_DECIMALS),
        )
    }

    /// Strictly greater reported fake confidence means fake; ties are real.
    pub fn is_fake(&self) -> bool {
        let (real, fake) = self.reported();
        fake > real
    }

    /// Class whose probability the occlusion map tracks.
    pub fn predicted_index(&self) -> usize {
        if self.is_fake() { 1 } else { 0 }
    }
}

pub(crate) fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}
