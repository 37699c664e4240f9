//! In-process stand-in runtime used by unit tests.
//!
//! The "artifact" is a text file describing how the model behaves:
//! `0.2,0.8` returns fixed scores, `fail` errors on forward, `panic` panics,
//! `brightness` scores the mean input intensity as the fake probability and
//! `slow:<ms>` sleeps before answering 0.4/0.6. Anything else fails to load.

use crate::backend::{Classifier, LoadedModel, RawOutput, RuntimeAdapter};
use crate::registry::RuntimeFamily;
use ndarray::{ArrayD, IxDyn};
use preprocess::TensorSpec;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

#[derive(Debug, Clone)]
enum Behavior {
    Fixed(Vec<f32>),
    Fail,
    Panic,
    Brightness,
    Slow(Duration),
}

impl Behavior {
    fn parse(content: &str) -> anyhow::Result<Self> {
        let content = content.trim();
        match content {
            "fail" => return Ok(Behavior::Fail),
            "panic" => return Ok(Behavior::Panic),
            "brightness" => return Ok(Behavior::Brightness),
            _ => {}
        }
        if let Some(ms) = content.strip_prefix("slow:") {
            return Ok(Behavior::Slow(Duration::from_millis(ms.parse()?)));
        }
        let scores = content
            .split(',')
            .map(|s| s.trim().parse::<f32>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| anyhow::anyhow!("not a stub model: {:?}", content))?;
        Ok(Behavior::Fixed(scores))
    }
}

struct StubClassifier {
    behavior: Behavior,
    calls: Arc<AtomicUsize>,
}

fn row(values: Vec<f32>) -> RawOutput {
    let n = values.len();
    RawOutput::Tensor(ArrayD::from_shape_vec(IxDyn(&[1, n]), values).expect("row shape"))
}

impl Classifier for StubClassifier {
    fn forward(&self, input: &ArrayD<f32>) -> anyhow::Result<RawOutput> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.behavior {
            Behavior::Fixed(scores) => Ok(row(scores.clone())),
            Behavior::Fail => anyhow::bail!("stub forward failure"),
            Behavior::Panic => panic!("stub forward panic"),
            Behavior::Brightness => {
                let mean = input.mean().unwrap_or(0.0).clamp(0.0, 1.0);
                Ok(row(vec![1.0 - mean, mean]))
            }
            Behavior::Slow(delay) => {
                thread::sleep(*delay);
                Ok(row(vec![0.4, 0.6]))
            }
        }
    }
}

pub struct StubAdapter {
    family: RuntimeFamily,
    available: bool,
    reject_all: bool,
    load_delay: Duration,
    loads: AtomicUsize,
    forwards: Arc<AtomicUsize>,
}

impl StubAdapter {
    pub fn new(family: RuntimeFamily) -> Self {
        Self {
            family,
            available: true,
            reject_all: false,
            load_delay: Duration::ZERO,
            loads: AtomicUsize::new(0),
            forwards: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn unavailable(mut self) -> Self {
        self.available = false;
        self
    }

    pub fn rejecting_all(mut self) -> Self {
        self.reject_all = true;
        self
    }

    pub fn with_load_delay(mut self, delay: Duration) -> Self {
        self.load_delay = delay;
        self
    }

    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    pub fn forward_count(&self) -> usize {
        self.forwards.load(Ordering::SeqCst)
    }
}

impl RuntimeAdapter for StubAdapter {
    fn family(&self) -> RuntimeFamily {
        self.family
    }

    fn is_available(&self) -> bool {
        self.available
    }

    fn load(&self, path: &Path) -> anyhow::Result<LoadedModel> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        thread::sleep(self.load_delay);
        if self.reject_all {
            anyhow::bail!("{} runtime rejects every artifact", self.family);
        }
        let behavior = Behavior::parse(&std::fs::read_to_string(path)?)?;
        Ok(Arc::new(StubClassifier {
            behavior,
            calls: Arc::clone(&self.forwards),
        }))
    }

    fn tensor_spec(&self) -> TensorSpec {
        TensorSpec::KERAS
    }
}
