use crate::registry::ModelDescriptor;
use crate::scores::{Confidences, round_to};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::path::PathBuf;

/// Placeholder written in place of a missing heatmap path.
pub const NO_HEATMAP: &str = "N/A";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Label {
    Real,
    Fake,
    Error,
}

impl Label {
    pub fn as_str(&self) -> &'static str {
        match self {
            Label::Real => "real",
            Label::Fake => "fake",
            Label::Error => "error",
        }
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one model on one image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferenceResult {
    pub model_name: String,
    pub version: String,
    pub confidence_real: f64,
    pub confidence_fake: f64,
    pub label: Label,
    pub elapsed_ms: f64,
    #[serde(
        serialize_with = "serialize_heatmap_ref",
        deserialize_with = "deserialize_heatmap_ref",
        default
    )]
    pub heatmap_ref: Option<PathBuf>,
}

impl InferenceResult {
    pub fn scored(
        descriptor: &ModelDescriptor,
        confidences: Confidences,
        elapsed_ms: f64,
        heatmap_ref: Option<PathBuf>,
    ) -> Self {
        let (confidence_real, confidence_fake) = confidences.reported();
        let label = if confidences.is_fake() {
            Label::Fake
        } else {
            Label::Real
        };
        Self {
            model_name: descriptor.name.clone(),
            version: descriptor.version.clone(),
            confidence_real,
            confidence_fake,
            label,
            elapsed_ms: round_to(elapsed_ms, 2),
            heatmap_ref,
        }
    }

    /// Placeholder for a model that could not produce a verdict.
    pub fn sentinel(name: &str, version: &str) -> Self {
        Self {
            model_name: name.to_string(),
            version: version.to_string(),
            confidence_real: 0.5,
            confidence_fake: 0.5,
            label: Label::Error,
            elapsed_ms: 0.0,
            heatmap_ref: None,
        }
    }

    pub fn is_error(&self) -> bool {
        self.label == Label::Error
    }
}

fn serialize_heatmap_ref<S: Serializer>(value: &Option<PathBuf>, s: S) -> Result<S::Ok, S::Error> {
    match value {
        Some(path) => s.serialize_str(&path.to_string_lossy()),
        None => s.serialize_str(NO_HEATMAP),
    }
}

fn deserialize_heatmap_ref<'de, D: Deserializer<'de>>(d: D) -> Result<Option<PathBuf>, D::Error> {
    let raw = Option::<String>::deserialize(d)?;
    Ok(raw
        .filter(|s| !s.is_empty() && s != NO_HEATMAP)
        .map(PathBuf::from))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Decision {
    Real,
    Fake,
    Uncertain,
    Pending,
}

impl Decision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::Real => "REAL",
            Decision::Fake => "FAKE",
            Decision::Uncertain => "UNCERTAIN",
            Decision::Pending => "PENDING",
        }
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsensusResult {
    pub decision: Decision,
    pub score: f64,
    pub explanation: Vec<String>,
}

/// Everything one analysis call returns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisReport {
    pub models: Vec<InferenceResult>,
    pub consensus: ConsensusResult,
}

impl AnalysisReport {
    pub fn result_for(&self, model_name: &str) -> Option<&InferenceResult> {
        self.models.iter().find(|r| r.model_name == model_name)
    }

    pub fn error_count(&self) -> usize {
        self.models.iter().filter(|r| r.is_error()).count()
    }
}
