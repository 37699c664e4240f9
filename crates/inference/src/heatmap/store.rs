use image::{ImageFormat, RgbImage};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Writes heatmaps as standalone PNG files under one directory.
#[derive(Debug)]
pub struct HeatmapStore {
    dir: PathBuf,
    sequence: AtomicU64,
}

impl HeatmapStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            sequence: AtomicU64::new(0),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File name unique per process and call:
    /// `heatmap_[<job>_]<model>_<millis>_<pid>_<seq>.png`.
    pub fn file_name(&self, model_name: &str, job_id: Option<i64>) -> String {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or_default();
        let seq = self.sequence.fetch_add(1, Ordering::Relaxed);
        let job = job_id.map(|id| format!("{}_", id)).unwrap_or_default();

        format!(
            "heatmap_{}{}_{}_{}_{}.png",
            job,
            sanitize(model_name),
            millis,
            std::process::id(),
            seq
        )
    }

    pub fn persist(
        &self,
        heatmap: &RgbImage,
        model_name: &str,
        job_id: Option<i64>,
    ) -> anyhow::Result<PathBuf> {
        std::fs::create_dir_all(&self.dir)?;

        let path = self.dir.join(self.file_name(model_name, job_id));
        heatmap.save_with_format(&path, ImageFormat::Png)?;

        tracing::debug!(model = model_name, path = %path.display(), "Heatmap written");
        Ok(path)
    }
}

fn sanitize(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect();

    if cleaned.is_empty() {
        "model".to_string()
    } else {
        cleaned
    }
}
