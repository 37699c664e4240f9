use crate::errors::EngineError;
use crate::registry::ModelDescriptor;
use std::path::{Component, Path, PathBuf};

/// Base directories probed for relative storage references.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchRoots {
    pub working_dir: PathBuf,
    pub models_dir: PathBuf,
    /// Models directory bundled with the application, `<base>/app/models` by default.
    pub app_models_dir: PathBuf,
    pub project_root: PathBuf,
}

impl SearchRoots {
    /// Every root anchored at `base`, the layout used by tests and local runs.
    pub fn under(base: &Path) -> Self {
        Self {
            working_dir: base.to_path_buf(),
            models_dir: base.join("models"),
            app_models_dir: base.join("app").join("models"),
            project_root: base.parent().unwrap_or(base).to_path_buf(),
        }
    }
}

/// Turns a descriptor's storage reference into an existing file path.
#[derive(Debug, Clone)]
pub struct PathResolver {
    roots: SearchRoots,
}

impl PathResolver {
    pub fn new(roots: SearchRoots) -> Self {
        let anchor = roots.working_dir.clone();
        let absolute = |p: PathBuf| normalize(&anchor.join(p));
        Self {
            roots: SearchRoots {
                working_dir: normalize(&roots.working_dir),
                models_dir: absolute(roots.models_dir),
                app_models_dir: absolute(roots.app_models_dir),
                project_root: absolute(roots.project_root),
            },
        }
    }

    pub fn roots(&self) -> &SearchRoots {
        &self.roots
    }

    /// Ordered, de-duplicated candidate list for a storage reference.
    pub fn candidates(&self, storage_ref: &str) -> Vec<PathBuf> {
        let raw = Path::new(storage_ref);
        if raw.is_absolute() {
            return vec![normalize(raw)];
        }

        let roots = &self.roots;
        let bases = [
            roots.working_dir.clone(),
            roots.models_dir.clone(),
            // copies that were accidentally nested one level too deep
            roots.models_dir.join("models"),
            roots.app_models_dir.clone(),
            roots.project_root.join("models"),
            roots.project_root.clone(),
        ];

        let mut candidates: Vec<PathBuf> = Vec::with_capacity(bases.len());
        for base in bases {
            let candidate = normalize(&base.join(raw));
            if !candidates.contains(&candidate) {
                candidates.push(candidate);
            }
        }
        candidates
    }

    /// First existing candidate for the descriptor.
    pub fn resolve(&self, descriptor: &ModelDescriptor) -> Result<PathBuf, EngineError> {
        if descriptor.storage_ref.trim().is_empty() {
            return Err(EngineError::MissingStorageRef {
                name: descriptor.name.clone(),
            });
        }

        let candidates = self.candidates(&descriptor.storage_ref);

        tracing::debug!(
            model = %descriptor.name,
            storage_ref = %descriptor.storage_ref,
            candidates = ?candidates,
            "Resolving model artifact"
        );

        match candidates.iter().find(|p| p.is_file()) {
            Some(found) => Ok(found.clone()),
            None => Err(EngineError::MissingArtifact {
                name: descriptor.name.clone(),
                tried: candidates,
            }),
        }
    }
}

/// Lexically clean a path: drop `.` and fold `..` without touching the filesystem.
pub(crate) fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match out.components().next_back() {
                Some(Component::Normal(_)) => {
                    out.pop();
                }
                Some(Component::RootDir) | Some(Component::Prefix(_)) => {}
                _ => out.push(".."),
            },
            other => out.push(other),
        }
    }
    out
}
