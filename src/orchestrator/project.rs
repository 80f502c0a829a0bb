use std::path::{Path, PathBuf};

use crate::errors::OrchestratorError;

/// A project name that passed validation, with its canonical directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectHandle {
    pub name: String,
    pub dir: PathBuf,
}

/// Validates user-supplied project names against the projects base directory.
#[derive(Debug, Clone)]
pub struct ProjectResolver {
    base_dir: PathBuf,
    entry_point: String,
}

impl ProjectResolver {
    pub fn new(base_dir: impl Into<PathBuf>, entry_point: impl Into<String>) -> Self {
        Self {
            base_dir: base_dir.into(),
            entry_point: entry_point.into(),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn entry_point(&self) -> &str {
        &self.entry_point
    }

    /// Resolve `name` to a direct child directory of the base directory.
    ///
    /// Rejects empty names, names containing a path separator, anything that
    /// canonicalizes outside (or onto) the base, and non-directories.
    pub fn resolve(&self, name: &str) -> Result<ProjectHandle, OrchestratorError> {
        let invalid = || OrchestratorError::InvalidProject {
            name: name.to_string(),
        };

        if name.is_empty() || name.contains(['/', '\\']) {
            return Err(invalid());
        }

        let base = self.base_dir.canonicalize().map_err(|_| invalid())?;
        let candidate = base.join(name).canonicalize().map_err(|_| invalid())?;

        // Symlinks may point anywhere; the canonical parent must be the base itself.
        if candidate == base || candidate.parent() != Some(base.as_path()) {
            return Err(invalid());
        }
        if !candidate.is_dir() {
            return Err(invalid());
        }

        Ok(ProjectHandle {
            name: name.to_string(),
            dir: candidate,
        })
    }

    /// Resolve `name` and additionally require the toolchain entry point.
    pub fn resolve_buildable(&self, name: &str) -> Result<ProjectHandle, OrchestratorError> {
        let handle = self.resolve(name)?;
        if !self.is_buildable(&handle.dir) {
            return Err(OrchestratorError::MissingEntryPoint {
                name: name.to_string(),
                entry_point: self.entry_point.clone(),
            });
        }
        Ok(handle)
    }

    pub fn is_buildable(&self, dir: &Path) -> bool {
        self.entry_point_path(dir).is_file()
    }

    pub fn entry_point_path(&self, dir: &Path) -> PathBuf {
        dir.join(&self.entry_point)
    }

    /// Names of buildable projects in the base directory, sorted.
    /// A missing base directory yields an empty list.
    pub fn list_buildable(&self) -> Vec<String> {
        let Ok(entries) = std::fs::read_dir(&self.base_dir) else {
            return Vec::new();
        };
        let mut names: Vec<String> = entries
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.path().is_dir() && self.is_buildable(&entry.path()))
            .filter_map(|entry| entry.file_name().into_string().ok())
            .collect();
        names.sort();
        names
    }
}
