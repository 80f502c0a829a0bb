use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use super::models::{StatusRecord, Transition};
use crate::util::write_atomic;

/// Per-project status snapshots, one JSON file each, overwritten on every transition.
#[derive(Debug, Clone)]
pub struct StatusStore {
    dir: PathBuf,
}

impl StatusStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, project: &str) -> PathBuf {
        self.dir.join(format!("{}.json", project))
    }

    /// Record `transition` as the project's current status.
    pub fn write(&self, project: &str, transition: &Transition) -> Result<StatusRecord> {
        let record = StatusRecord::from_transition(project, transition);
        self.write_record(project, &record)?;
        Ok(record)
    }

    pub fn write_record(&self, project: &str, record: &StatusRecord) -> Result<()> {
        let json = serde_json::to_vec(record).context("Failed to serialize status record")?;
        write_atomic(&self.path_for(project), &json)
    }

    /// Last written record; `not_started` when absent, `unknown` when unreadable.
    pub fn read(&self, project: &str) -> StatusRecord {
        let path = self.path_for(project);
        if !path.exists() {
            return StatusRecord::not_started();
        }
        std::fs::read(&path)
            .ok()
            .and_then(|bytes| serde_json::from_slice::<StatusRecord>(&bytes).ok())
            .map(StatusRecord::normalized)
            .unwrap_or_else(StatusRecord::unknown)
    }
}
