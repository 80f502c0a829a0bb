use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde::Serialize;

use super::models::JobKind;

/// Outcome of trying to claim a project's job slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acquire {
    Acquired,
    /// Another job holds the slot; carries its kind.
    AlreadyRunning(JobKind),
}

/// A job currently holding a project's slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActiveJob {
    pub project: String,
    pub kind: JobKind,
}

/// Tracks which projects have a job in flight.
///
/// Implementations must make `try_acquire` an atomic check-and-insert, and
/// `release` idempotent.
pub trait JobRegistry: Send + Sync {
    fn try_acquire(&self, project: &str, kind: JobKind) -> Acquire;

    fn release(&self, project: &str);

    fn active(&self) -> Vec<ActiveJob>;
}

/// Single-mutex registry shared by all projects.
#[derive(Debug, Default)]
pub struct InMemoryJobRegistry {
    jobs: Mutex<HashMap<String, JobKind>>,
}

impl InMemoryJobRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

impl JobRegistry for InMemoryJobRegistry {
    fn try_acquire(&self, project: &str, kind: JobKind) -> Acquire {
        // A poisoned lock only means a holder panicked mid-insert/remove; the map is still usable.
        let mut jobs = self.jobs.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(existing) = jobs.get(project) {
            return Acquire::AlreadyRunning(*existing);
        }
        jobs.insert(project.to_string(), kind);
        Acquire::Acquired
    }

    fn release(&self, project: &str) {
        let mut jobs = self.jobs.lock().unwrap_or_else(|e| e.into_inner());
        jobs.remove(project);
    }

    fn active(&self) -> Vec<ActiveJob> {
        let jobs = self.jobs.lock().unwrap_or_else(|e| e.into_inner());
        let mut active: Vec<ActiveJob> = jobs
            .iter()
            .map(|(project, kind)| ActiveJob {
                project: project.clone(),
                kind: *kind,
            })
            .collect();
        active.sort_by(|a, b| a.project.cmp(&b.project));
        active
    }
}

/// Claimed slot that releases itself when dropped, including during unwinding.
pub struct SlotGuard {
    registry: Arc<dyn JobRegistry>,
    project: String,
}

impl SlotGuard {
    /// Claim `project`'s slot, or report who holds it.
    pub fn acquire(
        registry: &Arc<dyn JobRegistry>,
        project: &str,
        kind: JobKind,
    ) -> Result<Self, JobKind> {
        match registry.try_acquire(project, kind) {
            Acquire::Acquired => Ok(Self {
                registry: Arc::clone(registry),
                project: project.to_string(),
            }),
            Acquire::AlreadyRunning(existing) => Err(existing),
        }
    }

    pub fn project(&self) -> &str {
        &self.project
    }
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        self.registry.release(&self.project);
        tracing::debug!(project = %self.project, "released job slot");
    }
}

impl std::fmt::Debug for SlotGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlotGuard")
            .field("project", &self.project)
            .finish()
    }
}
