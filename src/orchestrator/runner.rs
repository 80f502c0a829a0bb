//! Background execution of build, clean and deploy jobs.
//!
//! Each accepted job runs on its own tokio task. The task owns the project's
//! `SlotGuard`, so the registry slot is released when the task finishes no
//! matter how it finishes. Failures never propagate to the caller that
//! started the job; they end up as an `error` status record plus whatever
//! output was captured in the log store.

use std::any::Any;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use tokio::task::JoinHandle;

use super::artifact::{ArtifactResolver, download_path};
use super::logs::{LogStore, Transcript};
use super::models::{BuildStage, CleanStage, DeployStage, JobKind, Transition, Variant};
use super::project::ProjectHandle;
use super::registry::SlotGuard;
use super::status::StatusStore;
use super::toolchain::{BridgeLocator, CommandRunner, CommandSpec, make_executable};

/// Secondary build-output directories removed after `gradlew clean`.
const CLEAN_DIRS: [&str; 3] = [".gradle", "build", "app/build"];

/// Why a job ended in the `error` state. `Display` is the user-facing status message.
#[derive(Debug, Error)]
pub enum JobFailure {
    #[error("{}", command_failed_message(.0))]
    CommandFailed(JobKind),

    #[error("APK not found in build outputs.")]
    ArtifactNotFound,

    #[error("No APK available to deploy.")]
    NothingToDeploy,

    #[error("Device bridge not found. Please install Android SDK platform-tools.")]
    BridgeNotFound,

    #[error("Unexpected error. View logs for details.")]
    Unexpected(#[from] anyhow::Error),
}

fn command_failed_message(kind: &JobKind) -> &'static str {
    match kind {
        JobKind::Build => "Build failed. View logs for details.",
        JobKind::Clean => "Clean cache failed. View logs for details.",
        JobKind::Deploy => "Deploy failed. View logs for details.",
    }
}

/// What to run against a project.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobSpec {
    Build { variant: Variant },
    Clean,
    /// `variant` enables falling back to the raw output tree when nothing is published yet.
    Deploy {
        address: String,
        variant: Option<Variant>,
    },
}

impl JobSpec {
    pub fn kind(&self) -> JobKind {
        match self {
            Self::Build { .. } => JobKind::Build,
            Self::Clean => JobKind::Clean,
            Self::Deploy { .. } => JobKind::Deploy,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Job {
    pub project: ProjectHandle,
    pub spec: JobSpec,
}

/// Handle to a spawned job. Dropping it does not cancel the job.
#[derive(Debug)]
pub struct JobHandle {
    project: String,
    kind: JobKind,
    task: JoinHandle<Result<(), JobFailure>>,
}

impl JobHandle {
    pub fn project(&self) -> &str {
        &self.project
    }

    pub fn kind(&self) -> JobKind {
        self.kind
    }

    /// Wait for the job to finish. The slot has been released by the time this returns.
    pub async fn wait(self) -> Result<(), JobFailure> {
        self.task
            .await
            .unwrap_or_else(|e| Err(JobFailure::Unexpected(anyhow::anyhow!("job task failed: {}", e))))
    }
}

/// Drives the per-kind state machines against the stores and the toolchain.
pub struct JobRunner {
    statuses: StatusStore,
    logs: LogStore,
    artifacts: ArtifactResolver,
    entry_point: String,
    commands: Arc<dyn CommandRunner>,
    bridge: BridgeLocator,
}

impl JobRunner {
    pub fn new(
        statuses: StatusStore,
        logs: LogStore,
        artifacts: ArtifactResolver,
        entry_point: impl Into<String>,
        commands: Arc<dyn CommandRunner>,
        bridge: BridgeLocator,
    ) -> Self {
        Self {
            statuses,
            logs,
            artifacts,
            entry_point: entry_point.into(),
            commands,
            bridge,
        }
    }

    /// Run `job` in the background. `slot` is held until the job ends.
    pub fn spawn(self: &Arc<Self>, job: Job, slot: SlotGuard) -> JobHandle {
        let project = job.project.name.clone();
        let kind = job.spec.kind();
        tracing::info!(project = %project, kind = %kind, "job accepted");

        let this = Arc::clone(self);
        let task = tokio::spawn(async move {
            let name = job.project.name.clone();

            // Run the state machine on its own task so a panic surfaces as a JoinError here.
            let inner = {
                let this = Arc::clone(&this);
                tokio::spawn(async move { this.execute(&job).await })
            };
            let (result, crashed) = match inner.await {
                Ok(result) => (result, false),
                Err(e) if e.is_panic() => (
                    Err(JobFailure::Unexpected(anyhow::anyhow!(
                        "job panicked: {}",
                        panic_message(e.into_panic())
                    ))),
                    true,
                ),
                Err(e) => (
                    Err(JobFailure::Unexpected(anyhow::anyhow!("job task failed: {}", e))),
                    true,
                ),
            };

            match &result {
                Ok(()) => tracing::info!(project = %name, kind = %kind, "job finished"),
                Err(failure) => {
                    // Deploy persists its own transcript unless its task died.
                    if kind != JobKind::Deploy || crashed {
                        this.save_unexpected_log(&name, failure);
                    }
                    this.record_failure(&name, kind, failure);
                }
            }
            drop(slot);
            result
        });

        JobHandle {
            project,
            kind,
            task,
        }
    }

    async fn execute(&self, job: &Job) -> Result<(), JobFailure> {
        match &job.spec {
            JobSpec::Build { variant } => self.run_build(&job.project, *variant).await,
            JobSpec::Clean => self.run_clean(&job.project).await,
            JobSpec::Deploy { address, variant } => {
                self.run_deploy(&job.project, address, *variant).await
            }
        }
    }

    fn transition(&self, project: &str, transition: Transition) -> Result<(), JobFailure> {
        let record = self.statuses.write(project, &transition)?;
        tracing::info!(
            project = %project,
            status = record.status.as_str(),
            progress = record.progress,
            "status updated"
        );
        Ok(())
    }

    fn record_failure(&self, project: &str, kind: JobKind, failure: &JobFailure) {
        match failure {
            JobFailure::Unexpected(e) => {
                tracing::error!(project = %project, kind = %kind, error = %format!("{:#}", e), "job failed unexpectedly")
            }
            other => tracing::error!(project = %project, kind = %kind, error = %other, "job failed"),
        }
        if let Err(e) = self.statuses.write(project, &Transition::failed(failure.to_string())) {
            tracing::error!(project = %project, error = %format!("{:#}", e), "failed to record job failure");
        }
    }

    /// Replace the project's log with the fault detail so it never shows a previous run.
    fn save_unexpected_log(&self, project: &str, failure: &JobFailure) {
        let JobFailure::Unexpected(e) = failure else {
            return;
        };
        if let Err(write_err) = self.logs.write(project, &format!("Unexpected error: {:#}", e)) {
            tracing::error!(project = %project, error = %format!("{:#}", write_err), "failed to save job log");
        }
    }

    fn wrapper_path(&self, project: &ProjectHandle) -> PathBuf {
        project.dir.join(&self.entry_point)
    }

    // ── Build ────────────────────────────────────────────────────────

    async fn run_build(&self, project: &ProjectHandle, variant: Variant) -> Result<(), JobFailure> {
        let name = project.name.as_str();
        self.transition(name, Transition::Build(BuildStage::Preparing))?;

        let wrapper = self.wrapper_path(project);
        make_executable(&wrapper)?;

        self.transition(name, Transition::Build(BuildStage::Building))?;
        let spec = CommandSpec::new(&wrapper)
            .arg(variant.assemble_task())
            .current_dir(&project.dir);
        let output = self.commands.run(&spec).await?;

        // Keep the output before judging the exit code.
        self.logs.write_truncated(name, &output.combined())?;
        if !output.success() {
            tracing::warn!(project = %name, code = ?output.code, "{} exited unsuccessfully", spec.program_name());
            return Err(JobFailure::CommandFailed(JobKind::Build));
        }

        self.transition(name, Transition::Build(BuildStage::FindingArtifact))?;
        let built = self
            .artifacts
            .find_latest_in_output_tree(&project.dir, variant)
            .ok_or(JobFailure::ArtifactNotFound)?;
        let published = self.artifacts.publish(name, &built)?;
        tracing::info!(project = %name, artifact = %published.display(), "published artifact");

        self.transition(
            name,
            Transition::Build(BuildStage::Done {
                artifact: download_path(name, &published),
            }),
        )
    }

    // ── Clean ────────────────────────────────────────────────────────

    async fn run_clean(&self, project: &ProjectHandle) -> Result<(), JobFailure> {
        let name = project.name.as_str();
        self.transition(name, Transition::Clean(CleanStage::Preparing))?;

        let wrapper = self.wrapper_path(project);
        make_executable(&wrapper)?;

        self.transition(name, Transition::Clean(CleanStage::Cleaning))?;
        let spec = CommandSpec::new(&wrapper).arg("clean").current_dir(&project.dir);
        let output = self.commands.run(&spec).await?;

        self.logs.write(name, &output.combined())?;
        if !output.success() {
            return Err(JobFailure::CommandFailed(JobKind::Clean));
        }

        for dir in CLEAN_DIRS {
            remove_dir_best_effort(&project.dir.join(dir));
        }

        self.transition(name, Transition::Clean(CleanStage::Done))
    }

    // ── Deploy ───────────────────────────────────────────────────────

    async fn run_deploy(
        &self,
        project: &ProjectHandle,
        address: &str,
        variant: Option<Variant>,
    ) -> Result<(), JobFailure> {
        let adb = self.bridge.locate().ok_or(JobFailure::BridgeNotFound)?;

        let mut transcript = Transcript::new();
        let result = self
            .deploy_phases(project, &adb, address, variant, &mut transcript)
            .await;

        if let Err(JobFailure::Unexpected(e)) = &result {
            transcript.push(format!("Unexpected error: {:#}", e));
        }
        if !transcript.is_empty() {
            if let Err(e) = self.logs.write(&project.name, &transcript.render()) {
                tracing::error!(project = %project.name, error = %format!("{:#}", e), "failed to save deploy log");
            }
        }
        result
    }

    async fn deploy_phases(
        &self,
        project: &ProjectHandle,
        adb: &Path,
        address: &str,
        variant: Option<Variant>,
        transcript: &mut Transcript,
    ) -> Result<(), JobFailure> {
        let name = project.name.as_str();
        self.transition(name, Transition::Deploy(DeployStage::ConnectingDevice))?;

        transcript.section(format!("Connecting to device {}:", address));
        let connect = self
            .commands
            .run(&CommandSpec::new(adb).arg("connect").arg(address))
            .await?;
        transcript.push(connect.stdout.trim_end());
        transcript.push(connect.stderr.trim_end());
        if !connect.success() {
            return Err(JobFailure::CommandFailed(JobKind::Deploy));
        }

        let artifact = match self.artifacts.find_latest_published(name) {
            Some(published) => published,
            None => {
                let built = variant
                    .and_then(|v| self.artifacts.find_latest_in_output_tree(&project.dir, v))
                    .ok_or(JobFailure::NothingToDeploy)?;
                self.artifacts.publish(name, &built)?
            }
        };

        self.transition(name, Transition::Deploy(DeployStage::InstallingArtifact))?;
        let file_name = artifact
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        transcript.section(format!("Installing {}:", file_name));
        let install = self
            .commands
            .run(&CommandSpec::new(adb).arg("install").arg("-r").arg(artifact.to_string_lossy()))
            .await?;
        transcript.push(install.stdout.trim_end());
        transcript.push(install.stderr.trim_end());
        if !install.success() {
            return Err(JobFailure::CommandFailed(JobKind::Deploy));
        }

        self.transition(name, Transition::Deploy(DeployStage::Deployed))
    }
}

fn remove_dir_best_effort(dir: &Path) {
    match std::fs::remove_dir_all(dir) {
        Ok(()) => tracing::debug!(dir = %dir.display(), "removed build directory"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(dir = %dir.display(), error = %e, "failed to remove build directory"),
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
