use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::OrchestratorError;

/// The three kinds of work a job can perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    Build,
    Clean,
    Deploy,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Build => "build",
            Self::Clean => "clean",
            Self::Deploy => "deploy",
        }
    }
}

impl std::fmt::Display for JobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Build configuration selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Variant {
    #[default]
    Debug,
    Release,
}

impl Variant {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Release => "release",
        }
    }

    /// Gradle task that assembles this variant, e.g. `assembleDebug`.
    pub fn assemble_task(&self) -> &'static str {
        match self {
            Self::Debug => "assembleDebug",
            Self::Release => "assembleRelease",
        }
    }
}

impl FromStr for Variant {
    type Err = OrchestratorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "debug" => Ok(Self::Debug),
            "release" => Ok(Self::Release),
            _ => Err(OrchestratorError::InvalidVariant(s.to_string())),
        }
    }
}

/// Status vocabulary as persisted in the status record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    NotStarted,
    Unknown,
    Preparing,
    Building,
    FindingArtifact,
    Cleaning,
    ConnectingDevice,
    InstallingArtifact,
    Done,
    Deployed,
    Error,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotStarted => "not_started",
            Self::Unknown => "unknown",
            Self::Preparing => "preparing",
            Self::Building => "building",
            Self::FindingArtifact => "finding_artifact",
            Self::Cleaning => "cleaning",
            Self::ConnectingDevice => "connecting_device",
            Self::InstallingArtifact => "installing_artifact",
            Self::Done => "done",
            Self::Deployed => "deployed",
            Self::Error => "error",
        }
    }

    /// Terminal states end a job run; nothing else will overwrite them until
    /// the next job starts.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Deployed | Self::Error)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildStage {
    Preparing,
    Building,
    FindingArtifact,
    Done { artifact: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CleanStage {
    Preparing,
    Cleaning,
    Done,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeployStage {
    ConnectingDevice,
    InstallingArtifact,
    Deployed,
}

/// One step of a job's state machine. Every transition replaces the
/// project's status record wholesale.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    Build(BuildStage),
    Clean(CleanStage),
    Deploy(DeployStage),
    Failed { message: String },
}

impl Transition {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
        }
    }

    pub fn status(&self) -> JobStatus {
        match self {
            Self::Build(BuildStage::Preparing) => JobStatus::Preparing,
            Self::Build(BuildStage::Building) => JobStatus::Building,
            Self::Build(BuildStage::FindingArtifact) => JobStatus::FindingArtifact,
            Self::Build(BuildStage::Done { .. }) => JobStatus::Done,
            Self::Clean(CleanStage::Preparing | CleanStage::Cleaning) => JobStatus::Cleaning,
            Self::Clean(CleanStage::Done) => JobStatus::Done,
            Self::Deploy(DeployStage::ConnectingDevice) => JobStatus::ConnectingDevice,
            Self::Deploy(DeployStage::InstallingArtifact) => JobStatus::InstallingArtifact,
            Self::Deploy(DeployStage::Deployed) => JobStatus::Deployed,
            Self::Failed { .. } => JobStatus::Error,
        }
    }

    pub fn progress(&self) -> u8 {
        match self {
            Self::Build(BuildStage::Preparing) => 10,
            Self::Build(BuildStage::Building) => 40,
            Self::Build(BuildStage::FindingArtifact) => 75,
            Self::Build(BuildStage::Done { .. }) => 100,
            Self::Clean(CleanStage::Preparing) => 10,
            Self::Clean(CleanStage::Cleaning) => 50,
            Self::Clean(CleanStage::Done) => 100,
            Self::Deploy(DeployStage::ConnectingDevice) => 10,
            Self::Deploy(DeployStage::InstallingArtifact) => 70,
            Self::Deploy(DeployStage::Deployed) => 100,
            Self::Failed { .. } => 0,
        }
    }

    pub fn message(&self) -> Option<&str> {
        match self {
            Self::Clean(CleanStage::Preparing) => Some("Cleaning Gradle cache..."),
            Self::Clean(CleanStage::Cleaning) => Some("Running gradle clean..."),
            Self::Clean(CleanStage::Done) => Some("Cache cleaned successfully."),
            Self::Deploy(DeployStage::Deployed) => Some("Artifact installed on device."),
            Self::Failed { message } => Some(message),
            _ => None,
        }
    }

    pub fn artifact(&self) -> Option<&str> {
        match self {
            Self::Build(BuildStage::Done { artifact }) => Some(artifact),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status().is_terminal()
    }
}

/// Snapshot of a project's most recent job, as seen by pollers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
    pub status: JobStatus,
    pub progress: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact: Option<String>,
    /// Always agrees with `status`; recomputed when a stored record is read.
    #[serde(default)]
    pub terminal: bool,
}

impl StatusRecord {
    /// Implicit record for a project that has never run a job.
    pub fn not_started() -> Self {
        Self::bare(JobStatus::NotStarted)
    }

    /// Degraded record returned when the stored one cannot be parsed.
    pub fn unknown() -> Self {
        Self::bare(JobStatus::Unknown)
    }

    fn bare(status: JobStatus) -> Self {
        Self {
            project: None,
            status,
            progress: 0,
            timestamp: None,
            message: None,
            artifact: None,
            terminal: false,
        }
    }

    /// Re-derive `terminal` from `status`, for records read back from disk.
    pub fn normalized(mut self) -> Self {
        self.terminal = self.status.is_terminal();
        self
    }

    pub fn from_transition(project: &str, transition: &Transition) -> Self {
        Self {
            project: Some(project.to_string()),
            status: transition.status(),
            progress: transition.progress(),
            timestamp: Some(chrono::Utc::now().timestamp()),
            message: transition.message().map(str::to_string),
            artifact: transition.artifact().map(str::to_string),
            terminal: transition.is_terminal(),
        }
    }
}
