//! Typed error hierarchy for the buildbay orchestrator.
//!
//! Two top-level enums cover the synchronous surfaces:
//! - `OrchestratorError`: rejections on the accept path (validation and
//!   preconditions), never job-execution failures
//! - `DeviceError`: device registry and pairing failures
//!
//! Failures *inside* a running job never surface here; they are reported
//! through the status store as a `JobFailure` (see `orchestrator::runner`).

use std::path::PathBuf;

use thiserror::Error;

/// Errors returned synchronously by the orchestrator's operation surface.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("Invalid project '{name}'")]
    InvalidProject { name: String },

    #[error("Project '{name}' is missing its toolchain entry point ({entry_point})")]
    MissingEntryPoint { name: String, entry_point: String },

    #[error("Build type must be debug or release, got '{0}'")]
    InvalidVariant(String),

    #[error("No device selected. Please select a device first.")]
    NoDeviceSelected,

    #[error(transparent)]
    Device(#[from] DeviceError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl OrchestratorError {
    /// True for errors caused by the caller's input rather than server state.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidProject { .. }
                | Self::MissingEntryPoint { .. }
                | Self::InvalidVariant(_)
                | Self::NoDeviceSelected
                | Self::Device(DeviceError::InvalidAddress(_))
                | Self::Device(DeviceError::MissingField(_))
                | Self::Device(DeviceError::UnknownDevice(_))
        )
    }
}

/// Errors from the device registry and the pairing command.
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("Invalid device address '{0}'")]
    InvalidAddress(String),

    #[error("{0} is required")]
    MissingField(&'static str),

    #[error("Device '{0}' not found")]
    UnknownDevice(String),

    #[error("Device bridge not found. Please install Android SDK platform-tools.")]
    BridgeNotFound,

    #[error("Failed to persist device registry at {path}: {source}")]
    Persist {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Device registry lock poisoned")]
    LockPoisoned,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_project_carries_name() {
        let err = OrchestratorError::InvalidProject {
            name: "../etc".into(),
        };
        assert!(err.to_string().contains("../etc"));
        assert!(err.is_client_error());
    }

    #[test]
    fn device_error_converts_into_orchestrator_error() {
        let err: OrchestratorError = DeviceError::UnknownDevice("tv".into()).into();
        match &err {
            OrchestratorError::Device(DeviceError::UnknownDevice(id)) => assert_eq!(id, "tv"),
            _ => panic!("Expected Device(UnknownDevice)"),
        }
        assert!(err.is_client_error());
    }

    #[test]
    fn store_failures_are_server_errors() {
        let err: OrchestratorError = anyhow::anyhow!("Failed to write /state/status/Foo.json").into();
        assert!(!err.is_client_error());
        assert!(err.to_string().contains("/state/status"));
    }

    #[test]
    fn persist_failures_are_server_errors() {
        let err: OrchestratorError = DeviceError::Persist {
            path: PathBuf::from("device.json"),
            source: std::io::Error::other("disk full"),
        }
        .into();
        assert!(!err.is_client_error());
    }
}
