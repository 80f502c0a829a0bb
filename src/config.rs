//! Layered configuration for buildbay.
//!
//! Values come from `buildbay.toml` (every field optional), then the
//! environment, then CLI flags applied by the caller.
//!
//! ```toml
//! [paths]
//! projects_dir = "/home/projects"
//! state_dir = "."
//!
//! [toolchain]
//! sdk_root = "/home/android/sdk"
//! entry_point = "gradlew"
//! bridge_candidates = ["/home/android/sdk/platform-tools/adb"]
//! search_path = true
//!
//! [server]
//! host = "0.0.0.0"
//! port = 8000
//!
//! [jobs]
//! log_line_limit = 2000
//! pair_timeout_secs = 30
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

pub const DEFAULT_CONFIG_FILE: &str = "buildbay.toml";

/// Filesystem locations the orchestrator reads from and writes to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Base directory whose direct children are candidate projects
    #[serde(default = "default_projects_dir")]
    pub projects_dir: PathBuf,
    /// Root for `status/`, `logs/`, `artifacts/`, `device.json` and `server.log`
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,
}

fn default_projects_dir() -> PathBuf {
    PathBuf::from("/home/projects")
}

fn default_state_dir() -> PathBuf {
    PathBuf::from(".")
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            projects_dir: default_projects_dir(),
            state_dir: default_state_dir(),
        }
    }
}

impl PathsConfig {
    pub fn status_dir(&self) -> PathBuf {
        self.state_dir.join("status")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.state_dir.join("logs")
    }

    pub fn artifacts_dir(&self) -> PathBuf {
        self.state_dir.join("artifacts")
    }

    pub fn device_file(&self) -> PathBuf {
        self.state_dir.join("device.json")
    }
}

/// External toolchain settings (Android SDK + Gradle wrapper).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolchainConfig {
    #[serde(default = "default_sdk_root")]
    pub sdk_root: PathBuf,
    /// File whose presence marks a directory as a buildable project
    #[serde(default = "default_entry_point")]
    pub entry_point: String,
    /// Ordered device-bridge locations probed before `PATH`.
    /// Empty means "derive from `sdk_root` and the usual install locations".
    #[serde(default)]
    pub bridge_candidates: Vec<PathBuf>,
    #[serde(default = "default_true")]
    pub search_path: bool,
}

fn default_sdk_root() -> PathBuf {
    PathBuf::from("/home/android/sdk")
}

fn default_entry_point() -> String {
    "gradlew".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for ToolchainConfig {
    fn default() -> Self {
        Self {
            sdk_root: default_sdk_root(),
            entry_point: default_entry_point(),
            bridge_candidates: Vec::new(),
            search_path: true,
        }
    }
}

impl ToolchainConfig {
    /// Bridge candidates in probe order.
    pub fn resolved_bridge_candidates(&self) -> Vec<PathBuf> {
        if !self.bridge_candidates.is_empty() {
            return self.bridge_candidates.clone();
        }
        let mut candidates = vec![self.sdk_root.join("platform-tools").join("adb")];
        if let Some(home) = dirs::home_dir() {
            candidates.push(home.join("Android/Sdk/platform-tools/adb"));
            candidates.push(home.join("sdk/platform-tools/adb"));
        }
        candidates.push(PathBuf::from("/opt/android-sdk/platform-tools/adb"));
        candidates
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8000
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobsConfig {
    /// Number of trailing lines kept from build output
    #[serde(default = "default_log_line_limit")]
    pub log_line_limit: usize,
    /// Hard timeout for the device pairing command
    #[serde(default = "default_pair_timeout_secs")]
    pub pair_timeout_secs: u64,
}

fn default_log_line_limit() -> usize {
    2000
}

fn default_pair_timeout_secs() -> u64 {
    30
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            log_line_limit: default_log_line_limit(),
            pair_timeout_secs: default_pair_timeout_secs(),
        }
    }
}

impl JobsConfig {
    pub fn pair_timeout(&self) -> Duration {
        Duration::from_secs(self.pair_timeout_secs)
    }
}

/// Complete orchestrator configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub toolchain: ToolchainConfig,
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub jobs: JobsConfig,
}

impl OrchestratorConfig {
    /// Load configuration from `path` (if it exists) and apply environment overrides.
    ///
    /// A missing file is not an error; a malformed one is.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = Self::from_file(path)?;
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Parse `path` without consulting the environment.
    pub fn from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))
    }

    /// Apply environment overrides using `lookup` as the variable source.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(dir) = lookup("BUILDBAY_PROJECTS_DIR").filter(|v| !v.is_empty()) {
            self.paths.projects_dir = PathBuf::from(dir);
        }
        if let Some(dir) = lookup("BUILDBAY_STATE_DIR").filter(|v| !v.is_empty()) {
            self.paths.state_dir = PathBuf::from(dir);
        }
        if let Some(sdk) = lookup("ANDROID_HOME").filter(|v| !v.is_empty()) {
            self.toolchain.sdk_root = PathBuf::from(sdk);
        }
        if let Some(port) = lookup("BUILDBAY_PORT").and_then(|v| v.parse().ok()) {
            self.server.port = port;
        }
    }

    /// Create the state directories the stores write into.
    pub fn ensure_directories(&self) -> Result<()> {
        for dir in [
            self.paths.status_dir(),
            self.paths.logs_dir(),
            self.paths.artifacts_dir(),
        ] {
            std::fs::create_dir_all(&dir)
                .with_context(|| format!("Failed to create {}", dir.display()))?;
        }
        Ok(())
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize configuration")
    }
}
