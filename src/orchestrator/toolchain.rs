//! External toolchain plumbing: subprocess execution with the SDK
//! environment injected, and device-bridge discovery.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::process::Command;

/// A command to run, with everything except the environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    /// `None` runs to completion however long it takes.
    pub timeout: Option<Duration>,
}

impl CommandSpec {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            timeout: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Program file name, e.g. `gradlew` or `adb`.
    pub fn program_name(&self) -> String {
        self.program
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| self.program.to_string_lossy().to_string())
    }
}

impl std::fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.program.display())?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// Captured result of a finished (or timed out) command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code; `None` when killed by a signal or timed out.
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0) && !self.timed_out
    }

    /// Stdout followed by stderr, one line apart. A stream's final line
    /// terminator is dropped and an empty stream contributes nothing.
    pub fn combined(&self) -> String {
        let stdout = strip_line_end(&self.stdout);
        let stderr = strip_line_end(&self.stderr);
        match (stdout.is_empty(), stderr.is_empty()) {
            (_, true) => stdout.to_string(),
            (true, false) => stderr.to_string(),
            (false, false) => format!("{}\n{}", stdout, stderr),
        }
    }
}

fn strip_line_end(text: &str) -> &str {
    text.strip_suffix('\n')
        .map(|t| t.strip_suffix('\r').unwrap_or(t))
        .unwrap_or(text)
}

/// Abstraction over subprocess execution for testability.
/// Real implementation: `SystemRunner`.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `spec` to completion and capture its output. A non-zero exit is
    /// not an error; failing to launch the program is.
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput>;
}

/// Environment variables every toolchain subprocess receives.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolchainEnv {
    vars: Vec<(String, OsString)>,
}

impl ToolchainEnv {
    /// Android SDK environment: `ANDROID_HOME`, `ANDROID_SDK_ROOT`, and
    /// `PATH` prefixed with the SDK's platform and command-line tools.
    pub fn android(sdk_root: &Path, inherited_path: Option<OsString>) -> Self {
        let mut path_entries = vec![
            sdk_root.join("platform-tools"),
            sdk_root.join("cmdline-tools").join("latest").join("bin"),
        ];
        if let Some(inherited) = inherited_path {
            path_entries.extend(std::env::split_paths(&inherited));
        }
        let path = std::env::join_paths(path_entries).unwrap_or_default();

        Self {
            vars: vec![
                ("ANDROID_HOME".to_string(), sdk_root.as_os_str().to_owned()),
                ("ANDROID_SDK_ROOT".to_string(), sdk_root.as_os_str().to_owned()),
                ("PATH".to_string(), path),
            ],
        }
    }

    pub fn get(&self, key: &str) -> Option<&OsString> {
        self.vars.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn vars(&self) -> &[(String, OsString)] {
        &self.vars
    }
}

/// Runs commands as real subprocesses with the toolchain environment applied.
#[derive(Debug, Clone)]
pub struct SystemRunner {
    env: ToolchainEnv,
}

impl SystemRunner {
    pub fn new(env: ToolchainEnv) -> Self {
        Self { env }
    }
}

#[async_trait]
impl CommandRunner for SystemRunner {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &spec.cwd {
            cmd.current_dir(dir);
        }
        for (key, value) in self.env.vars() {
            cmd.env(key, value);
        }

        let child = cmd
            .spawn()
            .with_context(|| format!("Failed to spawn {}", spec))?;

        let waited = match spec.timeout {
            Some(limit) => match tokio::time::timeout(limit, child.wait_with_output()).await {
                Ok(result) => result,
                // Dropping the future drops the child, and kill_on_drop reaps it.
                Err(_) => {
                    return Ok(CommandOutput {
                        timed_out: true,
                        ..Default::default()
                    });
                }
            },
            None => child.wait_with_output().await,
        };
        let output = waited.with_context(|| format!("Failed to wait for {}", spec))?;

        Ok(CommandOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            timed_out: false,
        })
    }
}

/// Finds the device-bridge executable: configured candidates first, in
/// order, then an optional `PATH` lookup.
#[derive(Debug, Clone)]
pub struct BridgeLocator {
    candidates: Vec<PathBuf>,
    binary: String,
    search_path: Option<OsString>,
}

impl BridgeLocator {
    pub fn new(candidates: Vec<PathBuf>, binary: impl Into<String>, search_path: Option<OsString>) -> Self {
        Self {
            candidates,
            binary: binary.into(),
            search_path,
        }
    }

    pub fn locate(&self) -> Option<PathBuf> {
        if let Some(found) = self.candidates.iter().find(|p| is_executable(p)) {
            return Some(found.clone());
        }
        let path = self.search_path.as_ref()?;
        let cwd = std::env::current_dir().ok()?;
        which::which_in(&self.binary, Some(path), cwd).ok()
    }
}

fn is_executable(path: &Path) -> bool {
    let Ok(meta) = std::fs::metadata(path) else {
        return false;
    };
    if !meta.is_file() {
        return false;
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        meta.permissions().mode() & 0o111 != 0
    }
    #[cfg(not(unix))]
    {
        true
    }
}

/// Add execute permission to `path` (the wrapper script is often checked in without it).
pub fn make_executable(path: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = std::fs::metadata(path)
            .with_context(|| format!("Failed to stat {}", path.display()))?
            .permissions();
        perms.set_mode(perms.mode() | 0o111);
        std::fs::set_permissions(path, perms)
            .with_context(|| format!("Failed to chmod +x {}", path.display()))?;
    }
    #[cfg(not(unix))]
    {
        let _ = path;
    }
    Ok(())
}
