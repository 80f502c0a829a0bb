//! Job orchestration engine.
//!
//! ## Overview
//!
//! Accepts build, clean and deploy requests for projects under the projects
//! directory, runs the Gradle wrapper and the device bridge on background
//! tasks, and leaves a pollable status record, the latest command output and
//! the published artifacts behind on disk.
//!
//! ## Module Map
//!
//! ```text
//! ┌───────────────┐  start_*()  ┌──────────────────────────────────────────┐
//! │ server / cmd  │ ──────────> │ Orchestrator (this file)                 │
//! └───────────────┘             │   ├─ project.rs   ProjectResolver        │
//!                               │   ├─ registry.rs  JobRegistry, SlotGuard │
//!        get_status()           │   │                                      │
//!        get_log()              │   │ JobRunner::spawn(job, slot)          │
//!                               │   v                                      │
//!                               │ runner.rs  build / clean / deploy        │
//!                               │   ├─ toolchain.rs  CommandRunner, bridge │
//!                               │   ├─ status.rs     StatusStore           │
//!                               │   ├─ logs.rs       LogStore, Transcript  │
//!                               │   └─ artifact.rs   ArtifactResolver      │
//!                               │                                          │
//!                               │ device.rs  DeviceRegistry, pair()        │
//!                               └──────────────────────────────────────────┘
//! ```
//!
//! At most one job per project is in flight; a second request while one is
//! running is answered with `StartOutcome::AlreadyRunning` rather than queued.

pub mod artifact;
pub mod device;
pub mod logs;
pub mod models;
pub mod project;
pub mod registry;
pub mod runner;
pub mod status;
pub mod toolchain;

use std::path::PathBuf;
use std::sync::Arc;

pub use device::{Device, DeviceRegistry, DeviceSnapshot, PairOutcome};
pub use models::{JobKind, JobStatus, StatusRecord, Transition, Variant};
pub use registry::{ActiveJob, InMemoryJobRegistry, JobRegistry, SlotGuard};
pub use runner::{Job, JobFailure, JobHandle, JobRunner, JobSpec};

use crate::config::OrchestratorConfig;
use crate::errors::{DeviceError, OrchestratorError};
use artifact::ArtifactResolver;
use logs::LogStore;
use project::ProjectResolver;
use status::StatusStore;
use toolchain::{BridgeLocator, CommandRunner, SystemRunner, ToolchainEnv};

const BRIDGE_BINARY: &str = "adb";

/// Result of asking for a job to start.
#[derive(Debug)]
pub enum StartOutcome {
    Started(JobHandle),
    /// The project already has a job of this kind in flight.
    AlreadyRunning(JobKind),
}

impl StartOutcome {
    pub fn is_started(&self) -> bool {
        matches!(self, Self::Started(_))
    }
}

/// Operation surface used by the HTTP layer and the CLI.
pub struct Orchestrator {
    config: OrchestratorConfig,
    resolver: ProjectResolver,
    statuses: StatusStore,
    logs: LogStore,
    artifacts: ArtifactResolver,
    devices: DeviceRegistry,
    registry: Arc<dyn JobRegistry>,
    commands: Arc<dyn CommandRunner>,
    bridge: BridgeLocator,
    jobs: Arc<JobRunner>,
}

impl Orchestrator {
    /// Orchestrator that runs real subprocesses with the SDK environment injected.
    pub fn new(config: OrchestratorConfig) -> Self {
        let env = ToolchainEnv::android(&config.toolchain.sdk_root, std::env::var_os("PATH"));
        let commands: Arc<dyn CommandRunner> = Arc::new(SystemRunner::new(env));
        let registry: Arc<dyn JobRegistry> = Arc::new(InMemoryJobRegistry::new());
        Self::with_parts(config, registry, commands)
    }

    /// Orchestrator with an injected job registry and command runner.
    pub fn with_parts(
        config: OrchestratorConfig,
        registry: Arc<dyn JobRegistry>,
        commands: Arc<dyn CommandRunner>,
    ) -> Self {
        let paths = &config.paths;
        let resolver =
            ProjectResolver::new(&paths.projects_dir, config.toolchain.entry_point.clone());
        let statuses = StatusStore::new(paths.status_dir());
        let logs = LogStore::new(paths.logs_dir(), config.jobs.log_line_limit);
        let artifacts = ArtifactResolver::new(paths.artifacts_dir());
        let devices = DeviceRegistry::new(paths.device_file());

        let search_path = config
            .toolchain
            .search_path
            .then(|| std::env::var_os("PATH"))
            .flatten();
        let bridge = BridgeLocator::new(
            config.toolchain.resolved_bridge_candidates(),
            BRIDGE_BINARY,
            search_path,
        );

        let jobs = Arc::new(JobRunner::new(
            statuses.clone(),
            logs.clone(),
            artifacts.clone(),
            config.toolchain.entry_point.clone(),
            Arc::clone(&commands),
            bridge.clone(),
        ));

        Self {
            config,
            resolver,
            statuses,
            logs,
            artifacts,
            devices,
            registry,
            commands,
            bridge,
            jobs,
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    // ── Queries ──────────────────────────────────────────────────────

    pub fn list_buildable_projects(&self) -> Vec<String> {
        self.resolver.list_buildable()
    }

    pub fn get_status(&self, project: &str) -> Result<StatusRecord, OrchestratorError> {
        let handle = self.resolver.resolve(project)?;
        Ok(self.statuses.read(&handle.name))
    }

    /// Latest captured output, `None` when no job has written one yet.
    pub fn get_log(&self, project: &str) -> Result<Option<String>, OrchestratorError> {
        let handle = self.resolver.resolve(project)?;
        Ok(self.logs.read(&handle.name))
    }

    /// A published artifact file, for download.
    pub fn published_artifact(&self, project: &str, file_name: &str) -> Option<PathBuf> {
        let handle = self.resolver.resolve(project).ok()?;
        self.artifacts.published_file(&handle.name, file_name)
    }

    pub fn active_jobs(&self) -> Vec<ActiveJob> {
        self.registry.active()
    }

    // ── Jobs ─────────────────────────────────────────────────────────

    pub fn start_build(
        &self,
        project: &str,
        variant: Variant,
    ) -> Result<StartOutcome, OrchestratorError> {
        let handle = self.resolver.resolve_buildable(project)?;
        Ok(self.start(handle, JobSpec::Build { variant }))
    }

    pub fn start_clean(&self, project: &str) -> Result<StartOutcome, OrchestratorError> {
        let handle = self.resolver.resolve_buildable(project)?;
        Ok(self.start(handle, JobSpec::Clean))
    }

    /// Deploy the latest published artifact to the selected device.
    ///
    /// With no device selected the project gets an `error` status and
    /// `NoDeviceSelected` is returned; no bridge command runs.
    pub fn start_deploy(
        &self,
        project: &str,
        variant: Option<Variant>,
    ) -> Result<StartOutcome, OrchestratorError> {
        let handle = self.resolver.resolve(project)?;
        let slot = match SlotGuard::acquire(&self.registry, &handle.name, JobKind::Deploy) {
            Ok(slot) => slot,
            Err(running) => return Ok(self.already_running(&handle.name, running)),
        };

        let Some(address) = self.devices.selected_address()? else {
            let failure = Transition::failed(OrchestratorError::NoDeviceSelected.to_string());
            self.statuses.write(&handle.name, &failure)?;
            drop(slot);
            tracing::warn!(project = %handle.name, "deploy rejected: no device selected");
            return Err(OrchestratorError::NoDeviceSelected);
        };

        let job = Job {
            project: handle,
            spec: JobSpec::Deploy { address, variant },
        };
        Ok(StartOutcome::Started(self.jobs.spawn(job, slot)))
    }

    fn start(&self, project: project::ProjectHandle, spec: JobSpec) -> StartOutcome {
        match SlotGuard::acquire(&self.registry, &project.name, spec.kind()) {
            Ok(slot) => StartOutcome::Started(self.jobs.spawn(Job { project, spec }, slot)),
            Err(running) => self.already_running(&project.name, running),
        }
    }

    fn already_running(&self, project: &str, running: JobKind) -> StartOutcome {
        tracing::info!(project = %project, running = %running, "job already running");
        StartOutcome::AlreadyRunning(running)
    }

    // ── Devices ──────────────────────────────────────────────────────

    pub fn list_devices(&self) -> Result<DeviceSnapshot, DeviceError> {
        self.devices.list()
    }

    pub fn add_device(
        &self,
        address: &str,
        id: Option<&str>,
        name: Option<&str>,
    ) -> Result<DeviceSnapshot, DeviceError> {
        self.devices.add(address, id, name)
    }

    pub fn remove_device(&self, id: &str) -> Result<DeviceSnapshot, DeviceError> {
        self.devices.remove(id)
    }

    pub fn select_device(&self, id: &str) -> Result<DeviceSnapshot, DeviceError> {
        self.devices.select(id)
    }

    /// Address of the selected device (single-address interface).
    pub fn device_address(&self) -> Result<Option<String>, DeviceError> {
        self.devices.selected_address()
    }

    pub fn set_device_address(&self, address: &str) -> Result<DeviceSnapshot, DeviceError> {
        self.devices.set_address(address)
    }

    pub async fn pair_device(
        &self,
        pair_address: &str,
        code: &str,
    ) -> Result<PairOutcome, DeviceError> {
        device::pair(
            self.commands.as_ref(),
            &self.bridge,
            pair_address,
            code,
            self.config.jobs.pair_timeout(),
        )
        .await
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    //! Fakes shared by the orchestrator and server tests.

    use std::collections::HashMap;
    use std::path::{Path, PathBuf};
    use std::sync::{Arc, Mutex};

    use anyhow::Result;
    use async_trait::async_trait;
    use tempfile::TempDir;
    use tokio::sync::Semaphore;

    use super::registry::{Acquire, ActiveJob, InMemoryJobRegistry, JobRegistry};
    use super::toolchain::{CommandOutput, CommandRunner, CommandSpec};
    use super::{JobHandle, JobKind, Orchestrator, StartOutcome};
    use crate::config::OrchestratorConfig;

    type Responder = Box<dyn Fn(&CommandSpec) -> CommandOutput + Send + Sync>;

    /// Command runner keyed by the first argument (`assembleDebug`, `clean`,
    /// `connect`, `install`, `pair`). Unscripted commands succeed silently.
    #[derive(Default)]
    pub struct ScriptedRunner {
        responders: Mutex<HashMap<String, Responder>>,
        gates: Mutex<HashMap<String, Arc<Semaphore>>>,
        calls: Mutex<Vec<CommandSpec>>,
    }

    impl ScriptedRunner {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn respond<F>(&self, first_arg: &str, responder: F)
        where
            F: Fn(&CommandSpec) -> CommandOutput + Send + Sync + 'static,
        {
            self.responders
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .insert(first_arg.to_string(), Box::new(responder));
        }

        /// Make `first_arg` wait for a permit on the returned semaphore.
        pub fn hold(&self, first_arg: &str) -> Arc<Semaphore> {
            let gate = Arc::new(Semaphore::new(0));
            self.gates
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .insert(first_arg.to_string(), Arc::clone(&gate));
            gate
        }

        pub fn calls(&self) -> Vec<CommandSpec> {
            self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
        }

        /// First argument of every recorded call, in order.
        pub fn subcommands(&self) -> Vec<String> {
            self.calls()
                .into_iter()
                .map(|c| c.args.first().cloned().unwrap_or_default())
                .collect()
        }
    }

    #[async_trait]
    impl CommandRunner for ScriptedRunner {
        async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput> {
            self.calls
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push(spec.clone());
            let key = spec.args.first().cloned().unwrap_or_default();

            let gate = self
                .gates
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .get(&key)
                .cloned();
            if let Some(gate) = gate {
                let _permit = gate.acquire().await?;
            }

            let responders = self.responders.lock().unwrap_or_else(|e| e.into_inner());
            Ok(match responders.get(&key) {
                Some(responder) => responder(spec),
                None => CommandOutput {
                    code: Some(0),
                    ..Default::default()
                },
            })
        }
    }

    /// Registry that records every acquire and release it sees.
    #[derive(Default)]
    pub struct RecordingRegistry {
        inner: InMemoryJobRegistry,
        events: Mutex<Vec<String>>,
    }

    impl RecordingRegistry {
        pub fn events(&self) -> Vec<String> {
            self.events.lock().unwrap_or_else(|e| e.into_inner()).clone()
        }

        fn record(&self, event: String) {
            self.events
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push(event);
        }
    }

    impl JobRegistry for RecordingRegistry {
        fn try_acquire(&self, project: &str, kind: JobKind) -> Acquire {
            let outcome = self.inner.try_acquire(project, kind);
            match outcome {
                Acquire::Acquired => self.record(format!("acquire {} {}", project, kind)),
                Acquire::AlreadyRunning(_) => self.record(format!("busy {} {}", project, kind)),
            }
            outcome
        }

        fn release(&self, project: &str) {
            self.record(format!("release {}", project));
            self.inner.release(project);
        }

        fn active(&self) -> Vec<ActiveJob> {
            self.inner.active()
        }
    }

    /// Temp projects directory with `Foo` (buildable), an executable fake
    /// bridge, and an orchestrator wired to the fakes.
    pub struct Fixture {
        pub dir: TempDir,
        pub runner: Arc<ScriptedRunner>,
        pub registry: Arc<RecordingRegistry>,
        pub orchestrator: Orchestrator,
    }

    impl Fixture {
        pub fn new() -> Self {
            let dir = TempDir::new().unwrap();
            let adb = dir.path().join("sdk/platform-tools/adb");
            std::fs::create_dir_all(adb.parent().unwrap()).unwrap();
            std::fs::write(&adb, "").unwrap();
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                std::fs::set_permissions(&adb, std::fs::Permissions::from_mode(0o755)).unwrap();
            }

            let mut config = OrchestratorConfig::default();
            config.paths.projects_dir = dir.path().join("projects");
            config.paths.state_dir = dir.path().join("state");
            config.toolchain.sdk_root = dir.path().join("sdk");
            config.toolchain.bridge_candidates = vec![adb];
            config.toolchain.search_path = false;

            let runner = Arc::new(ScriptedRunner::new());
            let registry = Arc::new(RecordingRegistry::default());
            let orchestrator = Orchestrator::with_parts(
                config,
                Arc::clone(&registry) as Arc<dyn JobRegistry>,
                Arc::clone(&runner) as Arc<dyn CommandRunner>,
            );

            let fixture = Self {
                dir,
                runner,
                registry,
                orchestrator,
            };
            fixture.add_project("Foo");
            fixture
        }

        pub fn project_dir(&self, name: &str) -> PathBuf {
            self.dir.path().join("projects").join(name)
        }

        pub fn add_project(&self, name: &str) -> PathBuf {
            let dir = self.project_dir(name);
            std::fs::create_dir_all(&dir).unwrap();
            std::fs::write(dir.join("gradlew"), "#!/bin/sh\n").unwrap();
            dir
        }

        pub fn published_dir(&self, name: &str) -> PathBuf {
            self.dir.path().join("state/artifacts").join(name)
        }

        /// Make `assemble<Variant>` succeed and drop `file_name` at the conventional output path.
        pub fn build_produces(&self, task: &str, variant_dir: &str, file_name: &str) {
            let rel = PathBuf::from("app/build/outputs/apk")
                .join(variant_dir)
                .join(file_name);
            self.runner.respond(task, move |spec| {
                let cwd = spec.cwd.clone().unwrap();
                write_file(&cwd.join(&rel), b"apk");
                CommandOutput {
                    code: Some(0),
                    stdout: "BUILD SUCCESSFUL".into(),
                    ..Default::default()
                }
            });
        }
    }

    pub fn write_file(path: &Path, contents: &[u8]) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, contents).unwrap();
    }

    pub fn started(outcome: StartOutcome) -> JobHandle {
        match outcome {
            StartOutcome::Started(handle) => handle,
            StartOutcome::AlreadyRunning(kind) => panic!("expected Started, got AlreadyRunning({})", kind),
        }
    }
}
