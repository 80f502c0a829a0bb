//! Persisted registry of deploy targets, plus wireless pairing.
//!
//! The file is the source of truth: every operation reloads it under the
//! registry's mutex, applies the change and writes it back, so the CLI and
//! the server always see the same selection.
//!
//! Stored form:
//! ```json
//! {"devices": [{"id": "tv", "name": "Living room", "address": "10.0.0.5:5555"}], "selected": "tv"}
//! ```
//! The older `{"address": "..."}` form is migrated on load.

use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::toolchain::{BridgeLocator, CommandRunner, CommandSpec};
use crate::errors::DeviceError;
use crate::util::write_atomic;

const LEGACY_DEVICE_ID: &str = "default";
const LEGACY_DEVICE_NAME: &str = "Default Device";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    pub id: String,
    pub name: String,
    pub address: String,
}

/// Registry contents. `selected` always names a device in `devices` or is `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeviceSnapshot {
    pub devices: Vec<Device>,
    pub selected: Option<String>,
}

impl DeviceSnapshot {
    pub fn selected_device(&self) -> Option<&Device> {
        let id = self.selected.as_deref()?;
        self.devices.iter().find(|d| d.id == id)
    }

    fn contains(&self, id: &str) -> bool {
        self.devices.iter().any(|d| d.id == id)
    }
}

/// On-disk shape, accepting both the current and the legacy layout.
#[derive(Debug, Deserialize)]
struct StoredRegistry {
    #[serde(default)]
    devices: Option<Vec<Device>>,
    #[serde(default)]
    selected: Option<String>,
    #[serde(default)]
    address: Option<String>,
}

#[derive(Debug)]
pub struct DeviceRegistry {
    path: PathBuf,
    lock: Mutex<()>,
}

impl DeviceRegistry {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn list(&self) -> Result<DeviceSnapshot, DeviceError> {
        let _held = self.lock.lock().map_err(|_| DeviceError::LockPoisoned)?;
        Ok(self.load())
    }

    /// Address of the selected device, if any.
    pub fn selected_address(&self) -> Result<Option<String>, DeviceError> {
        Ok(self.list()?.selected_device().map(|d| d.address.clone()))
    }

    /// Add a device, or update the address (and name, if given) of an existing id.
    /// The first device added to an empty selection becomes selected.
    pub fn add(
        &self,
        address: &str,
        id: Option<&str>,
        name: Option<&str>,
    ) -> Result<DeviceSnapshot, DeviceError> {
        let address = validate_address(address, "Device address")?;
        let id = non_blank(id).map(str::to_string).unwrap_or_else(generate_device_id);
        let name = non_blank(name);

        let _held = self.lock.lock().map_err(|_| DeviceError::LockPoisoned)?;
        let mut snapshot = self.load();
        match snapshot.devices.iter_mut().find(|d| d.id == id) {
            Some(existing) => {
                existing.address = address.to_string();
                if let Some(name) = name {
                    existing.name = name.to_string();
                }
                tracing::info!(device = %id, %address, "updated device");
            }
            None => {
                let name = name
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("Device {}", id));
                tracing::info!(device = %id, %name, %address, "added device");
                snapshot.devices.push(Device {
                    id: id.clone(),
                    name,
                    address: address.to_string(),
                });
            }
        }
        if snapshot.selected.is_none() {
            snapshot.selected = snapshot.devices.first().map(|d| d.id.clone());
        }
        self.save(&snapshot)?;
        Ok(snapshot)
    }

    /// Remove a device. Removing the selected one selects the first remaining device.
    pub fn remove(&self, id: &str) -> Result<DeviceSnapshot, DeviceError> {
        let id = non_blank(Some(id)).ok_or(DeviceError::MissingField("Device ID"))?;

        let _held = self.lock.lock().map_err(|_| DeviceError::LockPoisoned)?;
        let mut snapshot = self.load();
        snapshot.devices.retain(|d| d.id != id);
        if snapshot.selected.as_deref() == Some(id) {
            snapshot.selected = snapshot.devices.first().map(|d| d.id.clone());
        }
        self.save(&snapshot)?;
        tracing::info!(device = %id, remaining = snapshot.devices.len(), "removed device");
        Ok(snapshot)
    }

    /// Select an existing device. Unknown ids are rejected and leave the selection as it was.
    pub fn select(&self, id: &str) -> Result<DeviceSnapshot, DeviceError> {
        let id = non_blank(Some(id)).ok_or(DeviceError::MissingField("Device ID"))?;

        let _held = self.lock.lock().map_err(|_| DeviceError::LockPoisoned)?;
        let mut snapshot = self.load();
        if !snapshot.contains(id) {
            return Err(DeviceError::UnknownDevice(id.to_string()));
        }
        snapshot.selected = Some(id.to_string());
        self.save(&snapshot)?;
        Ok(snapshot)
    }

    /// Single-address interface: update the first device's address, creating
    /// the `default` device when the registry is empty. A blank address is a no-op.
    pub fn set_address(&self, address: &str) -> Result<DeviceSnapshot, DeviceError> {
        let _held = self.lock.lock().map_err(|_| DeviceError::LockPoisoned)?;
        let mut snapshot = self.load();
        if address.trim().is_empty() {
            return Ok(snapshot);
        }
        let address = validate_address(address, "Device address")?;

        match snapshot.devices.first_mut() {
            Some(first) => first.address = address.to_string(),
            None => {
                snapshot.devices.push(legacy_device(address));
                snapshot.selected = Some(LEGACY_DEVICE_ID.to_string());
            }
        }
        self.save(&snapshot)?;
        Ok(snapshot)
    }

    /// Read the file, degrading to an empty registry when absent or unreadable.
    /// Must be called with the lock held.
    fn load(&self) -> DeviceSnapshot {
        let bytes = match std::fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return DeviceSnapshot::default(),
            Err(e) => {
                tracing::error!(path = %self.path.display(), error = %e, "failed to read device registry");
                return DeviceSnapshot::default();
            }
        };
        let stored: StoredRegistry = match serde_json::from_slice(&bytes) {
            Ok(stored) => stored,
            Err(e) => {
                tracing::error!(path = %self.path.display(), error = %e, "failed to parse device registry");
                return DeviceSnapshot::default();
            }
        };

        match stored.devices {
            Some(devices) => {
                let mut snapshot = DeviceSnapshot {
                    devices,
                    selected: stored.selected,
                };
                if snapshot.selected_device().is_none() {
                    snapshot.selected = None;
                }
                snapshot
            }
            None => {
                let Some(address) = non_blank(stored.address.as_deref()) else {
                    return DeviceSnapshot::default();
                };
                let migrated = DeviceSnapshot {
                    devices: vec![legacy_device(address)],
                    selected: Some(LEGACY_DEVICE_ID.to_string()),
                };
                match self.save(&migrated) {
                    Ok(()) => tracing::info!("migrated device registry from single-address format"),
                    Err(e) => tracing::error!(error = %e, "failed to persist device registry migration"),
                }
                migrated
            }
        }
    }

    fn save(&self, snapshot: &DeviceSnapshot) -> Result<(), DeviceError> {
        let json = serde_json::to_vec_pretty(snapshot)
            .map_err(|e| DeviceError::Other(anyhow::Error::new(e)))?;
        write_atomic(&self.path, &json).map_err(|e| DeviceError::Persist {
            path: self.path.clone(),
            source: std::io::Error::other(format!("{:#}", e)),
        })
    }
}

fn legacy_device(address: &str) -> Device {
    Device {
        id: LEGACY_DEVICE_ID.to_string(),
        name: LEGACY_DEVICE_NAME.to_string(),
        address: address.to_string(),
    }
}

fn generate_device_id() -> String {
    let hex = uuid::Uuid::new_v4().simple().to_string();
    format!("device_{}", &hex[..8])
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Trimmed address; rejects blanks and embedded whitespace.
fn validate_address<'a>(address: &'a str, field: &'static str) -> Result<&'a str, DeviceError> {
    let trimmed = address.trim();
    if trimmed.is_empty() {
        return Err(DeviceError::MissingField(field));
    }
    if trimmed.chars().any(char::is_whitespace) {
        return Err(DeviceError::InvalidAddress(trimmed.to_string()));
    }
    Ok(trimmed)
}

// ── Pairing ──────────────────────────────────────────────────────────

/// Result of a completed pairing attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PairOutcome {
    Paired,
    Failed { output: String },
    TimedOut,
}

impl PairOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Paired)
    }

    pub fn message(&self) -> String {
        match self {
            Self::Paired => "Successfully paired with device!".to_string(),
            Self::Failed { output } => format!("Pairing failed: {}", output),
            Self::TimedOut => {
                "Pairing timed out. Please check the pairing code and try again.".to_string()
            }
        }
    }
}

/// Pair with a device over wireless debugging using its one-time code.
pub async fn pair(
    runner: &dyn CommandRunner,
    bridge: &BridgeLocator,
    pair_address: &str,
    code: &str,
    timeout: Duration,
) -> Result<PairOutcome, DeviceError> {
    let pair_address = validate_address(pair_address, "Pair address")?;
    let code = validate_address(code, "Pairing code")?;
    let adb = bridge.locate().ok_or(DeviceError::BridgeNotFound)?;

    let spec = CommandSpec::new(adb)
        .arg("pair")
        .arg(pair_address)
        .arg(code)
        .timeout(timeout);
    let output = runner.run(&spec).await?;

    if output.timed_out {
        tracing::warn!(%pair_address, "pairing timed out");
        return Ok(PairOutcome::TimedOut);
    }
    let combined = output.combined();
    if output.success() && combined.contains("Successfully paired") {
        tracing::info!(%pair_address, "paired with device");
        Ok(PairOutcome::Paired)
    } else {
        tracing::error!(%pair_address, output = %combined.trim(), "pairing failed");
        Ok(PairOutcome::Failed {
            output: combined.trim().to_string(),
        })
    }
}
