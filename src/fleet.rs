//! Persisted fleet registry: a flat JSON array of device records.
//!
//! The orchestrator only writes back here for two things: post-flash version
//! metadata and identity rewrites after a detected id change.

use std::path::PathBuf;

use anyhow::{Context, Result};
use fleet_transport::FlashMethod;
use serde::{Deserialize, Serialize};

use crate::builder::BuildInfo;

fn default_interface() -> String {
    "can0".to_string()
}

fn default_baudrate() -> u32 {
    250_000
}

/// A registered device
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Device {
    pub name: String,
    /// Current stable identifier: by-id path (serial), 12-hex UUID (can),
    /// USB serial or bus path (dfu), or the literal `linux_process`.
    pub id: String,
    /// Transient: when set on save, replaces the record with this id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_id: Option<String>,
    #[serde(default)]
    pub profile: String,
    pub method: FlashMethod,
    #[serde(default = "default_interface")]
    pub interface: String,
    /// Serial baudrate for the Katapult flashtool
    #[serde(default = "default_baudrate")]
    pub baudrate: u32,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub is_katapult: bool,
    /// USB-to-CAN bridge providing `interface`; flashing it tears the bus
    /// down for every other CAN device
    #[serde(default)]
    pub is_bridge: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dfu_id: Option<String>,
    #[serde(default)]
    pub magic_baud_tested: bool,
    #[serde(default)]
    pub use_magic_baud: bool,
    #[serde(default)]
    pub dfu_exit_tested: bool,
    #[serde(default)]
    pub use_dfu_exit: bool,
    #[serde(default)]
    pub exclude_from_batch: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flashed_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flashed_commit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_flashed: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub live_version: Option<String>,
}

pub struct FleetStore {
    path: PathBuf,
    // Single-process writer; serialise read-modify-write cycles
    lock: parking_lot::Mutex<()>,
}

impl FleetStore {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            lock: parking_lot::Mutex::new(()),
        }
    }

    fn read(&self) -> Result<Vec<Device>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let content = std::fs::read_to_string(&self.path)
            .with_context(|| format!("reading {}", self.path.display()))?;
        serde_json::from_str(&content).with_context(|| format!("parsing {}", self.path.display()))
    }

    fn write(&self, fleet: &[Device]) -> Result<()> {
        let content = serde_json::to_string_pretty(fleet)?;
        std::fs::write(&self.path, content)
            .with_context(|| format!("writing {}", self.path.display()))
    }

    pub fn get_fleet(&self) -> Result<Vec<Device>> {
        let _guard = self.lock.lock();
        let fleet = self.read()?;
        if !self.path.exists() {
            self.write(&fleet)?;
        }
        Ok(fleet)
    }

    pub fn find(&self, device_id: &str) -> Result<Option<Device>> {
        Ok(self.get_fleet()?.into_iter().find(|d| d.id == device_id))
    }

    /// Add or update a device. `old_id` selects the record to replace when
    /// the identity itself changed; it is stripped before persisting.
    pub fn save_device(&self, mut device: Device) -> Result<()> {
        let _guard = self.lock.lock();
        let mut fleet = self.read()?;

        let target_id = device
            .old_id
            .take()
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| device.id.clone());

        match fleet.iter_mut().find(|d| d.id == target_id) {
            Some(existing) => *existing = device,
            None => fleet.push(device),
        }
        self.write(&fleet)
    }

    pub fn remove_device(&self, device_id: &str) -> Result<()> {
        let _guard = self.lock.lock();
        let mut fleet = self.read()?;
        fleet.retain(|d| d.id != device_id);
        self.write(&fleet)
    }

    /// Persist a detected identity change (the id is a logical handle; only
    /// this explicit rewrite promotes the new physical id).
    pub fn rewrite_identity(
        &self,
        old_id: &str,
        new_id: &str,
        method: FlashMethod,
    ) -> Result<()> {
        let _guard = self.lock.lock();
        let mut fleet = self.read()?;
        if let Some(dev) = fleet.iter_mut().find(|d| d.id == old_id) {
            dev.id = new_id.to_string();
            dev.method = method;
            self.write(&fleet)?;
        }
        Ok(())
    }

    /// Record what was just flashed onto a device
    pub fn update_device_version(&self, device_id: &str, info: &BuildInfo) -> Result<()> {
        let _guard = self.lock.lock();
        let mut fleet = self.read()?;
        if let Some(dev) = fleet.iter_mut().find(|d| d.id == device_id) {
            dev.last_flashed = Some(chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string());
            dev.flashed_version = Some(info.version.clone());
            dev.flashed_commit = Some(info.commit.clone());
            self.write(&fleet)?;
        }
        Ok(())
    }

    pub fn update_device_live_version(&self, device_id: &str, live_version: &str) -> Result<()> {
        let _guard = self.lock.lock();
        let mut fleet = self.read()?;
        if let Some(dev) = fleet.iter_mut().find(|d| d.id == device_id) {
            dev.live_version = Some(live_version.to_string());
            self.write(&fleet)?;
        }
        Ok(())
    }
}
