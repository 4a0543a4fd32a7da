//! Common types for the bus layer

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Flash transport identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlashMethod {
    /// Katapult over a serial port
    Serial,
    /// Katapult over a CAN bus node
    Can,
    /// STM32 ROM bootloader via dfu-util
    Dfu,
    /// Host-process MCU (local binary install)
    Linux,
}

impl FlashMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Serial => "serial",
            Self::Can => "can",
            Self::Dfu => "dfu",
            Self::Linux => "linux",
        }
    }

    /// Whether flashing requires the device to sit in a bootloader first
    pub fn needs_bootloader(&self) -> bool {
        !matches!(self, Self::Linux)
    }
}

impl std::fmt::Display for FlashMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for FlashMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "serial" => Ok(Self::Serial),
            "can" => Ok(Self::Can),
            "dfu" => Ok(Self::Dfu),
            "linux" => Ok(Self::Linux),
            other => Err(format!("unknown flash method: {other}")),
        }
    }
}

/// Observed mode of a device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceMode {
    /// Running application firmware
    Service,
    /// Sitting in a bootloader, awaiting a flash
    Ready,
    /// In the DFU ROM bootloader
    Dfu,
    /// Not visible on any channel
    Offline,
    /// A flasher is actively writing to it
    Flashing,
    /// Its bus lock is held by another task
    BusBusy,
    /// Fast-path placeholder when full discovery is skipped
    Querying,
    /// Last flash attempt failed
    Failed,
    /// Secondary identity not currently active
    Inactive,
    Unknown,
}

impl DeviceMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Service => "service",
            Self::Ready => "ready",
            Self::Dfu => "dfu",
            Self::Offline => "offline",
            Self::Flashing => "flashing",
            Self::BusBusy => "bus_busy",
            Self::Querying => "querying",
            Self::Failed => "failed",
            Self::Inactive => "inactive",
            Self::Unknown => "unknown",
        }
    }

    /// Modes a flasher will accept as "in bootloader"
    pub fn is_flashable(&self) -> bool {
        matches!(self, Self::Ready | Self::Dfu)
    }
}

impl std::fmt::Display for DeviceMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Channel a discovered device was seen on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    Usb,
    Uart,
    Can,
    Dfu,
    Linux,
}

/// A device found by one of the enumerations
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveredDevice {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: DeviceKind,
    pub mode: DeviceMode,
    /// Application string reported by a CAN query, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub application: Option<String>,
}

/// One `Found DFU:` entry from dfu-util
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DfuDevice {
    /// USB vid:pid, e.g. "0483:df11"
    pub vid_pid: String,
    /// USB serial string, if the bootloader reports one
    pub serial: Option<String>,
    /// USB bus path, e.g. "1-1.2"
    pub path: String,
}

impl DfuDevice {
    /// Stable identifier: the serial unless it is missing or the
    /// bootloader's "UNKNOWN" placeholder, else the bus path.
    pub fn id(&self) -> &str {
        match self.serial.as_deref() {
            Some(s) if !s.is_empty() && s != "UNKNOWN" => s,
            _ => &self.path,
        }
    }
}

impl From<&DfuDevice> for DiscoveredDevice {
    fn from(d: &DfuDevice) -> Self {
        DiscoveredDevice {
            id: d.id().to_string(),
            name: format!("DFU Device [{}] ({})", d.vid_pid, d.path),
            kind: DeviceKind::Dfu,
            mode: DeviceMode::Dfu,
            application: None,
        }
    }
}

/// Locations of the vendor trees the bus layer shells out to
#[derive(Debug, Clone)]
pub struct ToolPaths {
    pub klipper_dir: PathBuf,
    pub katapult_dir: PathBuf,
}

impl ToolPaths {
    /// Katapult's flashtool script
    pub fn flashtool(&self) -> PathBuf {
        self.katapult_dir.join("scripts").join("flashtool.py")
    }

    /// Klipper's firmware-mode CAN query script
    pub fn canbus_query(&self) -> PathBuf {
        self.klipper_dir.join("scripts").join("canbus_query.py")
    }

    /// Python interpreter for Klipper scripts: the klippy-env one when
    /// present, the system python3 otherwise.
    pub fn klipper_python(&self) -> PathBuf {
        let venv = self
            .klipper_dir
            .join("..")
            .join("klippy-env")
            .join("bin")
            .join("python3");
        if venv.exists() {
            venv
        } else {
            PathBuf::from("python3")
        }
    }
}

/// Socket of the Klipper host-process MCU
pub const HOST_MCU_SOCKET: &str = "/tmp/klipper_host_mcu";

/// Install target of the host-process MCU binary
pub const HOST_MCU_BINARY: &str = "/usr/local/bin/klipper_mcu";
