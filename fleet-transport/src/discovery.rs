//! Device discovery across the four channels.
//!
//! Serial and host-process enumeration is pure filesystem work; CAN and DFU
//! go through the bus arbiter so scans never race an in-flight flash, with
//! short-TTL caches behind the locks for rapid UI polls.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::time::Duration;

use tracing::{debug, warn};

use crate::identity;
use crate::process::run_command;
use crate::types::{
    DeviceKind, DeviceMode, DfuDevice, DiscoveredDevice, FlashMethod, HOST_MCU_SOCKET,
};
use crate::FlashManager;

const SERIAL_BY_ID_DIR: &str = "/dev/serial/by-id";
/// Raw UARTs only listed when the printer config actually references them
const RAW_UARTS: [&str; 2] = ["/dev/ttyAMA0", "/dev/ttyS0"];

/// Bootloader-mode query takes longer than the firmware one
const KATAPULT_QUERY_TIMEOUT: Duration = Duration::from_secs(5);
const KLIPPER_QUERY_TIMEOUT: Duration = Duration::from_secs(2);
const DFU_LIST_TIMEOUT: Duration = Duration::from_secs(5);

const CAN_DEFAULT_BITRATE: u32 = 1_000_000;

/// Parameters for a single-device status probe
#[derive(Debug, Clone, Default)]
pub struct StatusQuery {
    pub dfu_id: Option<String>,
    pub skip_moonraker: bool,
    pub is_bridge: bool,
    pub interface: Option<String>,
}

impl StatusQuery {
    fn interface(&self) -> &str {
        self.interface.as_deref().unwrap_or("can0")
    }
}

/// Kernel link state of a CAN interface
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkState {
    pub up: bool,
    pub carrier: bool,
}

impl LinkState {
    pub const DOWN: LinkState = LinkState {
        up: false,
        carrier: false,
    };

    pub fn healthy(&self) -> bool {
        self.up && self.carrier
    }
}

/// Mode heuristic for a serial node name
fn classify_serial_mode(name: &str, configured: bool) -> DeviceMode {
    let lower = name.to_lowercase();
    if lower.contains("klipper") || lower.contains("kalico") {
        DeviceMode::Service
    } else if lower.contains("katapult") || lower.contains("canboot") {
        DeviceMode::Ready
    } else if configured {
        DeviceMode::Service
    } else {
        DeviceMode::Ready
    }
}

/// A serial node candidate: the advertised path and its canonical target
#[derive(Debug, Clone)]
struct SerialNode {
    path: String,
    real: String,
}

/// Assemble the serial listing from raw candidates (pure; testable).
fn build_serial_listing(
    by_id: &[SerialNode],
    generic: &[SerialNode],
    uarts: &[String],
    configured: &HashMap<String, String>,
) -> Vec<DiscoveredDevice> {
    let mut devices: Vec<DiscoveredDevice> = Vec::new();
    let mut covered: HashSet<String> = HashSet::new();

    let display_name = |path: &str, base: &str| match configured.get(path) {
        Some(section) => format!("{section} ({base})"),
        None => base.to_string(),
    };

    for node in by_id {
        let base = basename(&node.path);
        devices.push(DiscoveredDevice {
            id: node.path.clone(),
            name: display_name(&node.path, base),
            kind: DeviceKind::Usb,
            mode: classify_serial_mode(base, configured.contains_key(&node.path)),
            application: None,
        });
        covered.insert(node.real.clone());
    }

    for node in generic {
        if covered.contains(&node.real) {
            continue;
        }
        covered.insert(node.real.clone());
        let base = basename(&node.path);
        devices.push(DiscoveredDevice {
            id: node.path.clone(),
            name: display_name(&node.path, base),
            kind: DeviceKind::Usb,
            mode: classify_serial_mode(base, configured.contains_key(&node.path)),
            application: None,
        });
    }

    for path in uarts {
        if let Some(section) = configured.get(path) {
            let base = basename(path);
            devices.push(DiscoveredDevice {
                id: path.clone(),
                name: format!("{section} ({base})"),
                kind: DeviceKind::Uart,
                mode: DeviceMode::Service,
                application: None,
            });
        }
    }

    devices
}

fn basename(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Interface names out of `ip -o link show type can`
fn parse_link_names(stdout: &str) -> Vec<String> {
    let mut names = Vec::new();
    for line in stdout.lines() {
        // "4: can0: <NOARP,UP,LOWER_UP> mtu 16 ..."
        let mut fields = line.split(':');
        let _index = fields.next();
        if let Some(name) = fields.next() {
            let name = name.trim();
            let name = name.split('@').next().unwrap_or(name);
            if !name.is_empty() {
                names.push(name.to_string());
            }
        }
    }
    names
}

fn parse_link_state(stdout: &str) -> LinkState {
    LinkState {
        // UNKNOWN shows up for virtual and some bridge interfaces
        up: stdout.contains("state UP") || stdout.contains("state UNKNOWN"),
        carrier: !stdout.contains("NO-CARRIER"),
    }
}

/// Parse Katapult flashtool `-q` output into (uuid, application) pairs
fn parse_katapult_query(stdout: &str) -> Vec<(String, String)> {
    let mut results = Vec::new();
    for line in stdout.lines() {
        let line = line.replace("Detected UUID:", "UUID:");
        let Some(rest) = line.split("UUID:").nth(1) else {
            continue;
        };
        let mut parts = rest.split(',');
        let Some(uuid) = parts.next() else { continue };
        let uuid = uuid.trim().to_lowercase();
        if uuid.is_empty() {
            continue;
        }
        let app = parts
            .next()
            .and_then(|p| p.split("Application:").nth(1))
            .map(|a| a.trim().to_string())
            .unwrap_or_else(|| "Unknown".to_string());
        results.push((uuid, app));
    }
    results
}

/// Parse Klipper canbus_query output into (uuid, application) pairs
fn parse_klipper_query(stdout: &str) -> Vec<(String, String)> {
    let mut results = Vec::new();
    for line in stdout.lines() {
        let Some(rest) = line.split("canbus_uuid=").nth(1) else {
            continue;
        };
        let uuid = rest
            .split(',')
            .next()
            .unwrap_or("")
            .trim()
            .to_lowercase();
        if uuid.is_empty() {
            continue;
        }
        let app = line
            .split("Application:")
            .nth(1)
            .map(|a| a.trim().to_string())
            .unwrap_or_else(|| "Unknown".to_string());
        results.push((uuid, app));
    }
    results
}

fn is_can_uuid(s: &str) -> bool {
    s.len() == 12 && s.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase())
}

/// Merge the three CAN views. Priority: bootloader query > firmware query >
/// configured-but-unseen; configured sections also replace placeholder names.
fn merge_can_results(
    katapult: &[(String, String)],
    klipper: &[(String, String)],
    configured: &HashMap<String, String>,
) -> Vec<DiscoveredDevice> {
    let mut devices: Vec<DiscoveredDevice> = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();

    for (uuid, app) in katapult {
        if !seen.insert(uuid.clone()) {
            continue;
        }
        let mode = if app.eq_ignore_ascii_case("katapult") || app.eq_ignore_ascii_case("canboot") {
            DeviceMode::Ready
        } else {
            DeviceMode::Service
        };
        devices.push(DiscoveredDevice {
            id: uuid.clone(),
            name: format!("CAN Device ({uuid})"),
            kind: DeviceKind::Can,
            mode,
            application: Some(app.clone()),
        });
    }

    for (uuid, app) in klipper {
        if !seen.insert(uuid.clone()) {
            continue;
        }
        devices.push(DiscoveredDevice {
            id: uuid.clone(),
            name: format!("CAN Device ({uuid})"),
            kind: DeviceKind::Can,
            mode: DeviceMode::Service,
            application: Some(app.clone()),
        });
    }

    for (identifier, section) in configured {
        if seen.contains(identifier) {
            if let Some(dev) = devices.iter_mut().find(|d| &d.id == identifier) {
                if dev.name.starts_with("CAN Device") {
                    dev.name = section.clone();
                }
            }
        } else if is_can_uuid(identifier) {
            seen.insert(identifier.clone());
            devices.push(DiscoveredDevice {
                id: identifier.clone(),
                name: section.clone(),
                kind: DeviceKind::Can,
                mode: DeviceMode::Service,
                application: Some("Klipper".to_string()),
            });
        }
    }

    devices
}

/// Parse `dfu-util -l` output
fn parse_dfu_listing(stdout: &str) -> Vec<DfuDevice> {
    fn quoted<'a>(line: &'a str, key: &str) -> Option<&'a str> {
        let start = line.find(key)? + key.len();
        let rest = &line[start..];
        rest.split('"').next()
    }

    let mut devices: Vec<DfuDevice> = Vec::new();
    for line in stdout.lines() {
        if !line.contains("Found DFU:") {
            continue;
        }
        let vid_pid = line
            .split('[')
            .nth(1)
            .and_then(|r| r.split(']').next())
            .unwrap_or("")
            .trim()
            .to_string();
        let path = quoted(line, "path=\"").unwrap_or("").to_string();
        let serial = quoted(line, "serial=\"").map(|s| s.to_string());

        let dev = DfuDevice {
            vid_pid,
            serial,
            path,
        };
        if devices.iter().all(|d| d.id() != dev.id()) {
            devices.push(dev);
        }
    }
    devices
}

fn list_serial_nodes() -> (Vec<SerialNode>, Vec<SerialNode>) {
    let canonical = |p: &Path| -> String {
        std::fs::canonicalize(p)
            .map(|c| c.to_string_lossy().into_owned())
            .unwrap_or_else(|_| p.to_string_lossy().into_owned())
    };

    let mut by_id = Vec::new();
    if let Ok(entries) = std::fs::read_dir(SERIAL_BY_ID_DIR) {
        for entry in entries.flatten() {
            let path = entry.path();
            by_id.push(SerialNode {
                real: canonical(&path),
                path: path.to_string_lossy().into_owned(),
            });
        }
    }
    by_id.sort_by(|a, b| a.path.cmp(&b.path));

    let mut generic = Vec::new();
    if let Ok(entries) = std::fs::read_dir("/dev") {
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with("ttyACM") || name.starts_with("ttyUSB") {
                let path = entry.path();
                generic.push(SerialNode {
                    real: canonical(&path),
                    path: path.to_string_lossy().into_owned(),
                });
            }
        }
    }
    generic.sort_by(|a, b| a.path.cmp(&b.path));

    (by_id, generic)
}

/// Current stable by-id paths (used by the identity resolver)
pub(crate) fn list_by_id_paths() -> Vec<String> {
    let (by_id, _) = list_serial_nodes();
    by_id.into_iter().map(|n| n.path).collect()
}

impl FlashManager {
    /// Serial devices: stable by-id links, generic ACM/USB nodes not already
    /// represented by one, and configured raw UARTs.
    pub async fn discover_serial_devices(&self, skip_moonraker: bool) -> Vec<DiscoveredDevice> {
        let configured = if skip_moonraker {
            HashMap::new()
        } else {
            self.moonraker.configured_mcus().await
        };

        let (by_id, generic) = list_serial_nodes();
        let uarts: Vec<String> = RAW_UARTS
            .iter()
            .filter(|p| Path::new(p).exists())
            .map(|p| p.to_string())
            .collect();

        build_serial_listing(&by_id, &generic, &uarts, &configured)
    }

    /// CAN interfaces of type `can` known to the kernel
    pub async fn list_can_interfaces(&self) -> Vec<String> {
        match run_command("ip", &["-o", "link", "show", "type", "can"], None).await {
            Ok(out) if out.success() => parse_link_names(&out.stdout),
            _ => Vec::new(),
        }
    }

    pub async fn interface_state(&self, interface: &str) -> LinkState {
        match run_command("ip", &["link", "show", interface], None).await {
            Ok(out) if out.success() => parse_link_state(&out.stdout),
            _ => LinkState::DOWN,
        }
    }

    pub async fn is_interface_up(&self, interface: &str) -> bool {
        self.interface_state(interface).await.up
    }

    /// Bring a CAN interface up if it is not
    pub async fn ensure_interface_up(&self, interface: &str) {
        if self.is_interface_up(interface).await {
            return;
        }
        debug!("bringing up {interface}");
        let bitrate = CAN_DEFAULT_BITRATE.to_string();
        let result = run_command(
            "sudo",
            &[
                "ip", "link", "set", interface, "up", "type", "can", "bitrate", &bitrate,
            ],
            Some(Duration::from_secs(10)),
        )
        .await;
        if let Err(e) = result {
            warn!("failed to bring up {interface}: {e}");
        }
        tokio::time::sleep(Duration::from_secs(1)).await;
    }

    /// CAN devices on one interface. The bootloader and firmware queries run
    /// sequentially: concurrent queries on one bus corrupt each other.
    pub async fn discover_can_devices(
        &self,
        interface: &str,
        force: bool,
    ) -> Vec<DiscoveredDevice> {
        if !force {
            if let Some(cached) = self.buses.cached_can(interface) {
                return cached;
            }
        }

        let _bus = self.buses.lock_can().await;
        if !force {
            // A task ahead of us in the lock queue may have scanned already
            if let Some(cached) = self.buses.cached_can(interface) {
                return cached;
            }
        }

        self.ensure_interface_up(interface).await;

        let katapult = self.katapult_can_query(interface).await;
        let klipper = self.klipper_can_query(interface).await;
        let configured = self.moonraker.configured_mcus().await;

        let devices = merge_can_results(&katapult, &klipper, &configured);
        self.buses.store_can(interface, devices.clone());
        devices
    }

    async fn katapult_can_query(&self, interface: &str) -> Vec<(String, String)> {
        let flashtool = self.paths.flashtool();
        let flashtool = flashtool.to_string_lossy();
        match run_command(
            "python3",
            &[&flashtool, "-i", interface, "-q"],
            Some(KATAPULT_QUERY_TIMEOUT),
        )
        .await
        {
            Ok(out) => parse_katapult_query(&out.stdout),
            Err(e) => {
                debug!("katapult query failed on {interface}: {e}");
                Vec::new()
            }
        }
    }

    async fn klipper_can_query(&self, interface: &str) -> Vec<(String, String)> {
        let python = self.paths.klipper_python();
        let python = python.to_string_lossy();
        let script = self.paths.canbus_query();
        let script = script.to_string_lossy();
        match run_command(
            &python,
            &[&script, interface],
            Some(KLIPPER_QUERY_TIMEOUT),
        )
        .await
        {
            Ok(out) => parse_klipper_query(&out.stdout),
            Err(e) => {
                debug!("klipper query failed on {interface}: {e}");
                Vec::new()
            }
        }
    }

    /// DFU devices currently enumerated. Serialised against flashes: a
    /// `dfu-util -l` during a download corrupts both.
    pub async fn discover_dfu_devices(&self, force: bool) -> Vec<DfuDevice> {
        if !force {
            if let Some(cached) = self.buses.cached_dfu() {
                return cached;
            }
        }

        let _bus = self.buses.lock_dfu().await;
        if !force {
            if let Some(cached) = self.buses.cached_dfu() {
                return cached;
            }
        }

        let devices = self.dfu_scan().await;
        self.buses.store_dfu(devices.clone());
        devices
    }

    /// Raw scan without touching the lock; callers must hold the DFU lock
    /// (or be the discovery path above).
    pub(crate) async fn dfu_scan(&self) -> Vec<DfuDevice> {
        match run_command("dfu-util", &["-l"], Some(DFU_LIST_TIMEOUT)).await {
            Ok(out) => parse_dfu_listing(&out.stdout),
            Err(e) => {
                debug!("dfu-util -l failed: {e}");
                Vec::new()
            }
        }
    }

    /// The host-process MCU as a singleton pseudo-device
    pub fn discover_host_process(&self) -> Vec<DiscoveredDevice> {
        let mode = if Path::new(HOST_MCU_SOCKET).exists() {
            DeviceMode::Ready
        } else {
            DeviceMode::Offline
        };
        vec![DiscoveredDevice {
            id: "linux_process".to_string(),
            name: "Linux Process (Host MCU)".to_string(),
            kind: DeviceKind::Linux,
            mode,
            application: None,
        }]
    }

    /// Current mode of one device, composing the channel listings with the
    /// bridge rule and the serial-to-DFU crossover.
    pub async fn check_device_status(
        &self,
        id: &str,
        method: FlashMethod,
        query: &StatusQuery,
    ) -> DeviceMode {
        if query.is_bridge {
            return self.bridge_status(id, query).await;
        }

        match method {
            FlashMethod::Serial => {
                let listing = self.discover_serial_devices(query.skip_moonraker).await;
                if let Some(dev) = listing.iter().find(|d| d.id == id) {
                    return dev.mode;
                }
                if Path::new(id).exists() {
                    return DeviceMode::Ready;
                }
                // The port is gone; it may have re-enumerated as DFU
                let dfu = self.discover_dfu_devices(false).await;
                let resolved =
                    identity::resolve_dfu_id_in(id, query.dfu_id.as_deref(), false, &dfu);
                if dfu.iter().any(|d| d.id() == resolved) {
                    return DeviceMode::Dfu;
                }
                DeviceMode::Offline
            }
            FlashMethod::Can => {
                let devices = self.discover_can_devices(query.interface(), false).await;
                devices
                    .iter()
                    .find(|d| d.id == id)
                    .map(|d| d.mode)
                    .unwrap_or(DeviceMode::Offline)
            }
            FlashMethod::Dfu => {
                let dfu = self.discover_dfu_devices(false).await;
                let resolved =
                    identity::resolve_dfu_id_in(id, query.dfu_id.as_deref(), false, &dfu);
                if dfu.iter().any(|d| d.id() == resolved) {
                    return DeviceMode::Dfu;
                }
                // Application mode: look for its serial incarnation
                let serial = self.resolve_serial_id(id, None).await;
                if Path::new(&serial).exists() {
                    return DeviceMode::Service;
                }
                DeviceMode::Offline
            }
            FlashMethod::Linux => {
                if Path::new(HOST_MCU_SOCKET).exists() {
                    DeviceMode::Ready
                } else {
                    DeviceMode::Offline
                }
            }
        }
    }

    /// A bridge provides the CAN interface itself: the interface being up is
    /// the primary signal, its serial/DFU incarnation the secondary one.
    async fn bridge_status(&self, id: &str, query: &StatusQuery) -> DeviceMode {
        if self.is_interface_up(query.interface()).await {
            return DeviceMode::Service;
        }
        let serial = self.resolve_serial_id(id, None).await;
        if Path::new(&serial).exists() {
            return DeviceMode::Ready;
        }
        let dfu = self.discover_dfu_devices(false).await;
        let resolved = identity::resolve_dfu_id_in(id, query.dfu_id.as_deref(), false, &dfu);
        if dfu.iter().any(|d| d.id() == resolved) {
            return DeviceMode::Ready;
        }
        DeviceMode::Offline
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serial_mode_heuristic() {
        assert_eq!(
            classify_serial_mode("usb-Klipper_stm32f401xc_34003D-if00", false),
            DeviceMode::Service
        );
        assert_eq!(
            classify_serial_mode("usb-katapult_stm32g0b1xx_2A0011-if00", true),
            DeviceMode::Ready
        );
        assert_eq!(
            classify_serial_mode("usb-CanBoot_rp2040_E660-if00", false),
            DeviceMode::Ready
        );
        assert_eq!(classify_serial_mode("ttyACM0", true), DeviceMode::Service);
        assert_eq!(classify_serial_mode("ttyACM0", false), DeviceMode::Ready);
    }

    #[test]
    fn serial_listing_dedupes_by_canonical_path() {
        let by_id = vec![SerialNode {
            path: "/dev/serial/by-id/usb-Klipper_stm32-if00".to_string(),
            real: "/dev/ttyACM0".to_string(),
        }];
        let generic = vec![
            SerialNode {
                path: "/dev/ttyACM0".to_string(),
                real: "/dev/ttyACM0".to_string(),
            },
            SerialNode {
                path: "/dev/ttyACM1".to_string(),
                real: "/dev/ttyACM1".to_string(),
            },
        ];
        let configured = HashMap::new();
        let listing = build_serial_listing(&by_id, &generic, &[], &configured);
        let ids: Vec<_> = listing.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(
            ids,
            ["/dev/serial/by-id/usb-Klipper_stm32-if00", "/dev/ttyACM1"]
        );
    }

    #[test]
    fn raw_uarts_need_printer_config() {
        let mut configured = HashMap::new();
        configured.insert("/dev/ttyAMA0".to_string(), "mcu aux".to_string());
        let uarts = vec!["/dev/ttyAMA0".to_string(), "/dev/ttyS0".to_string()];
        let listing = build_serial_listing(&[], &[], &uarts, &configured);
        assert_eq!(listing.len(), 1);
        assert_eq!(listing[0].id, "/dev/ttyAMA0");
        assert_eq!(listing[0].name, "mcu aux (ttyAMA0)");
        assert_eq!(listing[0].kind, DeviceKind::Uart);
    }

    #[test]
    fn katapult_query_parsing() {
        let out = "Flash Size: 0x8000\nDetected UUID: 1234567890AB, Application: Katapult\n";
        assert_eq!(
            parse_katapult_query(out),
            vec![("1234567890ab".to_string(), "Katapult".to_string())]
        );
    }

    #[test]
    fn klipper_query_parsing() {
        let out = "Found canbus_uuid=abcdef123456, Application: Klipper\nTotal 1 uuids found\n";
        assert_eq!(
            parse_klipper_query(out),
            vec![("abcdef123456".to_string(), "Klipper".to_string())]
        );
    }

    #[test]
    fn can_merge_priority_and_enrichment() {
        let katapult = vec![("1234567890ab".to_string(), "Katapult".to_string())];
        let klipper = vec![
            ("1234567890ab".to_string(), "Klipper".to_string()),
            ("abcdef123456".to_string(), "Klipper".to_string()),
        ];
        let mut configured = HashMap::new();
        configured.insert("abcdef123456".to_string(), "mcu toolhead".to_string());
        configured.insert("feedfacebeef".to_string(), "mcu spare".to_string());
        // Serial entries in the configured set must not leak into CAN results
        configured.insert("/dev/ttyACM0".to_string(), "mcu".to_string());

        let devices = merge_can_results(&katapult, &klipper, &configured);

        let boot = devices.iter().find(|d| d.id == "1234567890ab").unwrap();
        assert_eq!(boot.mode, DeviceMode::Ready);

        let toolhead = devices.iter().find(|d| d.id == "abcdef123456").unwrap();
        assert_eq!(toolhead.mode, DeviceMode::Service);
        assert_eq!(toolhead.name, "mcu toolhead");

        let spare = devices.iter().find(|d| d.id == "feedfacebeef").unwrap();
        assert_eq!(spare.mode, DeviceMode::Service);

        assert!(devices.iter().all(|d| d.id != "/dev/ttyACM0"));
    }

    #[test]
    fn dfu_listing_parsing() {
        let out = concat!(
            "dfu-util 0.11\n",
            "Found DFU: [0483:df11] ver=0200, devnum=12, cfg=1, intf=0, path=\"1-1.2\", ",
            "alt=0, name=\"@Internal Flash  /0x08000000/064*0002Kg\", serial=\"357236543131\"\n",
            "Found DFU: [0483:df11] ver=0200, devnum=12, cfg=1, intf=0, path=\"1-1.2\", ",
            "alt=1, name=\"@Option Bytes\", serial=\"357236543131\"\n",
        );
        let devices = parse_dfu_listing(out);
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].vid_pid, "0483:df11");
        assert_eq!(devices[0].path, "1-1.2");
        assert_eq!(devices[0].id(), "357236543131");
    }

    #[test]
    fn dfu_unknown_serial_falls_back_to_path() {
        let out = "Found DFU: [0483:df11] ver=0200, devnum=9, cfg=1, intf=0, path=\"3-1\", alt=0, name=\"x\", serial=\"UNKNOWN\"\n";
        let devices = parse_dfu_listing(out);
        assert_eq!(devices[0].id(), "3-1");
    }

    #[test]
    fn link_name_parsing() {
        let out = "4: can0: <NOARP,UP,LOWER_UP,ECHO> mtu 16 qdisc pfifo_fast state UP mode DEFAULT\n5: can1: <NOARP,ECHO> mtu 16 state DOWN\n";
        assert_eq!(parse_link_names(out), vec!["can0", "can1"]);
    }

    #[test]
    fn link_state_parsing() {
        let up = "4: can0: <NOARP,UP,LOWER_UP,ECHO> mtu 16 state UP mode DEFAULT";
        assert!(parse_link_state(up).healthy());

        let no_carrier = "4: can0: <NO-CARRIER,NOARP,UP,ECHO> mtu 16 state UP";
        let state = parse_link_state(no_carrier);
        assert!(state.up);
        assert!(!state.carrier);

        let down = "5: can1: <NOARP,ECHO> mtu 16 state DOWN";
        assert!(!parse_link_state(down).up);
    }
}
