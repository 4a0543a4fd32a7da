//! The batch pipeline: build -> stop services -> reboot wave -> flash wave
//! -> summary -> return to service.
//!
//! A single device failing never aborts the batch; it is recorded and the
//! pipeline moves on. Cancellation is polled between every external step
//! and every poll iteration, and the service restart runs no matter how the
//! task ends.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use fleet_transport::discovery::StatusQuery;
use fleet_transport::{DeviceMode, FlashMethod, LogSink};
use tracing::warn;

use crate::fleet::Device;
use crate::jobs::store_logger;
use crate::services::{self, ServiceAction};
use crate::state::AppState;
use crate::tasks::TaskStatus;

/// Bootloader wait: poll every 2 s up to this long
const REBOOT_WAIT_SECS: u64 = 30;
/// Extended wait when an operator has to press a BOOT0 button
const MANUAL_DFU_WAIT_SECS: u64 = 60;
/// Bridge adoption wait after rebooting it into its bootloader
const BRIDGE_WAIT_SECS: u64 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchAction {
    Build,
    FlashReady,
    FlashAll,
    BuildFlashReady,
    BuildFlashAll,
}

impl BatchAction {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "build" => Some(Self::Build),
            "flash-ready" => Some(Self::FlashReady),
            "flash-all" => Some(Self::FlashAll),
            "build-flash-ready" => Some(Self::BuildFlashReady),
            "build-flash-all" => Some(Self::BuildFlashAll),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Build => "build",
            Self::FlashReady => "flash-ready",
            Self::FlashAll => "flash-all",
            Self::BuildFlashReady => "build-flash-ready",
            Self::BuildFlashAll => "build-flash-all",
        }
    }

    fn includes_build(&self) -> bool {
        matches!(self, Self::Build | Self::BuildFlashReady | Self::BuildFlashAll)
    }

    fn includes_flash(&self) -> bool {
        !matches!(self, Self::Build)
    }

    fn flash_all(&self) -> bool {
        matches!(self, Self::FlashAll | Self::BuildFlashAll)
    }
}

/// A device queued for the reboot wave, tracked by its pre-reboot identity
struct RebootEntry {
    original_id: String,
    id: String,
    method: FlashMethod,
    name: String,
    use_magic_baud: bool,
    interface: String,
    baudrate: u32,
    dfu_id: Option<String>,
}

/// Per-device flash outcomes, in flashing order
type Results = Vec<(String, String)>;

/// The colour-tagged summary block, one entry per line
pub fn render_summary(build_results: &Results, flash_results: &Results) -> Vec<String> {
    let mut lines = vec![
        "\n".to_string(),
        "======================== [SUMMARY] ========================\n".to_string(),
    ];

    if !build_results.is_empty() {
        lines.push("\n  BUILD RESULTS:\n".to_string());
        for (profile, result) in build_results {
            let colour = if result == "SUCCESS" { "GREEN" } else { "RED" };
            lines.push(format!(
                "  [COLOR:{colour}]  - {profile}: {result}[/COLOR]\n"
            ));
        }
    }

    if !flash_results.is_empty() {
        lines.push("\n  FLASH RESULTS:\n".to_string());
        for (name, result) in flash_results {
            let colour = if result == "SUCCESS" {
                "GREEN"
            } else if result.starts_with("SKIPPED") || result == "EXCLUDED" {
                "YELLOW"
            } else {
                "RED"
            };
            lines.push(format!("  [COLOR:{colour}]  - {name}: {result}[/COLOR]\n"));
        }
    }

    lines.push("\n===========================================================\n".to_string());
    lines
}

/// Start a batch task; the returned id is immediately observable.
pub fn spawn(state: Arc<AppState>, action: BatchAction) -> String {
    let task_id = state.tasks.create();
    let tid = task_id.clone();
    tokio::spawn(async move {
        run(state, action, tid).await;
    });
    task_id
}

async fn run(state: Arc<AppState>, action: BatchAction, task_id: String) {
    let (sink, log_done) = store_logger(state.clone(), task_id.clone());

    let mut services_stopped = false;
    let result = run_phases(&state, action, &task_id, &sink, &mut services_stopped).await;

    let failed = result.is_err();
    if let Err(e) = &result {
        sink.send(format!("!!! CRITICAL ERROR: {e}\n"));
    }

    if services_stopped {
        sink.send(">>> Returning to service...\n".to_string());
        sink.send(services::manage_services(ServiceAction::Start).await);
    }

    // Flush the log before the task is observable as finished
    drop(sink);
    let _ = log_done.await;

    let status = if failed {
        TaskStatus::Failed
    } else {
        TaskStatus::Completed
    };
    state.tasks.complete(&task_id, status);
}

async fn run_phases(
    state: &Arc<AppState>,
    action: BatchAction,
    task_id: &str,
    sink: &LogSink,
    services_stopped: &mut bool,
) -> anyhow::Result<()> {
    let tasks = &state.tasks;
    let mut build_results: Results = Vec::new();
    let mut flash_results: Results = Vec::new();
    let mut devices = state.fleet.get_fleet()?;

    // 1. Build phase
    if action.includes_build() {
        if tasks.is_cancelled(task_id) {
            return Ok(());
        }
        sink.send(">>> STARTING BATCH BUILD PHASE <<<\n".to_string());

        let mut profiles: Vec<String> = Vec::new();
        for dev in &devices {
            if !dev.profile.is_empty() && !profiles.contains(&dev.profile) {
                profiles.push(dev.profile.clone());
            }
        }

        if profiles.is_empty() {
            sink.send(">>> No profiles assigned to fleet devices. Skipping build.\n".to_string());
        } else {
            for profile in &profiles {
                if tasks.is_cancelled(task_id) {
                    return Ok(());
                }
                sink.send(format!("\n>>> BATCH BUILD: Starting {profile}...\n"));

                let config_path = state.profiles.config_path(profile);
                let (build_sink, mut build_rx) = LogSink::channel();
                let build_fut = async move {
                    state.builder.run_build(&config_path, profile, &build_sink).await;
                };
                let classify_fut = async {
                    let mut ok = true;
                    while let Some(line) = build_rx.recv().await {
                        if line.contains("!!! Error") || line.contains("!!! Build failed") {
                            ok = false;
                        }
                        sink.send(line);
                    }
                    ok
                };
                let ((), ok) = tokio::join!(build_fut, classify_fut);

                build_results.push((
                    profile.clone(),
                    if ok { "SUCCESS" } else { "FAILED" }.to_string(),
                ));
                sink.send(format!(">>> BATCH BUILD: Finished {profile}\n"));
            }
        }
    }

    // 2. Flash phase
    if action.includes_flash() {
        if tasks.is_cancelled(task_id) {
            return Ok(());
        }
        tasks.set_bus_task(task_id);
        sink.send("\n>>> BATCH FLASH: Starting...\n".to_string());

        // Exclusions
        let excluded: Vec<Device> = devices
            .iter()
            .filter(|d| d.exclude_from_batch)
            .cloned()
            .collect();
        devices.retain(|d| !d.exclude_from_batch);
        if !excluded.is_empty() {
            let names: Vec<&str> = excluded.iter().map(|d| d.name.as_str()).collect();
            sink.send(format!(">>> Excluding from batch: {}\n", names.join(", ")));
            for dev in excluded {
                flash_results.push((dev.name, "EXCLUDED".to_string()));
            }
        }

        // Pre-stop discovery: Moonraker is still up, so configured-MCU
        // queries resolve. One bulk CAN scan per interface.
        sink.send(">>> Checking device statuses before stopping services...\n".to_string());
        let mut can_status = std::collections::HashMap::new();
        let interfaces: BTreeSet<String> = devices
            .iter()
            .filter(|d| d.method == FlashMethod::Can && !d.profile.is_empty())
            .map(|d| d.interface.clone())
            .collect();
        for interface in &interfaces {
            for found in state.flash.discover_can_devices(interface, false).await {
                can_status.insert(found.id.clone(), found.mode);
            }
        }

        let mut reboot_queue: Vec<RebootEntry> = Vec::new();
        for dev in &devices {
            if tasks.is_cancelled(task_id) {
                return Ok(());
            }
            if dev.profile.is_empty() {
                continue;
            }

            let status = if dev.method == FlashMethod::Can {
                can_status
                    .get(&dev.id)
                    .copied()
                    .unwrap_or(DeviceMode::Offline)
            } else {
                state
                    .flash
                    .check_device_status(&dev.id, dev.method, &status_query(dev, false))
                    .await
            };
            tasks.update_device_status(task_id, &dev.id, status);

            // Bridges wait for the flash wave: rebooting one now would kill
            // the CAN bus under its downstream peers.
            if status == DeviceMode::Service && !dev.is_bridge && dev.method != FlashMethod::Linux
            {
                reboot_queue.push(RebootEntry {
                    original_id: dev.id.clone(),
                    id: dev.id.clone(),
                    method: dev.method,
                    name: dev.name.clone(),
                    use_magic_baud: dev.use_magic_baud,
                    interface: dev.interface.clone(),
                    baudrate: dev.baudrate,
                    dfu_id: dev.dfu_id.clone(),
                });
            }
        }

        // 3. Stop services: clear the bus for flashing
        sink.send(services::manage_services(ServiceAction::Stop).await);
        *services_stopped = true;

        // 4. Snapshot serial ids so new bootloader devices are recognisable
        // by set difference later.
        let initial_serials: Vec<String> = state
            .flash
            .discover_serial_devices(true)
            .await
            .into_iter()
            .map(|d| d.id)
            .collect();

        // 5. Reboot wave
        if !reboot_queue.is_empty() {
            if tasks.is_cancelled(task_id) {
                return Ok(());
            }
            tokio::time::sleep(Duration::from_secs(2)).await;

            let mut has_manual_dfu = false;
            for entry in &reboot_queue {
                if tasks.is_cancelled(task_id) {
                    return Ok(());
                }
                if entry.method == FlashMethod::Dfu {
                    if entry.use_magic_baud {
                        sink.send(format!(
                            ">>> Requesting DFU reboot for {} ({})...\n",
                            entry.name, entry.id
                        ));
                        state.flash.reboot_to_dfu(&entry.id, sink).await;
                    } else {
                        sink.send(format!(
                            ">>> MANUAL DFU ENTRY REQUIRED for {}. Please trigger DFU mode now (button/jumper).\n",
                            entry.name
                        ));
                        has_manual_dfu = true;
                    }
                } else {
                    sink.send(format!(
                        ">>> Requesting Katapult reboot for {} ({})...\n",
                        entry.name, entry.id
                    ));
                    state
                        .flash
                        .reboot_to_katapult(
                            &entry.id,
                            entry.method,
                            &entry.interface,
                            entry.baudrate,
                            sink,
                        )
                        .await;
                }
            }

            let wait_secs = if has_manual_dfu {
                MANUAL_DFU_WAIT_SECS
            } else {
                REBOOT_WAIT_SECS
            };
            sink.send(format!(
                ">>> Waiting for devices to enter flash mode (up to {wait_secs}s)...\n"
            ));

            for _ in 0..(wait_secs / 2) {
                if tasks.is_cancelled(task_id) {
                    return Ok(());
                }
                tokio::time::sleep(Duration::from_secs(2)).await;

                // A dropped interface here means a bridge rebooted under us
                let wave_interfaces: BTreeSet<&str> = reboot_queue
                    .iter()
                    .filter(|e| e.method == FlashMethod::Can)
                    .map(|e| e.interface.as_str())
                    .collect();
                for interface in wave_interfaces {
                    let link = state.flash.interface_state(interface).await;
                    if !link.healthy() {
                        sink.send(format!(
                            "!!! CAN interface ({interface}) is DOWN. A bridge may have rebooted unexpectedly.\n"
                        ));
                        sink.send(format!(">>> Attempting to bring {interface} back up...\n"));
                        state.flash.ensure_interface_up(interface).await;
                    }
                }

                let mut ready = 0;
                for entry in &mut reboot_queue {
                    // DFU first: a serial device that re-enumerated in DFU
                    // mode must switch methods.
                    let resolved = state
                        .flash
                        .resolve_dfu_id(&entry.id, entry.dfu_id.as_deref(), false)
                        .await;
                    if resolved != entry.id {
                        sink.send(format!(
                            ">>> Device {} detected in DFU mode: {resolved}\n",
                            entry.name
                        ));
                        adopt_identity(
                            state,
                            &mut devices,
                            &entry.original_id,
                            &entry.id,
                            &resolved,
                            FlashMethod::Dfu,
                        );
                        entry.id = resolved;
                        entry.method = FlashMethod::Dfu;
                    } else if entry.method == FlashMethod::Serial {
                        let new_id = state.flash.resolve_serial_id(&entry.id, None).await;
                        if new_id != entry.id {
                            sink.send(format!(
                                ">>> Device {} serial ID changed: {new_id}\n",
                                entry.name
                            ));
                            adopt_identity(
                                state,
                                &mut devices,
                                &entry.original_id,
                                &entry.id,
                                &new_id,
                                FlashMethod::Serial,
                            );
                            entry.id = new_id;
                        }
                    }

                    let status = state
                        .flash
                        .check_device_status(
                            &entry.id,
                            entry.method,
                            &StatusQuery {
                                dfu_id: entry.dfu_id.clone(),
                                skip_moonraker: true,
                                is_bridge: false,
                                interface: Some(entry.interface.clone()),
                            },
                        )
                        .await;
                    tasks.update_device_status(task_id, &entry.id, status);
                    if status.is_flashable() {
                        ready += 1;
                    }
                }

                if ready == reboot_queue.len() {
                    let hw_ready = devices
                        .iter()
                        .filter(|d| !d.profile.is_empty() && d.method != FlashMethod::Linux)
                        .filter(|d| {
                            tasks
                                .device_status(task_id, &d.id)
                                .map(|m| m.is_flashable())
                                .unwrap_or(false)
                        })
                        .count();
                    let linux_count = devices
                        .iter()
                        .filter(|d| !d.profile.is_empty() && d.method == FlashMethod::Linux)
                        .count();

                    let mut msg = format!(
                        ">>> All {hw_ready} hardware device{}",
                        if hw_ready == 1 { "" } else { "s" }
                    );
                    if linux_count > 0 {
                        msg.push_str(&format!(
                            " and {linux_count} Linux Process{}",
                            if linux_count > 1 { "es" } else { "" }
                        ));
                    }
                    msg.push_str(if hw_ready + linux_count == 1 {
                        " is ready!\n"
                    } else {
                        " are ready!\n"
                    });
                    sink.send(msg);
                    break;
                }
                sink.send(format!(
                    ">>> {ready}/{} hardware devices ready... (waiting)\n",
                    reboot_queue.len()
                ));
            }
        }

        // 6. Flash wave: non-bridges first, bridges last (stable sort keeps
        // registry order inside each group).
        devices.sort_by_key(|d| d.is_bridge);

        for index in 0..devices.len() {
            if tasks.is_cancelled(task_id) {
                return Ok(());
            }
            let mut dev = devices[index].clone();
            if dev.profile.is_empty() {
                continue;
            }

            let mut status = state
                .flash
                .check_device_status(&dev.id, dev.method, &status_query(&dev, true))
                .await;
            tasks.update_device_status(task_id, &dev.id, status);

            let should_flash = action.flash_all() || status == DeviceMode::Ready;
            if !should_flash {
                sink.send(format!(">>> Skipping {} (Status: {status})\n", dev.name));
                flash_results.push((dev.name.clone(), "SKIPPED".to_string()));
                continue;
            }

            // Bridge special case: it was deliberately left running; take it
            // down now that its peers are done.
            if dev.is_bridge && status == DeviceMode::Service {
                let prev_id = dev.id.clone();
                match self::reboot_bridge(state, task_id, sink, &mut dev, &initial_serials).await
                {
                    Ok(Some(new_status)) => {
                        adopt_identity(state, &mut devices, &prev_id, &prev_id, &dev.id, dev.method);
                        devices[index] = dev.clone();
                        status = new_status;
                    }
                    Ok(None) => {
                        // Cancelled mid-wait
                        return Ok(());
                    }
                    Err(reason) => {
                        flash_results.push((dev.name.clone(), reason));
                        continue;
                    }
                }
            }

            if !status.is_flashable() && dev.method != FlashMethod::Linux {
                sink.send(format!(
                    "!!! Skipping {} ({}) - Device is {status}, not ready for flashing.\n",
                    dev.name, dev.id
                ));
                flash_results.push((dev.name.clone(), format!("SKIPPED ({status})")));
                continue;
            }

            sink.send(format!(
                "\n>>> FLASHING {} ({}) with {}...\n",
                dev.name, dev.id, dev.profile
            ));
            let firmware = state.paths.artifact(&dev.profile, dev.method);
            if !firmware.exists() {
                sink.send(format!(
                    "!!! Error: Firmware for {} not found. Skipping.\n",
                    dev.profile
                ));
                flash_results.push((dev.name.clone(), "FAILED (no firmware)".to_string()));
                continue;
            }

            tasks.update_device_status(task_id, &dev.id, DeviceMode::Flashing);
            let flashed = flash_one(state, sink, &dev, &firmware).await;
            match flashed {
                Ok(()) => {
                    tasks.update_device_status(task_id, &dev.id, DeviceMode::Ready);
                    flash_results.push((dev.name.clone(), "SUCCESS".to_string()));
                    if let Some(info) = state.builder.last_build_info(&dev.profile) {
                        if let Err(e) = state.fleet.update_device_version(&dev.id, &info) {
                            warn!("failed to record version for {}: {e}", dev.id);
                        } else {
                            sink.send(format!(
                                ">>> Version recorded: {} ({})\n",
                                info.version, info.commit
                            ));
                        }
                    }
                }
                Err(e) => {
                    sink.send(format!("!!! Error flashing {}: {e}\n", dev.name));
                    tasks.update_device_status(task_id, &dev.id, DeviceMode::Failed);
                    flash_results.push((dev.name.clone(), "FAILED".to_string()));
                }
            }
        }

        sink.send("\n>>> BATCH FLASH COMPLETED <<<\n".to_string());
    }

    // 7. Summary, written exactly once, after all per-device work
    for line in render_summary(&build_results, &flash_results) {
        sink.send(line);
    }
    sink.send("\n>>> ALL BATCH OPERATIONS COMPLETED <<<\n".to_string());

    Ok(())
}

fn status_query(dev: &Device, skip_moonraker: bool) -> StatusQuery {
    StatusQuery {
        dfu_id: dev.dfu_id.clone(),
        skip_moonraker,
        is_bridge: dev.is_bridge,
        interface: Some(dev.interface.clone()),
    }
}

/// Point the in-memory device list and the persisted registry at a device's
/// new physical id.
fn adopt_identity(
    state: &Arc<AppState>,
    devices: &mut [Device],
    original_id: &str,
    current_id: &str,
    new_id: &str,
    method: FlashMethod,
) {
    if let Some(dev) = devices
        .iter_mut()
        .find(|d| d.id == original_id || d.id == current_id)
    {
        let old = dev.id.clone();
        dev.id = new_id.to_string();
        dev.method = method;
        if let Err(e) = state.fleet.rewrite_identity(&old, new_id, method) {
            warn!("failed to persist identity change {old} -> {new_id}: {e}");
        }
    }
}

/// Reboot a still-running bridge into its bootloader and adopt the identity
/// it reappears under. Ok(Some(mode)) on success, Ok(None) on cancellation,
/// Err(result-tag) on timeout.
async fn reboot_bridge(
    state: &Arc<AppState>,
    task_id: &str,
    sink: &LogSink,
    dev: &mut Device,
    initial_serials: &[String],
) -> Result<Option<DeviceMode>, String> {
    let tasks = &state.tasks;

    if dev.method == FlashMethod::Dfu {
        sink.send(format!(
            ">>> Rebooting Bridge Host {} to DFU mode...\n",
            dev.name
        ));
        let serial_id = state.flash.resolve_serial_id(&dev.id, None).await;
        state.flash.reboot_to_dfu(&serial_id, sink).await;

        sink.send(">>> Waiting for bridge to enter DFU mode...\n".to_string());
        tokio::time::sleep(Duration::from_secs(2)).await;

        for _ in 0..BRIDGE_WAIT_SECS {
            if tasks.is_cancelled(task_id) {
                return Ok(None);
            }
            tokio::time::sleep(Duration::from_secs(1)).await;
            let dfu_devices = state.flash.discover_dfu_devices(true).await;
            if let Some(found) = dfu_devices.first() {
                // A lone DFU device is ours; flashing more than one bridge
                // at a time is not supported.
                dev.id = found.id().to_string();
                dev.method = FlashMethod::Dfu;
                sink.send(format!(">>> Bridge is now in DFU mode: {}\n", dev.id));
                return Ok(Some(DeviceMode::Ready));
            }
        }

        sink.send("!!! Bridge did not enter DFU mode. Skipping.\n".to_string());
        Err("FAILED (DFU timeout)".to_string())
    } else {
        sink.send(format!(
            ">>> Rebooting Bridge Host {} to Katapult...\n",
            dev.name
        ));
        state
            .flash
            .reboot_to_katapult(&dev.id, dev.method, &dev.interface, dev.baudrate, sink)
            .await;

        sink.send(">>> Waiting for bridge to enter Katapult mode (Serial)...\n".to_string());
        tokio::time::sleep(Duration::from_secs(2)).await;

        for _ in 0..BRIDGE_WAIT_SECS {
            if tasks.is_cancelled(task_id) {
                return Ok(None);
            }
            tokio::time::sleep(Duration::from_secs(1)).await;
            let current: Vec<String> = state
                .flash
                .discover_serial_devices(true)
                .await
                .into_iter()
                .map(|d| d.id)
                .collect();

            let found = fleet_transport::identity::detect_new_serial(initial_serials, &current)
                .or_else(|| fleet_transport::identity::find_bootloader_serial(&current));
            if let Some(new_id) = found {
                dev.id = new_id;
                dev.method = FlashMethod::Serial;
                sink.send(format!(">>> Bridge is now ready: {}\n", dev.id));
                return Ok(Some(DeviceMode::Ready));
            }
        }

        sink.send("!!! Bridge did not enter Katapult mode. Skipping.\n".to_string());
        Err("FAILED (Katapult timeout)".to_string())
    }
}

/// Dispatch one device to the flasher for its transport.
async fn flash_one(
    state: &Arc<AppState>,
    sink: &LogSink,
    dev: &Device,
    firmware: &std::path::Path,
) -> Result<(), anyhow::Error> {
    match dev.method {
        FlashMethod::Serial => {
            // The id may have shifted again between the wave and now
            let resolved = state.flash.resolve_serial_id(&dev.id, None).await;
            if resolved != dev.id {
                sink.send(format!(">>> Resolved serial ID: {} -> {resolved}\n", dev.id));
            }
            state
                .flash
                .flash_serial(&resolved, firmware, dev.baudrate, sink)
                .await?;
        }
        FlashMethod::Can => {
            if !state.flash.is_interface_up(&dev.interface).await {
                anyhow::bail!(
                    "CAN interface ({}) is DOWN. Cannot flash device.",
                    dev.interface
                );
            }
            state
                .flash
                .flash_can(&dev.id, firmware, &dev.interface, sink)
                .await?;
        }
        FlashMethod::Dfu => {
            let resolved = state
                .flash
                .resolve_dfu_id(&dev.id, dev.dfu_id.as_deref(), false)
                .await;
            let offset = state.profiles.flash_offset(&dev.profile);
            state
                .flash
                .flash_dfu(&resolved, firmware, &offset, dev.use_dfu_exit, sink)
                .await?;
        }
        FlashMethod::Linux => {
            state.flash.flash_linux(firmware, sink).await?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device(name: &str, is_bridge: bool) -> Device {
        Device {
            name: name.to_string(),
            id: format!("id_{name}"),
            old_id: None,
            profile: "generic".to_string(),
            method: FlashMethod::Can,
            interface: "can0".to_string(),
            baudrate: 250_000,
            notes: String::new(),
            is_katapult: true,
            is_bridge,
            dfu_id: None,
            magic_baud_tested: false,
            use_magic_baud: false,
            dfu_exit_tested: false,
            use_dfu_exit: false,
            exclude_from_batch: false,
            flashed_version: None,
            flashed_commit: None,
            last_flashed: None,
            live_version: None,
        }
    }

    #[test]
    fn action_parsing() {
        assert_eq!(BatchAction::parse("build"), Some(BatchAction::Build));
        assert_eq!(
            BatchAction::parse("build-flash-all"),
            Some(BatchAction::BuildFlashAll)
        );
        assert_eq!(BatchAction::parse("flash"), None);

        assert!(BatchAction::BuildFlashReady.includes_build());
        assert!(BatchAction::BuildFlashReady.includes_flash());
        assert!(!BatchAction::Build.includes_flash());
        assert!(BatchAction::FlashAll.flash_all());
        assert!(!BatchAction::FlashReady.flash_all());
    }

    #[test]
    fn bridges_sort_last_keeping_relative_order() {
        let mut devices = vec![
            device("bridge_a", true),
            device("plain_a", false),
            device("bridge_b", true),
            device("plain_b", false),
        ];
        devices.sort_by_key(|d| d.is_bridge);
        let order: Vec<&str> = devices.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(order, ["plain_a", "plain_b", "bridge_a", "bridge_b"]);
    }

    #[test]
    fn summary_colours_by_outcome() {
        let build = vec![("generic".to_string(), "SUCCESS".to_string())];
        let flash = vec![
            ("A".to_string(), "FAILED".to_string()),
            ("B".to_string(), "SUCCESS".to_string()),
            ("C".to_string(), "SKIPPED (offline)".to_string()),
            ("D".to_string(), "EXCLUDED".to_string()),
        ];
        let lines = render_summary(&build, &flash);
        let text = lines.concat();
        assert!(text.contains("[COLOR:GREEN]  - generic: SUCCESS[/COLOR]"));
        assert!(text.contains("[COLOR:RED]  - A: FAILED[/COLOR]"));
        assert!(text.contains("[COLOR:GREEN]  - B: SUCCESS[/COLOR]"));
        assert!(text.contains("[COLOR:YELLOW]  - C: SKIPPED (offline)[/COLOR]"));
        assert!(text.contains("[COLOR:YELLOW]  - D: EXCLUDED[/COLOR]"));
    }

    #[test]
    fn empty_batch_still_renders_the_frame() {
        let lines = render_summary(&Vec::new(), &Vec::new());
        assert_eq!(lines.len(), 3);
        assert!(lines[1].contains("[SUMMARY]"));
    }
}
