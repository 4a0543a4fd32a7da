//! Single-device flash pipeline and the magic-baud support probe.
//!
//! Both stream their logs to the HTTP response while mirroring them into the
//! task store, and both restart host services on every exit path that
//! stopped them.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use fleet_transport::discovery::StatusQuery;
use fleet_transport::{DeviceMode, FlashMethod, LogSink};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::warn;

use crate::jobs::stream_logger;
use crate::profiles::DEFAULT_FLASH_OFFSET;
use crate::services::{self, ServiceAction};
use crate::state::AppState;
use crate::tasks::TaskStatus;

/// Bootloader wait after a reboot request, in 1 s polls
const BOOTLOADER_WAIT_SECS: u64 = 30;
/// Manual DFU entry gets 30 polls of 2 s
const MANUAL_DFU_POLLS: u64 = 30;
/// Magic-baud probe window
const MAGIC_TEST_WAIT_SECS: u64 = 10;

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub struct FlashRequest {
    pub profile: String,
    pub device_id: String,
    pub method: FlashMethod,
    #[serde(default)]
    pub dfu_id: Option<String>,
    #[serde(default)]
    pub baudrate: Option<u32>,
    #[serde(default)]
    pub use_magic_baud: bool,
    #[serde(default = "default_true")]
    pub use_dfu_exit: bool,
}

/// Start a flash task; returns the task id and the live log stream.
pub fn spawn_flash(
    state: Arc<AppState>,
    req: FlashRequest,
) -> (String, mpsc::UnboundedReceiver<String>) {
    let task_id = state.tasks.create_bus_task();
    let (sink, out_rx, log_done) = stream_logger(state.clone(), task_id.clone());

    let tid = task_id.clone();
    tokio::spawn(async move {
        let mut services_stopped = false;
        let result = flash_steps(&state, &req, &tid, &sink, &mut services_stopped).await;
        if let Err(e) = result {
            sink.send(format!("!!! Error during flash: {e}\n"));
        }
        if services_stopped {
            sink.send(services::manage_services(ServiceAction::Start).await);
        }
        drop(sink);
        let _ = log_done.await;
        state.tasks.complete(&tid, TaskStatus::Completed);
    });

    (task_id, out_rx)
}

async fn flash_steps(
    state: &Arc<AppState>,
    req: &FlashRequest,
    task_id: &str,
    sink: &LogSink,
    services_stopped: &mut bool,
) -> anyhow::Result<()> {
    let tasks = &state.tasks;
    if tasks.is_cancelled(task_id) {
        return Ok(());
    }

    let firmware = state.paths.artifact(&req.profile, req.method);

    // Stop services early to clear the bus
    sink.send(services::manage_services(ServiceAction::Stop).await);
    *services_stopped = true;

    // The fleet entry knows the interface and baudrate for this device
    let mut interface = "can0".to_string();
    let mut baudrate = req.baudrate.unwrap_or(250_000);
    if let Ok(Some(dev)) = state.fleet.find(&req.device_id) {
        interface = dev.interface;
        baudrate = dev.baudrate;
    }

    // Snapshot serial ids before any reboot for diff-based detection
    let initial_serials: Vec<String> = state
        .flash
        .discover_serial_devices(true)
        .await
        .into_iter()
        .map(|d| d.id)
        .collect();
    let mut new_serial_device: Option<String> = None;

    // 1. Current status
    let status = state
        .flash
        .check_device_status(
            &req.device_id,
            req.method,
            &StatusQuery {
                dfu_id: req.dfu_id.clone(),
                skip_moonraker: true,
                is_bridge: false,
                interface: Some(interface.clone()),
            },
        )
        .await;
    tasks.update_device_status(task_id, &req.device_id, status);

    // 2. Reboot into a bootloader if still running firmware
    if status == DeviceMode::Service {
        if req.method == FlashMethod::Dfu
            || (req.method == FlashMethod::Serial && req.dfu_id.is_some())
        {
            if req.use_magic_baud {
                sink.send(format!(
                    ">>> Rebooting {} to DFU mode (Magic Baud)...\n",
                    req.device_id
                ));
                state.flash.reboot_to_dfu(&req.device_id, sink).await;
            } else {
                sink.send(format!(
                    "!!! MANUAL ACTION REQUIRED: Please put {} into DFU mode now (BOOT0 + RESET).\n",
                    req.device_id
                ));
                sink.send(">>> Waiting for DFU device to appear...\n".to_string());
                let mut found = false;
                for _ in 0..MANUAL_DFU_POLLS {
                    if tasks.is_cancelled(task_id) {
                        return Ok(());
                    }
                    tokio::time::sleep(Duration::from_secs(2)).await;
                    let resolved = state
                        .flash
                        .resolve_dfu_id(&req.device_id, req.dfu_id.as_deref(), false)
                        .await;
                    let dfu_devices = state.flash.discover_dfu_devices(false).await;
                    if dfu_devices.iter().any(|d| d.id() == resolved) {
                        sink.send(">>> DFU device detected!\n".to_string());
                        found = true;
                        break;
                    }
                }
                if !found {
                    sink.send(
                        "!!! TIMEOUT: DFU device not found. Aborting flash.\n".to_string(),
                    );
                    return Ok(());
                }
            }
        } else {
            sink.send(format!(
                ">>> Rebooting {} to Katapult mode...\n",
                req.device_id
            ));
            state
                .flash
                .reboot_to_katapult(&req.device_id, req.method, &interface, baudrate, sink)
                .await;
        }

        sink.send(">>> Waiting for device to enter bootloader mode...\n".to_string());
        // Let the USB bus settle before polling
        tokio::time::sleep(Duration::from_secs(2)).await;

        for _ in 0..BOOTLOADER_WAIT_SECS {
            if tasks.is_cancelled(task_id) {
                return Ok(());
            }
            tokio::time::sleep(Duration::from_secs(1)).await;

            let resolved = state
                .flash
                .resolve_dfu_id(&req.device_id, req.dfu_id.as_deref(), false)
                .await;
            let dfu_devices = state.flash.discover_dfu_devices(false).await;
            if dfu_devices.iter().any(|d| d.id() == resolved) {
                tokio::time::sleep(Duration::from_secs(1)).await;
                break;
            }

            if req.method == FlashMethod::Serial {
                let current: Vec<String> = state
                    .flash
                    .discover_serial_devices(true)
                    .await
                    .into_iter()
                    .map(|d| d.id)
                    .collect();

                if let Some(new_id) =
                    fleet_transport::identity::detect_new_serial(&initial_serials, &current)
                {
                    sink.send(format!(">>> New serial device detected: {new_id}\n"));
                    new_serial_device = Some(new_id);
                    break;
                }
                if let Some(new_id) = fleet_transport::identity::find_bootloader_serial(&current)
                {
                    sink.send(format!(">>> Katapult device detected: {new_id}\n"));
                    new_serial_device = Some(new_id);
                    break;
                }
            }
        }
    }

    if tasks.is_cancelled(task_id) {
        return Ok(());
    }

    // 3. Re-resolve id and method; the reboot may have changed both
    let mut target_id = req.device_id.clone();
    let mut actual_method = req.method;

    if status == DeviceMode::Dfu {
        target_id = state
            .flash
            .resolve_dfu_id(&req.device_id, req.dfu_id.as_deref(), false)
            .await;
        actual_method = FlashMethod::Dfu;
        sink.send(">>> Device detected in DFU mode. Switching to DFU flash method.\n".to_string());
    } else if matches!(req.method, FlashMethod::Serial | FlashMethod::Dfu) {
        let resolved_dfu = state
            .flash
            .resolve_dfu_id(&req.device_id, req.dfu_id.as_deref(), false)
            .await;
        let dfu_devices = state.flash.discover_dfu_devices(false).await;
        if dfu_devices.iter().any(|d| d.id() == resolved_dfu) {
            target_id = resolved_dfu;
            if actual_method != FlashMethod::Dfu {
                sink.send(
                    ">>> Device detected in DFU mode. Switching to DFU flash method.\n"
                        .to_string(),
                );
            }
            actual_method = FlashMethod::Dfu;
        } else if let Some(new_id) = new_serial_device {
            sink.send(format!(">>> Using detected Katapult device: {new_id}\n"));
            target_id = new_id;
            actual_method = FlashMethod::Serial;
        } else {
            let resolved_serial = state.flash.resolve_serial_id(&req.device_id, None).await;
            if Path::new(&resolved_serial).exists() {
                if resolved_serial != req.device_id {
                    sink.send(format!(
                        ">>> Resolved serial ID: {} -> {resolved_serial}\n",
                        req.device_id
                    ));
                }
                target_id = resolved_serial;
                actual_method = FlashMethod::Serial;
            }
        }
    }

    if tasks.is_cancelled(task_id) {
        return Ok(());
    }

    // 4. Flash
    tasks.update_device_status(task_id, &req.device_id, DeviceMode::Flashing);
    let flashed = match actual_method {
        FlashMethod::Serial => {
            state
                .flash
                .flash_serial(&target_id, &firmware, baudrate, sink)
                .await
        }
        FlashMethod::Can => {
            state
                .flash
                .flash_can(&target_id, &firmware, &interface, sink)
                .await
        }
        FlashMethod::Dfu => {
            let offset = state.profiles.flash_offset(&req.profile);
            state
                .flash
                .flash_dfu(&target_id, &firmware, &offset, req.use_dfu_exit, sink)
                .await
        }
        FlashMethod::Linux => state.flash.flash_linux(&firmware, sink).await,
    };

    match flashed {
        Ok(()) => {
            tasks.update_device_status(task_id, &req.device_id, DeviceMode::Ready);
            if let Some(info) = state.builder.last_build_info(&req.profile) {
                if let Err(e) = state.fleet.update_device_version(&req.device_id, &info) {
                    warn!("failed to record version for {}: {e}", req.device_id);
                } else {
                    sink.send(format!(
                        ">>> Version recorded: {} ({})\n",
                        info.version, info.commit
                    ));
                }
            }
        }
        Err(e) => {
            sink.send(format!("!!! Error during flash: {e}\n"));
            tasks.update_device_status(task_id, &req.device_id, DeviceMode::Failed);
        }
    }

    Ok(())
}

/// Probe whether a device supports the 1200-baud bootloader jump, optionally
/// testing the full cycle back to firmware. The log carries PHASE1_SUCCESS /
/// PHASE2_SUCCESS markers for the UI.
pub fn spawn_magic_baud_test(
    state: Arc<AppState>,
    device_id: String,
    full_cycle: bool,
) -> (String, mpsc::UnboundedReceiver<String>) {
    let task_id = state.tasks.create();
    let (sink, out_rx, log_done) = stream_logger(state.clone(), task_id.clone());

    let tid = task_id.clone();
    tokio::spawn(async move {
        magic_test(&state, &device_id, full_cycle, &tid, &sink).await;
        drop(sink);
        let _ = log_done.await;
        state.tasks.complete(&tid, TaskStatus::Completed);
    });

    (task_id, out_rx)
}

async fn magic_test(
    state: &Arc<AppState>,
    device_id: &str,
    full_cycle: bool,
    task_id: &str,
    sink: &LogSink,
) {
    sink.send(format!(
        ">>> Testing DFU Cycle on {device_id} (Full Cycle: {full_cycle})...\n"
    ));

    let dfu_devices = state.flash.discover_dfu_devices(true).await;
    let mut found_dfu_id: Option<String> = None;

    if !dfu_devices.is_empty() && !Path::new(device_id).exists() {
        sink.send(">>> Device is already in DFU mode (or serial port is missing).\n".to_string());
        sink.send(">>> SUCCESS: DFU device detected.\n".to_string());
        sink.send(">>> PHASE1_SUCCESS\n".to_string());
        found_dfu_id = dfu_devices.first().map(|d| d.id().to_string());
        if !full_cycle {
            return;
        }
    } else {
        if let Err(e) = state.flash.magic_baud_touch(device_id).await {
            sink.send(format!("!!! Error sending signal: {e}\n"));
            return;
        }
        sink.send(format!(
            ">>> 1200bps signal sent. Waiting {MAGIC_TEST_WAIT_SECS}s for device to reappear in DFU mode...\n"
        ));

        for _ in 0..MAGIC_TEST_WAIT_SECS {
            if state.tasks.is_cancelled(task_id) {
                return;
            }
            tokio::time::sleep(Duration::from_secs(1)).await;
            let dfu_devices = state.flash.discover_dfu_devices(true).await;
            if let Some(found) = dfu_devices.first() {
                let id = found.id().to_string();
                sink.send(format!(">>> SUCCESS: DFU device detected ({id}).\n"));
                sink.send(">>> PHASE1_SUCCESS\n".to_string());
                found_dfu_id = Some(id);
                break;
            }
            if !Path::new(device_id).exists() {
                sink.send(format!(
                    ">>> Device {device_id} disconnected. Waiting for DFU...\n"
                ));
            }
        }

        if found_dfu_id.is_none() {
            sink.send(
                "!!! TIMEOUT: No DFU device detected after 10s. Magic baud might not be supported.\n"
                    .to_string(),
            );
            return;
        }
    }

    if full_cycle {
        sink.send(">>> Phase 2: Testing 'Restart to Firmware' (DFU Exit)...\n".to_string());
        if let Some(dfu_id) = &found_dfu_id {
            // The probe has no profile context; use the default offset
            state
                .flash
                .reboot_to_application(
                    dfu_id,
                    FlashMethod::Dfu,
                    "can0",
                    DEFAULT_FLASH_OFFSET,
                    sink,
                )
                .await;
        }

        sink.send(format!(
            ">>> Waiting {MAGIC_TEST_WAIT_SECS}s for serial device {device_id} to return...\n"
        ));
        for _ in 0..MAGIC_TEST_WAIT_SECS {
            if state.tasks.is_cancelled(task_id) {
                return;
            }
            tokio::time::sleep(Duration::from_secs(1)).await;
            if Path::new(device_id).exists() {
                sink.send(format!(">>> SUCCESS: Device {device_id} is back online!\n"));
                sink.send(">>> PHASE2_SUCCESS\n".to_string());
                sink.send(">>> FULL CYCLE SUCCESSFUL.\n".to_string());
                return;
            }
        }
        sink.send(
            "!!! TIMEOUT: Device did not return to serial mode. You may need to manually reset it.\n"
                .to_string(),
        );
    }
}
