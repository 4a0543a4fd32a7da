//! Per-transport flash operations.
//!
//! Output is streamed in raw chunks so the vendor tools' carriage-return
//! progress bars arrive intact. Each operation holds its bus lock from the
//! first byte to the last and reports failure through `Result`, leaving
//! retry-or-skip policy to the orchestrator.

use std::path::Path;
use std::time::Duration;

use crate::error::TransportError;
use crate::identity;
use crate::process::{run_command, stream_command, LogSink};
use crate::types::HOST_MCU_BINARY;
use crate::FlashManager;

/// DFU download attempts before giving up
const DFU_FLASH_RETRIES: u32 = 3;
/// Pause between DFU attempts, enough for the bootloader to recover
const DFU_RETRY_GAP: Duration = Duration::from_secs(2);

const LINUX_SERVICE_TIMEOUT: Duration = Duration::from_secs(30);

/// dfu-util exits 251 when the USB device detaches during the transaction;
/// on the `:leave` step that is the expected success path.
pub fn dfu_exit_ok(code: Option<i32>) -> bool {
    matches!(code, Some(0) | Some(251))
}

/// Does this id look like a USB bus path ("1-1.2") rather than a serial?
/// Bus paths are always bus-port dotted-decimal with a dash; serials are
/// plain alphanumeric strings.
fn looks_like_bus_path(id: &str) -> bool {
    id.contains('-')
        && !id.is_empty()
        && id.chars().all(|c| c.is_ascii_digit() || c == '-' || c == '.')
        && id.chars().any(|c| c.is_ascii_digit())
}

/// dfu-util disambiguation: `-p` for a bus path, `-S` for a serial, never
/// both.
pub(crate) fn dfu_selector_args(id: &str) -> Vec<String> {
    if id.is_empty() {
        Vec::new()
    } else if looks_like_bus_path(id) {
        vec!["-p".to_string(), id.to_string()]
    } else {
        vec!["-S".to_string(), id.to_string()]
    }
}

fn flash_result(code: Option<i32>, sink: &LogSink, command: &str) -> Result<(), TransportError> {
    match code {
        Some(0) => {
            sink.send(">>> Flashing successful!\n".to_string());
            Ok(())
        }
        code => {
            sink.send(format!(
                ">>> Flashing failed with return code {}\n",
                code.map(|c| c.to_string()).unwrap_or_else(|| "signal".to_string())
            ));
            Err(TransportError::CommandFailed {
                command: command.to_string(),
                code,
            })
        }
    }
}

impl FlashManager {
    /// Flash over serial with the Katapult flashtool.
    pub async fn flash_serial(
        &self,
        id: &str,
        firmware: &Path,
        baudrate: u32,
        sink: &LogSink,
    ) -> Result<(), TransportError> {
        sink.send(format!(
            ">>> Flashing {} to {id} via Serial...\n",
            firmware.display()
        ));
        let flashtool = self.paths.flashtool();
        let flashtool = flashtool.to_string_lossy();
        let firmware = firmware.to_string_lossy();
        let baud = baudrate.to_string();

        let code = stream_command(
            "python3",
            &[&flashtool, "-d", id, "-b", &baud, "-f", &firmware],
            sink,
        )
        .await?;
        flash_result(code, sink, "flashtool serial")
    }

    /// Flash a CAN node with the Katapult flashtool, holding the CAN lock.
    pub async fn flash_can(
        &self,
        uuid: &str,
        firmware: &Path,
        interface: &str,
        sink: &LogSink,
    ) -> Result<(), TransportError> {
        sink.send(format!(
            ">>> Flashing {} to {uuid} via {interface}...\n",
            firmware.display()
        ));
        let flashtool = self.paths.flashtool();
        let flashtool = flashtool.to_string_lossy();
        let firmware = firmware.to_string_lossy();

        let _bus = self.buses.lock_can().await;
        let result = stream_command(
            "python3",
            &[&flashtool, "-i", interface, "-u", uuid, "-f", &firmware],
            sink,
        )
        .await;
        self.buses.invalidate_can(interface);
        flash_result(result?, sink, "flashtool can")
    }

    /// Flash via dfu-util with download retries and re-resolution of the
    /// DFU id between attempts (the bootloader occasionally re-enumerates
    /// after a failed transfer).
    pub async fn flash_dfu(
        &self,
        id: &str,
        firmware: &Path,
        address: &str,
        leave: bool,
        sink: &LogSink,
    ) -> Result<(), TransportError> {
        sink.send(format!(
            ">>> Flashing {} to {id} via DFU at {address}...\n",
            firmware.display()
        ));

        let _bus = self.buses.lock_dfu().await;
        self.buses.invalidate_dfu();

        let firmware = firmware.to_string_lossy();
        let mut target = id.to_string();
        let mut code = None;

        for attempt in 1..=DFU_FLASH_RETRIES {
            if attempt > 1 {
                sink.send(format!(
                    ">>> Retrying DFU download (attempt {attempt}/{DFU_FLASH_RETRIES})...\n"
                ));
                tokio::time::sleep(DFU_RETRY_GAP).await;

                // Already holding the DFU lock; scan directly
                let scan = self.dfu_scan().await;
                let resolved = identity::resolve_dfu_id_in(&target, None, false, &scan);
                if resolved != target {
                    sink.send(format!(">>> Re-resolved DFU id: {target} -> {resolved}\n"));
                    target = resolved;
                }
            }

            let mut args: Vec<String> = vec![
                "-a".into(),
                "0".into(),
                "-d".into(),
                "0483:df11".into(),
                "-s".into(),
                address.to_string(),
                "-D".into(),
                firmware.to_string(),
            ];
            args.extend(dfu_selector_args(&target));
            let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();

            code = stream_command("dfu-util", &arg_refs, sink).await?;
            if code == Some(0) {
                break;
            }
            sink.send(format!(
                "!!! dfu-util download failed with return code {}\n",
                code.map(|c| c.to_string()).unwrap_or_else(|| "signal".to_string())
            ));
        }

        if code != Some(0) {
            sink.send(">>> Flashing failed after retries\n".to_string());
            return Err(TransportError::CommandFailed {
                command: "dfu-util download".to_string(),
                code,
            });
        }

        if leave {
            sink.send(">>> Restarting device into firmware (:leave)...\n".to_string());
            let leave_arg = format!("{address}:leave");
            let mut args: Vec<String> = vec![
                "-a".into(),
                "0".into(),
                "-d".into(),
                "0483:df11".into(),
                "-s".into(),
                leave_arg,
                "-R".into(),
            ];
            args.extend(dfu_selector_args(&target));
            let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();

            let code = stream_command("dfu-util", &arg_refs, sink).await?;
            if !dfu_exit_ok(code) {
                sink.send(format!(
                    "!!! DFU leave failed with return code {:?}\n",
                    code
                ));
                return Err(TransportError::CommandFailed {
                    command: "dfu-util leave".to_string(),
                    code,
                });
            }
        }

        sink.send(">>> Flashing successful!\n".to_string());
        Ok(())
    }

    /// "Flash" the host-process MCU: install the binary over the old one.
    pub async fn flash_linux(&self, firmware: &Path, sink: &LogSink) -> Result<(), TransportError> {
        sink.send(format!(
            ">>> Installing Linux MCU binary: {}...\n",
            firmware.display()
        ));

        // Service stop and stale-process kill are best-effort; a fresh host
        // may have neither.
        let _ = run_command(
            "sudo",
            &["systemctl", "stop", "klipper-mcu.service"],
            Some(LINUX_SERVICE_TIMEOUT),
        )
        .await;
        let _ = run_command(
            "sudo",
            &["fuser", "-k", HOST_MCU_BINARY],
            Some(Duration::from_secs(10)),
        )
        .await;
        tokio::time::sleep(Duration::from_secs(2)).await;

        let firmware = firmware.to_string_lossy();
        let copy = run_command(
            "sudo",
            &["cp", &firmware, HOST_MCU_BINARY],
            Some(LINUX_SERVICE_TIMEOUT),
        )
        .await?;
        if !copy.success() {
            sink.send(format!(
                "!!! Error copying binary: {}{}\n",
                copy.stdout, copy.stderr
            ));
            return Err(TransportError::CommandFailed {
                command: "cp klipper_mcu".to_string(),
                code: copy.code,
            });
        }

        let chmod = run_command(
            "sudo",
            &["chmod", "+x", HOST_MCU_BINARY],
            Some(Duration::from_secs(10)),
        )
        .await?;
        if !chmod.success() {
            return Err(TransportError::CommandFailed {
                command: "chmod klipper_mcu".to_string(),
                code: chmod.code,
            });
        }

        sink.send(">>> Linux MCU binary installed successfully.\n".to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_251_only_counts_on_leave() {
        // Policy probe used by the leave step
        assert!(dfu_exit_ok(Some(0)));
        assert!(dfu_exit_ok(Some(251)));
        assert!(!dfu_exit_ok(Some(1)));
        assert!(!dfu_exit_ok(None));
    }

    #[test]
    fn selector_picks_path_or_serial_never_both() {
        assert_eq!(dfu_selector_args("1-1.2"), vec!["-p", "1-1.2"]);
        assert_eq!(dfu_selector_args("3-1"), vec!["-p", "3-1"]);
        assert_eq!(
            dfu_selector_args("357236543131"),
            vec!["-S", "357236543131"]
        );
        assert!(dfu_selector_args("").is_empty());
    }
}
