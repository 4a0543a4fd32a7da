//! Directed mode transitions.
//!
//! Each transition streams its progress as log lines and never panics; a
//! device that refuses to move is reported in the log and left to the
//! caller's status checks. Transitions that drive a bus hold its lock for
//! their whole duration.

use std::path::Path;
use std::time::Duration;

use tracing::debug;

use crate::canjump;
use crate::error::TransportError;
use crate::process::{run_command, stream_command, LogSink};
use crate::types::FlashMethod;
use crate::FlashManager;

/// Settle time after the 1200-baud touch before rechecking the port
const MAGIC_BAUD_SETTLE: Duration = Duration::from_secs(2);
/// USB re-enumeration into DFU takes a little longer
const DFU_ENUM_SETTLE: Duration = Duration::from_secs(3);

const DFU_LEAVE_TIMEOUT: Duration = Duration::from_secs(30);

impl FlashManager {
    /// Open a serial port at 1200 baud and immediately close it; on many
    /// firmware images this jumps into the bootloader.
    pub async fn magic_baud_touch(&self, id: &str) -> Result<(), TransportError> {
        let path = id.to_string();
        tokio::task::spawn_blocking(move || -> Result<(), TransportError> {
            let port = serialport::new(path.as_str(), 1200)
                .timeout(Duration::from_millis(250))
                .open()?;
            drop(port);
            Ok(())
        })
        .await
        .map_err(|e| TransportError::SerialError(format!("serial task failed: {e}")))?
    }

    /// Reboot a device into the Katapult bootloader.
    pub async fn reboot_to_katapult(
        &self,
        id: &str,
        method: FlashMethod,
        interface: &str,
        baudrate: u32,
        sink: &LogSink,
    ) {
        sink.send(format!(">>> Requesting reboot to Katapult for {id}...\n"));

        let flashtool = self.paths.flashtool();
        let flashtool = flashtool.to_string_lossy();

        if method == FlashMethod::Can {
            let _bus = self.buses.lock_can().await;
            let result = stream_command(
                "python3",
                &[&flashtool, "-i", interface, "-u", id, "-r"],
                sink,
            )
            .await;
            self.buses.invalidate_can(interface);
            match result {
                Ok(Some(0)) => {}
                Ok(code) => sink.send(format!(
                    ">>> Reboot command failed with return code {}. Device might already be in Katapult or unreachable.\n",
                    code.map(|c| c.to_string()).unwrap_or_else(|| "signal".to_string())
                )),
                Err(e) => sink.send(format!("!!! Error requesting reboot: {e}\n")),
            }
            return;
        }

        // Serial path: try the 1200-baud trick first, it needs no bootloader
        // support in the running firmware.
        match self.magic_baud_touch(id).await {
            Ok(()) => {
                tokio::time::sleep(MAGIC_BAUD_SETTLE).await;
                if !Path::new(id).exists() {
                    sink.send(">>> Device re-enumerated after 1200bps touch.\n".to_string());
                    return;
                }
            }
            Err(e) => debug!("1200bps touch on {id} failed: {e}"),
        }

        let baud = baudrate.to_string();
        let result = stream_command(
            "python3",
            &[&flashtool, "-d", id, "-b", &baud, "-r"],
            sink,
        )
        .await;
        match result {
            Ok(Some(0)) => sink.send(
                ">>> Reboot command sent. Device should appear in Katapult mode shortly.\n"
                    .to_string(),
            ),
            Ok(code) => sink.send(format!(
                ">>> Reboot command failed with return code {}. Device might already be in Katapult or unreachable.\n",
                code.map(|c| c.to_string()).unwrap_or_else(|| "signal".to_string())
            )),
            Err(e) => sink.send(format!("!!! Error requesting reboot: {e}\n")),
        }
    }

    /// Reboot a serial device into the DFU ROM bootloader via the magic baud.
    pub async fn reboot_to_dfu(&self, id: &str, sink: &LogSink) {
        let serial_id = self.resolve_serial_id(id, None).await;
        sink.send(format!(">>> Sending 1200bps signal to {serial_id}...\n"));
        if let Err(e) = self.magic_baud_touch(&serial_id).await {
            sink.send(format!("!!! Error sending signal: {e}\n"));
            return;
        }
        sink.send(">>> Waiting for USB re-enumeration...\n".to_string());
        tokio::time::sleep(DFU_ENUM_SETTLE).await;
    }

    /// Return a device to its application firmware. `address` is the flash
    /// offset the DFU leave jumps through; callers derive it from the
    /// device's profile.
    pub async fn reboot_to_application(
        &self,
        id: &str,
        method: FlashMethod,
        interface: &str,
        address: &str,
        sink: &LogSink,
    ) {
        match method {
            FlashMethod::Can => {
                sink.send(format!(">>> Requesting regular reboot for {id}...\n"));
                let _bus = self.buses.lock_can().await;
                let result = canjump::send_jump_to_application(interface, id).await;
                self.buses.invalidate_can(interface);
                match result {
                    Ok(()) => {
                        sink.send(format!("Jump command sent to UUID {id}\n"));
                        sink.send(">>> Regular reboot command sent.\n".to_string());
                    }
                    Err(e) => sink.send(format!("!!! Error sending jump command: {e}\n")),
                }
            }
            FlashMethod::Dfu => {
                self.dfu_leave(id, address, sink).await;
            }
            _ => {
                sink.send(format!(
                    ">>> Serial device {id} will return to service after flash or timeout.\n"
                ));
            }
        }
    }

    /// Kick an STM32 DFU bootloader into the application: a one-byte upload
    /// with the `:leave` modifier into a throwaway sink file. dfu-util exits
    /// 251 when the device detaches mid-transaction, which is the expected
    /// outcome here.
    pub async fn dfu_leave(&self, id: &str, address: &str, sink: &LogSink) {
        sink.send(format!(">>> Requesting DFU exit for {id}...\n"));

        let _bus = self.buses.lock_dfu().await;
        self.buses.invalidate_dfu();

        // dfu-util refuses to overwrite an existing upload target, so hand
        // it a fresh path inside a throwaway directory.
        let tmp = match tempfile::tempdir() {
            Ok(t) => t,
            Err(e) => {
                sink.send(format!("!!! Error creating sink file: {e}\n"));
                return;
            }
        };
        let tmp_path = tmp
            .path()
            .join("dfu-leave.bin")
            .to_string_lossy()
            .into_owned();
        let leave = format!("{address}:leave");

        let mut args: Vec<String> = vec![
            "-a".into(),
            "0".into(),
            "-d".into(),
            "0483:df11".into(),
            "-s".into(),
            leave,
            "-U".into(),
            tmp_path,
            "-Z".into(),
            "1".into(),
        ];
        args.extend(crate::flash::dfu_selector_args(id));
        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();

        match run_command("dfu-util", &arg_refs, Some(DFU_LEAVE_TIMEOUT)).await {
            Ok(out) if crate::flash::dfu_exit_ok(out.code) => {
                sink.send(">>> DFU exit requested; device should reboot to firmware.\n".to_string());
            }
            Ok(out) => sink.send(format!(
                "!!! DFU exit failed with return code {:?}\n",
                out.code
            )),
            Err(e) => sink.send(format!("!!! Error running dfu-util: {e}\n")),
        }
    }
}
