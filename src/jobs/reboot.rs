//! The reboot endpoint's job: send one device to Katapult or back to its
//! application firmware.

use std::sync::Arc;

use fleet_transport::FlashMethod;
use tokio::sync::mpsc;

use crate::jobs::stream_logger;
use crate::profiles::DEFAULT_FLASH_OFFSET;
use crate::state::AppState;
use crate::tasks::TaskStatus;

/// Target of a reboot request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RebootMode {
    Katapult,
    Application,
}

impl RebootMode {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "katapult" => Some(Self::Katapult),
            // The API historically calls the return path a few names
            "application" | "service" | "regular" => Some(Self::Application),
            _ => None,
        }
    }
}

pub fn spawn_reboot(
    state: Arc<AppState>,
    device_id: String,
    mode: RebootMode,
    method: Option<FlashMethod>,
) -> (String, mpsc::UnboundedReceiver<String>) {
    let task_id = state.tasks.create_bus_task();
    let (sink, out_rx, log_done) = stream_logger(state.clone(), task_id.clone());

    let tid = task_id.clone();
    tokio::spawn(async move {
        // Fleet entry fills in anything the request left out
        let fleet_entry = state.fleet.find(&device_id).ok().flatten();
        let actual_method = method
            .or(fleet_entry.as_ref().map(|d| d.method))
            .unwrap_or(FlashMethod::Can);
        let interface = fleet_entry
            .as_ref()
            .map(|d| d.interface.clone())
            .unwrap_or_else(|| "can0".to_string());
        let baudrate = fleet_entry.as_ref().map(|d| d.baudrate).unwrap_or(250_000);
        // The DFU leave jumps through the profile's flash offset
        let address = fleet_entry
            .as_ref()
            .filter(|d| !d.profile.is_empty())
            .map(|d| state.profiles.flash_offset(&d.profile))
            .unwrap_or_else(|| DEFAULT_FLASH_OFFSET.to_string());

        if !state.tasks.is_cancelled(&tid) {
            match mode {
                RebootMode::Katapult => {
                    state
                        .flash
                        .reboot_to_katapult(&device_id, actual_method, &interface, baudrate, &sink)
                        .await;
                }
                RebootMode::Application => {
                    state
                        .flash
                        .reboot_to_application(
                            &device_id,
                            actual_method,
                            &interface,
                            &address,
                            &sink,
                        )
                        .await;
                }
            }
        }

        drop(sink);
        let _ = log_done.await;
        state.tasks.complete(&tid, TaskStatus::Completed);
    });

    (task_id, out_rx)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_parsing_accepts_the_historic_names() {
        assert_eq!(RebootMode::parse("katapult"), Some(RebootMode::Katapult));
        assert_eq!(RebootMode::parse("service"), Some(RebootMode::Application));
        assert_eq!(
            RebootMode::parse("application"),
            Some(RebootMode::Application)
        );
        assert_eq!(RebootMode::parse("dfu"), None);
    }
}
