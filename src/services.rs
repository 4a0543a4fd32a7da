//! Host service control.
//!
//! Klipper and Moonraker own the serial ports and the CAN bus while they
//! run; the orchestrator stops them around flashing and always brings them
//! back. Everything here reports through a single log line and never
//! errors.

use std::time::Duration;

use fleet_transport::process::run_command;
use serde::Serialize;
use tracing::debug;

/// Our own unit must never be stopped by the service sweep
const SELF_SERVICE: &str = "klipperfleet.service";

const LIST_TIMEOUT: Duration = Duration::from_secs(10);
const ACTION_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceAction {
    Start,
    Stop,
    Restart,
}

impl ServiceAction {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "start" => Some(Self::Start),
            "stop" => Some(Self::Stop),
            "restart" => Some(Self::Restart),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Stop => "stop",
            Self::Restart => "restart",
        }
    }

    fn past_tense(&self) -> &'static str {
        match self {
            Self::Start => "started",
            Self::Stop => "stopped",
            Self::Restart => "restarted",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ServiceStatus {
    pub name: String,
    pub active: bool,
    pub status: String,
}

/// Unit names from `systemctl list-units --no-legend --plain` output
fn parse_unit_names(stdout: &str) -> Vec<String> {
    stdout
        .lines()
        .filter_map(|line| line.split_whitespace().next())
        .filter(|name| name.ends_with(".service") && *name != SELF_SERVICE)
        .map(|name| name.to_string())
        .collect()
}

/// (unit, active-state, sub-state) rows from the same listing
fn parse_unit_table(stdout: &str) -> Vec<ServiceStatus> {
    let mut result = Vec::new();
    for line in stdout.lines() {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 4 {
            continue;
        }
        let name = fields[0];
        if !name.ends_with(".service") || name == SELF_SERVICE {
            continue;
        }
        result.push(ServiceStatus {
            name: name.to_string(),
            active: fields[2] == "active",
            status: fields[3].to_string(),
        });
    }
    result
}

async fn list_units() -> Result<String, String> {
    let out = run_command(
        "systemctl",
        &[
            "list-units",
            "--type=service",
            "--all",
            "--no-legend",
            "--plain",
            "klipper*",
            "moonraker*",
        ],
        Some(LIST_TIMEOUT),
    )
    .await
    .map_err(|e| e.to_string())?;
    Ok(out.stdout)
}

/// Apply start/stop/restart to every Klipper and Moonraker unit on the host.
pub async fn manage_services(action: ServiceAction) -> String {
    let stdout = match list_units().await {
        Ok(s) => s,
        Err(e) => return format!(">>> Error managing services: {e}\n"),
    };

    let units = parse_unit_names(&stdout);
    if units.is_empty() {
        return format!(
            ">>> No Klipper/Moonraker services found to {}.\n",
            action.as_str()
        );
    }

    for unit in &units {
        let result = run_command(
            "sudo",
            &["systemctl", action.as_str(), unit],
            Some(ACTION_TIMEOUT),
        )
        .await;
        if let Err(e) = result {
            debug!("systemctl {} {unit} failed: {e}", action.as_str());
        }
    }

    format!(
        ">>> Successfully {}: {}\n",
        action.past_tense(),
        units.join(", ")
    )
}

/// Current state of the Klipper/Moonraker units
pub async fn services_status() -> Vec<ServiceStatus> {
    match list_units().await {
        Ok(stdout) => parse_unit_table(&stdout),
        Err(_) => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LISTING: &str = "\
klipper.service      loaded active running Klipper 3D printer firmware
klipper-mcu.service  loaded inactive dead   Klipper MCU host process
klipperfleet.service loaded active running KlipperFleet manager
moonraker.service    loaded active running Moonraker API server
";

    #[test]
    fn unit_names_exclude_self() {
        let names = parse_unit_names(LISTING);
        assert_eq!(
            names,
            ["klipper.service", "klipper-mcu.service", "moonraker.service"]
        );
    }

    #[test]
    fn unit_table_parses_states() {
        let table = parse_unit_table(LISTING);
        assert_eq!(table.len(), 3);
        assert!(table[0].active);
        assert_eq!(table[0].status, "running");
        assert!(!table[1].active);
        assert_eq!(table[1].status, "dead");
        assert!(table.iter().all(|s| s.name != SELF_SERVICE));
    }

    #[test]
    fn action_parsing() {
        assert_eq!(ServiceAction::parse("stop"), Some(ServiceAction::Stop));
        assert_eq!(ServiceAction::parse("reload"), None);
    }
}
