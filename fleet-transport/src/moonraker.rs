//! Moonraker (host printer service) queries.
//!
//! Every call is soft: a stopped or unreachable Moonraker yields an empty
//! answer, never an error, because the fleet must stay manageable while the
//! printer services are down.

use std::collections::HashMap;
use std::time::Duration;

use tracing::debug;

/// Default Moonraker endpoint on the host
pub const MOONRAKER_URL: &str = "http://localhost:7125";

const QUERY_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone)]
pub struct MoonrakerClient {
    base: String,
}

impl Default for MoonrakerClient {
    fn default() -> Self {
        Self::new(MOONRAKER_URL)
    }
}

impl MoonrakerClient {
    pub fn new(base: impl Into<String>) -> Self {
        Self { base: base.into() }
    }

    /// Configured MCU identities from the active printer config.
    ///
    /// Keys are CAN UUIDs (lowercased 12-hex) and serial paths; values are
    /// the config section names (`mcu`, `mcu toolhead`, ...).
    pub async fn configured_mcus(&self) -> HashMap<String, String> {
        let mut mcus = HashMap::new();

        let client = match reqwest::Client::builder().timeout(QUERY_TIMEOUT).build() {
            Ok(c) => c,
            Err(e) => {
                debug!("moonraker client unavailable: {e}");
                return mcus;
            }
        };

        let url = format!("{}/printer/objects/query?configfile", self.base);
        let json: serde_json::Value = match client.get(&url).send().await {
            Ok(resp) if resp.status().is_success() => match resp.json().await {
                Ok(v) => v,
                Err(e) => {
                    debug!("moonraker response parse failed: {e}");
                    return mcus;
                }
            },
            Ok(resp) => {
                debug!("moonraker query returned {}", resp.status());
                return mcus;
            }
            Err(e) => {
                debug!("moonraker unreachable: {e}");
                return mcus;
            }
        };

        let config = json
            .pointer("/result/status/configfile/config")
            .and_then(|v| v.as_object());

        if let Some(sections) = config {
            for (section_name, section) in sections {
                let Some(section) = section.as_object() else {
                    continue;
                };
                if let Some(uuid) = section.get("canbus_uuid").and_then(|v| v.as_str()) {
                    mcus.insert(uuid.trim().to_lowercase(), section_name.clone());
                }
                if let Some(serial) = section.get("serial").and_then(|v| v.as_str()) {
                    mcus.insert(serial.trim().to_string(), section_name.clone());
                }
            }
        }

        mcus
    }
}
