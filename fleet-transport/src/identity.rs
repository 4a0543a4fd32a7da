//! Identity resolution across mode transitions.
//!
//! A device's USB product string changes between application and bootloader
//! firmware, so its by-id path changes too; the serial number embedded in
//! that path usually survives. The resolvers map an id from one mode to the
//! matching id in another, but never rename anything themselves; callers
//! decide when a resolved id becomes the persisted one.

use std::path::Path;

use crate::discovery::list_by_id_paths;
use crate::types::DfuDevice;
use crate::FlashManager;

/// Noise tokens that appear in by-id paths around the serial number
const DROP_TOKENS: [&str; 5] = ["usb", "klipper", "katapult", "canboot", "00"];

/// Longest id that is plausibly a bare serial number
const MAX_BARE_SERIAL: usize = 48;

/// Pull the probable serial number out of a device id.
///
/// For a by-id path: split the basename on underscore and dash boundaries,
/// drop the known noise tokens, keep the longest remainder. A short,
/// slash-free id is taken to already be a serial.
pub fn extract_serial(id: &str) -> Option<String> {
    if id.contains('/') {
        let base = id.rsplit('/').next()?;
        base.split(['_', '-'])
            .filter(|t| !t.is_empty())
            .filter(|t| !DROP_TOKENS.iter().any(|d| t.eq_ignore_ascii_case(d)))
            .max_by_key(|t| t.len())
            .map(|t| t.to_string())
    } else if !id.is_empty() && id.len() <= MAX_BARE_SERIAL {
        Some(id.to_string())
    } else {
        None
    }
}

/// Match an id against a DFU listing.
///
/// Order: exact known dfu id, then extracted-serial match, then (non-strict
/// only) the sole connected DFU device. Returns the input unchanged when
/// nothing matches.
pub fn resolve_dfu_id_in(
    id: &str,
    known_dfu_id: Option<&str>,
    strict: bool,
    dfu: &[DfuDevice],
) -> String {
    if let Some(known) = known_dfu_id {
        if !known.is_empty() && dfu.iter().any(|d| d.id() == known) {
            return known.to_string();
        }
    }

    if let Some(serial) = extract_serial(id) {
        if let Some(found) = dfu
            .iter()
            .find(|d| d.serial.as_deref() == Some(serial.as_str()))
        {
            return found.id().to_string();
        }
    }

    if !strict && dfu.len() == 1 {
        return dfu[0].id().to_string();
    }

    id.to_string()
}

/// Map an id (possibly a DFU id) back to a serial by-id path.
pub fn resolve_serial_id_in(id: &str, by_id_paths: &[String], dfu: &[DfuDevice]) -> Option<String> {
    let mut candidates = Vec::new();
    if let Some(serial) = extract_serial(id) {
        candidates.push(serial);
    }
    // A DFU bus-path id carries no serial itself; its listing entry does
    if let Some(serial) = dfu.iter().find(|d| d.id() == id).and_then(|d| d.serial.clone()) {
        if !candidates.contains(&serial) {
            candidates.push(serial);
        }
    }

    for serial in &candidates {
        if let Some(path) = by_id_paths.iter().find(|p| p.contains(serial.as_str())) {
            return Some(path.clone());
        }
    }
    None
}

/// Pick a newly-appeared serial id out of a snapshot diff.
///
/// With several novelties, an id carrying a bootloader product string wins
/// over the rest.
pub fn detect_new_serial(initial: &[String], current: &[String]) -> Option<String> {
    let novel: Vec<&String> = current.iter().filter(|c| !initial.contains(c)).collect();
    novel
        .iter()
        .find(|c| is_bootloader_name(c))
        .or_else(|| novel.first())
        .map(|s| s.to_string())
}

/// Any current id that advertises a Katapult/CanBoot product string
pub fn find_bootloader_serial(current: &[String]) -> Option<String> {
    current.iter().find(|c| is_bootloader_name(c)).cloned()
}

fn is_bootloader_name(id: &str) -> bool {
    let lower = id.to_lowercase();
    lower.contains("katapult") || lower.contains("canboot")
}

impl FlashManager {
    /// Resolve a device id against the current DFU enumeration
    pub async fn resolve_dfu_id(
        &self,
        id: &str,
        known_dfu_id: Option<&str>,
        strict: bool,
    ) -> String {
        let dfu = self.discover_dfu_devices(false).await;
        resolve_dfu_id_in(id, known_dfu_id, strict, &dfu)
    }

    /// Resolve a device id to a live serial path
    pub async fn resolve_serial_id(&self, id: &str, known_serial_id: Option<&str>) -> String {
        if let Some(known) = known_serial_id {
            if Path::new(known).exists() {
                return known.to_string();
            }
        }
        if Path::new(id).exists() {
            return id.to_string();
        }

        let by_id = list_by_id_paths();
        let dfu = self.discover_dfu_devices(false).await;
        resolve_serial_id_in(id, &by_id, &dfu).unwrap_or_else(|| id.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dfu(serial: Option<&str>, path: &str) -> DfuDevice {
        DfuDevice {
            vid_pid: "0483:df11".to_string(),
            serial: serial.map(|s| s.to_string()),
            path: path.to_string(),
        }
    }

    #[test]
    fn extracts_serial_from_by_id_path() {
        let id = "/dev/serial/by-id/usb-katapult_stm32g0b1xx_2A0011000F504B4B33373520-if00";
        assert_eq!(
            extract_serial(id).as_deref(),
            Some("2A0011000F504B4B33373520")
        );

        let id = "/dev/serial/by-id/usb-Klipper_stm32f401xc_34003D000A5053424E303420-if00";
        assert_eq!(
            extract_serial(id).as_deref(),
            Some("34003D000A5053424E303420")
        );
    }

    #[test]
    fn bare_serial_passes_through() {
        assert_eq!(extract_serial("357236543131").as_deref(), Some("357236543131"));
        assert_eq!(extract_serial(""), None);
    }

    #[test]
    fn dfu_resolution_prefers_known_id() {
        let list = vec![dfu(Some("AAA"), "1-1"), dfu(Some("BBB"), "1-2")];
        assert_eq!(
            resolve_dfu_id_in("whatever", Some("BBB"), false, &list),
            "BBB"
        );
    }

    #[test]
    fn dfu_resolution_matches_extracted_serial() {
        let list = vec![dfu(Some("34003D000A5053424E303420"), "1-1.2")];
        let id = "/dev/serial/by-id/usb-Klipper_stm32f401xc_34003D000A5053424E303420-if00";
        assert_eq!(
            resolve_dfu_id_in(id, None, true, &list),
            "34003D000A5053424E303420"
        );
    }

    #[test]
    fn sole_device_fallback_is_non_strict_only() {
        let list = vec![dfu(Some("357236543131"), "1-1.2")];
        assert_eq!(
            resolve_dfu_id_in("unrelated_id", None, false, &list),
            "357236543131"
        );
        assert_eq!(
            resolve_dfu_id_in("unrelated_id", None, true, &list),
            "unrelated_id"
        );
    }

    #[test]
    fn unmatched_input_is_returned_unchanged() {
        let list = vec![dfu(Some("AAA"), "1-1"), dfu(Some("BBB"), "1-2")];
        assert_eq!(resolve_dfu_id_in("nope", None, false, &list), "nope");
    }

    #[test]
    fn serial_resolution_via_dfu_serial() {
        let by_id = vec![
            "/dev/serial/by-id/usb-Klipper_stm32f401xc_34003D-if00".to_string(),
            "/dev/serial/by-id/usb-Beacon_RevH_123-if00".to_string(),
        ];
        let list = vec![dfu(Some("34003D"), "1-1.2")];
        assert_eq!(
            resolve_serial_id_in("34003D", &by_id, &list).as_deref(),
            Some("/dev/serial/by-id/usb-Klipper_stm32f401xc_34003D-if00")
        );
    }

    #[test]
    fn snapshot_diff_finds_the_novel_device() {
        let initial = vec![
            "/dev/serial/by-id/usb-infimech_tx_main_mcu-if00".to_string(),
            "/dev/serial/by-id/usb-AT_stm32g0b1xx-if00".to_string(),
            "/dev/serial/by-id/usb-Beacon_RevH-if00".to_string(),
        ];
        let current = vec![
            "/dev/serial/by-id/usb-AT_stm32g0b1xx-if00".to_string(),
            "/dev/serial/by-id/usb-Beacon_RevH-if00".to_string(),
            "/dev/serial/by-id/usb-katapult_stm32f401xc_1A0028000B51313133353932-if00".to_string(),
        ];
        assert_eq!(
            detect_new_serial(&initial, &current).as_deref(),
            Some("/dev/serial/by-id/usb-katapult_stm32f401xc_1A0028000B51313133353932-if00")
        );
    }

    #[test]
    fn snapshot_diff_prefers_bootloader_names() {
        let initial = vec!["/dev/ttyACM9".to_string()];
        let current = vec![
            "/dev/ttyACM9".to_string(),
            "/dev/serial/by-id/usb-Beacon_RevH_NEW-if00".to_string(),
            "/dev/serial/by-id/usb-canboot_rp2040_NEW-if00".to_string(),
        ];
        assert_eq!(
            detect_new_serial(&initial, &current).as_deref(),
            Some("/dev/serial/by-id/usb-canboot_rp2040_NEW-if00")
        );
    }
}
