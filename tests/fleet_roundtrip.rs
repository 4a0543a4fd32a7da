// Fleet registry round-trips against a real file

use fleet_transport::FlashMethod;
use klipperfleet::builder::BuildInfo;
use klipperfleet::fleet::{Device, FleetStore};

fn device(id: &str, name: &str) -> Device {
    Device {
        name: name.to_string(),
        id: id.to_string(),
        old_id: None,
        profile: "generic-stm32".to_string(),
        method: FlashMethod::Can,
        interface: "can0".to_string(),
        baudrate: 250_000,
        notes: String::new(),
        is_katapult: true,
        is_bridge: false,
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

fn store() -> (tempfile::TempDir, FleetStore) {
    let tmp = tempfile::tempdir().expect("tempdir");
    let store = FleetStore::new(tmp.path().join("fleet.json"));
    (tmp, store)
}

#[test]
fn save_then_get_contains_the_device() {
    let (_tmp, store) = store();
    store.save_device(device("1234567890ab", "toolhead")).unwrap();

    let fleet = store.get_fleet().unwrap();
    assert_eq!(fleet.len(), 1);
    assert_eq!(fleet[0].id, "1234567890ab");
    assert_eq!(fleet[0].name, "toolhead");
    assert!(fleet[0].old_id.is_none());
}

#[test]
fn old_id_is_stripped_from_the_persisted_record() {
    let (tmp, store) = store();
    let mut dev = device("1234567890ab", "toolhead");
    dev.old_id = Some("1234567890ab".to_string());
    store.save_device(dev).unwrap();

    let raw = std::fs::read_to_string(tmp.path().join("fleet.json")).unwrap();
    assert!(!raw.contains("old_id"));
}

#[test]
fn save_with_old_id_swaps_the_identity() {
    let (_tmp, store) = store();
    store.save_device(device("old_path", "mcu")).unwrap();

    let mut renamed = device("new_path", "mcu");
    renamed.old_id = Some("old_path".to_string());
    store.save_device(renamed).unwrap();

    let fleet = store.get_fleet().unwrap();
    assert_eq!(fleet.len(), 1);
    assert_eq!(fleet[0].id, "new_path");
}

#[test]
fn idempotent_save_keeps_the_fleet_count() {
    let (_tmp, store) = store();
    store.save_device(device("a", "one")).unwrap();
    store.save_device(device("b", "two")).unwrap();
    store.save_device(device("a", "one-renamed")).unwrap();

    let fleet = store.get_fleet().unwrap();
    assert_eq!(fleet.len(), 2);
    let a = fleet.iter().find(|d| d.id == "a").unwrap();
    assert_eq!(a.name, "one-renamed");
}

#[test]
fn remove_deletes_only_the_named_device() {
    let (_tmp, store) = store();
    store.save_device(device("a", "one")).unwrap();
    store.save_device(device("b", "two")).unwrap();
    store.remove_device("a").unwrap();

    let fleet = store.get_fleet().unwrap();
    assert_eq!(fleet.len(), 1);
    assert_eq!(fleet[0].id, "b");
}

#[test]
fn rewrite_identity_updates_id_and_method() {
    let (_tmp, store) = store();
    store
        .save_device(device("/dev/serial/by-id/usb-Klipper_stm32-if00", "mcu"))
        .unwrap();

    store
        .rewrite_identity(
            "/dev/serial/by-id/usb-Klipper_stm32-if00",
            "357236543131",
            FlashMethod::Dfu,
        )
        .unwrap();

    let fleet = store.get_fleet().unwrap();
    assert_eq!(fleet[0].id, "357236543131");
    assert_eq!(fleet[0].method, FlashMethod::Dfu);
}

#[test]
fn flash_metadata_lands_on_the_right_device() {
    let (_tmp, store) = store();
    store.save_device(device("a", "one")).unwrap();
    store.save_device(device("b", "two")).unwrap();

    let info = BuildInfo {
        version: "v0.12.0-123-gabc".to_string(),
        commit: "abc123def456".to_string(),
        date: "2025-06-01 10:00:00 +0200".to_string(),
        built_at: "2025-06-01 10:05:00".to_string(),
    };
    store.update_device_version("b", &info).unwrap();

    let fleet = store.get_fleet().unwrap();
    let a = fleet.iter().find(|d| d.id == "a").unwrap();
    let b = fleet.iter().find(|d| d.id == "b").unwrap();
    assert!(a.flashed_version.is_none());
    assert_eq!(b.flashed_version.as_deref(), Some("v0.12.0-123-gabc"));
    assert_eq!(b.flashed_commit.as_deref(), Some("abc123def456"));
    assert!(b.last_flashed.is_some());
}

#[test]
fn missing_file_reads_as_an_empty_fleet() {
    let (_tmp, store) = store();
    assert!(store.get_fleet().unwrap().is_empty());
}
