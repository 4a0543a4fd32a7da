// Batch orchestrator boundary behaviour, driven through the public API.
// These run against an empty temp data dir, so no bus or vendor tool is
// ever touched.

use std::sync::Arc;
use std::time::Duration;

use fleet_transport::FlashMethod;
use klipperfleet::fleet::Device;
use klipperfleet::jobs::batch::{self, BatchAction};
use klipperfleet::tasks::TaskSnapshot;
use klipperfleet::{AppPaths, AppState, TaskStatus};

fn test_state() -> (tempfile::TempDir, Arc<AppState>) {
    let tmp = tempfile::tempdir().expect("tempdir");
    let paths = AppPaths::rooted(
        &tmp.path().join("klipper"),
        &tmp.path().join("katapult"),
        &tmp.path().join("data"),
    )
    .expect("paths");
    (tmp, Arc::new(AppState::new(paths)))
}

async fn wait_for_completion(state: &Arc<AppState>, task_id: &str) -> TaskSnapshot {
    for _ in 0..600 {
        tokio::time::sleep(Duration::from_millis(100)).await;
        if let Some(snapshot) = state.tasks.get(task_id) {
            if snapshot.completed {
                return snapshot;
            }
        }
    }
    panic!("batch task {task_id} did not complete in time");
}

#[tokio::test]
async fn empty_fleet_flash_all_completes_with_empty_summary() {
    let (_tmp, state) = test_state();

    let task_id = batch::spawn(state.clone(), BatchAction::FlashAll);
    let snapshot = wait_for_completion(&state, &task_id).await;

    assert_eq!(snapshot.status, TaskStatus::Completed);
    let log = snapshot.logs.concat();
    assert!(log.contains("[SUMMARY]"));
    // Nothing was built or flashed, so neither section appears
    assert!(!log.contains("BUILD RESULTS"));
    assert!(!log.contains("FLASH RESULTS"));
    // Services stopped for the flash phase must be started again
    assert!(log.contains(">>> Returning to service..."));
}

#[tokio::test]
async fn build_batch_records_a_missing_profile_as_failed() {
    let (_tmp, state) = test_state();
    state
        .fleet
        .save_device(Device {
            name: "toolhead".to_string(),
            id: "1234567890ab".to_string(),
            old_id: None,
            profile: "missing-profile".to_string(),
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
        })
        .expect("seed fleet");

    let task_id = batch::spawn(state.clone(), BatchAction::Build);
    let snapshot = wait_for_completion(&state, &task_id).await;

    // A broken profile fails that profile, not the task
    assert_eq!(snapshot.status, TaskStatus::Completed);
    let log = snapshot.logs.concat();
    assert!(log.contains("BUILD RESULTS"));
    assert!(log.contains("[COLOR:RED]  - missing-profile: FAILED[/COLOR]"));
    // Pure build runs never touch host services
    assert!(!log.contains(">>> Returning to service..."));
}

#[tokio::test]
async fn cancelled_task_keeps_its_status_after_completion() {
    let (_tmp, state) = test_state();

    let task_id = state.tasks.create();
    state.tasks.cancel(&task_id);
    state.tasks.complete(&task_id, TaskStatus::Completed);

    let snapshot = state.tasks.get(&task_id).expect("snapshot");
    assert_eq!(snapshot.status, TaskStatus::Cancelled);
    assert!(snapshot.completed);
    assert!(snapshot.cancelled);
}
