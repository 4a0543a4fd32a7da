//! In-memory task registry.
//!
//! Tasks are process-lifetime only: identified, cancellable, observable,
//! never persisted. Cancellation is a cooperative bit the running task
//! polls between steps.

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use fleet_transport::DeviceMode;
use serde::Serialize;

pub const CANCEL_MARKER: &str = "\n!!! TASK CANCELLED BY USER !!!\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Running,
    Completed,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, Serialize)]
pub struct TaskSnapshot {
    pub id: String,
    pub status: TaskStatus,
    pub completed: bool,
    pub cancelled: bool,
    pub is_bus_task: bool,
    pub logs: Vec<String>,
    pub device_statuses: HashMap<String, DeviceMode>,
}

struct TaskRecord {
    status: TaskStatus,
    completed: bool,
    cancelled: bool,
    is_bus_task: bool,
    logs: Vec<String>,
    device_statuses: HashMap<String, DeviceMode>,
}

impl TaskRecord {
    fn new() -> Self {
        Self {
            status: TaskStatus::Running,
            completed: false,
            cancelled: false,
            is_bus_task: false,
            logs: Vec::new(),
            device_statuses: HashMap::new(),
        }
    }
}

/// Live device-status overrides across all running tasks, plus the flags the
/// fleet-status path needs to decide between probing and `bus_busy`.
#[derive(Debug, Default, Clone)]
pub struct StatusOverrides {
    pub statuses: HashMap<String, DeviceMode>,
    pub task_running: bool,
    pub bus_task_running: bool,
}

#[derive(Default)]
pub struct TaskStore {
    tasks: parking_lot::Mutex<HashMap<String, TaskRecord>>,
}

impl TaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a task keyed by a monotonic millisecond timestamp
    pub fn create(&self) -> String {
        let mut tasks = self.tasks.lock();
        let mut millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or(0);
        let mut id = format!("task_{millis}");
        while tasks.contains_key(&id) {
            millis += 1;
            id = format!("task_{millis}");
        }
        tasks.insert(id.clone(), TaskRecord::new());
        id
    }

    /// Create a task that will hold bus locks; the fleet-status path treats
    /// Moonraker as unavailable while one runs.
    pub fn create_bus_task(&self) -> String {
        let id = self.create();
        self.set_bus_task(&id);
        id
    }

    pub fn set_bus_task(&self, task_id: &str) {
        if let Some(task) = self.tasks.lock().get_mut(task_id) {
            task.is_bus_task = true;
        }
    }

    pub fn append_log(&self, task_id: &str, line: impl Into<String>) {
        if let Some(task) = self.tasks.lock().get_mut(task_id) {
            task.logs.push(line.into());
        }
    }

    pub fn update_device_status(&self, task_id: &str, device_id: &str, mode: DeviceMode) {
        if let Some(task) = self.tasks.lock().get_mut(task_id) {
            task.device_statuses.insert(device_id.to_string(), mode);
        }
    }

    pub fn device_status(&self, task_id: &str, device_id: &str) -> Option<DeviceMode> {
        self.tasks
            .lock()
            .get(task_id)
            .and_then(|t| t.device_statuses.get(device_id).copied())
    }

    /// Flip the cancellation bit. Returns false for an unknown task.
    pub fn cancel(&self, task_id: &str) -> bool {
        let mut tasks = self.tasks.lock();
        match tasks.get_mut(task_id) {
            Some(task) => {
                task.cancelled = true;
                task.status = TaskStatus::Cancelled;
                task.logs.push(CANCEL_MARKER.to_string());
                true
            }
            None => false,
        }
    }

    pub fn is_cancelled(&self, task_id: &str) -> bool {
        self.tasks
            .lock()
            .get(task_id)
            .map(|t| t.cancelled)
            .unwrap_or(false)
    }

    /// Finish a task. Idempotent: the first terminal status wins, and a
    /// cancellation is never overridden.
    pub fn complete(&self, task_id: &str, status: TaskStatus) {
        if let Some(task) = self.tasks.lock().get_mut(task_id) {
            if task.status == TaskStatus::Running {
                task.status = status;
            }
            task.completed = true;
        }
    }

    pub fn get(&self, task_id: &str) -> Option<TaskSnapshot> {
        self.tasks.lock().get(task_id).map(|t| TaskSnapshot {
            id: task_id.to_string(),
            status: t.status,
            completed: t.completed,
            cancelled: t.cancelled,
            is_bus_task: t.is_bus_task,
            logs: t.logs.clone(),
            device_statuses: t.device_statuses.clone(),
        })
    }

    /// Collect device-status overrides from every running task
    pub fn overrides(&self) -> StatusOverrides {
        let tasks = self.tasks.lock();
        let mut result = StatusOverrides::default();
        for task in tasks.values() {
            if task.status == TaskStatus::Running {
                result.task_running = true;
                if task.is_bus_task {
                    result.bus_task_running = true;
                }
                for (dev, mode) in &task.device_statuses {
                    result.statuses.insert(dev.clone(), *mode);
                }
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle_ends_in_exactly_one_terminal_status() {
        let store = TaskStore::new();
        let id = store.create();
        assert_eq!(store.get(&id).unwrap().status, TaskStatus::Running);

        store.complete(&id, TaskStatus::Failed);
        // A later default completion must not override the first terminal
        store.complete(&id, TaskStatus::Completed);

        let snap = store.get(&id).unwrap();
        assert_eq!(snap.status, TaskStatus::Failed);
        assert!(snap.completed);
    }

    #[test]
    fn cancel_wins_over_completion() {
        let store = TaskStore::new();
        let id = store.create();
        store.cancel(&id);
        assert!(store.is_cancelled(&id));
        store.complete(&id, TaskStatus::Completed);

        let snap = store.get(&id).unwrap();
        assert_eq!(snap.status, TaskStatus::Cancelled);
        assert!(snap.completed);
        assert_eq!(snap.logs.last().map(String::as_str), Some(CANCEL_MARKER));
    }

    #[test]
    fn overrides_only_come_from_running_tasks() {
        let store = TaskStore::new();
        let running = store.create_bus_task();
        let done = store.create();
        store.update_device_status(&running, "can_dev", DeviceMode::Flashing);
        store.update_device_status(&done, "other", DeviceMode::Failed);
        store.complete(&done, TaskStatus::Completed);

        let ov = store.overrides();
        assert!(ov.task_running);
        assert!(ov.bus_task_running);
        assert_eq!(ov.statuses.get("can_dev"), Some(&DeviceMode::Flashing));
        assert!(!ov.statuses.contains_key("other"));
    }

    #[test]
    fn task_ids_are_unique() {
        let store = TaskStore::new();
        let a = store.create();
        let b = store.create();
        assert_ne!(a, b);
    }
}
