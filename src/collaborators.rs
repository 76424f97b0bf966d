//! External collaborator contracts the core consumes but does not
//! implement: task storage, rollback snapshots, notifications, and
//! credential scanning.
//!
//! Modeled as plain traits per the programmatic-only surface: the real
//! CLI/process wiring these to disk, SMTP, etc. is out of scope here.
//! In-memory implementations are provided for tests and for exercising
//! the orchestrator loop end to end.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::domain::{Complexity, Task, TaskStatus};

/// Storage for task records: enumerate pending work, read content, and
/// apply optimistic-versioned status transitions.
pub trait TaskStore: Send + Sync {
    fn list_pending(&self) -> Vec<Task>;
    fn read(&self, task_id: &str) -> Option<(String, HashMap<String, String>)>;
    fn update_status(&self, task_id: &str, status: TaskStatus, expected_version: u64) -> bool;
    /// Persist the classifier/risk-scorer's output (`complexity`, `sla_risk`)
    /// against the stored task, gated on `expected_version` like
    /// `update_status`. Without this, classification state produced by
    /// `plan_unclassified_tasks` would live only on the caller's local
    /// clone and be lost between ticks.
    fn update_classification(&self, task_id: &str, complexity: Complexity, sla_risk: f64, expected_version: u64) -> bool;
}

/// A rollback snapshot handle, opaque to the core.
pub type RollbackHandle = String;

/// Snapshot/restore for rollback on unrecoverable failure.
pub trait RollbackSystem: Send + Sync {
    fn snapshot(&self, task_id: &str) -> Option<RollbackHandle>;
    fn restore(&self, handle: &RollbackHandle, task_id: &str) -> bool;
    fn purge_expired(&self) -> usize;
}

/// A fire-and-forget event the notifier relays; never raises.
#[derive(Debug, Clone)]
pub struct NotificationEvent {
    pub task_id: String,
    pub message: String,
}

/// Fire-and-forget dispatch: never raises, reports delivery success as a
/// plain boolean rather than an error the caller would need to handle.
pub trait Notifier: Send + Sync {
    fn send(&self, event: &NotificationEvent) -> bool;
}

/// One credential-scan finding.
#[derive(Debug, Clone)]
pub struct CredentialFinding {
    pub path: String,
    pub reason: String,
}

pub trait CredentialScanner: Send + Sync {
    fn scan(&self, root: &str) -> Vec<CredentialFinding>;
}

/// In-memory task store keyed by task id, guarded by a single mutex.
/// Sufficient for tests and for driving the orchestrator loop without a
/// real vault.
#[derive(Default)]
pub struct InMemoryTaskStore {
    tasks: Mutex<HashMap<String, (Task, String, HashMap<String, String>)>>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, task: Task, content: impl Into<String>, metadata: HashMap<String, String>) {
        let mut tasks = self.tasks.lock().unwrap_or_else(|p| p.into_inner());
        tasks.insert(task.task_id.clone(), (task, content.into(), metadata));
    }
}

impl TaskStore for InMemoryTaskStore {
    fn list_pending(&self) -> Vec<Task> {
        self.tasks
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .values()
            .map(|(t, ..)| t.clone())
            .filter(|t| t.status == TaskStatus::Pending)
            .collect()
    }

    fn read(&self, task_id: &str) -> Option<(String, HashMap<String, String>)> {
        self.tasks
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .get(task_id)
            .map(|(_, content, meta)| (content.clone(), meta.clone()))
    }

    fn update_status(&self, task_id: &str, status: TaskStatus, expected_version: u64) -> bool {
        let mut tasks = self.tasks.lock().unwrap_or_else(|p| p.into_inner());
        let Some((task, ..)) = tasks.get_mut(task_id) else { return false };
        if task.version != expected_version {
            return false;
        }
        task.transition(status);
        true
    }

    fn update_classification(&self, task_id: &str, complexity: Complexity, sla_risk: f64, expected_version: u64) -> bool {
        let mut tasks = self.tasks.lock().unwrap_or_else(|p| p.into_inner());
        let Some((task, ..)) = tasks.get_mut(task_id) else { return false };
        if task.version != expected_version {
            return false;
        }
        task.complexity = complexity;
        task.sla_risk = sla_risk;
        task.version += 1;
        true
    }
}

/// No-op rollback system: every snapshot "succeeds" with a fresh handle,
/// restore always reports success, nothing is actually persisted.
#[derive(Default)]
pub struct NoopRollbackSystem;

impl RollbackSystem for NoopRollbackSystem {
    fn snapshot(&self, task_id: &str) -> Option<RollbackHandle> {
        Some(format!("snapshot:{task_id}"))
    }

    fn restore(&self, _handle: &RollbackHandle, _task_id: &str) -> bool {
        true
    }

    fn purge_expired(&self) -> usize {
        0
    }
}

/// Notifier that records events in memory rather than sending them
/// anywhere; useful for asserting on notification behavior in tests.
#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<NotificationEvent>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<NotificationEvent> {
        self.sent.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }
}

impl Notifier for RecordingNotifier {
    fn send(&self, event: &NotificationEvent) -> bool {
        self.sent.lock().unwrap_or_else(|p| p.into_inner()).push(event.clone());
        true
    }
}

/// Credential scanner that always reports no findings.
#[derive(Default)]
pub struct NoopCredentialScanner;

impl CredentialScanner for NoopCredentialScanner {
    fn scan(&self, _root: &str) -> Vec<CredentialFinding> {
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_memory_store_round_trips_and_lists_pending() {
        let store = InMemoryTaskStore::new();
        let task = Task::new("t1", crate::domain::TaskType::Document);
        store.insert(task.clone(), "hello", HashMap::new());

        let pending = store.list_pending();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].task_id, "t1");

        let (content, _) = store.read("t1").unwrap();
        assert_eq!(content, "hello");
    }

    #[test]
    fn update_status_requires_matching_version() {
        let store = InMemoryTaskStore::new();
        let task = Task::new("t1", crate::domain::TaskType::Document);
        let version = task.version;
        store.insert(task, "x", HashMap::new());

        assert!(!store.update_status("t1", TaskStatus::Done, version + 1));
        assert!(store.update_status("t1", TaskStatus::Done, version));
        assert!(store.list_pending().is_empty());
    }

    #[test]
    fn recording_notifier_captures_sent_events() {
        let notifier = RecordingNotifier::new();
        notifier.send(&NotificationEvent {
            task_id: "t1".to_string(),
            message: "done".to_string(),
        });
        assert_eq!(notifier.sent().len(), 1);
    }
}
