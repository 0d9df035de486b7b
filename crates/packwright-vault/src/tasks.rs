//! Cancellable long-running operations.
//!
//! Recursive deletes, folder copies, and bulk emptying can take a while
//! on large subtrees. The [`TaskDispatcher`] tracks each such operation
//! as a [`TaskRecord`] with a lifecycle of pending → running → one of
//! success / error / cancelled, and hands the operation a
//! [`CancellationToken`] it is expected to poll between steps.
//!
//! Cancellation is cooperative: [`TaskDispatcher::cancel`] only trips
//! the token. The operation itself notices at its next checkpoint,
//! unwinds, and the terminal status is settled from its result — so a
//! cancel that arrives after the last checkpoint still ends in success.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use strum::Display;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::{VaultError, VaultResult};

/// Lifecycle state of a tracked operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Running,
    Success,
    Error,
    Cancelled,
}

impl TaskStatus {
    /// True once the task can no longer change state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Error | Self::Cancelled)
    }
}

/// Snapshot of a tracked operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRecord {
    pub id: Uuid,
    /// Human-readable label, e.g. `delete character/alice`.
    pub name: String,
    pub status: TaskStatus,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    /// Outcome note: error text for failures, `done` for successes.
    pub message: Option<String>,
}

struct TaskEntry {
    record: TaskRecord,
    /// Present while the task is live; dropped when it settles.
    token: Option<CancellationToken>,
}

/// Registry of live and settled tasks.
#[derive(Default)]
pub struct TaskDispatcher {
    tasks: RwLock<HashMap<Uuid, TaskEntry>>,
}

impl TaskDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run an operation under task tracking.
    ///
    /// The operation receives a fresh [`CancellationToken`] and is
    /// awaited to completion; no lock is held while it runs. Its result
    /// settles the record and is returned unchanged, so callers see the
    /// same error the record captured.
    pub async fn dispatch<F, Fut, T>(&self, name: impl Into<String>, op: F) -> VaultResult<T>
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = VaultResult<T>>,
    {
        let id = Uuid::new_v4();
        let token = CancellationToken::new();
        let record = TaskRecord {
            id,
            name: name.into(),
            status: TaskStatus::Pending,
            started_at: Utc::now(),
            ended_at: None,
            message: None,
        };

        {
            let mut tasks = self.tasks.write();
            tasks.insert(
                id,
                TaskEntry {
                    record,
                    token: Some(token.clone()),
                },
            );
        }

        self.set_status(id, TaskStatus::Running, None);
        tracing::debug!(task = %id, "task started");

        let result = op(token).await;

        match &result {
            Ok(_) => self.settle(id, TaskStatus::Success, Some("done".to_string())),
            Err(VaultError::Cancelled) => {
                tracing::debug!(task = %id, "task cancelled");
                self.settle(id, TaskStatus::Cancelled, None);
            }
            Err(e) => {
                tracing::warn!(task = %id, error = %e, "task failed");
                self.settle(id, TaskStatus::Error, Some(e.to_string()));
            }
        }

        result
    }

    /// Trip a live task's cancellation token.
    ///
    /// Returns false for unknown or already-settled tasks. The record's
    /// status is not touched here; the running operation settles it when
    /// it unwinds.
    pub fn cancel(&self, id: Uuid) -> bool {
        let tasks = self.tasks.read();
        match tasks.get(&id).and_then(|e| e.token.as_ref()) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Snapshot of a single task.
    pub fn get(&self, id: Uuid) -> Option<TaskRecord> {
        self.tasks.read().get(&id).map(|e| e.record.clone())
    }

    /// Snapshot of every tracked task, oldest first.
    pub fn list(&self) -> Vec<TaskRecord> {
        let mut records: Vec<TaskRecord> = self
            .tasks
            .read()
            .values()
            .map(|e| e.record.clone())
            .collect();
        records.sort_by_key(|r| r.started_at);
        records
    }

    /// Forget a settled task. Live tasks are kept; returns whether a
    /// record was removed.
    pub fn remove(&self, id: Uuid) -> bool {
        let mut tasks = self.tasks.write();
        match tasks.get(&id) {
            Some(entry) if entry.record.status.is_terminal() => {
                tasks.remove(&id);
                true
            }
            _ => false,
        }
    }

    /// Forget every settled task. Returns how many were removed.
    pub fn clear_finished(&self) -> usize {
        let mut tasks = self.tasks.write();
        let before = tasks.len();
        tasks.retain(|_, e| !e.record.status.is_terminal());
        before - tasks.len()
    }

    fn set_status(&self, id: Uuid, status: TaskStatus, message: Option<String>) {
        let mut tasks = self.tasks.write();
        if let Some(entry) = tasks.get_mut(&id) {
            entry.record.status = status;
            if message.is_some() {
                entry.record.message = message;
            }
        }
    }

    fn settle(&self, id: Uuid, status: TaskStatus, message: Option<String>) {
        let mut tasks = self.tasks.write();
        if let Some(entry) = tasks.get_mut(&id) {
            entry.record.status = status;
            entry.record.ended_at = Some(Utc::now());
            entry.record.message = message;
            entry.token = None;
        }
    }
}

impl std::fmt::Debug for TaskDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskDispatcher")
            .field("tasks", &self.tasks.read().len())
            .finish()
    }
}
