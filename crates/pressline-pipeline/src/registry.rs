//! In-flight pipeline table used by status replies and shutdown.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use pressline_protocol::Transformation;
use serde::Serialize;
use uuid::Uuid;

/// One running pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskEntry {
    /// Identifier assigned when the request was accepted.
    pub task_id: Uuid,
    /// Client process identifier.
    pub sender: i32,
    /// Stage order.
    pub stages: Vec<Transformation>,
    /// Source file.
    pub input_path: PathBuf,
    /// Destination file.
    pub output_path: PathBuf,
    /// When execution started.
    pub started_at: DateTime<Utc>,
    /// Process identifiers of the stages spawned so far.
    pub pids: Vec<u32>,
}

impl TaskEntry {
    /// Single-line rendering used in status reports.
    #[must_use]
    pub fn describe(&self) -> String {
        let stages: Vec<&str> = self.stages.iter().map(|stage| stage.name()).collect();
        format!(
            "task {} (sender {}): proc-file {} {} {}",
            self.task_id,
            self.sender,
            self.input_path.display(),
            self.output_path.display(),
            stages.join(" ")
        )
    }
}

/// Registry of pipelines currently executing, keyed by task id.
#[derive(Debug, Default)]
pub struct TaskRegistry {
    tasks: Mutex<BTreeMap<Uuid, TaskEntry>>,
}

impl TaskRegistry {
    /// Empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<Uuid, TaskEntry>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add an entry; it stays until the returned handle is dropped.
    pub fn register(
        self: &Arc<Self>,
        task_id: Uuid,
        sender: i32,
        stages: &[Transformation],
        input_path: &Path,
        output_path: &Path,
    ) -> TaskHandle {
        let entry = TaskEntry {
            task_id,
            sender,
            stages: stages.to_vec(),
            input_path: input_path.to_path_buf(),
            output_path: output_path.to_path_buf(),
            started_at: Utc::now(),
            pids: Vec::new(),
        };
        self.lock().insert(task_id, entry);
        TaskHandle {
            registry: Arc::clone(self),
            task_id,
        }
    }

    /// Copy of every entry, oldest first.
    #[must_use]
    pub fn snapshot(&self) -> Vec<TaskEntry> {
        let mut entries: Vec<TaskEntry> = self.lock().values().cloned().collect();
        entries.sort_by_key(|entry| entry.started_at);
        entries
    }

    /// Number of pipelines in flight.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether no pipeline is in flight.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

/// Keeps a registry entry alive; removes it on drop.
#[derive(Debug)]
pub struct TaskHandle {
    registry: Arc<TaskRegistry>,
    task_id: Uuid,
}

impl TaskHandle {
    /// Identifier of the registered task.
    #[must_use]
    pub const fn task_id(&self) -> Uuid {
        self.task_id
    }

    /// Record the process id of a freshly spawned stage.
    pub fn record_pid(&self, pid: u32) {
        if let Some(entry) = self.registry.lock().get_mut(&self.task_id) {
            entry.pids.push(pid);
        }
    }
}

impl Drop for TaskHandle {
    fn drop(&mut self) {
        self.registry.lock().remove(&self.task_id);
    }
}
