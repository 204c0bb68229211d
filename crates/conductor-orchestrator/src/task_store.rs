use crate::types::{Task, TaskStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use uuid::Uuid;

/// Default number of suspended and of finished tasks retained.
pub const DEFAULT_RETENTION: usize = 1024;

/// What is kept about a task after its cycle completes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSummary {
    /// Task ID.
    pub id: Uuid,
    /// Original description.
    pub description: String,
    /// Whether the cycle ended in success.
    pub succeeded: bool,
    /// Every status the task passed through.
    pub history: Vec<TaskStatus>,
    /// When the cycle completed.
    pub finished_at: DateTime<Utc>,
}

/// In-memory store of suspended and finished tasks.
///
/// Both sides are bounded: past the retention limit the oldest entry is
/// dropped, so a long-running session does not grow without bound.
pub struct TaskStore {
    suspended: HashMap<Uuid, Task>,
    suspended_order: VecDeque<Uuid>,
    finished: HashMap<Uuid, TaskSummary>,
    finished_order: VecDeque<Uuid>,
    retention: usize,
}

impl TaskStore {
    /// Create a store with [`DEFAULT_RETENTION`].
    pub fn new() -> Self {
        Self::with_retention(DEFAULT_RETENTION)
    }

    /// Create a store keeping at most `retention` suspended and `retention`
    /// finished tasks (minimum 1).
    pub fn with_retention(retention: usize) -> Self {
        Self {
            suspended: HashMap::new(),
            suspended_order: VecDeque::new(),
            finished: HashMap::new(),
            finished_order: VecDeque::new(),
            retention: retention.max(1),
        }
    }

    /// Park a task awaiting clarification answers.
    pub fn suspend(&mut self, task: Task) -> Uuid {
        let id = task.id;
        if self.suspended.insert(id, task).is_none() {
            self.suspended_order.push_back(id);
        }
        while self.suspended_order.len() > self.retention {
            if let Some(oldest) = self.suspended_order.pop_front() {
                self.suspended.remove(&oldest);
                tracing::warn!(task_id = %oldest, "Dropped suspended task past retention limit");
            }
        }
        id
    }

    /// Take a suspended task back out for resumption.
    pub fn take_suspended(&mut self, id: Uuid) -> Option<Task> {
        let task = self.suspended.remove(&id)?;
        self.suspended_order.retain(|t| *t != id);
        Some(task)
    }

    /// Get a suspended task by ID.
    pub fn suspended(&self, id: Uuid) -> Option<&Task> {
        self.suspended.get(&id)
    }

    /// Record a task whose cycle completed.
    pub fn mark_finished(&mut self, task: &Task, succeeded: bool) {
        let summary = TaskSummary {
            id: task.id,
            description: task.description.clone(),
            succeeded,
            history: task.history.clone(),
            finished_at: Utc::now(),
        };
        if self.finished.insert(task.id, summary).is_none() {
            self.finished_order.push_back(task.id);
        }
        while self.finished_order.len() > self.retention {
            if let Some(oldest) = self.finished_order.pop_front() {
                self.finished.remove(&oldest);
            }
        }
    }

    /// Get a finished task summary by ID.
    pub fn finished(&self, id: Uuid) -> Option<&TaskSummary> {
        self.finished.get(&id)
    }

    /// All suspended tasks, oldest first.
    pub fn all_suspended(&self) -> Vec<&Task> {
        let mut tasks: Vec<&Task> = self.suspended.values().collect();
        tasks.sort_by_key(|t| t.created_at);
        tasks
    }

    /// Count of tasks awaiting clarification.
    pub fn suspended_count(&self) -> usize {
        self.suspended.len()
    }

    /// Count of finished tasks.
    pub fn finished_count(&self) -> usize {
        self.finished.len()
    }

    /// Count of finished tasks that failed.
    pub fn failed_count(&self) -> usize {
        self.finished.values().filter(|t| !t.succeeded).count()
    }
}

impl Default for TaskStore {
    fn default() -> Self {
        Self::new()
    }
}
