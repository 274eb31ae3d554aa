//! Task store — background work started on the async dispatch path
//!
//! A task is created `running` and moved to `completed` or `failed` exactly
//! once by the unit that owns it. Finished tasks are kept for a TTL and the
//! store holds at most `capacity` of them; running tasks are never evicted.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::TaskConfig;
use crate::error::MeshError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Running,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Running)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub query: String,
    pub status: TaskStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
}

impl Task {
    fn is_expired(&self, now: DateTime<Utc>, ttl: chrono::Duration) -> bool {
        match self.ended_at {
            Some(ended) if self.status.is_terminal() => ended
                .checked_add_signed(ttl)
                .is_some_and(|deadline| deadline <= now),
            _ => false,
        }
    }
}

/// Cheap to clone; clones share the same records.
#[derive(Clone)]
pub struct TaskStore {
    tasks: Arc<Mutex<HashMap<String, Task>>>,
    ttl: chrono::Duration,
    capacity: usize,
}

impl TaskStore {
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            tasks: Arc::new(Mutex::new(HashMap::new())),
            ttl: chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX),
            capacity: capacity.max(1),
        }
    }

    pub fn from_config(config: &TaskConfig) -> Self {
        Self::new(Duration::from_secs(config.ttl_secs), config.capacity)
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Task>> {
        self.tasks.lock().unwrap_or_else(|poisoned| {
            warn!("Task store mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Record a new running task and return its id.
    pub fn register(&self, query: &str) -> String {
        let id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now();
        let mut tasks = self.lock();

        prune_expired(&mut tasks, now, self.ttl);
        while tasks.len() >= self.capacity {
            if !evict_oldest_finished(&mut tasks) {
                warn!(
                    "Task store holds {} running tasks (capacity {}), admitting another",
                    tasks.len(),
                    self.capacity
                );
                break;
            }
        }

        tasks.insert(
            id.clone(),
            Task {
                id: id.clone(),
                query: query.to_string(),
                status: TaskStatus::Running,
                result: None,
                error: None,
                started_at: now,
                ended_at: None,
            },
        );
        debug!("Registered task {}", id);
        id
    }

    /// Register a task and drive `work` to completion on a detached tokio task.
    ///
    /// Nothing is sent when the work finishes; callers poll with [`TaskStore::get`].
    /// A panic inside `work` fails the task.
    pub fn start<F>(&self, query: &str, work: F) -> String
    where
        F: Future<Output = Result<String, MeshError>> + Send + 'static,
    {
        let id = self.register(query);
        let store = self.clone();
        let task_id = id.clone();
        let worker = tokio::spawn(work);
        tokio::spawn(async move {
            match worker.await {
                Ok(Ok(result)) => {
                    store.complete(&task_id, result);
                }
                Ok(Err(e)) => {
                    store.fail(&task_id, e.to_string());
                }
                Err(e) if e.is_panic() => {
                    store.fail(&task_id, "Background task panicked".to_string());
                }
                Err(e) => {
                    store.fail(&task_id, format!("Background task aborted: {}", e));
                }
            }
        });
        id
    }

    /// Move a running task to `completed`. Returns false if it already left `running`.
    pub fn complete(&self, id: &str, result: String) -> bool {
        self.transition(id, TaskStatus::Completed, Some(result), None)
    }

    /// Move a running task to `failed`. Returns false if it already left `running`.
    pub fn fail(&self, id: &str, error: String) -> bool {
        self.transition(id, TaskStatus::Failed, None, Some(error))
    }

    fn transition(
        &self,
        id: &str,
        status: TaskStatus,
        result: Option<String>,
        error: Option<String>,
    ) -> bool {
        let mut tasks = self.lock();
        let Some(task) = tasks.get_mut(id) else {
            warn!("Task {} vanished before it finished", id);
            return false;
        };
        if task.status.is_terminal() {
            warn!("Task {} already {}, ignoring {}", id, task.status, status);
            return false;
        }

        task.status = status;
        task.result = result;
        task.error = error;
        task.ended_at = Some(Utc::now());
        match status {
            TaskStatus::Failed => warn!(
                "Task {} failed: {}",
                id,
                task.error.as_deref().unwrap_or_default()
            ),
            _ => info!("Task {} completed", id),
        }
        true
    }

    pub fn get(&self, id: &str) -> Option<Task> {
        let mut tasks = self.lock();
        prune_expired(&mut tasks, Utc::now(), self.ttl);
        tasks.get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn running_count(&self) -> usize {
        self.lock()
            .values()
            .filter(|t| t.status == TaskStatus::Running)
            .count()
    }
}

fn prune_expired(tasks: &mut HashMap<String, Task>, now: DateTime<Utc>, ttl: chrono::Duration) {
    let before = tasks.len();
    tasks.retain(|_, task| !task.is_expired(now, ttl));
    let pruned = before - tasks.len();
    if pruned > 0 {
        debug!("Pruned {} expired tasks", pruned);
    }
}

fn evict_oldest_finished(tasks: &mut HashMap<String, Task>) -> bool {
    let oldest = tasks
        .values()
        .filter(|t| t.status.is_terminal())
        .min_by_key(|t| t.ended_at)
        .map(|t| t.id.clone());

    match oldest {
        Some(id) => {
            debug!("Evicting task {} to stay within capacity", id);
            tasks.remove(&id);
            true
        }
        None => false,
    }
}
