//! In-memory task table with guarded transitions and retention-based expiry.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::types::{EvaluationTask, TaskError, TaskResult, TaskStatus};

/// Holds every live task. Terminal tasks are dropped once the retention
/// window has passed, either when looked up or by [`TaskStore::sweep`].
pub struct TaskStore {
    tasks: RwLock<HashMap<Uuid, EvaluationTask>>,
    retention: Duration,
}

fn is_expired(task: &EvaluationTask, now: DateTime<Utc>, retention: Duration) -> bool {
    match task.completed_at {
        Some(done) => (now - done).to_std().map_or(false, |age| age >= retention),
        None => false,
    }
}

impl TaskStore {
    pub fn new(retention: Duration) -> Self {
        Self {
            tasks: RwLock::new(HashMap::new()),
            retention,
        }
    }

    pub async fn insert(&self, task: EvaluationTask) {
        self.tasks.write().await.insert(task.id, task);
    }

    pub async fn remove(&self, id: Uuid) -> Option<EvaluationTask> {
        self.tasks.write().await.remove(&id)
    }

    /// Look up a task. An expired task is removed and reported as absent.
    pub async fn get(&self, id: Uuid) -> Option<EvaluationTask> {
        {
            let tasks = self.tasks.read().await;
            let task = tasks.get(&id)?;
            if !is_expired(task, Utc::now(), self.retention) {
                return Some(task.clone());
            }
        }

        let mut tasks = self.tasks.write().await;
        if tasks
            .get(&id)
            .is_some_and(|t| is_expired(t, Utc::now(), self.retention))
        {
            tasks.remove(&id);
            tracing::debug!("Expired evaluation {} on access", id);
        }
        None
    }

    /// PENDING -> RUNNING. Returns false if the task is gone or not pending.
    pub async fn mark_running(&self, id: Uuid) -> bool {
        let mut tasks = self.tasks.write().await;
        match tasks.get_mut(&id) {
            Some(task) if task.status == TaskStatus::Pending => {
                task.status = TaskStatus::Running;
                true
            }
            Some(task) => {
                tracing::warn!(
                    "Refusing to start evaluation {} in state {}",
                    id,
                    task.status
                );
                false
            }
            None => false,
        }
    }

    /// RUNNING -> COMPLETED.
    pub async fn complete(&self, id: Uuid, result: TaskResult) -> bool {
        self.finish(id, TaskStatus::Completed, Some(result), None)
            .await
    }

    /// RUNNING -> FAILED.
    pub async fn fail(&self, id: Uuid, error: TaskError) -> bool {
        self.finish(id, TaskStatus::Failed, None, Some(error)).await
    }

    async fn finish(
        &self,
        id: Uuid,
        status: TaskStatus,
        result: Option<TaskResult>,
        error: Option<TaskError>,
    ) -> bool {
        let mut tasks = self.tasks.write().await;
        let Some(task) = tasks.get_mut(&id) else {
            return false;
        };
        if task.status != TaskStatus::Running {
            tracing::warn!(
                "Refusing to move evaluation {} from {} to {}",
                id,
                task.status,
                status
            );
            return false;
        }
        task.status = status;
        task.completed_at = Some(Utc::now());
        task.result = result;
        task.error = error;
        true
    }

    /// Drop every expired task. Returns how many were removed.
    pub async fn sweep(&self) -> usize {
        let now = Utc::now();
        let mut tasks = self.tasks.write().await;
        let before = tasks.len();
        tasks.retain(|_, task| !is_expired(task, now, self.retention));
        before - tasks.len()
    }

    pub async fn len(&self) -> usize {
        self.tasks.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.tasks.read().await.is_empty()
    }
}
