//! Durable task queue with skip-contended claims
//!
//! Claiming walks the agent's pending-task index, which is kept in priority
//! order, and tries each row lock without waiting. A row held by another claimer is skipped,
//! the row is re-read under its lock and only then moved to `in_progress`,
//! so two concurrent callers can never receive the same task.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::audit::AuditLog;
use crate::state::schema::keys;
use crate::state::{
    Actor, AgentKind, AuditEntry, NewTask, SharedStateStore, StoreError, Task, TaskId, TaskKind,
    TaskStatus,
};

/// Error type for task queue operations
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Task not found: {0}")]
    NotFound(TaskId),

    #[error("Task {task_id} cannot move from {from} to {to}")]
    InvalidTransition {
        task_id: TaskId,
        from: TaskStatus,
        to: TaskStatus,
    },

    #[error("Claim on task {0} is no longer current")]
    StaleClaim(TaskId),
}

/// Finished tasks deleted per store batch when pruning
const PRUNE_BATCH: usize = 500;

/// Result type for task queue operations
pub type QueueResult<T> = Result<T, QueueError>;

/// Shared reference to TaskQueue
pub type SharedTaskQueue = Arc<TaskQueue>;

/// Queue configuration
#[derive(Debug, Clone, PartialEq)]
pub struct QueueConfig {
    /// Retries granted to tasks that do not set their own
    pub default_max_retries: u32,
    /// Base delay before a retried task is claimable again, doubled per
    /// retry. `None` makes retries claimable immediately.
    pub retry_backoff: Option<Duration>,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            default_max_retries: 3,
            retry_backoff: None,
        }
    }
}

/// Result of an enqueue that may have been deduplicated
#[derive(Debug, Clone, PartialEq)]
pub enum Enqueued {
    Created(Task),
    Existing(Task),
}

impl Enqueued {
    pub fn task(&self) -> &Task {
        match self {
            Enqueued::Created(t) | Enqueued::Existing(t) => t,
        }
    }

    pub fn into_task(self) -> Task {
        match self {
            Enqueued::Created(t) | Enqueued::Existing(t) => t,
        }
    }

    pub fn is_created(&self) -> bool {
        matches!(self, Enqueued::Created(_))
    }
}

/// Filter for [`TaskQueue::list`]
#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    pub tenant_id: Option<String>,
    pub agent: Option<AgentKind>,
    pub status: Option<TaskStatus>,
}

impl TaskFilter {
    fn matches(&self, task: &Task) -> bool {
        self.tenant_id.as_ref().map_or(true, |t| &task.tenant_id == t)
            && self.agent.map_or(true, |a| task.agent == a)
            && self.status.map_or(true, |s| task.status == s)
    }
}

/// Task counts by status
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub pending: usize,
    pub in_progress: usize,
    pub completed: usize,
    pub failed: usize,
}

impl QueueStats {
    pub fn total(&self) -> usize {
        self.pending + self.in_progress + self.completed + self.failed
    }
}

/// Durable, concurrently claimable task queue
pub struct TaskQueue {
    store: SharedStateStore,
    audit: AuditLog,
    config: QueueConfig,
    /// Serializes dedup lookups with task creation
    enqueue_guard: Mutex<()>,
}

impl TaskQueue {
    pub fn new(store: SharedStateStore) -> Self {
        Self::with_config(store, QueueConfig::default())
    }

    pub fn with_config(store: SharedStateStore, config: QueueConfig) -> Self {
        Self {
            audit: AuditLog::new(Arc::clone(&store)),
            store,
            config,
            enqueue_guard: Mutex::new(()),
        }
    }

    /// Create a shared reference to this queue
    pub fn shared(self) -> SharedTaskQueue {
        Arc::new(self)
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Create a pending task
    pub fn enqueue(&self, new: NewTask) -> QueueResult<Task> {
        let task = self.build_task(new)?;
        self.store.put_task(&task)?;
        info!(
            task_id = %task.id,
            tenant_id = %task.tenant_id,
            agent = %task.agent,
            kind = %task.kind,
            priority = task.priority,
            "Task enqueued"
        );
        Ok(task)
    }

    /// Create a task unless one with the same dedup key exists
    ///
    /// Redelivered events call this again for the same document; they get
    /// the original task back instead of a duplicate.
    pub fn enqueue_unique(&self, new: NewTask) -> QueueResult<Enqueued> {
        let Some(dedup_key) = new.dedup_key.clone() else {
            return Ok(Enqueued::Created(self.enqueue(new)?));
        };

        let _guard = self
            .enqueue_guard
            .lock()
            .map_err(|_| StoreError::LockPoisoned)?;

        if let Some(existing_id) = self.store.get_task_dedup(&dedup_key)? {
            if let Some(existing) = self.store.get_task(&existing_id)? {
                debug!(task_id = %existing.id, dedup_key = %dedup_key, "Task already enqueued");
                return Ok(Enqueued::Existing(existing));
            }
        }

        let task = self.build_task(new)?;
        self.store.put_task(&task)?;
        self.store.reserve_task_dedup(&dedup_key, &task.id)?;
        info!(
            task_id = %task.id,
            tenant_id = %task.tenant_id,
            kind = %task.kind,
            dedup_key = %dedup_key,
            "Task enqueued"
        );
        Ok(Enqueued::Created(task))
    }

    fn build_task(&self, new: NewTask) -> QueueResult<Task> {
        Ok(Task {
            id: uuid::Uuid::new_v4().to_string(),
            tenant_id: new.tenant_id,
            agent: new.agent,
            kind: new.kind,
            payload: new.payload,
            priority: new.priority,
            status: TaskStatus::Pending,
            retry_count: 0,
            max_retries: new.max_retries.unwrap_or(self.config.default_max_retries),
            sequence: self.store.next_sequence()?,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            available_at: None,
            claim_token: None,
            dedup_key: new.dedup_key,
            error_message: None,
            result: None,
        })
    }

    /// Claim the highest-priority, oldest pending task for `agent`
    ///
    /// Never waits on a task another caller is claiming; it moves on to the
    /// next candidate instead.
    pub fn claim_next(
        &self,
        agent: AgentKind,
        kind: Option<TaskKind>,
    ) -> QueueResult<Option<Task>> {
        let now = Utc::now();

        for candidate in self.store.pending_task_ids(agent)? {
            let Some(_row) = self.store.locks().try_acquire(&keys::task(&candidate))? else {
                debug!(task_id = %candidate, "Skipping contended task");
                continue;
            };

            // The index may be stale; only the locked re-read counts
            let Some(mut task) = self.store.get_task(&candidate)? else {
                continue;
            };
            if !task.is_claimable(now) || kind.map_or(false, |k| task.kind != k) {
                continue;
            }

            task.status = TaskStatus::InProgress;
            task.started_at = Some(now);
            task.claim_token = Some(uuid::Uuid::new_v4().to_string());
            self.store.put_task(&task)?;

            info!(
                task_id = %task.id,
                tenant_id = %task.tenant_id,
                agent = %agent,
                attempt = task.retry_count + 1,
                "Task claimed"
            );
            return Ok(Some(task));
        }
        Ok(None)
    }

    /// Mark a task completed; completing a completed task is a no-op
    pub fn complete(&self, task_id: &str, result: serde_json::Value) -> QueueResult<Task> {
        self.complete_inner(task_id, None, result)
    }

    /// Complete a task on behalf of the claim that produced `claimed`
    pub fn complete_claimed(&self, claimed: &Task, result: serde_json::Value) -> QueueResult<Task> {
        self.complete_inner(&claimed.id, claimed.claim_token.as_deref(), result)
    }

    fn complete_inner(
        &self,
        task_id: &str,
        claim_token: Option<&str>,
        result: serde_json::Value,
    ) -> QueueResult<Task> {
        let _row = self.store.locks().acquire(&keys::task(task_id))?;
        let mut task = self.load(task_id)?;

        if task.status == TaskStatus::Completed {
            if claim_token.is_some() && task.claim_token.as_deref() != claim_token {
                return Err(QueueError::StaleClaim(task.id));
            }
            debug!(task_id, "Task already completed");
            return Ok(task);
        }
        Self::check_claim(&task, claim_token)?;
        Self::check_transition(&task, TaskStatus::Completed)?;

        task.status = TaskStatus::Completed;
        task.completed_at = Some(Utc::now());
        task.result = Some(result);
        self.store.put_task(&task)?;

        info!(task_id, tenant_id = %task.tenant_id, "Task completed");
        Ok(task)
    }

    /// Record a failure
    ///
    /// With `retry` and retries left the task goes back to pending with
    /// `retry_count` incremented; otherwise it fails for good. `retry=false`
    /// never returns a task to pending.
    pub fn fail(&self, task_id: &str, error: &str, retry: bool) -> QueueResult<Task> {
        self.fail_inner(task_id, None, error, retry)
    }

    /// Fail a task on behalf of the claim that produced `claimed`
    pub fn fail_claimed(&self, claimed: &Task, error: &str, retry: bool) -> QueueResult<Task> {
        self.fail_inner(&claimed.id, claimed.claim_token.as_deref(), error, retry)
    }

    fn fail_inner(
        &self,
        task_id: &str,
        claim_token: Option<&str>,
        error: &str,
        retry: bool,
    ) -> QueueResult<Task> {
        let _row = self.store.locks().acquire(&keys::task(task_id))?;
        let task = self.load(task_id)?;
        if task.status == TaskStatus::Failed && claim_token.is_none() {
            debug!(task_id, "Task already failed");
            return Ok(task);
        }
        Self::check_claim(&task, claim_token)?;
        self.apply_failure(task, error, retry)
    }

    /// Fail a locked, in-progress task
    fn apply_failure(&self, mut task: Task, error: &str, retry: bool) -> QueueResult<Task> {
        let now = Utc::now();
        let retrying = retry && task.retry_count < task.max_retries;
        let to = if retrying {
            TaskStatus::Pending
        } else {
            TaskStatus::Failed
        };
        Self::check_transition(&task, to)?;
        let before = task.status;

        task.status = to;
        task.error_message = Some(error.to_string());
        task.claim_token = None;
        if retrying {
            task.retry_count += 1;
            task.started_at = None;
            task.available_at = self.retry_at(task.retry_count, now);
        } else {
            task.completed_at = Some(now);
        }
        self.store.put_task(&task)?;

        if retrying {
            warn!(
                task_id = %task.id,
                retry_count = task.retry_count,
                max_retries = task.max_retries,
                error,
                "Task failed, will retry"
            );
        } else {
            warn!(task_id = %task.id, retry_count = task.retry_count, error, "Task failed permanently");
            self.audit.record(
                AuditEntry::new(&task.tenant_id, "task", &task.id, "task_failed", &Actor::system())
                    .with_before(serde_json::json!({ "status": before }))
                    .with_after(serde_json::json!({
                        "status": task.status,
                        "retry_count": task.retry_count,
                        "error": error,
                    })),
            )?;
        }
        Ok(task)
    }

    fn retry_at(&self, retry_count: u32, now: chrono::DateTime<Utc>) -> Option<chrono::DateTime<Utc>> {
        let base = self.config.retry_backoff?;
        let delay = base.saturating_mul(1u32 << retry_count.saturating_sub(1).min(16));
        chrono::Duration::from_std(delay).ok().map(|d| now + d)
    }

    /// Return tasks whose claim is older than `max_age` to the queue
    ///
    /// Covers workers that died mid-task. Each recovery counts as a retry,
    /// so a task that keeps crashing its worker eventually fails for good.
    pub fn recover_stale(&self, max_age: Duration) -> QueueResult<Vec<Task>> {
        let Ok(max_age) = chrono::Duration::from_std(max_age) else {
            return Ok(Vec::new());
        };
        let cutoff = Utc::now() - max_age;
        let is_stale = |t: &Task| {
            t.status == TaskStatus::InProgress && t.started_at.map_or(true, |s| s <= cutoff)
        };

        let mut recovered = Vec::new();
        for candidate in self.store.active_task_ids()? {
            let Some(_row) = self.store.locks().try_acquire(&keys::task(&candidate))? else {
                continue;
            };
            let Some(task) = self.store.get_task(&candidate)? else {
                continue;
            };
            if !is_stale(&task) {
                continue;
            }
            info!(task_id = %task.id, "Recovering expired claim");
            recovered.push(self.apply_failure(task, "claim expired", true)?);
        }
        Ok(recovered)
    }

    /// Delete completed and failed tasks that finished before `cutoff`
    ///
    /// Their audit entries stay. A pruned task's dedup key is released, so
    /// an event redelivered after retention creates a fresh task.
    pub fn prune_finished_before(&self, cutoff: DateTime<Utc>) -> QueueResult<usize> {
        let mut pruned = 0;
        loop {
            let mut expired = Vec::new();
            let mut reached_cutoff = false;
            for id in self.store.finished_task_ids(PRUNE_BATCH)? {
                match self.store.get_task(&id)? {
                    Some(task) if task.completed_at.map_or(false, |at| at >= cutoff) => {
                        reached_cutoff = true;
                        break;
                    }
                    Some(task) => expired.push(task),
                    None => {}
                }
            }
            if expired.is_empty() {
                break;
            }
            self.store.delete_tasks(&expired)?;
            pruned += expired.len();
            if reached_cutoff || expired.len() < PRUNE_BATCH {
                break;
            }
        }
        if pruned > 0 {
            info!(count = pruned, %cutoff, "Pruned finished tasks");
        }
        Ok(pruned)
    }

    pub fn get(&self, task_id: &str) -> QueueResult<Option<Task>> {
        Ok(self.store.get_task(task_id)?)
    }

    /// Tasks matching `filter`, oldest first
    pub fn list(&self, filter: &TaskFilter) -> QueueResult<Vec<Task>> {
        let mut tasks: Vec<Task> = self
            .store
            .list_tasks()?
            .into_iter()
            .filter(|t| filter.matches(t))
            .collect();
        tasks.sort_by_key(|t| t.sequence);
        Ok(tasks)
    }

    pub fn stats(&self) -> QueueResult<QueueStats> {
        let mut stats = QueueStats::default();
        for task in self.store.list_tasks()? {
            match task.status {
                TaskStatus::Pending => stats.pending += 1,
                TaskStatus::InProgress => stats.in_progress += 1,
                TaskStatus::Completed => stats.completed += 1,
                TaskStatus::Failed => stats.failed += 1,
            }
        }
        Ok(stats)
    }

    fn load(&self, task_id: &str) -> QueueResult<Task> {
        self.store
            .get_task(task_id)?
            .ok_or_else(|| QueueError::NotFound(task_id.to_string()))
    }

    fn check_claim(task: &Task, claim_token: Option<&str>) -> QueueResult<()> {
        match claim_token {
            Some(token) if task.claim_token.as_deref() != Some(token) => {
                Err(QueueError::StaleClaim(task.id.clone()))
            }
            _ => Ok(()),
        }
    }

    fn check_transition(task: &Task, to: TaskStatus) -> QueueResult<()> {
        if task.status.can_transition_to(to) {
            Ok(())
        } else {
            Err(QueueError::InvalidTransition {
                task_id: task.id.clone(),
                from: task.status,
                to,
            })
        }
    }
}
