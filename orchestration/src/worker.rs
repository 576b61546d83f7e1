//! Worker poll loop
//!
//! A worker claims a task, runs its automation under a timeout and reports
//! the outcome back to the queue. Automation errors never escape the worker:
//! they become retries or terminal failures according to their
//! classification, and a terminal failure is announced with a `task_failed`
//! event so the document reaches a human.

use std::time::Duration;

use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::automation::{AutomationError, SharedAutomation};
use crate::config::WorkerSettings;
use crate::decision::AutomationOutput;
use crate::events::{EventLogError, EventType, SharedEventLog};
use crate::orchestrator::analyzed_event_for;
use crate::queue::{QueueError, SharedTaskQueue};
use crate::state::{AgentKind, Task, TaskId, TaskKind, TaskStatus};

/// Error type for worker operations
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Event log error: {0}")]
    Events(#[from] EventLogError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for worker operations
pub type WorkerResult<T> = Result<T, WorkerError>;

/// Worker configuration
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub agent: AgentKind,
    /// Restrict claims to one task kind
    pub task_kind: Option<TaskKind>,
    pub poll_interval: Duration,
    pub automation_timeout: Duration,
    /// Claims older than this are returned to the queue while idle
    pub stale_claim_after: Duration,
}

impl WorkerConfig {
    pub fn new(agent: AgentKind) -> Self {
        Self::from_settings(agent, &WorkerSettings::default())
    }

    pub fn from_settings(agent: AgentKind, settings: &WorkerSettings) -> Self {
        Self {
            agent,
            task_kind: None,
            poll_interval: Duration::from_millis(settings.poll_interval_ms),
            automation_timeout: Duration::from_millis(settings.automation_timeout_ms),
            stale_claim_after: Duration::from_secs(settings.stale_claim_secs),
        }
    }

    pub fn with_task_kind(mut self, kind: TaskKind) -> Self {
        self.task_kind = Some(kind);
        self
    }

    pub fn with_automation_timeout(mut self, timeout: Duration) -> Self {
        self.automation_timeout = timeout;
        self
    }
}

/// Result of one claim-execute-report cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkOutcome {
    /// Nothing to claim
    Idle,
    Completed(TaskId),
    /// Failed transiently; the task is pending again
    Retrying(TaskId),
    /// Failed for good
    Failed(TaskId),
    /// The claim expired while the automation ran; another worker owns it
    Superseded(TaskId),
}

/// Claims and executes tasks for one automation
pub struct Worker {
    id: String,
    queue: SharedTaskQueue,
    events: SharedEventLog,
    automation: SharedAutomation,
    config: WorkerConfig,
}

impl Worker {
    pub fn new(
        id: impl Into<String>,
        queue: SharedTaskQueue,
        events: SharedEventLog,
        automation: SharedAutomation,
        config: WorkerConfig,
    ) -> Self {
        Self {
            id: id.into(),
            queue,
            events,
            automation,
            config,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Claim and execute at most one task
    pub async fn run_once(&self) -> WorkerResult<WorkOutcome> {
        let Some(task) = self
            .queue
            .claim_next(self.config.agent, self.config.task_kind)?
        else {
            return Ok(WorkOutcome::Idle);
        };

        debug!(worker = %self.id, task_id = %task.id, automation = self.automation.name(), "Executing task");
        let result = match tokio::time::timeout(
            self.config.automation_timeout,
            self.automation.run(&task),
        )
        .await
        {
            Ok(result) => result.and_then(|output| check_output(&task, output)),
            Err(_) => Err(AutomationError::Transient(format!(
                "automation timed out after {} ms",
                self.config.automation_timeout.as_millis()
            ))),
        };

        match result {
            Ok(output) => self.succeed(task, output),
            Err(e) => self.fail(task, e),
        }
    }

    fn succeed(&self, task: Task, output: AutomationOutput) -> WorkerResult<WorkOutcome> {
        let payload = serde_json::to_value(&output)?;

        // Publish before completing: a crash in between re-runs the task and
        // the duplicate event is absorbed downstream.
        self.events
            .publish(&task.tenant_id, analyzed_event_for(task.kind), payload.clone())?;

        match self.queue.complete_claimed(&task, payload) {
            Ok(_) => {
                info!(worker = %self.id, task_id = %task.id, "Task done");
                Ok(WorkOutcome::Completed(task.id))
            }
            Err(QueueError::StaleClaim(id)) => {
                warn!(worker = %self.id, task_id = %id, "Claim expired before completion");
                Ok(WorkOutcome::Superseded(id))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn fail(&self, task: Task, error: AutomationError) -> WorkerResult<WorkOutcome> {
        let message = error.to_string();
        let failed = match self
            .queue
            .fail_claimed(&task, &message, error.is_retryable())
        {
            Ok(failed) => failed,
            Err(QueueError::StaleClaim(id)) => {
                warn!(worker = %self.id, task_id = %id, "Claim expired before failure was recorded");
                return Ok(WorkOutcome::Superseded(id));
            }
            Err(e) => return Err(e.into()),
        };

        if failed.status == TaskStatus::Failed {
            self.announce_failure(&failed)?;
            Ok(WorkOutcome::Failed(failed.id))
        } else {
            Ok(WorkOutcome::Retrying(failed.id))
        }
    }

    fn announce_failure(&self, task: &Task) -> WorkerResult<()> {
        self.events.publish(
            &task.tenant_id,
            EventType::TaskFailed,
            json!({
                "task_id": task.id,
                "source_ref": task.source_ref(),
                "agent": task.agent,
                "kind": task.kind,
                "retry_count": task.retry_count,
                "error": task.error_message,
            }),
        )?;
        Ok(())
    }

    /// Return expired claims to the queue, announcing any that ran out of retries
    pub fn recover_stale(&self) -> WorkerResult<usize> {
        let recovered = self.queue.recover_stale(self.config.stale_claim_after)?;
        for task in recovered.iter().filter(|t| t.status == TaskStatus::Failed) {
            self.announce_failure(task)?;
        }
        Ok(recovered.len())
    }

    /// Poll until `cancel` fires
    pub async fn run(&self, cancel: CancellationToken) {
        info!(worker = %self.id, agent = %self.config.agent, "Worker started");
        while !cancel.is_cancelled() {
            match self.run_once().await {
                Ok(WorkOutcome::Idle) => {
                    if let Err(e) = self.recover_stale() {
                        warn!(worker = %self.id, error = %e, "Stale claim recovery failed");
                    }
                }
                Ok(outcome) => {
                    debug!(worker = %self.id, ?outcome, "Cycle finished");
                    continue;
                }
                Err(e) => error!(worker = %self.id, error = %e, "Worker cycle failed"),
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.config.poll_interval) => {}
            }
        }
        info!(worker = %self.id, "Worker stopped");
    }
}

/// Reject output that proposes a booking for some other document
fn check_output(task: &Task, output: AutomationOutput) -> Result<AutomationOutput, AutomationError> {
    if output.decision.tenant_id != task.tenant_id {
        return Err(AutomationError::Permanent(format!(
            "automation returned a decision for tenant {}",
            output.decision.tenant_id
        )));
    }
    if let Some(source_ref) = task.source_ref() {
        if output.decision.source_ref != source_ref {
            return Err(AutomationError::Permanent(format!(
                "automation returned a decision for {} instead of {}",
                output.decision.source_ref, source_ref
            )));
        }
    }
    Ok(output)
}
