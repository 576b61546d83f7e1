//! Table-driven event orchestrator
//!
//! Polls the event log and dispatches each event through the
//! [`RoutingTable`]. Delivery is at-least-once, so every route is safe to run
//! twice: task creation is deduplicated per document, and
//! [`Orchestrator::evaluate_and_route`] refuses to act on a document that
//! already has a terminal outcome.

pub mod routing;

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub use routing::{analyzed_event_for, Route, RoutingTable};

use crate::audit::AuditLog;
use crate::config::{
    ConfigError, EventSettings, OrchestrationConfig, PolicyConfig, RetentionSettings,
};
use crate::confidence::{ConfidenceResult, ConfidenceScorer};
use crate::decision::{AutomationOutput, ProposedDecision};
use crate::escalation::{EscalationError, SharedEscalator};
use crate::events::{Event, EventLogError, EventType, SharedEventLog};
use crate::ledger::{commit_within, CommitReceipt, SharedLedger};
use crate::queue::{QueueError, SharedTaskQueue};
use crate::state::schema::keys;
use crate::state::{
    Actor, AgentKind, AuditEntry, NewTask, ReviewItem, RouteRecord, SharedStateStore, StoreError,
    TaskId, TaskKind,
};

/// Error type for orchestrator operations
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Event log error: {0}")]
    Events(#[from] EventLogError),

    #[error("Escalation error: {0}")]
    Escalation(#[from] EscalationError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The event can never be handled; it is recorded and skipped
    #[error("Malformed event: {0}")]
    Malformed(String),
}

/// Result type for orchestrator operations
pub type OrchestratorResult<T> = Result<T, OrchestratorError>;

/// What [`Orchestrator::evaluate_and_route`] did with a decision
#[derive(Debug, Clone, PartialEq)]
pub enum RouteOutcome {
    /// Committed to the ledger without human involvement
    Committed(CommitReceipt),
    /// Handed to a human (low confidence or failed commit)
    Escalated(ReviewItem),
    /// The document already has a terminal outcome; nothing was done
    AlreadyHandled(RouteRecord),
    /// Another caller is routing the same document right now
    Duplicate,
}

/// What handling one event did
#[derive(Debug, Clone, PartialEq)]
pub enum HandleOutcome {
    TaskCreated { task_id: TaskId, created: bool },
    Routed(RouteOutcome),
    ResolutionRecorded { booked: bool },
    Acknowledged,
    /// No route is registered for the event type
    Unrouted,
}

/// Counts from one poll cycle
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PumpStats {
    pub polled: usize,
    pub handled: usize,
    /// Malformed events, recorded in the audit log and marked processed
    pub rejected: usize,
    /// Events left unprocessed for the next poll
    pub failed: usize,
    /// Events another caller was routing; left unprocessed until it settles
    pub deferred: usize,
}

/// Counts from one pruning pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PruneStats {
    pub events: usize,
    pub tasks: usize,
}

/// Shared reference to Orchestrator
pub type SharedOrchestrator = Arc<Orchestrator>;

/// The event-driven router between automations, ledger and human review
pub struct Orchestrator {
    store: SharedStateStore,
    queue: SharedTaskQueue,
    events: SharedEventLog,
    escalator: SharedEscalator,
    ledger: SharedLedger,
    audit: AuditLog,
    scorer: ConfidenceScorer,
    policy: PolicyConfig,
    settings: EventSettings,
    retention: RetentionSettings,
    routes: RoutingTable,
}

impl Orchestrator {
    pub fn new(
        store: SharedStateStore,
        queue: SharedTaskQueue,
        events: SharedEventLog,
        escalator: SharedEscalator,
        ledger: SharedLedger,
        config: &OrchestrationConfig,
    ) -> OrchestratorResult<Self> {
        Ok(Self {
            audit: AuditLog::new(Arc::clone(&store)),
            store,
            queue,
            events,
            escalator,
            ledger,
            scorer: config.policy.scorer()?,
            policy: config.policy.clone(),
            settings: config.events.clone(),
            retention: config.retention.clone(),
            routes: RoutingTable::default(),
        })
    }

    pub fn with_routes(mut self, routes: RoutingTable) -> Self {
        self.routes = routes;
        self
    }

    /// Create a shared reference to this orchestrator
    pub fn shared(self) -> SharedOrchestrator {
        Arc::new(self)
    }

    pub fn scorer(&self) -> &ConfidenceScorer {
        &self.scorer
    }

    /// Score a decision against its tenant's threshold
    pub fn score(&self, output: &AutomationOutput) -> ConfidenceResult {
        let threshold = self.policy.threshold_for(&output.decision.tenant_id);
        self.scorer
            .score_with_threshold(&output.decision, &output.signals, threshold)
    }

    /// Dispatch one event through the routing table
    pub async fn handle(&self, event: &Event) -> OrchestratorResult<HandleOutcome> {
        let Some(route) = self.routes.route(event.event_type) else {
            warn!(event_id = %event.id, event_type = %event.event_type, "No route for event");
            return Ok(HandleOutcome::Unrouted);
        };
        debug!(event_id = %event.id, event_type = %event.event_type, ?route, "Handling event");

        match route {
            Route::CreateTask { agent, kind } => self.create_task(event, agent, kind),
            Route::ScoreAndRoute => {
                let output: AutomationOutput = serde_json::from_value(event.payload.clone())
                    .map_err(|e| {
                        OrchestratorError::Malformed(format!("unreadable automation output: {}", e))
                    })?;
                if output.decision.tenant_id != event.tenant_id {
                    return Err(OrchestratorError::Malformed(format!(
                        "decision for tenant {} published under tenant {}",
                        output.decision.tenant_id, event.tenant_id
                    )));
                }
                let confidence = self.score(&output);
                Ok(HandleOutcome::Routed(
                    self.evaluate_and_route(&output.decision, &confidence).await?,
                ))
            }
            Route::EscalateFailure => self.escalate_failure(event),
            Route::RecordResolution => self.record_resolution(event),
            Route::Acknowledge => Ok(HandleOutcome::Acknowledged),
        }
    }

    fn create_task(
        &self,
        event: &Event,
        agent: AgentKind,
        kind: TaskKind,
    ) -> OrchestratorResult<HandleOutcome> {
        let source_ref = require_source_ref(event)?;
        let priority = event
            .payload
            .get("priority")
            .and_then(|p| p.as_i64())
            .unwrap_or(0)
            .clamp(i32::MIN as i64, i32::MAX as i64) as i32;

        let new = NewTask::new(&event.tenant_id, agent, kind, event.payload.clone())
            .with_priority(priority)
            .with_dedup_key(format!("{}:{}:{}", event.tenant_id, kind, source_ref));
        let enqueued = self.queue.enqueue_unique(new)?;
        Ok(HandleOutcome::TaskCreated {
            created: enqueued.is_created(),
            task_id: enqueued.into_task().id,
        })
    }

    fn escalate_failure(&self, event: &Event) -> OrchestratorResult<HandleOutcome> {
        let source_ref = require_source_ref(event)?;
        if let Some(record) = self.store.get_route(&event.tenant_id, source_ref)? {
            return Ok(HandleOutcome::Routed(RouteOutcome::AlreadyHandled(record)));
        }
        let error = event
            .payload
            .get("error")
            .and_then(|e| e.as_str())
            .unwrap_or("unknown error");
        let item = self
            .escalator
            .escalate_automation_failure(&event.tenant_id, source_ref, error)?;
        Ok(HandleOutcome::Routed(RouteOutcome::Escalated(item)))
    }

    fn record_resolution(&self, event: &Event) -> OrchestratorResult<HandleOutcome> {
        let source_ref = require_source_ref(event)?;
        let Some(posted_reference) = event
            .payload
            .get("posted_reference")
            .and_then(|p| p.as_str())
        else {
            return Ok(HandleOutcome::ResolutionRecorded { booked: false });
        };

        // Carries the resolution event id so consumers can drop redeliveries
        self.events.publish(
            &event.tenant_id,
            EventType::BookingCommitted,
            json!({
                "source_ref": source_ref,
                "posted_reference": posted_reference,
                "review_item_id": event.payload.get("review_item_id"),
                "committed_by": "human",
                "cause_event_id": event.id,
            }),
        )?;
        Ok(HandleOutcome::ResolutionRecorded { booked: true })
    }

    /// Commit or escalate a scored decision
    ///
    /// The single point separating autonomous action from human handoff.
    /// Above threshold the ledger commit is attempted exactly once; if it
    /// fails the decision is escalated as `commit_failed` instead of being
    /// dropped. Below threshold no commit is attempted.
    pub async fn evaluate_and_route(
        &self,
        decision: &ProposedDecision,
        confidence: &ConfidenceResult,
    ) -> OrchestratorResult<RouteOutcome> {
        let tenant_id = decision.tenant_id.as_str();
        let source_ref = decision.source_ref.as_str();

        let Some(_routing) = self
            .store
            .locks()
            .try_acquire(&keys::route_lock(tenant_id, source_ref))?
        else {
            info!(tenant_id, source_ref, "Decision already being routed");
            return Ok(RouteOutcome::Duplicate);
        };

        if let Some(record) = self.store.get_route(tenant_id, source_ref)? {
            info!(tenant_id, source_ref, "Decision already routed");
            return Ok(RouteOutcome::AlreadyHandled(record));
        }
        if let Some(review_item_id) = self.store.open_review_id(tenant_id, source_ref)? {
            info!(tenant_id, source_ref, %review_item_id, "Decision already under review");
            return Ok(RouteOutcome::AlreadyHandled(RouteRecord::Escalated {
                review_item_id,
                at: Utc::now(),
            }));
        }

        if !confidence.is_auto_approve() {
            info!(
                tenant_id,
                source_ref,
                confidence = confidence.total,
                threshold = confidence.threshold,
                "Confidence below threshold, escalating"
            );
            let item = self.escalator.escalate(decision, confidence)?;
            return Ok(RouteOutcome::Escalated(item));
        }

        let timeout = Duration::from_millis(self.settings.commit_timeout_ms);
        match commit_within(self.ledger.as_ref(), decision, timeout).await {
            Ok(receipt) => {
                self.store.put_route(
                    tenant_id,
                    source_ref,
                    &RouteRecord::Committed {
                        posted_reference: receipt.posted_reference.clone(),
                        confidence: confidence.total,
                        at: Utc::now(),
                    },
                )?;
                self.audit.record(
                    AuditEntry::new(tenant_id, "booking", source_ref, "committed", &Actor::automation("orchestrator"))
                        .with_after(json!({
                            "posted_reference": receipt.posted_reference,
                            "confidence": confidence.total,
                            "breakdown": confidence.breakdown(),
                        })),
                )?;
                self.events.publish(
                    tenant_id,
                    EventType::BookingCommitted,
                    json!({
                        "source_ref": source_ref,
                        "posted_reference": receipt.posted_reference,
                        "committed_by": "automation",
                        "confidence": confidence.total,
                    }),
                )?;
                info!(
                    tenant_id,
                    source_ref,
                    posted_reference = %receipt.posted_reference,
                    confidence = confidence.total,
                    "Decision committed autonomously"
                );
                Ok(RouteOutcome::Committed(receipt))
            }
            Err(e) => {
                warn!(tenant_id, source_ref, error = %e, "Commit failed, escalating");
                let item = self
                    .escalator
                    .escalate_commit_failure(decision, confidence, &e.to_string())?;
                Ok(RouteOutcome::Escalated(item))
            }
        }
    }

    /// Run one poll cycle over the event log
    ///
    /// Handled and malformed events are marked processed. Handler errors and
    /// decisions another caller is still routing leave the event for the next
    /// poll.
    pub async fn process_pending(&self, batch_size: usize) -> OrchestratorResult<PumpStats> {
        let events = self.events.poll_unprocessed(batch_size)?;
        let mut stats = PumpStats {
            polled: events.len(),
            ..Default::default()
        };

        for event in events {
            match self.handle(&event).await {
                Ok(HandleOutcome::Routed(RouteOutcome::Duplicate)) => {
                    // The other caller may still fail; a later poll sees its outcome
                    debug!(event_id = %event.id, "Decision in flight elsewhere, deferring event");
                    stats.deferred += 1;
                }
                Ok(outcome) => {
                    debug!(event_id = %event.id, ?outcome, "Event handled");
                    stats.handled += 1;
                    self.mark_processed(&event);
                }
                Err(OrchestratorError::Malformed(reason)) => {
                    warn!(event_id = %event.id, event_type = %event.event_type, %reason, "Rejecting malformed event");
                    stats.rejected += 1;
                    let entry = AuditEntry::new(&event.tenant_id, "event", &event.id, "rejected", &Actor::system())
                        .with_after(json!({ "event_type": event.event_type, "reason": reason }));
                    match self.audit.record(entry) {
                        Ok(_) => self.mark_processed(&event),
                        Err(e) => error!(event_id = %event.id, error = %e, "Failed to record rejection"),
                    }
                }
                Err(e) => {
                    error!(
                        event_id = %event.id,
                        event_type = %event.event_type,
                        error = %e,
                        "Event handler failed, will retry on next poll"
                    );
                    stats.failed += 1;
                }
            }
        }
        Ok(stats)
    }

    fn mark_processed(&self, event: &Event) {
        if let Err(e) = self.events.mark_processed(&event.id) {
            // Redelivery is safe, handlers are idempotent
            warn!(event_id = %event.id, error = %e, "Failed to mark event processed");
        }
    }

    /// Delete processed events and finished tasks older than `cutoff`
    pub fn prune_before(&self, cutoff: DateTime<Utc>) -> OrchestratorResult<PruneStats> {
        Ok(PruneStats {
            events: self.events.prune_processed_before(cutoff)?,
            tasks: self.queue.prune_finished_before(cutoff)?,
        })
    }

    /// Prune everything past the configured retention
    pub fn prune_expired(&self) -> OrchestratorResult<PruneStats> {
        self.prune_before(Utc::now() - self.retention.keep_finished())
    }

    /// Poll the event log until `cancel` fires
    ///
    /// Wakes early when an event is published in this process, and prunes
    /// expired history once per `retention.prune_interval_secs`. Handler
    /// errors never stop the loop.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut wake = self.events.subscribe();
        let interval = Duration::from_millis(self.settings.poll_interval_ms);
        let batch_size = self.settings.batch_size;
        let mut last_prune: Option<Instant> = None;
        info!(batch_size, poll_interval_ms = self.settings.poll_interval_ms, "Event pump started");

        while !cancel.is_cancelled() {
            if last_prune.map_or(true, |at| at.elapsed() >= self.retention.prune_interval()) {
                match self.prune_expired() {
                    Ok(stats) => debug!(events = stats.events, tasks = stats.tasks, "Prune pass finished"),
                    Err(e) => warn!(error = %e, "Prune pass failed"),
                }
                last_prune = Some(Instant::now());
            }

            match self.process_pending(batch_size).await {
                Ok(stats) => {
                    if stats.polled > 0 {
                        debug!(
                            polled = stats.polled,
                            handled = stats.handled,
                            rejected = stats.rejected,
                            failed = stats.failed,
                            deferred = stats.deferred,
                            "Poll cycle finished"
                        );
                    }
                    // A full batch of progress means more may be waiting
                    if stats.polled == batch_size && stats.failed + stats.deferred < stats.polled {
                        continue;
                    }
                }
                Err(e) => error!(error = %e, "Event poll failed"),
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = wake.recv() => {}
                _ = tokio::time::sleep(interval) => {}
            }
        }
        info!("Event pump stopped");
    }
}

fn require_source_ref(event: &Event) -> OrchestratorResult<&str> {
    event.source_ref().ok_or_else(|| {
        OrchestratorError::Malformed(format!(
            "{} event {} has no source_ref",
            event.event_type, event.id
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::escalation::ReviewEscalator;
    use crate::events::EventLog;
    use crate::ledger::{CommitError, LedgerCommitter};
    use crate::queue::TaskQueue;
    use crate::state::{StateStore, TaskStatus};
    use async_trait::async_trait;

    struct NullLedger;

    #[async_trait]
    impl LedgerCommitter for NullLedger {
        async fn commit(&self, decision: &ProposedDecision) -> Result<CommitReceipt, CommitError> {
            Ok(CommitReceipt::new(format!("JE-{}", decision.source_ref)))
        }
    }

    fn orchestrator() -> Orchestrator {
        let store = StateStore::in_memory().shared();
        let events = EventLog::new(Arc::clone(&store)).shared();
        let queue = TaskQueue::new(Arc::clone(&store)).shared();
        let ledger: SharedLedger = Arc::new(NullLedger);
        let escalator =
            ReviewEscalator::new(Arc::clone(&store), Arc::clone(&events), Arc::clone(&ledger))
                .shared();
        Orchestrator::new(
            store,
            queue,
            events,
            escalator,
            ledger,
            &OrchestrationConfig::default(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_received_event_creates_one_task() {
        let orch = orchestrator();
        let event = orch
            .events
            .publish(
                "acme",
                EventType::InvoiceReceived,
                json!({"source_ref": "inv-1", "document_url": "s3://docs/inv-1.pdf"}),
            )
            .unwrap();

        let first = orch.handle(&event).await.unwrap();
        let second = orch.handle(&event).await.unwrap();
        let (HandleOutcome::TaskCreated { task_id: a, created: true }, HandleOutcome::TaskCreated { task_id: b, created: false }) = (first, second) else {
            panic!("expected task creation then dedup");
        };
        assert_eq!(a, b);

        let task = orch.queue.get(&a).unwrap().unwrap();
        assert_eq!(task.agent, AgentKind::InvoiceBooking);
        assert_eq!(task.kind, TaskKind::AnalyzeInvoice);
        assert_eq!(task.status, TaskStatus::Pending);
    }

    #[tokio::test]
    async fn test_malformed_event_is_rejected_and_marked() {
        let orch = orchestrator();
        let event = orch
            .events
            .publish("acme", EventType::InvoiceAnalyzed, json!({"nonsense": true}))
            .unwrap();

        let stats = orch.process_pending(10).await.unwrap();
        assert_eq!(stats.rejected, 1);
        assert!(orch.events.get(&event.id).unwrap().unwrap().processed);
        let trail = orch.audit.list_for("event", &event.id).unwrap();
        assert_eq!(trail[0].action, "rejected");
    }

    #[tokio::test]
    async fn test_missing_source_ref_is_malformed() {
        let orch = orchestrator();
        let event = orch
            .events
            .publish("acme", EventType::BankTransactionReceived, json!({}))
            .unwrap();
        assert!(matches!(
            orch.handle(&event).await,
            Err(OrchestratorError::Malformed(_))
        ));
    }

    #[tokio::test]
    async fn test_unrouted_event_is_acknowledged() {
        let orch = orchestrator().with_routes(RoutingTable::empty());
        let event = orch
            .events
            .publish("acme", EventType::BookingCommitted, json!({}))
            .unwrap();
        assert_eq!(orch.handle(&event).await.unwrap(), HandleOutcome::Unrouted);
    }

    #[tokio::test]
    async fn test_route_lock_reports_duplicate() {
        let orch = orchestrator();
        let decision = ProposedDecision::new("acme", "inv-1", crate::decision::DecisionKind::VendorInvoice, 10.0);
        let confidence = orch.scorer.score(&decision, &Default::default());

        let _held = orch
            .store
            .locks()
            .try_acquire(&keys::route_lock("acme", "inv-1"))
            .unwrap();
        assert_eq!(
            orch.evaluate_and_route(&decision, &confidence).await.unwrap(),
            RouteOutcome::Duplicate
        );
    }

    #[tokio::test]
    async fn test_event_in_flight_elsewhere_stays_unprocessed() {
        let orch = orchestrator();
        let output = AutomationOutput {
            decision: ProposedDecision::new("acme", "inv-1", crate::decision::DecisionKind::VendorInvoice, 10.0),
            signals: Default::default(),
        };
        let event = orch
            .events
            .publish("acme", EventType::InvoiceAnalyzed, serde_json::to_value(&output).unwrap())
            .unwrap();

        let held = orch
            .store
            .locks()
            .try_acquire(&keys::route_lock("acme", "inv-1"))
            .unwrap();
        let stats = orch.process_pending(10).await.unwrap();
        assert_eq!(stats.deferred, 1);
        assert_eq!(stats.handled, 0);
        assert!(!orch.events.get(&event.id).unwrap().unwrap().processed);

        // The holder went away without an outcome: the next poll routes it
        drop(held);
        let stats = orch.process_pending(10).await.unwrap();
        assert_eq!(stats.handled, 1);
        assert!(orch.events.get(&event.id).unwrap().unwrap().processed);
        assert!(orch.store.open_review_id("acme", "inv-1").unwrap().is_some());
    }

    #[tokio::test]
    async fn test_prune_removes_settled_history_only() {
        let orch = orchestrator();
        orch.events
            .publish("acme", EventType::InvoiceReceived, json!({"source_ref": "inv-1"}))
            .unwrap();
        orch.process_pending(10).await.unwrap();
        let task = orch
            .queue
            .claim_next(AgentKind::InvoiceBooking, None)
            .unwrap()
            .unwrap();
        orch.queue.complete(&task.id, json!({})).unwrap();
        let waiting = orch
            .events
            .publish("acme", EventType::InvoiceReceived, json!({"source_ref": "inv-2"}))
            .unwrap();

        // Inside the retention window nothing goes
        assert_eq!(orch.prune_expired().unwrap(), PruneStats::default());

        let stats = orch
            .prune_before(Utc::now() + chrono::Duration::seconds(1))
            .unwrap();
        assert_eq!(stats, PruneStats { events: 1, tasks: 1 });
        assert!(orch.queue.get(&task.id).unwrap().is_none());
        assert_eq!(
            orch.events.poll_unprocessed(10).unwrap()[0].id,
            waiting.id
        );
    }

    #[tokio::test]
    async fn test_run_stops_on_cancel() {
        let orch = Arc::new(orchestrator());
        let cancel = CancellationToken::new();
        let handle = {
            let orch = Arc::clone(&orch);
            let cancel = cancel.clone();
            tokio::spawn(async move { orch.run(cancel).await })
        };

        orch.events
            .publish("acme", EventType::InvoiceReceived, json!({"source_ref": "inv-1"}))
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();
        handle.await.unwrap();

        assert_eq!(orch.queue.stats().unwrap().pending, 1);
        assert!(orch.events.poll_unprocessed(10).unwrap().is_empty());
    }
}
