//! Concurrent workers and orchestrators sharing one store
//!
//! Verifies that parallel claimers never share a task and that racing
//! handlers of the same analyzed event book it at most once.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use orchestration::{
    AgentKind, AutomationOutput, BookingLine, CommitError, CommitReceipt, DecisionKind, EventLog,
    EventType, LedgerCommitter, NewTask, OrchestrationConfig, Orchestrator, ProposedDecision,
    ReviewEscalator, RouteOutcome, SharedLedger, Signals, StateStore, TaskKind, TaskQueue,
    TaskStatus,
};

/// Ledger that counts commits and yields to let racers interleave
#[derive(Default)]
struct CountingLedger {
    commits: AtomicUsize,
}

#[async_trait]
impl LedgerCommitter for CountingLedger {
    async fn commit(&self, decision: &ProposedDecision) -> Result<CommitReceipt, CommitError> {
        tokio::task::yield_now().await;
        let n = self.commits.fetch_add(1, Ordering::SeqCst);
        Ok(CommitReceipt::new(format!("JE-{}-{}", decision.source_ref, n)))
    }
}

/// Test: many tokio tasks claiming from one queue get disjoint tasks
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_parallel_claims_are_disjoint() {
    let store = StateStore::in_memory().shared();
    let queue = TaskQueue::new(store).shared();
    for i in 0..60 {
        queue
            .enqueue(NewTask::new(
                "acme",
                AgentKind::InvoiceBooking,
                TaskKind::AnalyzeInvoice,
                json!({ "source_ref": format!("inv-{}", i) }),
            ))
            .unwrap();
    }

    let mut handles = Vec::new();
    for _ in 0..6 {
        let queue = Arc::clone(&queue);
        handles.push(tokio::spawn(async move {
            let mut claimed = Vec::new();
            while let Some(task) = queue.claim_next(AgentKind::InvoiceBooking, None).unwrap() {
                claimed.push(task.id.clone());
                queue.complete_claimed(&task, json!({ "ok": true })).unwrap();
                tokio::task::yield_now().await;
            }
            claimed
        }));
    }

    let mut all = Vec::new();
    for handle in handles {
        all.extend(handle.await.unwrap());
    }
    let unique: HashSet<_> = all.iter().collect();
    assert_eq!(all.len(), 60);
    assert_eq!(unique.len(), 60);
    assert_eq!(queue.stats().unwrap().completed, 60);
    assert!(queue
        .list(&Default::default())
        .unwrap()
        .iter()
        .all(|t| t.status == TaskStatus::Completed));
}

/// Test: racing handlers of one analyzed event commit exactly once
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_racing_routes_commit_once() {
    let store = StateStore::in_memory().shared();
    let events = EventLog::new(Arc::clone(&store)).shared();
    let queue = TaskQueue::new(Arc::clone(&store)).shared();
    let counting = Arc::new(CountingLedger::default());
    let ledger: SharedLedger = counting.clone();
    let escalator =
        ReviewEscalator::new(Arc::clone(&store), Arc::clone(&events), Arc::clone(&ledger)).shared();
    let orchestrator = Orchestrator::new(
        store,
        queue,
        Arc::clone(&events),
        escalator,
        ledger,
        &OrchestrationConfig::default(),
    )
    .unwrap()
    .shared();

    let output = AutomationOutput {
        decision: ProposedDecision::new("acme", "inv-1", DecisionKind::VendorInvoice, 119.0)
            .with_breakdown(100.0, 19.0)
            .with_entry(BookingLine::debit("4400", 119.0))
            .with_entry(BookingLine::credit("1600", 119.0))
            .with_field("vendor_name", "Acme Supplies")
            .with_field("invoice_number", "R-1")
            .with_field("invoice_date", "2026-03-02")
            .with_field("due_date", "2026-04-01"),
        signals: Signals::default()
            .with_text_quality(0.99)
            .with_self_reported(0.95),
    };

    let mut handles = Vec::new();
    for _ in 0..8 {
        let orchestrator = Arc::clone(&orchestrator);
        let output = output.clone();
        handles.push(tokio::spawn(async move {
            let confidence = orchestrator.score(&output);
            orchestrator
                .evaluate_and_route(&output.decision, &confidence)
                .await
                .unwrap()
        }));
    }

    let mut committed = 0;
    for handle in handles {
        match handle.await.unwrap() {
            RouteOutcome::Committed(_) => committed += 1,
            RouteOutcome::Duplicate | RouteOutcome::AlreadyHandled(_) => {}
            RouteOutcome::Escalated(item) => panic!("unexpected escalation: {:?}", item),
        }
    }
    assert_eq!(committed, 1);
    assert_eq!(counting.commits.load(Ordering::SeqCst), 1);
    let announced = events
        .list()
        .unwrap()
        .into_iter()
        .filter(|e| e.event_type == EventType::BookingCommitted)
        .count();
    assert_eq!(announced, 1);
}

/// Ledger that takes a while and counts only commits that finished
#[derive(Default)]
struct SlowLedger {
    finished: AtomicUsize,
}

#[async_trait]
impl LedgerCommitter for SlowLedger {
    async fn commit(&self, decision: &ProposedDecision) -> Result<CommitReceipt, CommitError> {
        tokio::time::sleep(std::time::Duration::from_millis(300)).await;
        self.finished.fetch_add(1, Ordering::SeqCst);
        Ok(CommitReceipt::new(format!("JE-{}", decision.source_ref)))
    }
}

/// Test: a poller that dies mid-commit does not take the event with it
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_aborted_poller_leaves_event_for_the_next() {
    let store = StateStore::in_memory().shared();
    let events = EventLog::new(Arc::clone(&store)).shared();
    let queue = TaskQueue::new(Arc::clone(&store)).shared();
    let slow = Arc::new(SlowLedger::default());
    let ledger: SharedLedger = slow.clone();
    let escalator =
        ReviewEscalator::new(Arc::clone(&store), Arc::clone(&events), Arc::clone(&ledger)).shared();
    let pump = || {
        Orchestrator::new(
            Arc::clone(&store),
            Arc::clone(&queue),
            Arc::clone(&events),
            Arc::clone(&escalator),
            Arc::clone(&ledger),
            &OrchestrationConfig::default(),
        )
        .unwrap()
        .shared()
    };
    let (first, second) = (pump(), pump());

    let output = AutomationOutput {
        decision: ProposedDecision::new("acme", "inv-9", DecisionKind::VendorInvoice, 119.0)
            .with_breakdown(100.0, 19.0)
            .with_entry(BookingLine::debit("4400", 119.0))
            .with_entry(BookingLine::credit("1600", 119.0))
            .with_field("vendor_name", "Acme Supplies")
            .with_field("invoice_number", "R-9")
            .with_field("invoice_date", "2026-03-02")
            .with_field("due_date", "2026-04-01"),
        signals: Signals::default()
            .with_text_quality(0.99)
            .with_self_reported(0.95),
    };
    let event = events
        .publish("acme", EventType::InvoiceAnalyzed, serde_json::to_value(&output).unwrap())
        .unwrap();

    let in_flight = {
        let first = Arc::clone(&first);
        tokio::spawn(async move { first.process_pending(10).await })
    };
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    let stats = second.process_pending(10).await.unwrap();
    assert_eq!(stats.deferred, 1);
    assert!(!events.get(&event.id).unwrap().unwrap().processed);

    in_flight.abort();
    assert!(in_flight.await.unwrap_err().is_cancelled());
    assert_eq!(slow.finished.load(Ordering::SeqCst), 0);

    let stats = second.process_pending(10).await.unwrap();
    assert_eq!(stats.handled, 1);
    assert!(events.get(&event.id).unwrap().unwrap().processed);
    assert!(matches!(
        store.get_route("acme", "inv-9").unwrap(),
        Some(orchestration::RouteRecord::Committed { .. })
    ));
    assert_eq!(slow.finished.load(Ordering::SeqCst), 1);
}
