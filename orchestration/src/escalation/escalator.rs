//! Review escalator
//!
//! Turns decisions the system must not commit on its own into human review
//! items, and applies human resolutions. At most one item per
//! (tenant, source_ref) is open at any time; escalating a document that
//! already has an open item returns that item.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};

use super::priority::PriorityRules;
use crate::audit::AuditLog;
use crate::confidence::ConfidenceResult;
use crate::decision::ProposedDecision;
use crate::events::{EventLogError, EventType, SharedEventLog};
use crate::ledger::{commit_within, CommitError, CommitReceipt, SharedLedger};
use crate::state::schema::keys;
use crate::state::{
    Actor, AuditEntry, IssueCategory, ReviewItem, ReviewItemId, ReviewPriority, ReviewStatus,
    RouteRecord, SharedStateStore, StoreError,
};

/// Actor id recorded on escalations made by the pipeline
const ESCALATING_ACTOR: &str = "orchestrator";

/// Audit target type of review items
const TARGET: &str = "review_item";

/// Error type for escalation operations
#[derive(Debug, thiserror::Error)]
pub enum EscalationError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Event log error: {0}")]
    Events(#[from] EventLogError),

    #[error("Review item not found: {0}")]
    NotFound(ReviewItemId),

    #[error("Review item {id} is already {status}")]
    AlreadyResolved {
        id: ReviewItemId,
        status: ReviewStatus,
    },

    #[error("Review item {0} is being resolved by someone else")]
    ResolutionInProgress(ReviewItemId),

    #[error("Review of {tenant_id}/{source_ref} is being opened by someone else")]
    EscalationInProgress {
        tenant_id: String,
        source_ref: String,
    },

    #[error("Review item {0} has no decision to commit; resolve it with a correction")]
    NothingToCommit(ReviewItemId),

    #[error("Corrected decision does not belong to review item {0}")]
    DecisionMismatch(ReviewItemId),

    #[error("Review item {0} is still open")]
    StillOpen(ReviewItemId),

    #[error("Commit for review item {item_id} failed: {source}")]
    CommitFailed {
        item_id: ReviewItemId,
        source: CommitError,
    },
}

/// Result type for escalation operations
pub type EscalationResult<T> = Result<T, EscalationError>;

/// Shared reference to ReviewEscalator
pub type SharedEscalator = Arc<ReviewEscalator>;

/// A human's verdict on a review item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum Resolution {
    /// Commit the decision as proposed
    Approve { notes: Option<String> },
    /// Do not book
    Reject { notes: Option<String> },
    /// Commit a human-edited decision
    Correct {
        decision: ProposedDecision,
        notes: Option<String>,
    },
}

impl Resolution {
    pub fn status(&self) -> ReviewStatus {
        match self {
            Resolution::Approve { .. } => ReviewStatus::Approved,
            Resolution::Reject { .. } => ReviewStatus::Rejected,
            Resolution::Correct { .. } => ReviewStatus::Corrected,
        }
    }

    pub fn notes(&self) -> Option<&str> {
        match self {
            Resolution::Approve { notes }
            | Resolution::Reject { notes }
            | Resolution::Correct { notes, .. } => notes.as_deref(),
        }
    }
}

/// What a successful resolution did
#[derive(Debug, Clone, PartialEq)]
pub struct ResolveOutcome {
    pub item: ReviewItem,
    /// Ledger receipt for approved and corrected items
    pub receipt: Option<CommitReceipt>,
}

/// Filter for [`ReviewEscalator::list`]
#[derive(Debug, Clone, Default)]
pub struct ReviewFilter {
    pub tenant_id: Option<String>,
    pub status: Option<ReviewStatus>,
    pub min_priority: Option<ReviewPriority>,
}

impl ReviewFilter {
    pub fn open() -> Self {
        Self {
            status: Some(ReviewStatus::Pending),
            ..Default::default()
        }
    }

    fn matches(&self, item: &ReviewItem) -> bool {
        self.tenant_id.as_ref().map_or(true, |t| &item.tenant_id == t)
            && self.status.map_or(true, |s| item.status == s)
            && self.min_priority.map_or(true, |p| item.priority >= p)
    }
}

/// Creates and resolves human review items
pub struct ReviewEscalator {
    store: SharedStateStore,
    audit: AuditLog,
    events: SharedEventLog,
    ledger: SharedLedger,
    rules: PriorityRules,
    commit_timeout: Duration,
}

impl ReviewEscalator {
    pub fn new(store: SharedStateStore, events: SharedEventLog, ledger: SharedLedger) -> Self {
        Self {
            audit: AuditLog::new(Arc::clone(&store)),
            store,
            events,
            ledger,
            rules: PriorityRules::default(),
            commit_timeout: Duration::from_secs(30),
        }
    }

    pub fn with_rules(mut self, rules: PriorityRules) -> Self {
        self.rules = rules;
        self
    }

    pub fn with_commit_timeout(mut self, timeout: Duration) -> Self {
        self.commit_timeout = timeout;
        self
    }

    /// Create a shared reference to this escalator
    pub fn shared(self) -> SharedEscalator {
        Arc::new(self)
    }

    pub fn rules(&self) -> &PriorityRules {
        &self.rules
    }

    /// Hand a decision that scored below threshold to a human
    pub fn escalate(
        &self,
        decision: &ProposedDecision,
        confidence: &ConfidenceResult,
    ) -> EscalationResult<ReviewItem> {
        let category = confidence
            .weakest()
            .map(|f| IssueCategory::from_factor(f.factor))
            .unwrap_or(IssueCategory::UncertainProposal);
        let priority = self.rules.priority(confidence.total, decision.magnitude());
        let item = new_item(
            decision,
            Some(confidence),
            priority,
            category,
            confidence.reason.clone(),
        );
        self.open_item(item, &Actor::automation(ESCALATING_ACTOR))
    }

    /// Hand a high-confidence decision the ledger refused to a human
    pub fn escalate_commit_failure(
        &self,
        decision: &ProposedDecision,
        confidence: &ConfidenceResult,
        reason: &str,
    ) -> EscalationResult<ReviewItem> {
        let priority = self
            .rules
            .commit_failure_priority(confidence.total, decision.magnitude());
        let description = format!(
            "Commit failed despite high confidence ({:.2}): {}",
            confidence.total, reason
        );
        let item = new_item(
            decision,
            Some(confidence),
            priority,
            IssueCategory::CommitFailed,
            description,
        );
        self.open_item(item, &Actor::automation(ESCALATING_ACTOR))
    }

    /// Hand a document whose automation failed for good to a human
    pub fn escalate_automation_failure(
        &self,
        tenant_id: &str,
        source_ref: &str,
        error: &str,
    ) -> EscalationResult<ReviewItem> {
        let item = ReviewItem {
            id: uuid::Uuid::new_v4().to_string(),
            tenant_id: tenant_id.to_string(),
            source_ref: source_ref.to_string(),
            priority: ReviewPriority::High,
            status: ReviewStatus::Pending,
            issue_category: IssueCategory::AutomationFailed,
            issue_description: format!("Automation failed: {}", error),
            proposed_decision: None,
            confidence_score: 0.0,
            confidence: None,
            reasoning: String::new(),
            created_at: Utc::now(),
            resolved_at: None,
            resolved_by: None,
            resolution_notes: None,
            final_decision: None,
            posted_reference: None,
            supersedes: None,
        };
        self.open_item(item, &Actor::system())
    }

    /// Open a correction of an already resolved item
    ///
    /// Resolved items are final; the correction becomes a new item that
    /// points back at the old one.
    pub fn open_follow_up(
        &self,
        item_id: &str,
        decision: ProposedDecision,
        actor: &Actor,
    ) -> EscalationResult<ReviewItem> {
        let previous = self.load(item_id)?;
        if previous.is_open() {
            return Err(EscalationError::StillOpen(previous.id));
        }
        if decision.tenant_id != previous.tenant_id || decision.source_ref != previous.source_ref {
            return Err(EscalationError::DecisionMismatch(previous.id));
        }

        let mut item = new_item(
            &decision,
            None,
            previous.priority.max(ReviewPriority::Medium),
            previous.issue_category,
            format!(
                "Follow-up to review item {} ({}) requested by {}",
                previous.id, previous.status, actor
            ),
        );
        item.confidence_score = previous.confidence_score;
        item.supersedes = Some(previous.id.clone());
        self.open_item(item, actor)
    }

    /// Persist a new open item unless the document already has one
    ///
    /// Never waits on a concurrent escalation of the same document: the
    /// caller gets [`EscalationError::EscalationInProgress`] and retries
    /// later, when the other item is visible.
    fn open_item(&self, item: ReviewItem, actor: &Actor) -> EscalationResult<ReviewItem> {
        let lock = keys::review_lock(&item.tenant_id, &item.source_ref);
        let Some(_guard) = self.store.locks().try_acquire(&lock)? else {
            return Err(EscalationError::EscalationInProgress {
                tenant_id: item.tenant_id,
                source_ref: item.source_ref,
            });
        };

        if let Some(open_id) = self.store.open_review_id(&item.tenant_id, &item.source_ref)? {
            if let Some(existing) = self.store.get_review_item(&open_id)? {
                if existing.is_open() {
                    info!(
                        review_item_id = %existing.id,
                        source_ref = %existing.source_ref,
                        "Review item already open"
                    );
                    return Ok(existing);
                }
            }
        }

        self.store.put_review_item(&item)?;
        self.store.put_route(
            &item.tenant_id,
            &item.source_ref,
            &RouteRecord::Escalated {
                review_item_id: item.id.clone(),
                at: item.created_at,
            },
        )?;
        self.audit.record(
            AuditEntry::new(&item.tenant_id, TARGET, &item.id, "escalated", actor).with_after(json!({
                "status": item.status,
                "priority": item.priority,
                "issue_category": item.issue_category,
                "confidence": item.confidence_score,
                "supersedes": item.supersedes,
            })),
        )?;
        self.events.publish(
            &item.tenant_id,
            EventType::ReviewEscalated,
            json!({
                "review_item_id": item.id,
                "source_ref": item.source_ref,
                "priority": item.priority,
                "issue_category": item.issue_category,
            }),
        )?;

        info!(
            review_item_id = %item.id,
            tenant_id = %item.tenant_id,
            source_ref = %item.source_ref,
            priority = %item.priority,
            category = %item.issue_category,
            "Escalated to human review"
        );
        Ok(item)
    }

    /// Apply a human resolution
    ///
    /// Approvals and corrections commit synchronously. A failed commit is
    /// returned to the caller and the item stays pending.
    pub async fn resolve(
        &self,
        item_id: &str,
        resolution: Resolution,
        actor: &Actor,
    ) -> EscalationResult<ResolveOutcome> {
        let Some(_in_flight) = self.store.locks().try_acquire(&keys::resolve_lock(item_id))? else {
            return Err(EscalationError::ResolutionInProgress(item_id.to_string()));
        };

        let mut item = self.load(item_id)?;
        if !item.is_open() {
            return Err(EscalationError::AlreadyResolved {
                id: item.id,
                status: item.status,
            });
        }

        let status = resolution.status();
        let notes = resolution.notes().map(str::to_string);
        let to_commit = match resolution {
            Resolution::Reject { .. } => None,
            Resolution::Approve { .. } => Some(
                item.proposed_decision
                    .clone()
                    .ok_or_else(|| EscalationError::NothingToCommit(item.id.clone()))?,
            ),
            Resolution::Correct { decision, .. } => {
                if decision.tenant_id != item.tenant_id || decision.source_ref != item.source_ref {
                    return Err(EscalationError::DecisionMismatch(item.id));
                }
                Some(decision)
            }
        };

        let receipt = match &to_commit {
            None => None,
            Some(decision) => match commit_within(self.ledger.as_ref(), decision, self.commit_timeout).await {
                Ok(receipt) => Some(receipt),
                Err(e) => {
                    warn!(review_item_id = %item.id, error = %e, "Commit on resolution failed");
                    self.audit.record(
                        AuditEntry::new(&item.tenant_id, TARGET, &item.id, "commit_failed", actor)
                            .with_after(json!({ "status": status, "error": e.to_string() })),
                    )?;
                    return Err(EscalationError::CommitFailed {
                        item_id: item.id,
                        source: e,
                    });
                }
            },
        };

        let before = json!({ "status": item.status });
        let now = Utc::now();
        item.status = status;
        item.resolved_at = Some(now);
        item.resolved_by = Some(actor.id.clone());
        item.resolution_notes = notes;
        item.posted_reference = receipt.as_ref().map(|r| r.posted_reference.clone());
        if status == ReviewStatus::Corrected {
            item.final_decision = to_commit;
        }
        self.store.put_review_item(&item)?;
        self.store.put_route(
            &item.tenant_id,
            &item.source_ref,
            &RouteRecord::Resolved {
                review_item_id: item.id.clone(),
                status,
                posted_reference: item.posted_reference.clone(),
                at: now,
            },
        )?;
        self.audit.record(
            AuditEntry::new(&item.tenant_id, TARGET, &item.id, &status.to_string(), actor)
                .with_before(before)
                .with_after(json!({
                    "status": status,
                    "posted_reference": item.posted_reference,
                    "notes": item.resolution_notes,
                })),
        )?;
        self.events.publish(
            &item.tenant_id,
            EventType::ReviewResolved,
            json!({
                "review_item_id": item.id,
                "source_ref": item.source_ref,
                "status": status,
                "posted_reference": item.posted_reference,
            }),
        )?;

        info!(
            review_item_id = %item.id,
            status = %status,
            actor = %actor,
            posted_reference = ?item.posted_reference,
            "Review item resolved"
        );
        Ok(ResolveOutcome { item, receipt })
    }

    pub fn get(&self, item_id: &str) -> EscalationResult<Option<ReviewItem>> {
        Ok(self.store.get_review_item(item_id)?)
    }

    /// Items matching `filter`, most urgent first, then oldest first
    pub fn list(&self, filter: &ReviewFilter) -> EscalationResult<Vec<ReviewItem>> {
        let mut items: Vec<ReviewItem> = self
            .store
            .list_review_items()?
            .into_iter()
            .filter(|i| filter.matches(i))
            .collect();
        items.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then_with(|| a.created_at.cmp(&b.created_at))
        });
        Ok(items)
    }

    fn load(&self, item_id: &str) -> EscalationResult<ReviewItem> {
        self.store
            .get_review_item(item_id)?
            .ok_or_else(|| EscalationError::NotFound(item_id.to_string()))
    }
}

fn new_item(
    decision: &ProposedDecision,
    confidence: Option<&ConfidenceResult>,
    priority: ReviewPriority,
    category: IssueCategory,
    description: String,
) -> ReviewItem {
    ReviewItem {
        id: uuid::Uuid::new_v4().to_string(),
        tenant_id: decision.tenant_id.clone(),
        source_ref: decision.source_ref.clone(),
        priority,
        status: ReviewStatus::Pending,
        issue_category: category,
        issue_description: description,
        proposed_decision: Some(decision.clone()),
        confidence_score: confidence.map_or(0.0, |c| c.total),
        confidence: confidence.cloned(),
        reasoning: decision.reasoning.clone(),
        created_at: Utc::now(),
        resolved_at: None,
        resolved_by: None,
        resolution_notes: None,
        final_decision: None,
        posted_reference: None,
        supersedes: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::confidence::ConfidenceScorer;
    use crate::decision::{BookingLine, DecisionKind, Signals};
    use crate::events::EventLog;
    use crate::ledger::LedgerCommitter;
    use crate::state::StateStore;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Records commits; fails while `fail` is set
    #[derive(Default)]
    struct RecordingLedger {
        commits: Mutex<Vec<String>>,
        fail: Mutex<bool>,
    }

    #[async_trait]
    impl LedgerCommitter for RecordingLedger {
        async fn commit(&self, decision: &ProposedDecision) -> Result<CommitReceipt, CommitError> {
            if *self.fail.lock().unwrap() {
                return Err(CommitError::Rejected("period closed".into()));
            }
            let mut commits = self.commits.lock().unwrap();
            commits.push(decision.source_ref.clone());
            Ok(CommitReceipt::new(format!("JE-{}", commits.len())))
        }
    }

    struct Fixture {
        store: SharedStateStore,
        ledger: Arc<RecordingLedger>,
        escalator: ReviewEscalator,
    }

    fn fixture() -> Fixture {
        let store = StateStore::in_memory().shared();
        let events = EventLog::new(Arc::clone(&store)).shared();
        let ledger = Arc::new(RecordingLedger::default());
        let escalator = ReviewEscalator::new(Arc::clone(&store), events, ledger.clone());
        Fixture {
            store,
            ledger,
            escalator,
        }
    }

    fn decision(gross: f64) -> ProposedDecision {
        ProposedDecision::new("acme", "inv-1", DecisionKind::VendorInvoice, gross)
            .with_breakdown(gross / 1.19, gross - gross / 1.19)
            .with_entry(BookingLine::debit("4400", gross))
            .with_entry(BookingLine::credit("1600", gross))
            .with_field("vendor_name", "Acme Supplies")
            .with_field("invoice_number", "R-2026-17")
            .with_field("invoice_date", "2026-03-02")
            .with_field("due_date", "2026-04-01")
    }

    fn low_confidence(decision: &ProposedDecision) -> ConfidenceResult {
        ConfidenceScorer::default().score(
            decision,
            &Signals::default()
                .with_text_quality(0.3)
                .with_self_reported(0.9),
        )
    }

    #[test]
    fn test_escalate_creates_item_and_audit() {
        let f = fixture();
        let d = decision(100.0);
        let confidence = low_confidence(&d);

        let item = f.escalator.escalate(&d, &confidence).unwrap();
        assert_eq!(item.status, ReviewStatus::Pending);
        assert_eq!(item.issue_category, IssueCategory::PoorDocumentQuality);
        assert!(item.issue_description.contains("OCR"));
        assert_eq!(item.confidence_score, confidence.total);

        let trail = AuditLog::new(Arc::clone(&f.store))
            .list_for(TARGET, &item.id)
            .unwrap();
        assert_eq!(trail.len(), 1);
        assert_eq!(trail[0].action, "escalated");
        assert_eq!(trail[0].actor_type, crate::state::ActorType::Automation);
    }

    #[test]
    fn test_escalate_twice_keeps_one_open_item() {
        let f = fixture();
        let d = decision(100.0);
        let confidence = low_confidence(&d);

        let first = f.escalator.escalate(&d, &confidence).unwrap();
        let second = f.escalator.escalate(&d, &confidence).unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(f.escalator.list(&ReviewFilter::open()).unwrap().len(), 1);
    }

    #[test]
    fn test_concurrent_escalation_returns_instead_of_waiting() {
        let f = fixture();
        let d = decision(100.0);
        let confidence = low_confidence(&d);
        let held = f
            .store
            .locks()
            .try_acquire(&keys::review_lock("acme", "inv-1"))
            .unwrap()
            .unwrap();

        assert!(matches!(
            f.escalator.escalate(&d, &confidence),
            Err(EscalationError::EscalationInProgress { ref source_ref, .. }) if source_ref == "inv-1"
        ));
        assert!(f.store.open_review_id("acme", "inv-1").unwrap().is_none());

        drop(held);
        let item = f.escalator.escalate(&d, &confidence).unwrap();
        assert_eq!(f.store.open_review_id("acme", "inv-1").unwrap(), Some(item.id));
    }

    #[test]
    fn test_large_amount_priority() {
        let f = fixture();
        let d = decision(12_000.0);
        let item = f.escalator.escalate(&d, &low_confidence(&d)).unwrap();
        assert!(item.priority >= ReviewPriority::Medium);
    }

    #[tokio::test]
    async fn test_approve_commits_proposed_decision() {
        let f = fixture();
        let d = decision(100.0);
        let item = f.escalator.escalate(&d, &low_confidence(&d)).unwrap();

        let outcome = f
            .escalator
            .resolve(&item.id, Resolution::Approve { notes: None }, &Actor::human("alice"))
            .await
            .unwrap();
        assert_eq!(outcome.item.status, ReviewStatus::Approved);
        assert_eq!(outcome.item.resolved_by.as_deref(), Some("alice"));
        assert_eq!(outcome.receipt, Some(CommitReceipt::new("JE-1")));
        assert_eq!(*f.ledger.commits.lock().unwrap(), vec!["inv-1".to_string()]);

        assert!(matches!(
            f.escalator
                .resolve(&item.id, Resolution::Reject { notes: None }, &Actor::human("bob"))
                .await,
            Err(EscalationError::AlreadyResolved { .. })
        ));
    }

    #[tokio::test]
    async fn test_reject_does_not_commit() {
        let f = fixture();
        let d = decision(100.0);
        let item = f.escalator.escalate(&d, &low_confidence(&d)).unwrap();

        let outcome = f
            .escalator
            .resolve(
                &item.id,
                Resolution::Reject {
                    notes: Some("duplicate invoice".into()),
                },
                &Actor::human("alice"),
            )
            .await
            .unwrap();
        assert_eq!(outcome.item.status, ReviewStatus::Rejected);
        assert!(outcome.receipt.is_none());
        assert!(f.ledger.commits.lock().unwrap().is_empty());
        assert_eq!(
            f.store.get_route("acme", "inv-1").unwrap().and_then(|r| match r {
                RouteRecord::Resolved { status, .. } => Some(status),
                _ => None,
            }),
            Some(ReviewStatus::Rejected)
        );
    }

    #[tokio::test]
    async fn test_failed_commit_keeps_item_pending() {
        let f = fixture();
        let d = decision(100.0);
        let item = f.escalator.escalate(&d, &low_confidence(&d)).unwrap();
        *f.ledger.fail.lock().unwrap() = true;

        let err = f
            .escalator
            .resolve(&item.id, Resolution::Approve { notes: None }, &Actor::human("alice"))
            .await
            .unwrap_err();
        assert!(matches!(err, EscalationError::CommitFailed { .. }));

        let stored = f.escalator.get(&item.id).unwrap().unwrap();
        assert_eq!(stored.status, ReviewStatus::Pending);
        let actions: Vec<_> = AuditLog::new(Arc::clone(&f.store))
            .list_for(TARGET, &item.id)
            .unwrap()
            .into_iter()
            .map(|e| e.action)
            .collect();
        assert_eq!(actions, vec!["escalated", "commit_failed"]);
    }

    #[tokio::test]
    async fn test_correct_commits_edited_decision() {
        let f = fixture();
        let d = decision(100.0);
        let item = f.escalator.escalate(&d, &low_confidence(&d)).unwrap();
        let edited = decision(119.0).with_field("vendor_name", "Acme Supplies GmbH");

        let outcome = f
            .escalator
            .resolve(
                &item.id,
                Resolution::Correct {
                    decision: edited.clone(),
                    notes: None,
                },
                &Actor::human("alice"),
            )
            .await
            .unwrap();
        assert_eq!(outcome.item.status, ReviewStatus::Corrected);
        assert_eq!(outcome.item.final_decision, Some(edited));
    }

    #[tokio::test]
    async fn test_automation_failure_needs_correction() {
        let f = fixture();
        let item = f
            .escalator
            .escalate_automation_failure("acme", "inv-9", "unreadable scan")
            .unwrap();
        assert_eq!(item.issue_category, IssueCategory::AutomationFailed);

        assert!(matches!(
            f.escalator
                .resolve(&item.id, Resolution::Approve { notes: None }, &Actor::human("alice"))
                .await,
            Err(EscalationError::NothingToCommit(_))
        ));
    }

    #[tokio::test]
    async fn test_follow_up_supersedes_resolved_item() {
        let f = fixture();
        let d = decision(100.0);
        let item = f.escalator.escalate(&d, &low_confidence(&d)).unwrap();

        assert!(matches!(
            f.escalator.open_follow_up(&item.id, d.clone(), &Actor::human("alice")),
            Err(EscalationError::StillOpen(_))
        ));

        f.escalator
            .resolve(&item.id, Resolution::Reject { notes: None }, &Actor::human("alice"))
            .await
            .unwrap();
        let follow_up = f
            .escalator
            .open_follow_up(&item.id, d, &Actor::human("alice"))
            .unwrap();
        assert_eq!(follow_up.supersedes.as_deref(), Some(item.id.as_str()));
        assert_ne!(follow_up.id, item.id);

        // The original stays resolved
        let original = f.escalator.get(&item.id).unwrap().unwrap();
        assert_eq!(original.status, ReviewStatus::Rejected);
    }

    #[test]
    fn test_list_orders_by_priority() {
        let f = fixture();
        let small = decision(10.0);
        f.escalator.escalate(&small, &low_confidence(&small)).unwrap();
        let mut big = decision(80_000.0);
        big.source_ref = "inv-2".into();
        f.escalator.escalate(&big, &low_confidence(&big)).unwrap();

        let items = f.escalator.list(&ReviewFilter::default()).unwrap();
        assert_eq!(items[0].priority, ReviewPriority::Urgent);
        assert_eq!(items[0].source_ref, "inv-2");

        let urgent_only = f
            .escalator
            .list(&ReviewFilter {
                min_priority: Some(ReviewPriority::Urgent),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(urgent_only.len(), 1);
    }
}
