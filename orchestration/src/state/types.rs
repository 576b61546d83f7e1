//! Core types for orchestration state persistence
//!
//! These types are stored in the state store and represent the durable
//! state of the back-office automation pipeline: tasks, human review items,
//! audit entries and per-document route records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::confidence::{ConfidenceResult, Factor};
use crate::decision::{ProposedDecision, SourceRef, TenantId};

/// Unique identifier for tasks
pub type TaskId = String;

/// Unique identifier for review items
pub type ReviewItemId = String;

/// Unique identifier for audit entries
pub type AuditId = String;

/// Which automation handles a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentKind {
    /// Books vendor and customer invoices
    InvoiceBooking,
    /// Matches bank transactions against open items
    BankReconciliation,
}

impl std::fmt::Display for AgentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AgentKind::InvoiceBooking => write!(f, "invoice_booking"),
            AgentKind::BankReconciliation => write!(f, "bank_reconciliation"),
        }
    }
}

impl std::str::FromStr for AgentKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "invoice_booking" => Ok(AgentKind::InvoiceBooking),
            "bank_reconciliation" => Ok(AgentKind::BankReconciliation),
            other => Err(format!("unknown agent kind: {}", other)),
        }
    }
}

/// What a task asks its automation to do
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    /// Extract an invoice and propose its booking
    AnalyzeInvoice,
    /// Propose a match for a bank transaction
    MatchBankTransaction,
}

impl std::fmt::Display for TaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskKind::AnalyzeInvoice => write!(f, "analyze_invoice"),
            TaskKind::MatchBankTransaction => write!(f, "match_bank_transaction"),
        }
    }
}

impl std::str::FromStr for TaskKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "analyze_invoice" => Ok(TaskKind::AnalyzeInvoice),
            "match_bank_transaction" => Ok(TaskKind::MatchBankTransaction),
            other => Err(format!("unknown task kind: {}", other)),
        }
    }
}

/// Status of a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Waiting to be claimed
    Pending,
    /// Claimed by exactly one worker
    InProgress,
    /// Finished successfully
    Completed,
    /// Failed permanently or out of retries
    Failed,
}

impl TaskStatus {
    /// Can transition from self to `to`?
    pub fn can_transition_to(self, to: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self, to),
            (Pending, InProgress)
                | (InProgress, Completed)
                | (InProgress, Pending) // retry
                | (InProgress, Failed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskStatus::Pending => write!(f, "pending"),
            TaskStatus::InProgress => write!(f, "in_progress"),
            TaskStatus::Completed => write!(f, "completed"),
            TaskStatus::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TaskStatus::Pending),
            "in_progress" => Ok(TaskStatus::InProgress),
            "completed" => Ok(TaskStatus::Completed),
            "failed" => Ok(TaskStatus::Failed),
            _ => Err(format!("Unknown task status: {}", s)),
        }
    }
}

/// A durable, claimable unit of automation work
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub tenant_id: TenantId,
    pub agent: AgentKind,
    pub kind: TaskKind,
    /// Opaque input for the automation
    pub payload: serde_json::Value,
    /// Higher = sooner
    pub priority: i32,
    pub status: TaskStatus,
    pub retry_count: u32,
    pub max_retries: u32,
    /// Store-assigned creation order, breaks priority ties
    pub sequence: u64,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Earliest time a retried task may be claimed again (None = immediately)
    pub available_at: Option<DateTime<Utc>>,
    /// Token of the current claim; a stale holder cannot finish the task
    pub claim_token: Option<String>,
    /// Structural deduplication key
    pub dedup_key: Option<String>,
    pub error_message: Option<String>,
    pub result: Option<serde_json::Value>,
}

impl Task {
    /// Source document this task concerns, if the payload names one
    pub fn source_ref(&self) -> Option<&str> {
        self.payload.get("source_ref").and_then(|v| v.as_str())
    }

    /// Whether the task may be claimed at `now`
    pub fn is_claimable(&self, now: DateTime<Utc>) -> bool {
        self.status == TaskStatus::Pending && self.available_at.map_or(true, |at| at <= now)
    }
}

/// Request to create a task
#[derive(Debug, Clone, PartialEq)]
pub struct NewTask {
    pub tenant_id: TenantId,
    pub agent: AgentKind,
    pub kind: TaskKind,
    pub payload: serde_json::Value,
    pub priority: i32,
    pub max_retries: Option<u32>,
    pub dedup_key: Option<String>,
}

impl NewTask {
    pub fn new(
        tenant_id: impl Into<TenantId>,
        agent: AgentKind,
        kind: TaskKind,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            agent,
            kind,
            payload,
            priority: 0,
            max_retries: None,
            dedup_key: None,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    pub fn with_dedup_key(mut self, key: impl Into<String>) -> Self {
        self.dedup_key = Some(key.into());
        self
    }
}

/// Priority of a human review item
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewPriority {
    Low,
    Medium,
    High,
    Urgent,
}

impl std::fmt::Display for ReviewPriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReviewPriority::Low => write!(f, "low"),
            ReviewPriority::Medium => write!(f, "medium"),
            ReviewPriority::High => write!(f, "high"),
            ReviewPriority::Urgent => write!(f, "urgent"),
        }
    }
}

impl std::str::FromStr for ReviewPriority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(ReviewPriority::Low),
            "medium" => Ok(ReviewPriority::Medium),
            "high" => Ok(ReviewPriority::High),
            "urgent" => Ok(ReviewPriority::Urgent),
            other => Err(format!("unknown priority: {}", other)),
        }
    }
}

/// Status of a human review item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewStatus {
    Pending,
    Approved,
    Rejected,
    Corrected,
}

impl ReviewStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, ReviewStatus::Pending)
    }
}

impl std::fmt::Display for ReviewStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReviewStatus::Pending => write!(f, "pending"),
            ReviewStatus::Approved => write!(f, "approved"),
            ReviewStatus::Rejected => write!(f, "rejected"),
            ReviewStatus::Corrected => write!(f, "corrected"),
        }
    }
}

impl std::str::FromStr for ReviewStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ReviewStatus::Pending),
            "approved" => Ok(ReviewStatus::Approved),
            "rejected" => Ok(ReviewStatus::Rejected),
            "corrected" => Ok(ReviewStatus::Corrected),
            other => Err(format!("unknown review status: {}", other)),
        }
    }
}

/// Why a decision landed in the review queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueCategory {
    /// Source document text could not be read reliably
    PoorDocumentQuality,
    /// The automation was unsure of its own proposal
    UncertainProposal,
    /// Required fields are missing
    MissingData,
    /// Amounts do not add up
    AmountMismatch,
    /// Commit failed despite high confidence
    CommitFailed,
    /// The automation itself failed for good
    AutomationFailed,
}

impl IssueCategory {
    /// Category for a decision whose weakest factor is `factor`
    pub fn from_factor(factor: Factor) -> Self {
        match factor {
            Factor::TextQuality => IssueCategory::PoorDocumentQuality,
            Factor::SelfReport => IssueCategory::UncertainProposal,
            Factor::Completeness => IssueCategory::MissingData,
            Factor::Arithmetic => IssueCategory::AmountMismatch,
        }
    }
}

impl std::fmt::Display for IssueCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IssueCategory::PoorDocumentQuality => write!(f, "poor_document_quality"),
            IssueCategory::UncertainProposal => write!(f, "uncertain_proposal"),
            IssueCategory::MissingData => write!(f, "missing_data"),
            IssueCategory::AmountMismatch => write!(f, "amount_mismatch"),
            IssueCategory::CommitFailed => write!(f, "commit_failed"),
            IssueCategory::AutomationFailed => write!(f, "automation_failed"),
        }
    }
}

/// A human work item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewItem {
    pub id: ReviewItemId,
    pub tenant_id: TenantId,
    /// What is being reviewed
    pub source_ref: SourceRef,
    pub priority: ReviewPriority,
    pub status: ReviewStatus,
    pub issue_category: IssueCategory,
    /// Factor-attributed description shown to the reviewer
    pub issue_description: String,
    /// Decision as proposed by the automation (None if the automation failed)
    pub proposed_decision: Option<ProposedDecision>,
    /// Total confidence, 0.0 when nothing could be scored
    pub confidence_score: f64,
    /// Full scoring breakdown when available
    pub confidence: Option<ConfidenceResult>,
    /// The automation's reasoning text
    pub reasoning: String,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolved_by: Option<String>,
    pub resolution_notes: Option<String>,
    /// Human-corrected decision, for corrected items
    pub final_decision: Option<ProposedDecision>,
    /// Ledger reference once committed
    pub posted_reference: Option<String>,
    /// Earlier resolved item this one follows up on
    pub supersedes: Option<ReviewItemId>,
}

impl ReviewItem {
    pub fn is_open(&self) -> bool {
        self.status == ReviewStatus::Pending
    }
}

/// Who performed an audited action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActorType {
    Automation,
    Human,
    System,
}

impl std::fmt::Display for ActorType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActorType::Automation => write!(f, "automation"),
            ActorType::Human => write!(f, "human"),
            ActorType::System => write!(f, "system"),
        }
    }
}

/// Actor identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub kind: ActorType,
    pub id: String,
}

impl Actor {
    pub fn automation(id: impl Into<String>) -> Self {
        Self {
            kind: ActorType::Automation,
            id: id.into(),
        }
    }

    pub fn human(id: impl Into<String>) -> Self {
        Self {
            kind: ActorType::Human,
            id: id.into(),
        }
    }

    pub fn system() -> Self {
        Self {
            kind: ActorType::System,
            id: "orchestrator".to_string(),
        }
    }
}

impl std::fmt::Display for Actor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.kind, self.id)
    }
}

/// Write-once record of who did what and why
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: AuditId,
    pub tenant_id: TenantId,
    /// "task", "review_item", "event", "booking"
    pub target_type: String,
    pub target_id: String,
    pub action: String,
    pub actor_type: ActorType,
    pub actor_id: String,
    pub before: Option<serde_json::Value>,
    pub after: Option<serde_json::Value>,
    /// Store-assigned order
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
}

impl AuditEntry {
    /// Create an entry; the id, sequence and timestamp are assigned by the audit log
    pub fn new(
        tenant_id: impl Into<TenantId>,
        target_type: &str,
        target_id: impl Into<String>,
        action: &str,
        actor: &Actor,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            tenant_id: tenant_id.into(),
            target_type: target_type.to_string(),
            target_id: target_id.into(),
            action: action.to_string(),
            actor_type: actor.kind,
            actor_id: actor.id.clone(),
            before: None,
            after: None,
            sequence: 0,
            timestamp: Utc::now(),
        }
    }

    pub fn with_before(mut self, before: serde_json::Value) -> Self {
        self.before = Some(before);
        self
    }

    pub fn with_after(mut self, after: serde_json::Value) -> Self {
        self.after = Some(after);
        self
    }
}

/// Terminal routing outcome for one source document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RouteRecord {
    /// Committed autonomously
    Committed {
        posted_reference: String,
        confidence: f64,
        at: DateTime<Utc>,
    },
    /// Handed to a human
    Escalated {
        review_item_id: ReviewItemId,
        at: DateTime<Utc>,
    },
    /// A human resolved the review item
    Resolved {
        review_item_id: ReviewItemId,
        status: ReviewStatus,
        posted_reference: Option<String>,
        at: DateTime<Utc>,
    },
}

impl RouteRecord {
    pub fn review_item_id(&self) -> Option<&str> {
        match self {
            RouteRecord::Committed { .. } => None,
            RouteRecord::Escalated { review_item_id, .. }
            | RouteRecord::Resolved { review_item_id, .. } => Some(review_item_id),
        }
    }
}
