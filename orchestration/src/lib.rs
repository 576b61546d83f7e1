//! Back-office orchestration core
//!
//! This library coordinates the automations of an accounting back office:
//! - A durable task queue that many workers claim from concurrently without
//!   ever sharing a task
//! - A durable event log consumed by polling, with at-least-once delivery
//! - A confidence scorer that weighs each proposed booking
//! - An orchestrator that commits trusted decisions and escalates the rest
//! - A review escalator that owns the human review queue and its audit trail
//!
//! # Data flow
//!
//! ```text
//! invoice_received ─► Orchestrator ─► Task ─► Worker ─► AutomationService
//!                                                           │
//!                          invoice_analyzed ◄───────────────┘
//!                                 │
//!                       ConfidenceScorer
//!                    ≥ threshold │ < threshold
//!              LedgerCommitter ◄─┴─► ReviewEscalator ─► human ─► resolve
//! ```
//!
//! # Usage
//!
//! ```ignore
//! let store = StateStore::in_memory().shared();
//! let events = EventLog::new(store.clone()).shared();
//! let queue = TaskQueue::new(store.clone()).shared();
//! let escalator = ReviewEscalator::new(store.clone(), events.clone(), ledger.clone()).shared();
//! let orchestrator = Orchestrator::new(store, queue, events, escalator, ledger, &config)?;
//! orchestrator.run(cancel).await;
//! ```

#![allow(clippy::uninlined_format_args)]

pub mod audit;
pub mod automation;
pub mod confidence;
pub mod config;
pub mod decision;
pub mod escalation;
pub mod events;
pub mod ledger;
pub mod orchestrator;
pub mod queue;
pub mod state;
pub mod worker;

pub use audit::{AuditLog, SharedAuditLog};
pub use automation::{AutomationError, AutomationService, SharedAutomation};
pub use confidence::{
    ConfidenceError, ConfidenceResult, ConfidenceScorer, Factor, FactorScore, FactorWeights,
    Recommendation, ScorerConfig,
};
pub use config::{
    ConfigError, EventSettings, OrchestrationConfig, PolicyConfig, QueueSettings,
    RetentionSettings, WorkerSettings,
};
pub use decision::{
    AutomationOutput, BookingLine, DecisionKind, EntrySide, ProposedDecision, Signals, SourceRef,
    TenantId,
};
pub use escalation::{
    EscalationError, PriorityRules, ResolveOutcome, Resolution, ReviewEscalator, ReviewFilter,
    SharedEscalator,
};
pub use events::{Event, EventLog, EventLogError, EventType, SharedEventLog};
pub use ledger::{CommitError, CommitReceipt, LedgerCommitter, SharedLedger};
pub use orchestrator::{
    HandleOutcome, Orchestrator, OrchestratorError, PruneStats, PumpStats, Route, RouteOutcome,
    RoutingTable, SharedOrchestrator,
};
pub use queue::{Enqueued, QueueConfig, QueueError, QueueStats, SharedTaskQueue, TaskFilter, TaskQueue};
pub use state::{
    Actor, ActorType, AgentKind, AuditEntry, IssueCategory, NewTask, ReviewItem, ReviewPriority,
    ReviewStatus, RouteRecord, SharedStateStore, StateStore, StoreError, Task, TaskKind,
    TaskStatus,
};
pub use worker::{WorkOutcome, Worker, WorkerConfig, WorkerError};
