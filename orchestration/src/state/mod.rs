//! State persistence for the orchestration core
//!
//! This module provides the durable substrate shared by every worker:
//! - Tasks, claimed with row-level skip locks
//! - The append-only event log and its unprocessed index
//! - Human review items and the one-open-item-per-document index
//! - Write-once audit entries
//! - Route records, the terminal outcome per source document
//!
//! # Architecture
//!
//! The store keeps each data type in its own column family over a
//! [`KvBackend`]. The in-memory backend serves tests and single-process
//! deployments; the RocksDB backend (`heavy-state` feature) persists to disk.
//!
//! ```ignore
//! use orchestration::state::StateStore;
//!
//! let store = StateStore::in_memory().shared();
//! let seq = store.next_sequence()?;
//! ```

pub mod backend;
pub mod locks;
pub mod schema;
pub mod store;
pub mod types;

#[cfg(feature = "heavy-state")]
pub use backend::RocksBackend;
pub use backend::{BatchOp, KvBackend, MemoryBackend};
pub use locks::{KeyGuard, KeyLocks};
pub use store::{SharedStateStore, StateStore, StoreError, StoreResult};
pub use types::{
    Actor, ActorType, AgentKind, AuditEntry, AuditId, IssueCategory, NewTask, ReviewItem,
    ReviewItemId, ReviewPriority, ReviewStatus, RouteRecord, Task, TaskId, TaskKind, TaskStatus,
};
