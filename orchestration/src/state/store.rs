//! State store for orchestration entities
//!
//! Provides typed access to tasks, events, review items, audit entries and
//! route records on top of a [`KvBackend`]. Values are stored as JSON so the
//! opaque task payloads and decision fields survive untouched.

use std::sync::{Arc, Mutex};

use serde::{de::DeserializeOwned, Serialize};

use super::backend::{BatchOp, KvBackend, MemoryBackend};
use super::locks::KeyLocks;
use super::schema::{self, keys};
use super::types::*;
use crate::events::Event;

/// Error type for state store operations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[cfg(feature = "heavy-state")]
    #[error("RocksDB error: {0}")]
    RocksDb(#[from] rocksdb::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Lock poisoned")]
    LockPoisoned,

    #[error("Column family not found: {0}")]
    ColumnFamilyNotFound(String),
}

/// Result type for state store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Shared reference to StateStore
pub type SharedStateStore = Arc<StateStore>;

/// Typed state store
pub struct StateStore {
    backend: Box<dyn KvBackend>,
    locks: KeyLocks,
    sequence: Mutex<u64>,
}

impl StateStore {
    /// Create a store over an arbitrary backend
    pub fn with_backend(backend: Box<dyn KvBackend>) -> StoreResult<Self> {
        let sequence = match backend.get(schema::CF_META, keys::SEQUENCE)? {
            Some(bytes) => decode::<u64>(&bytes)?,
            None => 0,
        };
        Ok(Self {
            backend,
            locks: KeyLocks::new(),
            sequence: Mutex::new(sequence),
        })
    }

    /// Create an in-memory store
    pub fn in_memory() -> Self {
        Self {
            backend: Box::new(MemoryBackend::new()),
            locks: KeyLocks::new(),
            sequence: Mutex::new(0),
        }
    }

    /// Open or create a RocksDB-backed store at the given path
    #[cfg(feature = "heavy-state")]
    pub fn open(path: impl AsRef<std::path::Path>) -> StoreResult<Self> {
        let backend = super::backend::RocksBackend::open(path)?;
        Self::with_backend(Box::new(backend))
    }

    /// Create a shared reference to this store
    pub fn shared(self) -> SharedStateStore {
        Arc::new(self)
    }

    /// Row locks shared by everything using this store
    pub fn locks(&self) -> &KeyLocks {
        &self.locks
    }

    /// Allocate the next store-wide sequence number (starts at 1)
    pub fn next_sequence(&self) -> StoreResult<u64> {
        let mut seq = self.sequence.lock().map_err(|_| StoreError::LockPoisoned)?;
        let next = *seq + 1;
        self.backend.write(vec![BatchOp::Put {
            cf: schema::CF_META,
            key: keys::SEQUENCE.to_string(),
            value: encode(&next)?,
        }])?;
        *seq = next;
        Ok(next)
    }

    // =========================================================================
    // Generic operations
    // =========================================================================

    fn get<T: DeserializeOwned>(&self, cf: &str, key: &str) -> StoreResult<Option<T>> {
        match self.backend.get(cf, key)? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    fn put<T: Serialize>(&self, cf: &'static str, key: String, value: &T) -> StoreResult<()> {
        self.backend.write(vec![put_op(cf, key, value)?])
    }

    fn scan<T: DeserializeOwned>(
        &self,
        cf: &str,
        prefix: &str,
        limit: Option<usize>,
    ) -> StoreResult<Vec<T>> {
        self.backend
            .scan_prefix(cf, prefix, limit)?
            .iter()
            .map(|(_, bytes)| decode(bytes))
            .collect()
    }

    // =========================================================================
    // Task operations
    // =========================================================================

    /// Store a task and move it between the status indexes
    ///
    /// Index keys derive from fields that never change after creation
    /// (agent, priority, sequence, completion time), so the stale entries
    /// can be dropped without reading the previous row.
    pub fn put_task(&self, task: &Task) -> StoreResult<()> {
        let id = encode(&task.id)?;
        let pending = keys::pending_task(
            &task.agent.to_string(),
            task.priority,
            task.sequence,
            &task.id,
        );
        let active = keys::active_task(&task.id);

        let mut batch = vec![put_op(schema::CF_TASKS, keys::task(&task.id), task)?];
        batch.push(match task.status {
            TaskStatus::Pending => BatchOp::Put {
                cf: schema::CF_PENDING_TASKS,
                key: pending,
                value: id.clone(),
            },
            _ => BatchOp::Delete {
                cf: schema::CF_PENDING_TASKS,
                key: pending,
            },
        });
        batch.push(match task.status {
            TaskStatus::InProgress => BatchOp::Put {
                cf: schema::CF_ACTIVE_TASKS,
                key: active,
                value: id.clone(),
            },
            _ => BatchOp::Delete {
                cf: schema::CF_ACTIVE_TASKS,
                key: active,
            },
        });
        if let Some(at) = task.completed_at.filter(|_| task.status.is_terminal()) {
            batch.push(BatchOp::Put {
                cf: schema::CF_FINISHED_TASKS,
                key: keys::finished_task(at.timestamp_millis(), &task.id),
                value: id,
            });
        }
        self.backend.write(batch)
    }

    /// Get a task by ID
    pub fn get_task(&self, task_id: &str) -> StoreResult<Option<Task>> {
        self.get(schema::CF_TASKS, &keys::task(task_id))
    }

    /// List all tasks
    pub fn list_tasks(&self) -> StoreResult<Vec<Task>> {
        self.scan(schema::CF_TASKS, "task:", None)
    }

    /// Pending task IDs for `agent`, highest priority then oldest first
    pub fn pending_task_ids(&self, agent: AgentKind) -> StoreResult<Vec<TaskId>> {
        self.scan(
            schema::CF_PENDING_TASKS,
            &keys::pending_task_prefix(&agent.to_string()),
            None,
        )
    }

    /// IDs of tasks currently claimed by a worker
    pub fn active_task_ids(&self) -> StoreResult<Vec<TaskId>> {
        self.scan(schema::CF_ACTIVE_TASKS, "active:", None)
    }

    /// Completed and failed task IDs, earliest completion first
    pub fn finished_task_ids(&self, limit: usize) -> StoreResult<Vec<TaskId>> {
        self.scan(schema::CF_FINISHED_TASKS, "done:", Some(limit))
    }

    /// Delete finished tasks with their index and dedup entries
    pub fn delete_tasks(&self, tasks: &[Task]) -> StoreResult<()> {
        let mut batch = Vec::with_capacity(tasks.len() * 3);
        for task in tasks {
            batch.push(BatchOp::Delete {
                cf: schema::CF_TASKS,
                key: keys::task(&task.id),
            });
            if let Some(at) = task.completed_at {
                batch.push(BatchOp::Delete {
                    cf: schema::CF_FINISHED_TASKS,
                    key: keys::finished_task(at.timestamp_millis(), &task.id),
                });
            }
            if let Some(dedup_key) = &task.dedup_key {
                if self.get_task_dedup(dedup_key)?.as_deref() == Some(task.id.as_str()) {
                    batch.push(BatchOp::Delete {
                        cf: schema::CF_TASK_DEDUP,
                        key: keys::task_dedup(dedup_key),
                    });
                }
            }
        }
        self.backend.write(batch)
    }

    /// Reserve a dedup key for a task; false if the key is taken
    pub fn reserve_task_dedup(&self, dedup_key: &str, task_id: &str) -> StoreResult<bool> {
        self.backend.put_if_absent(
            schema::CF_TASK_DEDUP,
            &keys::task_dedup(dedup_key),
            encode(&task_id)?,
        )
    }

    /// Task ID registered for a dedup key
    pub fn get_task_dedup(&self, dedup_key: &str) -> StoreResult<Option<TaskId>> {
        self.get(schema::CF_TASK_DEDUP, &keys::task_dedup(dedup_key))
    }

    // =========================================================================
    // Event operations
    // =========================================================================

    /// Append an event and index it as unprocessed
    pub fn insert_event(&self, event: &Event) -> StoreResult<()> {
        let mut batch = vec![put_op(schema::CF_EVENTS, keys::event(&event.id), event)?];
        if !event.processed {
            batch.push(put_op(
                schema::CF_PENDING_EVENTS,
                keys::pending_event(event.sequence, &event.id),
                &event.id,
            )?);
        }
        self.backend.write(batch)
    }

    /// Get an event by ID
    pub fn get_event(&self, event_id: &str) -> StoreResult<Option<Event>> {
        self.get(schema::CF_EVENTS, &keys::event(event_id))
    }

    /// Unprocessed event IDs in creation order
    pub fn pending_event_ids(&self, limit: usize) -> StoreResult<Vec<String>> {
        self.scan(schema::CF_PENDING_EVENTS, "pending:", Some(limit))
    }

    /// Persist a processed event and drop it from the pending index
    pub fn store_processed_event(&self, event: &Event) -> StoreResult<()> {
        self.backend.write(vec![
            put_op(schema::CF_EVENTS, keys::event(&event.id), event)?,
            BatchOp::Delete {
                cf: schema::CF_PENDING_EVENTS,
                key: keys::pending_event(event.sequence, &event.id),
            },
        ])
    }

    /// List all events
    pub fn list_events(&self) -> StoreResult<Vec<Event>> {
        self.scan(schema::CF_EVENTS, "evt:", None)
    }

    /// Delete events by ID
    pub fn delete_events(&self, events: &[Event]) -> StoreResult<()> {
        let batch = events
            .iter()
            .flat_map(|e| {
                [
                    BatchOp::Delete {
                        cf: schema::CF_EVENTS,
                        key: keys::event(&e.id),
                    },
                    BatchOp::Delete {
                        cf: schema::CF_PENDING_EVENTS,
                        key: keys::pending_event(e.sequence, &e.id),
                    },
                ]
            })
            .collect();
        self.backend.write(batch)
    }

    // =========================================================================
    // Review operations
    // =========================================================================

    /// Get a review item by ID
    pub fn get_review_item(&self, item_id: &str) -> StoreResult<Option<ReviewItem>> {
        self.get(schema::CF_REVIEW_ITEMS, &keys::review_item(item_id))
    }

    /// List all review items
    pub fn list_review_items(&self) -> StoreResult<Vec<ReviewItem>> {
        self.scan(schema::CF_REVIEW_ITEMS, "review:", None)
    }

    /// ID of the open review item for a source document
    pub fn open_review_id(&self, tenant_id: &str, source_ref: &str) -> StoreResult<Option<String>> {
        self.get(
            schema::CF_REVIEW_OPEN,
            &keys::review_open(tenant_id, source_ref),
        )
    }

    /// Store a review item, keeping the open index in step with its status
    pub fn put_review_item(&self, item: &ReviewItem) -> StoreResult<()> {
        let open_key = keys::review_open(&item.tenant_id, &item.source_ref);
        let index_op = if item.is_open() {
            put_op(schema::CF_REVIEW_OPEN, open_key, &item.id)?
        } else {
            BatchOp::Delete {
                cf: schema::CF_REVIEW_OPEN,
                key: open_key,
            }
        };
        self.backend.write(vec![
            put_op(schema::CF_REVIEW_ITEMS, keys::review_item(&item.id), item)?,
            index_op,
        ])
    }

    // =========================================================================
    // Audit operations
    // =========================================================================

    /// Append an audit entry; false if an entry with the same key exists
    pub fn insert_audit(&self, entry: &AuditEntry) -> StoreResult<bool> {
        let key = keys::audit(
            &entry.target_type,
            &entry.target_id,
            entry.sequence,
            &entry.id,
        );
        self.backend
            .put_if_absent(schema::CF_AUDIT, &key, encode(entry)?)
    }

    /// Audit entries for one target, oldest first
    pub fn audit_for(&self, target_type: &str, target_id: &str) -> StoreResult<Vec<AuditEntry>> {
        self.scan(
            schema::CF_AUDIT,
            &keys::audit_prefix(target_type, target_id),
            None,
        )
    }

    /// All audit entries
    pub fn list_audit(&self) -> StoreResult<Vec<AuditEntry>> {
        let mut entries: Vec<AuditEntry> = self.scan(schema::CF_AUDIT, "audit:", None)?;
        entries.sort_by_key(|e| e.sequence);
        Ok(entries)
    }

    // =========================================================================
    // Route operations
    // =========================================================================

    /// Route record for a source document
    pub fn get_route(&self, tenant_id: &str, source_ref: &str) -> StoreResult<Option<RouteRecord>> {
        self.get(schema::CF_ROUTES, &keys::route(tenant_id, source_ref))
    }

    /// Store the route record for a source document
    pub fn put_route(
        &self,
        tenant_id: &str,
        source_ref: &str,
        record: &RouteRecord,
    ) -> StoreResult<()> {
        self.put(schema::CF_ROUTES, keys::route(tenant_id, source_ref), record)
    }
}

fn encode<T: Serialize + ?Sized>(value: &T) -> StoreResult<Vec<u8>> {
    serde_json::to_vec(value).map_err(|e| StoreError::Serialization(e.to_string()))
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> StoreResult<T> {
    serde_json::from_slice(bytes).map_err(|e| StoreError::Deserialization(e.to_string()))
}

fn put_op<T: Serialize + ?Sized>(cf: &'static str, key: String, value: &T) -> StoreResult<BatchOp> {
    Ok(BatchOp::Put {
        cf,
        key,
        value: encode(value)?,
    })
}
