//! Column family definitions for the state store
//!
//! Each column family provides logical separation of data types
//! while sharing the same backend instance.

/// Column family for tasks
pub const CF_TASKS: &str = "tasks";

/// Column family indexing pending tasks by agent, priority and age
pub const CF_PENDING_TASKS: &str = "pending_tasks";

/// Column family indexing claimed (in-progress) tasks
pub const CF_ACTIVE_TASKS: &str = "active_tasks";

/// Column family indexing completed and failed tasks by completion time
pub const CF_FINISHED_TASKS: &str = "finished_tasks";

/// Column family mapping task dedup keys to task ids
pub const CF_TASK_DEDUP: &str = "task_dedup";

/// Column family for domain events
pub const CF_EVENTS: &str = "events";

/// Column family indexing unprocessed events in creation order
pub const CF_PENDING_EVENTS: &str = "pending_events";

/// Column family for review items
pub const CF_REVIEW_ITEMS: &str = "review_items";

/// Column family mapping (tenant, source) to its open review item
pub const CF_REVIEW_OPEN: &str = "review_open";

/// Column family for audit entries
pub const CF_AUDIT: &str = "audit";

/// Column family for route records
pub const CF_ROUTES: &str = "routes";

/// Column family for store metadata (sequence counter)
pub const CF_META: &str = "meta";

/// All column family names
pub const ALL_CFS: &[&str] = &[
    CF_TASKS,
    CF_PENDING_TASKS,
    CF_ACTIVE_TASKS,
    CF_FINISHED_TASKS,
    CF_TASK_DEDUP,
    CF_EVENTS,
    CF_PENDING_EVENTS,
    CF_REVIEW_ITEMS,
    CF_REVIEW_OPEN,
    CF_AUDIT,
    CF_ROUTES,
    CF_META,
];

/// Key prefixes for compound keys
pub mod keys {
    /// Key of the persisted sequence counter
    pub const SEQUENCE: &str = "seq";

    /// Create a task key
    pub fn task(task_id: &str) -> String {
        format!("task:{}", task_id)
    }

    /// Prefix of the pending-task index for one agent
    pub fn pending_task_prefix(agent: &str) -> String {
        format!("ready:{}:", agent)
    }

    /// Create a pending-task index key
    ///
    /// Priority is inverted so a forward scan yields the highest priority
    /// first, then the lowest sequence.
    pub fn pending_task(agent: &str, priority: i32, sequence: u64, task_id: &str) -> String {
        let inverted = i64::from(i32::MAX) - i64::from(priority);
        format!(
            "{}{:010}:{:020}:{}",
            pending_task_prefix(agent),
            inverted,
            sequence,
            task_id
        )
    }

    /// Create an active-task index key
    pub fn active_task(task_id: &str) -> String {
        format!("active:{}", task_id)
    }

    /// Create a finished-task index key (completion time for ordering)
    pub fn finished_task(completed_at_ms: i64, task_id: &str) -> String {
        format!("done:{:020}:{}", completed_at_ms.max(0), task_id)
    }

    /// Create a task dedup key
    pub fn task_dedup(dedup_key: &str) -> String {
        format!("dedup:{}", dedup_key)
    }

    /// Create an event key
    pub fn event(event_id: &str) -> String {
        format!("evt:{}", event_id)
    }

    /// Create a pending-event index key (sequence-based for ordering)
    pub fn pending_event(sequence: u64, event_id: &str) -> String {
        format!("pending:{:020}:{}", sequence, event_id)
    }

    /// Create a review item key
    pub fn review_item(item_id: &str) -> String {
        format!("review:{}", item_id)
    }

    /// Create an open-review index key
    pub fn review_open(tenant_id: &str, source_ref: &str) -> String {
        format!("open:{}:{}", tenant_id, source_ref)
    }

    /// Prefix of all audit entries for one target
    pub fn audit_prefix(target_type: &str, target_id: &str) -> String {
        format!("audit:{}:{}:", target_type, target_id)
    }

    /// Create an audit key (sequence-based for ordering within a target)
    pub fn audit(target_type: &str, target_id: &str, sequence: u64, audit_id: &str) -> String {
        format!(
            "{}{:020}:{}",
            audit_prefix(target_type, target_id),
            sequence,
            audit_id
        )
    }

    /// Create a route record key
    pub fn route(tenant_id: &str, source_ref: &str) -> String {
        format!("route:{}:{}", tenant_id, source_ref)
    }

    /// Lock key guarding routing of one source document
    pub fn route_lock(tenant_id: &str, source_ref: &str) -> String {
        format!("lock:route:{}:{}", tenant_id, source_ref)
    }

    /// Lock key guarding creation of review items for one source document
    pub fn review_lock(tenant_id: &str, source_ref: &str) -> String {
        format!("lock:review:{}:{}", tenant_id, source_ref)
    }

    /// Lock key held while a review item is being resolved
    pub fn resolve_lock(item_id: &str) -> String {
        format!("lock:resolve:{}", item_id)
    }
}
