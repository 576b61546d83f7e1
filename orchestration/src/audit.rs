//! Write-once audit trail
//!
//! Every state change that matters to an accountant (a task failing for good,
//! an escalation, a human resolution, a failed commit) leaves an entry naming
//! the actor and the before/after state.

use std::sync::Arc;

use chrono::Utc;
use tracing::debug;

use crate::state::{AuditEntry, SharedStateStore, StoreResult};

/// Shared reference to AuditLog
pub type SharedAuditLog = Arc<AuditLog>;

/// Append-only audit log
pub struct AuditLog {
    store: SharedStateStore,
}

impl AuditLog {
    pub fn new(store: SharedStateStore) -> Self {
        Self { store }
    }

    pub fn shared(self) -> SharedAuditLog {
        Arc::new(self)
    }

    /// Append an entry, stamping its sequence and timestamp
    pub fn record(&self, mut entry: AuditEntry) -> StoreResult<AuditEntry> {
        entry.sequence = self.store.next_sequence()?;
        entry.timestamp = Utc::now();
        // Fresh uuid + fresh sequence: a collision means a duplicate id
        while !self.store.insert_audit(&entry)? {
            entry.id = uuid::Uuid::new_v4().to_string();
        }
        debug!(
            target_type = %entry.target_type,
            target_id = %entry.target_id,
            action = %entry.action,
            actor = %entry.actor_id,
            "Audit entry recorded"
        );
        Ok(entry)
    }

    /// Entries for one target, oldest first
    pub fn list_for(&self, target_type: &str, target_id: &str) -> StoreResult<Vec<AuditEntry>> {
        self.store.audit_for(target_type, target_id)
    }

    /// Every entry, oldest first
    pub fn list(&self) -> StoreResult<Vec<AuditEntry>> {
        self.store.list_audit()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{Actor, ActorType, StateStore};

    #[test]
    fn test_entries_are_ordered_per_target() {
        let audit = AuditLog::new(StateStore::in_memory().shared());
        audit
            .record(AuditEntry::new("acme", "review_item", "r-1", "escalated", &Actor::automation("invoice_booking")))
            .unwrap();
        audit
            .record(AuditEntry::new("acme", "review_item", "r-2", "escalated", &Actor::system()))
            .unwrap();
        audit
            .record(
                AuditEntry::new("acme", "review_item", "r-1", "approved", &Actor::human("alice"))
                    .with_after(serde_json::json!({"status": "approved"})),
            )
            .unwrap();

        let trail = audit.list_for("review_item", "r-1").unwrap();
        let actions: Vec<_> = trail.iter().map(|e| e.action.as_str()).collect();
        assert_eq!(actions, vec!["escalated", "approved"]);
        assert_eq!(trail[1].actor_type, ActorType::Human);
        assert!(trail[0].sequence < trail[1].sequence);
        assert_eq!(audit.list().unwrap().len(), 3);
    }
}
