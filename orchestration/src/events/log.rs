//! Durable event log
//!
//! Events are appended to the state store and consumed by polling, so an
//! event published while no consumer runs is still delivered later. A tokio
//! broadcast channel carries the id of each published event so pollers in the
//! same process can wake up early; it is a hint, never the source of truth.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tracing::{debug, info};

use super::types::{Event, EventId, EventType};
use crate::state::{SharedStateStore, StoreError};

/// Channel capacity for wake-up notifications
const CHANNEL_CAPACITY: usize = 256;

/// Error type for event log operations
#[derive(Debug, thiserror::Error)]
pub enum EventLogError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Event not found: {0}")]
    NotFound(EventId),
}

/// Result type for event log operations
pub type EventLogResult<T> = Result<T, EventLogError>;

/// Shared reference to EventLog
pub type SharedEventLog = Arc<EventLog>;

/// Append-only, poll-consumed event log
pub struct EventLog {
    store: SharedStateStore,
    sender: broadcast::Sender<EventId>,
}

impl EventLog {
    pub fn new(store: SharedStateStore) -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { store, sender }
    }

    /// Create a shared reference to this event log
    pub fn shared(self) -> SharedEventLog {
        Arc::new(self)
    }

    /// Append an event; no handler runs as part of publishing
    pub fn publish(
        &self,
        tenant_id: &str,
        event_type: EventType,
        payload: serde_json::Value,
    ) -> EventLogResult<Event> {
        let sequence = self.store.next_sequence()?;
        let event = Event::new(tenant_id, event_type, payload, sequence);
        self.store.insert_event(&event)?;

        // No receivers is fine, the log already holds the event
        let receivers = self.sender.send(event.id.clone()).unwrap_or(0);
        debug!(
            event_id = %event.id,
            tenant_id,
            event_type = %event_type,
            sequence,
            receivers,
            "Event published"
        );
        Ok(event)
    }

    /// Up to `batch_size` unprocessed events, oldest first
    ///
    /// Nothing is locked or removed: two pollers may see the same event, and
    /// handlers must be idempotent.
    pub fn poll_unprocessed(&self, batch_size: usize) -> EventLogResult<Vec<Event>> {
        let ids = self.store.pending_event_ids(batch_size)?;
        let mut events = Vec::with_capacity(ids.len());
        for id in ids {
            // A concurrent prune can remove an event between index and row
            if let Some(event) = self.store.get_event(&id)? {
                if !event.processed {
                    events.push(event);
                }
            }
        }
        Ok(events)
    }

    /// Mark an event processed; repeated calls are no-ops
    pub fn mark_processed(&self, event_id: &str) -> EventLogResult<()> {
        let mut event = self
            .store
            .get_event(event_id)?
            .ok_or_else(|| EventLogError::NotFound(event_id.to_string()))?;
        if event.processed {
            return Ok(());
        }
        event.processed = true;
        event.processed_at = Some(Utc::now());
        self.store.store_processed_event(&event)?;
        debug!(event_id, "Event marked processed");
        Ok(())
    }

    pub fn get(&self, event_id: &str) -> EventLogResult<Option<Event>> {
        Ok(self.store.get_event(event_id)?)
    }

    /// All events in publication order
    pub fn list(&self) -> EventLogResult<Vec<Event>> {
        let mut events = self.store.list_events()?;
        events.sort_by_key(|e| e.sequence);
        Ok(events)
    }

    /// Receive the id of every event published from now on
    pub fn subscribe(&self) -> broadcast::Receiver<EventId> {
        self.sender.subscribe()
    }

    /// Delete processed events created before `cutoff`; returns how many
    pub fn prune_processed_before(&self, cutoff: DateTime<Utc>) -> EventLogResult<usize> {
        let stale: Vec<Event> = self
            .store
            .list_events()?
            .into_iter()
            .filter(|e| e.processed && e.created_at < cutoff)
            .collect();
        if stale.is_empty() {
            return Ok(0);
        }
        self.store.delete_events(&stale)?;
        info!(count = stale.len(), "Pruned processed events");
        Ok(stale.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::StateStore;
    use serde_json::json;

    fn log() -> EventLog {
        EventLog::new(StateStore::in_memory().shared())
    }

    #[test]
    fn test_publish_does_not_process() {
        let log = log();
        let event = log
            .publish("acme", EventType::InvoiceReceived, json!({"source_ref": "inv-1"}))
            .unwrap();
        assert!(!event.processed);
        assert_eq!(event.source_ref(), Some("inv-1"));

        let polled = log.poll_unprocessed(10).unwrap();
        assert_eq!(polled.len(), 1);
        assert_eq!(polled[0].id, event.id);
    }

    #[test]
    fn test_poll_returns_creation_order_and_respects_batch() {
        let log = log();
        let ids: Vec<_> = (0..12)
            .map(|i| {
                log.publish("acme", EventType::InvoiceReceived, json!({ "n": i }))
                    .unwrap()
                    .id
            })
            .collect();

        let first = log.poll_unprocessed(5).unwrap();
        let polled: Vec<_> = first.iter().map(|e| e.id.clone()).collect();
        assert_eq!(polled, ids[..5].to_vec());

        // Polling again without marking returns the same events
        let again = log.poll_unprocessed(5).unwrap();
        assert_eq!(again[0].id, ids[0]);
    }

    #[test]
    fn test_mark_processed_is_idempotent() {
        let log = log();
        let event = log
            .publish("acme", EventType::ReviewEscalated, json!({}))
            .unwrap();

        log.mark_processed(&event.id).unwrap();
        let stamped = log.get(&event.id).unwrap().unwrap().processed_at;
        log.mark_processed(&event.id).unwrap();

        let stored = log.get(&event.id).unwrap().unwrap();
        assert!(stored.processed);
        assert_eq!(stored.processed_at, stamped);
        assert!(log.poll_unprocessed(10).unwrap().is_empty());
    }

    #[test]
    fn test_mark_unknown_event() {
        let log = log();
        assert!(matches!(
            log.mark_processed("missing"),
            Err(EventLogError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_subscribe_receives_published_ids() {
        let log = log();
        let mut rx = log.subscribe();
        let event = log
            .publish("acme", EventType::BookingCommitted, json!({}))
            .unwrap();
        assert_eq!(rx.recv().await.unwrap(), event.id);
    }

    #[test]
    fn test_prune_keeps_unprocessed() {
        let log = log();
        let done = log.publish("acme", EventType::InvoiceReceived, json!({})).unwrap();
        let open = log.publish("acme", EventType::InvoiceReceived, json!({})).unwrap();
        log.mark_processed(&done.id).unwrap();

        let pruned = log
            .prune_processed_before(Utc::now() + chrono::Duration::seconds(1))
            .unwrap();
        assert_eq!(pruned, 1);
        assert!(log.get(&done.id).unwrap().is_none());
        assert!(log.get(&open.id).unwrap().is_some());
    }
}
