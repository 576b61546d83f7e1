//! Domain event types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::decision::TenantId;

/// Unique identifier for events
pub type EventId = String;

/// Kind of domain event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    /// A client submitted an invoice
    InvoiceReceived,
    /// The booking automation proposed a decision for an invoice
    InvoiceAnalyzed,
    /// A bank statement line arrived
    BankTransactionReceived,
    /// The reconciliation automation proposed a match
    BankTransactionAnalyzed,
    /// A task failed for good
    TaskFailed,
    /// A decision was handed to a human
    ReviewEscalated,
    /// A human resolved a review item
    ReviewResolved,
    /// A booking reached the ledger
    BookingCommitted,
}

impl EventType {
    pub fn all() -> &'static [EventType] {
        &[
            EventType::InvoiceReceived,
            EventType::InvoiceAnalyzed,
            EventType::BankTransactionReceived,
            EventType::BankTransactionAnalyzed,
            EventType::TaskFailed,
            EventType::ReviewEscalated,
            EventType::ReviewResolved,
            EventType::BookingCommitted,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::InvoiceReceived => "invoice_received",
            EventType::InvoiceAnalyzed => "invoice_analyzed",
            EventType::BankTransactionReceived => "bank_transaction_received",
            EventType::BankTransactionAnalyzed => "bank_transaction_analyzed",
            EventType::TaskFailed => "task_failed",
            EventType::ReviewEscalated => "review_escalated",
            EventType::ReviewResolved => "review_resolved",
            EventType::BookingCommitted => "booking_committed",
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EventType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventType::all()
            .iter()
            .find(|t| t.as_str() == s)
            .copied()
            .ok_or_else(|| format!("unknown event type: {}", s))
    }
}

/// A durable domain event
///
/// Only `processed` and `processed_at` ever change after publication.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    pub tenant_id: TenantId,
    pub event_type: EventType,
    pub payload: serde_json::Value,
    /// Store-assigned publication order
    pub sequence: u64,
    pub created_at: DateTime<Utc>,
    pub processed: bool,
    pub processed_at: Option<DateTime<Utc>>,
}

impl Event {
    pub fn new(
        tenant_id: impl Into<TenantId>,
        event_type: EventType,
        payload: serde_json::Value,
        sequence: u64,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            tenant_id: tenant_id.into(),
            event_type,
            payload,
            sequence,
            created_at: Utc::now(),
            processed: false,
            processed_at: None,
        }
    }

    /// Source document named in the payload, if any
    pub fn source_ref(&self) -> Option<&str> {
        self.payload.get("source_ref").and_then(|v| v.as_str())
    }
}
