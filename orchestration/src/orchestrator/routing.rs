//! Event routing table

use std::collections::HashMap;

use crate::events::EventType;
use crate::state::{AgentKind, TaskKind};

/// What the orchestrator does with an event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Create (at most one) task for the document named in the payload
    CreateTask { agent: AgentKind, kind: TaskKind },
    /// Score the automation's proposal and commit or escalate it
    ScoreAndRoute,
    /// Hand a document whose automation failed for good to a human
    EscalateFailure,
    /// Announce the booking a human resolution produced
    RecordResolution,
    /// Nothing to do beyond marking the event processed
    Acknowledge,
}

/// Maps every event type to its route
#[derive(Debug, Clone)]
pub struct RoutingTable {
    routes: HashMap<EventType, Route>,
}

impl RoutingTable {
    /// A table with no routes
    pub fn empty() -> Self {
        Self {
            routes: HashMap::new(),
        }
    }

    pub fn with_route(mut self, event_type: EventType, route: Route) -> Self {
        self.routes.insert(event_type, route);
        self
    }

    pub fn route(&self, event_type: EventType) -> Option<Route> {
        self.routes.get(&event_type).copied()
    }

    /// Event types without a route
    pub fn unrouted(&self) -> Vec<EventType> {
        EventType::all()
            .iter()
            .copied()
            .filter(|t| !self.routes.contains_key(t))
            .collect()
    }
}

impl Default for RoutingTable {
    fn default() -> Self {
        Self::empty()
            .with_route(
                EventType::InvoiceReceived,
                Route::CreateTask {
                    agent: AgentKind::InvoiceBooking,
                    kind: TaskKind::AnalyzeInvoice,
                },
            )
            .with_route(
                EventType::BankTransactionReceived,
                Route::CreateTask {
                    agent: AgentKind::BankReconciliation,
                    kind: TaskKind::MatchBankTransaction,
                },
            )
            .with_route(EventType::InvoiceAnalyzed, Route::ScoreAndRoute)
            .with_route(EventType::BankTransactionAnalyzed, Route::ScoreAndRoute)
            .with_route(EventType::TaskFailed, Route::EscalateFailure)
            .with_route(EventType::ReviewResolved, Route::RecordResolution)
            .with_route(EventType::ReviewEscalated, Route::Acknowledge)
            .with_route(EventType::BookingCommitted, Route::Acknowledge)
    }
}

/// Event a worker publishes when a task of `kind` completes
pub fn analyzed_event_for(kind: TaskKind) -> EventType {
    match kind {
        TaskKind::AnalyzeInvoice => EventType::InvoiceAnalyzed,
        TaskKind::MatchBankTransaction => EventType::BankTransactionAnalyzed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_table_routes_every_event() {
        assert!(RoutingTable::default().unrouted().is_empty());
    }

    #[test]
    fn test_received_events_create_tasks() {
        let table = RoutingTable::default();
        assert_eq!(
            table.route(EventType::BankTransactionReceived),
            Some(Route::CreateTask {
                agent: AgentKind::BankReconciliation,
                kind: TaskKind::MatchBankTransaction,
            })
        );
        assert_eq!(
            table.route(EventType::InvoiceAnalyzed),
            Some(Route::ScoreAndRoute)
        );
        assert_eq!(RoutingTable::empty().route(EventType::TaskFailed), None);
    }
}
