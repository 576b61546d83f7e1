//! Proposed bookkeeping decisions and the evidence automations attach to them
//!
//! An automation (LLM booking agent, bank reconciliation matcher) never writes
//! to the ledger itself. It returns an [`AutomationOutput`]: the decision it
//! proposes plus the [`Signals`] the confidence scorer needs to judge it.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Tenant (client company) identifier
pub type TenantId = String;

/// Reference to the business document a decision is about (invoice id,
/// bank transaction id). One source reference yields at most one booking.
pub type SourceRef = String;

/// What kind of booking an automation proposes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum DecisionKind {
    /// Incoming invoice from a supplier
    VendorInvoice,
    /// Outgoing invoice to a customer
    CustomerInvoice,
    /// Bank transaction matched against open items
    BankTransaction,
}

impl DecisionKind {
    /// Fields an automation must extract for this kind of document
    pub fn required_fields(&self) -> &'static [&'static str] {
        match self {
            DecisionKind::VendorInvoice => {
                &["vendor_name", "invoice_number", "invoice_date", "due_date"]
            }
            DecisionKind::CustomerInvoice => &["customer_name", "invoice_number", "invoice_date"],
            DecisionKind::BankTransaction => &["booking_date", "counterparty", "reference"],
        }
    }
}

impl std::fmt::Display for DecisionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DecisionKind::VendorInvoice => write!(f, "vendor_invoice"),
            DecisionKind::CustomerInvoice => write!(f, "customer_invoice"),
            DecisionKind::BankTransaction => write!(f, "bank_transaction"),
        }
    }
}

/// Debit or credit side of a booking line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum EntrySide {
    Debit,
    Credit,
}

/// One line of a proposed double-entry booking
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct BookingLine {
    /// Ledger account number
    pub account: String,
    /// Debit or credit
    pub side: EntrySide,
    /// Amount in the decision currency (always positive)
    pub amount: f64,
    /// Optional posting text
    #[serde(default)]
    pub description: Option<String>,
}

impl BookingLine {
    pub fn debit(account: impl Into<String>, amount: f64) -> Self {
        Self {
            account: account.into(),
            side: EntrySide::Debit,
            amount,
            description: None,
        }
    }

    pub fn credit(account: impl Into<String>, amount: f64) -> Self {
        Self {
            account: account.into(),
            side: EntrySide::Credit,
            amount,
            description: None,
        }
    }
}

/// A booking proposed by an automation, awaiting commit or human review
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ProposedDecision {
    /// Tenant the document belongs to
    pub tenant_id: TenantId,
    /// Document being booked
    pub source_ref: SourceRef,
    /// Kind of booking
    pub kind: DecisionKind,
    /// ISO 4217 currency code
    pub currency: String,
    /// Document total including tax
    pub gross_amount: f64,
    /// Total before tax, if the document states it
    #[serde(default)]
    pub net_amount: Option<f64>,
    /// Tax total, if the document states it
    #[serde(default)]
    pub tax_amount: Option<f64>,
    /// Proposed double-entry lines
    #[serde(default)]
    pub entries: Vec<BookingLine>,
    /// Extracted header fields (vendor name, invoice number, dates, ...)
    #[serde(default)]
    pub fields: BTreeMap<String, serde_json::Value>,
    /// The automation's explanation of its proposal
    #[serde(default)]
    pub reasoning: String,
}

impl ProposedDecision {
    /// Create a decision with no lines or fields
    pub fn new(
        tenant_id: impl Into<TenantId>,
        source_ref: impl Into<SourceRef>,
        kind: DecisionKind,
        gross_amount: f64,
    ) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            source_ref: source_ref.into(),
            kind,
            currency: "EUR".to_string(),
            gross_amount,
            net_amount: None,
            tax_amount: None,
            entries: Vec::new(),
            fields: BTreeMap::new(),
            reasoning: String::new(),
        }
    }

    /// Set net and tax totals
    pub fn with_breakdown(mut self, net: f64, tax: f64) -> Self {
        self.net_amount = Some(net);
        self.tax_amount = Some(tax);
        self
    }

    /// Append a booking line
    pub fn with_entry(mut self, line: BookingLine) -> Self {
        self.entries.push(line);
        self
    }

    /// Set an extracted field
    pub fn with_field(mut self, name: &str, value: impl Into<serde_json::Value>) -> Self {
        self.fields.insert(name.to_string(), value.into());
        self
    }

    /// Sum of debit lines
    pub fn total_debits(&self) -> f64 {
        self.entries
            .iter()
            .filter(|l| l.side == EntrySide::Debit)
            .map(|l| l.amount)
            .sum()
    }

    /// Sum of credit lines
    pub fn total_credits(&self) -> f64 {
        self.entries
            .iter()
            .filter(|l| l.side == EntrySide::Credit)
            .map(|l| l.amount)
            .sum()
    }

    /// Whether an extracted field is present and non-empty
    pub fn has_field(&self, name: &str) -> bool {
        match self.fields.get(name) {
            None | Some(serde_json::Value::Null) => false,
            Some(serde_json::Value::String(s)) => !s.trim().is_empty(),
            Some(_) => true,
        }
    }

    /// Absolute business magnitude, used for review prioritisation
    pub fn magnitude(&self) -> f64 {
        self.gross_amount.abs()
    }
}

/// Evidence accompanying a decision
///
/// Every signal is optional; the scorer substitutes a conservative mid-range
/// value for anything the automation could not provide.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Signals {
    /// Quality of the extracted text (OCR confidence, 1.0 for structured e-invoices)
    #[serde(default)]
    pub text_quality: Option<f64>,
    /// The automation's own certainty about its proposal
    #[serde(default)]
    pub self_reported: Option<f64>,
    /// Override for the fields that must be present (defaults per decision kind)
    #[serde(default)]
    pub required_fields: Option<Vec<String>>,
}

impl Signals {
    pub fn with_text_quality(mut self, quality: f64) -> Self {
        self.text_quality = Some(quality);
        self
    }

    pub fn with_self_reported(mut self, certainty: f64) -> Self {
        self.self_reported = Some(certainty);
        self
    }
}

/// What an automation returns for a completed task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct AutomationOutput {
    pub decision: ProposedDecision,
    #[serde(default)]
    pub signals: Signals,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_totals_by_side() {
        let decision = ProposedDecision::new("t1", "inv-1", DecisionKind::VendorInvoice, 119.0)
            .with_entry(BookingLine::debit("4400", 100.0))
            .with_entry(BookingLine::debit("1576", 19.0))
            .with_entry(BookingLine::credit("1600", 119.0));

        assert_eq!(decision.total_debits(), 119.0);
        assert_eq!(decision.total_credits(), 119.0);
    }

    #[test]
    fn test_blank_fields_are_missing() {
        let decision = ProposedDecision::new("t1", "inv-1", DecisionKind::VendorInvoice, 10.0)
            .with_field("vendor_name", "  ")
            .with_field("invoice_number", serde_json::Value::Null)
            .with_field("invoice_date", "2026-01-05");

        assert!(!decision.has_field("vendor_name"));
        assert!(!decision.has_field("invoice_number"));
        assert!(decision.has_field("invoice_date"));
        assert!(!decision.has_field("due_date"));
    }

    #[test]
    fn test_output_deserializes_without_signals() {
        let json = serde_json::json!({
            "decision": {
                "tenant_id": "t1",
                "source_ref": "inv-9",
                "kind": "customer_invoice",
                "currency": "EUR",
                "gross_amount": 50.0
            }
        });
        let output: AutomationOutput = serde_json::from_value(json).unwrap();
        assert_eq!(output.decision.kind, DecisionKind::CustomerInvoice);
        assert_eq!(output.signals, Signals::default());
    }
}
