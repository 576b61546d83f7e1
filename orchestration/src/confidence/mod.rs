//! Confidence scoring for automated bookkeeping decisions
//!
//! Each decision is judged on four independent factors, each normalised to
//! [0, 1] and combined with fixed weights:
//!
//! ```text
//! ocr           0.30   text quality of the source document
//! self_report   0.35   the automation's own certainty
//! completeness  0.20   required fields extracted
//! arithmetic    0.15   net + tax = gross, debits = credits
//! ```
//!
//! The weighted total is compared against the auto-approve threshold. The
//! weakest factor becomes the reason shown to the human reviewer when the
//! decision is escalated.

pub mod factors;
pub mod scorer;

pub use factors::{Factor, FactorWeights};
pub use scorer::{
    ConfidenceError, ConfidenceResult, ConfidenceScorer, FactorScore, Recommendation,
    ScorerConfig, ScoringResult,
};
