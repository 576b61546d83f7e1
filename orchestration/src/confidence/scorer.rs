//! Confidence scorer: turns a proposed decision and its signals into a
//! weighted trust score with a factor-attributed explanation.
//!
//! The scorer is pure. It never fails on missing evidence; unknown signals
//! score [`ScorerConfig::missing_signal_score`] so that an automation that
//! reports nothing cannot reach the auto-approve threshold on its own.

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::factors::{Factor, FactorWeights};
use crate::decision::{ProposedDecision, Signals};

/// Decimal places kept in the total so threshold comparisons are exact
const TOTAL_PRECISION: f64 = 1e6;

/// Highest arithmetic sub-score a broken cross-check may keep
pub const MAX_MISMATCH_SCORE: f64 = 0.3;

/// Sub-units per currency unit for arithmetic cross-checks
const AMOUNT_PRECISION: f64 = 1e6;

/// Error type for scorer construction
#[derive(Debug, thiserror::Error)]
pub enum ConfidenceError {
    #[error("Factor weights must be within [0, 1] and sum to 1.0 (got {sum})")]
    InvalidWeights { sum: f64 },

    #[error("Threshold must be within [0, 1] (got {0})")]
    InvalidThreshold(f64),

    #[error("Arithmetic tolerance must be a non-negative amount (got {0})")]
    InvalidTolerance(f64),

    #[error("Missing-signal score must be within [0, 1] (got {0})")]
    InvalidMissingSignalScore(f64),

    #[error("Mismatch score must be within [0, {max}] (got {0})", max = MAX_MISMATCH_SCORE)]
    InvalidMismatchScore(f64),
}

/// Result type for scorer construction
pub type ScoringResult<T> = Result<T, ConfidenceError>;

/// What the scorer recommends doing with a decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Recommendation {
    AutoApprove,
    ManualReview,
}

impl std::fmt::Display for Recommendation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Recommendation::AutoApprove => write!(f, "auto_approve"),
            Recommendation::ManualReview => write!(f, "manual_review"),
        }
    }
}

/// Score of one factor within a [`ConfidenceResult`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactorScore {
    pub factor: Factor,
    /// Sub-score clamped to [0, 1]
    pub score: f64,
    /// Fixed weight of the factor
    pub weight: f64,
    /// `score * weight`
    pub weighted: f64,
    /// Whether the underlying signal was available
    pub available: bool,
    /// Concrete cause behind the sub-score
    pub detail: String,
}

/// Output of [`ConfidenceScorer::score`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceResult {
    /// Weighted total in [0, 1]
    pub total: f64,
    /// Per-factor breakdown in [`Factor::all`] order
    pub factors: Vec<FactorScore>,
    pub recommendation: Recommendation,
    /// Threshold the recommendation was computed against
    pub threshold: f64,
    /// Human-readable reason naming the weakest factor
    pub reason: String,
}

impl ConfidenceResult {
    /// Score entry for a factor
    pub fn factor(&self, factor: Factor) -> Option<&FactorScore> {
        self.factors.iter().find(|f| f.factor == factor)
    }

    /// Factor name to sub-score mapping
    pub fn breakdown(&self) -> std::collections::BTreeMap<&'static str, f64> {
        self.factors
            .iter()
            .map(|f| (f.factor.name(), f.score))
            .collect()
    }

    /// Lowest-scoring factor; ties go to the heavier weight
    pub fn weakest(&self) -> Option<&FactorScore> {
        self.factors.iter().min_by(|a, b| {
            a.score
                .total_cmp(&b.score)
                .then_with(|| b.weight.total_cmp(&a.weight))
        })
    }

    pub fn is_auto_approve(&self) -> bool {
        self.recommendation == Recommendation::AutoApprove
    }
}

/// Scorer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScorerConfig {
    pub weights: FactorWeights,
    /// Total at or above which a decision is auto-approved
    pub threshold: f64,
    /// Absolute currency tolerance for arithmetic cross-checks
    pub arithmetic_tolerance: f64,
    /// Sub-score used when a signal is unavailable
    pub missing_signal_score: f64,
    /// Sub-score of the arithmetic factor once any check is broken
    pub mismatch_score: f64,
}

impl Default for ScorerConfig {
    fn default() -> Self {
        Self {
            weights: FactorWeights::default(),
            threshold: 0.85,
            arithmetic_tolerance: 0.01,
            missing_signal_score: 0.5,
            mismatch_score: 0.0,
        }
    }
}

/// Pure confidence scorer
#[derive(Debug, Clone)]
pub struct ConfidenceScorer {
    config: ScorerConfig,
}

impl ConfidenceScorer {
    /// Create a scorer, validating weights, threshold, tolerance and
    /// fallback scores
    pub fn new(config: ScorerConfig) -> ScoringResult<Self> {
        if !config.weights.is_valid() {
            return Err(ConfidenceError::InvalidWeights {
                sum: config.weights.sum(),
            });
        }
        if !(0.0..=1.0).contains(&config.threshold) {
            return Err(ConfidenceError::InvalidThreshold(config.threshold));
        }
        if !config.arithmetic_tolerance.is_finite() || config.arithmetic_tolerance < 0.0 {
            return Err(ConfidenceError::InvalidTolerance(
                config.arithmetic_tolerance,
            ));
        }
        if !(0.0..=1.0).contains(&config.missing_signal_score) {
            return Err(ConfidenceError::InvalidMissingSignalScore(
                config.missing_signal_score,
            ));
        }
        if !(0.0..=MAX_MISMATCH_SCORE).contains(&config.mismatch_score) {
            return Err(ConfidenceError::InvalidMismatchScore(config.mismatch_score));
        }
        Ok(Self { config })
    }

    pub fn config(&self) -> &ScorerConfig {
        &self.config
    }

    /// Score a decision against the configured threshold
    pub fn score(&self, decision: &ProposedDecision, signals: &Signals) -> ConfidenceResult {
        self.score_with_threshold(decision, signals, self.config.threshold)
    }

    /// Score a decision against an explicit (e.g. per-tenant) threshold
    pub fn score_with_threshold(
        &self,
        decision: &ProposedDecision,
        signals: &Signals,
        threshold: f64,
    ) -> ConfidenceResult {
        let factors: Vec<FactorScore> = Factor::all()
            .iter()
            .map(|factor| {
                let (raw, available, detail) = match factor {
                    Factor::TextQuality => self.signal_score(signals.text_quality, "OCR quality"),
                    Factor::SelfReport => {
                        self.signal_score(signals.self_reported, "self-reported certainty")
                    }
                    Factor::Completeness => self.completeness(decision, signals),
                    Factor::Arithmetic => self.arithmetic(decision),
                };
                let score = raw.clamp(0.0, 1.0);
                let weight = self.config.weights.weight(*factor);
                FactorScore {
                    factor: *factor,
                    score,
                    weight,
                    weighted: score * weight,
                    available,
                    detail,
                }
            })
            .collect();

        let total = round_total(factors.iter().map(|f| f.weighted).sum::<f64>()).clamp(0.0, 1.0);
        let threshold = round_total(threshold);
        let recommendation = if total >= threshold {
            Recommendation::AutoApprove
        } else {
            Recommendation::ManualReview
        };

        let mut result = ConfidenceResult {
            total,
            factors,
            recommendation,
            threshold,
            reason: String::new(),
        };
        result.reason = Self::explain(&result);

        debug!(
            source_ref = %decision.source_ref,
            total = result.total,
            recommendation = %result.recommendation,
            "Scored decision"
        );
        result
    }

    /// Render a reason naming the weakest factor
    pub fn explain(result: &ConfidenceResult) -> String {
        let Some(weakest) = result.weakest() else {
            return format!("Confidence {:.2} with no factors", result.total);
        };
        let verdict = match result.recommendation {
            Recommendation::AutoApprove => "meets",
            Recommendation::ManualReview => "is below",
        };
        format!(
            "Confidence {:.2} {} threshold {:.2}; weakest factor: {} ({:.2}) - {}",
            result.total,
            verdict,
            result.threshold,
            weakest.factor.label(),
            weakest.score,
            weakest.detail
        )
    }

    fn signal_score(&self, value: Option<f64>, what: &str) -> (f64, bool, String) {
        match value {
            Some(v) if v.is_finite() => (v, true, format!("{} reported as {:.2}", what, v)),
            _ => (
                self.config.missing_signal_score,
                false,
                format!("{} not available", what),
            ),
        }
    }

    fn completeness(&self, decision: &ProposedDecision, signals: &Signals) -> (f64, bool, String) {
        let required: Vec<&str> = match &signals.required_fields {
            Some(fields) => fields.iter().map(String::as_str).collect(),
            None => decision.kind.required_fields().to_vec(),
        };
        if required.is_empty() {
            return (
                self.config.missing_signal_score,
                false,
                "no required fields defined".to_string(),
            );
        }

        let missing: Vec<&str> = required
            .iter()
            .copied()
            .filter(|f| !decision.has_field(f))
            .collect();
        let present = required.len() - missing.len();
        let score = present as f64 / required.len() as f64;
        let detail = if missing.is_empty() {
            format!("all {} required fields extracted", required.len())
        } else {
            format!("missing required fields: {}", missing.join(", "))
        };
        (score, true, detail)
    }

    fn arithmetic(&self, decision: &ProposedDecision) -> (f64, bool, String) {
        let tol = self.config.arithmetic_tolerance;
        let mut checks = 0;
        let mut failures = Vec::new();

        if let (Some(net), Some(tax)) = (decision.net_amount, decision.tax_amount) {
            checks += 1;
            let sum = net + tax;
            if !within(sum, decision.gross_amount, tol) {
                failures.push(format!(
                    "net {:.2} + tax {:.2} = {:.2} does not match gross {:.2}",
                    net, tax, sum, decision.gross_amount
                ));
            }
        }

        if !decision.entries.is_empty() {
            checks += 1;
            let debits = decision.total_debits();
            let credits = decision.total_credits();
            if !within(debits, credits, tol) {
                failures.push(format!(
                    "debits {:.2} do not balance credits {:.2}",
                    debits, credits
                ));
            }
        }

        if checks == 0 {
            return (
                self.config.missing_signal_score,
                false,
                "no amounts to cross-check".to_string(),
            );
        }
        if failures.is_empty() {
            (1.0, true, format!("{} cross-checks passed", checks))
        } else {
            (
                self.config.mismatch_score,
                true,
                format!("{} (tolerance {:.2})", failures.join("; "), tol),
            )
        }
    }
}

impl Default for ConfidenceScorer {
    fn default() -> Self {
        Self {
            config: ScorerConfig::default(),
        }
    }
}

/// Compare in millionths of a currency unit so the tolerance boundary does not
/// depend on the magnitude of the amounts
fn within(a: f64, b: f64, tolerance: f64) -> bool {
    a.is_finite()
        && b.is_finite()
        && ((a - b).abs() * AMOUNT_PRECISION).round() <= (tolerance * AMOUNT_PRECISION).round()
}

fn round_total(value: f64) -> f64 {
    (value * TOTAL_PRECISION).round() / TOTAL_PRECISION
}
