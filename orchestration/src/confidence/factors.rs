//! Confidence factors and their weights

use serde::{Deserialize, Serialize};

/// Tolerance when checking that weights sum to one
const WEIGHT_SUM_EPSILON: f64 = 1e-9;

/// Independent signal categories contributing to a confidence score
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Factor {
    /// Quality of the extracted document text
    #[serde(rename = "ocr")]
    TextQuality,
    /// The automation's self-reported certainty
    SelfReport,
    /// Share of required fields that were extracted
    Completeness,
    /// Cross-check arithmetic (parts sum to totals)
    Arithmetic,
}

impl Factor {
    /// All factors in breakdown order
    pub fn all() -> &'static [Factor] {
        &[
            Factor::TextQuality,
            Factor::SelfReport,
            Factor::Completeness,
            Factor::Arithmetic,
        ]
    }

    /// Stable name used in breakdowns and audit payloads
    pub fn name(&self) -> &'static str {
        match self {
            Factor::TextQuality => "ocr",
            Factor::SelfReport => "self_report",
            Factor::Completeness => "completeness",
            Factor::Arithmetic => "arithmetic",
        }
    }

    /// Human-readable label for review reasons
    pub fn label(&self) -> &'static str {
        match self {
            Factor::TextQuality => "Document text quality",
            Factor::SelfReport => "Automation certainty",
            Factor::Completeness => "Field completeness",
            Factor::Arithmetic => "Arithmetic cross-check",
        }
    }
}

impl std::fmt::Display for Factor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Fixed weights per factor; must sum to 1.0
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FactorWeights {
    pub text_quality: f64,
    pub self_report: f64,
    pub completeness: f64,
    pub arithmetic: f64,
}

impl Default for FactorWeights {
    fn default() -> Self {
        Self {
            text_quality: 0.30,
            self_report: 0.35,
            completeness: 0.20,
            arithmetic: 0.15,
        }
    }
}

impl FactorWeights {
    /// Weight of a single factor
    pub fn weight(&self, factor: Factor) -> f64 {
        match factor {
            Factor::TextQuality => self.text_quality,
            Factor::SelfReport => self.self_report,
            Factor::Completeness => self.completeness,
            Factor::Arithmetic => self.arithmetic,
        }
    }

    /// Sum of all weights
    pub fn sum(&self) -> f64 {
        Factor::all().iter().map(|f| self.weight(*f)).sum()
    }

    /// Whether every weight is in [0, 1] and they sum to 1.0
    pub fn is_valid(&self) -> bool {
        Factor::all()
            .iter()
            .all(|f| (0.0..=1.0).contains(&self.weight(*f)))
            && (self.sum() - 1.0).abs() < WEIGHT_SUM_EPSILON
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_weights_sum_to_one() {
        let weights = FactorWeights::default();
        assert!(weights.is_valid());
        assert!((weights.sum() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_negative_weight_rejected() {
        let weights = FactorWeights {
            text_quality: -0.1,
            self_report: 0.45,
            completeness: 0.5,
            arithmetic: 0.15,
        };
        assert!(!weights.is_valid());
    }

    #[test]
    fn test_factor_serializes_with_breakdown_name() {
        assert_eq!(
            serde_json::to_string(&Factor::TextQuality).unwrap(),
            "\"ocr\""
        );
        assert_eq!(
            serde_json::to_string(&Factor::SelfReport).unwrap(),
            "\"self_report\""
        );
    }
}
