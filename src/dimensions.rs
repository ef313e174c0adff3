//! The five grading dimensions and their fixed weights.
//!
//! Weights sum to 1.0; they are shared between the pattern layer, the judge
//! prompts, and the aggregate score computation.

use serde::{Deserialize, Serialize};

/// Weight of each dimension in the aggregate score
pub const WEIGHT_DIAGNOSTIC_ACCURACY: f64 = 0.35;
pub const WEIGHT_FINDING_DETECTION: f64 = 0.25;
pub const WEIGHT_ANATOMIC_PRECISION: f64 = 0.15;
pub const WEIGHT_CLINICAL_RELEVANCE: f64 = 0.15;
pub const WEIGHT_FALSE_POSITIVE_CONTROL: f64 = 0.10;

/// Dimension names in canonical order, matching the judge wire contract
pub const DIMENSION_NAMES: [&str; 5] = [
    "diagnostic_accuracy",
    "finding_detection",
    "anatomic_precision",
    "clinical_relevance",
    "false_positive_control",
];

/// Scores on the five grading dimensions, each in [0, 1]
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
pub struct DimensionScores {
    pub diagnostic_accuracy: f64,
    pub finding_detection: f64,
    pub anatomic_precision: f64,
    pub clinical_relevance: f64,
    pub false_positive_control: f64,
}

impl DimensionScores {
    /// All-zero scores, used as the judge failure sentinel
    #[must_use]
    pub const fn zero() -> Self {
        Self {
            diagnostic_accuracy: 0.0,
            finding_detection: 0.0,
            anatomic_precision: 0.0,
            clinical_relevance: 0.0,
            false_positive_control: 0.0,
        }
    }

    /// Scores in canonical order (parallel to `DIMENSION_NAMES`)
    #[must_use]
    pub const fn as_array(&self) -> [f64; 5] {
        [
            self.diagnostic_accuracy,
            self.finding_detection,
            self.anatomic_precision,
            self.clinical_relevance,
            self.false_positive_control,
        ]
    }

    /// Look up a score by its wire name
    #[must_use]
    pub fn get(&self, name: &str) -> Option<f64> {
        match name {
            "diagnostic_accuracy" => Some(self.diagnostic_accuracy),
            "finding_detection" => Some(self.finding_detection),
            "anatomic_precision" => Some(self.anatomic_precision),
            "clinical_relevance" => Some(self.clinical_relevance),
            "false_positive_control" => Some(self.false_positive_control),
            _ => None,
        }
    }

    /// Clamp every dimension to [0, 1]
    #[must_use]
    pub fn clamped(self) -> Self {
        Self {
            diagnostic_accuracy: self.diagnostic_accuracy.clamp(0.0, 1.0),
            finding_detection: self.finding_detection.clamp(0.0, 1.0),
            anatomic_precision: self.anatomic_precision.clamp(0.0, 1.0),
            clinical_relevance: self.clinical_relevance.clamp(0.0, 1.0),
            false_positive_control: self.false_positive_control.clamp(0.0, 1.0),
        }
    }

    /// Weighted aggregate score using the fixed dimension weights
    #[must_use]
    pub fn weighted(&self) -> f64 {
        WEIGHT_DIAGNOSTIC_ACCURACY * self.diagnostic_accuracy
            + WEIGHT_FINDING_DETECTION * self.finding_detection
            + WEIGHT_ANATOMIC_PRECISION * self.anatomic_precision
            + WEIGHT_CLINICAL_RELEVANCE * self.clinical_relevance
            + WEIGHT_FALSE_POSITIVE_CONTROL * self.false_positive_control
    }
}

/// Failure-mode taxonomy, shared by Layer 0 and Layer 2.
///
/// This is the unit of comparison for calibration drift.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FailureClass {
    /// Missed critical diagnosis (primary diagnosis wrong or absent)
    A,
    /// Wrong diagnosis (confidently stated incorrect diagnosis)
    B,
    /// Partial/wrong location (correct diagnosis, wrong laterality or anatomy)
    C,
    /// Overcall/hallucination (added pathology not present)
    D,
    /// Refusal (declined to interpret the image)
    E,
}

impl FailureClass {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::A => "A",
            Self::B => "B",
            Self::C => "C",
            Self::D => "D",
            Self::E => "E",
        }
    }

    /// Parse a judge-supplied class label; anything outside A-E is rejected
    #[must_use]
    pub fn parse(label: &str) -> Option<Self> {
        match label {
            "A" => Some(Self::A),
            "B" => Some(Self::B),
            "C" => Some(Self::C),
            "D" => Some(Self::D),
            "E" => Some(Self::E),
            _ => None,
        }
    }

    /// Classes A and B fail regardless of weighted score
    #[must_use]
    pub const fn always_fails(self) -> bool {
        matches!(self, Self::A | Self::B)
    }
}

impl std::fmt::Display for FailureClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
#[allow(clippy::float_cmp)]
mod tests {
    use super::*;

    #[test]
    fn test_weights_sum_to_one() {
        let sum = WEIGHT_DIAGNOSTIC_ACCURACY
            + WEIGHT_FINDING_DETECTION
            + WEIGHT_ANATOMIC_PRECISION
            + WEIGHT_CLINICAL_RELEVANCE
            + WEIGHT_FALSE_POSITIVE_CONTROL;
        assert!((sum - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_perfect_scores_aggregate_to_one() {
        let scores = DimensionScores {
            diagnostic_accuracy: 1.0,
            finding_detection: 1.0,
            anatomic_precision: 1.0,
            clinical_relevance: 1.0,
            false_positive_control: 1.0,
        };
        assert!((scores.weighted() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_zero_scores_aggregate_to_zero() {
        assert_eq!(DimensionScores::zero().weighted(), 0.0);
    }

    #[test]
    fn test_clamping() {
        let scores = DimensionScores {
            diagnostic_accuracy: 1.7,
            finding_detection: -0.3,
            anatomic_precision: 0.5,
            clinical_relevance: 2.0,
            false_positive_control: -1.0,
        }
        .clamped();
        assert_eq!(scores.diagnostic_accuracy, 1.0);
        assert_eq!(scores.finding_detection, 0.0);
        assert_eq!(scores.anatomic_precision, 0.5);
        assert_eq!(scores.clinical_relevance, 1.0);
        assert_eq!(scores.false_positive_control, 0.0);
    }

    #[test]
    fn test_get_matches_array_order() {
        let scores = DimensionScores {
            diagnostic_accuracy: 0.1,
            finding_detection: 0.2,
            anatomic_precision: 0.3,
            clinical_relevance: 0.4,
            false_positive_control: 0.5,
        };
        for (name, value) in DIMENSION_NAMES.iter().zip(scores.as_array()) {
            assert_eq!(scores.get(name), Some(value));
        }
        assert_eq!(scores.get("nonexistent"), None);
    }

    #[test]
    fn test_failure_class_parse() {
        assert_eq!(FailureClass::parse("A"), Some(FailureClass::A));
        assert_eq!(FailureClass::parse("E"), Some(FailureClass::E));
        assert_eq!(FailureClass::parse("F"), None);
        assert_eq!(FailureClass::parse("pass"), None);
    }

    #[test]
    fn test_failure_class_gating() {
        assert!(FailureClass::A.always_fails());
        assert!(FailureClass::B.always_fails());
        assert!(!FailureClass::C.always_fails());
        assert!(!FailureClass::D.always_fails());
        assert!(!FailureClass::E.always_fails());
    }

    #[test]
    fn test_weighted_mixed() {
        let scores = DimensionScores {
            diagnostic_accuracy: 1.0,
            finding_detection: 0.0,
            anatomic_precision: 1.0,
            clinical_relevance: 0.0,
            false_positive_control: 1.0,
        };
        // 0.35 + 0.15 + 0.10
        assert!((scores.weighted() - 0.60).abs() < 1e-12);
    }
}
