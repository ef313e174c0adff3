//! Rubric grader: the two-stage grading pipeline.
//!
//! Layer 0 (deterministic patterns) always runs; Layer 2 (the LLM judge) is
//! escalated to only when pattern confidence is below the configured
//! threshold. Judge transport failures never propagate past this module:
//! grading falls back to the pattern-only result.

use crate::dimensions::{DimensionScores, FailureClass};
use crate::judge::{run_judge, JudgeError, JudgeProvider, JudgeResult};
use crate::patterns::{
    check_laterality, check_negatives, run_modality_patterns, run_task_patterns, PatternResult,
};
use crate::task::{Task, TaskError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Pattern confidence at or above which the judge is not consulted
pub const DEFAULT_CONFIDENCE_THRESHOLD: f64 = 0.8;

/// Weighted score at or above which a grade passes (absent class A/B)
pub const PASS_SCORE_THRESHOLD: f64 = 0.5;

/// Phrases that mark a response as a refusal (class E)
const REFUSAL_PHRASES: [&str; 4] = [
    "cannot interpret",
    "unable to analyze",
    "i cannot",
    "i'm unable",
];

/// Grader configuration with documented defaults, injectable per instance
#[derive(Debug, Clone)]
pub struct GraderConfig {
    /// Judge model identifier recorded on judge results
    pub judge_model: String,
    /// Skip the judge entirely, even when confidence is low
    pub pattern_only: bool,
    /// Escalate to the judge below this pattern confidence
    pub confidence_threshold: f64,
}

impl Default for GraderConfig {
    fn default() -> Self {
        Self {
            judge_model: "gpt-5.2".to_string(),
            pattern_only: false,
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
        }
    }
}

/// Which layer decided a grade
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(into = "u8", try_from = "u8")]
pub enum DetectionLayer {
    /// Deterministic patterns only
    Patterns,
    /// LLM judge override
    Judge,
}

impl From<DetectionLayer> for u8 {
    fn from(layer: DetectionLayer) -> Self {
        match layer {
            DetectionLayer::Patterns => 0,
            DetectionLayer::Judge => 2,
        }
    }
}

impl TryFrom<u8> for DetectionLayer {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Patterns),
            2 => Ok(Self::Judge),
            other => Err(format!("invalid detection layer {other} (expected 0 or 2)")),
        }
    }
}

/// Complete grading outcome for one (task, model, trial).
///
/// Created once per grading call; immutable; persisted append-only.
#[derive(Debug, Clone)]
pub struct GradeResult {
    pub task_id: String,
    pub model: String,
    pub trial: u32,
    pub passed: bool,
    pub weighted_score: f64,
    pub scores: DimensionScores,
    pub failure_class: Option<FailureClass>,
    pub detection_layer: DetectionLayer,
    pub pattern_result: PatternResult,
    pub judge_result: Option<JudgeResult>,
    pub overcalled_negatives: Vec<String>,
    pub laterality_correct: bool,
    pub modality_signals: BTreeMap<String, bool>,
}

/// Two-stage grading engine
pub struct RubricGrader {
    judge_provider: Option<Box<dyn JudgeProvider>>,
    config: GraderConfig,
}

impl RubricGrader {
    /// Create a grader with an optional judge provider
    #[must_use]
    pub fn new(judge_provider: Option<Box<dyn JudgeProvider>>, config: GraderConfig) -> Self {
        Self {
            judge_provider,
            config,
        }
    }

    /// Create a pattern-only grader (no judge escalation)
    #[must_use]
    pub fn pattern_only() -> Self {
        Self::new(
            None,
            GraderConfig {
                pattern_only: true,
                ..GraderConfig::default()
            },
        )
    }

    #[must_use]
    pub const fn config(&self) -> &GraderConfig {
        &self.config
    }

    /// Grade a model response for a task.
    ///
    /// # Errors
    ///
    /// Returns `TaskError` only for pattern-check authoring errors (invalid
    /// regex). Judge failures are absorbed: grading falls back to the
    /// pattern-only result with the detection layer left at 0.
    pub fn grade(
        &self,
        task: &Task,
        response: &str,
        model: &str,
        trial: u32,
    ) -> Result<GradeResult, TaskError> {
        // Layer 0 always runs.
        let pattern_result = run_task_patterns(task, response)?;
        let modality_signals = run_modality_patterns(task.modality, response);
        let laterality_correct = check_laterality(response, &task.ground_truth.laterality);
        let overcalled = check_negatives(response, &task.ground_truth.negatives);

        let mut scores =
            scores_from_patterns(&pattern_result, laterality_correct, &overcalled, task);
        let mut failure_class = classify_from_patterns(&pattern_result, &overcalled, response);
        let mut detection_layer = DetectionLayer::Patterns;
        let mut judge_data = None;

        if self.should_escalate(&pattern_result) {
            // should_escalate guarantees the provider is present.
            let provider = self.judge_provider.as_deref();
            match provider
                .ok_or_else(|| JudgeError::Unavailable("no judge provider".to_string()))
                .and_then(|p| run_judge(p, &self.config.judge_model, task, response))
            {
                Ok(judge_result) => {
                    scores = combine_scores(scores, &judge_result);
                    failure_class = judge_result.failure_class;
                    detection_layer = DetectionLayer::Judge;
                    judge_data = Some(judge_result);
                }
                Err(e) => {
                    tracing::warn!(
                        task_id = %task.id,
                        error = %e,
                        "judge failed, falling back to patterns"
                    );
                }
            }
        }

        let weighted_score = scores.weighted();
        let passed = determine_pass(weighted_score, failure_class);

        Ok(GradeResult {
            task_id: task.id.clone(),
            model: model.to_string(),
            trial,
            passed,
            weighted_score,
            scores,
            failure_class,
            detection_layer,
            pattern_result,
            judge_result: judge_data,
            overcalled_negatives: overcalled,
            laterality_correct,
            modality_signals,
        })
    }

    fn should_escalate(&self, pattern_result: &PatternResult) -> bool {
        !self.config.pattern_only
            && self.judge_provider.is_some()
            && pattern_result.confidence < self.config.confidence_threshold
    }
}

/// Derive initial dimension scores from pattern evidence alone
#[allow(clippy::cast_precision_loss)]
fn scores_from_patterns(
    pattern_result: &PatternResult,
    laterality_correct: bool,
    overcalled: &[String],
    task: &Task,
) -> DimensionScores {
    let diagnostic_accuracy = if pattern_result.required_total > 0 {
        pattern_result.required_passed as f64 / pattern_result.required_total as f64
    } else {
        // Unknown without required patterns.
        0.5
    };

    let false_positive_control = if overcalled.is_empty() {
        1.0
    } else {
        let n_negatives = task.ground_truth.negatives.len();
        if n_negatives > 0 {
            (1.0 - overcalled.len() as f64 / n_negatives as f64).max(0.0)
        } else {
            0.0
        }
    };

    DimensionScores {
        diagnostic_accuracy,
        finding_detection: pattern_result.pass_rate(),
        anatomic_precision: if laterality_correct { 1.0 } else { 0.0 },
        // Patterns cannot assess this.
        clinical_relevance: 0.5,
        false_positive_control,
    }
}

/// Combine pattern and judge scores. The judge takes precedence everywhere
/// except false_positive_control, which takes the minimum: a hallucination
/// flagged by either layer counts.
fn combine_scores(pattern_scores: DimensionScores, judge_result: &JudgeResult) -> DimensionScores {
    let j = judge_result.scores;
    DimensionScores {
        diagnostic_accuracy: j.diagnostic_accuracy,
        finding_detection: j.finding_detection,
        anatomic_precision: j.anatomic_precision,
        clinical_relevance: j.clinical_relevance,
        false_positive_control: pattern_scores
            .false_positive_control
            .min(j.false_positive_control),
    }
}

/// Classify failure from pattern evidence alone; first match wins
fn classify_from_patterns(
    pattern_result: &PatternResult,
    overcalled: &[String],
    response: &str,
) -> Option<FailureClass> {
    let lower = response.to_lowercase();
    if REFUSAL_PHRASES.iter().any(|p| lower.contains(p)) {
        return Some(FailureClass::E);
    }
    if !overcalled.is_empty() {
        return Some(FailureClass::D);
    }
    if pattern_result.required_total > 0 && pattern_result.required_passed == 0 {
        return Some(FailureClass::A);
    }
    if !pattern_result.all_required_pass() {
        return Some(FailureClass::C);
    }
    None
}

/// Pass/fail decision: class A/B always fails; otherwise pass at or above
/// the score threshold
fn determine_pass(score: f64, failure_class: Option<FailureClass>) -> bool {
    if failure_class.is_some_and(FailureClass::always_fails) {
        return false;
    }
    score >= PASS_SCORE_THRESHOLD
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::float_cmp)]
mod tests {
    use super::*;
    use crate::judge::JudgeError;
    use crate::task::fixtures::sample_task;
    use crate::task::{CheckKind, PatternCheck};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Judge provider that counts invocations and returns a canned response
    struct CountingProvider {
        response: String,
        calls: Arc<AtomicUsize>,
    }

    impl JudgeProvider for CountingProvider {
        fn complete(&self, _system: &str, _user: &str) -> Result<String, JudgeError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.response.clone())
        }
    }

    struct FailingProvider;

    impl JudgeProvider for FailingProvider {
        fn complete(&self, _system: &str, _user: &str) -> Result<String, JudgeError> {
            Err(JudgeError::Transport("boom".to_string()))
        }
    }

    fn judge_json(scores: [f64; 5], class: Option<&str>) -> String {
        format!(
            r#"{{"diagnostic_accuracy": {}, "finding_detection": {},
                "anatomic_precision": {}, "clinical_relevance": {},
                "false_positive_control": {}, "failure_class": {},
                "reasoning": "test"}}"#,
            scores[0],
            scores[1],
            scores[2],
            scores[3],
            scores[4],
            class.map_or("null".to_string(), |c| format!("\"{c}\"")),
        )
    }

    const GOOD_RESPONSE: &str = "Left-sided pneumothorax with a visible visceral pleural line \
in the left hemithorax. No mediastinal shift.";

    // =========================================================================
    // Pattern-only grading tests
    // =========================================================================

    #[test]
    fn test_clean_pass_stays_on_layer_0() {
        let grader = RubricGrader::pattern_only();
        let grade = grader
            .grade(&sample_task(), GOOD_RESPONSE, "model-a", 0)
            .unwrap();
        assert!(grade.passed);
        assert_eq!(grade.failure_class, None);
        assert_eq!(grade.detection_layer, DetectionLayer::Patterns);
        assert!(grade.laterality_correct);
        assert!(grade.overcalled_negatives.is_empty());
        assert!(grade.weighted_score >= 0.5);
    }

    #[test]
    fn test_overcall_is_class_d() {
        let grader = RubricGrader::pattern_only();
        let response = format!("{GOOD_RESPONSE} Tension pneumothorax is present.");
        let grade = grader
            .grade(&sample_task(), &response, "model-a", 0)
            .unwrap();
        assert_eq!(grade.failure_class, Some(FailureClass::D));
        assert_eq!(
            grade.overcalled_negatives,
            vec!["tension pneumothorax".to_string()]
        );
        assert!(!grade.passed);
    }

    #[test]
    fn test_refusal_is_class_e() {
        let grader = RubricGrader::pattern_only();
        let grade = grader
            .grade(
                &sample_task(),
                "I cannot interpret medical images. Please consult a radiologist.",
                "model-a",
                0,
            )
            .unwrap();
        assert_eq!(grade.failure_class, Some(FailureClass::E));
    }

    #[test]
    fn test_all_required_failed_is_class_a() {
        let grader = RubricGrader::pattern_only();
        let grade = grader
            .grade(
                &sample_task(),
                "The study demonstrates a right lower lobe consolidation.",
                "model-a",
                0,
            )
            .unwrap();
        // Neither "pneumothorax" nor "left" appears... "right" contains no
        // "left"; both required checks fail.
        assert_eq!(grade.failure_class, Some(FailureClass::A));
        assert!(!grade.passed);
    }

    #[test]
    fn test_partial_required_is_class_c() {
        let grader = RubricGrader::pattern_only();
        let grade = grader
            .grade(
                &sample_task(),
                "There is a pneumothorax but I will not state the side.",
                "model-a",
                0,
            )
            .unwrap();
        assert_eq!(grade.failure_class, Some(FailureClass::C));
    }

    #[test]
    fn test_refusal_precedence_over_overcall() {
        let grader = RubricGrader::pattern_only();
        let grade = grader
            .grade(
                &sample_task(),
                "I cannot interpret this; possibly tension pneumothorax.",
                "model-a",
                0,
            )
            .unwrap();
        assert_eq!(grade.failure_class, Some(FailureClass::E));
    }

    #[test]
    fn test_dimension_scores_from_patterns() {
        let grader = RubricGrader::pattern_only();
        let grade = grader
            .grade(&sample_task(), GOOD_RESPONSE, "model-a", 0)
            .unwrap();
        assert_eq!(grade.scores.diagnostic_accuracy, 1.0);
        assert_eq!(grade.scores.finding_detection, 1.0);
        assert_eq!(grade.scores.anatomic_precision, 1.0);
        assert_eq!(grade.scores.clinical_relevance, 0.5);
        assert_eq!(grade.scores.false_positive_control, 1.0);
    }

    #[test]
    fn test_no_required_checks_unknown_diagnosis_score() {
        let mut task = sample_task();
        for pc in &mut task.pattern_checks {
            pc.required = false;
        }
        let grader = RubricGrader::pattern_only();
        let grade = grader.grade(&task, GOOD_RESPONSE, "model-a", 0).unwrap();
        assert_eq!(grade.scores.diagnostic_accuracy, 0.5);
    }

    #[test]
    fn test_overcall_with_no_declared_negatives_scores_zero() {
        // Defensive branch: overcall list populated while negatives empty.
        let task = sample_task();
        let pattern_result = run_task_patterns(&task, GOOD_RESPONSE).unwrap();
        let mut stripped = task.clone();
        stripped.ground_truth.negatives.clear();
        let scores = scores_from_patterns(
            &pattern_result,
            true,
            &["surprise finding".to_string()],
            &stripped,
        );
        assert_eq!(scores.false_positive_control, 0.0);
    }

    #[test]
    fn test_invalid_regex_propagates_from_grade() {
        let mut task = sample_task();
        task.pattern_checks.push(PatternCheck {
            name: "broken".to_string(),
            kind: CheckKind::Regex,
            pattern: "([unclosed".to_string(),
            required: true,
        });
        let grader = RubricGrader::pattern_only();
        assert!(grader.grade(&task, GOOD_RESPONSE, "model-a", 0).is_err());
    }

    // =========================================================================
    // Judge escalation tests
    // =========================================================================

    /// Task with a single required check so that even a pass sits below the
    /// 0.8 confidence threshold (0.5 + 0.3 * 1.0 = 0.8 is not < 0.8, so use
    /// one pass out of two checks).
    fn low_confidence_task() -> Task {
        let mut task = sample_task();
        task.pattern_checks = vec![
            PatternCheck {
                name: "dx".to_string(),
                kind: CheckKind::Contains,
                pattern: "pneumothorax".to_string(),
                required: true,
            },
            PatternCheck {
                name: "opt".to_string(),
                kind: CheckKind::Contains,
                pattern: "pleural line".to_string(),
                required: false,
            },
        ];
        task
    }

    #[test]
    fn test_high_confidence_suppresses_judge() {
        let calls = Arc::new(AtomicUsize::new(0));
        let provider = CountingProvider {
            response: judge_json([0.0; 5], Some("B")),
            calls: Arc::clone(&calls),
        };
        let grader = RubricGrader::new(Some(Box::new(provider)), GraderConfig::default());
        // Both required checks pass: confidence 0.85 >= 0.8.
        let grade = grader
            .grade(&sample_task(), GOOD_RESPONSE, "model-a", 0)
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(grade.detection_layer, DetectionLayer::Patterns);
        assert!(grade.passed);
    }

    #[test]
    fn test_low_confidence_escalates_and_judge_overrides() {
        let calls = Arc::new(AtomicUsize::new(0));
        let provider = CountingProvider {
            response: judge_json([0.9, 0.9, 0.8, 0.9, 1.0], None),
            calls: Arc::clone(&calls),
        };
        let grader = RubricGrader::new(Some(Box::new(provider)), GraderConfig::default());
        // Only the required check passes: confidence 0.5 + 0.3 * 0.5 = 0.65.
        let grade = grader
            .grade(&low_confidence_task(), "pneumothorax noted", "model-a", 0)
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(grade.detection_layer, DetectionLayer::Judge);
        assert_eq!(grade.scores.diagnostic_accuracy, 0.9);
        assert_eq!(grade.scores.clinical_relevance, 0.9);
        assert_eq!(grade.failure_class, None);
        assert!(grade.passed);
        assert!(grade.judge_result.is_some());
    }

    #[test]
    fn test_false_positive_control_takes_min() {
        // Pattern layer flags an overcall (fpc 0.0); judge says 1.0.
        let provider = CountingProvider {
            response: judge_json([0.9, 0.9, 0.9, 0.9, 1.0], Some("D")),
            calls: Arc::new(AtomicUsize::new(0)),
        };
        let grader = RubricGrader::new(Some(Box::new(provider)), GraderConfig::default());
        let grade = grader
            .grade(
                &low_confidence_task(),
                "pneumothorax and also tension pneumothorax",
                "model-a",
                0,
            )
            .unwrap();
        assert_eq!(grade.detection_layer, DetectionLayer::Judge);
        assert_eq!(grade.scores.false_positive_control, 0.0);
    }

    #[test]
    fn test_judge_class_replaces_pattern_class() {
        // Patterns say class C (partial); judge says clean pass.
        let provider = CountingProvider {
            response: judge_json([0.9, 0.9, 0.9, 0.9, 1.0], None),
            calls: Arc::new(AtomicUsize::new(0)),
        };
        let mut task = low_confidence_task();
        task.pattern_checks.push(PatternCheck {
            name: "second_required".to_string(),
            kind: CheckKind::Contains,
            pattern: "pleural".to_string(),
            required: true,
        });
        let grader = RubricGrader::new(Some(Box::new(provider)), GraderConfig::default());
        let grade = grader
            .grade(&task, "pneumothorax noted", "model-a", 0)
            .unwrap();
        assert_eq!(grade.failure_class, None);
        assert!(grade.passed);
    }

    #[test]
    fn test_judge_failure_falls_back_silently() {
        let grader = RubricGrader::new(Some(Box::new(FailingProvider)), GraderConfig::default());
        let grade = grader
            .grade(&low_confidence_task(), "pneumothorax noted", "model-a", 0)
            .unwrap();
        assert_eq!(grade.detection_layer, DetectionLayer::Patterns);
        assert!(grade.judge_result.is_none());
        // Pattern-derived classification survives.
        assert_eq!(grade.failure_class, None);
    }

    #[test]
    fn test_class_b_always_fails_despite_high_score() {
        let provider = CountingProvider {
            response: judge_json([1.0, 1.0, 1.0, 1.0, 1.0], Some("B")),
            calls: Arc::new(AtomicUsize::new(0)),
        };
        let grader = RubricGrader::new(Some(Box::new(provider)), GraderConfig::default());
        let grade = grader
            .grade(&low_confidence_task(), "pneumothorax noted", "model-a", 0)
            .unwrap();
        assert!((grade.weighted_score - 1.0).abs() < 1e-12);
        assert_eq!(grade.failure_class, Some(FailureClass::B));
        assert!(!grade.passed);
    }

    #[test]
    fn test_pattern_only_flag_suppresses_judge() {
        let calls = Arc::new(AtomicUsize::new(0));
        let provider = CountingProvider {
            response: judge_json([0.0; 5], Some("A")),
            calls: Arc::clone(&calls),
        };
        let config = GraderConfig {
            pattern_only: true,
            ..GraderConfig::default()
        };
        let grader = RubricGrader::new(Some(Box::new(provider)), config);
        let grade = grader
            .grade(&low_confidence_task(), "pneumothorax noted", "model-a", 0)
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(grade.detection_layer, DetectionLayer::Patterns);
    }

    #[test]
    fn test_no_checks_forces_escalation() {
        let calls = Arc::new(AtomicUsize::new(0));
        let provider = CountingProvider {
            response: judge_json([0.8, 0.8, 0.8, 0.8, 1.0], None),
            calls: Arc::clone(&calls),
        };
        let mut task = sample_task();
        task.pattern_checks.clear();
        let grader = RubricGrader::new(Some(Box::new(provider)), GraderConfig::default());
        let grade = grader.grade(&task, "anything", "model-a", 0).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(grade.detection_layer, DetectionLayer::Judge);
    }

    // =========================================================================
    // Detection layer encoding tests
    // =========================================================================

    #[test]
    fn test_detection_layer_wire_encoding() {
        assert_eq!(u8::from(DetectionLayer::Patterns), 0);
        assert_eq!(u8::from(DetectionLayer::Judge), 2);
        assert_eq!(DetectionLayer::try_from(0).unwrap(), DetectionLayer::Patterns);
        assert_eq!(DetectionLayer::try_from(2).unwrap(), DetectionLayer::Judge);
        assert!(DetectionLayer::try_from(1).is_err());
    }
}
