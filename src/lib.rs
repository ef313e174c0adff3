//! # RadBench
//!
//! Grading and evaluation-quality-control engine for a radiology multimodal
//! LLM benchmark.
//!
//! ## Grading Model
//!
//! Every (task, model, trial) response is graded in layers:
//! - Layer 0: deterministic pattern checks (regex, substring, negation)
//!   with a confidence heuristic
//! - Layer 2: an LLM judge, consulted only when pattern confidence is low,
//!   scoring five weighted dimensions and assigning a failure class (A-E)
//!
//! Grades are persisted append-only as JSON Lines, one run directory per
//! evaluation run.
//!
//! ## Evaluation Quality Control
//!
//! The analysis passes watch the watchers:
//!
//! ```text
//! grades.jsonl (per run)
//!        ↓
//! Calibration drift (Layer 0 vs Layer 2 kappa/agreement)
//! Saturation (tasks every model passes run after run)
//! Regression (per-modality two-proportion z-test between runs)
//! Suite tracking (capability -> regression | retired)
//!        ↓
//! Audit log (numbered entries: coverage, drift, saturation, regression)
//! ```

pub mod audit;
pub mod calibration;
pub mod dimensions;
pub mod drift;
pub mod gradelog;
pub mod grader;
pub mod judge;
pub mod patterns;
pub mod regression;
pub mod saturation;
pub mod scoring;
pub mod suite;
pub mod task;

pub use audit::{run_audit, AuditConfig, AuditEntry, AuditError, AuditType};
pub use calibration::{
    cohens_kappa, compute_calibration, load_calibration, pearson, CalibrationEntry,
    CalibrationError, CalibrationResult,
};
pub use dimensions::{DimensionScores, FailureClass, DIMENSION_NAMES};
pub use drift::{
    compare_to_human, compute_calibration_drift, format_drift_report, DriftConfig, DriftReport,
};
pub use gradelog::{
    append_grades, load_grades, load_grades_from_dir, GradeLogError, GradeRecord, GRADE_LOG_FILE,
};
pub use grader::{DetectionLayer, GradeResult, GraderConfig, RubricGrader};
pub use judge::{run_judge, JudgeError, JudgeProvider, JudgeResult};
pub use patterns::{
    check_laterality, check_negatives, run_modality_patterns, run_task_patterns, PatternResult,
};
pub use regression::{detect_regression, RegressionResult};
pub use saturation::{
    detect_saturation, detect_saturation_in_dirs, format_saturation_report, CorpusSaturationReport,
    SaturationConfig,
};
pub use scoring::{
    bootstrap_ci, pass_at_k, pass_pow_k, two_proportion_z_test, wilson_ci, BootstrapConfig,
};
pub use suite::{
    load_suite_membership, propose_promotions, propose_retirements, save_suite_membership,
    update_tracking, Suite, SuiteError, SuiteMembership, TaskMembership,
};
pub use task::{infer_modality, load_task, load_tasks_from_dir, Modality, Task, TaskError, TaskType};
