//! Append-only grade log in JSON Lines format.
//!
//! One record per (task, model, trial). Records are flattened summaries of
//! `GradeResult`: enough for every downstream analysis without retaining raw
//! model responses.

use crate::dimensions::{DimensionScores, FailureClass};
use crate::grader::{DetectionLayer, GradeResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::Path;
use thiserror::Error;

/// Canonical grade-log filename inside a run directory
pub const GRADE_LOG_FILE: &str = "grades.jsonl";

#[derive(Debug, Error)]
pub enum GradeLogError {
    #[error("grade log I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed grade record at line {line}: {source}")]
    Json {
        line: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to encode grade record: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Pattern-layer evidence retained in the log
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PatternSummary {
    pub required_passed: usize,
    pub required_total: usize,
    pub optional_passed: usize,
    pub optional_total: usize,
    pub confidence: f64,
}

impl PatternSummary {
    #[must_use]
    pub const fn all_required_pass(&self) -> bool {
        self.required_passed == self.required_total
    }
}

/// Judge-layer evidence retained in the log
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JudgeSummary {
    pub judge_model: String,
    pub failure_class: Option<FailureClass>,
    pub reasoning: String,
}

/// One persisted grading outcome
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GradeRecord {
    pub task_id: String,
    pub model: String,
    pub trial: u32,
    pub passed: bool,
    pub weighted_score: f64,
    pub dimension_scores: DimensionScores,
    pub failure_class: Option<FailureClass>,
    pub detection_layer: DetectionLayer,
    #[serde(default)]
    pub modality: Option<String>,
    #[serde(default)]
    pub pattern_summary: Option<PatternSummary>,
    #[serde(default)]
    pub judge_summary: Option<JudgeSummary>,
    #[serde(default)]
    pub overcalled_negatives: Vec<String>,
    #[serde(default = "default_true")]
    pub laterality_correct: bool,
    #[serde(default)]
    pub modality_signals: BTreeMap<String, bool>,
}

const fn default_true() -> bool {
    true
}

impl From<&GradeResult> for GradeRecord {
    fn from(result: &GradeResult) -> Self {
        Self {
            task_id: result.task_id.clone(),
            model: result.model.clone(),
            trial: result.trial,
            passed: result.passed,
            weighted_score: result.weighted_score,
            dimension_scores: result.scores,
            failure_class: result.failure_class,
            detection_layer: result.detection_layer,
            modality: Some(crate::task::modality_label(&result.task_id)),
            pattern_summary: Some(PatternSummary {
                required_passed: result.pattern_result.required_passed,
                required_total: result.pattern_result.required_total,
                optional_passed: result.pattern_result.optional_passed,
                optional_total: result.pattern_result.optional_total,
                confidence: result.pattern_result.confidence,
            }),
            judge_summary: result.judge_result.as_ref().map(|j| JudgeSummary {
                judge_model: j.judge_model.clone(),
                failure_class: j.failure_class,
                reasoning: j.reasoning.clone(),
            }),
            overcalled_negatives: result.overcalled_negatives.clone(),
            laterality_correct: result.laterality_correct,
            modality_signals: result.modality_signals.clone(),
        }
    }
}

impl GradeRecord {
    /// Modality bucket for breakdowns, falling back to task-id inference
    #[must_use]
    pub fn modality_bucket(&self) -> String {
        self.modality
            .clone()
            .unwrap_or_else(|| crate::task::modality_label(&self.task_id))
    }
}

/// Load all grade records from a JSONL file.
///
/// A missing file is treated as an empty log.
///
/// # Errors
///
/// Returns `GradeLogError` on I/O failure or a malformed line.
pub fn load_grades(path: &Path) -> Result<Vec<GradeRecord>, GradeLogError> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let reader = BufReader::new(File::open(path)?);
    let mut records = Vec::new();
    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let record = serde_json::from_str(&line)
            .map_err(|source| GradeLogError::Json { line: idx + 1, source })?;
        records.push(record);
    }
    Ok(records)
}

/// Load the canonical grade log from a run directory.
///
/// # Errors
///
/// Returns `GradeLogError` on I/O failure or a malformed line.
pub fn load_grades_from_dir(run_dir: &Path) -> Result<Vec<GradeRecord>, GradeLogError> {
    load_grades(&run_dir.join(GRADE_LOG_FILE))
}

/// Append records to a grade log, creating the file if needed.
///
/// # Errors
///
/// Returns `GradeLogError` on I/O or serialization failure.
pub fn append_grades(path: &Path, records: &[GradeRecord]) -> Result<(), GradeLogError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    for record in records {
        let json = serde_json::to_string(record)?;
        writeln!(file, "{json}")?;
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::{DimensionScores, FailureClass, GradeRecord, PatternSummary};
    use crate::grader::DetectionLayer;
    use std::collections::BTreeMap;

    pub(crate) fn sample_record(task_id: &str, model: &str, passed: bool) -> GradeRecord {
        GradeRecord {
            task_id: task_id.to_string(),
            model: model.to_string(),
            trial: 0,
            passed,
            weighted_score: if passed { 0.85 } else { 0.2 },
            dimension_scores: DimensionScores {
                diagnostic_accuracy: 1.0,
                finding_detection: 1.0,
                anatomic_precision: 1.0,
                clinical_relevance: 0.5,
                false_positive_control: 1.0,
            },
            failure_class: if passed { None } else { Some(FailureClass::A) },
            detection_layer: DetectionLayer::Patterns,
            modality: None,
            pattern_summary: Some(PatternSummary {
                required_passed: if passed { 2 } else { 0 },
                required_total: 2,
                optional_passed: 0,
                optional_total: 0,
                confidence: if passed { 0.85 } else { 0.9 },
            }),
            judge_summary: None,
            overcalled_negatives: Vec::new(),
            laterality_correct: true,
            modality_signals: BTreeMap::new(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::fixtures::sample_record;
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_is_empty_log() {
        let dir = TempDir::new().unwrap();
        let records = load_grades(&dir.path().join("nope.jsonl")).unwrap();
        assert!(records.is_empty());
    }

    #[test]
    fn test_append_then_load_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(GRADE_LOG_FILE);
        let records = vec![
            sample_record("XRAY-001", "model-a", true),
            sample_record("CT-002", "model-a", false),
        ];
        append_grades(&path, &records).unwrap();
        append_grades(&path, &[sample_record("MRI-003", "model-b", true)]).unwrap();

        let loaded = load_grades(&path).unwrap();
        assert_eq!(loaded.len(), 3);
        assert_eq!(loaded[0], records[0]);
        assert_eq!(loaded[1].failure_class, Some(FailureClass::A));
        assert_eq!(loaded[2].model, "model-b");
    }

    #[test]
    fn test_load_from_run_dir() {
        let dir = TempDir::new().unwrap();
        append_grades(
            &dir.path().join(GRADE_LOG_FILE),
            &[sample_record("US-004", "model-a", true)],
        )
        .unwrap();
        let loaded = load_grades_from_dir(dir.path()).unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].task_id, "US-004");
    }

    #[test]
    fn test_malformed_line_reports_line_number() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(GRADE_LOG_FILE);
        append_grades(&path, &[sample_record("XRAY-001", "model-a", true)]).unwrap();
        std::fs::write(
            &path,
            format!(
                "{}\nnot json\n",
                std::fs::read_to_string(&path).unwrap().trim_end()
            ),
        )
        .unwrap();
        match load_grades(&path) {
            Err(GradeLogError::Json { line, .. }) => assert_eq!(line, 2),
            other => panic!("expected Json error, got {other:?}"),
        }
    }

    #[test]
    fn test_blank_lines_skipped() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(GRADE_LOG_FILE);
        let json = serde_json::to_string(&sample_record("XRAY-001", "m", true)).unwrap();
        std::fs::write(&path, format!("{json}\n\n{json}\n")).unwrap();
        assert_eq!(load_grades(&path).unwrap().len(), 2);
    }

    #[test]
    fn test_modality_bucket_inference_fallback() {
        let mut record = sample_record("CT-010", "m", true);
        assert_eq!(record.modality_bucket(), "ct");
        record.modality = Some("xray".to_string());
        assert_eq!(record.modality_bucket(), "xray");
        let unknown = sample_record("PET-001", "m", true);
        assert_eq!(unknown.modality_bucket(), "unknown");
    }

    #[test]
    fn test_detection_layer_serializes_as_integer() {
        let record = sample_record("XRAY-001", "m", true);
        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains("\"detection_layer\":0"));
    }
}
