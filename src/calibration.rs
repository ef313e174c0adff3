//! Human calibration set and Cohen's kappa for judge validation.
//!
//! A calibration set is a JSONL file of human-graded entries. Judge output
//! over the same tasks is compared against it: kappa and percent agreement
//! over failure classes, Pearson correlation per dimension.

use crate::dimensions::DIMENSION_NAMES;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CalibrationError {
    #[error("calibration I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed calibration entry at line {line}: {source}")]
    Json {
        line: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error("label lists must be the same length ({a} vs {b})")]
    LengthMismatch { a: usize, b: usize },
}

/// One human- or judge-graded calibration entry
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CalibrationEntry {
    pub task_id: String,
    pub dimension_scores: BTreeMap<String, f64>,
    #[serde(default)]
    pub failure_class: Option<String>,
    #[serde(default)]
    pub grader_id: String,
    #[serde(default)]
    pub notes: String,
}

impl CalibrationEntry {
    /// Failure-class label for agreement comparison, with passes as "PASS"
    #[must_use]
    pub fn class_label(&self) -> String {
        self.failure_class
            .clone()
            .unwrap_or_else(|| "PASS".to_string())
    }
}

/// Outcome of comparing judge grades to the human calibration set
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalibrationResult {
    pub cohens_kappa: f64,
    pub percent_agreement: f64,
    pub per_dimension_correlation: BTreeMap<String, f64>,
    pub n_tasks: usize,
    pub confusion_matrix: BTreeMap<String, BTreeMap<String, usize>>,
}

impl CalibrationResult {
    #[must_use]
    pub fn empty() -> Self {
        Self {
            cohens_kappa: 0.0,
            percent_agreement: 0.0,
            per_dimension_correlation: BTreeMap::new(),
            n_tasks: 0,
            confusion_matrix: BTreeMap::new(),
        }
    }
}

/// Load a calibration set from a JSONL file.
///
/// # Errors
///
/// Returns `CalibrationError` on I/O failure or a malformed line.
pub fn load_calibration(path: &Path) -> Result<Vec<CalibrationEntry>, CalibrationError> {
    let reader = BufReader::new(File::open(path)?);
    let mut entries = Vec::new();
    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let entry = serde_json::from_str(&line)
            .map_err(|source| CalibrationError::Json { line: idx + 1, source })?;
        entries.push(entry);
    }
    Ok(entries)
}

/// Cohen's kappa between two parallel sequences of categorical labels.
///
/// Returns 1.0 when expected agreement is exact (single shared category),
/// 0.0 on empty input. Kappa at or above 0.60 is moderate-to-substantial
/// agreement.
///
/// # Errors
///
/// Returns `CalibrationError::LengthMismatch` when the sequences differ in
/// length.
#[allow(clippy::cast_precision_loss)]
pub fn cohens_kappa(labels_a: &[String], labels_b: &[String]) -> Result<f64, CalibrationError> {
    if labels_a.len() != labels_b.len() {
        return Err(CalibrationError::LengthMismatch {
            a: labels_a.len(),
            b: labels_b.len(),
        });
    }
    let n = labels_a.len();
    if n == 0 {
        return Ok(0.0);
    }

    let categories: Vec<&String> = labels_a
        .iter()
        .chain(labels_b.iter())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    let cat_idx: BTreeMap<&String, usize> = categories
        .iter()
        .enumerate()
        .map(|(i, c)| (*c, i))
        .collect();
    let k = categories.len();

    let mut matrix = vec![vec![0usize; k]; k];
    for (a, b) in labels_a.iter().zip(labels_b) {
        matrix[cat_idx[a]][cat_idx[b]] += 1;
    }

    let observed = (0..k).map(|i| matrix[i][i]).sum::<usize>() as f64 / n as f64;

    let mut expected = 0.0;
    for i in 0..k {
        let row_sum: usize = matrix[i].iter().sum();
        let col_sum: usize = (0..k).map(|j| matrix[j][i]).sum();
        expected += (row_sum * col_sum) as f64 / (n * n) as f64;
    }

    if (expected - 1.0).abs() < f64::EPSILON {
        return Ok(1.0);
    }
    Ok((observed - expected) / (1.0 - expected))
}

/// Compare judge grades to human calibration grades over their shared tasks.
///
/// # Errors
///
/// Returns `CalibrationError` if kappa computation fails; matching by task id
/// itself cannot fail.
#[allow(clippy::cast_precision_loss)]
pub fn compute_calibration(
    human_entries: &[CalibrationEntry],
    judge_entries: &[CalibrationEntry],
) -> Result<CalibrationResult, CalibrationError> {
    let human_by_id: BTreeMap<&str, &CalibrationEntry> = human_entries
        .iter()
        .map(|e| (e.task_id.as_str(), e))
        .collect();
    let judge_by_id: BTreeMap<&str, &CalibrationEntry> = judge_entries
        .iter()
        .map(|e| (e.task_id.as_str(), e))
        .collect();
    let common_ids: Vec<&str> = human_by_id
        .keys()
        .filter(|id| judge_by_id.contains_key(**id))
        .copied()
        .collect();

    if common_ids.is_empty() {
        return Ok(CalibrationResult::empty());
    }

    let human_classes: Vec<String> = common_ids
        .iter()
        .map(|id| human_by_id[id].class_label())
        .collect();
    let judge_classes: Vec<String> = common_ids
        .iter()
        .map(|id| judge_by_id[id].class_label())
        .collect();

    let kappa = cohens_kappa(&human_classes, &judge_classes)?;
    let agree = human_classes
        .iter()
        .zip(&judge_classes)
        .filter(|(h, j)| h == j)
        .count();
    let percent_agreement = agree as f64 / common_ids.len() as f64;

    let mut per_dimension_correlation = BTreeMap::new();
    for dim in DIMENSION_NAMES {
        let h_vals: Vec<f64> = common_ids
            .iter()
            .map(|id| human_by_id[id].dimension_scores.get(dim).copied().unwrap_or(0.0))
            .collect();
        let j_vals: Vec<f64> = common_ids
            .iter()
            .map(|id| judge_by_id[id].dimension_scores.get(dim).copied().unwrap_or(0.0))
            .collect();
        per_dimension_correlation.insert(dim.to_string(), pearson(&h_vals, &j_vals));
    }

    let mut confusion_matrix: BTreeMap<String, BTreeMap<String, usize>> = BTreeMap::new();
    let categories: BTreeSet<&String> = human_classes.iter().chain(&judge_classes).collect();
    for c in &categories {
        let row = confusion_matrix.entry((*c).clone()).or_default();
        for cc in &categories {
            row.insert((*cc).clone(), 0);
        }
    }
    for (h, j) in human_classes.iter().zip(&judge_classes) {
        if let Some(row) = confusion_matrix.get_mut(h) {
            *row.entry(j.clone()).or_insert(0) += 1;
        }
    }

    Ok(CalibrationResult {
        cohens_kappa: kappa,
        percent_agreement,
        per_dimension_correlation,
        n_tasks: common_ids.len(),
        confusion_matrix,
    })
}

/// Pearson correlation coefficient; 0.0 for degenerate inputs
#[allow(clippy::cast_precision_loss)]
#[must_use]
pub fn pearson(x: &[f64], y: &[f64]) -> f64 {
    let n = x.len().min(y.len());
    if n < 2 {
        return 0.0;
    }
    let mx = x[..n].iter().sum::<f64>() / n as f64;
    let my = y[..n].iter().sum::<f64>() / n as f64;
    let cov: f64 = x[..n]
        .iter()
        .zip(&y[..n])
        .map(|(xi, yi)| (xi - mx) * (yi - my))
        .sum();
    let sx = x[..n].iter().map(|xi| (xi - mx).powi(2)).sum::<f64>().sqrt();
    let sy = y[..n].iter().map(|yi| (yi - my).powi(2)).sum::<f64>().sqrt();
    if sx == 0.0 || sy == 0.0 {
        return 0.0;
    }
    cov / (sx * sy)
}
