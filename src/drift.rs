//! Calibration drift detection: monitor grading consistency over time.
//!
//! Compares Layer 0 (pattern) and Layer 2 (judge) failure classifications
//! over grades that carry both layers. Low kappa or low raw agreement flags
//! drift: the two layers no longer see the same failures.

use crate::calibration::{
    cohens_kappa, compute_calibration, load_calibration, CalibrationEntry, CalibrationError,
    CalibrationResult,
};
use crate::dimensions::DIMENSION_NAMES;
use crate::gradelog::GradeRecord;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;
use std::path::Path;

/// Minimum Cohen's kappa before drift is flagged
pub const DEFAULT_KAPPA_THRESHOLD: f64 = 0.60;

/// Minimum raw agreement before drift is flagged
pub const DEFAULT_AGREEMENT_THRESHOLD: f64 = 0.70;

#[derive(Debug, Clone)]
pub struct DriftConfig {
    pub kappa_threshold: f64,
    pub agreement_threshold: f64,
}

impl Default for DriftConfig {
    fn default() -> Self {
        Self {
            kappa_threshold: DEFAULT_KAPPA_THRESHOLD,
            agreement_threshold: DEFAULT_AGREEMENT_THRESHOLD,
        }
    }
}

/// Agreement metrics for one modality
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ModalityAgreement {
    pub agreement: f64,
    pub kappa: f64,
}

/// Calibration drift analysis report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriftReport {
    pub layer0_vs_layer2_agreement: f64,
    pub layer0_vs_layer2_kappa: f64,
    pub per_modality: BTreeMap<String, ModalityAgreement>,
    pub drift_detected: bool,
    pub kappa_threshold: f64,
    pub agreement_threshold: f64,
    pub total_grades: usize,
    pub human_comparison: Option<CalibrationResult>,
}

impl DriftReport {
    fn empty(config: &DriftConfig, total_grades: usize) -> Self {
        Self {
            layer0_vs_layer2_agreement: 0.0,
            layer0_vs_layer2_kappa: 0.0,
            per_modality: BTreeMap::new(),
            drift_detected: false,
            kappa_threshold: config.kappa_threshold,
            agreement_threshold: config.agreement_threshold,
            total_grades,
            human_comparison: None,
        }
    }
}

/// Layer 0 label: PASS when every required pattern passed
fn layer0_label(record: &GradeRecord) -> Option<String> {
    let summary = record.pattern_summary.as_ref()?;
    Some(if summary.all_required_pass() {
        "PASS".to_string()
    } else {
        "FAIL".to_string()
    })
}

/// Layer 2 label: the judge's failure class, or PASS when it assigned none
fn layer2_label(record: &GradeRecord) -> Option<String> {
    let summary = record.judge_summary.as_ref()?;
    Some(summary.failure_class.map_or_else(
        || "PASS".to_string(),
        |c| c.as_str().to_string(),
    ))
}

/// Compute calibration drift over grades that carry both grading layers.
///
/// Grades without both a pattern summary and a judge summary are excluded;
/// an optional calibration set restricts analysis to those task ids.
///
/// # Errors
///
/// Returns `CalibrationError` if kappa computation fails.
#[allow(clippy::cast_precision_loss)]
pub fn compute_calibration_drift(
    grades: &[GradeRecord],
    calibration_set_ids: Option<&BTreeSet<String>>,
    config: &DriftConfig,
) -> Result<DriftReport, CalibrationError> {
    let grades: Vec<&GradeRecord> = match calibration_set_ids {
        Some(ids) => grades.iter().filter(|g| ids.contains(&g.task_id)).collect(),
        None => grades.iter().collect(),
    };

    if grades.is_empty() {
        return Ok(DriftReport::empty(config, 0));
    }

    let mut layer0_labels = Vec::new();
    let mut layer2_labels = Vec::new();
    let mut modality_labels: BTreeMap<String, (Vec<String>, Vec<String>)> = BTreeMap::new();

    for grade in &grades {
        let (Some(l0), Some(l2)) = (layer0_label(grade), layer2_label(grade)) else {
            continue;
        };
        let (mods_l0, mods_l2) = modality_labels.entry(grade.modality_bucket()).or_default();
        mods_l0.push(l0.clone());
        mods_l2.push(l2.clone());
        layer0_labels.push(l0);
        layer2_labels.push(l2);
    }

    if layer0_labels.is_empty() {
        return Ok(DriftReport::empty(config, grades.len()));
    }

    let agreement = layer0_labels
        .iter()
        .zip(&layer2_labels)
        .filter(|(a, b)| a == b)
        .count() as f64
        / layer0_labels.len() as f64;
    let kappa = cohens_kappa(&layer0_labels, &layer2_labels)?;

    let mut per_modality = BTreeMap::new();
    for (modality, (l0, l2)) in &modality_labels {
        if l0.is_empty() {
            continue;
        }
        let mod_agreement =
            l0.iter().zip(l2).filter(|(a, b)| a == b).count() as f64 / l0.len() as f64;
        per_modality.insert(
            modality.clone(),
            ModalityAgreement {
                agreement: mod_agreement,
                kappa: cohens_kappa(l0, l2)?,
            },
        );
    }

    let drift_detected = kappa < config.kappa_threshold || agreement < config.agreement_threshold;

    Ok(DriftReport {
        layer0_vs_layer2_agreement: agreement,
        layer0_vs_layer2_kappa: kappa,
        per_modality,
        drift_detected,
        kappa_threshold: config.kappa_threshold,
        agreement_threshold: config.agreement_threshold,
        total_grades: grades.len(),
        human_comparison: None,
    })
}

/// Compare judge grades to a physician reference set.
///
/// Returns `None` when the reference file is absent, empty, or no grades
/// can be converted.
///
/// # Errors
///
/// Returns `CalibrationError` on I/O failure or a malformed reference line.
pub fn compare_to_human(
    human_grades_path: &Path,
    judge_grades: &[GradeRecord],
) -> Result<Option<CalibrationResult>, CalibrationError> {
    if !human_grades_path.exists() {
        return Ok(None);
    }
    let human_entries = load_calibration(human_grades_path)?;
    if human_entries.is_empty() {
        return Ok(None);
    }

    let judge_entries: Vec<CalibrationEntry> = judge_grades
        .iter()
        .map(|g| {
            let dimension_scores: BTreeMap<String, f64> = DIMENSION_NAMES
                .iter()
                .map(|name| (*name).to_string())
                .zip(g.dimension_scores.as_array())
                .collect();
            CalibrationEntry {
                task_id: g.task_id.clone(),
                dimension_scores,
                failure_class: g.failure_class.map(|c| c.as_str().to_string()),
                grader_id: "judge".to_string(),
                notes: String::new(),
            }
        })
        .collect();

    if judge_entries.is_empty() {
        return Ok(None);
    }

    compute_calibration(&human_entries, &judge_entries).map(Some)
}

/// Render a drift report as markdown
#[must_use]
pub fn format_drift_report(report: &DriftReport) -> String {
    let mut out = String::from("# Calibration Drift Report\n\n");
    let _ = writeln!(out, "- **Total grades analyzed:** {}", report.total_grades);
    let _ = writeln!(
        out,
        "- **Layer 0 vs Layer 2 agreement:** {:.1}%",
        report.layer0_vs_layer2_agreement * 100.0
    );
    let _ = writeln!(
        out,
        "- **Cohen's kappa:** {:.3}",
        report.layer0_vs_layer2_kappa
    );
    let _ = writeln!(
        out,
        "- **Drift detected:** {}",
        if report.drift_detected { "YES" } else { "No" }
    );
    let _ = writeln!(
        out,
        "- **Thresholds:** kappa >= {}, agreement >= {:.0}%",
        report.kappa_threshold,
        report.agreement_threshold * 100.0
    );
    out.push('\n');

    if !report.per_modality.is_empty() {
        out.push_str("## Per-Modality Breakdown\n\n");
        out.push_str("| Modality | Agreement | Kappa |\n");
        out.push_str("|----------|-----------|-------|\n");
        for (modality, data) in &report.per_modality {
            let _ = writeln!(
                out,
                "| {modality} | {:.1}% | {:.3} |",
                data.agreement * 100.0,
                data.kappa
            );
        }
        out.push('\n');
    }

    if let Some(hc) = &report.human_comparison {
        out.push_str("## Human Comparison\n\n");
        let _ = writeln!(out, "- **Cohen's kappa (vs human):** {:.3}", hc.cohens_kappa);
        let _ = writeln!(
            out,
            "- **Agreement (vs human):** {:.1}%",
            hc.percent_agreement * 100.0
        );
        let _ = writeln!(out, "- **Tasks compared:** {}", hc.n_tasks);
        out.push('\n');
    }

    out
}
