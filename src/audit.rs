//! Program self-audit: coverage, calibration drift, saturation, regression.
//!
//! Orchestrates the analysis passes over a set of run directories and
//! appends a numbered entry to the audit log. The log is the durable record
//! of evaluation health over time.

use crate::drift::{compute_calibration_drift, DriftConfig};
use crate::gradelog::{load_grades_from_dir, GradeLogError, GradeRecord};
use crate::regression::detect_regression;
use crate::saturation::{detect_saturation_in_dirs, SaturationConfig};
use crate::task::Modality;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Saturation rate above which the corpus needs evolution
const SATURATION_FINDING_THRESHOLD: f64 = 0.1;

#[derive(Debug, Error)]
pub enum AuditError {
    #[error("audit I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("audit YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    GradeLog(#[from] GradeLogError),

    #[error(transparent)]
    Calibration(#[from] crate::calibration::CalibrationError),

    #[error("task glob error: {0}")]
    Glob(#[from] glob::PatternError),
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum AuditType {
    #[default]
    Scheduled,
    EventDriven,
}

#[derive(Debug, Clone)]
pub struct AuditConfig {
    pub tasks_dir: PathBuf,
    pub audit_log_path: PathBuf,
    pub calibration_set_path: PathBuf,
    pub audit_type: AuditType,
    pub drift: DriftConfig,
    pub saturation: SaturationConfig,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            tasks_dir: PathBuf::from("configs/tasks"),
            audit_log_path: PathBuf::from("results/audit_log.yaml"),
            calibration_set_path: PathBuf::from("configs/calibration/calibration_set.yaml"),
            audit_type: AuditType::Scheduled,
            drift: DriftConfig::default(),
            saturation: SaturationConfig::default(),
        }
    }
}

/// Corpus coverage: which tasks have ever been evaluated
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoverageSummary {
    pub total_tasks: usize,
    pub tasks_with_results: usize,
    pub tasks_never_run: usize,
    pub modality_coverage: BTreeMap<String, f64>,
}

/// Drift metrics retained in the audit entry; None when no grades carried
/// both layers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalibrationSummary {
    pub kappa: Option<f64>,
    pub agreement: Option<f64>,
    pub drift_detected: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SaturationSummary {
    pub saturated_tasks: usize,
    pub saturation_rate: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegressionSummary {
    pub overall_regression: bool,
    pub regressed_modalities: Vec<String>,
}

/// One numbered audit log entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    pub audit_type: AuditType,
    pub coverage: CoverageSummary,
    pub calibration: CalibrationSummary,
    pub saturation: SaturationSummary,
    pub regression: Option<RegressionSummary>,
    pub findings: Vec<String>,
    pub recommendations: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct AuditLog {
    #[serde(default)]
    audits: Vec<AuditEntry>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct CalibrationSet {
    #[serde(default)]
    task_ids: Vec<String>,
}

fn load_audit_log(path: &Path) -> Result<AuditLog, AuditError> {
    if !path.exists() {
        return Ok(AuditLog::default());
    }
    let contents = std::fs::read_to_string(path)?;
    if contents.trim().is_empty() {
        return Ok(AuditLog::default());
    }
    Ok(serde_yaml::from_str(&contents)?)
}

fn load_calibration_set(path: &Path) -> Result<BTreeSet<String>, AuditError> {
    if !path.exists() {
        return Ok(BTreeSet::new());
    }
    let contents = std::fs::read_to_string(path)?;
    if contents.trim().is_empty() {
        return Ok(BTreeSet::new());
    }
    let set: CalibrationSet = serde_yaml::from_str(&contents)?;
    Ok(set.task_ids.into_iter().collect())
}

/// Count task YAMLs per modality directory under the tasks root
fn count_task_yamls(tasks_dir: &Path) -> Result<BTreeMap<String, usize>, AuditError> {
    let mut counts: BTreeMap<String, usize> = Modality::ALL
        .iter()
        .map(|m| (m.as_str().to_string(), 0))
        .collect();
    counts.insert("total".to_string(), 0);

    let pattern = format!("{}/**/*.yaml", tasks_dir.display());
    for entry in glob::glob(&pattern)?.flatten() {
        if let Some(modality) = entry
            .parent()
            .and_then(Path::file_name)
            .and_then(|n| n.to_str())
        {
            if let Some(count) = counts.get_mut(modality) {
                *count += 1;
            }
        }
        *counts.entry("total".to_string()).or_insert(0) += 1;
    }
    Ok(counts)
}

/// Run all audit checks over the given run directories (oldest first) and
/// append a numbered entry to the audit log.
///
/// # Errors
///
/// Returns `AuditError` when grade logs, the audit log, or the calibration
/// set fail to load, or the updated log cannot be written.
#[allow(clippy::cast_precision_loss, clippy::too_many_lines)]
pub fn run_audit(
    results_dirs: &[PathBuf],
    config: &AuditConfig,
) -> Result<AuditEntry, AuditError> {
    let mut audit_log = load_audit_log(&config.audit_log_path)?;
    let audit_id = format!("AUDIT-{:03}", audit_log.audits.len() + 1);

    // Coverage: corpus size vs tasks that have ever produced a grade.
    let task_counts = count_task_yamls(&config.tasks_dir)?;
    let mut all_grades: Vec<GradeRecord> = Vec::new();
    let mut per_run_grades: Vec<Vec<GradeRecord>> = Vec::new();
    for dir in results_dirs {
        let grades = load_grades_from_dir(dir)?;
        all_grades.extend(grades.iter().cloned());
        per_run_grades.push(grades);
    }
    let tasks_with_results: BTreeSet<&str> =
        all_grades.iter().map(|g| g.task_id.as_str()).collect();

    let total_tasks = task_counts.get("total").copied().unwrap_or(0);
    let tasks_never_run = total_tasks.saturating_sub(tasks_with_results.len());

    let mut modality_coverage = BTreeMap::new();
    for modality in Modality::ALL {
        let mod_total = task_counts.get(modality.as_str()).copied().unwrap_or(0);
        let with_results = tasks_with_results
            .iter()
            .filter(|t| t.starts_with(modality.id_prefix()))
            .count();
        modality_coverage.insert(
            modality.as_str().to_string(),
            if mod_total > 0 {
                with_results as f64 / mod_total as f64
            } else {
                0.0
            },
        );
    }

    // Calibration drift over the pooled grades.
    let cal_set = load_calibration_set(&config.calibration_set_path)?;
    let cal_filter = if cal_set.is_empty() { None } else { Some(&cal_set) };
    let drift_report = compute_calibration_drift(&all_grades, cal_filter, &config.drift)?;

    // Saturation across all runs.
    let sat_report = detect_saturation_in_dirs(results_dirs, &config.saturation)?;
    let saturation = SaturationSummary {
        saturated_tasks: sat_report.saturated_tasks,
        saturation_rate: sat_report.saturation_rate,
    };

    // Regression between the two most recent runs.
    let regression = if per_run_grades.len() >= 2 {
        let current = &per_run_grades[per_run_grades.len() - 1];
        let prior = &per_run_grades[per_run_grades.len() - 2];
        let result = detect_regression(current, prior);
        Some(RegressionSummary {
            overall_regression: result.overall_regression,
            regressed_modalities: result.regressed_modalities,
        })
    } else {
        None
    };

    let mut findings = Vec::new();
    let mut recommendations = Vec::new();

    if tasks_never_run as f64 > total_tasks as f64 * 0.5 {
        findings.push(format!(
            "Over 50% of tasks ({tasks_never_run}/{total_tasks}) have never been evaluated"
        ));
        recommendations.push("Run full-corpus evaluation for coverage".to_string());
    }

    if drift_report.drift_detected {
        findings.push(format!(
            "Calibration drift detected: kappa={:.3}, agreement={:.1}%",
            drift_report.layer0_vs_layer2_kappa,
            drift_report.layer0_vs_layer2_agreement * 100.0
        ));
        recommendations.push("Review grading patterns and judge alignment".to_string());
    }

    if saturation.saturation_rate > SATURATION_FINDING_THRESHOLD {
        findings.push(format!(
            "Saturation rate {:.1}% exceeds 10%",
            saturation.saturation_rate * 100.0
        ));
        recommendations.push("Initiate corpus evolution for saturated tasks".to_string());
    }

    if let Some(reg) = &regression {
        if reg.overall_regression {
            findings.push(format!(
                "Pass-rate regression in: {}",
                reg.regressed_modalities.join(", ")
            ));
            recommendations
                .push("Compare model versions and grading changes between runs".to_string());
        }
    }

    let entry = AuditEntry {
        id: audit_id,
        timestamp: Utc::now(),
        audit_type: config.audit_type,
        coverage: CoverageSummary {
            total_tasks,
            tasks_with_results: tasks_with_results.len(),
            tasks_never_run,
            modality_coverage,
        },
        calibration: CalibrationSummary {
            kappa: (drift_report.total_grades > 0).then_some(drift_report.layer0_vs_layer2_kappa),
            agreement: (drift_report.total_grades > 0)
                .then_some(drift_report.layer0_vs_layer2_agreement),
            drift_detected: drift_report.drift_detected,
        },
        saturation,
        regression,
        findings,
        recommendations,
    };

    audit_log.audits.push(entry.clone());
    if let Some(parent) = config.audit_log_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    std::fs::write(&config.audit_log_path, serde_yaml::to_string(&audit_log)?)?;

    tracing::info!(
        id = %entry.id,
        coverage = entry.coverage.tasks_with_results,
        drift = entry.calibration.drift_detected,
        findings = entry.findings.len(),
        "audit complete"
    );
    Ok(entry)
}
