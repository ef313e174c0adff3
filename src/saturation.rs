//! Saturation detection: tasks that no longer discriminate between models.
//!
//! A task is saturated when every model passes all of its trials (pass^k)
//! over enough consecutive recent runs and holds an all-time pass rate at or
//! above the threshold. Saturated tasks are queued for evolution into harder
//! variants.

use crate::gradelog::{load_grades_from_dir, GradeLogError};
use crate::scoring::pass_pow_k;
use crate::task::modality_label;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;
use std::path::Path;

/// All-time pass rate at or above which a (task, model) pair can saturate
pub const DEFAULT_SATURATION_THRESHOLD: f64 = 0.95;

/// Consecutive recent all-pass runs required for saturation
pub const DEFAULT_MIN_CONSECUTIVE_RUNS: usize = 3;

#[derive(Debug, Clone)]
pub struct SaturationConfig {
    pub threshold: f64,
    pub min_consecutive_runs: usize,
}

impl Default for SaturationConfig {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_SATURATION_THRESHOLD,
            min_consecutive_runs: DEFAULT_MIN_CONSECUTIVE_RUNS,
        }
    }
}

/// Pass/fail trial outcomes for one run, keyed by (task id, model)
pub type RunTrials = BTreeMap<(String, String), Vec<bool>>;

/// Saturation status for a single task
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSaturation {
    pub task_id: String,
    pub models_saturated: BTreeMap<String, bool>,
    pub pass_rate_by_model: BTreeMap<String, f64>,
    pub consecutive_all_pass: usize,
    pub saturated: bool,
}

/// Per-modality saturation counts
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ModalitySaturation {
    pub total: usize,
    pub saturated: usize,
}

/// Saturation report across the full corpus
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorpusSaturationReport {
    pub total_tasks: usize,
    pub saturated_tasks: usize,
    pub saturation_rate: f64,
    pub per_modality: BTreeMap<String, ModalitySaturation>,
    pub task_details: Vec<TaskSaturation>,
    pub needs_evolution: Vec<String>,
    pub threshold: f64,
    pub min_consecutive_runs: usize,
}

impl CorpusSaturationReport {
    fn empty(config: &SaturationConfig) -> Self {
        Self {
            total_tasks: 0,
            saturated_tasks: 0,
            saturation_rate: 0.0,
            per_modality: BTreeMap::new(),
            task_details: Vec::new(),
            needs_evolution: Vec::new(),
            threshold: config.threshold,
            min_consecutive_runs: config.min_consecutive_runs,
        }
    }
}

/// Detect saturated tasks across ordered evaluation runs (oldest first).
#[allow(clippy::cast_precision_loss)]
#[must_use]
pub fn detect_saturation(runs: &[RunTrials], config: &SaturationConfig) -> CorpusSaturationReport {
    if runs.is_empty() {
        return CorpusSaturationReport::empty(config);
    }

    let mut all_task_ids = BTreeSet::new();
    let mut all_models = BTreeSet::new();
    for run in runs {
        for (task_id, model) in run.keys() {
            all_task_ids.insert(task_id.clone());
            all_models.insert(model.clone());
        }
    }

    let mut task_details = Vec::new();
    let mut needs_evolution = Vec::new();

    for task_id in &all_task_ids {
        let mut models_saturated = BTreeMap::new();
        let mut pass_rate_by_model = BTreeMap::new();

        for model in &all_models {
            let key = (task_id.clone(), model.clone());

            // Backward streak of all-pass runs, broken by any failed or
            // missing trial set.
            let mut consecutive = 0;
            for run in runs.iter().rev() {
                match run.get(&key) {
                    Some(trials) if !trials.is_empty() && pass_pow_k(trials) => consecutive += 1,
                    _ => break,
                }
            }

            let all_trials: Vec<bool> = runs
                .iter()
                .filter_map(|run| run.get(&key))
                .flatten()
                .copied()
                .collect();
            let rate = if all_trials.is_empty() {
                consecutive = 0;
                0.0
            } else {
                all_trials.iter().filter(|p| **p).count() as f64 / all_trials.len() as f64
            };

            models_saturated.insert(
                model.clone(),
                consecutive >= config.min_consecutive_runs && rate >= config.threshold,
            );
            pass_rate_by_model.insert(model.clone(), rate);
        }

        let saturated = !models_saturated.is_empty() && models_saturated.values().all(|s| *s);

        // Consecutive recent runs where every model passed every trial.
        let mut consecutive_all_pass = 0;
        for run in runs.iter().rev() {
            let all_pass = all_models.iter().all(|model| {
                run.get(&(task_id.clone(), model.clone()))
                    .is_some_and(|trials| !trials.is_empty() && pass_pow_k(trials))
            });
            if all_pass {
                consecutive_all_pass += 1;
            } else {
                break;
            }
        }

        if saturated {
            needs_evolution.push(task_id.clone());
        }
        task_details.push(TaskSaturation {
            task_id: task_id.clone(),
            models_saturated,
            pass_rate_by_model,
            consecutive_all_pass,
            saturated,
        });
    }

    let mut per_modality: BTreeMap<String, ModalitySaturation> = BTreeMap::new();
    for detail in &task_details {
        let entry = per_modality.entry(modality_label(&detail.task_id)).or_default();
        entry.total += 1;
        if detail.saturated {
            entry.saturated += 1;
        }
    }

    let total_tasks = all_task_ids.len();
    let saturated_tasks = needs_evolution.len();
    CorpusSaturationReport {
        total_tasks,
        saturated_tasks,
        saturation_rate: if total_tasks > 0 {
            saturated_tasks as f64 / total_tasks as f64
        } else {
            0.0
        },
        per_modality,
        task_details,
        needs_evolution,
        threshold: config.threshold,
        min_consecutive_runs: config.min_consecutive_runs,
    }
}

/// Detect saturation across run directories (oldest first), each holding a
/// grade log.
///
/// # Errors
///
/// Returns `GradeLogError` if any run's grade log fails to load.
pub fn detect_saturation_in_dirs(
    results_dirs: &[impl AsRef<Path>],
    config: &SaturationConfig,
) -> Result<CorpusSaturationReport, GradeLogError> {
    let mut runs = Vec::new();
    for dir in results_dirs {
        let grades = load_grades_from_dir(dir.as_ref())?;
        let mut run: RunTrials = BTreeMap::new();
        for grade in grades {
            run.entry((grade.task_id.clone(), grade.model.clone()))
                .or_default()
                .push(grade.passed);
        }
        runs.push(run);
    }
    Ok(detect_saturation(&runs, config))
}

/// Render a saturation report as markdown
#[allow(clippy::cast_precision_loss)]
#[must_use]
pub fn format_saturation_report(report: &CorpusSaturationReport) -> String {
    let mut out = String::from("# Corpus Saturation Report\n\n");
    let _ = writeln!(out, "- **Total tasks:** {}", report.total_tasks);
    let _ = writeln!(out, "- **Saturated tasks:** {}", report.saturated_tasks);
    let _ = writeln!(
        out,
        "- **Saturation rate:** {:.1}%",
        report.saturation_rate * 100.0
    );
    let _ = writeln!(out, "- **Threshold:** pass^k > {}", report.threshold);
    let _ = writeln!(
        out,
        "- **Min consecutive runs:** {}",
        report.min_consecutive_runs
    );
    out.push('\n');

    if !report.per_modality.is_empty() {
        out.push_str("## Per-Modality Breakdown\n\n");
        out.push_str("| Modality | Total | Saturated | Rate |\n");
        out.push_str("|----------|-------|-----------|------|\n");
        for (modality, data) in &report.per_modality {
            let rate = if data.total > 0 {
                data.saturated as f64 / data.total as f64
            } else {
                0.0
            };
            let _ = writeln!(
                out,
                "| {modality} | {} | {} | {:.1}% |",
                data.total,
                data.saturated,
                rate * 100.0
            );
        }
        out.push('\n');
    }

    if !report.needs_evolution.is_empty() {
        out.push_str("## Tasks Needing Evolution\n\n");
        for task_id in &report.needs_evolution {
            let _ = writeln!(out, "- {task_id}");
        }
        out.push('\n');
    }

    out
}
