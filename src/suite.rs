//! Suite membership tracking: capability vs regression vs retired.
//!
//! Tasks start in the capability suite. Discriminating tasks (some models
//! pass, others fail) are promoted into the regression suite; tasks every
//! model passes run after run are retired and queued for evolution. The
//! state lives in a YAML file alongside the task corpus.

use crate::gradelog::GradeRecord;
use crate::task::Modality;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;

/// Minimum failing models (alongside at least one passing) for promotion
pub const DEFAULT_MIN_MODELS_BROKEN: usize = 2;

/// Consecutive all-pass runs before a capability task is retired
pub const DEFAULT_MAX_CONSECUTIVE_PASSES: u32 = 5;

#[derive(Debug, Error)]
pub enum SuiteError {
    #[error("suite membership I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("suite membership YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Which suite a task belongs to
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Suite {
    #[default]
    Capability,
    Regression,
    Retired,
}

impl Suite {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Capability => "capability",
            Self::Regression => "regression",
            Self::Retired => "retired",
        }
    }
}

/// Tracking data for a single task's suite membership
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TaskMembership {
    #[serde(default)]
    pub suite: Suite,
    #[serde(default)]
    pub consecutive_all_pass: u32,
    #[serde(default)]
    pub consecutive_any_fail: u32,
    #[serde(default)]
    pub promoted_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub retired_date: Option<DateTime<Utc>>,
}

/// Per-modality task counts for one suite
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SuiteCounts {
    pub xray: usize,
    pub ct: usize,
    pub mri: usize,
    pub ultrasound: usize,
    pub total: usize,
}

impl SuiteCounts {
    fn add(&mut self, task_id: &str) {
        match crate::task::infer_modality(task_id) {
            Some(Modality::Xray) => self.xray += 1,
            Some(Modality::Ct) => self.ct += 1,
            Some(Modality::Mri) => self.mri += 1,
            Some(Modality::Ultrasound) => self.ultrasound += 1,
            // Unknown modalities count toward the total only.
            None => {}
        }
        self.total += 1;
    }
}

/// Full suite membership state
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SuiteMembership {
    #[serde(default)]
    pub capability: SuiteCounts,
    #[serde(default)]
    pub regression: SuiteCounts,
    #[serde(default)]
    pub retired: SuiteCounts,
    #[serde(default)]
    pub tasks: BTreeMap<String, TaskMembership>,
}

impl SuiteMembership {
    /// Recompute per-modality counts from per-task data
    pub fn recount(&mut self) {
        let mut capability = SuiteCounts::default();
        let mut regression = SuiteCounts::default();
        let mut retired = SuiteCounts::default();
        for (task_id, tm) in &self.tasks {
            match tm.suite {
                Suite::Capability => capability.add(task_id),
                Suite::Regression => regression.add(task_id),
                Suite::Retired => retired.add(task_id),
            }
        }
        self.capability = capability;
        self.regression = regression;
        self.retired = retired;
    }

    /// Promote a task into the regression suite
    pub fn apply_promotion(&mut self, task_id: &str) {
        let tm = self.tasks.entry(task_id.to_string()).or_default();
        tm.suite = Suite::Regression;
        tm.promoted_date = Some(Utc::now());
        self.recount();
    }

    /// Retire a task from the capability suite
    pub fn apply_retirement(&mut self, task_id: &str) {
        let tm = self.tasks.entry(task_id.to_string()).or_default();
        tm.suite = Suite::Retired;
        tm.retired_date = Some(Utc::now());
        self.recount();
    }
}

/// Load suite membership from YAML; a missing file is an empty state.
///
/// # Errors
///
/// Returns `SuiteError` on I/O failure or malformed YAML.
pub fn load_suite_membership(path: &Path) -> Result<SuiteMembership, SuiteError> {
    if !path.exists() {
        return Ok(SuiteMembership::default());
    }
    let contents = std::fs::read_to_string(path)?;
    if contents.trim().is_empty() {
        return Ok(SuiteMembership::default());
    }
    Ok(serde_yaml::from_str(&contents)?)
}

/// Save suite membership to YAML, recounting suite totals first.
///
/// # Errors
///
/// Returns `SuiteError` on I/O or serialization failure.
pub fn save_suite_membership(
    membership: &mut SuiteMembership,
    path: &Path,
) -> Result<(), SuiteError> {
    membership.recount();
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let yaml = serde_yaml::to_string(membership)?;
    std::fs::write(path, yaml)?;
    Ok(())
}

/// Update consecutive pass/fail counters from a new run's grades.
///
/// A run counts as all-pass for a task when every trial of every model
/// passed; one counter resets whenever the other advances.
pub fn update_tracking(membership: &mut SuiteMembership, grades: &[GradeRecord]) {
    let mut task_results: BTreeMap<&str, Vec<bool>> = BTreeMap::new();
    for grade in grades {
        task_results
            .entry(grade.task_id.as_str())
            .or_default()
            .push(grade.passed);
    }

    for (task_id, results) in task_results {
        let tm = membership.tasks.entry(task_id.to_string()).or_default();
        if results.iter().all(|p| *p) {
            tm.consecutive_all_pass += 1;
            tm.consecutive_any_fail = 0;
        } else {
            tm.consecutive_any_fail += 1;
            tm.consecutive_all_pass = 0;
        }
    }
}

/// Propose tasks for promotion into the regression suite.
///
/// A task qualifies when it discriminates between models: at least
/// `min_models_broken` models have a mean pass rate below 0.5 while at
/// least one model passes. Tasks already in the regression suite are
/// skipped.
#[allow(clippy::cast_precision_loss)]
#[must_use]
pub fn propose_promotions(
    grades: &[GradeRecord],
    membership: &SuiteMembership,
    min_models_broken: usize,
) -> Vec<String> {
    let mut task_model_results: BTreeMap<&str, BTreeMap<&str, Vec<bool>>> = BTreeMap::new();
    for grade in grades {
        task_model_results
            .entry(grade.task_id.as_str())
            .or_default()
            .entry(grade.model.as_str())
            .or_default()
            .push(grade.passed);
    }

    let mut proposals = Vec::new();
    for (task_id, model_results) in task_model_results {
        if membership
            .tasks
            .get(task_id)
            .is_some_and(|tm| tm.suite == Suite::Regression)
        {
            continue;
        }

        let rates: Vec<f64> = model_results
            .values()
            .map(|trials| {
                if trials.is_empty() {
                    0.0
                } else {
                    trials.iter().filter(|p| **p).count() as f64 / trials.len() as f64
                }
            })
            .collect();
        let passing = rates.iter().filter(|r| **r >= 0.5).count();
        let failing = rates.iter().filter(|r| **r < 0.5).count();

        if failing >= min_models_broken && passing >= 1 {
            proposals.push(task_id.to_string());
        }
    }
    proposals
}

/// Propose capability tasks whose all-pass streak warrants retirement
#[must_use]
pub fn propose_retirements(
    membership: &SuiteMembership,
    max_consecutive_passes: u32,
) -> Vec<String> {
    membership
        .tasks
        .iter()
        .filter(|(_, tm)| {
            tm.suite == Suite::Capability && tm.consecutive_all_pass >= max_consecutive_passes
        })
        .map(|(task_id, _)| task_id.clone())
        .collect()
}
