//! Version-to-version regression detection using a two-proportion z-test.
//!
//! Pass counts are pooled per modality; a modality regresses when the
//! current run's pass rate is significantly below the prior run's.

use crate::gradelog::GradeRecord;
use crate::scoring::{two_proportion_z_test, wilson_ci};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Pass counts and confidence interval for one side of the comparison
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModalityCounts {
    pub passed: usize,
    pub total: usize,
    pub wilson_ci: (f64, f64),
}

/// Full comparison detail for one modality
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModalityComparison {
    pub current: ModalityCounts,
    pub prior: ModalityCounts,
    pub z_score: f64,
    pub regression: bool,
}

/// Result of regression detection between two runs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegressionResult {
    pub overall_regression: bool,
    pub regressed_modalities: Vec<String>,
    pub z_scores: BTreeMap<String, f64>,
    pub current_rates: BTreeMap<String, f64>,
    pub prior_rates: BTreeMap<String, f64>,
    pub details: BTreeMap<String, ModalityComparison>,
}

/// Detect per-modality regression between the current and prior run.
///
/// Modalities missing trials in either run are skipped rather than compared
/// against an empty pool.
#[allow(clippy::cast_precision_loss)]
#[must_use]
pub fn detect_regression(
    current_grades: &[GradeRecord],
    prior_grades: &[GradeRecord],
) -> RegressionResult {
    let current_by_mod = modality_pass_counts(current_grades);
    let prior_by_mod = modality_pass_counts(prior_grades);

    let all_modalities: BTreeSet<&String> =
        current_by_mod.keys().chain(prior_by_mod.keys()).collect();

    let mut regressed_modalities = Vec::new();
    let mut z_scores = BTreeMap::new();
    let mut current_rates = BTreeMap::new();
    let mut prior_rates = BTreeMap::new();
    let mut details = BTreeMap::new();

    for modality in all_modalities {
        let (c_pass, c_total) = current_by_mod.get(modality).copied().unwrap_or((0, 0));
        let (p_pass, p_total) = prior_by_mod.get(modality).copied().unwrap_or((0, 0));
        if c_total == 0 || p_total == 0 {
            continue;
        }

        let (z, is_regression) = two_proportion_z_test(c_pass, c_total, p_pass, p_total);
        let z = round3(z);
        z_scores.insert(modality.clone(), z);
        current_rates.insert(modality.clone(), round3(c_pass as f64 / c_total as f64));
        prior_rates.insert(modality.clone(), round3(p_pass as f64 / p_total as f64));

        if is_regression {
            regressed_modalities.push(modality.clone());
        }

        details.insert(
            modality.clone(),
            ModalityComparison {
                current: ModalityCounts {
                    passed: c_pass,
                    total: c_total,
                    wilson_ci: wilson_ci(c_pass, c_total),
                },
                prior: ModalityCounts {
                    passed: p_pass,
                    total: p_total,
                    wilson_ci: wilson_ci(p_pass, p_total),
                },
                z_score: z,
                regression: is_regression,
            },
        );
    }

    RegressionResult {
        overall_regression: !regressed_modalities.is_empty(),
        regressed_modalities,
        z_scores,
        current_rates,
        prior_rates,
        details,
    }
}

fn modality_pass_counts(grades: &[GradeRecord]) -> BTreeMap<String, (usize, usize)> {
    let mut counts: BTreeMap<String, (usize, usize)> = BTreeMap::new();
    for grade in grades {
        let entry = counts.entry(grade.modality_bucket()).or_default();
        entry.1 += 1;
        if grade.passed {
            entry.0 += 1;
        }
    }
    counts
}

fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}
