//! Statistical scoring primitives: Wilson and bootstrap intervals,
//! pass@k / pass^k, and the two-proportion z-test.
//!
//! All functions are pure and reentrant; they only read their inputs and
//! allocate local results.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use statrs::distribution::{ContinuousCDF, Normal};

/// z for a 95% two-sided interval
pub const Z_95: f64 = 1.96;

/// One-tailed regression threshold: z below this flags a regression
pub const REGRESSION_Z: f64 = -1.96;

/// Configuration for the bootstrap interval
#[derive(Debug, Clone)]
pub struct BootstrapConfig {
    /// Number of resamples
    pub iterations: usize,
    /// Percentile bounds (lower, upper), in percent
    pub percentiles: (f64, f64),
    /// Seed for reproducibility
    pub seed: u64,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            iterations: 10_000,
            percentiles: (2.5, 97.5),
            seed: 42,
        }
    }
}

/// Wilson score interval for a binomial proportion.
///
/// Valid at small n, unlike the normal approximation. Returns `(0.0, 1.0)`
/// for n = 0; bounds are clamped to [0, 1].
#[must_use]
#[allow(clippy::cast_precision_loss, clippy::suboptimal_flops)]
pub fn wilson_ci(successes: usize, n: usize) -> (f64, f64) {
    if n == 0 {
        return (0.0, 1.0);
    }
    let nf = n as f64;
    let p_hat = successes as f64 / nf;
    let z2 = Z_95 * Z_95;
    let denom = 1.0 + z2 / nf;
    let center = (p_hat + z2 / (2.0 * nf)) / denom;
    let spread = Z_95 * ((p_hat * (1.0 - p_hat) + z2 / (4.0 * nf)) / nf).sqrt() / denom;
    ((center - spread).max(0.0), (center + spread).min(1.0))
}

/// Bootstrap confidence interval on binary outcomes.
///
/// Resamples with replacement; deterministic given the configured seed.
/// Returns `(0.0, 1.0)` for empty input.
#[must_use]
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_sign_loss,
    clippy::cast_possible_truncation
)]
pub fn bootstrap_ci(values: &[bool], config: &BootstrapConfig) -> (f64, f64) {
    if values.is_empty() {
        return (0.0, 1.0);
    }

    let mut rng = ChaCha8Rng::seed_from_u64(config.seed);
    let n = values.len();
    let mut means = Vec::with_capacity(config.iterations);
    for _ in 0..config.iterations {
        let successes = (0..n)
            .filter(|_| values[rng.gen_range(0..n)])
            .count();
        means.push(successes as f64 / n as f64);
    }
    means.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

    let lo_idx = ((config.percentiles.0 / 100.0) * means.len() as f64) as usize;
    let hi_idx = (((config.percentiles.1 / 100.0) * means.len() as f64) as usize).max(1) - 1;
    let lo_idx = lo_idx.min(means.len() - 1);
    let hi_idx = hi_idx.min(means.len() - 1);
    (means[lo_idx], means[hi_idx])
}

/// pass@k: true iff at least one trial passed. Vacuously false on empty.
#[must_use]
pub fn pass_at_k(trials: &[bool]) -> bool {
    trials.iter().any(|&t| t)
}

/// pass^k: true iff ALL trials passed. The conservative deployment-gate
/// metric; vacuously true on empty.
#[must_use]
pub fn pass_pow_k(trials: &[bool]) -> bool {
    trials.iter().all(|&t| t)
}

/// pass@k rate across scenarios; each inner slice is one scenario's trials
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn pass_at_k_rate(scenario_trials: &[Vec<bool>]) -> f64 {
    if scenario_trials.is_empty() {
        return 0.0;
    }
    let passed = scenario_trials.iter().filter(|t| pass_at_k(t)).count();
    passed as f64 / scenario_trials.len() as f64
}

/// pass^k rate across scenarios
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn pass_pow_k_rate(scenario_trials: &[Vec<bool>]) -> f64 {
    if scenario_trials.is_empty() {
        return 0.0;
    }
    let passed = scenario_trials.iter().filter(|t| pass_pow_k(t)).count();
    passed as f64 / scenario_trials.len() as f64
}

/// Simple accuracy: correct / total, 0.0 when total is 0
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn accuracy(correct: usize, total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    correct as f64 / total as f64
}

/// Recall of required findings, 1.0 when none were required
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn finding_recall(detected: usize, total_required: usize) -> f64 {
    if total_required == 0 {
        return 1.0;
    }
    detected as f64 / total_required as f64
}

/// Rate of tasks with false-positive overcalls
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn false_positive_rate(false_positives: usize, total_tasks: usize) -> f64 {
    if total_tasks == 0 {
        return 0.0;
    }
    false_positives as f64 / total_tasks as f64
}

/// Two-proportion z-test comparing current (s1/n1) against prior (s2/n2).
///
/// Returns `(z, is_regression)` where regression is flagged one-tailed at
/// z < -1.96. Returns `(0.0, false)` when either sample is empty or the
/// pooled proportion is degenerate.
#[must_use]
#[allow(clippy::cast_precision_loss, clippy::suboptimal_flops)]
pub fn two_proportion_z_test(s1: usize, n1: usize, s2: usize, n2: usize) -> (f64, bool) {
    if n1 == 0 || n2 == 0 {
        return (0.0, false);
    }
    let p1 = s1 as f64 / n1 as f64;
    let p2 = s2 as f64 / n2 as f64;
    let p_pool = (s1 + s2) as f64 / (n1 + n2) as f64;
    if p_pool == 0.0 || p_pool == 1.0 {
        return (0.0, false);
    }
    let se = (p_pool * (1.0 - p_pool) * (1.0 / n1 as f64 + 1.0 / n2 as f64)).sqrt();
    if se == 0.0 {
        return (0.0, false);
    }
    let z = (p1 - p2) / se;
    (z, z < REGRESSION_Z)
}

/// One-tailed p-value for a z statistic (lower tail), for reporting
#[must_use]
pub fn z_p_value(z: f64) -> f64 {
    // Normal::new(0,1) only fails on invalid parameters.
    Normal::new(0.0, 1.0).map_or(1.0, |n| n.cdf(z))
}
