//! RadBench CLI
//!
//! Grading and evaluation quality control for a radiology LLM benchmark

use clap::{Parser, Subcommand};
use radbench::{
    compare_to_human, compute_calibration_drift, detect_regression, detect_saturation_in_dirs,
    format_drift_report, format_saturation_report, load_grades_from_dir, load_suite_membership,
    load_task, propose_promotions, propose_retirements, run_audit, save_suite_membership,
    update_tracking, AuditConfig, AuditType, DriftConfig, GradeRecord, GraderConfig, RubricGrader,
    SaturationConfig,
};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "radbench")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Grade a model response against a task definition
    Grade {
        /// Task YAML file
        #[arg(long)]
        task: PathBuf,

        /// File holding the model's response text
        #[arg(long)]
        response: PathBuf,

        /// Model identifier recorded on the grade
        #[arg(long)]
        model: String,

        /// Trial index within the run
        #[arg(long, default_value = "0")]
        trial: u32,
    },

    /// Run the program self-audit over evaluation runs
    Audit {
        /// Run directories to analyze (oldest first)
        #[arg(long, num_args = 1.., required = true)]
        results_dirs: Vec<PathBuf>,

        /// Task corpus directory
        #[arg(long, default_value = "configs/tasks")]
        tasks_dir: PathBuf,

        /// Audit trigger type
        #[arg(long, default_value = "scheduled")]
        audit_type: String,
    },

    /// Report calibration drift between grading layers
    Drift {
        /// Run directories to pool grades from
        #[arg(long, num_args = 1.., required = true)]
        results_dirs: Vec<PathBuf>,

        /// Physician reference grades (JSONL) for human comparison
        #[arg(long)]
        human_grades: Option<PathBuf>,
    },

    /// Detect saturated tasks across runs
    Saturation {
        /// Run directories to analyze (oldest first)
        #[arg(long, num_args = 1.., required = true)]
        results_dirs: Vec<PathBuf>,

        /// All-time pass rate threshold
        #[arg(long, default_value = "0.95")]
        threshold: f64,

        /// Consecutive all-pass runs required
        #[arg(long, default_value = "3")]
        min_consecutive_runs: usize,
    },

    /// Compare pass rates between two runs per modality
    Regression {
        /// Current run directory
        #[arg(long)]
        current: PathBuf,

        /// Prior run directory
        #[arg(long)]
        prior: PathBuf,
    },

    /// Update suite membership from a run and propose transitions
    Suite {
        /// Latest run directory
        #[arg(long)]
        results_dir: PathBuf,

        /// Suite membership YAML file
        #[arg(long, default_value = "configs/suite_membership.yaml")]
        membership: PathBuf,

        /// Apply proposed promotions and retirements
        #[arg(long)]
        apply: bool,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    if cli.verbose {
        tracing::info!("Verbose mode enabled");
    }

    match cli.command {
        Commands::Grade {
            task,
            response,
            model,
            trial,
        } => cmd_grade(&task, &response, &model, trial),
        Commands::Audit {
            results_dirs,
            tasks_dir,
            audit_type,
        } => cmd_audit(&results_dirs, tasks_dir, &audit_type),
        Commands::Drift {
            results_dirs,
            human_grades,
        } => cmd_drift(&results_dirs, human_grades.as_deref()),
        Commands::Saturation {
            results_dirs,
            threshold,
            min_consecutive_runs,
        } => cmd_saturation(&results_dirs, threshold, min_consecutive_runs),
        Commands::Regression { current, prior } => cmd_regression(&current, &prior),
        Commands::Suite {
            results_dir,
            membership,
            apply,
        } => cmd_suite(&results_dir, &membership, apply),
    }
}

fn cmd_grade(task_path: &std::path::Path, response_path: &std::path::Path, model: &str, trial: u32) {
    let task = match load_task(task_path) {
        Ok(t) => t,
        Err(e) => {
            eprintln!("Failed to load task: {e}");
            std::process::exit(1);
        }
    };
    let response = match std::fs::read_to_string(response_path) {
        Ok(r) => r,
        Err(e) => {
            eprintln!("Failed to read response file: {e}");
            std::process::exit(1);
        }
    };

    // No judge provider is wired at the CLI; grading runs pattern-only.
    let grader = RubricGrader::new(
        None,
        GraderConfig {
            pattern_only: true,
            ..GraderConfig::default()
        },
    );
    match grader.grade(&task, &response, model, trial) {
        Ok(result) => {
            let record = GradeRecord::from(&result);
            match serde_json::to_string_pretty(&record) {
                Ok(json) => println!("{json}"),
                Err(e) => {
                    eprintln!("Failed to serialize grade: {e}");
                    std::process::exit(1);
                }
            }
            if !result.passed {
                std::process::exit(1);
            }
        }
        Err(e) => {
            eprintln!("Grading failed: {e}");
            std::process::exit(1);
        }
    }
}

fn cmd_audit(results_dirs: &[PathBuf], tasks_dir: PathBuf, audit_type: &str) {
    let audit_type = match audit_type {
        "scheduled" => AuditType::Scheduled,
        "event-driven" => AuditType::EventDriven,
        other => {
            eprintln!("Unknown audit type: {other} (expected scheduled or event-driven)");
            std::process::exit(1);
        }
    };
    let config = AuditConfig {
        tasks_dir,
        audit_type,
        ..AuditConfig::default()
    };
    match run_audit(results_dirs, &config) {
        Ok(entry) => {
            println!("Audit {} completed at {}", entry.id, entry.timestamp);
            println!(
                "  Coverage: {}/{} tasks",
                entry.coverage.tasks_with_results, entry.coverage.total_tasks
            );
            println!(
                "  Calibration drift: {}",
                if entry.calibration.drift_detected { "YES" } else { "No" }
            );
            println!(
                "  Saturation: {:.1}%",
                entry.saturation.saturation_rate * 100.0
            );
            if let Some(reg) = &entry.regression {
                println!(
                    "  Regression: {}",
                    if reg.overall_regression {
                        format!("YES ({})", reg.regressed_modalities.join(", "))
                    } else {
                        "No".to_string()
                    }
                );
            }
            if !entry.findings.is_empty() {
                println!("\nFindings ({}):", entry.findings.len());
                for finding in &entry.findings {
                    println!("  - {finding}");
                }
            }
            if !entry.recommendations.is_empty() {
                println!("\nRecommendations ({}):", entry.recommendations.len());
                for rec in &entry.recommendations {
                    println!("  - {rec}");
                }
            }
        }
        Err(e) => {
            eprintln!("Audit failed: {e}");
            std::process::exit(1);
        }
    }
}

fn cmd_drift(results_dirs: &[PathBuf], human_grades: Option<&std::path::Path>) {
    let mut grades = Vec::new();
    for dir in results_dirs {
        match load_grades_from_dir(dir) {
            Ok(g) => grades.extend(g),
            Err(e) => {
                eprintln!("Failed to load grades from {}: {e}", dir.display());
                std::process::exit(1);
            }
        }
    }

    let mut report = match compute_calibration_drift(&grades, None, &DriftConfig::default()) {
        Ok(r) => r,
        Err(e) => {
            eprintln!("Drift analysis failed: {e}");
            std::process::exit(1);
        }
    };

    if let Some(path) = human_grades {
        match compare_to_human(path, &grades) {
            Ok(comparison) => report.human_comparison = comparison,
            Err(e) => {
                eprintln!("Human comparison failed: {e}");
                std::process::exit(1);
            }
        }
    }

    print!("{}", format_drift_report(&report));
    if report.drift_detected {
        std::process::exit(1);
    }
}

fn cmd_saturation(results_dirs: &[PathBuf], threshold: f64, min_consecutive_runs: usize) {
    let config = SaturationConfig {
        threshold,
        min_consecutive_runs,
    };
    match detect_saturation_in_dirs(results_dirs, &config) {
        Ok(report) => print!("{}", format_saturation_report(&report)),
        Err(e) => {
            eprintln!("Saturation analysis failed: {e}");
            std::process::exit(1);
        }
    }
}

fn cmd_regression(current: &std::path::Path, prior: &std::path::Path) {
    let current_grades = match load_grades_from_dir(current) {
        Ok(g) => g,
        Err(e) => {
            eprintln!("Failed to load current run: {e}");
            std::process::exit(1);
        }
    };
    let prior_grades = match load_grades_from_dir(prior) {
        Ok(g) => g,
        Err(e) => {
            eprintln!("Failed to load prior run: {e}");
            std::process::exit(1);
        }
    };

    let result = detect_regression(&current_grades, &prior_grades);
    match serde_json::to_string_pretty(&result) {
        Ok(json) => println!("{json}"),
        Err(e) => {
            eprintln!("Failed to serialize result: {e}");
            std::process::exit(1);
        }
    }
    if result.overall_regression {
        std::process::exit(1);
    }
}

fn cmd_suite(results_dir: &std::path::Path, membership_path: &std::path::Path, apply: bool) {
    let grades = match load_grades_from_dir(results_dir) {
        Ok(g) => g,
        Err(e) => {
            eprintln!("Failed to load grades: {e}");
            std::process::exit(1);
        }
    };
    let mut membership = match load_suite_membership(membership_path) {
        Ok(m) => m,
        Err(e) => {
            eprintln!("Failed to load suite membership: {e}");
            std::process::exit(1);
        }
    };

    update_tracking(&mut membership, &grades);
    let promotions = propose_promotions(
        &grades,
        &membership,
        radbench::suite::DEFAULT_MIN_MODELS_BROKEN,
    );
    let retirements =
        propose_retirements(&membership, radbench::suite::DEFAULT_MAX_CONSECUTIVE_PASSES);

    println!("Proposed promotions ({}):", promotions.len());
    for task_id in &promotions {
        println!("  - {task_id}");
    }
    println!("Proposed retirements ({}):", retirements.len());
    for task_id in &retirements {
        println!("  - {task_id}");
    }

    if apply {
        for task_id in &promotions {
            membership.apply_promotion(task_id);
        }
        for task_id in &retirements {
            membership.apply_retirement(task_id);
        }
    }

    if let Err(e) = save_suite_membership(&mut membership, membership_path) {
        eprintln!("Failed to save suite membership: {e}");
        std::process::exit(1);
    }
    println!(
        "Suite membership saved: {} capability, {} regression, {} retired",
        membership.capability.total, membership.regression.total, membership.retired.total
    );
}
