//! Task model and YAML loader for radiology evaluation tasks.
//!
//! Tasks are immutable after loading and uniquely identified by id.
//! Validation failures are hard errors: they indicate authoring mistakes
//! that must be fixed before evaluation can proceed.

use regex::RegexBuilder;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use thiserror::Error;

/// Errors that can occur while loading or evaluating task definitions
#[derive(Error, Debug)]
pub enum TaskError {
    #[error("Failed to read task file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse task YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Task '{id}' failed validation: {errors}")]
    Validation { id: String, errors: String },

    #[error("Invalid regex in pattern check '{name}': {source}")]
    InvalidPattern {
        name: String,
        #[source]
        source: regex::Error,
    },

    #[error("Invalid glob pattern: {0}")]
    Glob(#[from] glob::PatternError),
}

/// Imaging modality of a task
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Modality {
    Xray,
    Ct,
    Mri,
    Ultrasound,
}

impl Modality {
    /// Canonical lowercase name, matching the YAML/JSONL representation
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Xray => "xray",
            Self::Ct => "ct",
            Self::Mri => "mri",
            Self::Ultrasound => "ultrasound",
        }
    }

    /// Task-id prefix used when minting ids (e.g. "XRAY-001")
    #[must_use]
    pub const fn id_prefix(self) -> &'static str {
        match self {
            Self::Xray => "XRAY",
            Self::Ct => "CT",
            Self::Mri => "MRI",
            Self::Ultrasound => "US",
        }
    }

    /// All modalities in canonical order
    pub const ALL: [Self; 4] = [Self::Xray, Self::Ct, Self::Mri, Self::Ultrasound];
}

impl fmt::Display for Modality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Infer a task's modality from its id prefix (e.g. "XRAY-001" -> xray).
///
/// Returns `None` for unrecognized prefixes; downstream analysis groups
/// those under an "unknown" bucket.
#[must_use]
pub fn infer_modality(task_id: &str) -> Option<Modality> {
    let prefix = task_id.split('-').next().unwrap_or("").to_lowercase();
    match prefix.as_str() {
        "xray" => Some(Modality::Xray),
        "ct" => Some(Modality::Ct),
        "mri" => Some(Modality::Mri),
        "us" => Some(Modality::Ultrasound),
        _ => None,
    }
}

/// Label used for per-modality breakdowns, including the unknown bucket
#[must_use]
pub fn modality_label(task_id: &str) -> String {
    infer_modality(task_id).map_or_else(|| "unknown".to_string(), |m| m.as_str().to_string())
}

/// What kind of evaluation a task performs
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    Diagnosis,
    FindingDetection,
    Vqa,
    ReportGeneration,
    IncidentalDetection,
    ReportAudit,
}

/// Task difficulty tier
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Difficulty {
    Basic,
    Intermediate,
    Advanced,
    Expert,
}

/// A single radiological finding with its anatomic location
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct KeyFinding {
    pub finding: String,
    pub location: String,
    #[serde(default = "default_true")]
    pub required: bool,
}

/// An incidental/secondary finding for incidental-detection tasks
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IncidentalFinding {
    pub finding: String,
    pub location: String,
    /// critical | significant | incidental | benign
    pub clinical_significance: String,
    pub recommended_action: String,
}

/// A planted error in a provided report, for report-audit tasks
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReportError {
    /// missed_finding | wrong_laterality | severity_underestimate |
    /// hallucinated_finding | wrong_diagnosis
    pub error_type: String,
    /// What the report claims (or omits)
    pub claim: String,
    /// What the correct interpretation should be
    pub correction: String,
    /// critical | major | minor
    pub severity: String,
}

/// Ground truth for a radiology task
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct GroundTruth {
    pub primary_diagnosis: String,
    #[serde(default)]
    pub differential: Vec<String>,
    #[serde(default)]
    pub key_findings: Vec<KeyFinding>,
    #[serde(default)]
    pub severity: String,
    #[serde(default)]
    pub laterality: String,
    /// Findings that must NOT appear in a response (overcall detection)
    #[serde(default)]
    pub negatives: Vec<String>,
    /// Secondary findings for incidental-detection tasks
    #[serde(default)]
    pub incidental_findings: Vec<IncidentalFinding>,
    /// Planted errors for report-audit tasks
    #[serde(default)]
    pub report_errors: Vec<ReportError>,
    /// The report under audit, injected into the prompt for report-audit tasks
    #[serde(default)]
    pub provided_report: String,
}

/// How a single pattern check matches response text
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CheckKind {
    Regex,
    Contains,
    NotContains,
}

/// A deterministic pattern check defined in the task YAML
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PatternCheck {
    pub name: String,
    #[serde(rename = "check_type")]
    pub kind: CheckKind,
    pub pattern: String,
    #[serde(default = "default_true")]
    pub required: bool,
}

const fn default_true() -> bool {
    true
}

impl PatternCheck {
    /// Run this check against response text. All matching is case-insensitive.
    ///
    /// # Errors
    ///
    /// Returns `TaskError::InvalidPattern` if a regex check carries a pattern
    /// that does not compile. That is an authoring error and propagates.
    pub fn check(&self, text: &str) -> Result<bool, TaskError> {
        match self.kind {
            CheckKind::Regex => {
                let re = RegexBuilder::new(&self.pattern)
                    .case_insensitive(true)
                    .build()
                    .map_err(|source| TaskError::InvalidPattern {
                        name: self.name.clone(),
                        source,
                    })?;
                Ok(re.is_match(text))
            }
            CheckKind::Contains => Ok(text.to_lowercase().contains(&self.pattern.to_lowercase())),
            CheckKind::NotContains => {
                Ok(!text.to_lowercase().contains(&self.pattern.to_lowercase()))
            }
        }
    }
}

/// A single radiology evaluation task. Immutable after loading.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Task {
    pub id: String,
    pub name: String,
    pub modality: Modality,
    pub anatomy: String,
    pub task_type: TaskType,
    pub difficulty: Difficulty,
    pub image_ref: String,
    pub ground_truth: GroundTruth,
    #[serde(default)]
    pub pattern_checks: Vec<PatternCheck>,
    #[serde(default)]
    pub reference_solution: String,
    #[serde(default = "default_true")]
    pub condition_present: bool,
    #[serde(default)]
    pub confusion_pair: Option<String>,
    /// Condition identifier linking the task to its source corpus
    #[serde(default)]
    pub condition_id: String,
    /// Question text for VQA tasks
    #[serde(default)]
    pub question: Option<String>,
    #[serde(default)]
    pub source_dataset: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

const DIAGNOSIS_TEMPLATE: &str = "You are an expert radiologist. Analyze the provided medical \
image and give your interpretation.\n\nProvide:\n1. Primary diagnosis\n2. Key findings with \
anatomic locations\n3. Differential diagnoses\n4. Severity assessment\n5. Recommended next steps";

const FINDING_DETECTION_TEMPLATE: &str = "You are an expert radiologist. Examine the provided \
medical image carefully.\n\nList all significant findings you observe, including:\n- Description \
of each finding\n- Anatomic location\n- Clinical significance";

const REPORT_GENERATION_TEMPLATE: &str = "You are an expert radiologist. Generate a structured \
radiology report for the provided medical image.\n\nInclude: Technique, Comparison, Findings, \
and Impression sections.";

const INCIDENTAL_TEMPLATE: &str = "You are an expert radiologist. Analyze the provided medical \
image thoroughly.\n\nIdentify ALL findings, both the primary pathology and any incidental or \
secondary findings. For each finding, provide:\n1. Description of the finding\n2. Anatomic \
location\n3. Clinical significance (critical / significant / incidental / benign)\n4. \
Recommended action (e.g., urgent follow-up, routine follow-up, no action needed)\n\nOrganize \
your response as:\n- **Primary Finding**: [diagnosis and details]\n- **Incidental Findings**: \
[list each with significance and recommended action]";

const REPORT_AUDIT_TEMPLATE: &str = "You are an expert radiologist performing a second-opinion \
audit. You are given a medical image AND a radiologist's report. Your task is to identify errors \
in the report.\n\nReview the image independently, then compare your interpretation against the \
provided report. For each error found, classify it as:\n- **missed_finding**: Finding visible on \
the image but not mentioned in the report\n- **wrong_laterality**: Correct finding but attributed \
to the wrong side\n- **severity_underestimate**: Finding identified but severity understated\n- \
**hallucinated_finding**: Finding described in the report but not present on the image\n- \
**wrong_diagnosis**: Incorrect diagnostic conclusion\n\nFor each error, state:\n1. Error type\n\
2. What the report claims (or omits)\n3. What the correct interpretation should be\n4. Severity \
of the error (critical / major / minor)";

impl Task {
    /// Build the model-facing prompt for this task.
    ///
    /// Each task type maps to a fixed instruction template; VQA tasks embed
    /// their question and report-audit tasks append the report under audit.
    #[must_use]
    pub fn build_prompt(&self) -> String {
        match self.task_type {
            TaskType::Diagnosis => DIAGNOSIS_TEMPLATE.to_string(),
            TaskType::FindingDetection => FINDING_DETECTION_TEMPLATE.to_string(),
            TaskType::Vqa => format!(
                "You are an expert radiologist. Answer the following question about the \
provided medical image.\n\n{}",
                self.question.as_deref().unwrap_or_default()
            ),
            TaskType::ReportGeneration => REPORT_GENERATION_TEMPLATE.to_string(),
            TaskType::IncidentalDetection => INCIDENTAL_TEMPLATE.to_string(),
            TaskType::ReportAudit => format!(
                "{}\n\n## Report to Audit:\n{}",
                REPORT_AUDIT_TEMPLATE, self.ground_truth.provided_report
            ),
        }
    }
}

/// Validate a task, returning all error messages (empty = valid)
#[must_use]
pub fn validate_task(task: &Task) -> Vec<String> {
    let mut errors = Vec::new();

    if task.id.is_empty() {
        errors.push("Task id is required".to_string());
    }
    if task.image_ref.is_empty() {
        errors.push("image_ref is required".to_string());
    }
    if task.ground_truth.primary_diagnosis.is_empty() {
        errors.push("ground_truth.primary_diagnosis is required".to_string());
    }
    if task.condition_id.is_empty() {
        errors.push("condition_id is required".to_string());
    }

    // Task-type-specific requirements; exhaustive so new types must decide.
    match task.task_type {
        TaskType::Diagnosis | TaskType::FindingDetection | TaskType::ReportGeneration => {}
        TaskType::Vqa => {
            if task.question.as_deref().unwrap_or("").is_empty() {
                errors.push("vqa tasks require a question".to_string());
            }
        }
        TaskType::IncidentalDetection => {
            if task.ground_truth.incidental_findings.is_empty() {
                errors.push(
                    "incidental_detection tasks require ground_truth.incidental_findings"
                        .to_string(),
                );
            }
        }
        TaskType::ReportAudit => {
            if task.ground_truth.provided_report.is_empty() {
                errors.push("report_audit tasks require ground_truth.provided_report".to_string());
            }
            if task.ground_truth.report_errors.is_empty() {
                errors.push("report_audit tasks require ground_truth.report_errors".to_string());
            }
        }
    }

    // Regex checks must compile at authoring time, not mid-evaluation.
    for pc in &task.pattern_checks {
        if pc.kind == CheckKind::Regex {
            if let Err(e) = RegexBuilder::new(&pc.pattern).case_insensitive(true).build() {
                errors.push(format!("Pattern '{}' has invalid regex: {e}", pc.name));
            }
        }
    }

    errors
}

/// Load and validate a single task from a YAML file.
///
/// # Errors
///
/// Returns an error if the file cannot be read or parsed, or if the task
/// fails validation.
pub fn load_task<P: AsRef<Path>>(path: P) -> Result<Task, TaskError> {
    let content = std::fs::read_to_string(&path)?;
    let task: Task = serde_yaml::from_str(&content)?;

    let errors = validate_task(&task);
    if !errors.is_empty() {
        return Err(TaskError::Validation {
            id: task.id,
            errors: errors.join("; "),
        });
    }
    Ok(task)
}

/// Load all task YAMLs from a directory (recursive), sorted by id.
///
/// # Errors
///
/// Returns an error if any task file fails to load or validate.
pub fn load_tasks_from_dir<P: AsRef<Path>>(directory: P) -> Result<Vec<Task>, TaskError> {
    let pattern = format!("{}/**/*.yaml", directory.as_ref().display());
    let mut tasks = Vec::new();
    for entry in glob::glob(&pattern)? {
        let path = entry.map_err(|e| TaskError::Io(e.into_error()))?;
        tasks.push(load_task(&path)?);
    }
    tasks.sort_by(|a, b| a.id.cmp(&b.id));
    Ok(tasks)
}

/// Shared task fixtures for unit and integration tests
#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub(crate) fn sample_task() -> Task {
        Task {
            id: "XRAY-001".to_string(),
            name: "Left pneumothorax on PA CXR".to_string(),
            modality: Modality::Xray,
            anatomy: "chest".to_string(),
            task_type: TaskType::Diagnosis,
            difficulty: Difficulty::Intermediate,
            image_ref: "xray/CXR_0042.png".to_string(),
            ground_truth: GroundTruth {
                primary_diagnosis: "pneumothorax".to_string(),
                differential: vec!["pneumothorax".to_string(), "bullous emphysema".to_string()],
                key_findings: vec![
                    KeyFinding {
                        finding: "visceral pleural line".to_string(),
                        location: "left hemithorax".to_string(),
                        required: true,
                    },
                    KeyFinding {
                        finding: "absent lung markings".to_string(),
                        location: "left lateral".to_string(),
                        required: true,
                    },
                ],
                severity: "moderate".to_string(),
                laterality: "left".to_string(),
                negatives: vec!["tension pneumothorax".to_string()],
                ..GroundTruth::default()
            },
            pattern_checks: vec![
                PatternCheck {
                    name: "mentions_pneumothorax".to_string(),
                    kind: CheckKind::Regex,
                    pattern: r"\bpneumothorax\b".to_string(),
                    required: true,
                },
                PatternCheck {
                    name: "mentions_left".to_string(),
                    kind: CheckKind::Contains,
                    pattern: "left".to_string(),
                    required: true,
                },
            ],
            reference_solution: String::new(),
            condition_present: true,
            confusion_pair: None,
            condition_id: "spontaneous-pneumothorax".to_string(),
            question: None,
            source_dataset: String::new(),
            tags: Vec::new(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::fixtures::sample_task;
    use super::*;

    // =========================================================================
    // Pattern check tests
    // =========================================================================

    #[test]
    fn test_regex_check_case_insensitive() {
        let pc = PatternCheck {
            name: "dx".to_string(),
            kind: CheckKind::Regex,
            pattern: r"\bpneumothorax\b".to_string(),
            required: true,
        };
        assert!(pc.check("Large PNEUMOTHORAX on the left").unwrap());
        assert!(!pc.check("Normal chest radiograph").unwrap());
    }

    #[test]
    fn test_contains_check() {
        let pc = PatternCheck {
            name: "lat".to_string(),
            kind: CheckKind::Contains,
            pattern: "Left".to_string(),
            required: true,
        };
        assert!(pc.check("findings in the left lung").unwrap());
        assert!(!pc.check("right-sided effusion").unwrap());
    }

    #[test]
    fn test_not_contains_check() {
        let pc = PatternCheck {
            name: "no_tension".to_string(),
            kind: CheckKind::NotContains,
            pattern: "tension".to_string(),
            required: true,
        };
        assert!(pc.check("simple pneumothorax").unwrap());
        assert!(!pc.check("tension pneumothorax").unwrap());
    }

    #[test]
    fn test_invalid_regex_is_hard_error() {
        let pc = PatternCheck {
            name: "broken".to_string(),
            kind: CheckKind::Regex,
            pattern: "([unclosed".to_string(),
            required: true,
        };
        let err = pc.check("anything").unwrap_err();
        assert!(matches!(err, TaskError::InvalidPattern { .. }));
    }

    // =========================================================================
    // Modality inference tests
    // =========================================================================

    #[test]
    fn test_infer_modality_prefixes() {
        assert_eq!(infer_modality("XRAY-001"), Some(Modality::Xray));
        assert_eq!(infer_modality("CT-INC-001"), Some(Modality::Ct));
        assert_eq!(infer_modality("MRI-017"), Some(Modality::Mri));
        assert_eq!(infer_modality("US-003"), Some(Modality::Ultrasound));
        assert_eq!(infer_modality("PET-001"), None);
        assert_eq!(modality_label("PET-001"), "unknown");
    }

    // =========================================================================
    // Validation tests
    // =========================================================================

    #[test]
    fn test_valid_task_passes_validation() {
        assert!(validate_task(&sample_task()).is_empty());
    }

    #[test]
    fn test_missing_fields_reported() {
        let mut task = sample_task();
        task.id = String::new();
        task.condition_id = String::new();
        let errors = validate_task(&task);
        assert_eq!(errors.len(), 2);
        assert!(errors.iter().any(|e| e.contains("id is required")));
        assert!(errors.iter().any(|e| e.contains("condition_id")));
    }

    #[test]
    fn test_incidental_requires_findings() {
        let mut task = sample_task();
        task.task_type = TaskType::IncidentalDetection;
        let errors = validate_task(&task);
        assert!(errors.iter().any(|e| e.contains("incidental_findings")));
    }

    #[test]
    fn test_report_audit_requires_report_and_errors() {
        let mut task = sample_task();
        task.task_type = TaskType::ReportAudit;
        let errors = validate_task(&task);
        assert!(errors.iter().any(|e| e.contains("provided_report")));
        assert!(errors.iter().any(|e| e.contains("report_errors")));
    }

    #[test]
    fn test_vqa_requires_question() {
        let mut task = sample_task();
        task.task_type = TaskType::Vqa;
        let errors = validate_task(&task);
        assert!(errors.iter().any(|e| e.contains("question")));
    }

    #[test]
    fn test_invalid_regex_flagged_at_validation() {
        let mut task = sample_task();
        task.pattern_checks.push(PatternCheck {
            name: "broken".to_string(),
            kind: CheckKind::Regex,
            pattern: "([unclosed".to_string(),
            required: false,
        });
        let errors = validate_task(&task);
        assert!(errors.iter().any(|e| e.contains("invalid regex")));
    }

    // =========================================================================
    // YAML loading tests
    // =========================================================================

    #[test]
    fn test_load_task_yaml_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("XRAY-001.yaml");
        let yaml = serde_yaml::to_string(&sample_task()).unwrap();
        std::fs::write(&path, yaml).unwrap();

        let task = load_task(&path).unwrap();
        assert_eq!(task, sample_task());
    }

    #[test]
    fn test_load_task_rejects_unknown_check_kind() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.yaml");
        let mut yaml = serde_yaml::to_string(&sample_task()).unwrap();
        yaml = yaml.replace("check_type: regex", "check_type: fuzzy");
        std::fs::write(&path, yaml).unwrap();

        let err = load_task(&path).unwrap_err();
        assert!(matches!(err, TaskError::Yaml(_)));
    }

    #[test]
    fn test_load_task_validation_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.yaml");
        let mut task = sample_task();
        task.condition_id = String::new();
        std::fs::write(&path, serde_yaml::to_string(&task).unwrap()).unwrap();

        let err = load_task(&path).unwrap_err();
        assert!(matches!(err, TaskError::Validation { .. }));
    }

    #[test]
    fn test_load_tasks_from_dir_sorted() {
        let dir = tempfile::tempdir().unwrap();
        for id in ["XRAY-002", "CT-001"] {
            let mut task = sample_task();
            task.id = id.to_string();
            let path = dir.path().join(format!("{id}.yaml"));
            std::fs::write(&path, serde_yaml::to_string(&task).unwrap()).unwrap();
        }
        let tasks = load_tasks_from_dir(dir.path()).unwrap();
        assert_eq!(tasks.len(), 2);
        assert_eq!(tasks[0].id, "CT-001");
        assert_eq!(tasks[1].id, "XRAY-002");
    }

    #[test]
    fn test_load_tasks_from_empty_dir() {
        let dir = tempfile::tempdir().unwrap();
        let tasks = load_tasks_from_dir(dir.path()).unwrap();
        assert!(tasks.is_empty());
    }

    // =========================================================================
    // Prompt template tests
    // =========================================================================

    #[test]
    fn test_build_prompt_diagnosis() {
        let prompt = sample_task().build_prompt();
        assert!(prompt.contains("Primary diagnosis"));
        assert!(prompt.contains("Differential diagnoses"));
    }

    #[test]
    fn test_build_prompt_vqa_embeds_question() {
        let mut task = sample_task();
        task.task_type = TaskType::Vqa;
        task.question = Some("Is there a pneumothorax?".to_string());
        let prompt = task.build_prompt();
        assert!(prompt.contains("Is there a pneumothorax?"));
    }

    #[test]
    fn test_build_prompt_incidental() {
        let mut task = sample_task();
        task.task_type = TaskType::IncidentalDetection;
        let prompt = task.build_prompt();
        assert!(prompt.to_lowercase().contains("incidental"));
        assert!(prompt.to_lowercase().contains("clinical significance"));
    }

    #[test]
    fn test_build_prompt_report_audit_injects_report() {
        let mut task = sample_task();
        task.task_type = TaskType::ReportAudit;
        task.ground_truth.provided_report = "CT chest: The lungs are clear.".to_string();
        let prompt = task.build_prompt();
        assert!(prompt.contains("CT chest: The lungs are clear."));
        assert!(prompt.to_lowercase().contains("audit"));
    }
}
