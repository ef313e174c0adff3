//! Layer 2: LLM radiologist judge.
//!
//! The judge is invoked only when pattern confidence is low. Its wire
//! contract is a single JSON object with the five dimension scores, an
//! optional failure class, and free-text reasoning. Malformed output never
//! raises: it degrades to an all-zero, class-E sentinel so that judge
//! unavailability cannot crash grading.

use crate::dimensions::{DimensionScores, FailureClass};
use crate::task::{Task, TaskType};
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

/// Errors from the judge transport layer.
///
/// Parse failures are NOT errors: they degrade to the sentinel result.
#[derive(Error, Debug)]
pub enum JudgeError {
    #[error("Judge provider transport failure: {0}")]
    Transport(String),

    #[error("Judge call timed out after {0:?}")]
    Timeout(Duration),

    #[error("Judge provider unavailable: {0}")]
    Unavailable(String),
}

/// Seam to the vendor-specific LLM clients.
///
/// Implementations own timeout and cancellation at the call boundary.
pub trait JudgeProvider {
    /// Send a system + user prompt pair, returning the raw response text.
    ///
    /// # Errors
    ///
    /// Returns `JudgeError` on transport failure or timeout.
    fn complete(&self, system_prompt: &str, user_prompt: &str) -> Result<String, JudgeError>;
}

/// Judge system prompt for standard diagnosis-style tasks
pub const JUDGE_SYSTEM_PROMPT: &str = r#"You are an expert radiologist serving as a grading judge for a radiology AI benchmark. You will evaluate a model's response to a radiology image interpretation task.

Grade the response on these 5 dimensions (each 0.0 to 1.0):

1. **diagnostic_accuracy** (weight 0.35): Is the primary diagnosis correct? Is the differential reasonable?
2. **finding_detection** (weight 0.25): Are the required radiological findings identified with correct anatomic locations?
3. **anatomic_precision** (weight 0.15): Is laterality correct? Are lobes, segments, or anatomic references accurate?
4. **clinical_relevance** (weight 0.15): Is severity appropriately assessed? Are clinical recommendations sensible?
5. **false_positive_control** (weight 0.10): Are there any hallucinated findings or overcalled pathology? (1.0 = no false positives, 0.0 = significant hallucination)

Also classify the failure mode (or null if passing):
- **A**: Missed critical diagnosis (primary diagnosis wrong or absent)
- **B**: Wrong diagnosis (confidently stated incorrect diagnosis)
- **C**: Partial/wrong location (correct diagnosis, wrong laterality or anatomy)
- **D**: Overcall/hallucination (added pathology not present)
- **E**: Refusal (declined to interpret the image)

Respond ONLY with valid JSON:
{
  "diagnostic_accuracy": <float>,
  "finding_detection": <float>,
  "anatomic_precision": <float>,
  "clinical_relevance": <float>,
  "false_positive_control": <float>,
  "failure_class": <string or null>,
  "reasoning": "<brief explanation>"
}"#;

/// Judge system prompt for incidental-finding detection tasks
pub const JUDGE_SYSTEM_PROMPT_INCIDENTAL: &str = r#"You are an expert radiologist serving as a grading judge for a radiology AI benchmark. The task under grade asked the model to identify ALL findings on the image, including incidental and secondary findings beyond the primary pathology.

Grade the response on these 5 dimensions (each 0.0 to 1.0). For incidental detection, finding_detection carries the diagnostic weight (0.35) and diagnostic_accuracy the detection weight (0.25):

1. **finding_detection** (weight 0.35): Were the incidental findings identified, with correct locations and sensible clinical-significance tiers (critical / significant / incidental / benign)?
2. **diagnostic_accuracy** (weight 0.25): Is the primary diagnosis correct?
3. **anatomic_precision** (weight 0.15): Are locations and laterality accurate for every finding?
4. **clinical_relevance** (weight 0.15): Are the recommended actions appropriate for each finding's significance?
5. **false_positive_control** (weight 0.10): Are there hallucinated or overcalled findings?

Also classify the failure mode (or null if passing): A missed critical diagnosis, B wrong diagnosis, C partial/wrong location, D overcall/hallucination, E refusal.

Respond ONLY with valid JSON:
{
  "diagnostic_accuracy": <float>,
  "finding_detection": <float>,
  "anatomic_precision": <float>,
  "clinical_relevance": <float>,
  "false_positive_control": <float>,
  "failure_class": <string or null>,
  "reasoning": "<brief explanation>"
}"#;

/// Judge system prompt for report-audit tasks
pub const JUDGE_SYSTEM_PROMPT_REPORT_AUDIT: &str = r#"You are an expert radiologist serving as a grading judge for a radiology AI benchmark. The task under grade is a second-opinion audit: the model was given an image plus a radiologist's report containing planted errors, and had to identify those errors.

Grade the response on these 5 dimensions (each 0.0 to 1.0):

1. **diagnostic_accuracy** (weight 0.35): Did the model reach the correct independent interpretation of the image?
2. **finding_detection** (weight 0.25): Were the planted errors found, with the correct error types (missed_finding, wrong_laterality, severity_underestimate, hallucinated_finding, wrong_diagnosis)?
3. **anatomic_precision** (weight 0.15): Are the corrections anatomically precise?
4. **clinical_relevance** (weight 0.15): Are the error severities (critical / major / minor) sensibly assigned?
5. **false_positive_control** (weight 0.15 of audit attention, scored at weight 0.10): Did the model avoid inventing errors that were not planted? (1.0 = no invented errors)

Also classify the failure mode (or null if passing): A missed critical diagnosis, B wrong diagnosis, C partial/wrong location, D overcall/hallucination, E refusal.

Respond ONLY with valid JSON:
{
  "diagnostic_accuracy": <float>,
  "finding_detection": <float>,
  "anatomic_precision": <float>,
  "clinical_relevance": <float>,
  "false_positive_control": <float>,
  "failure_class": <string or null>,
  "reasoning": "<brief explanation>"
}"#;

/// Select the judge system prompt for a task type.
///
/// Exhaustive: adding a task type forces a decision here.
#[must_use]
pub const fn judge_system_prompt(task_type: TaskType) -> &'static str {
    match task_type {
        TaskType::Diagnosis
        | TaskType::FindingDetection
        | TaskType::Vqa
        | TaskType::ReportGeneration => JUDGE_SYSTEM_PROMPT,
        TaskType::IncidentalDetection => JUDGE_SYSTEM_PROMPT_INCIDENTAL,
        TaskType::ReportAudit => JUDGE_SYSTEM_PROMPT_REPORT_AUDIT,
    }
}

/// Result from the LLM radiologist judge
#[derive(Debug, Clone, PartialEq)]
pub struct JudgeResult {
    pub scores: DimensionScores,
    pub failure_class: Option<FailureClass>,
    pub reasoning: String,
    pub judge_model: String,
    pub raw_response: String,
}

/// Build the grading prompt embedding structured ground truth plus the
/// response under grade.
#[must_use]
pub fn build_judge_prompt(task: &Task, model_response: &str) -> String {
    let gt = &task.ground_truth;
    let mut parts = vec![
        format!("## Task: {}\n", task.name),
        "## Ground Truth:".to_string(),
        format!("- Primary diagnosis: {}", na(&gt.primary_diagnosis)),
        format!("- Differential: {:?}", gt.differential),
        format!("- Severity: {}", na(&gt.severity)),
        format!("- Laterality: {}", na(&gt.laterality)),
    ];

    if !gt.key_findings.is_empty() {
        parts.push("- Key findings:".to_string());
        for kf in &gt.key_findings {
            let req = if kf.required {
                " (required)"
            } else {
                " (optional)"
            };
            parts.push(format!("  - {} at {}{req}", kf.finding, kf.location));
        }
    }

    if !gt.negatives.is_empty() {
        parts.push(format!("- Should NOT be present: {:?}", gt.negatives));
    }

    if !gt.incidental_findings.is_empty() {
        parts.push("- Incidental findings:".to_string());
        for inc in &gt.incidental_findings {
            parts.push(format!(
                "  - {} at {} ({}; {})",
                inc.finding, inc.location, inc.clinical_significance, inc.recommended_action
            ));
        }
    }

    if !gt.provided_report.is_empty() {
        parts.push(String::new());
        parts.push("## Provided Report:".to_string());
        parts.push(gt.provided_report.clone());
    }

    if !gt.report_errors.is_empty() {
        parts.push("- Report errors (planted):".to_string());
        for re in &gt.report_errors {
            parts.push(format!(
                "  - {}: \"{}\" should be \"{}\" ({})",
                re.error_type, re.claim, re.correction, re.severity
            ));
        }
    }

    if !task.reference_solution.is_empty() {
        parts.push(String::new());
        parts.push("## Reference Solution:".to_string());
        parts.push(task.reference_solution.clone());
    }

    parts.push(String::new());
    parts.push("## Model Response to Grade:".to_string());
    parts.push(model_response.to_string());

    parts.join("\n")
}

fn na(value: &str) -> &str {
    if value.is_empty() {
        "N/A"
    } else {
        value
    }
}

/// The JSON wire shape the judge system prompt fixes
#[derive(Debug, Deserialize)]
struct JudgeWire {
    #[serde(default)]
    diagnostic_accuracy: f64,
    #[serde(default)]
    finding_detection: f64,
    #[serde(default)]
    anatomic_precision: f64,
    #[serde(default)]
    clinical_relevance: f64,
    #[serde(default)]
    false_positive_control: f64,
    #[serde(default)]
    failure_class: Option<String>,
    #[serde(default)]
    reasoning: String,
}

/// Strip a single level of markdown code-fence wrapping, if present
fn strip_code_fence(text: &str) -> String {
    let trimmed = text.trim();
    if !trimmed.starts_with("```") {
        return trimmed.to_string();
    }
    let mut inner = Vec::new();
    let mut in_block = false;
    for line in trimmed.lines() {
        if !in_block && line.trim_start().starts_with("```") {
            in_block = true;
            continue;
        }
        if in_block && line.trim() == "```" {
            break;
        }
        if in_block {
            inner.push(line);
        }
    }
    inner.join("\n")
}

/// Parse the judge's response text into a `JudgeResult`.
///
/// Never fails: unparseable JSON degrades to the all-zero, class-E sentinel
/// with reasoning explaining the parse failure.
#[must_use]
pub fn parse_judge_response(text: &str, judge_model: &str) -> JudgeResult {
    let cleaned = strip_code_fence(text);

    let wire: JudgeWire = match serde_json::from_str(&cleaned) {
        Ok(wire) => wire,
        Err(e) => {
            let snippet: String = text.chars().take(200).collect();
            tracing::warn!(
                error = %e,
                snippet = %snippet,
                "failed to parse judge response as JSON"
            );
            return JudgeResult {
                scores: DimensionScores::zero(),
                failure_class: Some(FailureClass::E),
                reasoning: "Judge response was not valid JSON".to_string(),
                judge_model: judge_model.to_string(),
                raw_response: text.to_string(),
            };
        }
    };

    let scores = DimensionScores {
        diagnostic_accuracy: wire.diagnostic_accuracy,
        finding_detection: wire.finding_detection,
        anatomic_precision: wire.anatomic_precision,
        clinical_relevance: wire.clinical_relevance,
        false_positive_control: wire.false_positive_control,
    }
    .clamped();

    // Classes outside A-E are dropped, not errored.
    let failure_class = wire
        .failure_class
        .as_deref()
        .and_then(FailureClass::parse);

    JudgeResult {
        scores,
        failure_class,
        reasoning: wire.reasoning,
        judge_model: judge_model.to_string(),
        raw_response: text.to_string(),
    }
}

/// Run the judge on a model response.
///
/// # Errors
///
/// Returns `JudgeError` only for transport failures; malformed response
/// content is absorbed into the sentinel result.
pub fn run_judge(
    provider: &dyn JudgeProvider,
    judge_model: &str,
    task: &Task,
    model_response: &str,
) -> Result<JudgeResult, JudgeError> {
    let system = judge_system_prompt(task.task_type);
    let user = build_judge_prompt(task, model_response);
    let response = provider.complete(system, &user)?;
    Ok(parse_judge_response(&response, judge_model))
}
