//! Response stage: turn the accumulated state into a final answer.
//!
//! The deterministic [`render_template`] is both the fallback when no
//! text-synthesis collaborator is available and the grounding digest handed
//! to one when it is. Whatever happens upstream, the response stage always
//! produces text; it is the one stage that must never fail.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

use crate::error::LlmError;
use crate::llm::{GenerationRequest, LlmProvider, Message};
use crate::workflow::state::{RunFailure, StepOutcome, WorkflowState};

/// System prompt for the synthesis collaborator.
const SYNTHESIS_PROMPT: &str = r#"You summarize the results of an automated data analysis for the person who requested it.

You are given the original request and a factual digest of everything the analysis computed, including any failures. Write a short plain-text summary (a few sentences) that answers the request. Report numbers exactly as given. If parts failed, say so plainly. Do not invent results."#;

/// Trait for text-synthesis collaborators.
#[async_trait]
pub trait Synthesizer: Send + Sync {
    /// Produces a natural-language summary from the query and digest.
    async fn synthesize(&self, query: &str, digest: &str) -> Result<String, LlmError>;
}

/// Synthesizer backed by an LLM provider.
pub struct LlmSynthesizer {
    provider: Arc<dyn LlmProvider>,
    model: String,
}

impl LlmSynthesizer {
    /// Creates a new synthesizer using the given provider and model.
    pub fn new(provider: Arc<dyn LlmProvider>, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
        }
    }
}

#[async_trait]
impl Synthesizer for LlmSynthesizer {
    async fn synthesize(&self, query: &str, digest: &str) -> Result<String, LlmError> {
        let request = GenerationRequest::new(
            self.model.clone(),
            vec![
                Message::system(SYNTHESIS_PROMPT),
                Message::user(format!("Request: {query}\n\nDigest:\n{digest}")),
            ],
        )
        .with_temperature(0.3)
        .with_max_tokens(512);

        let response = self.provider.generate(request).await?;
        response
            .first_content()
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .ok_or(LlmError::EmptyCompletion)
    }
}

/// Renders the deterministic summary of a run.
///
/// Every recorded fact gets a line: dataset shape, per-step highlights,
/// failures, skips, model metrics and retry count. Line order follows the
/// analysis map (sorted by step name), so the output is stable.
pub fn render_template(state: &WorkflowState) -> String {
    let mut lines: Vec<String> = Vec::new();

    if let Some(failure) = state.failure() {
        if failure.is_abort() {
            lines.push(format!(
                "The request \"{}\" could not be completed: {}.",
                state.query(),
                failure
            ));
        }
    }

    if let Some(intent) = state.intent() {
        lines.push(format!("Requested analysis: {}.", intent.category));
    }

    for (name, outcome) in state.analysis() {
        match outcome {
            StepOutcome::Completed { result } => {
                if let Some(line) = describe_step(name, result) {
                    lines.push(line);
                }
            }
            StepOutcome::Failed { error } => {
                lines.push(format!("Step '{name}' failed: {error}."));
            }
            StepOutcome::SkippedDependency { dependency } => {
                lines.push(format!(
                    "Step '{name}' was skipped because '{dependency}' did not complete."
                ));
            }
        }
    }

    if let Some(model) = state.model_result() {
        let retries = state.iteration_count();
        let mut line = format!(
            "Trained a {} model predicting '{}': {} {:.3} on {} held-out rows",
            model.model_family.replace('_', " "),
            model.target,
            model.metric,
            model.metric_value,
            model.test_rows,
        );
        if retries > 0 {
            line.push_str(&format!(" after {retries} retr{}", plural_y(retries)));
        }
        line.push('.');
        lines.push(line);

        if let Some((feature, weight)) = model.feature_importances.first() {
            lines.push(format!(
                "Most influential feature: '{feature}' (weight {weight:.3})."
            ));
        }
    }

    if let Some(RunFailure::Training(message)) = state.failure() {
        lines.push(format!("Model training failed: {message}."));
    }

    if lines.is_empty() {
        lines.push(format!(
            "No results were produced for \"{}\".",
            state.query()
        ));
    }

    lines.join("\n")
}

/// One line for a completed step's payload, if it is worth a line.
fn describe_step(name: &str, result: &Value) -> Option<String> {
    match name {
        "load" => Some(format!(
            "The dataset has {} rows and {} columns.",
            result.get("rows")?.as_u64()?,
            result.get("columns")?.as_u64()?
        )),
        "inspect_columns" => {
            let columns = result.get("columns")?.as_array()?;
            let numeric = columns
                .iter()
                .filter(|c| c.get("type").and_then(Value::as_str) == Some("numeric"))
                .count();
            Some(format!(
                "Column types: {} of {} columns are numeric.",
                numeric,
                columns.len()
            ))
        }
        "missing_values" => {
            let total = result.get("total_missing")?.as_u64()?;
            if total == 0 {
                return Some("No missing values were found.".to_string());
            }
            let mut line = format!("Found {total} missing values in total");
            if let Some(columns) = result.get("columns").and_then(Value::as_object) {
                let affected: Vec<String> = columns
                    .iter()
                    .filter(|(_, count)| count.as_u64().unwrap_or(0) > 0)
                    .map(|(name, count)| format!("'{}' has {} missing", name, count))
                    .collect();
                if !affected.is_empty() {
                    line.push_str(&format!(": {}", affected.join(", ")));
                }
            }
            line.push('.');
            Some(line)
        }
        "summary_stats" => {
            let numeric = result.get("numeric")?.as_object()?;
            let parts: Vec<String> = numeric
                .iter()
                .take(4)
                .filter_map(|(name, stats)| {
                    Some(format!(
                        "'{}' mean {:.2} (min {:.2}, max {:.2})",
                        name,
                        stats.get("mean")?.as_f64()?,
                        stats.get("min")?.as_f64()?,
                        stats.get("max")?.as_f64()?
                    ))
                })
                .collect();
            if parts.is_empty() {
                None
            } else {
                Some(format!("Summary statistics: {}.", parts.join("; ")))
            }
        }
        "correlation" => {
            let names = result.get("columns")?.as_array()?;
            let matrix = result.get("matrix")?.as_array()?;
            let mut best: Option<(String, String, f64)> = None;
            for (i, row) in matrix.iter().enumerate() {
                for (j, cell) in row.as_array()?.iter().enumerate() {
                    if i < j {
                        let r = cell.as_f64()?;
                        if best.as_ref().is_none_or(|(_, _, b)| r.abs() > b.abs()) {
                            best = Some((
                                names[i].as_str()?.to_string(),
                                names[j].as_str()?.to_string(),
                                r,
                            ));
                        }
                    }
                }
            }
            best.map(|(a, b, r)| {
                format!("Strongest correlation: '{a}' and '{b}' at {r:.3}.")
            })
        }
        "distribution" => {
            let column = result.get("column")?.as_str()?;
            Some(format!("Computed the value distribution of '{column}'."))
        }
        "feature_engineering" => Some(format!(
            "Engineered {} features for training.",
            result.get("n_features")?.as_u64()?
        )),
        _ => None,
    }
}

fn plural_y(n: u32) -> &'static str {
    if n == 1 {
        "y"
    } else {
        "ies"
    }
}
