//! The state container: the single record every stage reads and writes.
//!
//! One [`WorkflowState`] exists per run, owned by the orchestrator. Stages
//! never touch fields directly; the checked mutators enforce the write
//! contract (write-once fields, append-only analysis map, per-cycle
//! overwrites for the training loop) so a misbehaving stage surfaces as a
//! [`StateError`] instead of silently corrupting an earlier stage's output.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

use crate::compute::ModelResult;
use crate::intent::AnalysisIntent;
use crate::planner::AnalysisStep;
use crate::reflection::{ReflectionDecision, TrainingAdjustment};

/// Violations of the state write contract.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StateError {
    /// A write-once field was written twice.
    #[error("State field '{0}' is already set")]
    AlreadySet(&'static str),

    /// An analysis entry with this step name already exists.
    #[error("Analysis entry '{0}' is already recorded")]
    DuplicateStep(String),
}

/// Outcome of one analysis step, as recorded in the analysis map.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StepOutcome {
    /// The step completed; `result` is the backend payload.
    Completed { result: serde_json::Value },
    /// The step failed; the error is kept so the response can explain it.
    Failed { error: String },
    /// The step was skipped because its dependency failed.
    SkippedDependency { dependency: String },
}

impl StepOutcome {
    /// Whether the step completed successfully.
    pub fn is_completed(&self) -> bool {
        matches!(self, StepOutcome::Completed { .. })
    }

    /// The result payload, if completed.
    pub fn result(&self) -> Option<&serde_json::Value> {
        match self {
            StepOutcome::Completed { result } => Some(result),
            _ => None,
        }
    }
}

/// A failure that ended or degraded the run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", content = "message", rename_all = "snake_case")]
pub enum RunFailure {
    /// Invalid configuration or unreadable dataset, before intent validation.
    Configuration(String),
    /// Intent validation rejected the request.
    Intent(String),
    /// Planning failed; no partial plan accepted.
    Planning(String),
    /// Model training failed; the retry loop ended.
    Training(String),
    /// The run was cancelled between stages.
    Cancelled(String),
    /// A state-contract violation or other internal defect.
    Internal(String),
}

impl RunFailure {
    /// Whether this failure aborted the run before/instead of computation.
    pub fn is_abort(&self) -> bool {
        !matches!(self, RunFailure::Training(_))
    }
}

impl fmt::Display for RunFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunFailure::Configuration(m) => write!(f, "configuration error: {m}"),
            RunFailure::Intent(m) => write!(f, "intent rejected: {m}"),
            RunFailure::Planning(m) => write!(f, "planning failed: {m}"),
            RunFailure::Training(m) => write!(f, "training failed: {m}"),
            RunFailure::Cancelled(m) => write!(f, "run cancelled: {m}"),
            RunFailure::Internal(m) => write!(f, "internal error: {m}"),
        }
    }
}

/// Final status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Every stage completed without recorded failures.
    Success,
    /// The run produced results but some step or the training stage failed.
    Partial,
    /// The run ended before computation could produce results.
    Aborted,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunStatus::Success => write!(f, "success"),
            RunStatus::Partial => write!(f, "partial"),
            RunStatus::Aborted => write!(f, "aborted"),
        }
    }
}

/// The canonical per-run state record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowState {
    run_id: Uuid,
    query: String,
    created_at: DateTime<Utc>,
    intent: Option<AnalysisIntent>,
    plan: Option<Vec<AnalysisStep>>,
    analysis: BTreeMap<String, StepOutcome>,
    model_result: Option<ModelResult>,
    metric_history: Vec<f64>,
    iteration_count: u32,
    reflection_decision: Option<ReflectionDecision>,
    training_adjustment: Option<TrainingAdjustment>,
    failure: Option<RunFailure>,
    final_response: Option<String>,
}

impl WorkflowState {
    /// Creates the state for a new run; only the query is populated.
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            query: query.into(),
            created_at: Utc::now(),
            intent: None,
            plan: None,
            analysis: BTreeMap::new(),
            model_result: None,
            metric_history: Vec::new(),
            iteration_count: 0,
            reflection_decision: None,
            training_adjustment: None,
            failure: None,
            final_response: None,
        }
    }

    /// The run identifier.
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// The original query text.
    pub fn query(&self) -> &str {
        &self.query
    }

    /// When the run started.
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Sets the validated intent. Write-once.
    pub fn set_intent(&mut self, intent: AnalysisIntent) -> Result<(), StateError> {
        if self.intent.is_some() {
            return Err(StateError::AlreadySet("intent"));
        }
        self.intent = Some(intent);
        Ok(())
    }

    /// The validated intent, if set.
    pub fn intent(&self) -> Option<&AnalysisIntent> {
        self.intent.as_ref()
    }

    /// Sets the accepted plan. Write-once.
    pub fn set_plan(&mut self, plan: Vec<AnalysisStep>) -> Result<(), StateError> {
        if self.plan.is_some() {
            return Err(StateError::AlreadySet("plan"));
        }
        self.plan = Some(plan);
        Ok(())
    }

    /// The accepted plan, if set.
    pub fn plan(&self) -> Option<&[AnalysisStep]> {
        self.plan.as_deref()
    }

    /// Records a step outcome. Append-only: duplicate keys are rejected.
    pub fn record_step(
        &mut self,
        name: impl Into<String>,
        outcome: StepOutcome,
    ) -> Result<(), StateError> {
        let name = name.into();
        if self.analysis.contains_key(&name) {
            return Err(StateError::DuplicateStep(name));
        }
        self.analysis.insert(name, outcome);
        Ok(())
    }

    /// The analysis map.
    pub fn analysis(&self) -> &BTreeMap<String, StepOutcome> {
        &self.analysis
    }

    /// One analysis entry by step name.
    pub fn step(&self, name: &str) -> Option<&StepOutcome> {
        self.analysis.get(name)
    }

    /// Records a training attempt: overwrites `model_result`, appends the
    /// primary metric to the audit history.
    pub fn record_training(&mut self, result: ModelResult) {
        self.metric_history.push(result.metric_value);
        self.model_result = Some(result);
    }

    /// The latest model result, if any.
    pub fn model_result(&self) -> Option<&ModelResult> {
        self.model_result.as_ref()
    }

    /// Primary metric of every attempt, in order.
    pub fn metric_history(&self) -> &[f64] {
        &self.metric_history
    }

    /// Retry cycles taken so far.
    pub fn iteration_count(&self) -> u32 {
        self.iteration_count
    }

    /// Marks a retry cycle as taken.
    pub fn begin_retry(&mut self) {
        self.iteration_count += 1;
    }

    /// Sets the reflection decision for this cycle (rewritten every cycle).
    pub fn set_decision(&mut self, decision: ReflectionDecision) {
        self.reflection_decision = Some(decision);
    }

    /// The latest reflection decision.
    pub fn decision(&self) -> Option<ReflectionDecision> {
        self.reflection_decision
    }

    /// Sets the adjustment the next training attempt should apply.
    pub fn set_adjustment(&mut self, adjustment: TrainingAdjustment) {
        self.training_adjustment = Some(adjustment);
    }

    /// The pending training adjustment, if any.
    pub fn adjustment(&self) -> Option<TrainingAdjustment> {
        self.training_adjustment
    }

    /// Records an aborting or degrading failure. The first failure wins;
    /// later ones are logged and dropped so the original cause is preserved.
    pub fn record_failure(&mut self, failure: RunFailure) {
        if let Some(existing) = &self.failure {
            tracing::warn!(original = %existing, dropped = %failure, "Second failure recorded");
            return;
        }
        self.failure = Some(failure);
    }

    /// The recorded failure, if any.
    pub fn failure(&self) -> Option<&RunFailure> {
        self.failure.as_ref()
    }

    /// Sets the final response. Write-once.
    pub fn set_final_response(&mut self, response: impl Into<String>) -> Result<(), StateError> {
        if self.final_response.is_some() {
            return Err(StateError::AlreadySet("final_response"));
        }
        self.final_response = Some(response.into());
        Ok(())
    }

    /// The final response, if the run has completed.
    pub fn final_response(&self) -> Option<&str> {
        self.final_response.as_deref()
    }

    /// Derives the run status from the recorded state.
    pub fn status(&self) -> RunStatus {
        match &self.failure {
            Some(failure) if failure.is_abort() => RunStatus::Aborted,
            Some(_) => RunStatus::Partial,
            None => {
                if self.analysis.values().all(StepOutcome::is_completed) {
                    RunStatus::Success
                } else {
                    RunStatus::Partial
                }
            }
        }
    }
}
