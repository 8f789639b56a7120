//! Planning: from validated intent to an ordered sequence of analysis steps.
//!
//! Step proposals may come from a planning collaborator (an LLM) or from the
//! built-in [`HeuristicPlanner`]; either way, [`build_plan`] validates the
//! proposal against the plan rules before the orchestrator accepts it. No
//! partial plan is ever accepted.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::dataset::DatasetDescriptor;
use crate::error::LlmError;
use crate::intent::{AnalysisCategory, AnalysisIntent};

/// Errors that can occur while building a plan.
#[derive(Debug, Error)]
pub enum PlanningError {
    /// The proposal contained no steps.
    #[error("Planning produced an empty step sequence")]
    EmptyPlan,

    /// A proposed step name is not in the step vocabulary.
    #[error("Unknown analysis step '{0}'")]
    UnknownStep(String),

    /// The same step appeared twice.
    #[error("Duplicate analysis step '{0}'")]
    DuplicateStep(StepName),

    /// A training step was proposed for a non-training intent.
    #[error("Plan contains 'train_model' but the intent category is '{0}'")]
    TrainingNotRequested(AnalysisCategory),

    /// A step appears before the step it depends on.
    #[error("Step '{step}' requires '{dependency}' earlier in the plan")]
    MissingDependency { step: StepName, dependency: StepName },

    /// The planning collaborator failed or timed out.
    #[error("Planning collaborator failed: {0}")]
    Collaborator(String),
}

/// Kind of work a step performs, used for dispatch and scheduling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    /// Exploratory statistics over the raw dataset.
    Eda,
    /// Derived feature construction; depends on column inspection.
    FeatureEngineering,
    /// Supervised model training; executed by the training stage.
    Training,
}

/// The closed vocabulary of analysis step names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepName {
    /// Confirm the dataset is readable and report its shape.
    Load,
    /// Infer and report column types.
    InspectColumns,
    /// Per-column summary statistics.
    SummaryStats,
    /// Per-column missing value counts.
    MissingValues,
    /// Pearson correlation over numeric columns.
    Correlation,
    /// Value distribution of one or all columns.
    Distribution,
    /// Standardize and encode features for training.
    FeatureEngineering,
    /// Train and evaluate a model.
    TrainModel,
}

impl StepName {
    /// Canonical snake_case name.
    pub fn as_str(&self) -> &'static str {
        match self {
            StepName::Load => "load",
            StepName::InspectColumns => "inspect_columns",
            StepName::SummaryStats => "summary_stats",
            StepName::MissingValues => "missing_values",
            StepName::Correlation => "correlation",
            StepName::Distribution => "distribution",
            StepName::FeatureEngineering => "feature_engineering",
            StepName::TrainModel => "train_model",
        }
    }

    /// Parses a step name.
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "load" => Some(StepName::Load),
            "inspect_columns" => Some(StepName::InspectColumns),
            "summary_stats" => Some(StepName::SummaryStats),
            "missing_values" => Some(StepName::MissingValues),
            "correlation" => Some(StepName::Correlation),
            "distribution" => Some(StepName::Distribution),
            "feature_engineering" => Some(StepName::FeatureEngineering),
            "train_model" => Some(StepName::TrainModel),
            _ => None,
        }
    }

    /// The kind of work this step performs.
    pub fn kind(&self) -> StepKind {
        match self {
            StepName::Load
            | StepName::InspectColumns
            | StepName::SummaryStats
            | StepName::MissingValues
            | StepName::Correlation
            | StepName::Distribution => StepKind::Eda,
            StepName::FeatureEngineering => StepKind::FeatureEngineering,
            StepName::TrainModel => StepKind::Training,
        }
    }

    /// The step whose output this step needs, if any.
    pub fn dependency(&self) -> Option<StepName> {
        match self {
            StepName::FeatureEngineering => Some(StepName::InspectColumns),
            StepName::TrainModel => Some(StepName::FeatureEngineering),
            _ => None,
        }
    }
}

impl fmt::Display for StepName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One validated step of a plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisStep {
    /// The step to execute.
    pub name: StepName,
    /// Step parameters, interpreted by the compute backend.
    #[serde(default)]
    pub params: serde_json::Value,
}

impl AnalysisStep {
    /// Creates a step with no parameters.
    pub fn new(name: StepName) -> Self {
        Self {
            name,
            params: serde_json::Value::Null,
        }
    }

    /// Creates a step with parameters.
    pub fn with_params(name: StepName, params: serde_json::Value) -> Self {
        Self { name, params }
    }
}

/// A step proposal before validation, as a collaborator emits it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProposedStep {
    /// Step name, to be resolved against the vocabulary.
    pub name: String,
    /// Step parameters.
    #[serde(default)]
    pub params: serde_json::Value,
}

impl ProposedStep {
    /// Creates a named proposal without parameters.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            params: serde_json::Value::Null,
        }
    }

    /// Creates a named proposal with parameters.
    pub fn with_params(name: impl Into<String>, params: serde_json::Value) -> Self {
        Self {
            name: name.into(),
            params,
        }
    }
}

/// Trait for planning collaborators.
#[async_trait]
pub trait StepProposer: Send + Sync {
    /// Proposes an ordered step sequence for the intent and dataset.
    async fn propose_steps(
        &self,
        intent: &AnalysisIntent,
        descriptor: &DatasetDescriptor,
    ) -> Result<Vec<ProposedStep>, LlmError>;
}

/// Deterministic rule-based planner.
///
/// Default planning collaborator: maps each intent category to a fixed step
/// sequence parameterized by the intent's columns and target.
#[derive(Debug, Clone, Default)]
pub struct HeuristicPlanner;

impl HeuristicPlanner {
    /// Creates a new heuristic planner.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl StepProposer for HeuristicPlanner {
    async fn propose_steps(
        &self,
        intent: &AnalysisIntent,
        _descriptor: &DatasetDescriptor,
    ) -> Result<Vec<ProposedStep>, LlmError> {
        let mut steps = vec![
            ProposedStep::new("load"),
            ProposedStep::new("inspect_columns"),
        ];

        match intent.category {
            AnalysisCategory::Summary => {
                steps.push(ProposedStep::new("summary_stats"));
                steps.push(ProposedStep::new("missing_values"));
            }
            AnalysisCategory::Correlation => {
                steps.push(ProposedStep::new("summary_stats"));
                steps.push(ProposedStep::with_params(
                    "correlation",
                    serde_json::json!({ "columns": intent.columns }),
                ));
            }
            AnalysisCategory::Distribution => {
                let column = intent.columns.first().cloned();
                steps.push(ProposedStep::with_params(
                    "distribution",
                    serde_json::json!({ "column": column }),
                ));
            }
            AnalysisCategory::MissingValueAudit => {
                steps.push(ProposedStep::new("missing_values"));
            }
            AnalysisCategory::ModelTraining => {
                steps.push(ProposedStep::new("summary_stats"));
                steps.push(ProposedStep::new("missing_values"));
                steps.push(ProposedStep::with_params(
                    "feature_engineering",
                    serde_json::json!({ "target": intent.target }),
                ));
                steps.push(ProposedStep::with_params(
                    "train_model",
                    serde_json::json!({
                        "target": intent.target,
                        "metric": intent.metric.map(|m| m.as_str()),
                    }),
                ));
            }
        }

        Ok(steps)
    }
}

/// Validates a step proposal into an accepted plan.
///
/// Rules: every name must be in the vocabulary, names are unique, the plan is
/// non-empty, `train_model` only appears for model-training intents, and
/// every step's dependency appears earlier in the sequence.
///
/// # Errors
///
/// Returns the first violated rule as a [`PlanningError`]; the caller aborts
/// the run rather than accept a partial plan.
pub fn build_plan(
    intent: &AnalysisIntent,
    proposals: Vec<ProposedStep>,
) -> Result<Vec<AnalysisStep>, PlanningError> {
    if proposals.is_empty() {
        return Err(PlanningError::EmptyPlan);
    }

    let mut plan: Vec<AnalysisStep> = Vec::with_capacity(proposals.len());
    let mut seen: Vec<StepName> = Vec::with_capacity(proposals.len());

    for proposal in proposals {
        let name =
            StepName::parse(&proposal.name).ok_or(PlanningError::UnknownStep(proposal.name))?;

        if seen.contains(&name) {
            return Err(PlanningError::DuplicateStep(name));
        }

        if name == StepName::TrainModel && intent.category != AnalysisCategory::ModelTraining {
            return Err(PlanningError::TrainingNotRequested(intent.category));
        }

        if let Some(dependency) = name.dependency() {
            if !seen.contains(&dependency) {
                return Err(PlanningError::MissingDependency {
                    step: name,
                    dependency,
                });
            }
        }

        seen.push(name);
        plan.push(AnalysisStep::with_params(name, proposal.params));
    }

    Ok(plan)
}
