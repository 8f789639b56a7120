//! Workflow stages and the progress events emitted while a run executes.
//!
//! Events go out over an `mpsc` channel for front-ends to render; send
//! failures are ignored, so a dropped receiver never disturbs a run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::state::RunStatus;

/// The stages of the workflow graph, in static-edge order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkflowStage {
    /// Validate the extracted intent.
    IntentValidation,
    /// Build the step plan.
    Planning,
    /// Run the EDA steps of the plan.
    Analysis,
    /// Run the feature-engineering steps of the plan.
    FeatureEngineering,
    /// Train and evaluate a model.
    ModelTraining,
    /// Decide whether to retry training.
    Reflection,
    /// Produce the final response. Terminal.
    Response,
}

impl WorkflowStage {
    /// All stages in static-edge order.
    pub fn all_stages() -> Vec<WorkflowStage> {
        vec![
            WorkflowStage::IntentValidation,
            WorkflowStage::Planning,
            WorkflowStage::Analysis,
            WorkflowStage::FeatureEngineering,
            WorkflowStage::ModelTraining,
            WorkflowStage::Reflection,
            WorkflowStage::Response,
        ]
    }

    /// Returns the display name for this stage.
    pub fn display_name(&self) -> &'static str {
        match self {
            WorkflowStage::IntentValidation => "Intent Validation",
            WorkflowStage::Planning => "Planning",
            WorkflowStage::Analysis => "Analysis",
            WorkflowStage::FeatureEngineering => "Feature Engineering",
            WorkflowStage::ModelTraining => "Model Training",
            WorkflowStage::Reflection => "Reflection",
            WorkflowStage::Response => "Response",
        }
    }
}

impl std::fmt::Display for WorkflowStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

/// Events emitted during a run for front-end progress updates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum WorkflowEvent {
    /// A run has started.
    RunStarted {
        /// The run identifier.
        run_id: Uuid,
        /// Timestamp of the event.
        timestamp: DateTime<Utc>,
    },
    /// A stage has started.
    StageStarted {
        /// The stage that started.
        stage: WorkflowStage,
        /// Timestamp of the event.
        timestamp: DateTime<Utc>,
    },
    /// A stage has completed successfully.
    StageCompleted {
        /// The stage that completed.
        stage: WorkflowStage,
        /// Timestamp of the event.
        timestamp: DateTime<Utc>,
    },
    /// A stage has failed.
    StageFailed {
        /// The stage that failed.
        stage: WorkflowStage,
        /// Error message.
        error: String,
        /// Timestamp of the event.
        timestamp: DateTime<Utc>,
    },
    /// Reflection scheduled another training attempt.
    RetryScheduled {
        /// The retry cycle about to run (1-based).
        iteration: u32,
        /// Timestamp of the event.
        timestamp: DateTime<Utc>,
    },
    /// The run has completed.
    RunCompleted {
        /// Final run status.
        status: RunStatus,
        /// Timestamp of the event.
        timestamp: DateTime<Utc>,
    },
}

impl WorkflowEvent {
    /// Creates a run started event.
    pub fn run_started(run_id: Uuid) -> Self {
        WorkflowEvent::RunStarted {
            run_id,
            timestamp: Utc::now(),
        }
    }

    /// Creates a stage started event.
    pub fn stage_started(stage: WorkflowStage) -> Self {
        WorkflowEvent::StageStarted {
            stage,
            timestamp: Utc::now(),
        }
    }

    /// Creates a stage completed event.
    pub fn stage_completed(stage: WorkflowStage) -> Self {
        WorkflowEvent::StageCompleted {
            stage,
            timestamp: Utc::now(),
        }
    }

    /// Creates a stage failed event.
    pub fn stage_failed(stage: WorkflowStage, error: impl Into<String>) -> Self {
        WorkflowEvent::StageFailed {
            stage,
            error: error.into(),
            timestamp: Utc::now(),
        }
    }

    /// Creates a retry scheduled event.
    pub fn retry_scheduled(iteration: u32) -> Self {
        WorkflowEvent::RetryScheduled {
            iteration,
            timestamp: Utc::now(),
        }
    }

    /// Creates a run completed event.
    pub fn run_completed(status: RunStatus) -> Self {
        WorkflowEvent::RunCompleted {
            status,
            timestamp: Utc::now(),
        }
    }
}
