//! The workflow graph: static edges plus one conditional edge.
//!
//! Transitions are a pure function of the current stage and the state, so
//! the executor's control flow is inspectable and testable on its own. The
//! single conditional edge is Reflection's: retry back to Model Training or
//! proceed to Response. The iteration bound is enforced here, at the edge,
//! regardless of what the reflection stage wrote.

use super::events::WorkflowStage;
use super::state::WorkflowState;
use crate::reflection::ReflectionDecision;

/// Where to go after a stage completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Advance to the named stage.
    Next(WorkflowStage),
    /// The run is over.
    Terminal,
}

/// The directed graph of workflow stages.
#[derive(Debug, Clone, Copy)]
pub struct StageGraph {
    max_iterations: u32,
}

impl StageGraph {
    /// Creates a graph with the given retry bound.
    pub fn new(max_iterations: u32) -> Self {
        Self { max_iterations }
    }

    /// The entry stage.
    pub fn entry() -> WorkflowStage {
        WorkflowStage::IntentValidation
    }

    /// The edge out of `stage`, given the current state.
    pub fn next(&self, stage: WorkflowStage, state: &WorkflowState) -> Transition {
        match stage {
            WorkflowStage::IntentValidation => Transition::Next(WorkflowStage::Planning),
            WorkflowStage::Planning => Transition::Next(WorkflowStage::Analysis),
            WorkflowStage::Analysis => Transition::Next(WorkflowStage::FeatureEngineering),
            WorkflowStage::FeatureEngineering => Transition::Next(WorkflowStage::ModelTraining),
            WorkflowStage::ModelTraining => Transition::Next(WorkflowStage::Reflection),
            WorkflowStage::Reflection => {
                let retry = state.decision() == Some(ReflectionDecision::Retry)
                    && state.iteration_count() < self.max_iterations;
                if retry {
                    Transition::Next(WorkflowStage::ModelTraining)
                } else {
                    Transition::Next(WorkflowStage::Response)
                }
            }
            WorkflowStage::Response => Transition::Terminal,
        }
    }
}
