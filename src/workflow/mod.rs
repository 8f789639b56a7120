//! The workflow orchestration engine.
//!
//! This module is the core of the crate: the per-run state container
//! ([`state::WorkflowState`]), the stage graph with its single conditional
//! edge ([`graph::StageGraph`]), the executor driving a run to its terminal
//! response stage ([`orchestrator::WorkflowOrchestrator`]), and the progress
//! events and final report surrounding a run.

pub mod config;
pub mod events;
pub mod graph;
pub mod orchestrator;
pub mod report;
pub mod state;

pub use config::{ConfigError, WorkflowConfig};
pub use events::{WorkflowEvent, WorkflowStage};
pub use graph::{StageGraph, Transition};
pub use orchestrator::{
    CancelToken, CollaboratorError, OrchestratorBuilder, RunRequest, WorkflowOrchestrator,
};
pub use report::RunReport;
pub use state::{RunFailure, RunStatus, StateError, StepOutcome, WorkflowState};
