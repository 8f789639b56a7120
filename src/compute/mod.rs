//! Computation backend: EDA steps, feature engineering and model training.
//!
//! The orchestration core sees computation only through the
//! [`ComputeBackend`] trait; [`TableCompute`] is the built-in implementation
//! over in-memory [`Dataset`]s. Step results are `serde_json::Value`
//! payloads so the state container and the response stage stay agnostic of
//! the backend.

pub mod eda;
pub mod features;
pub mod training;

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

use crate::dataset::Dataset;
use crate::planner::{AnalysisStep, StepName};

pub use training::{ModelResult, TrainParams, TrainingError};

/// Errors that can occur while running a single analysis step.
///
/// A step failure is recoverable at step granularity: it is recorded in the
/// run's analysis map and independent sibling steps continue.
#[derive(Debug, Error)]
pub enum ComputationError {
    /// A referenced column does not exist.
    #[error("Column '{0}' not found in dataset")]
    MissingColumn(String),

    /// A step needed a numeric column but got another type.
    #[error("Column '{0}' is not numeric")]
    NotNumeric(String),

    /// Fewer than two numeric columns for a correlation.
    #[error("Correlation requires at least two numeric columns, found {0}")]
    NotEnoughNumericColumns(usize),

    /// Step parameters did not match the step's contract.
    #[error("Invalid parameters for step '{step}': {message}")]
    InvalidParams { step: StepName, message: String },

    /// The step is not one this backend executes.
    #[error("Step '{0}' is not executable by the compute backend")]
    UnsupportedStep(StepName),

    /// Catch-all for backend-internal failures.
    #[error("Computation failed: {0}")]
    Failed(String),
}

/// Trait for computation collaborators.
#[async_trait]
pub trait ComputeBackend: Send + Sync {
    /// Runs one EDA or feature-engineering step against the dataset.
    async fn run_step(
        &self,
        step: &AnalysisStep,
        dataset: &Arc<Dataset>,
    ) -> Result<serde_json::Value, ComputationError>;

    /// Trains and evaluates a model with the given parameters.
    async fn train(
        &self,
        dataset: &Arc<Dataset>,
        params: &TrainParams,
    ) -> Result<ModelResult, TrainingError>;
}

/// Built-in computation backend over in-memory tabular datasets.
#[derive(Debug, Clone, Default)]
pub struct TableCompute;

impl TableCompute {
    /// Creates a new backend.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ComputeBackend for TableCompute {
    async fn run_step(
        &self,
        step: &AnalysisStep,
        dataset: &Arc<Dataset>,
    ) -> Result<serde_json::Value, ComputationError> {
        tracing::debug!(step = %step.name, "Running analysis step");
        match step.name {
            StepName::Load => Ok(eda::load(dataset)),
            StepName::InspectColumns => Ok(eda::inspect_columns(dataset)),
            StepName::SummaryStats => Ok(eda::summary_stats(dataset)),
            StepName::MissingValues => Ok(eda::missing_values(dataset)),
            StepName::Correlation => eda::correlation(dataset, &step.params),
            StepName::Distribution => eda::distribution(dataset, &step.params),
            StepName::FeatureEngineering => features::engineer(dataset, &step.params),
            StepName::TrainModel => Err(ComputationError::UnsupportedStep(step.name)),
        }
    }

    async fn train(
        &self,
        dataset: &Arc<Dataset>,
        params: &TrainParams,
    ) -> Result<ModelResult, TrainingError> {
        tracing::debug!(target = %params.target, seed = params.seed, "Training model");
        training::train(dataset, params)
    }
}
