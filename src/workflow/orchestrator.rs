//! The graph executor driving a run from intent validation to response.
//!
//! The orchestrator owns the only mutable reference to a run's
//! [`WorkflowState`] and walks the [`StageGraph`] from entry to terminal.
//! Aborting failures route straight to the response stage, which always runs
//! exactly once; `run()` therefore never returns an error, only a
//! [`RunReport`]. The orchestrator itself holds no per-run state, so one
//! instance can serve concurrent runs.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::sync::mpsc;

use crate::compute::{ComputeBackend, TableCompute, TrainParams};
use crate::dataset::{Dataset, DatasetDescriptor};
use crate::intent::{self, IntentExtractor};
use crate::planner::{
    build_plan, AnalysisStep, HeuristicPlanner, PlanningError, StepKind, StepName, StepProposer,
};
use crate::reflection::{next_adjustment, reflect, ReflectionDecision};
use crate::response::{render_template, Synthesizer};

use super::config::{ConfigError, WorkflowConfig};
use super::events::{WorkflowEvent, WorkflowStage};
use super::graph::{StageGraph, Transition};
use super::report::RunReport;
use super::state::{RunFailure, StepOutcome, WorkflowState};

/// A collaborator call that timed out or failed.
#[derive(Debug, Error)]
pub enum CollaboratorError<E: std::fmt::Display + std::fmt::Debug> {
    /// Both the call and its single retry timed out.
    #[error("collaborator call timed out after {timeout:?} (retried once)")]
    Timeout {
        /// The per-call timeout that elapsed.
        timeout: Duration,
    },

    /// The collaborator returned its own error.
    #[error("{0}")]
    Inner(E),
}

/// Cooperative cancellation handle, observed between stage boundaries.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// Creates a token in the not-cancelled state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation. The run stops at the next stage boundary.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Input to one workflow run.
#[derive(Debug, Clone)]
pub struct RunRequest {
    /// The natural-language request.
    pub query: String,
    /// Path to the CSV dataset.
    pub dataset_path: PathBuf,
    /// Cancellation token for this run.
    pub cancel: CancelToken,
}

impl RunRequest {
    /// Creates a run request.
    pub fn new(query: impl Into<String>, dataset_path: impl Into<PathBuf>) -> Self {
        Self {
            query: query.into(),
            dataset_path: dataset_path.into(),
            cancel: CancelToken::new(),
        }
    }

    /// Attaches a cancellation token.
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }
}

/// The workflow orchestrator.
pub struct WorkflowOrchestrator {
    config: WorkflowConfig,
    intent_extractor: Arc<dyn IntentExtractor>,
    planner: Arc<dyn StepProposer>,
    compute: Arc<dyn ComputeBackend>,
    synthesizer: Option<Arc<dyn Synthesizer>>,
}

impl WorkflowOrchestrator {
    /// Creates an orchestrator with the built-in planner and compute backend
    /// and no synthesis collaborator.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the configuration is invalid.
    pub fn new(
        config: WorkflowConfig,
        intent_extractor: Arc<dyn IntentExtractor>,
    ) -> Result<Self, ConfigError> {
        OrchestratorBuilder::new()
            .config(config)
            .intent_extractor(intent_extractor)
            .build()
    }

    /// Returns a builder.
    pub fn builder() -> OrchestratorBuilder {
        OrchestratorBuilder::new()
    }

    /// Gets the current configuration.
    pub fn config(&self) -> &WorkflowConfig {
        &self.config
    }

    /// Runs the workflow to completion, discarding progress events.
    pub async fn run(&self, request: RunRequest) -> RunReport {
        let (event_tx, event_rx) = mpsc::channel(16);
        // With the receiver dropped, every send fails fast and is ignored.
        drop(event_rx);
        self.run_with_events(request, event_tx).await
    }

    /// Runs the workflow to completion, emitting progress events.
    ///
    /// Total: always returns a report with `final_response` populated,
    /// whatever failed along the way.
    pub async fn run_with_events(
        &self,
        request: RunRequest,
        event_tx: mpsc::Sender<WorkflowEvent>,
    ) -> RunReport {
        let started = Instant::now();
        let mut state = WorkflowState::new(&request.query);

        tracing::info!(run_id = %state.run_id(), query = %state.query(), "Run started");
        self.send_event(&event_tx, WorkflowEvent::run_started(state.run_id()))
            .await;

        // The dataset is opened read-only once and shared by every step. A
        // missing or malformed dataset fails the run before intent
        // validation, but still flows to the response stage.
        let dataset = match Dataset::from_csv_path(&request.dataset_path) {
            Ok(dataset) => Some(Arc::new(dataset)),
            Err(e) => {
                state.record_failure(RunFailure::Configuration(e.to_string()));
                None
            }
        };
        let descriptor = dataset.as_deref().map(Dataset::descriptor);

        let graph = StageGraph::new(self.config.max_iterations);
        let mut stage = StageGraph::entry();

        loop {
            if stage != WorkflowStage::Response {
                if request.cancel.is_cancelled() && state.failure().is_none() {
                    tracing::info!(run_id = %state.run_id(), "Run cancelled at stage boundary");
                    state.record_failure(RunFailure::Cancelled(format!(
                        "cancelled before the {stage} stage"
                    )));
                }
                // Aborting failures (and training failures) skip the
                // remaining computation stages.
                if state.failure().is_some() {
                    stage = WorkflowStage::Response;
                    continue;
                }
            }

            self.send_event(&event_tx, WorkflowEvent::stage_started(stage))
                .await;

            let result = self
                .execute_stage(stage, &mut state, dataset.as_ref(), descriptor.as_ref())
                .await;

            match result {
                Ok(()) => {
                    self.send_event(&event_tx, WorkflowEvent::stage_completed(stage))
                        .await;
                }
                Err(failure) => {
                    tracing::warn!(stage = %stage, error = %failure, "Stage failed");
                    self.send_event(
                        &event_tx,
                        WorkflowEvent::stage_failed(stage, failure.to_string()),
                    )
                    .await;
                    state.record_failure(failure);
                }
            }

            match graph.next(stage, &state) {
                Transition::Next(next) => {
                    if stage == WorkflowStage::Reflection && next == WorkflowStage::ModelTraining {
                        state.begin_retry();
                        tracing::info!(
                            iteration = state.iteration_count(),
                            "Retrying model training"
                        );
                        self.send_event(
                            &event_tx,
                            WorkflowEvent::retry_scheduled(state.iteration_count()),
                        )
                        .await;
                    }
                    stage = next;
                }
                Transition::Terminal => break,
            }
        }

        let report = RunReport::from_state(&state, started.elapsed().as_millis() as u64);
        tracing::info!(run_id = %report.run_id, status = %report.status, "Run completed");
        self.send_event(&event_tx, WorkflowEvent::run_completed(report.status))
            .await;
        report
    }

    /// Executes one stage against the state.
    async fn execute_stage(
        &self,
        stage: WorkflowStage,
        state: &mut WorkflowState,
        dataset: Option<&Arc<Dataset>>,
        descriptor: Option<&DatasetDescriptor>,
    ) -> Result<(), RunFailure> {
        match stage {
            WorkflowStage::IntentValidation => self.run_intent_stage(state).await,
            WorkflowStage::Planning => self.run_planning_stage(state, descriptor).await,
            WorkflowStage::Analysis => self.run_analysis_stage(state, dataset).await,
            WorkflowStage::FeatureEngineering => {
                self.run_feature_stage(state, dataset).await
            }
            WorkflowStage::ModelTraining => self.run_training_stage(state, dataset).await,
            WorkflowStage::Reflection => {
                self.run_reflection_stage(state);
                Ok(())
            }
            WorkflowStage::Response => self.run_response_stage(state).await,
        }
    }

    /// Intent validation: extract, then gate through the schema validator.
    async fn run_intent_stage(&self, state: &mut WorkflowState) -> Result<(), RunFailure> {
        let payload = self
            .call_collaborator("intent extraction", || {
                self.intent_extractor.extract_intent(state.query())
            })
            .await
            .map_err(|e| RunFailure::Intent(e.to_string()))?;

        let intent = intent::validate(&payload).map_err(|e| RunFailure::Intent(e.to_string()))?;
        tracing::info!(category = %intent.category, "Intent validated");

        state
            .set_intent(intent)
            .map_err(|e| RunFailure::Internal(e.to_string()))
    }

    /// Planning: collect proposals, validate them into an accepted plan.
    async fn run_planning_stage(
        &self,
        state: &mut WorkflowState,
        descriptor: Option<&DatasetDescriptor>,
    ) -> Result<(), RunFailure> {
        let descriptor = descriptor
            .ok_or_else(|| RunFailure::Internal("planning reached without a dataset".to_string()))?;
        let intent = state
            .intent()
            .cloned()
            .ok_or_else(|| RunFailure::Internal("planning reached without an intent".to_string()))?;

        let proposals = self
            .call_collaborator("planning", || {
                self.planner.propose_steps(&intent, descriptor)
            })
            .await
            .map_err(|e| {
                RunFailure::Planning(PlanningError::Collaborator(e.to_string()).to_string())
            })?;

        let plan = build_plan(&intent, proposals).map_err(|e| RunFailure::Planning(e.to_string()))?;
        tracing::info!(steps = plan.len(), "Plan accepted");

        state
            .set_plan(plan)
            .map_err(|e| RunFailure::Internal(e.to_string()))
    }

    /// Analysis: run the plan's EDA steps concurrently against the shared
    /// read-only dataset, then commit their outcomes under distinct keys.
    async fn run_analysis_stage(
        &self,
        state: &mut WorkflowState,
        dataset: Option<&Arc<Dataset>>,
    ) -> Result<(), RunFailure> {
        let dataset = dataset
            .ok_or_else(|| RunFailure::Internal("analysis reached without a dataset".to_string()))?;

        let steps: Vec<AnalysisStep> = state
            .plan()
            .unwrap_or_default()
            .iter()
            .filter(|s| s.name.kind() == StepKind::Eda)
            .cloned()
            .collect();

        let futures = steps.iter().map(|step| {
            let dataset = Arc::clone(dataset);
            async move {
                let outcome = match self.compute.run_step(step, &dataset).await {
                    Ok(result) => StepOutcome::Completed { result },
                    Err(e) => {
                        tracing::warn!(step = %step.name, error = %e, "Analysis step failed");
                        StepOutcome::Failed {
                            error: e.to_string(),
                        }
                    }
                };
                (step.name, outcome)
            }
        });

        // Writes are merged only after the join; plan validation guarantees
        // the keys are mutually exclusive.
        for (name, outcome) in futures::future::join_all(futures).await {
            state
                .record_step(name.as_str(), outcome)
                .map_err(|e| RunFailure::Internal(e.to_string()))?;
        }

        Ok(())
    }

    /// Feature engineering: short-circuits on a failed dependency.
    async fn run_feature_stage(
        &self,
        state: &mut WorkflowState,
        dataset: Option<&Arc<Dataset>>,
    ) -> Result<(), RunFailure> {
        let dataset = dataset.ok_or_else(|| {
            RunFailure::Internal("feature engineering reached without a dataset".to_string())
        })?;

        let steps: Vec<AnalysisStep> = state
            .plan()
            .unwrap_or_default()
            .iter()
            .filter(|s| s.name.kind() == StepKind::FeatureEngineering)
            .cloned()
            .collect();

        for step in steps {
            let outcome = match step.name.dependency() {
                Some(dependency)
                    if !state
                        .step(dependency.as_str())
                        .is_some_and(StepOutcome::is_completed) =>
                {
                    tracing::warn!(
                        step = %step.name,
                        dependency = %dependency,
                        "Skipping step: dependency did not complete"
                    );
                    StepOutcome::SkippedDependency {
                        dependency: dependency.as_str().to_string(),
                    }
                }
                _ => match self.compute.run_step(&step, dataset).await {
                    Ok(result) => StepOutcome::Completed { result },
                    Err(e) => {
                        tracing::warn!(step = %step.name, error = %e, "Feature step failed");
                        StepOutcome::Failed {
                            error: e.to_string(),
                        }
                    }
                },
            };

            state
                .record_step(step.name.as_str(), outcome)
                .map_err(|e| RunFailure::Internal(e.to_string()))?;
        }

        Ok(())
    }

    /// Model training: one attempt per invocation; failures end the loop.
    async fn run_training_stage(
        &self,
        state: &mut WorkflowState,
        dataset: Option<&Arc<Dataset>>,
    ) -> Result<(), RunFailure> {
        let dataset = dataset
            .ok_or_else(|| RunFailure::Internal("training reached without a dataset".to_string()))?;

        let planned = state
            .plan()
            .unwrap_or_default()
            .iter()
            .any(|s| s.name == StepName::TrainModel);
        if !planned {
            tracing::debug!("No training step planned; stage is a no-op");
            return Ok(());
        }

        let params = self.train_params(state)?;
        let result = self
            .call_collaborator("model training", || self.compute.train(dataset, &params))
            .await
            .map_err(|e| RunFailure::Training(e.to_string()))?;

        tracing::info!(
            metric = %result.metric,
            value = result.metric_value,
            attempt = state.metric_history().len() + 1,
            "Training attempt completed"
        );
        state.record_training(result);
        Ok(())
    }

    /// Reflection: pure decision over the metric history, plus the
    /// hyperparameter adjustment for a retry.
    fn run_reflection_stage(&self, state: &mut WorkflowState) {
        let decision = if state.model_result().is_none() {
            ReflectionDecision::Proceed
        } else {
            reflect(
                state.metric_history(),
                state.iteration_count(),
                self.config.max_iterations,
                self.config.metric_threshold,
            )
        };

        let adjustment = (decision == ReflectionDecision::Retry)
            .then(|| state.model_result().map(next_adjustment))
            .flatten();

        tracing::info!(decision = %decision, "Reflection decided");
        state.set_decision(decision);
        if let Some(adjustment) = adjustment {
            state.set_adjustment(adjustment);
        }
    }

    /// Response: synthesize if possible, fall back to the template. Never
    /// fails the run.
    async fn run_response_stage(&self, state: &mut WorkflowState) -> Result<(), RunFailure> {
        let digest = render_template(state);
        let cancelled = matches!(state.failure(), Some(RunFailure::Cancelled(_)));

        let text = match (&self.synthesizer, cancelled) {
            (Some(synthesizer), false) => {
                let query = state.query().to_string();
                match self
                    .call_collaborator("text synthesis", || synthesizer.synthesize(&query, &digest))
                    .await
                {
                    Ok(text) => text,
                    Err(e) => {
                        tracing::warn!(
                            error = %e,
                            "Synthesis collaborator unavailable; using templated response"
                        );
                        digest
                    }
                }
            }
            _ => digest,
        };

        state
            .set_final_response(text)
            .map_err(|e| RunFailure::Internal(e.to_string()))
    }

    /// Derives training parameters from intent, configuration and any
    /// reflection adjustment.
    fn train_params(&self, state: &WorkflowState) -> Result<TrainParams, RunFailure> {
        let intent = state
            .intent()
            .ok_or_else(|| RunFailure::Internal("training reached without an intent".to_string()))?;
        let target = intent.target.clone().ok_or_else(|| {
            RunFailure::Internal("training planned without a target column".to_string())
        })?;

        let mut params = TrainParams::new(target)
            .with_split_ratio(self.config.split_ratio)
            .with_seed(self.config.seed)
            .with_learning_rate(self.config.learning_rate)
            .with_epochs(self.config.epochs);

        if let Some(metric) = intent.metric {
            params = params.with_metric(metric);
        }
        if let Some(adjustment) = state.adjustment() {
            params = params
                .with_learning_rate(adjustment.learning_rate)
                .with_epochs(adjustment.epochs);
        }

        Ok(params)
    }

    /// Calls a collaborator with the per-call timeout; a timeout is retried
    /// once after the configured backoff, then surfaces as an error.
    async fn call_collaborator<T, E, F, Fut>(
        &self,
        what: &'static str,
        mut op: F,
    ) -> Result<T, CollaboratorError<E>>
    where
        E: std::fmt::Display + std::fmt::Debug,
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
    {
        match tokio::time::timeout(self.config.collaborator_timeout, op()).await {
            Ok(result) => result.map_err(CollaboratorError::Inner),
            Err(_) => {
                tracing::warn!(
                    collaborator = what,
                    timeout_secs = self.config.collaborator_timeout.as_secs(),
                    "Collaborator call timed out; retrying once"
                );
                tokio::time::sleep(self.config.retry_backoff).await;
                match tokio::time::timeout(self.config.collaborator_timeout, op()).await {
                    Ok(result) => result.map_err(CollaboratorError::Inner),
                    Err(_) => Err(CollaboratorError::Timeout {
                        timeout: self.config.collaborator_timeout,
                    }),
                }
            }
        }
    }

    /// Sends an event through the channel, ignoring send errors.
    async fn send_event(&self, event_tx: &mpsc::Sender<WorkflowEvent>, event: WorkflowEvent) {
        // Ignore send errors - receiver may have been dropped
        let _ = event_tx.send(event).await;
    }
}

/// Builder for creating a [`WorkflowOrchestrator`] with a fluent API.
pub struct OrchestratorBuilder {
    config: WorkflowConfig,
    intent_extractor: Option<Arc<dyn IntentExtractor>>,
    planner: Arc<dyn StepProposer>,
    compute: Arc<dyn ComputeBackend>,
    synthesizer: Option<Arc<dyn Synthesizer>>,
}

impl OrchestratorBuilder {
    /// Creates a new builder with default configuration, the heuristic
    /// planner and the built-in compute backend.
    pub fn new() -> Self {
        Self {
            config: WorkflowConfig::default(),
            intent_extractor: None,
            planner: Arc::new(HeuristicPlanner::new()),
            compute: Arc::new(TableCompute::new()),
            synthesizer: None,
        }
    }

    /// Sets the configuration.
    pub fn config(mut self, config: WorkflowConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the intent extractor (required).
    pub fn intent_extractor(mut self, extractor: Arc<dyn IntentExtractor>) -> Self {
        self.intent_extractor = Some(extractor);
        self
    }

    /// Sets the planning collaborator.
    pub fn planner(mut self, planner: Arc<dyn StepProposer>) -> Self {
        self.planner = planner;
        self
    }

    /// Sets the compute backend.
    pub fn compute(mut self, compute: Arc<dyn ComputeBackend>) -> Self {
        self.compute = compute;
        self
    }

    /// Sets the text-synthesis collaborator.
    pub fn synthesizer(mut self, synthesizer: Arc<dyn Synthesizer>) -> Self {
        self.synthesizer = Some(synthesizer);
        self
    }

    /// Builds the orchestrator.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the configuration is invalid or no intent
    /// extractor was provided.
    pub fn build(self) -> Result<WorkflowOrchestrator, ConfigError> {
        self.config.validate()?;

        let intent_extractor = self.intent_extractor.ok_or_else(|| {
            ConfigError::ValidationFailed("an intent extractor is required".to_string())
        })?;

        Ok(WorkflowOrchestrator {
            config: self.config,
            intent_extractor,
            planner: self.planner,
            compute: self.compute,
            synthesizer: self.synthesizer,
        })
    }
}

impl Default for OrchestratorBuilder {
    fn default() -> Self {
        Self::new()
    }
}
