//! End-to-end workflow tests with mock collaborators.
//!
//! Each test drives a full run through the orchestrator against a real CSV
//! file on disk, substituting collaborators where a scenario needs scripted
//! behavior.

use async_trait::async_trait;
use std::collections::{BTreeMap, VecDeque};
use std::io::Write;
use std::sync::{Arc, Mutex};

use datapilot::compute::{
    ComputationError, ComputeBackend, ModelResult, TableCompute, TrainParams, TrainingError,
};
use datapilot::dataset::Dataset;
use datapilot::error::LlmError;
use datapilot::intent::{IntentExtractor, KeywordIntentExtractor, MetricKind, RawIntentPayload};
use datapilot::planner::{AnalysisStep, StepName};
use datapilot::response::Synthesizer;
use datapilot::workflow::{
    CancelToken, RunRequest, RunStatus, StepOutcome, WorkflowConfig, WorkflowEvent,
    WorkflowOrchestrator, WorkflowStage,
};

/// Writes CSV content to a temp file and keeps the file alive.
fn write_csv(content: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().expect("temp file");
    file.write_all(content.as_bytes()).expect("write dataset");
    file
}

/// 100 rows x 5 columns; `income` has 10 missing values.
fn summary_dataset() -> String {
    let mut text = String::from("age,income,score,city,active\n");
    for i in 0..100 {
        let income = if i < 10 {
            String::new()
        } else {
            format!("{}", 30000 + i * 100)
        };
        text.push_str(&format!(
            "{},{},{},{},{}\n",
            20 + i % 40,
            income,
            (i % 10) as f64 / 10.0,
            ["paris", "lyon", "nice"][i % 3],
            i % 2 == 0,
        ));
    }
    text
}

/// Linearly separable dataset for classification.
fn separable_dataset() -> String {
    let mut text = String::from("x,label\n");
    for i in 1..=50 {
        text.push_str(&format!("{},hi\n", i));
        text.push_str(&format!("-{},lo\n", i));
    }
    text
}

/// Intent extractor returning a fixed payload.
struct FixedIntentExtractor(RawIntentPayload);

#[async_trait]
impl IntentExtractor for FixedIntentExtractor {
    async fn extract_intent(&self, _query: &str) -> Result<RawIntentPayload, LlmError> {
        Ok(self.0.clone())
    }
}

/// Intent extractor that always fails.
struct FailingExtractor;

#[async_trait]
impl IntentExtractor for FailingExtractor {
    async fn extract_intent(&self, _query: &str) -> Result<RawIntentPayload, LlmError> {
        Err(LlmError::RequestFailed("connection refused".to_string()))
    }
}

/// Compute backend that injects step failures and scripted training metrics.
struct ScriptedCompute {
    inner: TableCompute,
    fail_steps: Vec<StepName>,
    metrics: Mutex<VecDeque<f64>>,
}

impl ScriptedCompute {
    fn new() -> Self {
        Self {
            inner: TableCompute::new(),
            fail_steps: Vec::new(),
            metrics: Mutex::new(VecDeque::new()),
        }
    }

    fn failing(mut self, step: StepName) -> Self {
        self.fail_steps.push(step);
        self
    }

    fn with_metrics(self, metrics: &[f64]) -> Self {
        *self.metrics.lock().unwrap() = metrics.iter().copied().collect();
        self
    }
}

#[async_trait]
impl ComputeBackend for ScriptedCompute {
    async fn run_step(
        &self,
        step: &AnalysisStep,
        dataset: &Arc<Dataset>,
    ) -> Result<serde_json::Value, ComputationError> {
        if self.fail_steps.contains(&step.name) {
            return Err(ComputationError::Failed("injected failure".to_string()));
        }
        self.inner.run_step(step, dataset).await
    }

    async fn train(
        &self,
        dataset: &Arc<Dataset>,
        params: &TrainParams,
    ) -> Result<ModelResult, TrainingError> {
        let scripted = self.metrics.lock().unwrap().pop_front();
        match scripted {
            Some(metric_value) => Ok(ModelResult {
                model_family: "logistic_regression".to_string(),
                target: params.target.clone(),
                metric: params.metric.unwrap_or(MetricKind::Accuracy),
                metric_value,
                metrics: BTreeMap::new(),
                classes: None,
                confusion: None,
                feature_importances: Vec::new(),
                train_rows: 32,
                test_rows: 8,
                seed: params.seed,
                learning_rate: params.learning_rate,
                epochs: params.epochs,
            }),
            None => self.inner.train(dataset, params).await,
        }
    }
}

/// Synthesizer that always fails, forcing the templated fallback.
struct UnavailableSynthesizer;

#[async_trait]
impl Synthesizer for UnavailableSynthesizer {
    async fn synthesize(&self, _query: &str, _digest: &str) -> Result<String, LlmError> {
        Err(LlmError::RequestFailed("unavailable".to_string()))
    }
}

/// Synthesizer that returns a fixed summary.
struct FixedSynthesizer(&'static str);

#[async_trait]
impl Synthesizer for FixedSynthesizer {
    async fn synthesize(&self, _query: &str, _digest: &str) -> Result<String, LlmError> {
        Ok(self.0.to_string())
    }
}

fn keyword_orchestrator(config: WorkflowConfig) -> WorkflowOrchestrator {
    WorkflowOrchestrator::builder()
        .config(config)
        .intent_extractor(Arc::new(KeywordIntentExtractor::new()))
        .build()
        .expect("orchestrator builds")
}

#[tokio::test]
async fn test_unsupported_category_aborts_before_computation() {
    let file = write_csv(&summary_dataset());
    let orchestrator = WorkflowOrchestrator::builder()
        .intent_extractor(Arc::new(FixedIntentExtractor(RawIntentPayload {
            category: Some("sentiment_analysis".to_string()),
            ..Default::default()
        })))
        .build()
        .unwrap();

    let report = orchestrator
        .run(RunRequest::new("How do people feel?", file.path()))
        .await;

    assert_eq!(report.status, RunStatus::Aborted);
    assert!(report.plan.is_none(), "no plan should be accepted");
    assert!(report.analysis.is_empty(), "no computation should run");
    assert!(
        report.final_response.contains("sentiment_analysis"),
        "response should name the unsupported category: {}",
        report.final_response
    );
}

#[tokio::test]
async fn test_nlu_failure_aborts_with_response() {
    let file = write_csv(&summary_dataset());
    let orchestrator = WorkflowOrchestrator::builder()
        .intent_extractor(Arc::new(FailingExtractor))
        .build()
        .unwrap();

    let report = orchestrator.run(RunRequest::new("anything", file.path())).await;

    assert_eq!(report.status, RunStatus::Aborted);
    assert!(report.final_response.contains("connection refused"));
}

#[tokio::test]
async fn test_missing_dataset_aborts_before_intent() {
    let orchestrator = keyword_orchestrator(WorkflowConfig::default());
    let report = orchestrator
        .run(RunRequest::new("Summarize the dataset", "/nonexistent/data.csv"))
        .await;

    assert_eq!(report.status, RunStatus::Aborted);
    assert!(report.intent.is_none(), "intent validation should not run");
    assert!(report.final_response.contains("not found"));
}

#[tokio::test]
async fn test_summarize_scenario_reports_missing_values() {
    let file = write_csv(&summary_dataset());
    let orchestrator = keyword_orchestrator(WorkflowConfig::default());

    let report = orchestrator
        .run(RunRequest::new("Summarize the dataset", file.path()))
        .await;

    assert_eq!(report.status, RunStatus::Success);

    let plan_names: Vec<StepName> = report
        .plan
        .as_ref()
        .expect("plan accepted")
        .iter()
        .map(|s| s.name)
        .collect();
    assert!(plan_names.contains(&StepName::SummaryStats));
    assert!(plan_names.contains(&StepName::MissingValues));

    let missing = report
        .analysis
        .get("missing_values")
        .and_then(StepOutcome::result)
        .expect("missing_values completed");
    assert_eq!(missing["columns"]["income"], 10);

    assert!(
        report.final_response.contains("10 missing"),
        "response should mention the missing count: {}",
        report.final_response
    );
}

#[tokio::test]
async fn test_analysis_keys_are_distinct() {
    let file = write_csv(&summary_dataset());
    let orchestrator = keyword_orchestrator(WorkflowConfig::default());

    let report = orchestrator
        .run(RunRequest::new("Summarize the dataset", file.path()))
        .await;

    // Every planned EDA step landed under its own key.
    let plan = report.plan.as_ref().unwrap();
    assert_eq!(report.analysis.len(), plan.len());
}

#[tokio::test]
async fn test_partial_failure_isolation() {
    let file = write_csv(&summary_dataset());
    let orchestrator = WorkflowOrchestrator::builder()
        .intent_extractor(Arc::new(KeywordIntentExtractor::new()))
        .compute(Arc::new(
            ScriptedCompute::new().failing(StepName::SummaryStats),
        ))
        .build()
        .unwrap();

    let report = orchestrator
        .run(RunRequest::new("Summarize the dataset", file.path()))
        .await;

    assert_eq!(report.status, RunStatus::Partial);
    assert!(matches!(
        report.analysis.get("summary_stats"),
        Some(StepOutcome::Failed { .. })
    ));
    // The independent sibling still completed.
    let missing = report
        .analysis
        .get("missing_values")
        .and_then(StepOutcome::result)
        .expect("missing_values still completed");
    assert_eq!(missing["columns"]["income"], 10);
    assert!(report.final_response.contains("'summary_stats' failed"));
}

#[tokio::test]
async fn test_dependency_skip_on_failed_inspection() {
    let file = write_csv(&separable_dataset());
    let orchestrator = WorkflowOrchestrator::builder()
        .intent_extractor(Arc::new(KeywordIntentExtractor::new()))
        .compute(Arc::new(
            ScriptedCompute::new().failing(StepName::InspectColumns),
        ))
        .build()
        .unwrap();

    let report = orchestrator
        .run(RunRequest::new(
            "Train a classifier predicting label",
            file.path(),
        ))
        .await;

    match report.analysis.get("feature_engineering") {
        Some(StepOutcome::SkippedDependency { dependency }) => {
            assert_eq!(dependency, "inspect_columns");
        }
        other => panic!("expected dependency skip, got {other:?}"),
    }
    assert!(report
        .final_response
        .contains("skipped because 'inspect_columns'"));
}

#[tokio::test]
async fn test_training_success_without_retry() {
    let file = write_csv(&separable_dataset());
    let orchestrator = keyword_orchestrator(WorkflowConfig::default());

    let report = orchestrator
        .run(RunRequest::new(
            "Train a classifier predicting label maximizing f1",
            file.path(),
        ))
        .await;

    assert_eq!(report.status, RunStatus::Success);
    let model = report.model_result.expect("model trained");
    assert_eq!(model.metric, MetricKind::F1);
    assert!(model.metric_value > 0.7, "metric: {}", model.metric_value);
    assert_eq!(report.iteration_count, 0, "no retry needed");
    assert_eq!(report.metric_history.len(), 1);
}

#[tokio::test]
async fn test_training_error_is_terminal_no_retry() {
    let file = write_csv(&separable_dataset());
    let orchestrator = keyword_orchestrator(WorkflowConfig::default());

    let report = orchestrator
        .run(RunRequest::new(
            "Train a classifier predicting churn maximizing f1",
            file.path(),
        ))
        .await;

    // `churn` does not exist: training fails, the loop ends, the run is
    // partial but still answered.
    assert_eq!(report.status, RunStatus::Partial);
    assert_eq!(report.iteration_count, 0);
    assert!(report.metric_history.is_empty());
    assert!(report.model_result.is_none());
    assert!(
        report.final_response.contains("churn"),
        "response should explain the failure: {}",
        report.final_response
    );
}

#[tokio::test]
async fn test_retry_loop_bounded_at_max_iterations() {
    let file = write_csv(&separable_dataset());
    let orchestrator = WorkflowOrchestrator::builder()
        .config(WorkflowConfig::default().with_max_iterations(2))
        .intent_extractor(Arc::new(KeywordIntentExtractor::new()))
        .compute(Arc::new(
            // Below threshold and non-degrading: retry until the bound.
            ScriptedCompute::new().with_metrics(&[0.4, 0.5, 0.6]),
        ))
        .build()
        .unwrap();

    let report = orchestrator
        .run(RunRequest::new(
            "Train a classifier predicting label",
            file.path(),
        ))
        .await;

    assert_eq!(report.iteration_count, 2, "forced proceed at the bound");
    assert_eq!(report.metric_history, vec![0.4, 0.5, 0.6]);
    // Only the latest attempt is retained.
    let model = report.model_result.expect("latest attempt kept");
    assert!((model.metric_value - 0.6).abs() < 1e-12);
    assert_eq!(report.status, RunStatus::Success);
}

#[tokio::test]
async fn test_degrading_trend_stops_retrying() {
    let file = write_csv(&separable_dataset());
    let orchestrator = WorkflowOrchestrator::builder()
        .config(WorkflowConfig::default().with_max_iterations(5))
        .intent_extractor(Arc::new(KeywordIntentExtractor::new()))
        .compute(Arc::new(ScriptedCompute::new().with_metrics(&[0.5, 0.3, 0.9])))
        .build()
        .unwrap();

    let report = orchestrator
        .run(RunRequest::new(
            "Train a classifier predicting label",
            file.path(),
        ))
        .await;

    // First retry happens (0.5 below threshold); the second attempt is
    // worse, so reflection proceeds instead of thrashing.
    assert_eq!(report.iteration_count, 1);
    assert_eq!(report.metric_history, vec![0.5, 0.3]);
}

#[tokio::test]
async fn test_retry_applies_hyperparameter_adjustment() {
    let file = write_csv(&separable_dataset());
    let orchestrator = WorkflowOrchestrator::builder()
        .config(WorkflowConfig::default().with_max_iterations(1))
        .intent_extractor(Arc::new(KeywordIntentExtractor::new()))
        .compute(Arc::new(ScriptedCompute::new().with_metrics(&[0.4, 0.5])))
        .build()
        .unwrap();

    let report = orchestrator
        .run(RunRequest::new(
            "Train a classifier predicting label",
            file.path(),
        ))
        .await;

    let model = report.model_result.expect("model trained");
    // The retry ran with the decayed learning rate and extended epochs.
    assert!((model.learning_rate - 0.05).abs() < 1e-12);
    assert_eq!(model.epochs, 300);
}

#[tokio::test]
async fn test_cancelled_run_still_responds() {
    let file = write_csv(&summary_dataset());
    let orchestrator = keyword_orchestrator(WorkflowConfig::default());

    let cancel = CancelToken::new();
    cancel.cancel();

    let report = orchestrator
        .run(RunRequest::new("Summarize the dataset", file.path()).with_cancel(cancel))
        .await;

    assert_eq!(report.status, RunStatus::Aborted);
    assert!(!report.final_response.is_empty());
    assert!(report.analysis.is_empty(), "no stage ran after cancellation");
}

#[tokio::test]
async fn test_synthesizer_fallback_on_failure() {
    let file = write_csv(&summary_dataset());
    let orchestrator = WorkflowOrchestrator::builder()
        .intent_extractor(Arc::new(KeywordIntentExtractor::new()))
        .synthesizer(Arc::new(UnavailableSynthesizer))
        .build()
        .unwrap();

    let report = orchestrator
        .run(RunRequest::new("Summarize the dataset", file.path()))
        .await;

    // The run still succeeds and the templated rendering carries the facts.
    assert_eq!(report.status, RunStatus::Success);
    assert!(report.final_response.contains("10 missing"));
}

#[tokio::test]
async fn test_synthesizer_text_used_when_available() {
    let file = write_csv(&summary_dataset());
    let orchestrator = WorkflowOrchestrator::builder()
        .intent_extractor(Arc::new(KeywordIntentExtractor::new()))
        .synthesizer(Arc::new(FixedSynthesizer("A crisp human summary.")))
        .build()
        .unwrap();

    let report = orchestrator
        .run(RunRequest::new("Summarize the dataset", file.path()))
        .await;

    assert_eq!(report.final_response, "A crisp human summary.");
}

#[tokio::test]
async fn test_event_stream_shape() {
    let file = write_csv(&separable_dataset());
    let orchestrator = WorkflowOrchestrator::builder()
        .config(WorkflowConfig::default().with_max_iterations(2))
        .intent_extractor(Arc::new(KeywordIntentExtractor::new()))
        .compute(Arc::new(ScriptedCompute::new().with_metrics(&[0.4, 0.5, 0.6])))
        .build()
        .unwrap();

    let (tx, mut rx) = tokio::sync::mpsc::channel(256);
    let report = orchestrator
        .run_with_events(
            RunRequest::new("Train a classifier predicting label", file.path()),
            tx,
        )
        .await;
    assert_eq!(report.status, RunStatus::Success);

    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }

    assert!(matches!(events.first(), Some(WorkflowEvent::RunStarted { .. })));
    assert!(matches!(events.last(), Some(WorkflowEvent::RunCompleted { .. })));

    let retries = events
        .iter()
        .filter(|e| matches!(e, WorkflowEvent::RetryScheduled { .. }))
        .count();
    assert_eq!(retries, 2);

    // The response stage completes exactly once.
    let response_completions = events
        .iter()
        .filter(|e| {
            matches!(
                e,
                WorkflowEvent::StageCompleted {
                    stage: WorkflowStage::Response,
                    ..
                }
            )
        })
        .count();
    assert_eq!(response_completions, 1);
}

#[tokio::test]
async fn test_orchestrator_is_reusable_across_runs() {
    let file = write_csv(&summary_dataset());
    let orchestrator = keyword_orchestrator(WorkflowConfig::default());

    let first = orchestrator
        .run(RunRequest::new("Summarize the dataset", file.path()))
        .await;
    let second = orchestrator
        .run(RunRequest::new("Which columns have missing values?", file.path()))
        .await;

    assert_eq!(first.status, RunStatus::Success);
    assert_eq!(second.status, RunStatus::Success);
    assert_ne!(first.run_id, second.run_id);
}
