//! The structured result a run always returns.
//!
//! `run()` is a total function: whatever happened, the caller receives a
//! [`RunReport`], never a bare error. The report is the persisted/returned
//! shape for front-ends and audit.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::compute::ModelResult;
use crate::intent::AnalysisIntent;
use crate::planner::AnalysisStep;

use super::state::{RunFailure, RunStatus, StepOutcome, WorkflowState};

/// The serializable result of one workflow run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    /// Run identifier.
    pub run_id: Uuid,
    /// Original query text.
    pub query: String,
    /// Final run status.
    pub status: RunStatus,
    /// Validated intent, if the run got that far.
    pub intent: Option<AnalysisIntent>,
    /// Accepted plan, if the run got that far.
    pub plan: Option<Vec<AnalysisStep>>,
    /// Outcome of every executed step, by step name.
    pub analysis: BTreeMap<String, StepOutcome>,
    /// Latest model result, if training ran.
    pub model_result: Option<ModelResult>,
    /// Primary metric of every training attempt, in order.
    pub metric_history: Vec<f64>,
    /// Retry cycles taken.
    pub iteration_count: u32,
    /// The failure that ended or degraded the run, if any.
    pub failure: Option<RunFailure>,
    /// The final natural-language response.
    pub final_response: String,
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// Wall-clock duration in milliseconds.
    pub duration_ms: u64,
}

impl RunReport {
    /// Builds the report from a finished run's state.
    pub fn from_state(state: &WorkflowState, duration_ms: u64) -> Self {
        Self {
            run_id: state.run_id(),
            query: state.query().to_string(),
            status: state.status(),
            intent: state.intent().cloned(),
            plan: state.plan().map(<[AnalysisStep]>::to_vec),
            analysis: state.analysis().clone(),
            model_result: state.model_result().cloned(),
            metric_history: state.metric_history().to_vec(),
            iteration_count: state.iteration_count(),
            failure: state.failure().cloned(),
            final_response: state
                .final_response()
                .unwrap_or("No response was produced.")
                .to_string(),
            started_at: state.created_at(),
            duration_ms,
        }
    }

    /// Serializes the report as pretty-printed JSON.
    pub fn to_json_pretty(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_from_minimal_state() {
        let mut state = WorkflowState::new("Summarize the dataset");
        state.set_final_response("All done.").unwrap();

        let report = RunReport::from_state(&state, 120);
        assert_eq!(report.query, "Summarize the dataset");
        assert_eq!(report.status, RunStatus::Success);
        assert_eq!(report.final_response, "All done.");
        assert_eq!(report.duration_ms, 120);
        assert!(report.intent.is_none());
        assert!(report.analysis.is_empty());
    }

    #[test]
    fn test_report_serializes() {
        let mut state = WorkflowState::new("q");
        state.record_failure(RunFailure::Intent("unsupported".to_string()));
        state.set_final_response("failed").unwrap();

        let report = RunReport::from_state(&state, 5);
        let json = report.to_json_pretty().unwrap();
        assert!(json.contains("\"status\": \"aborted\""));
        assert!(json.contains("\"kind\": \"intent\""));
    }
}
