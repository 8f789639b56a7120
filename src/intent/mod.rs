//! Analytical intent: the typed request every computation stage trusts.
//!
//! The NLU collaborator returns a loosely-structured payload
//! ([`RawIntentPayload`]). Nothing downstream sees it until
//! [`validate`] has converted it into an [`AnalysisIntent`] drawn
//! from a closed set of categories. This is the safety gate that keeps
//! ambiguous or unsupported requests from ever reaching a computation stage.

pub mod extractor;

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

pub use extractor::{IntentExtractor, KeywordIntentExtractor, LlmIntentExtractor};

/// Errors raised while validating a raw intent payload.
#[derive(Debug, Error)]
pub enum IntentError {
    /// Payload was not coercible to the intent schema.
    #[error("Unparseable intent payload: {0}")]
    Unparseable(String),

    /// Category outside the supported set.
    #[error("Unsupported analysis category '{0}'")]
    UnsupportedCategory(String),

    /// Category requires a target column that the payload did not provide.
    #[error("Analysis category '{0}' requires a target column")]
    MissingTarget(AnalysisCategory),

    /// Metric name outside the supported set.
    #[error("Unsupported metric '{0}'")]
    UnsupportedMetric(String),
}

/// The closed set of supported analysis categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisCategory {
    /// Dataset overview: shape, summary statistics, missing values.
    Summary,
    /// Pairwise correlation between numeric columns.
    Correlation,
    /// Value distribution of one or all columns.
    Distribution,
    /// Per-column missing value audit.
    MissingValueAudit,
    /// Supervised model training against a target column.
    ModelTraining,
}

impl AnalysisCategory {
    /// All supported categories.
    pub const ALL: [AnalysisCategory; 5] = [
        AnalysisCategory::Summary,
        AnalysisCategory::Correlation,
        AnalysisCategory::Distribution,
        AnalysisCategory::MissingValueAudit,
        AnalysisCategory::ModelTraining,
    ];

    /// Canonical snake_case name.
    pub fn as_str(&self) -> &'static str {
        match self {
            AnalysisCategory::Summary => "summary",
            AnalysisCategory::Correlation => "correlation",
            AnalysisCategory::Distribution => "distribution",
            AnalysisCategory::MissingValueAudit => "missing_value_audit",
            AnalysisCategory::ModelTraining => "model_training",
        }
    }

    /// Parses a category name, tolerating a few aliases the NLU collaborator
    /// is known to emit.
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().replace(['-', ' '], "_").as_str() {
            "summary" | "summarize" | "overview" => Some(AnalysisCategory::Summary),
            "correlation" | "correlations" => Some(AnalysisCategory::Correlation),
            "distribution" | "distributions" | "histogram" => Some(AnalysisCategory::Distribution),
            "missing_value_audit" | "missing_values" | "missing" => {
                Some(AnalysisCategory::MissingValueAudit)
            }
            "model_training" | "model_training_request" | "train_model" | "training" => {
                Some(AnalysisCategory::ModelTraining)
            }
            _ => None,
        }
    }

    /// Whether this category requires a target column.
    pub fn requires_target(&self) -> bool {
        matches!(self, AnalysisCategory::ModelTraining)
    }
}

impl fmt::Display for AnalysisCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Target metrics a model-training request can optimize for.
///
/// All metrics are oriented so that higher is better; regression quality is
/// tracked as r2 rather than an error magnitude so the reflection trend check
/// has a single direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    /// Classification accuracy.
    Accuracy,
    /// Macro-averaged F1.
    F1,
    /// Coefficient of determination for regression.
    R2,
}

impl MetricKind {
    /// Canonical snake_case name.
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Accuracy => "accuracy",
            MetricKind::F1 => "f1",
            MetricKind::R2 => "r2",
        }
    }

    /// Parses a metric name.
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "accuracy" | "acc" => Some(MetricKind::Accuracy),
            "f1" | "f1_score" | "macro_f1" => Some(MetricKind::F1),
            "r2" | "r_squared" => Some(MetricKind::R2),
            _ => None,
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Loosely-structured intent payload as returned by the NLU collaborator.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawIntentPayload {
    /// Analysis category name, if the collaborator produced one.
    #[serde(default)]
    pub category: Option<String>,
    /// Target column for model training.
    #[serde(default)]
    pub target: Option<String>,
    /// Columns the request singled out.
    #[serde(default)]
    pub columns: Option<Vec<String>>,
    /// Requested target metric.
    #[serde(default)]
    pub metric: Option<String>,
}

impl RawIntentPayload {
    /// Parses a payload from JSON text.
    pub fn from_json(text: &str) -> Result<Self, IntentError> {
        serde_json::from_str(text).map_err(|e| IntentError::Unparseable(e.to_string()))
    }
}

/// A validated, normalized analytical intent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisIntent {
    /// The analysis category.
    pub category: AnalysisCategory,
    /// Target column for model training.
    pub target: Option<String>,
    /// Columns the request singled out; empty means "all applicable".
    pub columns: Vec<String>,
    /// Requested metric; defaulted at training time from the target type.
    pub metric: Option<MetricKind>,
}

/// Validates and normalizes a raw intent payload.
///
/// Pure function; no defaulting happens against the dataset here. Column
/// existence is checked by the stages that consume the columns.
///
/// # Errors
///
/// - [`IntentError::Unparseable`] if no category is present,
/// - [`IntentError::UnsupportedCategory`] for a category outside the set,
/// - [`IntentError::MissingTarget`] when the category requires a target,
/// - [`IntentError::UnsupportedMetric`] for an unknown metric name.
pub fn validate(payload: &RawIntentPayload) -> Result<AnalysisIntent, IntentError> {
    let raw_category = payload
        .category
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| IntentError::Unparseable("payload has no category".to_string()))?;

    let category = AnalysisCategory::parse(raw_category)
        .ok_or_else(|| IntentError::UnsupportedCategory(raw_category.to_string()))?;

    let target = payload
        .target
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string);

    if category.requires_target() && target.is_none() {
        return Err(IntentError::MissingTarget(category));
    }

    let metric = match payload.metric.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        Some(name) => Some(
            MetricKind::parse(name).ok_or_else(|| IntentError::UnsupportedMetric(name.to_string()))?,
        ),
        None => None,
    };

    let columns = payload
        .columns
        .clone()
        .unwrap_or_default()
        .into_iter()
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty())
        .collect();

    Ok(AnalysisIntent {
        category,
        target,
        columns,
        metric,
    })
}
