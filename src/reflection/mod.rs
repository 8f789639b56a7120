//! Reflection: decide whether to retry model training or proceed.
//!
//! Pure functions of the metric history and the iteration bookkeeping. The
//! executor re-checks the iteration bound at the conditional edge, so the
//! bound is enforced in one place even if a caller misuses this module.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::compute::ModelResult;

/// Decision emitted by the reflection stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReflectionDecision {
    /// Continue to the response stage.
    Proceed,
    /// Loop back to model training.
    Retry,
}

impl fmt::Display for ReflectionDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReflectionDecision::Proceed => write!(f, "proceed"),
            ReflectionDecision::Retry => write!(f, "retry"),
        }
    }
}

/// Hyperparameter adjustment for the next training attempt.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrainingAdjustment {
    /// Learning rate for the next attempt.
    pub learning_rate: f64,
    /// Epochs for the next attempt.
    pub epochs: u32,
}

/// Decides whether to retry training.
///
/// `Retry` requires all of:
/// - `iteration_count < max_iterations` (the bound),
/// - the latest primary metric is below `threshold`,
/// - the metric trend is non-degrading (a worsening metric means more
///   attempts of the same shape are thrashing, not converging).
///
/// Everything else, including an empty history, is `Proceed`.
pub fn reflect(
    metric_history: &[f64],
    iteration_count: u32,
    max_iterations: u32,
    threshold: f64,
) -> ReflectionDecision {
    let Some(&latest) = metric_history.last() else {
        return ReflectionDecision::Proceed;
    };

    if iteration_count >= max_iterations {
        return ReflectionDecision::Proceed;
    }

    if latest >= threshold {
        return ReflectionDecision::Proceed;
    }

    if metric_history.len() >= 2 {
        let previous = metric_history[metric_history.len() - 2];
        if latest < previous {
            return ReflectionDecision::Proceed;
        }
    }

    ReflectionDecision::Retry
}

/// Deterministic adjustment for the next attempt: decay the learning rate
/// the last attempt used and extend its epoch budget.
pub fn next_adjustment(last: &ModelResult) -> TrainingAdjustment {
    TrainingAdjustment {
        learning_rate: last.learning_rate * 0.5,
        epochs: last.epochs.saturating_add(last.epochs / 2),
    }
}
