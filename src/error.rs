//! Shared error types for datapilot subsystems.
//!
//! Stage-specific error enums (`IntentError`, `PlanningError`,
//! `ComputationError`, `TrainingError`) live next to the stages that raise
//! them; this module holds the leaf errors shared across the crate:
//! - LLM API interactions
//! - Dataset loading and parsing

use thiserror::Error;

/// Errors that can occur during LLM operations.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("Missing API base URL: DATAPILOT_LLM_API_BASE environment variable not set")]
    MissingApiBase,

    #[error("HTTP request failed: {0}")]
    RequestFailed(String),

    #[error("Failed to parse LLM response: {0}")]
    ParseError(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("API error ({code}): {message}")]
    ApiError { code: u16, message: String },

    #[error("Empty completion: the model returned no choices")]
    EmptyCompletion,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors that can occur while loading or describing a dataset.
#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("Dataset file not found: {0}")]
    NotFound(String),

    #[error("Dataset is empty: {0}")]
    Empty(String),

    #[error("Dataset has a header but no data rows: {0}")]
    NoRows(String),

    #[error("Malformed CSV at line {line}: expected {expected} fields, found {found}")]
    RaggedRow {
        line: usize,
        expected: usize,
        found: usize,
    },

    #[error("Unterminated quoted field starting at line {line}")]
    UnterminatedQuote { line: usize },

    #[error("Duplicate column name '{0}' in header")]
    DuplicateColumn(String),

    #[error("Unknown column '{0}'")]
    UnknownColumn(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
