//! Workflow configuration.
//!
//! Execution limits for the retry loop, collaborator timeouts, and training
//! defaults. Invalid configuration is rejected at orchestrator construction,
//! before any run starts.

use std::time::Duration;
use thiserror::Error;

/// Errors that can occur during configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An environment variable has an invalid value.
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    /// Configuration validation failed.
    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),
}

/// Configuration for the workflow orchestrator.
#[derive(Debug, Clone)]
pub struct WorkflowConfig {
    // Retry loop settings
    /// Maximum retry cycles of the training/reflection loop.
    pub max_iterations: u32,
    /// Primary-metric value at or above which reflection proceeds.
    pub metric_threshold: f64,

    // Collaborator settings
    /// Per-call timeout for collaborator invocations.
    pub collaborator_timeout: Duration,
    /// Backoff before the single timeout retry.
    pub retry_backoff: Duration,

    // Training defaults
    /// Train fraction of the shuffle split.
    pub split_ratio: f64,
    /// Seed for reproducible splits.
    pub seed: u64,
    /// Initial gradient-descent learning rate.
    pub learning_rate: f64,
    /// Initial gradient-descent epochs.
    pub epochs: u32,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            // Retry loop defaults
            max_iterations: 2,
            metric_threshold: 0.7,

            // Collaborator defaults
            collaborator_timeout: Duration::from_secs(60),
            retry_backoff: Duration::from_secs(2),

            // Training defaults
            split_ratio: 0.8,
            seed: 42,
            learning_rate: 0.1,
            epochs: 200,
        }
    }
}

impl WorkflowConfig {
    /// Creates a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `DATAPILOT_MAX_ITERATIONS`: retry-cycle bound (default: 2)
    /// - `DATAPILOT_METRIC_THRESHOLD`: acceptability threshold (default: 0.7)
    /// - `DATAPILOT_COLLABORATOR_TIMEOUT_SECS`: per-call timeout (default: 60)
    /// - `DATAPILOT_RETRY_BACKOFF_MS`: backoff before the retry (default: 2000)
    /// - `DATAPILOT_SPLIT_RATIO`: train fraction (default: 0.8)
    /// - `DATAPILOT_SEED`: split seed (default: 42)
    /// - `DATAPILOT_LEARNING_RATE`: initial learning rate (default: 0.1)
    /// - `DATAPILOT_EPOCHS`: initial epochs (default: 200)
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a variable has an invalid value or the
    /// resulting configuration fails validation.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("DATAPILOT_MAX_ITERATIONS") {
            config.max_iterations = parse_env_value(&val, "DATAPILOT_MAX_ITERATIONS")?;
        }

        if let Ok(val) = std::env::var("DATAPILOT_METRIC_THRESHOLD") {
            config.metric_threshold = parse_env_value(&val, "DATAPILOT_METRIC_THRESHOLD")?;
        }

        if let Ok(val) = std::env::var("DATAPILOT_COLLABORATOR_TIMEOUT_SECS") {
            let secs: u64 = parse_env_value(&val, "DATAPILOT_COLLABORATOR_TIMEOUT_SECS")?;
            config.collaborator_timeout = Duration::from_secs(secs);
        }

        if let Ok(val) = std::env::var("DATAPILOT_RETRY_BACKOFF_MS") {
            let millis: u64 = parse_env_value(&val, "DATAPILOT_RETRY_BACKOFF_MS")?;
            config.retry_backoff = Duration::from_millis(millis);
        }

        if let Ok(val) = std::env::var("DATAPILOT_SPLIT_RATIO") {
            config.split_ratio = parse_env_value(&val, "DATAPILOT_SPLIT_RATIO")?;
        }

        if let Ok(val) = std::env::var("DATAPILOT_SEED") {
            config.seed = parse_env_value(&val, "DATAPILOT_SEED")?;
        }

        if let Ok(val) = std::env::var("DATAPILOT_LEARNING_RATE") {
            config.learning_rate = parse_env_value(&val, "DATAPILOT_LEARNING_RATE")?;
        }

        if let Ok(val) = std::env::var("DATAPILOT_EPOCHS") {
            config.epochs = parse_env_value(&val, "DATAPILOT_EPOCHS")?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationFailed` if any values are invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_iterations > 10 {
            return Err(ConfigError::ValidationFailed(
                "max_iterations must be at most 10".to_string(),
            ));
        }

        if !(0.0..=1.0).contains(&self.metric_threshold) {
            return Err(ConfigError::ValidationFailed(
                "metric_threshold must be between 0.0 and 1.0".to_string(),
            ));
        }

        if self.collaborator_timeout.is_zero() {
            return Err(ConfigError::ValidationFailed(
                "collaborator_timeout must be greater than 0".to_string(),
            ));
        }

        if !(self.split_ratio > 0.0 && self.split_ratio < 1.0) {
            return Err(ConfigError::ValidationFailed(
                "split_ratio must be within (0, 1)".to_string(),
            ));
        }

        if self.learning_rate <= 0.0 {
            return Err(ConfigError::ValidationFailed(
                "learning_rate must be greater than 0".to_string(),
            ));
        }

        if self.epochs == 0 {
            return Err(ConfigError::ValidationFailed(
                "epochs must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Builder method to set the iteration bound.
    pub fn with_max_iterations(mut self, max: u32) -> Self {
        self.max_iterations = max;
        self
    }

    /// Builder method to set the metric threshold.
    pub fn with_metric_threshold(mut self, threshold: f64) -> Self {
        self.metric_threshold = threshold;
        self
    }

    /// Builder method to set the collaborator timeout.
    pub fn with_collaborator_timeout(mut self, timeout: Duration) -> Self {
        self.collaborator_timeout = timeout;
        self
    }

    /// Builder method to set the retry backoff.
    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    /// Builder method to set the split ratio.
    pub fn with_split_ratio(mut self, ratio: f64) -> Self {
        self.split_ratio = ratio;
        self
    }

    /// Builder method to set the seed.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Builder method to set the learning rate.
    pub fn with_learning_rate(mut self, learning_rate: f64) -> Self {
        self.learning_rate = learning_rate;
        self
    }

    /// Builder method to set the epochs.
    pub fn with_epochs(mut self, epochs: u32) -> Self {
        self.epochs = epochs;
        self
    }
}

/// Parse an environment variable value into a type.
fn parse_env_value<T: std::str::FromStr>(value: &str, key: &str) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("could not parse '{}'", value),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = WorkflowConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.max_iterations, 2);
        assert!((config.metric_threshold - 0.7).abs() < f64::EPSILON);
        assert_eq!(config.collaborator_timeout, Duration::from_secs(60));
    }

    #[test]
    fn test_builder() {
        let config = WorkflowConfig::new()
            .with_max_iterations(3)
            .with_metric_threshold(0.9)
            .with_collaborator_timeout(Duration::from_secs(5))
            .with_split_ratio(0.7)
            .with_seed(7)
            .with_learning_rate(0.01)
            .with_epochs(50);

        assert_eq!(config.max_iterations, 3);
        assert!((config.metric_threshold - 0.9).abs() < f64::EPSILON);
        assert_eq!(config.seed, 7);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_iteration_bound() {
        let config = WorkflowConfig::default().with_max_iterations(11);
        let result = config.validate();
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("max_iterations"));
    }

    #[test]
    fn test_validation_threshold_range() {
        let config = WorkflowConfig::default().with_metric_threshold(1.5);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_zero_timeout() {
        let config = WorkflowConfig::default().with_collaborator_timeout(Duration::ZERO);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_split_ratio() {
        assert!(WorkflowConfig::default()
            .with_split_ratio(0.0)
            .validate()
            .is_err());
        assert!(WorkflowConfig::default()
            .with_split_ratio(1.0)
            .validate()
            .is_err());
    }

    #[test]
    fn test_validation_training_defaults() {
        assert!(WorkflowConfig::default()
            .with_learning_rate(0.0)
            .validate()
            .is_err());
        assert!(WorkflowConfig::default().with_epochs(0).validate().is_err());
    }

    #[test]
    fn test_zero_max_iterations_is_valid() {
        // Zero means a single attempt with no retries.
        assert!(WorkflowConfig::default()
            .with_max_iterations(0)
            .validate()
            .is_ok());
    }
}
