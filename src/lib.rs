//! datapilot: natural-language data analysis over tabular datasets.
//!
//! This library turns a plain-language request into a validated analytical
//! intent, plans a sequence of analysis steps, executes them (with an
//! optional bounded train/reflect retry loop), and produces a
//! natural-language answer.

// Core modules
pub mod cli;
pub mod compute;
pub mod dataset;
pub mod error;
pub mod intent;
pub mod llm;
pub mod planner;
pub mod reflection;
pub mod response;
pub mod utils;
pub mod workflow;

// Re-export commonly used error types
pub use error::{DatasetError, LlmError};
