//! Command-line interface for datapilot.
//!
//! Provides commands for running an analysis workflow and inspecting a
//! dataset.

mod commands;

pub use commands::{parse_cli, run_with_cli, Cli};
