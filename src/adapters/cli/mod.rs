//! CLI Adapter
//!
//! Command-line interface for the scout.
//! Uses clap derive macros for argument parsing.

mod commands;

pub use commands::{CheckCmd, CliApp, Command, EstimateCmd, RunCmd, StatusCmd};
