//! Command-line interface for autochecker.
//!
//! Runs a project's test suite against several base image versions and
//! lists the versions tested by default.

mod commands;

pub use commands::{parse_cli, run, run_with_cli, Cli, Commands, RunArgs};
