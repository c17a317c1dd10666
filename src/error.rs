//! Error types for autochecker operations.
//!
//! Defines error types for each subsystem:
//! - Container engine calls (pull, build, run, remove)
//! - Individual pipeline stages
//! - Whole per-version pipeline runs, annotated with the failing stage
//! - Run configuration and project discovery

use std::path::PathBuf;

use thiserror::Error;

use crate::pipeline::Stage;

/// Errors reported by the container engine itself.
///
/// These are rejected calls or broken transports. Build failures that the
/// daemon reports *inside* an otherwise healthy event stream are
/// [`StageError::Build`] instead.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Docker daemon not available: {0}")]
    Unavailable(String),

    #[error("Invalid TLS configuration: {0}")]
    Tls(String),

    #[error("Failed to pull image '{image}': {message}")]
    Pull { image: String, message: String },

    #[error("Failed to build image '{tag}': {message}")]
    Build { tag: String, message: String },

    #[error("Failed to run container from '{image}': {message}")]
    Run { image: String, message: String },

    #[error("Failed to remove container '{id}': {message}")]
    Remove { id: String, message: String },

    #[error("Container '{id}' finished without reporting a status code")]
    MissingStatus { id: String },
}

/// Errors raised by a single pipeline stage.
#[derive(Debug, Error)]
pub enum StageError {
    /// A required input is missing or a template lacks the placeholder.
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("IO error at '{}': {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Directory did not exist: {}", .0.display())]
    NotFound(PathBuf),

    #[error(transparent)]
    Engine(#[from] EngineError),

    /// An error record embedded in a build stream that otherwise ended cleanly.
    #[error("Docker build failed: {0}")]
    Build(String),
}

impl StageError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Returns true for errors detected before any side effect happened.
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration(_))
    }
}

/// A failed per-version pipeline run.
#[derive(Debug, Error)]
#[error("version {version} failed while {stage}: {source}")]
pub struct PipelineError {
    pub version: String,
    pub stage: Stage,
    #[source]
    pub source: StageError,
}

/// Errors that can occur while assembling the run configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An environment variable has an invalid value.
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    /// Configuration validation failed.
    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),
}

/// Errors that can occur while inspecting the project under test.
#[derive(Debug, Error)]
pub enum ProjectError {
    #[error("Project directory '{}' does not exist", .0.display())]
    MissingDirectory(PathBuf),

    #[error("Failed to parse '{}': {message}", .path.display())]
    Manifest { path: PathBuf, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
