//! Per-version test pipeline.
//!
//! Every version under test runs through the same five stages, strictly in
//! order:
//!
//! ```text
//! PENDING → COPYING → TEMPLATING → PULLING → BUILDING → RUNNING → SUCCEEDED
//!                                                               ↘ FAILED(stage, cause)
//! ```
//!
//! The first failing stage ends the run; later stages never start and
//! earlier ones are not rolled back. [`scheduler::run_all`] fans the pipeline
//! out across versions with a concurrency ceiling and isolates failures per
//! version.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use autochecker::engine::DockerEngine;
//! use autochecker::pipeline::{run_all, NullSink, VersionPipeline, VersionRunRequest};
//!
//! let pipeline = VersionPipeline::new(Arc::new(DockerEngine::new()?), Arc::new(NullSink));
//! let request = VersionRunRequest::builder("5.10.1")
//!     .project_name("my-app")
//!     .source_path(".")
//!     .image_name_template("my-app_$VERSION:latest")
//!     .dockerfile_template("FROM mhart/alpine-node:$VERSION\nCOPY . .\n")
//!     .base_image("mhart/alpine-node")
//!     .test_command(["npm", "test"])
//!     .build()?;
//! let outcomes = run_all(&pipeline, &[request], 4).await;
//! ```

pub mod orchestrator;
pub mod report;
pub mod request;
pub mod scheduler;
pub mod sink;
pub mod stages;

use serde::{Deserialize, Serialize};

pub use orchestrator::{RetainPolicy, VersionPipeline};
pub use report::{AggregateRunReport, FailedVersion};
pub use request::{VersionRunRequest, VersionRunRequestBuilder, VersionRunResult};
pub use scheduler::{run_all, VersionOutcome};
pub use sink::{NullSink, ProgressSink};
pub use stages::{RunOutcome, StageContext};

/// A step of the per-version pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Checking the request before any side effect.
    Validating,
    /// Copying the project into its staging directory.
    Copying,
    /// Writing the version-specific Dockerfile.
    Templating,
    /// Pulling the versioned base image.
    Pulling,
    /// Building the test image.
    Building,
    /// Running the test command in a container.
    Running,
}

impl Stage {
    /// Status-line text shown while the stage is active.
    pub fn description(&self) -> &'static str {
        match self {
            Stage::Validating => "Validating configuration",
            Stage::Copying => "Copying project",
            Stage::Templating => "Writing Dockerfile",
            Stage::Pulling => "Pulling base image",
            Stage::Building => "Building testing image",
            Stage::Running => "Running application tests",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Stage::Validating => write!(f, "validating"),
            Stage::Copying => write!(f, "copying"),
            Stage::Templating => write!(f, "templating"),
            Stage::Pulling => write!(f, "pulling"),
            Stage::Building => write!(f, "building"),
            Stage::Running => write!(f, "running"),
        }
    }
}

/// Lifecycle of one pipeline invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineState {
    Pending,
    Active(Stage),
    /// All stages finished; `success` is the test command's verdict.
    Succeeded { success: bool },
    Failed { stage: Stage, message: String },
}

impl PipelineState {
    /// Returns true for `Succeeded` and `Failed`.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PipelineState::Succeeded { .. } | PipelineState::Failed { .. }
        )
    }
}

impl std::fmt::Display for PipelineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PipelineState::Pending => write!(f, "Waiting"),
            PipelineState::Active(stage) => write!(f, "{}", stage.description()),
            PipelineState::Succeeded { success: true } => write!(f, "Done running all the tests!"),
            PipelineState::Succeeded { success: false } => write!(f, "Tests failed"),
            PipelineState::Failed { stage, message } => {
                write!(f, "Something went wrong in {stage}: {message}")
            }
        }
    }
}
