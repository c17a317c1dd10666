//! autochecker: run a project's test suite against many base image versions.
//!
//! For every requested version the project is copied to a staging
//! directory, a Dockerfile is rendered from a template, the base image is
//! pulled, a test image is built and the test command is run in a fresh
//! container. Versions run concurrently up to a configurable limit.

// Core modules
pub mod cli;
pub mod config;
pub mod display;
pub mod engine;
pub mod error;
pub mod pipeline;
pub mod project;
pub mod staging;

// Re-export commonly used error types
pub use error::{ConfigError, EngineError, PipelineError, ProjectError, StageError};
