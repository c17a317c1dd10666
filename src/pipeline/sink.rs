//! Progress reporting capability injected into the pipeline.

use super::PipelineState;

/// Receives per-version progress from running pipelines.
///
/// Called concurrently from every in-flight pipeline; implementations own
/// whatever state they need and serialize their own writes.
pub trait ProgressSink: Send + Sync {
    /// `version` moved to `state`.
    fn state(&self, version: &str, state: &PipelineState);

    /// A line of engine or container output, only sent for verbose requests.
    fn line(&self, version: &str, line: &str);
}

/// Sink that drops everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl ProgressSink for NullSink {
    fn state(&self, _version: &str, _state: &PipelineState) {}

    fn line(&self, _version: &str, _line: &str) {}
}
