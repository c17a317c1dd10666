//! Container engine capability used by the test pipeline.
//!
//! The pipeline never talks to Docker directly. It goes through the
//! [`ContainerEngine`] trait, which exposes exactly the four primitives the
//! pipeline needs:
//!
//! ```text
//! pull(reference)          -> EventStream
//! build_image(ctx, tag)    -> EventStream
//! run(image, cmd, output)  -> ContainerExit
//! remove(container)
//! ```
//!
//! [`DockerEngine`] implements it on top of bollard; tests implement it with
//! a scripted mock.

pub mod connection;
pub mod docker_client;

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::error::EngineError;

pub use connection::DaemonSettings;
pub use docker_client::DockerEngine;

/// A single progress record from a pull or build.
///
/// Records may carry any combination of a status line, a build log line and
/// an error message, depending on which operation produced them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineEvent {
    /// Human readable phase, e.g. "Downloading" or "Pull complete".
    pub status: Option<String>,
    /// Layer or image id the status refers to.
    pub id: Option<String>,
    /// Raw build output line (the daemon's `stream` field).
    pub log_line: Option<String>,
    /// Error message embedded in the record.
    pub error: Option<String>,
}

impl EngineEvent {
    pub fn status(status: impl Into<String>) -> Self {
        Self {
            status: Some(status.into()),
            ..Default::default()
        }
    }

    pub fn log(line: impl Into<String>) -> Self {
        Self {
            log_line: Some(line.into()),
            ..Default::default()
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            ..Default::default()
        }
    }
}

/// Lazy, finite, non-restartable sequence of engine progress records.
pub type EventStream<'a> = BoxStream<'a, Result<EngineEvent, EngineError>>;

/// Receives combined stdout/stderr chunks from a running container, in order.
pub trait OutputSink: Send {
    fn write(&mut self, chunk: &str);
}

/// Opaque reference to a container created by [`ContainerEngine::run`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerHandle(pub String);

impl std::fmt::Display for ContainerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Outcome of a container that ran to completion.
#[derive(Debug, Clone)]
pub struct ContainerExit {
    pub exit_code: i64,
    pub container: ContainerHandle,
}

/// The container engine operations the pipeline depends on.
///
/// Implementations must be shareable between concurrently running pipelines;
/// every pipeline works on its own version-qualified image name, so no extra
/// coordination is expected.
#[async_trait]
pub trait ContainerEngine: Send + Sync {
    /// Starts pulling `reference` (`image:tag`).
    async fn pull<'a>(&'a self, reference: &str) -> Result<EventStream<'a>, EngineError>;

    /// Submits a tar build context and tags the result as `tag`.
    async fn build_image<'a>(
        &'a self,
        context: Vec<u8>,
        tag: &str,
    ) -> Result<EventStream<'a>, EngineError>;

    /// Runs `command` in a fresh container from `image`, forwarding every output
    /// chunk to `output`, and waits for it to exit.
    async fn run(
        &self,
        image: &str,
        command: &[String],
        output: &mut dyn OutputSink,
    ) -> Result<ContainerExit, EngineError>;

    /// Releases a container returned by [`ContainerEngine::run`].
    async fn remove(&self, container: &ContainerHandle) -> Result<(), EngineError>;
}
