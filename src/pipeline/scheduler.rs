//! Runs many versions through the pipeline with bounded concurrency.

use futures::future::join_all;
use tokio::sync::Semaphore;

use crate::error::PipelineError;

use super::orchestrator::VersionPipeline;
use super::request::{VersionRunRequest, VersionRunResult};

/// Settled result of one version: a verdict, or the stage that broke.
pub type VersionOutcome = Result<VersionRunResult, PipelineError>;

/// Runs every request, at most `concurrency` at a time.
///
/// A version is admitted as soon as a slot frees up. One version failing
/// never cancels or delays the others; the returned outcomes are in request
/// order and there is exactly one per request.
pub async fn run_all(
    pipeline: &VersionPipeline,
    requests: &[VersionRunRequest],
    concurrency: usize,
) -> Vec<VersionOutcome> {
    let limit = concurrency.max(1);
    let semaphore = Semaphore::new(limit);
    tracing::info!(versions = requests.len(), concurrency = limit, "Starting version runs");

    let runs = requests.iter().map(|request| {
        let semaphore = &semaphore;
        async move {
            // The semaphore is never closed, so acquiring always yields a permit.
            let _permit = semaphore.acquire().await;
            pipeline.run(request).await
        }
    });

    join_all(runs).await
}
