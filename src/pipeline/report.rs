//! Aggregate pass/fail report over a set of version outcomes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::scheduler::VersionOutcome;
use super::Stage;

/// A version that did not pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedVersion {
    pub version: String,
    /// Captured test output, or the pipeline error text when no test ran.
    pub output: String,
    /// Stage that broke, when the pipeline itself failed.
    pub stage: Option<Stage>,
}

/// Partition of all requested versions into passed and failed.
///
/// Every version lands in exactly one of the two lists.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregateRunReport {
    pub total: usize,
    pub passed: Vec<String>,
    pub failed: Vec<FailedVersion>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl AggregateRunReport {
    /// Builds the report from scheduler outcomes.
    pub fn from_outcomes(outcomes: &[VersionOutcome], started_at: DateTime<Utc>) -> Self {
        let mut passed = Vec::new();
        let mut failed = Vec::new();

        for outcome in outcomes {
            match outcome {
                Ok(result) if result.success => passed.push(result.version.clone()),
                Ok(result) => failed.push(FailedVersion {
                    version: result.version.clone(),
                    output: result.output.clone(),
                    stage: None,
                }),
                Err(e) => failed.push(FailedVersion {
                    version: e.version.clone(),
                    output: e.source.to_string(),
                    stage: Some(e.stage),
                }),
            }
        }

        Self {
            total: outcomes.len(),
            passed,
            failed,
            started_at,
            finished_at: Utc::now(),
        }
    }

    pub fn successes(&self) -> usize {
        self.passed.len()
    }

    pub fn failures(&self) -> usize {
        self.failed.len()
    }

    /// True when every version passed.
    pub fn all_passed(&self) -> bool {
        self.failed.is_empty()
    }

    /// Wall-clock time from the first admission to the report.
    pub fn duration(&self) -> chrono::Duration {
        self.finished_at - self.started_at
    }
}
