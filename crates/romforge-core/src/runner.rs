//! The seam between the queue worker and the per-job pipeline.

use async_trait::async_trait;
use serde::Serialize;
use std::fmt;

use crate::Job;
use crate::artifact::Artifact;

/// Pipeline stages that can abort a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Fetch,
    Build,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Fetch => "fetch",
            Stage::Build => "build",
        };
        f.write_str(name)
    }
}

/// Final result of running one job.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum JobOutcome {
    Succeeded {
        /// Artifacts that were found and handed to the notifier.
        artifacts: Vec<Artifact>,
    },
    Failed {
        stage: Stage,
        message: String,
    },
}

impl JobOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, JobOutcome::Succeeded { .. })
    }
}

/// Runs one job to completion.
///
/// Failures are reported through the returned outcome, never by panicking or
/// returning early, so the caller can always move on to the next job.
#[async_trait]
pub trait JobRunner: Send + Sync {
    async fn run(&self, job: Job) -> JobOutcome;
}
