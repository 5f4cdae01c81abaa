//! Source fetcher and toolchain traits.
//!
//! Both run external programs against the shared workspace. The toolchain
//! hands back its merged output as a line stream that can be consumed while
//! the process is still running.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::{Result, SourceRef};

/// Trait for checking out job sources.
#[async_trait]
pub trait SourceFetcher: Send + Sync {
    fn name(&self) -> &'static str;

    /// Check `source` out into `destination`.
    ///
    /// Fails with [`crate::Error::FetchFailed`] carrying a diagnostic excerpt,
    /// or [`crate::Error::Timeout`].
    async fn fetch(&self, source: &SourceRef, destination: &Path) -> Result<()>;
}

/// One toolchain invocation covering every goal of a job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildSpec {
    /// Directory the toolchain runs in (the workspace root).
    pub working_dir: PathBuf,
    /// Build-environment identifier selected before building.
    pub environment: String,
    /// Goals built in a single combined invocation.
    pub goals: Vec<String>,
}

/// A line of merged stdout/stderr output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogLine {
    pub timestamp: DateTime<Utc>,
    pub content: String,
}

impl LogLine {
    pub fn now(content: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            content: content.into(),
        }
    }
}

/// How the toolchain process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildExit {
    /// `None` when the process was killed by a signal.
    pub code: Option<i32>,
}

impl BuildExit {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// A toolchain process that has been started.
pub struct RunningBuild {
    /// Merged output, ending when the process closes its output.
    pub lines: BoxStream<'static, LogLine>,
    /// Resolves once the process has exited.
    pub exit: BoxFuture<'static, Result<BuildExit>>,
}

/// Trait for build toolchains.
#[async_trait]
pub trait Toolchain: Send + Sync {
    fn name(&self) -> &'static str;

    async fn spawn(&self, spec: BuildSpec) -> Result<RunningBuild>;
}
