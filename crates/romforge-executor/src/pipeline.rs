//! The per-job build pipeline.
//!
//! Stages run in order: reset, fetch, build, collect, deliver. A failed
//! stage ends the job with a notice to the requester; it never escapes as an
//! error, so the worker can always move on to the next job.

use async_trait::async_trait;
use futures::StreamExt;
use romforge_core::artifact::{Artifact, CompressionPolicy};
use romforge_core::runner::{JobOutcome, JobRunner, Stage};
use romforge_core::toolchain::{BuildSpec, RunningBuild, SourceFetcher, Toolchain};
use romforge_core::transport::Attachment;
use romforge_core::{Error, Job, Target};
use romforge_notify::{LogAggregator, Notifier};
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::compress::gzip_keep_original;
use crate::workspace::Workspace;

/// Characters of fetch diagnostics forwarded to the requester.
const FETCH_EXCERPT_CHARS: usize = 200;

pub struct PipelineExecutor {
    workspace: Workspace,
    fetcher: Arc<dyn SourceFetcher>,
    toolchain: Arc<dyn Toolchain>,
    notifier: Notifier,
    logs: LogAggregator,
    compression: CompressionPolicy,
}

impl PipelineExecutor {
    pub fn new(
        workspace: Workspace,
        fetcher: Arc<dyn SourceFetcher>,
        toolchain: Arc<dyn Toolchain>,
        notifier: Notifier,
        logs: LogAggregator,
        compression: CompressionPolicy,
    ) -> Self {
        Self {
            workspace,
            fetcher,
            toolchain,
            notifier,
            logs,
            compression,
        }
    }

    async fn execute(&self, job: &Job) -> JobOutcome {
        let channel = job.reply_to;

        self.notifier
            .send_text(
                channel,
                format!("🧹 Cleaning for {}...", job.source.repository_name()),
            )
            .await;
        self.workspace.reset(&job.device_path).await;

        self.notifier
            .send_text(channel, format!("⚙️ Cloning {}...", job.source))
            .await;
        let checkout = self.workspace.device_dir(&job.device_path);
        if let Err(e) = self.fetcher.fetch(&job.source, &checkout).await {
            let diagnostic = match &e {
                Error::FetchFailed(stderr) => stderr.clone(),
                other => other.to_string(),
            };
            self.notifier
                .send_text(
                    channel,
                    format!("❌ Clone failed: {}", excerpt(&diagnostic, FETCH_EXCERPT_CHARS)),
                )
                .await;
            return failed(Stage::Fetch, e);
        }

        let names: Vec<&str> = job.targets.iter().map(Target::name).collect();
        self.notifier
            .send_text(channel, format!("🔨 Building targets: {}", names.join(", ")))
            .await;
        if let Err(e) = self.build(job).await {
            self.notifier
                .send_text(channel, "❌ Build failed. Check logs.")
                .await;
            return failed(Stage::Build, e);
        }

        let artifacts = self.collect(job).await;

        for artifact in &artifacts {
            let delivery = self
                .notifier
                .send_document(channel, Attachment::from_path(&artifact.path))
                .await;
            if !delivery.is_delivered() {
                warn!(job_id = %job.id, file = %artifact.file_name(), "Artifact was not delivered");
            }
        }

        self.notifier.send_text(channel, "✅ Build completed!").await;
        JobOutcome::Succeeded { artifacts }
    }

    /// Run the toolchain, feeding its output to the log aggregator while a
    /// flusher streams the tail to the requester.
    async fn build(&self, job: &Job) -> romforge_core::Result<()> {
        let spec = BuildSpec {
            working_dir: self.workspace.root().to_path_buf(),
            environment: job.device_path.codename().to_string(),
            goals: job.goals().into_iter().map(String::from).collect(),
        };
        let RunningBuild { mut lines, exit } = self.toolchain.spawn(spec).await?;

        let flusher = self.logs.stream_to(job.reply_to);
        while let Some(line) = lines.next().await {
            self.logs.append(line.content);
        }
        let exit = exit.await;
        flusher.stop().await;

        let exit = exit?;
        if exit.success() {
            Ok(())
        } else {
            Err(Error::BuildFailed {
                exit_code: exit.code,
            })
        }
    }

    /// Locate each target's image, compressing the oversized ones.
    ///
    /// Missing images are skipped. A compression failure skips only that
    /// artifact.
    async fn collect(&self, job: &Job) -> Vec<Artifact> {
        let codename = job.device_path.codename();
        let mut artifacts = Vec::with_capacity(job.targets.len());

        for &target in &job.targets {
            let image = self.workspace.image_path(codename, target);
            let size = match tokio::fs::metadata(&image).await {
                Ok(meta) if meta.is_file() => meta.len(),
                _ => {
                    info!(job_id = %job.id, target = %target, "No image produced; skipping");
                    continue;
                }
            };

            if !self.compression.should_compress(size) {
                artifacts.push(Artifact {
                    target,
                    path: image,
                    size,
                    compressed: false,
                });
                continue;
            }

            match gzip_keep_original(&image).await {
                Ok(path) => artifacts.push(Artifact {
                    target,
                    path,
                    size,
                    compressed: true,
                }),
                Err(e) => {
                    warn!(job_id = %job.id, target = %target, error = %e, "Compression failed; skipping artifact");
                    self.notifier
                        .send_text(
                            job.reply_to,
                            format!("⚠️ Could not compress {}; skipping it.", target.image_file_name()),
                        )
                        .await;
                }
            }
        }

        artifacts
    }
}

#[async_trait]
impl JobRunner for PipelineExecutor {
    async fn run(&self, job: Job) -> JobOutcome {
        info!(
            job_id = %job.id,
            requester = %job.requester,
            source = %job.source,
            device_path = %job.device_path,
            "Starting job"
        );

        let outcome = {
            let _scope = self.logs.job_scope();
            self.execute(&job).await
        };

        match &outcome {
            JobOutcome::Succeeded { artifacts } => {
                info!(job_id = %job.id, artifacts = artifacts.len(), "Job succeeded")
            }
            JobOutcome::Failed { stage, message } => {
                error!(job_id = %job.id, stage = %stage, error = %message, "Job failed")
            }
        }
        outcome
    }
}

fn failed(stage: Stage, error: Error) -> JobOutcome {
    JobOutcome::Failed {
        stage,
        message: error.to_string(),
    }
}

/// The first `max` characters of `text`.
fn excerpt(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((end, _)) => &text[..end],
        None => text,
    }
}
