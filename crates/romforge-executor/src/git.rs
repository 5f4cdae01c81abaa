//! Shallow git checkout of job sources.

use async_trait::async_trait;
use romforge_config::FetchSettings;
use romforge_core::toolchain::SourceFetcher;
use romforge_core::{Error, Result, SourceRef};
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;
use tracing::{info, warn};

/// Fetches sources with `git clone --depth <n>`.
pub struct GitFetcher {
    settings: FetchSettings,
}

impl GitFetcher {
    pub fn new(settings: FetchSettings) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl SourceFetcher for GitFetcher {
    fn name(&self) -> &'static str {
        "git"
    }

    async fn fetch(&self, source: &SourceRef, destination: &Path) -> Result<()> {
        if let Some(parent) = destination.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        info!(source = %source, path = %destination.display(), "Cloning repository");

        let mut command = Command::new(&self.settings.program);
        command
            .arg("clone")
            .arg(format!("--depth={}", self.settings.depth))
            .arg(source.as_str())
            .arg(destination)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = match tokio::time::timeout(self.settings.timeout, command.output()).await {
            Ok(output) => output?,
            Err(_) => {
                warn!(source = %source, timeout_secs = self.settings.timeout.as_secs(), "Clone timed out");
                return Err(Error::Timeout(format!(
                    "clone did not finish within {}s",
                    self.settings.timeout.as_secs()
                )));
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).to_string();
            warn!(source = %source, exit_code = ?output.status.code(), "Clone failed");
            return Err(Error::FetchFailed(stderr));
        }

        info!(path = %destination.display(), "Repository cloned");
        Ok(())
    }
}
