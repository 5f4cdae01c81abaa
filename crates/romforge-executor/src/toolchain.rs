//! Shell-driven build toolchain.

use async_trait::async_trait;
use futures::{FutureExt, StreamExt};
use romforge_config::ToolchainSettings;
use romforge_core::toolchain::{BuildExit, BuildSpec, LogLine, RunningBuild, Toolchain};
use romforge_core::{Error, Result};
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{info, warn};

/// Runs `. <setup> && <select> <env> && <build> <goals...>` in one shell.
///
/// The environment identifier and goals are passed as positional parameters,
/// never spliced into the script text. Stderr is folded into stdout by the
/// script itself so the two arrive interleaved in one stream.
pub struct ShellToolchain {
    settings: ToolchainSettings,
}

impl ShellToolchain {
    pub fn new(settings: ToolchainSettings) -> Self {
        Self { settings }
    }

    fn script(&self) -> String {
        format!(
            "exec 2>&1; . {} && {} \"$1\" && shift && {} \"$@\"",
            self.settings.setup_script, self.settings.select_command, self.settings.build_command
        )
    }
}

#[async_trait]
impl Toolchain for ShellToolchain {
    fn name(&self) -> &'static str {
        "shell"
    }

    async fn spawn(&self, spec: BuildSpec) -> Result<RunningBuild> {
        info!(
            environment = %spec.environment,
            goals = ?spec.goals,
            working_dir = %spec.working_dir.display(),
            "Starting toolchain"
        );

        let mut child = Command::new(&self.settings.shell)
            .arg("-c")
            .arg(self.script())
            .arg("romforge-build")
            .arg(&spec.environment)
            .args(&spec.goals)
            .current_dir(&spec.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Internal("toolchain stdout was not captured".to_string()))?;

        let lines = futures::stream::unfold(BufReader::new(stdout), |mut reader| async move {
            let mut buf = Vec::new();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) => None,
                Ok(_) => {
                    let content = String::from_utf8_lossy(&buf).trim_end().to_string();
                    Some((LogLine::now(content), reader))
                }
                Err(e) => {
                    warn!(error = %e, "Toolchain output read failed");
                    None
                }
            }
        })
        .boxed();

        let exit = async move {
            let status = child.wait().await?;
            Ok(BuildExit {
                code: status.code(),
            })
        }
        .boxed();

        Ok(RunningBuild { lines, exit })
    }
}
