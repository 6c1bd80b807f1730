use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
    process::{ExitStatus, Stdio},
    time::{Duration, Instant},
};

use async_trait::async_trait;
use metrics::counter;
use tokio::{io::AsyncReadExt, process::Command};
use tracing::{info, warn};

use crate::infra::error::InfraError;

use super::ScreenshotCapturer;

pub(crate) const DEFAULT_SCREENSHOT_CLI: &str = "shot-scraper";

#[derive(Debug, Clone)]
pub struct ScreenshotConfig {
    pub cli_path: PathBuf,
    pub width: u32,
    pub height: u32,
    pub quality: u8,
    pub wait: Duration,
    pub timeout: Duration,
}

impl Default for ScreenshotConfig {
    fn default() -> Self {
        Self {
            cli_path: PathBuf::from(DEFAULT_SCREENSHOT_CLI),
            width: 1280,
            height: 800,
            quality: 80,
            wait: Duration::from_millis(1000),
            timeout: Duration::from_secs(30),
        }
    }
}

/// Drives a headless browser through an external screenshot CLI.
///
/// The CLI runs in its own process group. Unless it exits successfully the
/// whole group is killed, so browsers it launched die with it, and the CLI
/// itself is reaped. Dropping the capture future has the same effect.
#[derive(Debug, Clone)]
pub struct CliScreenshotCapturer {
    config: ScreenshotConfig,
}

impl CliScreenshotCapturer {
    pub fn new(config: ScreenshotConfig) -> Self {
        Self { config }
    }

    fn command(&self, url: &str, output: &Path) -> Command {
        let config = &self.config;
        let mut command = Command::new(&config.cli_path);
        command
            .arg("shot")
            .arg(url)
            .arg("--output")
            .arg(output)
            .arg("--width")
            .arg(config.width.to_string())
            .arg("--height")
            .arg(config.height.to_string())
            .arg("--quality")
            .arg(config.quality.to_string())
            .arg("--wait")
            .arg(config.wait.as_millis().to_string())
            .arg("--timeout")
            .arg(config.timeout.as_millis().to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        command.process_group(0);
        command
    }

    async fn run(&self, url: &str, output: &Path) -> Result<(), InfraError> {
        if let Some(parent) = output.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut child = self.command(url, output).spawn().map_err(|err| {
            if err.kind() == ErrorKind::NotFound {
                InfraError::screenshot(format!(
                    "screenshot CLI `{}` not found",
                    self.config.cli_path.display()
                ))
            } else {
                InfraError::Io(err)
            }
        })?;

        let mut group = ProcessGroup::of(child.id());
        let mut stderr_pipe = child.stderr.take();
        let waited = tokio::time::timeout(self.config.timeout, async {
            let mut stderr = String::new();
            if let Some(pipe) = stderr_pipe.as_mut() {
                // A failed read only loses diagnostics.
                let _ = pipe.read_to_string(&mut stderr).await;
            }
            let status = child.wait().await?;
            Ok::<(ExitStatus, String), std::io::Error>((status, stderr))
        })
        .await;

        match waited {
            Ok(Ok((status, _))) if status.success() => {
                group.release();
                Ok(())
            }
            Ok(Ok((status, stderr))) => {
                group.kill();
                Err(InfraError::screenshot(format!(
                    "exit {:?}: {}",
                    status.code(),
                    stderr.trim()
                )))
            }
            Ok(Err(err)) => {
                group.kill();
                let _ = child.kill().await;
                Err(InfraError::Io(err))
            }
            Err(_) => {
                // The group goes first: the CLI is still unreaped, so its id
                // cannot have been reused.
                group.kill();
                let _ = child.kill().await;
                Err(InfraError::screenshot(format!(
                    "timed out after {:?}",
                    self.config.timeout
                )))
            }
        }
    }
}

/// Process group led by a spawned CLI, killed on drop unless released.
struct ProcessGroup {
    leader: Option<u32>,
}

impl ProcessGroup {
    fn of(leader: Option<u32>) -> Self {
        Self { leader }
    }

    fn release(&mut self) {
        self.leader = None;
    }

    #[cfg(unix)]
    fn kill(&mut self) {
        use nix::{
            sys::signal::{Signal, killpg},
            unistd::Pid,
        };

        let Some(leader) = self.leader.take() else {
            return;
        };
        let Ok(pgid) = i32::try_from(leader) else {
            return;
        };
        if let Err(err) = killpg(Pid::from_raw(pgid), Signal::SIGKILL) {
            // ESRCH: every member already exited.
            if err != nix::errno::Errno::ESRCH {
                warn!(
                    target = "sitebake::screenshot",
                    op = "kill_group",
                    pgid,
                    error = %err,
                    "Failed to kill screenshot process group"
                );
            }
        }
    }

    #[cfg(not(unix))]
    fn kill(&mut self) {
        self.leader = None;
    }
}

impl Drop for ProcessGroup {
    fn drop(&mut self) {
        self.kill();
    }
}

#[async_trait]
impl ScreenshotCapturer for CliScreenshotCapturer {
    async fn capture(&self, url: &str, output: &Path) -> Result<(), InfraError> {
        let started_at = Instant::now();
        let result = self.run(url, output).await;
        match &result {
            Ok(()) => {
                counter!("sitebake_screenshot_total", "result" => "success").increment(1);
                info!(
                    target = "sitebake::screenshot",
                    op = "capture",
                    result = "success",
                    url,
                    output = %output.display(),
                    elapsed_ms = started_at.elapsed().as_millis() as u64,
                    "Captured screenshot"
                );
            }
            Err(err) => {
                counter!("sitebake_screenshot_total", "result" => "error").increment(1);
                warn!(
                    target = "sitebake::screenshot",
                    op = "capture",
                    result = "error",
                    url,
                    elapsed_ms = started_at.elapsed().as_millis() as u64,
                    error = %err,
                    "Screenshot capture failed"
                );
            }
        }
        result
    }
}
