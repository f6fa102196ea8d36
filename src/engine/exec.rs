use std::process::Stdio;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// Captured result of one subprocess run.
#[derive(Debug, Clone)]
pub struct ExecOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Injected subprocess boundary. The task runner only ever talks to this
/// trait, so tests can script an engine without spawning anything.
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    async fn execute(&self, command: &str, args: &[String], stdin: &str) -> Result<ExecOutput>;
}

/// Real executor: spawns the command, writes the prompt to stdin, waits for
/// exit under a deadline. A hung engine fails its stage instead of blocking
/// the pipeline forever.
pub struct ProcessExecutor {
    timeout: Duration,
}

impl ProcessExecutor {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl CommandExecutor for ProcessExecutor {
    async fn execute(&self, command: &str, args: &[String], stdin: &str) -> Result<ExecOutput> {
        let mut child = Command::new(command)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("failed to spawn `{command}`"))?;

        if let Some(mut handle) = child.stdin.take() {
            handle
                .write_all(stdin.as_bytes())
                .await
                .context("failed to write prompt to engine stdin")?;
            // Close stdin so the child sees EOF.
            drop(handle);
        }

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .with_context(|| {
                format!(
                    "`{command}` did not exit within {}s",
                    self.timeout.as_secs()
                )
            })?
            .with_context(|| format!("failed to wait for `{command}`"))?;

        Ok(ExecOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }
}
