use std::path::Path;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

/// Runs external commands on behalf of extensions.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn exec(&self, command: &str, args: &[String], cwd: &Path) -> Result<ExecOutput>;
}

/// Spawns real processes.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessCommandRunner;

#[async_trait]
impl CommandRunner for ProcessCommandRunner {
    async fn exec(&self, command: &str, args: &[String], cwd: &Path) -> Result<ExecOutput> {
        let output = tokio::process::Command::new(command)
            .args(args)
            .current_dir(cwd)
            .output()
            .await
            .with_context(|| format!("failed to spawn '{command}'"))?;
        Ok(ExecOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            exit_code: output.status.code().unwrap_or(-1),
        })
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::{CommandRunner, ProcessCommandRunner};

    #[tokio::test]
    async fn integration_process_runner_captures_stdout_and_exit_code() {
        let temp = tempfile::tempdir().expect("tempdir");
        let output = ProcessCommandRunner
            .exec("sh", &["-c".to_string(), "echo ok; exit 3".to_string()], temp.path())
            .await
            .expect("sh should spawn");
        assert_eq!(output.stdout.trim(), "ok");
        assert_eq!(output.exit_code, 3);
    }

    #[tokio::test]
    async fn regression_process_runner_reports_missing_binary() {
        let temp = tempfile::tempdir().expect("tempdir");
        let error = ProcessCommandRunner
            .exec("definitely-not-a-real-binary-xyz", &[], temp.path())
            .await
            .expect_err("missing binary must fail");
        assert!(error.to_string().contains("failed to spawn"));
    }
}
