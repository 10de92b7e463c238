use std::{
    collections::{HashMap, VecDeque},
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
    time::Duration,
};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use pi_agent_core::{CommandRunner, ExecOutput};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{error::HarnessError, lock_or_recover};

const EXEC_RESPONSE_KEYS: [&str; 4] = ["stdout", "stderr", "exit_code", "delay_ms"];

/// One scripted command outcome.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExecResponse {
    #[serde(default)]
    pub stdout: String,
    #[serde(default)]
    pub stderr: String,
    #[serde(default)]
    pub exit_code: i32,
    #[serde(default)]
    pub delay_ms: u64,
}

impl ExecResponse {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            ..Self::default()
        }
    }

    pub fn failure(exit_code: i32, stderr: impl Into<String>) -> Self {
        Self {
            stderr: stderr.into(),
            exit_code,
            ..Self::default()
        }
    }

    pub fn with_delay(mut self, delay_ms: u64) -> Self {
        self.delay_ms = delay_ms;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecCall {
    pub command: String,
    pub args: Vec<String>,
    pub cwd: PathBuf,
}

#[derive(Default)]
struct ExecState {
    queues: HashMap<String, VecDeque<ExecResponse>>,
    calls: Vec<ExecCall>,
}

/// Command runner that serves queued responses per command name.
#[derive(Clone, Default)]
pub struct ScriptedCommandRunner {
    state: Arc<Mutex<ExecState>>,
}

impl ScriptedCommandRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, command: impl Into<String>, response: ExecResponse) {
        lock_or_recover(&self.state)
            .queues
            .entry(command.into())
            .or_default()
            .push_back(response);
    }

    /// Queues a response described as JSON. Keys outside the response shape are rejected.
    pub fn push_json(&self, command: impl Into<String>, raw: Value) -> Result<(), HarnessError> {
        let command = command.into();
        let context = format!("exec response for '{command}'");
        if let Value::Object(map) = &raw {
            if let Some(key) = map
                .keys()
                .find(|key| !EXEC_RESPONSE_KEYS.contains(&key.as_str()))
            {
                return Err(HarnessError::UnknownConfigKey {
                    context,
                    key: key.clone(),
                });
            }
        }
        let response = serde_json::from_value::<ExecResponse>(raw)
            .map_err(|source| HarnessError::InvalidConfig { context, source })?;
        self.push(command, response);
        Ok(())
    }

    pub fn pending(&self, command: &str) -> usize {
        lock_or_recover(&self.state)
            .queues
            .get(command)
            .map_or(0, VecDeque::len)
    }

    pub fn calls(&self) -> Vec<ExecCall> {
        lock_or_recover(&self.state).calls.clone()
    }
}

#[async_trait]
impl CommandRunner for ScriptedCommandRunner {
    async fn exec(&self, command: &str, args: &[String], cwd: &Path) -> Result<ExecOutput> {
        let response = {
            let mut state = lock_or_recover(&self.state);
            state.calls.push(ExecCall {
                command: command.to_string(),
                args: args.to_vec(),
                cwd: cwd.to_path_buf(),
            });
            state
                .queues
                .get_mut(command)
                .and_then(VecDeque::pop_front)
        };
        let response =
            response.ok_or_else(|| anyhow!("no scripted response queued for command '{command}'"))?;

        if response.delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(response.delay_ms)).await;
        }
        tracing::debug!(command, exit_code = response.exit_code, "scripted exec");
        Ok(ExecOutput {
            stdout: response.stdout,
            stderr: response.stderr,
            exit_code: response.exit_code,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use pi_agent_core::CommandRunner;
    use serde_json::json;

    use super::{ExecResponse, ScriptedCommandRunner};
    use crate::error::HarnessError;

    #[tokio::test]
    async fn functional_serves_queued_responses_in_order_per_command() {
        let runner = ScriptedCommandRunner::new();
        runner.push("git", ExecResponse::ok("main\n"));
        runner.push("git", ExecResponse::failure(128, "not a repo"));

        let first = runner
            .exec("git", &["branch".to_string()], Path::new("/work"))
            .await
            .expect("first response");
        assert_eq!(first.stdout, "main\n");
        let second = runner
            .exec("git", &[], Path::new("/work"))
            .await
            .expect("second response");
        assert_eq!(second.exit_code, 128);
        assert_eq!(second.stderr, "not a repo");

        let calls = runner.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].args, vec!["branch".to_string()]);
        assert_eq!(runner.pending("git"), 0);
    }

    #[tokio::test]
    async fn regression_empty_queue_error_names_the_command() {
        let runner = ScriptedCommandRunner::new();
        let error = runner
            .exec("npm", &[], Path::new("."))
            .await
            .expect_err("nothing queued");
        assert!(error.to_string().contains("'npm'"));
        assert_eq!(runner.calls().len(), 1);
    }

    #[test]
    fn unit_json_responses_reject_unknown_keys_at_registration() {
        let runner = ScriptedCommandRunner::new();
        runner
            .push_json("ls", json!({ "stdout": "a\nb", "exit_code": 0 }))
            .expect("known keys");
        assert_eq!(runner.pending("ls"), 1);

        let error = runner
            .push_json("ls", json!({ "stdout": "x", "exitCode": 1 }))
            .expect_err("unknown key");
        match error {
            HarnessError::UnknownConfigKey { key, context } => {
                assert_eq!(key, "exitCode");
                assert!(context.contains("'ls'"));
            }
            other => panic!("expected UnknownConfigKey, got {other:?}"),
        }
        assert_eq!(runner.pending("ls"), 1);

        let error = runner
            .push_json("ls", json!({ "exit_code": "zero" }))
            .expect_err("wrong type");
        assert!(matches!(error, HarnessError::InvalidConfig { .. }));
    }

    #[tokio::test]
    async fn unit_scripted_delay_is_honoured() {
        let runner = ScriptedCommandRunner::new();
        runner.push("sleep", ExecResponse::ok("").with_delay(30));
        let started = tokio::time::Instant::now();
        runner
            .exec("sleep", &[], Path::new("."))
            .await
            .expect("delayed response");
        assert!(started.elapsed() >= std::time::Duration::from_millis(30));
    }
}
