use std::path::PathBuf;

use pi_agent_core::{AgentError, AgentSessionError, ExtensionLoadError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HarnessError {
    #[error(transparent)]
    ExtensionLoad(#[from] ExtensionLoadError),
    #[error("working directory '{0}' does not exist")]
    MissingCwd(PathBuf),
    #[error("failed to create temporary working directory: {0}")]
    TempDir(#[source] std::io::Error),
    /// A real tool failed while `propagate_errors` was on.
    #[error("{diagnostic}")]
    ToolExecution { diagnostic: String },
    #[error("{diagnostic}")]
    PlaybookNotConsumed {
        consumed: usize,
        remaining: usize,
        diagnostic: String,
    },
    #[error("unknown configuration key '{key}' in {context}")]
    UnknownConfigKey { context: String, key: String },
    #[error("invalid configuration for {context}: {source}")]
    InvalidConfig {
        context: String,
        #[source]
        source: serde_json::Error,
    },
    #[error(transparent)]
    Agent(#[from] AgentError),
}

impl From<AgentSessionError> for HarnessError {
    fn from(error: AgentSessionError) -> Self {
        match error {
            AgentSessionError::ExtensionLoad(error) => HarnessError::ExtensionLoad(error),
            AgentSessionError::MissingCwd(path) => HarnessError::MissingCwd(path),
        }
    }
}
