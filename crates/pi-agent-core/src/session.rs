use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use pi_ai::{LlmClient, Message};
use thiserror::Error;

use crate::{
    exec::CommandRunner,
    extensions::{load_extensions, ExtensionLoadError, ExtensionSource},
    hooks::{HookBus, HookContext, HookedTool},
    tool::{AgentTool, CooperativeCancellationToken},
    ui::UiContext,
    Agent, AgentConfig, AgentError, AgentEvent,
};

#[derive(Clone)]
pub struct AgentSessionConfig {
    pub cwd: PathBuf,
    pub agent: AgentConfig,
    pub extensions: Vec<ExtensionSource>,
}

#[derive(Debug, Error)]
pub enum AgentSessionError {
    #[error("working directory '{0}' does not exist")]
    MissingCwd(PathBuf),
    #[error(transparent)]
    ExtensionLoad(#[from] ExtensionLoadError),
}

/// An agent bound to a working directory and a set of loaded extensions.
///
/// Every extension tool is wrapped in a [`HookedTool`] once, at construction.
pub struct AgentSession {
    agent: Agent,
    hooks: Arc<HookBus>,
    cwd: PathBuf,
    extension_names: Vec<String>,
}

impl AgentSession {
    pub fn new(
        client: Arc<dyn LlmClient>,
        config: AgentSessionConfig,
    ) -> Result<Self, AgentSessionError> {
        if !config.cwd.is_dir() {
            return Err(AgentSessionError::MissingCwd(config.cwd));
        }

        let mut hooks = HookBus::new(HookContext::new(config.cwd.clone()));
        let tools = load_extensions(&config.extensions, &mut hooks)?;
        let hooks = Arc::new(hooks);

        let mut agent = Agent::new(client, config.agent);
        for tool in tools {
            agent.register_tool_arc(Arc::new(HookedTool::new(tool, Arc::clone(&hooks))));
        }

        let extension_names = config
            .extensions
            .iter()
            .map(|source| source.name().to_string())
            .collect::<Vec<_>>();
        tracing::debug!(
            cwd = %config.cwd.display(),
            extensions = extension_names.len(),
            tools = agent.tools().len(),
            "agent session created"
        );

        Ok(Self {
            agent,
            hooks,
            cwd: config.cwd,
            extension_names,
        })
    }

    pub fn agent(&self) -> &Agent {
        &self.agent
    }

    pub fn cwd(&self) -> &Path {
        &self.cwd
    }

    pub fn extension_names(&self) -> &[String] {
        &self.extension_names
    }

    pub fn hooks(&self) -> Arc<HookBus> {
        Arc::clone(&self.hooks)
    }

    pub fn tools(&self) -> Vec<Arc<dyn AgentTool>> {
        self.agent.tools()
    }

    pub fn set_tools(&mut self, tools: Vec<Arc<dyn AgentTool>>) {
        self.agent.replace_tools(tools);
    }

    pub fn set_client(&mut self, client: Arc<dyn LlmClient>) {
        self.agent.set_client(client);
    }

    pub fn set_ui(&self, ui: Arc<dyn UiContext>) {
        self.hooks.set_ui(ui);
    }

    pub fn set_command_runner(&self, commands: Arc<dyn CommandRunner>) {
        self.hooks.set_command_runner(commands);
    }

    pub fn set_cancellation_token(&mut self, token: Option<CooperativeCancellationToken>) {
        self.agent.set_cancellation_token(token);
    }

    pub fn subscribe<F>(&mut self, handler: F)
    where
        F: Fn(&AgentEvent) + Send + Sync + 'static,
    {
        self.agent.subscribe(handler);
    }

    /// Submits a prompt and resolves once the agent loop is idle again.
    pub async fn prompt(&mut self, text: impl Into<String>) -> Result<Vec<Message>, AgentError> {
        self.agent.prompt(text).await
    }

    pub fn messages(&self) -> &[Message] {
        self.agent.messages()
    }

    pub fn dispose(self) {
        tracing::debug!(
            cwd = %self.cwd.display(),
            messages = self.agent.messages().len(),
            "agent session disposed"
        );
    }
}
