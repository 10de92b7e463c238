use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use pi_agent_core::{
    Agent, AgentConfig, AgentSession, AgentSessionConfig, AgentTool, CooperativeCancellationToken,
    ExtensionApi, ExtensionSource,
};
use pi_ai::DisabledClient;
use tempfile::TempDir;

use crate::{
    collector::EventCollector,
    diagnostics::format_not_consumed,
    error::HarnessError,
    exec_mocks::ScriptedCommandRunner,
    generator::PlaybookClient,
    interceptor::{wrap_tools, Interception, MockHandler},
    lock_or_recover,
    mock_ui::{MockUi, MockUiConfig},
    playbook::{PlaybookState, SharedPlaybook, Turn},
};

pub const DEFAULT_MODEL: &str = "playbook/scripted";
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a scripted test agent.";

/// Session setup.
///
/// # Examples
///
/// ```
/// use pi_test_harness::{HarnessOptions, MockHandler};
///
/// let options = HarnessOptions::default().mock_tool("echo", MockHandler::from("hi"));
///
/// assert!(options.propagate_errors);
/// assert_eq!(options.max_turns, 64);
/// assert!(options.mock_tools.contains_key("echo"));
/// ```
#[derive(Clone)]
pub struct HarnessOptions {
    pub extensions: Vec<ExtensionSource>,
    /// Unnamed inline factories, loaded after `extensions` as `inline-1`, `inline-2`, ...
    pub factories: Vec<pi_agent_core::ExtensionFactory>,
    /// Working directory. A temporary directory is created when unset.
    pub cwd: Option<PathBuf>,
    pub system_prompt: String,
    pub mock_tools: HashMap<String, MockHandler>,
    pub mock_ui: MockUiConfig,
    /// Abort the run when a real tool fails. When off, the failure becomes an error result.
    pub propagate_errors: bool,
    pub model: String,
    pub max_turns: usize,
}

impl Default for HarnessOptions {
    fn default() -> Self {
        Self {
            extensions: Vec::new(),
            factories: Vec::new(),
            cwd: None,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            mock_tools: HashMap::new(),
            mock_ui: MockUiConfig::default(),
            propagate_errors: true,
            model: DEFAULT_MODEL.to_string(),
            max_turns: 64,
        }
    }
}

impl HarnessOptions {
    pub fn extension(mut self, source: impl Into<ExtensionSource>) -> Self {
        self.extensions.push(source.into());
        self
    }

    pub fn factory<F>(mut self, factory: F) -> Self
    where
        F: Fn(&mut ExtensionApi<'_>) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.factories.push(Arc::new(factory));
        self
    }

    pub fn mock_tool(mut self, tool_name: impl Into<String>, handler: impl Into<MockHandler>) -> Self {
        self.mock_tools.insert(tool_name.into(), handler.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PlaybookSnapshot {
    pub consumed: usize,
    pub remaining: usize,
}

/// A real agent session driven by scripted playbooks.
pub struct HarnessSession {
    session: AgentSession,
    tempdir: Option<TempDir>,
    collector: EventCollector,
    commands: ScriptedCommandRunner,
    original_tools: Vec<Arc<dyn AgentTool>>,
    mock_tools: HashMap<String, MockHandler>,
    propagate_errors: bool,
    playbook: Option<SharedPlaybook>,
}

impl HarnessSession {
    pub fn create(options: HarnessOptions) -> Result<Self, HarnessError> {
        let (cwd, tempdir) = match options.cwd {
            Some(cwd) => (cwd, None),
            None => {
                let dir = TempDir::new().map_err(HarnessError::TempDir)?;
                (dir.path().to_path_buf(), Some(dir))
            }
        };

        let mut extensions = options.extensions;
        extensions.extend(options.factories.into_iter().enumerate().map(|(index, factory)| {
            ExtensionSource::Inline {
                name: format!("inline-{}", index + 1),
                factory,
            }
        }));

        let config = AgentSessionConfig {
            cwd: cwd.clone(),
            agent: AgentConfig {
                model: options.model,
                system_prompt: options.system_prompt,
                max_turns: options.max_turns,
                temperature: None,
                max_tokens: None,
                api_key: None,
                bypass_credential_check: true,
            },
            extensions,
        };
        let client = Arc::new(DisabledClient::new("no playbook is running"));
        let mut session = match AgentSession::new(client, config) {
            Ok(session) => session,
            Err(error) => {
                release_tempdir(tempdir);
                return Err(error.into());
            }
        };

        let collector = EventCollector::new();
        let observer = collector.clone();
        session.subscribe(move |event| observer.observe(event));

        let commands = ScriptedCommandRunner::new();
        session.set_ui(Arc::new(MockUi::new(options.mock_ui, collector.clone())));
        session.set_command_runner(Arc::new(commands.clone()));

        let original_tools = session.tools();
        for name in options.mock_tools.keys() {
            if !original_tools
                .iter()
                .any(|tool| &tool.definition().name == name)
            {
                tracing::warn!(tool = name.as_str(), "mock configured for unknown tool; ignoring");
            }
        }
        tracing::debug!(
            cwd = %cwd.display(),
            tools = original_tools.len(),
            mocks = options.mock_tools.len(),
            "harness session created"
        );

        Ok(Self {
            session,
            tempdir,
            collector,
            commands,
            original_tools,
            mock_tools: options.mock_tools,
            propagate_errors: options.propagate_errors,
            playbook: None,
        })
    }

    /// Replays `turns` against the agent, one prompt per turn.
    ///
    /// Fails when a real tool failed with `propagate_errors` on, when the agent loop errors,
    /// or when scripted actions are left over once every prompt has gone idle.
    pub async fn run(&mut self, turns: Vec<Turn>) -> Result<(), HarnessError> {
        let (prompts, state) = PlaybookState::from_turns(turns);
        let state = state.shared();
        self.playbook = Some(state.clone());
        self.session
            .set_client(Arc::new(PlaybookClient::new(state.clone())));

        let cancellation = CooperativeCancellationToken::new();
        let failure = Arc::new(Mutex::new(None));
        let interception = Interception {
            playbook: state.clone(),
            collector: self.collector.clone(),
            hooks: self.session.hooks(),
            propagate_errors: self.propagate_errors,
            failure: failure.clone(),
            cancellation: cancellation.clone(),
        };
        // Always derived from the tools captured at creation, never from a previous run.
        self.session.set_tools(wrap_tools(
            &self.original_tools,
            &self.mock_tools,
            &interception,
        ));
        self.session.set_cancellation_token(Some(cancellation));

        for prompt in prompts {
            let step = lock_or_recover(&state).consumed();
            self.collector.set_step(step);
            let outcome = self.session.prompt(prompt).await;
            if let Some(diagnostic) = lock_or_recover(&failure).take() {
                return Err(HarnessError::ToolExecution { diagnostic });
            }
            outcome?;
        }

        let state = lock_or_recover(&state);
        if state.remaining() > 0 {
            return Err(HarnessError::PlaybookNotConsumed {
                consumed: state.consumed(),
                remaining: state.remaining(),
                diagnostic: format_not_consumed(&state),
            });
        }
        Ok(())
    }

    pub fn events(&self) -> &EventCollector {
        &self.collector
    }

    /// Counters of the most recent run; zero before the first run.
    pub fn playbook(&self) -> PlaybookSnapshot {
        self.playbook
            .as_ref()
            .map(|state| {
                let state = lock_or_recover(state);
                PlaybookSnapshot {
                    consumed: state.consumed(),
                    remaining: state.remaining(),
                }
            })
            .unwrap_or_default()
    }

    pub fn cwd(&self) -> &Path {
        self.session.cwd()
    }

    pub fn agent(&self) -> &Agent {
        self.session.agent()
    }

    pub fn exec(&self) -> &ScriptedCommandRunner {
        &self.commands
    }

    pub fn dispose(self) {
        self.session.dispose();
        release_tempdir(self.tempdir);
    }
}

fn release_tempdir(tempdir: Option<TempDir>) {
    let Some(dir) = tempdir else {
        return;
    };
    let path = dir.path().to_path_buf();
    if let Err(error) = dir.close() {
        tracing::warn!(
            path = %path.display(),
            error = %error,
            "failed to remove temporary working directory"
        );
    }
}
