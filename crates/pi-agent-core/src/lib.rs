//! Minimal extensible agent runtime: turn loop, tools, extension hooks, and sessions.
mod exec;
mod extensions;
mod hooks;
mod session;
mod tool;
mod ui;

use std::sync::{Arc, Mutex};

use jsonschema::validator_for;
use pi_ai::{
    ChatRequest, LlmClient, Message, PiAiError, StopReason, StreamDeltaHandler, ToolCall,
    ToolDefinition,
};
use serde_json::Value;
use thiserror::Error;

pub use exec::{CommandRunner, ExecOutput, ProcessCommandRunner};
pub use extensions::{
    load_extensions, Extension, ExtensionApi, ExtensionFactory, ExtensionLoadError,
    ExtensionSource,
};
pub use hooks::{
    HookBus, HookContext, HookKind, HookedTool, ToolCallDecision, ToolCallEvent, ToolCallHook,
    ToolResultEvent, ToolResultHook, ToolResultOverride, DEFAULT_BLOCK_REASON,
};
pub use session::{AgentSession, AgentSessionConfig, AgentSessionError};
pub use tool::{
    AgentTool, CooperativeCancellationToken, ToolContent, ToolExecutionResult, ToolInvocation,
    ToolUpdateHandler,
};
pub use ui::{HeadlessUi, NotifyLevel, UiContext};

/// Agent loop settings.
///
/// # Examples
///
/// ```
/// use pi_agent_core::AgentConfig;
///
/// let config = AgentConfig {
///     max_turns: 12,
///     ..AgentConfig::default()
/// };
///
/// assert_eq!(config.max_turns, 12);
/// ```
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub model: String,
    pub system_prompt: String,
    pub max_turns: usize,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub api_key: Option<String>,
    pub bypass_credential_check: bool,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            model: "gpt-4o-mini".to_string(),
            system_prompt: "You are a helpful coding assistant.".to_string(),
            max_turns: 8,
            temperature: Some(0.0),
            max_tokens: None,
            api_key: None,
            bypass_credential_check: false,
        }
    }
}

#[derive(Debug, Clone)]
pub enum AgentEvent {
    AgentStart,
    AgentEnd {
        new_messages: usize,
    },
    TurnStart {
        turn: usize,
    },
    TurnEnd {
        turn: usize,
        tool_results: usize,
        stop_reason: StopReason,
    },
    MessageAdded {
        message: Message,
    },
    ToolExecutionStart {
        tool_call_id: String,
        tool_name: String,
        arguments: Value,
    },
    ToolExecutionUpdate {
        tool_call_id: String,
        tool_name: String,
        partial: ToolExecutionResult,
    },
    ToolExecutionEnd {
        tool_call_id: String,
        tool_name: String,
        result: ToolExecutionResult,
    },
}

#[derive(Debug, Error)]
pub enum AgentError {
    #[error(transparent)]
    Ai(#[from] PiAiError),
    #[error("agent execution cancelled")]
    Cancelled,
    #[error("agent exceeded max turns ({0})")]
    MaxTurnsExceeded(usize),
}

type EventHandler = Arc<dyn Fn(&AgentEvent) + Send + Sync>;

#[derive(Clone)]
struct RegisteredTool {
    definition: ToolDefinition,
    tool: Arc<dyn AgentTool>,
}

pub struct Agent {
    client: Arc<dyn LlmClient>,
    config: AgentConfig,
    messages: Vec<Message>,
    tools: Vec<RegisteredTool>,
    handlers: Vec<EventHandler>,
    cancellation_token: Option<CooperativeCancellationToken>,
}

impl Agent {
    /// Creates a new [`Agent`] with an initial system message when configured.
    pub fn new(client: Arc<dyn LlmClient>, config: AgentConfig) -> Self {
        let mut messages = Vec::new();
        if !config.system_prompt.trim().is_empty() {
            messages.push(Message::system(config.system_prompt.clone()));
        }

        Self {
            client,
            config,
            messages,
            tools: Vec::new(),
            handlers: Vec::new(),
            cancellation_token: None,
        }
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// Swaps the response generator used for every following request.
    pub fn set_client(&mut self, client: Arc<dyn LlmClient>) {
        self.client = client;
    }

    pub fn subscribe<F>(&mut self, handler: F)
    where
        F: Fn(&AgentEvent) + Send + Sync + 'static,
    {
        self.handlers.push(Arc::new(handler));
    }

    /// Registers a tool, replacing any tool with the same name in place.
    pub fn register_tool<T>(&mut self, tool: T)
    where
        T: AgentTool + 'static,
    {
        self.register_tool_arc(Arc::new(tool));
    }

    pub fn register_tool_arc(&mut self, tool: Arc<dyn AgentTool>) {
        let definition = tool.definition();
        let registered = RegisteredTool { definition, tool };
        match self
            .tools
            .iter_mut()
            .find(|existing| existing.definition.name == registered.definition.name)
        {
            Some(existing) => *existing = registered,
            None => self.tools.push(registered),
        }
    }

    /// Returns the active tool list in registration order.
    pub fn tools(&self) -> Vec<Arc<dyn AgentTool>> {
        self.tools
            .iter()
            .map(|registered| Arc::clone(&registered.tool))
            .collect()
    }

    /// Replaces the whole tool list.
    pub fn replace_tools(&mut self, tools: Vec<Arc<dyn AgentTool>>) {
        self.tools.clear();
        for tool in tools {
            self.register_tool_arc(tool);
        }
    }

    pub fn has_tool(&self, tool_name: &str) -> bool {
        self.find_tool(tool_name).is_some()
    }

    pub fn registered_tool_names(&self) -> Vec<String> {
        let mut names = self
            .tools
            .iter()
            .map(|registered| registered.definition.name.clone())
            .collect::<Vec<_>>();
        names.sort();
        names
    }

    pub fn set_cancellation_token(&mut self, token: Option<CooperativeCancellationToken>) {
        self.cancellation_token = token;
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub async fn prompt(&mut self, text: impl Into<String>) -> Result<Vec<Message>, AgentError> {
        self.prompt_with_stream(text, None).await
    }

    pub async fn prompt_with_stream(
        &mut self,
        text: impl Into<String>,
        on_delta: Option<StreamDeltaHandler>,
    ) -> Result<Vec<Message>, AgentError> {
        let start_index = self.messages.len();
        let user_message = Message::user(text.into());
        self.messages.push(user_message.clone());
        self.emit(AgentEvent::MessageAdded {
            message: user_message,
        });

        self.run_loop(start_index, on_delta).await
    }

    pub async fn continue_turn(&mut self) -> Result<Vec<Message>, AgentError> {
        let start_index = self.messages.len();
        self.run_loop(start_index, None).await
    }

    fn emit(&self, event: AgentEvent) {
        emit_to(&self.handlers, &event);
    }

    fn is_cancelled(&self) -> bool {
        self.cancellation_token
            .as_ref()
            .map(CooperativeCancellationToken::is_cancelled)
            .unwrap_or(false)
    }

    fn find_tool(&self, tool_name: &str) -> Option<&RegisteredTool> {
        self.tools
            .iter()
            .find(|registered| registered.definition.name == tool_name)
    }

    fn tool_definitions(&self) -> Vec<ToolDefinition> {
        self.tools
            .iter()
            .map(|registered| registered.definition.clone())
            .collect()
    }

    fn check_credentials(&self) -> Result<(), AgentError> {
        if self.config.bypass_credential_check {
            return Ok(());
        }
        match self.config.api_key.as_deref() {
            Some(key) if !key.trim().is_empty() => Ok(()),
            _ => Err(AgentError::Ai(PiAiError::MissingApiKey)),
        }
    }

    async fn run_loop(
        &mut self,
        start_index: usize,
        on_delta: Option<StreamDeltaHandler>,
    ) -> Result<Vec<Message>, AgentError> {
        if self.is_cancelled() {
            return Err(AgentError::Cancelled);
        }
        self.check_credentials()?;
        self.emit(AgentEvent::AgentStart);

        for turn in 1..=self.config.max_turns {
            if self.is_cancelled() {
                return Err(AgentError::Cancelled);
            }
            self.emit(AgentEvent::TurnStart { turn });

            let request = ChatRequest {
                model: self.config.model.clone(),
                messages: self.messages.clone(),
                tools: self.tool_definitions(),
                max_tokens: self.config.max_tokens,
                temperature: self.config.temperature,
            };

            let response = self
                .client
                .complete_with_stream(request, on_delta.clone())
                .await?;
            let stop_reason = response.stop_reason;
            let assistant = response.message;
            self.messages.push(assistant.clone());
            self.emit(AgentEvent::MessageAdded {
                message: assistant.clone(),
            });

            let tool_calls = assistant.tool_calls();
            if stop_reason != StopReason::ToolUse || tool_calls.is_empty() {
                self.emit(AgentEvent::TurnEnd {
                    turn,
                    tool_results: 0,
                    stop_reason,
                });
                let new_messages = self.messages[start_index..].to_vec();
                self.emit(AgentEvent::AgentEnd {
                    new_messages: new_messages.len(),
                });
                return Ok(new_messages);
            }

            let tool_results = tool_calls.len();
            for call in tool_calls {
                self.execute_tool_call(call).await;
                if self.is_cancelled() {
                    return Err(AgentError::Cancelled);
                }
            }

            self.emit(AgentEvent::TurnEnd {
                turn,
                tool_results,
                stop_reason,
            });
        }

        Err(AgentError::MaxTurnsExceeded(self.config.max_turns))
    }

    async fn execute_tool_call(&mut self, call: ToolCall) {
        self.emit(AgentEvent::ToolExecutionStart {
            tool_call_id: call.id.clone(),
            tool_name: call.name.clone(),
            arguments: call.arguments.clone(),
        });

        let result = match self.find_tool(&call.name).cloned() {
            Some(registered) => {
                match validate_tool_arguments(&registered.definition, &call.arguments) {
                    Err(error) => ToolExecutionResult::error_text(error),
                    Ok(()) => {
                        let invocation = ToolInvocation {
                            call_id: call.id.clone(),
                            arguments: call.arguments.clone(),
                            cancellation: self.cancellation_token.clone(),
                            on_update: Some(self.update_handler(&call)),
                        };
                        match registered.tool.execute(invocation).await {
                            Ok(result) => result,
                            Err(error) => ToolExecutionResult::error_text(format!("{error:#}")),
                        }
                    }
                }
            }
            None => ToolExecutionResult::error_text(format!(
                "Tool '{}' is not registered",
                call.name
            )),
        };

        self.emit(AgentEvent::ToolExecutionEnd {
            tool_call_id: call.id.clone(),
            tool_name: call.name.clone(),
            result: result.clone(),
        });

        let tool_message =
            Message::tool_result(call.id, call.name, result.as_text(), result.is_error);
        self.messages.push(tool_message.clone());
        self.emit(AgentEvent::MessageAdded {
            message: tool_message,
        });
    }

    fn update_handler(&self, call: &ToolCall) -> ToolUpdateHandler {
        let handlers = self.handlers.clone();
        let tool_call_id = call.id.clone();
        let tool_name = call.name.clone();
        Arc::new(move |partial| {
            emit_to(
                &handlers,
                &AgentEvent::ToolExecutionUpdate {
                    tool_call_id: tool_call_id.clone(),
                    tool_name: tool_name.clone(),
                    partial,
                },
            );
        })
    }
}

fn emit_to(handlers: &[EventHandler], event: &AgentEvent) {
    for handler in handlers {
        let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| handler(event)));
    }
}

fn validate_tool_arguments(definition: &ToolDefinition, arguments: &Value) -> Result<(), String> {
    let validator = validator_for(&definition.parameters)
        .map_err(|error| format!("invalid JSON schema for '{}': {error}", definition.name))?;

    let mut errors = validator.iter_errors(arguments);
    if let Some(first) = errors.next() {
        return Err(format!(
            "invalid arguments for '{}': {}",
            definition.name, first
        ));
    }

    Ok(())
}

pub(crate) fn lock_or_recover<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
