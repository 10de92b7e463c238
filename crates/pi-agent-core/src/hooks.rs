//! Extension hook dispatch around tool execution.
//!
//! `tool_call` handlers run before a tool and may block it. `tool_result` handlers run after
//! a successful tool and may rewrite its content, details, or error flag. [`HookedTool`] is the
//! runtime's own wrapper that applies both to every registered tool.

use std::{
    future::Future,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use anyhow::{bail, Result};
use async_trait::async_trait;
use futures_util::future::BoxFuture;
use pi_ai::ToolDefinition;
use serde_json::Value;

use crate::{
    exec::{CommandRunner, ExecOutput, ProcessCommandRunner},
    lock_or_recover,
    tool::{AgentTool, ToolContent, ToolExecutionResult, ToolInvocation},
    ui::{HeadlessUi, UiContext},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookKind {
    ToolCall,
    ToolResult,
}

impl HookKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            HookKind::ToolCall => "tool_call",
            HookKind::ToolResult => "tool_result",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ToolCallEvent {
    pub tool_name: String,
    pub tool_call_id: String,
    pub input: Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ToolCallDecision {
    pub block: bool,
    pub reason: Option<String>,
}

impl ToolCallDecision {
    pub fn block(reason: impl Into<String>) -> Self {
        Self {
            block: true,
            reason: Some(reason.into()),
        }
    }

    pub fn allow() -> Self {
        Self::default()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ToolResultEvent {
    pub tool_name: String,
    pub tool_call_id: String,
    pub input: Value,
    pub content: Vec<ToolContent>,
    pub details: Option<Value>,
    pub is_error: bool,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ToolResultOverride {
    pub content: Option<Vec<ToolContent>>,
    pub details: Option<Value>,
    pub is_error: Option<bool>,
}

impl ToolResultOverride {
    pub fn is_empty(&self) -> bool {
        self.content.is_none() && self.details.is_none() && self.is_error.is_none()
    }

    pub fn apply(self, result: &mut ToolExecutionResult) {
        if let Some(content) = self.content {
            result.content = content;
        }
        if let Some(details) = self.details {
            result.details = Some(details);
        }
        if let Some(is_error) = self.is_error {
            result.is_error = is_error;
        }
    }
}

/// Ambient services handed to every hook invocation.
#[derive(Clone)]
pub struct HookContext {
    pub cwd: PathBuf,
    pub ui: Arc<dyn UiContext>,
    pub commands: Arc<dyn CommandRunner>,
}

impl HookContext {
    pub fn new(cwd: impl Into<PathBuf>) -> Self {
        Self {
            cwd: cwd.into(),
            ui: Arc::new(HeadlessUi),
            commands: Arc::new(ProcessCommandRunner),
        }
    }

    pub fn cwd(&self) -> &Path {
        &self.cwd
    }

    pub async fn exec(&self, command: &str, args: &[String]) -> Result<ExecOutput> {
        self.commands.exec(command, args, &self.cwd).await
    }
}

pub type ToolCallHook = Arc<
    dyn Fn(ToolCallEvent, HookContext) -> BoxFuture<'static, Result<Option<ToolCallDecision>>>
        + Send
        + Sync,
>;
pub type ToolResultHook = Arc<
    dyn Fn(ToolResultEvent, HookContext) -> BoxFuture<'static, Result<Option<ToolResultOverride>>>
        + Send
        + Sync,
>;

struct Registered<H> {
    extension: String,
    handler: H,
}

pub struct HookBus {
    tool_call: Vec<Registered<ToolCallHook>>,
    tool_result: Vec<Registered<ToolResultHook>>,
    context: Mutex<HookContext>,
}

impl HookBus {
    pub fn new(context: HookContext) -> Self {
        Self {
            tool_call: Vec::new(),
            tool_result: Vec::new(),
            context: Mutex::new(context),
        }
    }

    pub fn on_tool_call<F, Fut>(&mut self, extension: impl Into<String>, handler: F)
    where
        F: Fn(ToolCallEvent, HookContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Option<ToolCallDecision>>> + Send + 'static,
    {
        let handler: ToolCallHook = Arc::new(move |event, ctx| Box::pin(handler(event, ctx)));
        self.tool_call.push(Registered {
            extension: extension.into(),
            handler,
        });
    }

    pub fn on_tool_result<F, Fut>(&mut self, extension: impl Into<String>, handler: F)
    where
        F: Fn(ToolResultEvent, HookContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Option<ToolResultOverride>>> + Send + 'static,
    {
        let handler: ToolResultHook = Arc::new(move |event, ctx| Box::pin(handler(event, ctx)));
        self.tool_result.push(Registered {
            extension: extension.into(),
            handler,
        });
    }

    pub fn has_handlers(&self, kind: HookKind) -> bool {
        match kind {
            HookKind::ToolCall => !self.tool_call.is_empty(),
            HookKind::ToolResult => !self.tool_result.is_empty(),
        }
    }

    pub fn context(&self) -> HookContext {
        lock_or_recover(&self.context).clone()
    }

    pub fn set_ui(&self, ui: Arc<dyn UiContext>) {
        lock_or_recover(&self.context).ui = ui;
    }

    pub fn set_command_runner(&self, commands: Arc<dyn CommandRunner>) {
        lock_or_recover(&self.context).commands = commands;
    }

    /// Runs `tool_call` handlers in registration order and returns the first block decision.
    ///
    /// A handler that fails blocks the call; a tool must not run past a broken guard.
    pub async fn emit_tool_call(&self, event: ToolCallEvent) -> Option<ToolCallDecision> {
        for registered in &self.tool_call {
            let outcome = (registered.handler)(event.clone(), self.context()).await;
            match outcome {
                Ok(Some(decision)) if decision.block => {
                    tracing::debug!(
                        extension = registered.extension.as_str(),
                        tool = event.tool_name.as_str(),
                        reason = decision.reason.as_deref().unwrap_or(""),
                        "tool call blocked by hook"
                    );
                    return Some(decision);
                }
                Ok(_) => {}
                Err(error) => {
                    return Some(ToolCallDecision::block(format!(
                        "extension '{}' tool_call hook failed: {error:#}",
                        registered.extension
                    )));
                }
            }
        }
        None
    }

    /// Runs `tool_result` handlers in order; each sees the output as rewritten so far.
    pub async fn emit_tool_result(&self, mut event: ToolResultEvent) -> ToolResultOverride {
        let mut merged = ToolResultOverride::default();
        for registered in &self.tool_result {
            match (registered.handler)(event.clone(), self.context()).await {
                Ok(Some(update)) => {
                    if let Some(content) = &update.content {
                        event.content = content.clone();
                        merged.content = Some(content.clone());
                    }
                    if let Some(details) = &update.details {
                        event.details = Some(details.clone());
                        merged.details = Some(details.clone());
                    }
                    if let Some(is_error) = update.is_error {
                        event.is_error = is_error;
                        merged.is_error = Some(is_error);
                    }
                }
                Ok(None) => {}
                Err(error) => {
                    tracing::warn!(
                        extension = registered.extension.as_str(),
                        tool = event.tool_name.as_str(),
                        error = %format!("{error:#}"),
                        "tool_result hook failed; keeping previous output"
                    );
                }
            }
        }
        merged
    }
}

pub const DEFAULT_BLOCK_REASON: &str = "Blocked by extension";

/// The runtime's hook wrapper. A block surfaces as a plain error whose message names the
/// block; callers only see the text.
pub struct HookedTool {
    inner: Arc<dyn AgentTool>,
    hooks: Arc<HookBus>,
}

impl HookedTool {
    pub fn new(inner: Arc<dyn AgentTool>, hooks: Arc<HookBus>) -> Self {
        Self { inner, hooks }
    }
}

#[async_trait]
impl AgentTool for HookedTool {
    fn definition(&self) -> ToolDefinition {
        self.inner.definition()
    }

    async fn execute(&self, invocation: ToolInvocation) -> Result<ToolExecutionResult> {
        let tool_name = self.inner.definition().name;
        let call_id = invocation.call_id.clone();
        let input = invocation.arguments.clone();

        if self.hooks.has_handlers(HookKind::ToolCall) {
            let decision = self
                .hooks
                .emit_tool_call(ToolCallEvent {
                    tool_name: tool_name.clone(),
                    tool_call_id: call_id.clone(),
                    input: input.clone(),
                })
                .await;
            if let Some(decision) = decision.filter(|decision| decision.block) {
                bail!(
                    "Tool call blocked by extension: {}",
                    decision.reason.as_deref().unwrap_or(DEFAULT_BLOCK_REASON)
                );
            }
        }

        let mut result = self.inner.execute(invocation).await?;

        if self.hooks.has_handlers(HookKind::ToolResult) {
            let update = self
                .hooks
                .emit_tool_result(ToolResultEvent {
                    tool_name,
                    tool_call_id: call_id,
                    input,
                    content: result.content.clone(),
                    details: result.details.clone(),
                    is_error: result.is_error,
                })
                .await;
            update.apply(&mut result);
        }
        Ok(result)
    }
}
