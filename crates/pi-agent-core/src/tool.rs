use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use async_trait::async_trait;
use pi_ai::ToolDefinition;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One item of tool output.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolContent {
    Text { text: String },
    Image { data: String, mime_type: String },
}

impl ToolContent {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }
}

/// Structured outcome of a tool invocation.
///
/// # Examples
///
/// ```
/// use pi_agent_core::ToolExecutionResult;
///
/// let ok = ToolExecutionResult::text("done");
/// assert!(!ok.is_error);
/// assert_eq!(ok.as_text(), "done");
///
/// let err = ToolExecutionResult::error_text("boom");
/// assert!(err.is_error);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ToolExecutionResult {
    pub content: Vec<ToolContent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
    #[serde(default)]
    pub is_error: bool,
}

impl ToolExecutionResult {
    /// Creates a successful result from content items.
    pub fn ok(content: Vec<ToolContent>) -> Self {
        Self {
            content,
            details: None,
            is_error: false,
        }
    }

    /// Creates a successful single-text result.
    pub fn text(text: impl Into<String>) -> Self {
        Self::ok(vec![ToolContent::text(text)])
    }

    /// Creates a failed single-text result.
    pub fn error_text(text: impl Into<String>) -> Self {
        Self {
            content: vec![ToolContent::text(text)],
            details: None,
            is_error: true,
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Joins every text item, skipping non-text content.
    pub fn as_text(&self) -> String {
        self.content
            .iter()
            .filter_map(|item| match item {
                ToolContent::Text { text } => Some(text.as_str()),
                ToolContent::Image { .. } => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Cooperative cancellation token shared across runtime components.
#[derive(Debug, Clone, Default)]
pub struct CooperativeCancellationToken {
    cancelled: Arc<AtomicBool>,
    notify: Arc<tokio::sync::Notify>,
}

impl CooperativeCancellationToken {
    /// Creates a new, not-yet-cancelled token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks the token as cancelled and wakes pending waiters.
    pub fn cancel(&self) {
        let already_cancelled = self.cancelled.swap(true, Ordering::SeqCst);
        if !already_cancelled {
            self.notify.notify_waiters();
        }
    }

    /// Returns true when cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub async fn cancelled(&self) {
        if self.is_cancelled() {
            return;
        }
        self.notify.notified().await;
    }
}

pub type ToolUpdateHandler = Arc<dyn Fn(ToolExecutionResult) + Send + Sync>;

/// Everything a tool receives for one call. Wrappers forward it unchanged.
#[derive(Clone)]
pub struct ToolInvocation {
    pub call_id: String,
    pub arguments: Value,
    pub cancellation: Option<CooperativeCancellationToken>,
    pub on_update: Option<ToolUpdateHandler>,
}

impl ToolInvocation {
    pub fn new(call_id: impl Into<String>, arguments: Value) -> Self {
        Self {
            call_id: call_id.into(),
            arguments,
            cancellation: None,
            on_update: None,
        }
    }
}

/// Trait contract for tools exposed to the model.
///
/// Returning `Err` fails the invocation; the agent loop turns the full error chain into an
/// error-flagged tool message.
#[async_trait]
pub trait AgentTool: Send + Sync {
    fn definition(&self) -> ToolDefinition;
    async fn execute(&self, invocation: ToolInvocation) -> anyhow::Result<ToolExecutionResult>;
}
