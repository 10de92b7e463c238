use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{fmt, sync::Arc};
use thiserror::Error;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    System,
    User,
    Assistant,
    Tool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    ToolCall {
        id: String,
        name: String,
        arguments: Value,
    },
}

impl ContentBlock {
    pub fn tool_call(call: ToolCall) -> Self {
        Self::ToolCall {
            id: call.id,
            name: call.name,
            arguments: call.arguments,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub role: MessageRole,
    pub content: Vec<ContentBlock>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    #[serde(default)]
    pub is_error: bool,
}

impl Message {
    pub fn system(text: impl Into<String>) -> Self {
        Self::text(MessageRole::System, text)
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::text(MessageRole::User, text)
    }

    pub fn assistant_text(text: impl Into<String>) -> Self {
        Self::text(MessageRole::Assistant, text)
    }

    pub fn assistant_blocks(content: Vec<ContentBlock>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content,
            tool_call_id: None,
            tool_name: None,
            is_error: false,
        }
    }

    pub fn tool_result(
        tool_call_id: impl Into<String>,
        tool_name: impl Into<String>,
        text: impl Into<String>,
        is_error: bool,
    ) -> Self {
        Self {
            role: MessageRole::Tool,
            content: vec![ContentBlock::Text { text: text.into() }],
            tool_call_id: Some(tool_call_id.into()),
            tool_name: Some(tool_name.into()),
            is_error,
        }
    }

    fn text(role: MessageRole, text: impl Into<String>) -> Self {
        Self {
            role,
            content: vec![ContentBlock::Text { text: text.into() }],
            tool_call_id: None,
            tool_name: None,
            is_error: false,
        }
    }

    pub fn text_content(&self) -> String {
        self.content
            .iter()
            .filter_map(|block| match block {
                ContentBlock::Text { text } => Some(text.as_str()),
                ContentBlock::ToolCall { .. } => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn tool_calls(&self) -> Vec<ToolCall> {
        self.content
            .iter()
            .filter_map(|block| match block {
                ContentBlock::ToolCall {
                    id,
                    name,
                    arguments,
                } => Some(ToolCall {
                    id: id.clone(),
                    name: name.clone(),
                    arguments: arguments.clone(),
                }),
                ContentBlock::Text { .. } => None,
            })
            .collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<Message>,
    pub tools: Vec<ToolDefinition>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ChatUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
}

/// Why a response ended. The agent loop only keeps going on [`StopReason::ToolUse`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    Stop,
    ToolUse,
    Length,
    Error,
}

impl StopReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            StopReason::Stop => "stop",
            StopReason::ToolUse => "tool_use",
            StopReason::Length => "length",
            StopReason::Error => "error",
        }
    }
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatResponse {
    pub message: Message,
    pub stop_reason: StopReason,
    pub usage: ChatUsage,
}

impl ChatResponse {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            message: Message::assistant_text(text),
            stop_reason: StopReason::Stop,
            usage: ChatUsage::default(),
        }
    }

    pub fn tool_call(call: ToolCall) -> Self {
        Self {
            message: Message::assistant_blocks(vec![ContentBlock::tool_call(call)]),
            stop_reason: StopReason::ToolUse,
            usage: ChatUsage::default(),
        }
    }
}

#[derive(Debug, Error)]
pub enum PiAiError {
    #[error("missing API key")]
    MissingApiKey,
    #[error("response generation is disabled: {0}")]
    Disabled(String),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

pub type StreamDeltaHandler = Arc<dyn Fn(String) + Send + Sync>;

#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, request: ChatRequest) -> Result<ChatResponse, PiAiError>;

    async fn complete_with_stream(
        &self,
        request: ChatRequest,
        on_delta: Option<StreamDeltaHandler>,
    ) -> Result<ChatResponse, PiAiError> {
        let _ = on_delta;
        self.complete(request).await
    }
}

/// Placeholder client installed before a real generator is wired in.
#[derive(Debug, Clone)]
pub struct DisabledClient {
    reason: String,
}

impl DisabledClient {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl LlmClient for DisabledClient {
    async fn complete(&self, _request: ChatRequest) -> Result<ChatResponse, PiAiError> {
        Err(PiAiError::Disabled(self.reason.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::{
        ChatRequest, ChatResponse, ContentBlock, DisabledClient, LlmClient, Message, MessageRole,
        PiAiError, StopReason, ToolCall,
    };

    #[test]
    fn collects_text_content() {
        let message = Message {
            role: MessageRole::Assistant,
            content: vec![
                ContentBlock::Text {
                    text: "first".to_string(),
                },
                ContentBlock::ToolCall {
                    id: "1".to_string(),
                    name: "read".to_string(),
                    arguments: serde_json::json!({ "path": "README.md" }),
                },
                ContentBlock::Text {
                    text: "second".to_string(),
                },
            ],
            tool_call_id: None,
            tool_name: None,
            is_error: false,
        };

        assert_eq!(message.text_content(), "first\nsecond");
        assert_eq!(message.tool_calls().len(), 1);
    }

    #[test]
    fn unit_tool_call_response_uses_tool_use_stop_reason() {
        let response = ChatResponse::tool_call(ToolCall {
            id: "call_1".to_string(),
            name: "echo".to_string(),
            arguments: serde_json::json!({ "msg": "hi" }),
        });
        assert_eq!(response.stop_reason, StopReason::ToolUse);
        assert_eq!(response.message.tool_calls()[0].name, "echo");
        assert_eq!(ChatResponse::text("done").stop_reason, StopReason::Stop);
    }

    #[test]
    fn unit_stop_reason_serializes_snake_case() {
        let encoded = serde_json::to_string(&StopReason::ToolUse).expect("serialize");
        assert_eq!(encoded, "\"tool_use\"");
        assert_eq!(StopReason::Stop.to_string(), "stop");
    }

    #[tokio::test]
    async fn functional_disabled_client_refuses_to_generate() {
        let client = DisabledClient::new("no playbook installed");
        let error = client
            .complete(ChatRequest {
                model: "test".to_string(),
                messages: vec![Message::user("hi")],
                tools: Vec::new(),
                max_tokens: None,
                temperature: None,
            })
            .await
            .expect_err("disabled client must fail");
        match error {
            PiAiError::Disabled(reason) => assert_eq!(reason, "no playbook installed"),
            other => panic!("expected PiAiError::Disabled, got {other:?}"),
        }
    }
}
