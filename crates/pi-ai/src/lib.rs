//! Message model and the response-generation contract shared by the agent runtime
//! and anything that stands in for a model backend.
mod types;

pub use types::{
    ChatRequest, ChatResponse, ChatUsage, ContentBlock, DisabledClient, LlmClient, Message,
    MessageRole, PiAiError, StopReason, StreamDeltaHandler, ToolCall, ToolDefinition,
};
