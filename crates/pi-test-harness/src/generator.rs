use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use pi_ai::{
    ChatRequest, ChatResponse, LlmClient, PiAiError, StopReason, StreamDeltaHandler, ToolCall,
};

use crate::{
    diagnostics::format_exhausted,
    lock_or_recover,
    playbook::{Action, ActionSummary, SharedPlaybook},
};

/// Response generator that replays a playbook instead of calling a model.
///
/// Call ids are `call_1`, `call_2`, ... and restart for every new client.
pub struct PlaybookClient {
    state: SharedPlaybook,
    next_call_id: AtomicUsize,
}

impl PlaybookClient {
    pub fn new(state: SharedPlaybook) -> Self {
        Self {
            state,
            next_call_id: AtomicUsize::new(0),
        }
    }

    pub fn state(&self) -> SharedPlaybook {
        self.state.clone()
    }

    /// Consumes the next action and turns it into a response.
    pub fn next_response(&self) -> ChatResponse {
        let action = lock_or_recover(&self.state).pop_action();
        let Some(action) = action else {
            let state = lock_or_recover(&self.state);
            tracing::warn!(
                consumed = state.consumed(),
                "playbook exhausted; returning terminal response"
            );
            return ChatResponse::text(format_exhausted(&state));
        };

        match action {
            Action::Call {
                tool_name,
                params,
                on_complete,
            } => {
                let call_id = format!(
                    "call_{}",
                    self.next_call_id.fetch_add(1, Ordering::SeqCst) + 1
                );
                // Late-bound producers may read values set by earlier callbacks, so they
                // run outside the playbook lock.
                let arguments = params.resolve();
                let mut state = lock_or_recover(&self.state);
                if let Some(callback) = on_complete {
                    state.register_callback(call_id.clone(), callback);
                }
                state.record_consumed(ActionSummary::Call {
                    tool_name: tool_name.clone(),
                    params: Some(arguments.clone()),
                });
                tracing::debug!(
                    tool = tool_name.as_str(),
                    call_id = call_id.as_str(),
                    step = state.consumed(),
                    "playbook tool call"
                );
                ChatResponse::tool_call(ToolCall {
                    id: call_id,
                    name: tool_name,
                    arguments,
                })
            }
            Action::Say { text } => {
                let mut state = lock_or_recover(&self.state);
                state.record_consumed(ActionSummary::Say { text: text.clone() });
                tracing::debug!(step = state.consumed(), "playbook say");
                ChatResponse::text(text)
            }
        }
    }
}

#[async_trait]
impl LlmClient for PlaybookClient {
    async fn complete(&self, _request: ChatRequest) -> Result<ChatResponse, PiAiError> {
        Ok(self.next_response())
    }

    async fn complete_with_stream(
        &self,
        _request: ChatRequest,
        on_delta: Option<StreamDeltaHandler>,
    ) -> Result<ChatResponse, PiAiError> {
        let response = self.next_response();
        if let Some(on_delta) = on_delta {
            if response.stop_reason == StopReason::Stop {
                let text = response.message.text_content();
                if !text.is_empty() {
                    on_delta(text);
                }
            }
        }
        Ok(response)
    }
}
