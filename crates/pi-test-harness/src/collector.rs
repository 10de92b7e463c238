use std::sync::{Arc, Mutex};

use pi_agent_core::{AgentEvent, ToolContent};
use pi_ai::Message;
use serde::Serialize;
use serde_json::Value;

use crate::{interceptor::contains_block_phrase, lock_or_recover};

/// A tool invocation as the agent started it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolCallRecord {
    pub step: usize,
    pub tool_name: String,
    pub input: Value,
    pub blocked: bool,
    pub block_reason: Option<String>,
}

/// The outcome of one tool invocation, attributed to a playbook step.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolResultRecord {
    pub step: usize,
    pub tool_name: String,
    pub call_id: String,
    pub text: String,
    pub content: Vec<ToolContent>,
    pub is_error: bool,
    pub details: Option<Value>,
    pub mocked: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UiCallRecord {
    pub method: String,
    pub args: Vec<Value>,
    pub returned: Value,
}

#[derive(Default)]
struct CollectorState {
    step: usize,
    events: Vec<AgentEvent>,
    messages: Vec<Message>,
    tool_calls: Vec<ToolCallRecord>,
    tool_results: Vec<ToolResultRecord>,
    ui_calls: Vec<UiCallRecord>,
}

/// Append-only store of everything observed during a session.
///
/// Clones share the same store. Every query returns an owned copy.
#[derive(Clone, Default)]
pub struct EventCollector {
    state: Arc<Mutex<CollectorState>>,
}

impl EventCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one raw agent event.
    pub fn observe(&self, event: &AgentEvent) {
        let mut state = lock_or_recover(&self.state);
        state.events.push(event.clone());
        match event {
            AgentEvent::MessageAdded { message } => state.messages.push(message.clone()),
            AgentEvent::ToolExecutionStart {
                tool_name,
                arguments,
                ..
            } => {
                let step = state.step;
                state.tool_calls.push(ToolCallRecord {
                    step,
                    tool_name: tool_name.clone(),
                    input: arguments.clone(),
                    blocked: false,
                    block_reason: None,
                });
            }
            AgentEvent::ToolExecutionEnd {
                tool_name, result, ..
            } if result.is_error => {
                let text = result.as_text();
                if !contains_block_phrase(&text) {
                    return;
                }
                // Two in-flight calls to the same tool cannot be told apart here.
                if let Some(record) = state
                    .tool_calls
                    .iter_mut()
                    .rev()
                    .find(|record| &record.tool_name == tool_name)
                {
                    record.blocked = true;
                    record.block_reason = Some(text);
                }
            }
            _ => {}
        }
    }

    pub(crate) fn set_step(&self, step: usize) {
        lock_or_recover(&self.state).step = step;
    }

    pub(crate) fn push_tool_result(&self, record: ToolResultRecord) {
        lock_or_recover(&self.state).tool_results.push(record);
    }

    pub(crate) fn push_ui_call(&self, record: UiCallRecord) {
        lock_or_recover(&self.state).ui_calls.push(record);
    }

    pub fn tool_calls_for(&self, tool_name: &str) -> Vec<ToolCallRecord> {
        lock_or_recover(&self.state)
            .tool_calls
            .iter()
            .filter(|record| record.tool_name == tool_name)
            .cloned()
            .collect()
    }

    pub fn tool_results_for(&self, tool_name: &str) -> Vec<ToolResultRecord> {
        lock_or_recover(&self.state)
            .tool_results
            .iter()
            .filter(|record| record.tool_name == tool_name)
            .cloned()
            .collect()
    }

    pub fn blocked_calls(&self) -> Vec<ToolCallRecord> {
        lock_or_recover(&self.state)
            .tool_calls
            .iter()
            .filter(|record| record.blocked)
            .cloned()
            .collect()
    }

    pub fn ui_calls_for(&self, method: &str) -> Vec<UiCallRecord> {
        lock_or_recover(&self.state)
            .ui_calls
            .iter()
            .filter(|record| record.method == method)
            .cloned()
            .collect()
    }

    /// Tool names in the order the agent started them.
    pub fn tool_sequence(&self) -> Vec<String> {
        lock_or_recover(&self.state)
            .tool_calls
            .iter()
            .map(|record| record.tool_name.clone())
            .collect()
    }

    pub fn messages(&self) -> Vec<Message> {
        lock_or_recover(&self.state).messages.clone()
    }

    pub fn all_events(&self) -> Vec<AgentEvent> {
        lock_or_recover(&self.state).events.clone()
    }

    pub fn tool_calls(&self) -> Vec<ToolCallRecord> {
        lock_or_recover(&self.state).tool_calls.clone()
    }

    pub fn tool_results(&self) -> Vec<ToolResultRecord> {
        lock_or_recover(&self.state).tool_results.clone()
    }

    pub fn ui_calls(&self) -> Vec<UiCallRecord> {
        lock_or_recover(&self.state).ui_calls.clone()
    }
}

#[cfg(test)]
mod tests {
    use pi_agent_core::{AgentEvent, ToolExecutionResult};
    use pi_ai::Message;
    use serde_json::json;

    use super::EventCollector;

    fn start(tool_name: &str, id: &str) -> AgentEvent {
        AgentEvent::ToolExecutionStart {
            tool_call_id: id.to_string(),
            tool_name: tool_name.to_string(),
            arguments: json!({ "id": id }),
        }
    }

    fn end(tool_name: &str, id: &str, result: ToolExecutionResult) -> AgentEvent {
        AgentEvent::ToolExecutionEnd {
            tool_call_id: id.to_string(),
            tool_name: tool_name.to_string(),
            result,
        }
    }

    #[test]
    fn unit_start_events_become_call_records_at_current_step() {
        let collector = EventCollector::new();
        collector.set_step(3);
        collector.observe(&start("read", "call_1"));
        collector.observe(&start("write", "call_2"));

        let calls = collector.tool_calls_for("read");
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].step, 3);
        assert_eq!(calls[0].input, json!({ "id": "call_1" }));
        assert_eq!(collector.tool_sequence(), vec!["read", "write"]);
        assert_eq!(collector.all_events().len(), 2);
    }

    #[test]
    fn functional_error_end_with_block_phrase_marks_latest_matching_call() {
        let collector = EventCollector::new();
        collector.observe(&start("bash", "call_1"));
        collector.observe(&end("bash", "call_1", ToolExecutionResult::text("ok")));
        collector.observe(&start("bash", "call_2"));
        collector.observe(&end(
            "bash",
            "call_2",
            ToolExecutionResult::error_text("Tool call blocked by extension: rm is forbidden"),
        ));

        let blocked = collector.blocked_calls();
        assert_eq!(blocked.len(), 1);
        assert_eq!(blocked[0].input, json!({ "id": "call_2" }));
        assert_eq!(
            blocked[0].block_reason.as_deref(),
            Some("Tool call blocked by extension: rm is forbidden")
        );
        assert!(!collector.tool_calls_for("bash")[0].blocked);
    }

    #[test]
    fn regression_ordinary_errors_are_not_marked_blocked() {
        let collector = EventCollector::new();
        collector.observe(&start("read", "call_1"));
        collector.observe(&end(
            "read",
            "call_1",
            ToolExecutionResult::error_text("file not found"),
        ));
        assert!(collector.blocked_calls().is_empty());
    }

    #[test]
    fn unit_messages_are_collected_from_message_events() {
        let collector = EventCollector::new();
        collector.observe(&AgentEvent::MessageAdded {
            message: Message::user("hi"),
        });
        collector.observe(&AgentEvent::AgentStart);
        assert_eq!(collector.messages().len(), 1);
        assert_eq!(collector.messages()[0].text_content(), "hi");
        assert!(collector.ui_calls().is_empty());
        assert!(collector.tool_results().is_empty());
    }
}
