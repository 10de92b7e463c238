//! Tool wrappers that substitute mock results or observe real executions.
//!
//! Mocked tools still drive the `tool_call` and `tool_result` hooks so extension guards behave
//! as they would against the real tool. Unmocked tools are wrapped transparently; the runtime's
//! own hook wrapper underneath keeps firing.

use std::{
    collections::HashMap,
    fmt,
    sync::{Arc, Mutex},
};

use anyhow::Result;
use async_trait::async_trait;
use pi_agent_core::{
    AgentTool, CooperativeCancellationToken, HookBus, HookKind, ToolCallEvent, ToolContent,
    ToolExecutionResult, ToolInvocation, ToolResultEvent, DEFAULT_BLOCK_REASON,
};
use pi_ai::ToolDefinition;
use serde_json::{json, Value};
use thiserror::Error;

use crate::{
    collector::{EventCollector, ToolResultRecord},
    diagnostics::format_tool_failure,
    lock_or_recover,
    playbook::SharedPlaybook,
};

/// Lower-cased phrases that identify a blocked tool call in an error message.
pub const BLOCK_PHRASES: [&str; 3] = ["tool call blocked", "blocked by", "was blocked"];

/// Raised when an extension hook blocks a mocked tool.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Tool \"{tool_name}\" was blocked: {reason}")]
pub struct ToolBlocked {
    pub tool_name: String,
    pub reason: String,
}

pub fn contains_block_phrase(text: &str) -> bool {
    let lowered = text.to_lowercase();
    BLOCK_PHRASES.iter().any(|phrase| lowered.contains(phrase))
}

/// True when `error` is a block from either path: a typed [`ToolBlocked`] anywhere in the
/// chain, or the runtime's plain-text block message.
pub fn is_blocked(error: &anyhow::Error) -> bool {
    error
        .chain()
        .any(|cause| cause.downcast_ref::<ToolBlocked>().is_some())
        || contains_block_phrase(&format!("{error:#}"))
}

/// What a mock function returns.
#[derive(Debug, Clone, PartialEq)]
pub enum MockOutcome {
    Text(String),
    Result(ToolExecutionResult),
}

pub type MockFn = Arc<dyn Fn(&Value) -> MockOutcome + Send + Sync>;

#[derive(Clone)]
pub enum MockHandler {
    Text(String),
    Result(ToolExecutionResult),
    Function(MockFn),
}

impl MockHandler {
    pub fn function<F>(handler: F) -> Self
    where
        F: Fn(&Value) -> MockOutcome + Send + Sync + 'static,
    {
        MockHandler::Function(Arc::new(handler))
    }

    pub fn resolve(&self, params: &Value) -> ToolExecutionResult {
        let outcome = match self {
            MockHandler::Text(text) => MockOutcome::Text(text.clone()),
            MockHandler::Result(result) => MockOutcome::Result(result.clone()),
            MockHandler::Function(handler) => handler(params),
        };
        match outcome {
            MockOutcome::Text(text) => ToolExecutionResult::text(text),
            MockOutcome::Result(result) => result,
        }
    }
}

impl fmt::Debug for MockHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MockHandler::Text(text) => f.debug_tuple("Text").field(text).finish(),
            MockHandler::Result(result) => f.debug_tuple("Result").field(result).finish(),
            MockHandler::Function(_) => f.write_str("Function(..)"),
        }
    }
}

impl From<&str> for MockHandler {
    fn from(text: &str) -> Self {
        MockHandler::Text(text.to_string())
    }
}

impl From<String> for MockHandler {
    fn from(text: String) -> Self {
        MockHandler::Text(text)
    }
}

impl From<ToolExecutionResult> for MockHandler {
    fn from(result: ToolExecutionResult) -> Self {
        MockHandler::Result(result)
    }
}

pub type FailureSlot = Arc<Mutex<Option<String>>>;

/// Run-scoped state shared by every wrapper produced in one [`wrap_tools`] call.
#[derive(Clone)]
pub struct Interception {
    pub playbook: SharedPlaybook,
    pub collector: EventCollector,
    pub hooks: Arc<HookBus>,
    pub propagate_errors: bool,
    pub failure: FailureSlot,
    pub cancellation: CooperativeCancellationToken,
}

impl Interception {
    fn step(&self) -> usize {
        lock_or_recover(&self.playbook).consumed()
    }

    fn finish(&self, record: ToolResultRecord) {
        self.collector.push_tool_result(record.clone());
        let callback =
            lock_or_recover(&self.playbook).take_callback(&record.call_id, &record.tool_name);
        if let Some(callback) = callback {
            callback(&record);
        }
    }

    fn record_failure(&self, diagnostic: String) {
        let mut slot = lock_or_recover(&self.failure);
        if slot.is_none() {
            *slot = Some(diagnostic);
        }
        drop(slot);
        self.cancellation.cancel();
    }
}

/// Wraps every tool in `original` once. Tools named in `mocks` get a [`MockedTool`],
/// the rest an [`ObservedTool`].
pub fn wrap_tools(
    original: &[Arc<dyn AgentTool>],
    mocks: &HashMap<String, MockHandler>,
    interception: &Interception,
) -> Vec<Arc<dyn AgentTool>> {
    original
        .iter()
        .map(|tool| {
            let definition = tool.definition();
            let wrapped: Arc<dyn AgentTool> = match mocks.get(&definition.name) {
                Some(handler) => Arc::new(MockedTool {
                    definition,
                    handler: handler.clone(),
                    interception: interception.clone(),
                }),
                None => Arc::new(ObservedTool {
                    inner: Arc::clone(tool),
                    interception: interception.clone(),
                }),
            };
            wrapped
        })
        .collect()
}

pub struct MockedTool {
    definition: ToolDefinition,
    handler: MockHandler,
    interception: Interception,
}

#[async_trait]
impl AgentTool for MockedTool {
    fn definition(&self) -> ToolDefinition {
        self.definition.clone()
    }

    async fn execute(&self, invocation: ToolInvocation) -> Result<ToolExecutionResult> {
        let hooks = &self.interception.hooks;
        let tool_name = self.definition.name.clone();
        let step = self.interception.step();

        if hooks.has_handlers(HookKind::ToolCall) {
            let decision = hooks
                .emit_tool_call(ToolCallEvent {
                    tool_name: tool_name.clone(),
                    tool_call_id: invocation.call_id.clone(),
                    input: invocation.arguments.clone(),
                })
                .await;
            if let Some(decision) = decision.filter(|decision| decision.block) {
                let blocked = ToolBlocked {
                    tool_name: tool_name.clone(),
                    reason: decision
                        .reason
                        .unwrap_or_else(|| DEFAULT_BLOCK_REASON.to_string()),
                };
                // Record text carries a block phrase, matching the runtime path.
                let text = blocked.to_string();
                self.interception.finish(ToolResultRecord {
                    step,
                    tool_name,
                    call_id: invocation.call_id,
                    text: text.clone(),
                    content: vec![ToolContent::text(text)],
                    is_error: true,
                    details: Some(json!({ "block_reason": blocked.reason })),
                    mocked: true,
                });
                return Err(blocked.into());
            }
        }

        let mut result = self.handler.resolve(&invocation.arguments);

        if hooks.has_handlers(HookKind::ToolResult) {
            let update = hooks
                .emit_tool_result(ToolResultEvent {
                    tool_name: tool_name.clone(),
                    tool_call_id: invocation.call_id.clone(),
                    input: invocation.arguments.clone(),
                    content: result.content.clone(),
                    details: result.details.clone(),
                    is_error: result.is_error,
                })
                .await;
            update.apply(&mut result);
        }

        tracing::debug!(
            tool = tool_name.as_str(),
            call_id = invocation.call_id.as_str(),
            step,
            is_error = result.is_error,
            "mocked tool result"
        );
        self.interception.finish(ToolResultRecord {
            step,
            tool_name,
            call_id: invocation.call_id,
            text: result.as_text(),
            content: result.content.clone(),
            is_error: result.is_error,
            details: result.details.clone(),
            mocked: true,
        });
        Ok(result)
    }
}

pub struct ObservedTool {
    inner: Arc<dyn AgentTool>,
    interception: Interception,
}

#[async_trait]
impl AgentTool for ObservedTool {
    fn definition(&self) -> ToolDefinition {
        self.inner.definition()
    }

    async fn execute(&self, invocation: ToolInvocation) -> Result<ToolExecutionResult> {
        let tool_name = self.inner.definition().name;
        let call_id = invocation.call_id.clone();
        let step = self.interception.step();

        match self.inner.execute(invocation).await {
            Ok(result) => {
                self.interception.finish(ToolResultRecord {
                    step,
                    tool_name,
                    call_id,
                    text: result.as_text(),
                    content: result.content.clone(),
                    is_error: result.is_error,
                    details: result.details.clone(),
                    mocked: false,
                });
                Ok(result)
            }
            Err(error) => {
                let text = format!("{error:#}");
                self.interception.finish(ToolResultRecord {
                    step,
                    tool_name: tool_name.clone(),
                    call_id,
                    text: text.clone(),
                    content: vec![ToolContent::text(text.clone())],
                    is_error: true,
                    details: None,
                    mocked: false,
                });

                if is_blocked(&error) {
                    return Err(error);
                }
                if self.interception.propagate_errors {
                    let diagnostic = format_tool_failure(step, &tool_name, &error);
                    tracing::debug!(
                        tool = tool_name.as_str(),
                        step,
                        "real tool failed; aborting run"
                    );
                    self.interception.record_failure(diagnostic.clone());
                    return Err(error.context(diagnostic));
                }
                Ok(ToolExecutionResult::error_text(text))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        collections::HashMap,
        sync::{
            atomic::{AtomicUsize, Ordering},
            Arc, Mutex,
        },
    };

    use anyhow::anyhow;
    use async_trait::async_trait;
    use pi_agent_core::{
        AgentTool, CooperativeCancellationToken, HookBus, HookContext, ToolCallDecision,
        ToolExecutionResult, ToolInvocation, ToolResultOverride, DEFAULT_BLOCK_REASON,
    };
    use serde_json::{json, Value};

    use super::{
        contains_block_phrase, is_blocked, wrap_tools, Interception, MockHandler, MockOutcome,
        ToolBlocked,
    };
    use crate::{collector::EventCollector, playbook::PlaybookState};

    struct Flaky {
        fail: bool,
        hits: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl AgentTool for Flaky {
        fn definition(&self) -> pi_ai::ToolDefinition {
            pi_ai::ToolDefinition {
                name: "flaky".to_string(),
                description: String::new(),
                parameters: json!({ "type": "object" }),
            }
        }

        async fn execute(&self, _invocation: ToolInvocation) -> anyhow::Result<ToolExecutionResult> {
            self.hits.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(anyhow!("disk full").context("write failed"));
            }
            Ok(ToolExecutionResult::text("real output"))
        }
    }

    fn interception(hooks: HookBus, propagate_errors: bool) -> Interception {
        Interception {
            playbook: PlaybookState::new(Vec::new()).shared(),
            collector: EventCollector::new(),
            hooks: Arc::new(hooks),
            propagate_errors,
            failure: Arc::new(Mutex::new(None)),
            cancellation: CooperativeCancellationToken::new(),
        }
    }

    fn wrap_one(
        tool: Flaky,
        mock: Option<MockHandler>,
        interception: &Interception,
    ) -> Arc<dyn AgentTool> {
        let mut mocks = HashMap::new();
        if let Some(handler) = mock {
            mocks.insert("flaky".to_string(), handler);
        }
        let tool: Arc<dyn AgentTool> = Arc::new(tool);
        wrap_tools(&[tool], &mocks, interception)
            .pop()
            .expect("one wrapped tool")
    }

    #[test]
    fn unit_is_blocked_accepts_typed_and_phrase_errors() {
        let typed = anyhow::Error::new(ToolBlocked {
            tool_name: "bash".to_string(),
            reason: "nope".to_string(),
        })
        .context("outer");
        assert!(is_blocked(&typed));
        assert!(is_blocked(&anyhow!("Tool call blocked by extension: nope")));
        assert!(is_blocked(&anyhow!("request WAS BLOCKED upstream")));
        assert!(!is_blocked(&anyhow!("permission denied")));
    }

    #[test]
    fn unit_mock_handler_shapes_resolve_to_results() {
        assert_eq!(
            MockHandler::from("static").resolve(&json!({})).as_text(),
            "static"
        );
        let full = MockHandler::from(
            ToolExecutionResult::error_text("bad").with_details(json!({ "code": 2 })),
        )
        .resolve(&json!({}));
        assert!(full.is_error);
        assert_eq!(full.details, Some(json!({ "code": 2 })));
        let echo = MockHandler::function(|params: &Value| {
            MockOutcome::Text(params["msg"].as_str().unwrap_or_default().to_string())
        });
        assert_eq!(echo.resolve(&json!({ "msg": "hi" })).as_text(), "hi");
    }

    #[tokio::test]
    async fn functional_mocked_tool_records_and_applies_result_hooks() {
        let mut hooks = HookBus::new(HookContext::new("."));
        hooks.on_tool_result("tag", |_event, _ctx| async move {
            Ok(Some(ToolResultOverride {
                details: Some(json!({ "tagged": true })),
                ..ToolResultOverride::default()
            }))
        });
        let interception = interception(hooks, true);
        let hits = Arc::new(AtomicUsize::new(0));
        let tool = wrap_one(
            Flaky {
                fail: false,
                hits: hits.clone(),
            },
            Some(MockHandler::from("mocked")),
            &interception,
        );

        let result = tool
            .execute(ToolInvocation::new("call_1", json!({})))
            .await
            .expect("mock should succeed");
        assert_eq!(result.as_text(), "mocked");
        assert_eq!(result.details, Some(json!({ "tagged": true })));
        assert_eq!(hits.load(Ordering::SeqCst), 0);

        let records = interception.collector.tool_results_for("flaky");
        assert_eq!(records.len(), 1);
        assert!(records[0].mocked);
        assert_eq!(records[0].call_id, "call_1");
        assert_eq!(records[0].details, Some(json!({ "tagged": true })));
    }

    #[tokio::test]
    async fn functional_blocked_mock_raises_typed_error_after_recording() {
        let mut hooks = HookBus::new(HookContext::new("."));
        hooks.on_tool_call("guard", |_event, _ctx| async move {
            Ok(Some(ToolCallDecision::block("not today")))
        });
        let interception = interception(hooks, true);
        let tool = wrap_one(
            Flaky {
                fail: false,
                hits: Arc::new(AtomicUsize::new(0)),
            },
            Some(MockHandler::from("never")),
            &interception,
        );

        let error = tool
            .execute(ToolInvocation::new("call_1", json!({})))
            .await
            .expect_err("block must fail");
        let blocked = error
            .downcast_ref::<ToolBlocked>()
            .expect("typed block error");
        assert_eq!(blocked.reason, "not today");
        assert!(is_blocked(&error));

        let records = interception.collector.tool_results();
        assert_eq!(records.len(), 1);
        assert!(records[0].is_error);
        assert_eq!(records[0].text, "Tool \"flaky\" was blocked: not today");
        assert_eq!(records[0].details, Some(json!({ "block_reason": "not today" })));
        assert!(!interception.cancellation.is_cancelled());
    }

    #[tokio::test]
    async fn regression_block_without_reason_still_reads_as_a_block() {
        let mut hooks = HookBus::new(HookContext::new("."));
        hooks.on_tool_call("guard", |_event, _ctx| async move {
            Ok(Some(ToolCallDecision {
                block: true,
                reason: None,
            }))
        });
        let interception = interception(hooks, true);
        let tool = wrap_one(
            Flaky {
                fail: false,
                hits: Arc::new(AtomicUsize::new(0)),
            },
            Some(MockHandler::from("never")),
            &interception,
        );

        let error = tool
            .execute(ToolInvocation::new("call_1", json!({})))
            .await
            .expect_err("block must fail");
        assert!(is_blocked(&error));

        let records = interception.collector.tool_results();
        assert!(records[0].is_error);
        assert!(contains_block_phrase(&records[0].text));
        assert!(records[0].text.contains(DEFAULT_BLOCK_REASON));
    }

    #[tokio::test]
    async fn functional_observed_failure_propagates_with_diagnostic() {
        let interception = interception(HookBus::new(HookContext::new(".")), true);
        let tool = wrap_one(
            Flaky {
                fail: true,
                hits: Arc::new(AtomicUsize::new(0)),
            },
            None,
            &interception,
        );

        let error = tool
            .execute(ToolInvocation::new("call_1", json!({})))
            .await
            .expect_err("failure must propagate");
        assert!(error.to_string().contains("Tool \"flaky\" failed at playbook step 0"));
        assert!(interception.cancellation.is_cancelled());
        let diagnostic = interception
            .failure
            .lock()
            .expect("failure slot")
            .clone()
            .expect("diagnostic stored");
        assert!(diagnostic.contains("disk full"));

        let records = interception.collector.tool_results();
        assert_eq!(records[0].text, "write failed: disk full");
        assert!(!records[0].mocked);
    }

    #[tokio::test]
    async fn functional_observed_failure_is_swallowed_without_propagation() {
        let interception = interception(HookBus::new(HookContext::new(".")), false);
        let tool = wrap_one(
            Flaky {
                fail: true,
                hits: Arc::new(AtomicUsize::new(0)),
            },
            None,
            &interception,
        );

        let result = tool
            .execute(ToolInvocation::new("call_1", json!({})))
            .await
            .expect("failure becomes a result");
        assert!(result.is_error);
        assert_eq!(result.as_text(), "write failed: disk full");
        assert!(!interception.cancellation.is_cancelled());
        assert!(interception.failure.lock().expect("slot").is_none());
    }

    #[tokio::test]
    async fn regression_runtime_block_message_is_reraised_unwrapped() {
        struct Guarded;

        #[async_trait]
        impl AgentTool for Guarded {
            fn definition(&self) -> pi_ai::ToolDefinition {
                pi_ai::ToolDefinition {
                    name: "guarded".to_string(),
                    description: String::new(),
                    parameters: json!({ "type": "object" }),
                }
            }

            async fn execute(
                &self,
                _invocation: ToolInvocation,
            ) -> anyhow::Result<ToolExecutionResult> {
                Err(anyhow!("Tool call blocked by extension: policy"))
            }
        }

        let interception = interception(HookBus::new(HookContext::new(".")), true);
        let guarded: Arc<dyn AgentTool> = Arc::new(Guarded);
        let tool = wrap_tools(&[guarded], &HashMap::new(), &interception)
            .pop()
            .expect("wrapped");
        let error = tool
            .execute(ToolInvocation::new("call_1", json!({})))
            .await
            .expect_err("block is re-raised");
        assert_eq!(error.to_string(), "Tool call blocked by extension: policy");
        assert!(!interception.cancellation.is_cancelled());
        assert_eq!(interception.collector.tool_results_for("guarded").len(), 1);
    }
}
