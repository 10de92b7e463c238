//! Deterministic test harness for `pi-agent-core` agents.
//!
//! A scripted playbook stands in for the model; extensions, hooks, tools, and events all run
//! through the real runtime. Tool results are attributed to playbook steps so tests can assert
//! what was blocked, mocked, or executed for real.
mod collector;
mod diagnostics;
mod error;
mod exec_mocks;
mod generator;
mod interceptor;
mod logging;
mod mock_ui;
mod playbook;
mod session;

use std::sync::{Mutex, MutexGuard};

pub use collector::{EventCollector, ToolCallRecord, ToolResultRecord, UiCallRecord};
pub use diagnostics::{
    format_exhausted, format_not_consumed, format_tool_failure, EXHAUSTED_MARKER,
    NOT_CONSUMED_MARKER,
};
pub use error::HarnessError;
pub use exec_mocks::{ExecCall, ExecResponse, ScriptedCommandRunner};
pub use generator::PlaybookClient;
pub use interceptor::{
    contains_block_phrase, is_blocked, wrap_tools, FailureSlot, Interception, MockFn,
    MockHandler, MockOutcome, MockedTool, ObservedTool, ToolBlocked, BLOCK_PHRASES,
};
pub use logging::init_test_tracing;
pub use mock_ui::{MockUi, MockUiConfig, UiReply};
pub use playbook::{
    Action, ActionSummary, CompletionCallback, ParamProducer, ParamSource, PlaybookState,
    SharedPlaybook, Turn,
};
pub use session::{
    HarnessOptions, HarnessSession, PlaybookSnapshot, DEFAULT_MODEL, DEFAULT_SYSTEM_PROMPT,
};

pub(crate) fn lock_or_recover<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
