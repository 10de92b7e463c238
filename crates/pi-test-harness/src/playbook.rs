//! Scripted conversation model: actions, turns, and the run-scoped playbook state.

use std::{
    collections::{HashMap, VecDeque},
    fmt,
    sync::{Arc, Mutex},
};

use serde_json::Value;

use crate::collector::ToolResultRecord;

pub type CompletionCallback = Box<dyn FnOnce(&ToolResultRecord) + Send>;
pub type ParamProducer = Arc<dyn Fn() -> Value + Send + Sync>;

/// Tool-call arguments, either known up front or produced when the call is dequeued.
#[derive(Clone)]
pub enum ParamSource {
    Fixed(Value),
    Deferred(ParamProducer),
}

impl ParamSource {
    /// Evaluates the source. Deferred producers run on every call; nothing is cached.
    pub fn resolve(&self) -> Value {
        match self {
            ParamSource::Fixed(value) => value.clone(),
            ParamSource::Deferred(producer) => producer(),
        }
    }
}

impl fmt::Debug for ParamSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamSource::Fixed(value) => f.debug_tuple("Fixed").field(value).finish(),
            ParamSource::Deferred(_) => f.write_str("Deferred(..)"),
        }
    }
}

/// One scripted model action.
pub enum Action {
    Call {
        tool_name: String,
        params: ParamSource,
        on_complete: Option<CompletionCallback>,
    },
    Say {
        text: String,
    },
}

impl Action {
    pub fn call(tool_name: impl Into<String>, params: Value) -> Self {
        Action::Call {
            tool_name: tool_name.into(),
            params: ParamSource::Fixed(params),
            on_complete: None,
        }
    }

    /// A call whose arguments are computed when the playbook reaches it, so they can
    /// depend on results captured by earlier `then` callbacks.
    pub fn call_with<F>(tool_name: impl Into<String>, producer: F) -> Self
    where
        F: Fn() -> Value + Send + Sync + 'static,
    {
        Action::Call {
            tool_name: tool_name.into(),
            params: ParamSource::Deferred(Arc::new(producer)),
            on_complete: None,
        }
    }

    pub fn say(text: impl Into<String>) -> Self {
        Action::Say { text: text.into() }
    }

    /// Attaches a callback fired once with the call's result record. Ignored on `Say`.
    ///
    /// The record is produced by the tool wrapper, so a call the runtime rejects first
    /// (unregistered tool name, arguments failing the tool's schema) never gets one. Its
    /// callback stays counted in [`PlaybookState::pending_callbacks`] and never fires.
    pub fn then<F>(self, callback: F) -> Self
    where
        F: FnOnce(&ToolResultRecord) + Send + 'static,
    {
        match self {
            Action::Call {
                tool_name, params, ..
            } => Action::Call {
                tool_name,
                params,
                on_complete: Some(Box::new(callback)),
            },
            say @ Action::Say { .. } => say,
        }
    }

    /// Summary for diagnostics. Deferred params are not evaluated.
    pub fn summary(&self) -> ActionSummary {
        match self {
            Action::Call {
                tool_name, params, ..
            } => ActionSummary::Call {
                tool_name: tool_name.clone(),
                params: match params {
                    ParamSource::Fixed(value) => Some(value.clone()),
                    ParamSource::Deferred(_) => None,
                },
            },
            Action::Say { text } => ActionSummary::Say { text: text.clone() },
        }
    }
}

impl fmt::Debug for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Call {
                tool_name,
                params,
                on_complete,
            } => f
                .debug_struct("Call")
                .field("tool_name", tool_name)
                .field("params", params)
                .field("has_callback", &on_complete.is_some())
                .finish(),
            Action::Say { text } => f.debug_struct("Say").field("text", text).finish(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ActionSummary {
    Call {
        tool_name: String,
        /// `None` for late-bound params that have not been evaluated.
        params: Option<Value>,
    },
    Say {
        text: String,
    },
}

impl fmt::Display for ActionSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionSummary::Call {
                tool_name,
                params: Some(params),
            } => write!(f, "call {tool_name} {params}"),
            ActionSummary::Call {
                tool_name,
                params: None,
            } => write!(f, "call {tool_name} <late-bound params>"),
            ActionSummary::Say { text } => write!(f, "say {text:?}"),
        }
    }
}

/// A prompt and the actions the scripted model takes in response.
///
/// The prompt is only submitted to the agent; it never selects actions.
#[derive(Debug)]
pub struct Turn {
    pub prompt: String,
    pub actions: Vec<Action>,
}

impl Turn {
    pub fn when(prompt: impl Into<String>, actions: Vec<Action>) -> Self {
        Self {
            prompt: prompt.into(),
            actions,
        }
    }
}

pub type SharedPlaybook = Arc<Mutex<PlaybookState>>;

/// Run-scoped progress through the flattened action queue.
pub struct PlaybookState {
    queue: VecDeque<Action>,
    consumed: usize,
    remaining: usize,
    consumed_actions: Vec<ActionSummary>,
    pending_callbacks: HashMap<String, CompletionCallback>,
}

impl PlaybookState {
    pub fn new(actions: Vec<Action>) -> Self {
        let remaining = actions.len();
        Self {
            queue: VecDeque::from(actions),
            consumed: 0,
            remaining,
            consumed_actions: Vec::new(),
            pending_callbacks: HashMap::new(),
        }
    }

    pub fn from_turns(turns: Vec<Turn>) -> (Vec<String>, Self) {
        let mut prompts = Vec::with_capacity(turns.len());
        let mut actions = Vec::new();
        for turn in turns {
            prompts.push(turn.prompt);
            actions.extend(turn.actions);
        }
        (prompts, Self::new(actions))
    }

    pub fn shared(self) -> SharedPlaybook {
        Arc::new(Mutex::new(self))
    }

    pub fn consumed(&self) -> usize {
        self.consumed
    }

    pub fn remaining(&self) -> usize {
        self.remaining
    }

    pub fn consumed_actions(&self) -> &[ActionSummary] {
        &self.consumed_actions
    }

    pub fn last_consumed(&self) -> Option<&ActionSummary> {
        self.consumed_actions.last()
    }

    pub fn remaining_actions(&self) -> Vec<ActionSummary> {
        self.queue.iter().map(Action::summary).collect()
    }

    pub fn pending_callbacks(&self) -> usize {
        self.pending_callbacks.len()
    }

    pub(crate) fn pop_action(&mut self) -> Option<Action> {
        self.queue.pop_front()
    }

    /// Marks one dequeued action as consumed.
    pub(crate) fn record_consumed(&mut self, summary: ActionSummary) {
        self.consumed += 1;
        self.remaining = self.queue.len();
        self.consumed_actions.push(summary);
    }

    pub(crate) fn register_callback(&mut self, call_id: String, callback: CompletionCallback) {
        self.pending_callbacks.insert(call_id, callback);
    }

    /// Removes the callback keyed by `call_id`, falling back to `tool_name`.
    pub(crate) fn take_callback(
        &mut self,
        call_id: &str,
        tool_name: &str,
    ) -> Option<CompletionCallback> {
        self.pending_callbacks
            .remove(call_id)
            .or_else(|| self.pending_callbacks.remove(tool_name))
    }
}

impl fmt::Debug for PlaybookState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlaybookState")
            .field("consumed", &self.consumed)
            .field("remaining", &self.remaining)
            .field("consumed_actions", &self.consumed_actions)
            .field("pending_callbacks", &self.pending_callbacks.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    use serde_json::json;

    use super::{Action, ActionSummary, ParamSource, PlaybookState, Turn};
    use crate::collector::ToolResultRecord;

    fn record(tool_name: &str) -> ToolResultRecord {
        ToolResultRecord {
            step: 1,
            tool_name: tool_name.to_string(),
            call_id: "call_1".to_string(),
            text: "ok".to_string(),
            content: Vec::new(),
            is_error: false,
            details: None,
            mocked: true,
        }
    }

    #[test]
    fn unit_turns_flatten_into_one_queue_in_order() {
        let (prompts, state) = PlaybookState::from_turns(vec![
            Turn::when("first", vec![Action::call("echo", json!({})), Action::say("a")]),
            Turn::when("second", vec![Action::say("b")]),
        ]);
        assert_eq!(prompts, vec!["first", "second"]);
        assert_eq!(state.remaining(), 3);
        assert_eq!(state.consumed(), 0);
        assert_eq!(
            state.remaining_actions()[2],
            ActionSummary::Say {
                text: "b".to_string()
            }
        );
    }

    #[test]
    fn unit_deferred_params_are_evaluated_on_every_resolve() {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let source = ParamSource::Deferred(Arc::new(move || {
            json!({ "n": counter.fetch_add(1, Ordering::SeqCst) })
        }));
        assert_eq!(source.resolve(), json!({ "n": 0 }));
        assert_eq!(source.resolve(), json!({ "n": 1 }));
    }

    #[test]
    fn unit_summary_does_not_evaluate_late_bound_params() {
        let action = Action::call_with("read", || panic!("must not be evaluated"));
        let summary = action.summary();
        assert_eq!(summary.to_string(), "call read <late-bound params>");
    }

    #[test]
    fn functional_callbacks_fire_once_with_call_id_then_tool_name_fallback() {
        let hits = Arc::new(AtomicUsize::new(0));
        let mut state = PlaybookState::new(Vec::new());
        let by_id = hits.clone();
        state.register_callback(
            "call_1".to_string(),
            Box::new(move |_record| {
                by_id.fetch_add(1, Ordering::SeqCst);
            }),
        );
        let by_name = hits.clone();
        state.register_callback(
            "echo".to_string(),
            Box::new(move |_record| {
                by_name.fetch_add(10, Ordering::SeqCst);
            }),
        );

        let first = state
            .take_callback("call_1", "echo")
            .expect("id-keyed callback");
        first(&record("echo"));
        let second = state
            .take_callback("call_9", "echo")
            .expect("name-keyed fallback");
        second(&record("echo"));
        assert!(state.take_callback("call_1", "echo").is_none());
        assert_eq!(hits.load(Ordering::SeqCst), 11);
        assert_eq!(state.pending_callbacks(), 0);
    }

    #[test]
    fn regression_then_on_say_keeps_the_text() {
        let action = Action::say("done").then(|_record| {});
        assert!(matches!(action, Action::Say { ref text } if text == "done"));
    }
}
