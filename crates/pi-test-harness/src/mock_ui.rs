use std::{fmt, sync::Arc};

use async_trait::async_trait;
use pi_agent_core::{NotifyLevel, UiContext};
use serde_json::{json, Value};

use crate::collector::{EventCollector, UiCallRecord};

/// A scripted answer: fixed, or computed from the call's positional arguments.
#[derive(Clone)]
pub enum UiReply<T> {
    Value(T),
    Handler(Arc<dyn Fn(&[Value]) -> T + Send + Sync>),
}

impl<T: Clone> UiReply<T> {
    pub fn handler<F>(handler: F) -> Self
    where
        F: Fn(&[Value]) -> T + Send + Sync + 'static,
    {
        UiReply::Handler(Arc::new(handler))
    }

    fn resolve(&self, args: &[Value]) -> T {
        match self {
            UiReply::Value(value) => value.clone(),
            UiReply::Handler(handler) => handler(args),
        }
    }
}

impl<T> From<T> for UiReply<T> {
    fn from(value: T) -> Self {
        UiReply::Value(value)
    }
}

impl<T: fmt::Debug> fmt::Debug for UiReply<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UiReply::Value(value) => f.debug_tuple("Value").field(value).finish(),
            UiReply::Handler(_) => f.write_str("Handler(..)"),
        }
    }
}

/// Per-method replies. Unset methods fall back to: confirm `true`, select the first
/// option, input `""`, editor the prefill (or `""`).
#[derive(Debug, Clone, Default)]
pub struct MockUiConfig {
    pub confirm: Option<UiReply<bool>>,
    pub select: Option<UiReply<Option<String>>>,
    pub input: Option<UiReply<Option<String>>>,
    pub editor: Option<UiReply<Option<String>>>,
}

pub struct MockUi {
    config: MockUiConfig,
    collector: EventCollector,
}

impl MockUi {
    pub fn new(config: MockUiConfig, collector: EventCollector) -> Self {
        Self { config, collector }
    }

    fn record(&self, method: &str, args: Vec<Value>, returned: Value) {
        tracing::debug!(method, "mock ui call");
        self.collector.push_ui_call(UiCallRecord {
            method: method.to_string(),
            args,
            returned,
        });
    }
}

#[async_trait]
impl UiContext for MockUi {
    async fn confirm(&self, title: &str, message: &str) -> bool {
        let args = vec![json!(title), json!(message)];
        let answer = self
            .config
            .confirm
            .as_ref()
            .map_or(true, |reply| reply.resolve(&args));
        self.record("confirm", args, json!(answer));
        answer
    }

    async fn select(&self, title: &str, options: &[String]) -> Option<String> {
        let args = vec![json!(title), json!(options)];
        let answer = match &self.config.select {
            Some(reply) => reply.resolve(&args),
            None => options.first().cloned(),
        };
        self.record("select", args, json!(answer));
        answer
    }

    async fn input(&self, title: &str, placeholder: Option<&str>) -> Option<String> {
        let args = vec![json!(title), json!(placeholder)];
        let answer = match &self.config.input {
            Some(reply) => reply.resolve(&args),
            None => Some(String::new()),
        };
        self.record("input", args, json!(answer));
        answer
    }

    async fn editor(&self, title: &str, prefill: Option<&str>) -> Option<String> {
        let args = vec![json!(title), json!(prefill)];
        let answer = match &self.config.editor {
            Some(reply) => reply.resolve(&args),
            None => Some(prefill.unwrap_or_default().to_string()),
        };
        self.record("editor", args, json!(answer));
        answer
    }

    fn notify(&self, message: &str, level: NotifyLevel) {
        self.record(
            "notify",
            vec![json!(message), json!(level.as_str())],
            Value::Null,
        );
    }

    fn set_status(&self, key: &str, text: Option<&str>) {
        self.record("set_status", vec![json!(key), json!(text)], Value::Null);
    }

    fn set_title(&self, title: &str) {
        self.record("set_title", vec![json!(title)], Value::Null);
    }
}
