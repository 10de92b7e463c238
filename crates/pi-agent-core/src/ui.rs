use async_trait::async_trait;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyLevel {
    Info,
    Warning,
    Error,
}

impl NotifyLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotifyLevel::Info => "info",
            NotifyLevel::Warning => "warning",
            NotifyLevel::Error => "error",
        }
    }
}

/// Interaction surface handed to extensions and hooks.
///
/// The four dialog methods are async and may resolve to "dismissed" (`false` / `None`).
/// Fire-and-forget methods have no return value.
#[async_trait]
pub trait UiContext: Send + Sync {
    async fn confirm(&self, title: &str, message: &str) -> bool;
    async fn select(&self, title: &str, options: &[String]) -> Option<String>;
    async fn input(&self, title: &str, placeholder: Option<&str>) -> Option<String>;
    async fn editor(&self, title: &str, prefill: Option<&str>) -> Option<String>;
    fn notify(&self, message: &str, level: NotifyLevel);
    fn set_status(&self, key: &str, text: Option<&str>);
    fn set_title(&self, title: &str);
}

/// UI used when no interactive surface is attached: every dialog is dismissed.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeadlessUi;

#[async_trait]
impl UiContext for HeadlessUi {
    async fn confirm(&self, _title: &str, _message: &str) -> bool {
        false
    }

    async fn select(&self, _title: &str, _options: &[String]) -> Option<String> {
        None
    }

    async fn input(&self, _title: &str, _placeholder: Option<&str>) -> Option<String> {
        None
    }

    async fn editor(&self, _title: &str, _prefill: Option<&str>) -> Option<String> {
        None
    }

    fn notify(&self, message: &str, level: NotifyLevel) {
        tracing::debug!(level = level.as_str(), message, "headless ui notify");
    }

    fn set_status(&self, _key: &str, _text: Option<&str>) {}

    fn set_title(&self, _title: &str) {}
}
