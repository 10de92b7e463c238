use std::{collections::HashSet, future::Future, sync::Arc};

use anyhow::Result;
use thiserror::Error;

use crate::{
    hooks::{
        HookBus, HookContext, ToolCallDecision, ToolCallEvent, ToolResultEvent, ToolResultOverride,
    },
    tool::AgentTool,
};

/// A unit of runtime customization: registers tools and hook handlers at load time.
pub trait Extension: Send + Sync {
    fn name(&self) -> &str;
    fn register(&self, api: &mut ExtensionApi<'_>) -> Result<()>;
}

pub type ExtensionFactory = Arc<dyn Fn(&mut ExtensionApi<'_>) -> Result<()> + Send + Sync>;

/// Where an extension comes from.
#[derive(Clone)]
pub enum ExtensionSource {
    Extension(Arc<dyn Extension>),
    Inline {
        name: String,
        factory: ExtensionFactory,
    },
}

impl ExtensionSource {
    pub fn inline<F>(name: impl Into<String>, factory: F) -> Self
    where
        F: Fn(&mut ExtensionApi<'_>) -> Result<()> + Send + Sync + 'static,
    {
        Self::Inline {
            name: name.into(),
            factory: Arc::new(factory),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            ExtensionSource::Extension(extension) => extension.name(),
            ExtensionSource::Inline { name, .. } => name.as_str(),
        }
    }
}

impl<E> From<Arc<E>> for ExtensionSource
where
    E: Extension + 'static,
{
    fn from(extension: Arc<E>) -> Self {
        Self::Extension(extension)
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("failed to load extension '{name}': {message}")]
pub struct ExtensionLoadError {
    pub name: String,
    pub message: String,
}

/// Registration surface handed to an extension while it loads.
pub struct ExtensionApi<'a> {
    extension: String,
    tools: &'a mut Vec<Arc<dyn AgentTool>>,
    hooks: &'a mut HookBus,
}

impl ExtensionApi<'_> {
    pub fn extension_name(&self) -> &str {
        self.extension.as_str()
    }

    pub fn register_tool<T>(&mut self, tool: T)
    where
        T: AgentTool + 'static,
    {
        self.tools.push(Arc::new(tool));
    }

    pub fn on_tool_call<F, Fut>(&mut self, handler: F)
    where
        F: Fn(ToolCallEvent, HookContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Option<ToolCallDecision>>> + Send + 'static,
    {
        self.hooks.on_tool_call(self.extension.clone(), handler);
    }

    pub fn on_tool_result<F, Fut>(&mut self, handler: F)
    where
        F: Fn(ToolResultEvent, HookContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Option<ToolResultOverride>>> + Send + 'static,
    {
        self.hooks.on_tool_result(self.extension.clone(), handler);
    }
}

/// Loads every source in order, collecting their tools and wiring their hooks into `hooks`.
///
/// The first failing extension aborts the load. Two extensions registering the same tool
/// name is a load failure of the later one.
pub fn load_extensions(
    sources: &[ExtensionSource],
    hooks: &mut HookBus,
) -> Result<Vec<Arc<dyn AgentTool>>, ExtensionLoadError> {
    let mut tools: Vec<Arc<dyn AgentTool>> = Vec::new();
    let mut seen = HashSet::new();

    for source in sources {
        let name = source.name().to_string();
        let start = tools.len();
        let mut api = ExtensionApi {
            extension: name.clone(),
            tools: &mut tools,
            hooks: &mut *hooks,
        };
        let outcome = match source {
            ExtensionSource::Extension(extension) => extension.register(&mut api),
            ExtensionSource::Inline { factory, .. } => factory(&mut api),
        };
        outcome.map_err(|error| ExtensionLoadError {
            name: name.clone(),
            message: format!("{error:#}"),
        })?;

        for tool in &tools[start..] {
            let tool_name = tool.definition().name;
            if !seen.insert(tool_name.clone()) {
                return Err(ExtensionLoadError {
                    name,
                    message: format!("tool '{tool_name}' is already registered"),
                });
            }
        }
        tracing::debug!(
            extension = name.as_str(),
            tools = tools.len() - start,
            "extension loaded"
        );
    }

    Ok(tools)
}
