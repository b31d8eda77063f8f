//! Tool trait — the abstraction over agent capabilities.
//!
//! Tools are what give the agent the ability to act in the workspace:
//! list directories, read and write files, or anything a remote tool server
//! exposes. Every tool sits behind this one interface; the executor never
//! needs to know which concrete tool it is driving.

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::error::ToolError;
use crate::provider::ToolDefinition;

/// Whether a tool may run without asking.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolPermission {
    /// Execute immediately.
    Always,
    /// Suspend the call until the user decides.
    #[default]
    Ask,
    /// Refuse without invoking the tool.
    Never,
}

impl std::fmt::Display for ToolPermission {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Always => "always",
            Self::Ask => "ask",
            Self::Never => "never",
        };
        f.write_str(s)
    }
}

/// Per-tool settings. Unknown keys are kept for the tool itself to read.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolConfig {
    #[serde(default)]
    pub permission: ToolPermission,

    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl ToolConfig {
    pub fn with_permission(permission: ToolPermission) -> Self {
        Self {
            permission,
            extra: serde_json::Map::new(),
        }
    }
}

/// Per-invocation context handed to a tool.
#[derive(Debug, Clone)]
pub struct InvokeContext {
    /// The model's tool call id
    pub call_id: String,

    /// Fires when the turn is cancelled
    pub cancel: CancellationToken,
}

impl InvokeContext {
    pub fn new(call_id: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            cancel: CancellationToken::new(),
        }
    }
}

/// The successful outcome of a tool execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    /// Text handed back to the model
    pub output: String,

    /// Optional structured data
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl ToolResult {
    pub fn text(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            data: None,
        }
    }

    /// Structured result; the model sees the pretty-printed JSON.
    pub fn json(data: serde_json::Value) -> Self {
        Self {
            output: serde_json::to_string_pretty(&data).unwrap_or_default(),
            data: Some(data),
        }
    }
}

/// One item of a tool run.
#[derive(Debug, Clone)]
pub enum ToolEvent {
    Progress(String),
    Result(ToolResult),
    Error(ToolError),
}

impl ToolEvent {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Progress(_))
    }
}

/// Progress events, ending in exactly one `Result` or `Error`.
pub type ToolEventStream = BoxStream<'static, ToolEvent>;

/// The core Tool trait.
///
/// Each tool implements this trait and is registered in the [`ToolRegistry`].
/// Long-running tools override [`Tool::run`] to report progress; the rest
/// only implement [`Tool::execute`].
#[async_trait]
pub trait Tool: Send + Sync + 'static {
    /// The unique name of this tool (e.g., "list_directory").
    fn name(&self) -> &str;

    /// A description of what this tool does (sent to the model).
    fn description(&self) -> &str;

    /// JSON Schema describing this tool's parameters.
    fn parameters_schema(&self) -> serde_json::Value;

    /// Built-in settings, before user overrides.
    fn config(&self) -> ToolConfig {
        ToolConfig::default()
    }

    /// Extra instructions appended to the system prompt when visible.
    fn tool_prompt(&self) -> Option<String> {
        None
    }

    /// False once the capability behind the tool has gone away.
    fn is_available(&self) -> bool {
        true
    }

    /// Execute the tool with the given arguments.
    async fn execute(
        &self,
        arguments: serde_json::Value,
        ctx: &InvokeContext,
    ) -> std::result::Result<ToolResult, ToolError>;

    /// Run as a stream of events.
    fn run(self: Arc<Self>, arguments: serde_json::Value, ctx: InvokeContext) -> ToolEventStream {
        Box::pin(futures::stream::once(async move {
            match self.execute(arguments, &ctx).await {
                Ok(result) => ToolEvent::Result(result),
                Err(e) => ToolEvent::Error(e),
            }
        }))
    }

    /// Convert this tool into a ToolDefinition for sending to the model.
    fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters_schema(),
        }
    }
}

/// Exact name, or a prefix ending in `*`.
pub fn matches_pattern(name: &str, pattern: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => name.starts_with(prefix),
        None => name == pattern,
    }
}

/// A registry of available tools, keyed by name.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool. Replaces any existing tool with the same name.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Registered tools, sorted by name.
    pub fn tools(&self) -> Vec<Arc<dyn Tool>> {
        let mut tools: Vec<_> = self.tools.values().cloned().collect();
        tools.sort_by(|a, b| a.name().cmp(b.name()));
        tools
    }

    /// Definitions of the currently available tools, sorted by name.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools()
            .iter()
            .filter(|t| t.is_available())
            .map(|t| t.to_definition())
            .collect()
    }

    /// List all registered tool names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    /// Keep tools matching `enabled` (all, if empty) and not matching `disabled`.
    pub fn filtered(&self, enabled: &[String], disabled: &[String]) -> Self {
        let tools = self
            .tools
            .iter()
            .filter(|(name, _)| {
                enabled.is_empty() || enabled.iter().any(|p| matches_pattern(name, p))
            })
            .filter(|(name, _)| !disabled.iter().any(|p| matches_pattern(name, p)))
            .map(|(name, tool)| (name.clone(), Arc::clone(tool)))
            .collect();
        Self { tools }
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    /// A simple test tool for unit tests.
    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "Echoes back the input"
        }
        fn parameters_schema(&self) -> serde_json::Value {
            serde_json::json!({
                "type": "object",
                "properties": { "text": { "type": "string" } },
                "required": ["text"]
            })
        }
        async fn execute(
            &self,
            arguments: serde_json::Value,
            _ctx: &InvokeContext,
        ) -> std::result::Result<ToolResult, ToolError> {
            match arguments["text"].as_str() {
                Some(text) => Ok(ToolResult::text(text)),
                None => Err(ToolError::InvalidArguments("missing 'text'".into())),
            }
        }
    }

    struct Named(&'static str);

    #[async_trait]
    impl Tool for Named {
        fn name(&self) -> &str {
            self.0
        }
        fn description(&self) -> &str {
            ""
        }
        fn parameters_schema(&self) -> serde_json::Value {
            serde_json::json!({"type": "object"})
        }
        async fn execute(
            &self,
            _arguments: serde_json::Value,
            _ctx: &InvokeContext,
        ) -> std::result::Result<ToolResult, ToolError> {
            Ok(ToolResult::text(""))
        }
    }

    #[test]
    fn registry_register_and_lookup() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool));
        assert!(registry.get("echo").is_some());
        assert!(registry.get("nonexistent").is_none());
    }

    #[test]
    fn registry_definitions_are_sorted() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(Named("zeta")));
        registry.register(Arc::new(Named("alpha")));
        let defs = registry.definitions();
        assert_eq!(defs[0].name, "alpha");
        assert_eq!(defs[1].name, "zeta");
    }

    #[tokio::test]
    async fn default_run_ends_in_one_terminal_event() {
        let tool: Arc<dyn Tool> = Arc::new(EchoTool);
        let events: Vec<ToolEvent> = tool
            .run(serde_json::json!({"text": "hi"}), InvokeContext::new("c1"))
            .collect()
            .await;
        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], ToolEvent::Result(r) if r.output == "hi"));
    }

    #[tokio::test]
    async fn default_run_surfaces_errors_as_events() {
        let tool: Arc<dyn Tool> = Arc::new(EchoTool);
        let events: Vec<ToolEvent> = tool
            .run(serde_json::json!({}), InvokeContext::new("c1"))
            .collect()
            .await;
        assert!(matches!(
            &events[0],
            ToolEvent::Error(ToolError::InvalidArguments(_))
        ));
    }

    #[test]
    fn filtered_applies_patterns() {
        let mut registry = ToolRegistry::new();
        for name in ["read_file", "write_file", "docs__search", "docs__fetch"] {
            registry.register(Arc::new(Named(name)));
        }

        let only_docs = registry.filtered(&["docs__*".into()], &[]);
        assert_eq!(only_docs.names(), vec!["docs__fetch", "docs__search"]);

        let no_writes = registry.filtered(&[], &["write_file".into(), "docs__f*".into()]);
        assert_eq!(no_writes.names(), vec!["docs__search", "read_file"]);
    }

    #[test]
    fn permission_parses_lowercase() {
        let config: ToolConfig =
            serde_json::from_value(serde_json::json!({"permission": "never", "max_bytes": 10}))
                .unwrap();
        assert_eq!(config.permission, ToolPermission::Never);
        assert_eq!(config.extra["max_bytes"], 10);
    }
}
