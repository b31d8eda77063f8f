//! Proxy tools: each remote tool appears locally as `<alias>__<name>`.

use async_trait::async_trait;
use hacxgent_core::error::{McpError, ToolError};
use hacxgent_core::tool::{InvokeContext, Tool, ToolResult};
use std::sync::Arc;

use crate::protocol::RemoteTool;
use crate::session::McpSession;

pub const NAME_SEPARATOR: &str = "__";

pub struct McpProxyTool {
    session: Arc<McpSession>,
    remote: RemoteTool,
    name: String,
    description: String,
}

impl McpProxyTool {
    pub fn new(session: Arc<McpSession>, remote: RemoteTool) -> Self {
        let name = format!("{}{NAME_SEPARATOR}{}", session.name(), remote.name);
        let mut description = remote
            .description
            .clone()
            .unwrap_or_else(|| format!("Tool '{}' from server '{}'", remote.name, session.name()));
        if let Some(hint) = session.prompt() {
            description.push_str("\nHint: ");
            description.push_str(hint);
        }
        Self {
            session,
            remote,
            name,
            description,
        }
    }

    pub fn remote_name(&self) -> &str {
        &self.remote.name
    }

    pub fn server(&self) -> &str {
        self.session.name()
    }
}

fn to_tool_error(tool: &str, err: McpError) -> ToolError {
    match err {
        McpError::NotReady { .. } | McpError::ProcessExited { .. } => ToolError::Unavailable {
            tool_name: tool.to_string(),
            reason: err.to_string(),
        },
        McpError::CallTimeout { timeout_secs, .. } => ToolError::Timeout {
            tool_name: tool.to_string(),
            timeout_secs: timeout_secs.ceil() as u64,
        },
        other => ToolError::ExecutionFailed {
            tool_name: tool.to_string(),
            reason: other.to_string(),
        },
    }
}

#[async_trait]
impl Tool for McpProxyTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters_schema(&self) -> serde_json::Value {
        self.remote.input_schema.clone()
    }

    fn is_available(&self) -> bool {
        self.session.is_ready()
    }

    async fn execute(
        &self,
        arguments: serde_json::Value,
        ctx: &InvokeContext,
    ) -> Result<ToolResult, ToolError> {
        let call = self.session.call_tool(&self.remote.name, arguments);
        let outcome = tokio::select! {
            _ = ctx.cancel.cancelled() => return Err(ToolError::Cancelled(self.name.clone())),
            outcome = call => outcome,
        };
        let result = outcome.map_err(|e| to_tool_error(&self.name, e))?;

        let text = result.text();
        if result.is_error {
            return Err(ToolError::ExecutionFailed {
                tool_name: self.name.clone(),
                reason: text,
            });
        }
        Ok(ToolResult {
            output: text,
            data: result.structured_content,
        })
    }
}
