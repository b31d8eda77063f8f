//! File write tool — create or overwrite files inside the workspace.

use async_trait::async_trait;
use futures::StreamExt;
use hacxgent_core::error::ToolError;
use hacxgent_core::tool::{
    InvokeContext, Tool, ToolConfig, ToolEvent, ToolEventStream, ToolPermission, ToolResult,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

use crate::resolve_path;

pub struct WriteFileTool {
    root: PathBuf,
    config: ToolConfig,
}

impl WriteFileTool {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            config: ToolConfig::with_permission(ToolPermission::Ask),
        }
    }

    pub fn with_config(mut self, config: ToolConfig) -> Self {
        self.config = config;
        self
    }
}

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> &str {
        "Write content to a file. Creates the file and any missing parent \
         directories; overwrites an existing file."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "The file path to write to"
                },
                "content": {
                    "type": "string",
                    "description": "The content to write"
                }
            },
            "required": ["path", "content"]
        })
    }

    fn config(&self) -> ToolConfig {
        self.config.clone()
    }

    fn tool_prompt(&self) -> Option<String> {
        Some("Read a file with `read_file` before overwriting it with `write_file`.".into())
    }

    async fn execute(
        &self,
        arguments: serde_json::Value,
        ctx: &InvokeContext,
    ) -> Result<ToolResult, ToolError> {
        let raw = arguments["path"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'path' argument".into()))?;
        let content = arguments["content"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'content' argument".into()))?;

        if ctx.cancel.is_cancelled() {
            return Err(ToolError::Cancelled("write_file".into()));
        }

        let path = resolve_path(&self.root, raw);
        let failed = |reason: String| ToolError::ExecutionFailed {
            tool_name: "write_file".into(),
            reason,
        };

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| failed(format!("Failed to create directory: {e}")))?;
        }
        tokio::fs::write(&path, content)
            .await
            .map_err(|e| failed(format!("Failed to write file: {e}")))?;

        debug!(path = %path.display(), bytes = content.len(), "File written");
        Ok(ToolResult::text(format!(
            "Successfully wrote {} bytes to {raw}",
            content.len()
        )))
    }

    fn run(self: Arc<Self>, arguments: serde_json::Value, ctx: InvokeContext) -> ToolEventStream {
        let target = arguments["path"].as_str().unwrap_or_default().to_string();
        let progress = futures::stream::once(async move {
            ToolEvent::Progress(format!("Writing {target}"))
        });
        let outcome = futures::stream::once(async move {
            match self.execute(arguments, &ctx).await {
                Ok(result) => ToolEvent::Result(result),
                Err(e) => ToolEvent::Error(e),
            }
        });
        progress.chain(outcome).boxed()
    }
}
