//! File read tool — whole files or a line range, capped in size.

use async_trait::async_trait;
use hacxgent_core::error::ToolError;
use hacxgent_core::tool::{InvokeContext, Tool, ToolConfig, ToolPermission, ToolResult};
use std::path::PathBuf;

use crate::resolve_path;

/// Default cap on returned bytes; override with `max_read_bytes`.
const DEFAULT_MAX_READ_BYTES: u64 = 64_000;

pub struct ReadFileTool {
    root: PathBuf,
    config: ToolConfig,
}

impl ReadFileTool {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            config: ToolConfig::with_permission(ToolPermission::Always),
        }
    }

    pub fn with_config(mut self, config: ToolConfig) -> Self {
        self.config = config;
        self
    }

    fn max_read_bytes(&self) -> usize {
        self.config
            .extra
            .get("max_read_bytes")
            .and_then(|v| v.as_u64())
            .unwrap_or(DEFAULT_MAX_READ_BYTES) as usize
    }
}

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read a text file. Optionally restrict to a 1-based inclusive line range."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "The file path to read"
                },
                "start_line": {
                    "type": "integer",
                    "description": "First line to return (1-based, inclusive)"
                },
                "end_line": {
                    "type": "integer",
                    "description": "Last line to return (1-based, inclusive)"
                }
            },
            "required": ["path"]
        })
    }

    fn config(&self) -> ToolConfig {
        self.config.clone()
    }

    async fn execute(
        &self,
        arguments: serde_json::Value,
        _ctx: &InvokeContext,
    ) -> Result<ToolResult, ToolError> {
        let raw = arguments["path"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'path' argument".into()))?;
        let path = resolve_path(&self.root, raw);

        let content = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| ToolError::ExecutionFailed {
                tool_name: "read_file".into(),
                reason: format!("Failed to read {raw}: {e}"),
            })?;

        let total_lines = content.lines().count();
        let start = arguments["start_line"].as_u64().unwrap_or(1).max(1) as usize;
        let end = arguments["end_line"]
            .as_u64()
            .map(|n| n as usize)
            .unwrap_or(total_lines)
            .min(total_lines);
        if start > end && total_lines > 0 {
            return Err(ToolError::InvalidArguments(format!(
                "start_line {start} is after end_line {end}"
            )));
        }

        let mut selected: String = content
            .lines()
            .skip(start - 1)
            .take(end.saturating_sub(start - 1))
            .collect::<Vec<_>>()
            .join("\n");

        let limit = self.max_read_bytes();
        let truncated = selected.len() > limit;
        if truncated {
            let mut cut = limit;
            while !selected.is_char_boundary(cut) {
                cut -= 1;
            }
            selected.truncate(cut);
            selected.push_str("\n[... truncated]");
        }

        Ok(ToolResult {
            output: selected,
            data: Some(serde_json::json!({
                "path": path.display().to_string(),
                "total_lines": total_lines,
                "truncated": truncated,
            })),
        })
    }
}
