//! Directory listing tool — structured entries with size and mtime.

use async_trait::async_trait;
use hacxgent_core::error::ToolError;
use hacxgent_core::tool::{InvokeContext, Tool, ToolConfig, ToolPermission, ToolResult};
use serde::Serialize;
use std::path::PathBuf;
use std::time::UNIX_EPOCH;

use crate::resolve_path;

pub struct ListDirectoryTool {
    root: PathBuf,
    config: ToolConfig,
}

#[derive(Debug, Serialize)]
struct Entry {
    name: String,
    #[serde(rename = "type")]
    kind: &'static str,
    size: u64,
    /// Seconds since the Unix epoch
    modified: f64,
}

impl ListDirectoryTool {
    /// Relative paths resolve against `root`.
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
impl Tool for ListDirectoryTool {
    fn name(&self) -> &str {
        "list_directory"
    }

    fn description(&self) -> &str {
        "List files and directories in a given path with metadata. \
         Preferred over shell 'ls' for structured, cross-platform directory inspection."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Path to the directory to list",
                    "default": "."
                }
            }
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
        let raw = arguments["path"].as_str().unwrap_or(".");
        let path = resolve_path(&self.root, raw);

        let failed = |reason: String| ToolError::ExecutionFailed {
            tool_name: "list_directory".into(),
            reason,
        };

        let metadata = tokio::fs::metadata(&path)
            .await
            .map_err(|_| failed(format!("Directory not found: {raw}")))?;
        if !metadata.is_dir() {
            return Err(failed(format!("Path is not a directory: {raw}")));
        }

        let mut reader = tokio::fs::read_dir(&path)
            .await
            .map_err(|e| failed(format!("Error listing directory: {e}")))?;

        let mut items = Vec::new();
        while let Some(entry) = reader
            .next_entry()
            .await
            .map_err(|e| failed(format!("Error listing directory: {e}")))?
        {
            let Ok(meta) = entry.metadata().await else {
                continue;
            };
            let modified = meta
                .modified()
                .ok()
                .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                .map(|d| d.as_secs_f64())
                .unwrap_or(0.0);
            items.push(Entry {
                name: entry.file_name().to_string_lossy().into_owned(),
                kind: if meta.is_dir() { "directory" } else { "file" },
                size: meta.len(),
                modified,
            });
        }
        items.sort_by(|a, b| a.name.cmp(&b.name));

        Ok(ToolResult::json(serde_json::json!({
            "path": path.display().to_string(),
            "items": items,
        })))
    }
}
