//! Built-in tool implementations for Hacxgent.
//!
//! Tools give the agent the ability to inspect and change the workspace:
//! list directories, read files, and write files. Remote tools from MCP
//! servers live in `hacxgent-mcp` and register into the same registry.

pub mod list_directory;
pub mod read_file;
pub mod write_file;

use hacxgent_core::tool::{Tool, ToolConfig, ToolRegistry};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub use list_directory::ListDirectoryTool;
pub use read_file::ReadFileTool;
pub use write_file::WriteFileTool;

/// Resolve a model-supplied path. Relative paths are joined onto `root`.
pub(crate) fn resolve_path(root: &Path, raw: &str) -> PathBuf {
    let path = Path::new(raw);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        root.join(path)
    }
}

/// Create a registry with every built-in tool rooted at `root`.
///
/// A per-tool entry in `overrides` replaces that tool's built-in config,
/// including its permission.
pub fn default_registry(root: &Path, overrides: &HashMap<String, ToolConfig>) -> ToolRegistry {
    let pick = |name: &str, default: ToolConfig| overrides.get(name).cloned().unwrap_or(default);

    let list = ListDirectoryTool::new(root);
    let config = pick("list_directory", list.config());
    let list = list.with_config(config);
    let read = ReadFileTool::new(root);
    let config = pick("read_file", read.config());
    let read = read.with_config(config);
    let write = WriteFileTool::new(root);
    let config = pick("write_file", write.config());
    let write = write.with_config(config);

    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(list));
    registry.register(Arc::new(read));
    registry.register(Arc::new(write));
    registry
}

#[cfg(test)]
mod tests {
    use super::*;
    use hacxgent_core::tool::ToolPermission;

    #[test]
    fn registry_has_builtins() {
        let registry = default_registry(Path::new("."), &HashMap::new());
        assert_eq!(
            registry.names(),
            vec!["list_directory", "read_file", "write_file"]
        );
    }

    #[test]
    fn overrides_replace_builtin_config() {
        let mut overrides = HashMap::new();
        overrides.insert(
            "write_file".to_string(),
            ToolConfig::with_permission(ToolPermission::Never),
        );
        let registry = default_registry(Path::new("."), &overrides);
        let write = registry.get("write_file").unwrap();
        assert_eq!(write.config().permission, ToolPermission::Never);
        let read = registry.get("read_file").unwrap();
        assert_eq!(read.config().permission, ToolPermission::Always);
    }

    #[test]
    fn relative_paths_join_root() {
        let root = Path::new("/work");
        assert_eq!(resolve_path(root, "src"), PathBuf::from("/work/src"));
        assert_eq!(resolve_path(root, "/etc"), PathBuf::from("/etc"));
    }
}
