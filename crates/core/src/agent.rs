//! Agent profiles: which tools a run sees and how freely it may use them.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::tool::ToolPermission;

/// Tools that never modify the workspace.
pub const READ_ONLY_TOOLS: &[&str] = &["list_directory", "read_file"];

/// A named agent definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentProfile {
    pub name: String,

    /// Overrides the configured system prompt when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt_id: Option<String>,

    /// Tool name patterns to expose; empty means all.
    #[serde(default)]
    pub enabled_tools: Vec<String>,

    #[serde(default)]
    pub disabled_tools: Vec<String>,

    /// Applies to every tool without a per-tool override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_permission: Option<ToolPermission>,

    #[serde(default)]
    pub tool_permissions: HashMap<String, ToolPermission>,
}

impl AgentProfile {
    fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            system_prompt_id: None,
            enabled_tools: Vec::new(),
            disabled_tools: Vec::new(),
            default_permission: None,
            tool_permissions: HashMap::new(),
        }
    }

    /// Permissions come from configuration.
    pub fn default_agent() -> Self {
        Self::named("default")
    }

    /// Every tool runs without asking.
    pub fn auto_approve() -> Self {
        Self {
            default_permission: Some(ToolPermission::Always),
            ..Self::named("auto-approve")
        }
    }

    /// Read-only exploration.
    pub fn plan() -> Self {
        Self {
            system_prompt_id: Some("explore".into()),
            enabled_tools: READ_ONLY_TOOLS.iter().map(|s| s.to_string()).collect(),
            default_permission: Some(ToolPermission::Always),
            ..Self::named("plan")
        }
    }

    /// Look up a built-in profile by name.
    pub fn builtin(name: &str) -> Option<Self> {
        match name {
            "default" => Some(Self::default_agent()),
            "auto-approve" => Some(Self::auto_approve()),
            "plan" => Some(Self::plan()),
            _ => None,
        }
    }

    /// Names accepted by [`AgentProfile::builtin`].
    pub fn builtin_names() -> &'static [&'static str] {
        &["default", "auto-approve", "plan"]
    }

    /// The agent-level permission for `tool`, if this profile sets one.
    pub fn permission_for(&self, tool: &str) -> Option<ToolPermission> {
        self.tool_permissions
            .get(tool)
            .copied()
            .or(self.default_permission)
    }
}

impl Default for AgentProfile {
    fn default() -> Self {
        Self::default_agent()
    }
}
