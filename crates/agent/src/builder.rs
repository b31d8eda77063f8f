//! Assembles the tool registry a loop starts from, and rebuilds it when
//! the remote servers are reloaded.

use hacxgent_config::AppConfig;
use hacxgent_core::error::McpError;
use hacxgent_core::event::EventBus;
use hacxgent_core::tool::ToolRegistry;
use hacxgent_mcp::McpClient;
use std::path::Path;
use tracing::warn;

use crate::loop_runner::AgentLoop;

/// Start every configured remote tool server.
///
/// Servers that fail are logged and left unavailable; the client is
/// returned either way.
pub async fn start_mcp(config: &AppConfig, events: &EventBus) -> McpClient {
    let client = McpClient::with_events(config.mcp_servers.clone(), events.clone());
    for (server, error) in client.start_all().await {
        warn!(%server, %error, "Remote tool server unavailable");
    }
    client
}

/// Built-in tools rooted at `root`, plus the proxies of `mcp`'s servers.
pub async fn build_registry(
    config: &AppConfig,
    root: &Path,
    mcp: Option<&McpClient>,
) -> ToolRegistry {
    let mut registry = hacxgent_tools::default_registry(root, &config.tools);
    if let Some(client) = mcp {
        client.register_into(&mut registry).await;
    }
    registry
}

/// Restart `mcp` with `config`'s servers and hand `agent` the new tools.
///
/// Returns the servers that failed to start.
pub async fn reload_mcp(
    config: &AppConfig,
    root: &Path,
    mcp: &McpClient,
    agent: &mut AgentLoop,
) -> Vec<(String, McpError)> {
    let failures = mcp.reload(config.mcp_servers.clone()).await;
    for (server, error) in &failures {
        warn!(%server, %error, "Remote tool server unavailable after reload");
    }
    agent.refresh_tools(build_registry(config, root, Some(mcp)).await);
    failures
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn builtins_without_servers() {
        let tmp = tempfile::tempdir().unwrap();
        let config = AppConfig::default();
        let client = start_mcp(&config, &EventBus::default()).await;

        let registry = build_registry(&config, tmp.path(), Some(&client)).await;
        assert_eq!(
            registry.names(),
            vec!["list_directory", "read_file", "write_file"]
        );
    }
}
