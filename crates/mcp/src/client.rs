//! The client owns every configured server session.

use futures::future::join_all;
use hacxgent_config::mcp::McpServerConfig;
use hacxgent_core::error::McpError;
use hacxgent_core::event::EventBus;
use hacxgent_core::tool::{Tool, ToolRegistry};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::protocol::CallToolResult;
use crate::session::{McpSession, ServerState};
use crate::tool::McpProxyTool;

pub struct McpClient {
    sessions: RwLock<Vec<Arc<McpSession>>>,
    events: Option<EventBus>,
}

impl McpClient {
    pub fn new(configs: Vec<McpServerConfig>) -> Self {
        Self::build(configs, None)
    }

    /// Publish `ServerStateChanged` events on `bus`.
    pub fn with_events(configs: Vec<McpServerConfig>, bus: EventBus) -> Self {
        Self::build(configs, Some(bus))
    }

    fn build(configs: Vec<McpServerConfig>, events: Option<EventBus>) -> Self {
        let sessions = configs
            .into_iter()
            .map(|c| Arc::new(McpSession::new(c, events.clone())))
            .collect();
        Self {
            sessions: RwLock::new(sessions),
            events,
        }
    }

    /// Start every server concurrently.
    ///
    /// A failing server only affects itself; its error is returned here
    /// and its tools stay unavailable.
    pub async fn start_all(&self) -> Vec<(String, McpError)> {
        let sessions = self.sessions.read().await.clone();
        let outcomes = join_all(sessions.iter().map(|s| s.start())).await;

        let mut failures = Vec::new();
        for (session, outcome) in sessions.iter().zip(outcomes) {
            if let Err(e) = outcome {
                warn!(server = %session.name(), error = %e, "Server failed to start");
                failures.push((session.name().to_string(), e));
            }
        }
        info!(
            servers = sessions.len(),
            failed = failures.len(),
            "Remote tool servers started"
        );
        failures
    }

    pub async fn session(&self, server: &str) -> Option<Arc<McpSession>> {
        self.sessions
            .read()
            .await
            .iter()
            .find(|s| s.name() == server)
            .cloned()
    }

    pub async fn server_state(&self, server: &str) -> Option<ServerState> {
        self.session(server).await.map(|s| s.state())
    }

    pub async fn server_names(&self) -> Vec<String> {
        self.sessions
            .read()
            .await
            .iter()
            .map(|s| s.name().to_string())
            .collect()
    }

    /// Proxy tools for every discovered remote tool, across all servers.
    pub async fn tools(&self) -> Vec<Arc<dyn Tool>> {
        let sessions = self.sessions.read().await;
        sessions
            .iter()
            .flat_map(|session| {
                session.tools().into_iter().map(move |remote| {
                    Arc::new(McpProxyTool::new(Arc::clone(session), remote)) as Arc<dyn Tool>
                })
            })
            .collect()
    }

    /// Add every proxy tool to `registry`.
    pub async fn register_into(&self, registry: &mut ToolRegistry) {
        for tool in self.tools().await {
            registry.register(tool);
        }
    }

    pub async fn call_tool(
        &self,
        server: &str,
        tool: &str,
        arguments: Value,
    ) -> Result<CallToolResult, McpError> {
        let session = self
            .session(server)
            .await
            .ok_or_else(|| McpError::NotReady {
                server: server.to_string(),
                state: "unknown".into(),
            })?;
        session.call_tool(tool, arguments).await
    }

    /// Close every session and start the new set.
    pub async fn reload(&self, configs: Vec<McpServerConfig>) -> Vec<(String, McpError)> {
        self.shutdown().await;
        {
            let mut sessions = self.sessions.write().await;
            *sessions = configs
                .into_iter()
                .map(|c| Arc::new(McpSession::new(c, self.events.clone())))
                .collect();
        }
        self.start_all().await
    }

    pub async fn shutdown(&self) {
        let sessions = self.sessions.read().await.clone();
        join_all(sessions.iter().map(|s| s.close())).await;
    }
}
