//! One configured server: lifecycle state, live transport, tool catalog.

use chrono::Utc;
use hacxgent_config::mcp::McpServerConfig;
use hacxgent_core::error::McpError;
use hacxgent_core::event::{DomainEvent, EventBus};
use serde_json::Value;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::protocol::{self, CallToolResult, RemoteTool, ToolsListResult};
use crate::transport::Transport;

/// Lifecycle of a server session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerState {
    Disconnected,
    Starting,
    Initializing,
    Ready,
    Closing,
    Closed,
    /// Startup failed or the server went away; its tools are unavailable
    Failed(String),
}

impl std::fmt::Display for ServerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => f.write_str("disconnected"),
            Self::Starting => f.write_str("starting"),
            Self::Initializing => f.write_str("initializing"),
            Self::Ready => f.write_str("ready"),
            Self::Closing => f.write_str("closing"),
            Self::Closed => f.write_str("closed"),
            Self::Failed(reason) => write!(f, "failed: {reason}"),
        }
    }
}

pub struct McpSession {
    config: McpServerConfig,
    state: watch::Sender<ServerState>,
    transport: Mutex<Option<Arc<Transport>>>,
    tools: RwLock<Vec<RemoteTool>>,
    events: Option<EventBus>,
}

impl McpSession {
    pub fn new(config: McpServerConfig, events: Option<EventBus>) -> Self {
        let (state, _) = watch::channel(ServerState::Disconnected);
        Self {
            config,
            state,
            transport: Mutex::new(None),
            tools: RwLock::new(Vec::new()),
            events,
        }
    }

    pub fn name(&self) -> &str {
        self.config.name()
    }

    pub fn prompt(&self) -> Option<&str> {
        self.config.prompt.as_deref()
    }

    pub fn state(&self) -> ServerState {
        self.state.borrow().clone()
    }

    pub fn is_ready(&self) -> bool {
        matches!(*self.state.borrow(), ServerState::Ready)
    }

    pub fn subscribe(&self) -> watch::Receiver<ServerState> {
        self.state.subscribe()
    }

    /// Catalog reported when the server became ready.
    pub fn tools(&self) -> Vec<RemoteTool> {
        self.tools.read().map(|t| t.clone()).unwrap_or_default()
    }

    fn startup_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.config.startup_timeout_sec.max(0.001))
    }

    fn tool_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.config.tool_timeout_sec.max(0.001))
    }

    fn set_state(&self, next: ServerState) {
        debug!(server = %self.name(), state = %next, "Server state");
        let label = next.to_string();
        self.state.send_replace(next);
        if let Some(events) = &self.events {
            events.publish(DomainEvent::ServerStateChanged {
                server: self.name().to_string(),
                state: label,
                timestamp: Utc::now(),
            });
        }
    }

    /// Mark the server failed unless it is already shutting down.
    pub fn mark_failed(&self, reason: &str) {
        let current = self.state();
        if matches!(current, ServerState::Closing | ServerState::Closed) {
            return;
        }
        warn!(server = %self.name(), reason, "Server unavailable");
        self.set_state(ServerState::Failed(reason.to_string()));
    }

    /// Connect, handshake and list tools, all within the startup timeout.
    ///
    /// On failure the session ends in `Failed` and holds no transport.
    pub async fn start(self: &Arc<Self>) -> Result<(), McpError> {
        self.set_state(ServerState::Starting);
        let timeout = self.startup_timeout();

        let outcome = tokio::time::timeout(timeout, self.handshake()).await;
        let (transport, tools) = match outcome {
            Ok(Ok(ready)) => ready,
            Ok(Err(e)) => {
                self.mark_failed(&e.to_string());
                return Err(e);
            }
            Err(_) => {
                let e = McpError::StartupTimeout {
                    server: self.name().to_string(),
                    timeout_secs: self.config.startup_timeout_sec,
                };
                self.mark_failed(&e.to_string());
                return Err(e);
            }
        };

        info!(server = %self.name(), tools = tools.len(), "Server ready");
        if let Ok(mut slot) = self.tools.write() {
            *slot = tools;
        }
        let exited = transport.exited();
        if let Ok(mut slot) = self.transport.lock() {
            *slot = Some(transport);
        }
        self.set_state(ServerState::Ready);

        let watcher = Arc::downgrade(self);
        tokio::spawn(async move {
            exited.cancelled().await;
            if let Some(session) = watcher.upgrade()
                && session.is_ready()
            {
                session.mark_failed("server process exited");
            }
        });
        Ok(())
    }

    async fn handshake(&self) -> Result<(Arc<Transport>, Vec<RemoteTool>), McpError> {
        let transport = Arc::new(Transport::connect(&self.config)?);
        self.set_state(ServerState::Initializing);

        let attempt = async {
            transport
                .request("initialize", Some(protocol::initialize_params()))
                .await?;
            transport.notify("notifications/initialized", None).await?;
            let listed = transport.request("tools/list", None).await?;
            protocol::decode::<ToolsListResult>(self.name(), listed)
        }
        .await;

        match attempt {
            Ok(list) => Ok((transport, list.tools)),
            Err(e) => {
                transport.close().await;
                Err(e)
            }
        }
    }

    /// Invoke one remote tool, bounded by the per-call timeout.
    pub async fn call_tool(&self, tool: &str, arguments: Value) -> Result<CallToolResult, McpError> {
        let state = self.state();
        if state != ServerState::Ready {
            return Err(McpError::NotReady {
                server: self.name().to_string(),
                state: state.to_string(),
            });
        }
        let transport = self
            .transport
            .lock()
            .ok()
            .and_then(|t| t.clone())
            .ok_or_else(|| McpError::NotReady {
                server: self.name().to_string(),
                state: state.to_string(),
            })?;

        let params = serde_json::json!({ "name": tool, "arguments": arguments });
        let result = tokio::time::timeout(
            self.tool_timeout(),
            transport.request("tools/call", Some(params)),
        )
        .await
        .map_err(|_| McpError::CallTimeout {
            server: self.name().to_string(),
            tool: tool.to_string(),
            timeout_secs: self.config.tool_timeout_sec,
        })?;

        match result {
            Ok(value) => protocol::decode(self.name(), value),
            Err(e @ McpError::ProcessExited { .. }) => {
                self.mark_failed("server process exited");
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    /// Tear down the transport. Safe to call in any state.
    pub async fn close(&self) {
        let transport = self.transport.lock().ok().and_then(|mut t| t.take());
        if let Some(transport) = transport {
            self.set_state(ServerState::Closing);
            transport.close().await;
        }
        if let Ok(mut tools) = self.tools.write() {
            tools.clear();
        }
        self.set_state(ServerState::Closed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_session_is_disconnected() {
        let session = McpSession::new(McpServerConfig::stdio("docs", vec!["true".into()]), None);
        assert_eq!(session.state(), ServerState::Disconnected);
        assert!(session.tools().is_empty());
    }

    #[tokio::test]
    async fn call_before_start_is_not_ready() {
        let session = McpSession::new(McpServerConfig::stdio("docs", vec!["true".into()]), None);
        let err = session
            .call_tool("search", serde_json::json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, McpError::NotReady { .. }));
    }

    #[tokio::test]
    async fn spawn_failure_marks_failed_and_publishes() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();
        let session = Arc::new(McpSession::new(
            McpServerConfig::stdio("ghost", vec!["/nonexistent/hacxgent-test-binary".into()]),
            Some(bus),
        ));

        let err = session.start().await.unwrap_err();
        assert!(matches!(err, McpError::Spawn { .. }));
        assert!(matches!(session.state(), ServerState::Failed(_)));

        let first = rx.recv().await.unwrap();
        assert!(matches!(
            first.as_ref(),
            DomainEvent::ServerStateChanged { state, .. } if state == "starting"
        ));
    }

    #[tokio::test]
    async fn close_without_start_ends_closed() {
        let session = McpSession::new(McpServerConfig::stdio("docs", vec!["true".into()]), None);
        session.close().await;
        assert_eq!(session.state(), ServerState::Closed);
    }

    #[test]
    fn failed_state_display_includes_reason() {
        let state = ServerState::Failed("boom".into());
        assert_eq!(state.to_string(), "failed: boom");
    }
}
