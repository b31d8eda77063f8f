//! # Hacxgent MCP
//!
//! Client for remote tool servers speaking the Model Context Protocol.
//! Each configured server gets a [`McpSession`] that moves through
//! `Disconnected → Starting → Initializing → Ready → Closing → Closed`
//! (or `Failed`). Discovered tools are exposed to the agent as
//! [`McpProxyTool`]s named `<alias>__<tool>`.

pub mod client;
pub mod protocol;
pub mod session;
pub mod tool;
pub mod transport;

pub use client::McpClient;
pub use protocol::{CallToolResult, RemoteTool};
pub use session::{McpSession, ServerState};
pub use tool::McpProxyTool;
pub use transport::Transport;
