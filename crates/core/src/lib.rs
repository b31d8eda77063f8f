//! # Hacxgent Core
//!
//! Domain types, traits, and error definitions for the Hacxgent
//! coding-assistant runtime. This crate has **no I/O of its own** — it defines
//! the domain model that every other crate implements against.
//!
//! ## Design Philosophy
//!
//! Every collaborator of the agent loop is a trait here:
//! - [`Backend`] — one model provider (completion, streaming, token counting)
//! - [`Tool`] — one callable capability (built-in or proxied from a tool server)
//! - [`SessionLog`] — persistence of committed messages
//!
//! Implementations live in their respective crates, so tests can swap in
//! scripted backends and counting tools without touching the loop.

pub mod agent;
pub mod error;
pub mod event;
pub mod message;
pub mod model;
pub mod provider;
pub mod session;
pub mod token;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use agent::AgentProfile;
pub use error::{
    ConversationLimit, Error, McpError, ProviderError, Result, SessionError, ToolError,
};
pub use event::{DomainEvent, EventBus};
pub use message::{
    Conversation, ConversationId, Message, MessageToolCall, PairingViolation, Role,
    validate_pairing,
};
pub use model::{BackendKind, ModelConfig, ProviderConfig};
pub use provider::{
    Backend, ChunkStream, Completion, CompletionRequest, StreamChunk, ToolCallDelta,
    ToolDefinition, Usage,
};
pub use session::{SessionLog, SessionMetadata, SessionRef};
pub use tool::{
    InvokeContext, Tool, ToolConfig, ToolEvent, ToolEventStream, ToolPermission, ToolRegistry,
    ToolResult,
};
