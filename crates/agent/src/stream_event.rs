//! Agent-level progress events.
//!
//! `AgentEvent` is what a caller of [`crate::AgentLoop::submit`] observes:
//! text as it streams, tool activity, approval requests, and exactly one
//! final event (`Done`, `LimitReached`, `Cancelled` or `Error`).

use hacxgent_core::message::Message;
use hacxgent_core::provider::Usage;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Where the loop sends its events.
pub type EventSink = mpsc::UnboundedSender<AgentEvent>;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    /// Partial text from the model.
    Chunk { content: String },

    /// Partial reasoning from the model.
    Reasoning { content: String },

    /// The model requested a tool.
    ToolCall {
        id: String,
        name: String,
        arguments: String,
    },

    /// An ASK tool is waiting for `approve`.
    ApprovalRequired {
        id: String,
        name: String,
        arguments: String,
    },

    ToolProgress {
        id: String,
        name: String,
        message: String,
    },

    ToolResult {
        id: String,
        name: String,
        output: String,
        success: bool,
    },

    /// Older history was summarized.
    Compacted {
        replaced_messages: usize,
        tokens_before: usize,
        tokens_after: usize,
    },

    /// A message became part of the committed conversation.
    Committed { message: Message },

    /// The turn finished with the model's final text.
    Done {
        text: String,
        turns: u32,
        usage: Usage,
        cost: f64,
    },

    /// A turn or price budget stopped the run.
    LimitReached { reason: String },

    /// The turn was cancelled and rolled back.
    Cancelled,

    /// The turn failed and was rolled back.
    Error { message: String },
}

impl AgentEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Chunk { .. } => "chunk",
            Self::Reasoning { .. } => "reasoning",
            Self::ToolCall { .. } => "tool_call",
            Self::ApprovalRequired { .. } => "approval_required",
            Self::ToolProgress { .. } => "tool_progress",
            Self::ToolResult { .. } => "tool_result",
            Self::Compacted { .. } => "compacted",
            Self::Committed { .. } => "committed",
            Self::Done { .. } => "done",
            Self::LimitReached { .. } => "limit_reached",
            Self::Cancelled => "cancelled",
            Self::Error { .. } => "error",
        }
    }

    /// Whether this event ends a `submit` sequence.
    pub fn is_final(&self) -> bool {
        matches!(
            self,
            Self::Done { .. } | Self::LimitReached { .. } | Self::Cancelled | Self::Error { .. }
        )
    }
}
