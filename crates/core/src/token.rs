//! Token estimation utilities.
//!
//! Character-based heuristic: ~4 characters per token. Callers use the
//! result as a threshold signal (compaction triggers, price projection),
//! never as an exact count.

use crate::message::Message;
use crate::provider::ToolDefinition;

/// Characters per token assumed by the heuristic.
pub const CHARS_PER_TOKEN: usize = 4;

/// Estimate the token count for a string. Rounds up.
pub fn estimate_tokens(text: &str) -> usize {
    text.len().div_ceil(CHARS_PER_TOKEN)
}

/// Estimate tokens for a single message including per-message overhead.
///
/// Each message costs ~4 tokens for the role name and wire delimiters.
/// Reasoning and tool-call arguments are counted since they are sent back.
pub fn estimate_message_tokens(message: &Message) -> usize {
    let overhead = 4;
    let calls: usize = message
        .tool_calls
        .iter()
        .map(|c| estimate_tokens(&c.name) + estimate_tokens(&c.arguments))
        .sum();
    overhead
        + estimate_tokens(message.text())
        + message
            .reasoning_content
            .as_deref()
            .map(estimate_tokens)
            .unwrap_or(0)
        + calls
}

/// Estimate tokens for a slice of messages.
pub fn estimate_messages_tokens(messages: &[Message]) -> usize {
    messages.iter().map(estimate_message_tokens).sum()
}

/// Estimate tokens for a tool definition (serialized as JSON).
pub fn estimate_tool_tokens(tool: &ToolDefinition) -> usize {
    let json = serde_json::to_string(tool).unwrap_or_default();
    estimate_tokens(&json)
}

/// Estimate tokens for a slice of tool definitions.
pub fn estimate_tools_tokens(tools: &[ToolDefinition]) -> usize {
    tools.iter().map(estimate_tool_tokens).sum()
}
