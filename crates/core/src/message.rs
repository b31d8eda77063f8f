//! Message and Conversation domain types.
//!
//! These are the core value objects that flow through the entire system:
//! user input → Conversation → Backend → aggregated assistant message →
//! tool results → back to the Backend.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::ops::Range;
use uuid::Uuid;

/// Unique identifier for a conversation (session).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConversationId(pub String);

impl ConversationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl Default for ConversationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConversationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The role of a message sender in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System instructions
    System,
    /// The end user
    User,
    /// The model
    Assistant,
    /// Tool execution result
    Tool,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        }
    }
}

/// A single message in a conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Unique message ID
    pub id: String,

    /// Who sent this message
    pub role: Role,

    /// The text content
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,

    /// Model reasoning, kept apart from the visible content
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning_content: Option<String>,

    /// Tool calls requested by the assistant (if any)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<MessageToolCall>,

    /// If this is a tool result, which tool call it responds to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,

    /// If this is a tool result, the name of the tool that produced it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Timestamp
    pub timestamp: DateTime<Utc>,

    /// Optional metadata (compaction markers, provider info, etc.)
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl Message {
    fn with_role(role: Role, content: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role,
            content,
            reasoning_content: None,
            tool_calls: Vec::new(),
            tool_call_id: None,
            name: None,
            timestamp: Utc::now(),
            metadata: serde_json::Map::new(),
        }
    }

    /// Create a new user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self::with_role(Role::User, Some(content.into()))
    }

    /// Create a new assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::with_role(Role::Assistant, Some(content.into()))
    }

    /// Create an assistant message that requests tool calls.
    pub fn assistant_with_tool_calls(
        content: Option<String>,
        tool_calls: Vec<MessageToolCall>,
    ) -> Self {
        let mut message = Self::with_role(Role::Assistant, content);
        message.tool_calls = tool_calls;
        message
    }

    /// Create a new system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self::with_role(Role::System, Some(content.into()))
    }

    /// Create a tool result message.
    pub fn tool_result(
        tool_call_id: impl Into<String>,
        name: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        let mut message = Self::with_role(Role::Tool, Some(content.into()));
        message.tool_call_id = Some(tool_call_id.into());
        message.name = Some(name.into());
        message
    }

    /// The text content, or an empty string.
    pub fn text(&self) -> &str {
        self.content.as_deref().unwrap_or("")
    }

    pub fn has_tool_calls(&self) -> bool {
        self.role == Role::Assistant && !self.tool_calls.is_empty()
    }
}

/// A tool call embedded in an assistant message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageToolCall {
    /// Unique ID for this tool call
    pub id: String,

    /// Position of the call in the streamed response
    #[serde(default)]
    pub index: u32,

    /// Name of the tool to invoke
    pub name: String,

    /// Arguments as raw JSON text, parsed by the receiving tool
    pub arguments: String,
}

/// A breach of the assistant/tool pairing rule.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PairingViolation {
    #[error("assistant message at {index} expects {expected} tool results, found {found}")]
    MissingResults {
        index: usize,
        expected: usize,
        found: usize,
    },

    #[error("tool result at {index} answers '{found}' but '{expected}' was expected")]
    MismatchedId {
        index: usize,
        expected: String,
        found: String,
    },

    #[error("tool result at {index} has no preceding assistant tool call")]
    OrphanResult { index: usize },
}

/// Check that every assistant message with N tool calls is immediately
/// followed by exactly N tool messages answering those calls in order.
pub fn validate_pairing(messages: &[Message]) -> Result<(), PairingViolation> {
    let mut i = 0;
    while i < messages.len() {
        let message = &messages[i];
        match message.role {
            Role::Assistant if !message.tool_calls.is_empty() => {
                let expected = message.tool_calls.len();
                for (offset, call) in message.tool_calls.iter().enumerate() {
                    let at = i + 1 + offset;
                    let Some(result) = messages.get(at).filter(|m| m.role == Role::Tool) else {
                        return Err(PairingViolation::MissingResults {
                            index: i,
                            expected,
                            found: offset,
                        });
                    };
                    let found = result.tool_call_id.as_deref().unwrap_or("");
                    if found != call.id {
                        return Err(PairingViolation::MismatchedId {
                            index: at,
                            expected: call.id.clone(),
                            found: found.to_string(),
                        });
                    }
                }
                i += 1 + expected;
            }
            Role::Tool => return Err(PairingViolation::OrphanResult { index: i }),
            _ => i += 1,
        }
    }
    Ok(())
}

/// A conversation is an ordered sequence of messages with shared context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    /// Unique conversation ID
    pub id: ConversationId,

    /// Ordered messages
    pub messages: Vec<Message>,

    /// When this conversation was created
    pub created_at: DateTime<Utc>,

    /// When the last message was added
    pub updated_at: DateTime<Utc>,

    /// Conversation-level metadata
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl Conversation {
    /// Create a new empty conversation.
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            id: ConversationId::new(),
            messages: Vec::new(),
            created_at: now,
            updated_at: now,
            metadata: serde_json::Map::new(),
        }
    }

    /// Add a message to the conversation.
    pub fn push(&mut self, message: Message) {
        self.updated_at = Utc::now();
        self.messages.push(message);
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Drop every message after the first `len`.
    pub fn truncate(&mut self, len: usize) {
        self.messages.truncate(len);
        self.updated_at = Utc::now();
    }

    /// Replace a contiguous range with a single message.
    ///
    /// The result is validated before it becomes visible: if the replacement
    /// would break tool pairing, the conversation is left unchanged.
    pub fn replace_range(
        &mut self,
        range: Range<usize>,
        replacement: Message,
    ) -> Result<(), PairingViolation> {
        let mut next = Vec::with_capacity(self.messages.len() - range.len() + 1);
        next.extend_from_slice(&self.messages[..range.start]);
        next.push(replacement);
        next.extend_from_slice(&self.messages[range.end..]);
        validate_pairing(&next)?;
        self.messages = next;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Content of the most recent assistant message.
    pub fn last_assistant_text(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == Role::Assistant)
            .map(|m| m.text())
    }

    /// Get the total token count estimate.
    pub fn estimated_tokens(&self) -> usize {
        crate::token::estimate_messages_tokens(&self.messages)
    }
}

impl Default for Conversation {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(id: &str, name: &str) -> MessageToolCall {
        MessageToolCall {
            id: id.into(),
            index: 0,
            name: name.into(),
            arguments: "{}".into(),
        }
    }

    #[test]
    fn create_user_message() {
        let msg = Message::user("Hello, agent!");
        assert_eq!(msg.role, Role::User);
        assert_eq!(msg.text(), "Hello, agent!");
        assert!(msg.tool_calls.is_empty());
    }

    #[test]
    fn tool_result_carries_id_and_name() {
        let msg = Message::tool_result("call_1", "list_directory", "3 items");
        assert_eq!(msg.role, Role::Tool);
        assert_eq!(msg.tool_call_id.as_deref(), Some("call_1"));
        assert_eq!(msg.name.as_deref(), Some("list_directory"));
    }

    #[test]
    fn conversation_tracks_updates() {
        let mut conv = Conversation::new();
        let created = conv.created_at;

        conv.push(Message::user("First message"));
        assert_eq!(conv.len(), 1);
        assert!(conv.updated_at >= created);
    }

    #[test]
    fn message_serialization_keeps_reasoning_separate() {
        let mut msg = Message::assistant("answer");
        msg.reasoning_content = Some("thinking".into());
        let json = serde_json::to_string(&msg).unwrap();
        let back: Message = serde_json::from_str(&json).unwrap();
        assert_eq!(back.text(), "answer");
        assert_eq!(back.reasoning_content.as_deref(), Some("thinking"));
    }

    #[test]
    fn pairing_accepts_complete_groups() {
        let messages = vec![
            Message::user("go"),
            Message::assistant_with_tool_calls(None, vec![call("a", "x"), call("b", "y")]),
            Message::tool_result("a", "x", "1"),
            Message::tool_result("b", "y", "2"),
            Message::assistant("done"),
        ];
        assert!(validate_pairing(&messages).is_ok());
    }

    #[test]
    fn pairing_rejects_missing_result() {
        let messages = vec![
            Message::assistant_with_tool_calls(None, vec![call("a", "x"), call("b", "y")]),
            Message::tool_result("a", "x", "1"),
            Message::user("interrupt"),
        ];
        assert_eq!(
            validate_pairing(&messages),
            Err(PairingViolation::MissingResults {
                index: 0,
                expected: 2,
                found: 1
            })
        );
    }

    #[test]
    fn pairing_rejects_out_of_order_results() {
        let messages = vec![
            Message::assistant_with_tool_calls(None, vec![call("a", "x"), call("b", "y")]),
            Message::tool_result("b", "y", "2"),
            Message::tool_result("a", "x", "1"),
        ];
        assert!(matches!(
            validate_pairing(&messages),
            Err(PairingViolation::MismatchedId { index: 1, .. })
        ));
    }

    #[test]
    fn pairing_rejects_orphan_tool_message() {
        let messages = vec![Message::user("hi"), Message::tool_result("a", "x", "1")];
        assert_eq!(
            validate_pairing(&messages),
            Err(PairingViolation::OrphanResult { index: 1 })
        );
    }

    #[test]
    fn replace_range_refuses_to_split_a_group() {
        let mut conv = Conversation::new();
        conv.push(Message::user("go"));
        conv.push(Message::assistant_with_tool_calls(None, vec![call("a", "x")]));
        conv.push(Message::tool_result("a", "x", "1"));
        conv.push(Message::assistant("done"));

        let before = conv.len();
        assert!(conv.replace_range(0..2, Message::user("summary")).is_err());
        assert_eq!(conv.len(), before);

        conv.replace_range(0..3, Message::user("summary")).unwrap();
        assert_eq!(conv.len(), 2);
        assert_eq!(conv.messages[0].text(), "summary");
    }
}
