//! Backend trait — the abstraction over model providers.
//!
//! A Backend knows how to send a conversation to a model and get a response
//! back, either as one complete message or as a stream of partial chunks.
//!
//! Implementations: OpenAI-compatible endpoints, scripted test backends.

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::ProviderError;
use crate::message::Message;
use crate::model::ModelConfig;

/// Parameters for one backend round-trip.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompletionRequest {
    /// The full conversation history
    pub messages: Vec<Message>,

    /// Available tools the model can call
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolDefinition>,

    /// Overrides the model's configured temperature
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    /// Maximum tokens to generate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// `auto`, `none`, `required`, or a specific function selector
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<serde_json::Value>,

    /// Extra HTTP headers for this request only
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub extra_headers: HashMap<String, String>,
}

impl CompletionRequest {
    pub fn new(messages: Vec<Message>, tools: Vec<ToolDefinition>) -> Self {
        Self {
            messages,
            tools,
            ..Self::default()
        }
    }
}

/// A tool definition sent to the model so it knows what tools it can call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// The tool name
    pub name: String,

    /// Description of what the tool does
    pub description: String,

    /// JSON Schema describing the tool's parameters
    pub parameters: serde_json::Value,
}

/// Token usage for one backend call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

impl Usage {
    pub fn total(&self) -> u32 {
        self.prompt_tokens + self.completion_tokens
    }

    pub fn add(&mut self, other: Usage) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
    }
}

/// A complete (non-streaming) response from a backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Completion {
    /// The generated message
    pub message: Message,

    /// Token usage statistics
    #[serde(default)]
    pub usage: Usage,

    /// Which model actually responded (may differ from requested)
    pub model: String,
}

/// A partial tool call carried by one stream chunk.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCallDelta {
    /// Slot this fragment belongs to
    pub index: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Argument text fragment, appended to the slot
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<String>,
}

/// A single chunk in a streaming response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StreamChunk {
    /// Partial content delta
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,

    /// Partial reasoning delta
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,

    /// Partial tool call deltas
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallDelta>,

    /// Set by the provider on the last choice chunk
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,

    /// Usage info (typically only in the final chunk)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

impl StreamChunk {
    /// Whether this chunk marks the end of the response.
    pub fn is_terminal(&self) -> bool {
        self.finish_reason.is_some() || self.usage.is_some()
    }
}

/// A lazily-polled stream of response chunks.
pub type ChunkStream = BoxStream<'static, std::result::Result<StreamChunk, ProviderError>>;

/// The core Backend trait.
///
/// The agent loop calls `complete_streaming()` (and the compactor calls
/// `complete()`) without knowing which provider is behind it.
#[async_trait]
pub trait Backend: Send + Sync {
    /// A human-readable name for this backend (e.g., "mistral", "local").
    fn name(&self) -> &str;

    /// Send a request and get a complete response.
    async fn complete(
        &self,
        model: &ModelConfig,
        request: CompletionRequest,
    ) -> std::result::Result<Completion, ProviderError>;

    /// Send a request and get a stream of response chunks.
    ///
    /// Default implementation calls `complete()` and wraps the result as a
    /// single terminal chunk.
    async fn complete_streaming(
        &self,
        model: &ModelConfig,
        request: CompletionRequest,
    ) -> std::result::Result<ChunkStream, ProviderError> {
        let completion = self.complete(model, request).await?;
        let chunk = completion_to_chunk(completion);
        Ok(Box::pin(futures::stream::once(async move { Ok(chunk) })))
    }

    /// Best-effort prompt size. Only meaningful as a threshold signal.
    async fn count_tokens(
        &self,
        _model: &ModelConfig,
        messages: &[Message],
        tools: &[ToolDefinition],
    ) -> usize {
        crate::token::estimate_messages_tokens(messages) + crate::token::estimate_tools_tokens(tools)
    }

    /// Release connections and background workers.
    async fn close(&self) {}
}

/// Express a complete response as one terminal stream chunk.
pub fn completion_to_chunk(completion: Completion) -> StreamChunk {
    let message = completion.message;
    StreamChunk {
        content: message.content,
        reasoning: message.reasoning_content,
        tool_calls: message
            .tool_calls
            .into_iter()
            .map(|call| ToolCallDelta {
                index: call.index,
                id: Some(call.id),
                name: Some(call.name),
                arguments: Some(call.arguments),
            })
            .collect(),
        finish_reason: Some("stop".into()),
        usage: Some(completion.usage),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::MessageToolCall;
    use futures::StreamExt;

    struct FixedBackend;

    #[async_trait]
    impl Backend for FixedBackend {
        fn name(&self) -> &str {
            "fixed"
        }

        async fn complete(
            &self,
            _model: &ModelConfig,
            _request: CompletionRequest,
        ) -> std::result::Result<Completion, ProviderError> {
            Ok(Completion {
                message: Message::assistant_with_tool_calls(
                    Some("listing".into()),
                    vec![MessageToolCall {
                        id: "call_1".into(),
                        index: 0,
                        name: "list_directory".into(),
                        arguments: "{}".into(),
                    }],
                ),
                usage: Usage {
                    prompt_tokens: 10,
                    completion_tokens: 3,
                },
                model: "m".into(),
            })
        }
    }

    #[tokio::test]
    async fn default_streaming_wraps_complete() {
        let model = ModelConfig::new("m", "p");
        let mut stream = FixedBackend
            .complete_streaming(&model, CompletionRequest::default())
            .await
            .unwrap();

        let chunk = stream.next().await.unwrap().unwrap();
        assert_eq!(chunk.content.as_deref(), Some("listing"));
        assert_eq!(chunk.tool_calls.len(), 1);
        assert_eq!(chunk.tool_calls[0].id.as_deref(), Some("call_1"));
        assert!(chunk.is_terminal());
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn default_count_tokens_is_approximate() {
        let model = ModelConfig::new("m", "p");
        let n = FixedBackend
            .count_tokens(&model, &[Message::user("test")], &[])
            .await;
        assert_eq!(n, 5);
    }

    #[test]
    fn usage_accumulates() {
        let mut total = Usage::default();
        total.add(Usage {
            prompt_tokens: 5,
            completion_tokens: 2,
        });
        total.add(Usage {
            prompt_tokens: 1,
            completion_tokens: 1,
        });
        assert_eq!(total.total(), 9);
    }
}
