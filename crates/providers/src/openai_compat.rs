//! OpenAI-compatible backend implementation.
//!
//! Works with any endpoint exposing `/chat/completions`: OpenAI, Mistral,
//! OpenRouter, Ollama, vLLM, llama.cpp and the first-party Hacxgent API.
//!
//! Supports:
//! - Chat completions (non-streaming, with retry on transient failures)
//! - Streaming SSE, bridged through a bounded channel
//! - Tool use / function calling, `tool_choice`, per-request headers
//! - Reasoning text under a configurable field name

use async_trait::async_trait;
use futures::StreamExt;
use hacxgent_core::error::ProviderError;
use hacxgent_core::message::{Message, MessageToolCall, Role};
use hacxgent_core::model::{ModelConfig, ProviderConfig};
use hacxgent_core::provider::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, trace, warn};

use crate::rate_limit::RateLimiter;

/// Chunks buffered between the network reader and the consumer.
const STREAM_BUFFER: usize = 64;

/// Reasoning fields recognised in addition to the configured one.
const REASONING_FALLBACKS: &[&str] = &["reasoning_content", "thought"];

/// Retry settings for non-streaming calls.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    /// Exponential backoff: base, 2×base, 4×base, ...
    pub fn delay(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(2u32.saturating_pow(attempt))
    }
}

/// An OpenAI-compatible model backend.
///
/// One instance serves every model of one provider and owns that
/// provider's rate limiter.
pub struct OpenAiCompatBackend {
    provider: ProviderConfig,
    base_url: String,
    api_key: String,
    client: reqwest::Client,
    limiter: Arc<RateLimiter>,
    retry: RetryPolicy,
}

impl OpenAiCompatBackend {
    /// Create a backend for `provider` with a request timeout.
    pub fn new(
        provider: ProviderConfig,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> std::result::Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProviderError::NotConfigured(format!("HTTP client: {e}")))?;

        Ok(Self {
            base_url: provider.api_base.trim_end_matches('/').to_string(),
            provider,
            api_key: api_key.into(),
            client,
            limiter: Arc::new(RateLimiter::new()),
            retry: RetryPolicy::default(),
        })
    }

    /// Share pacing with other backend instances.
    pub fn with_rate_limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.limiter = limiter;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn rate_limiter(&self) -> Arc<RateLimiter> {
        Arc::clone(&self.limiter)
    }

    /// Convert our Message types to OpenAI API format.
    fn to_api_messages(messages: &[Message]) -> Vec<ApiMessage> {
        messages
            .iter()
            .map(|m| ApiMessage {
                role: m.role.as_str().into(),
                content: Some(m.text().to_string()),
                tool_calls: if m.role == Role::Assistant && !m.tool_calls.is_empty() {
                    Some(
                        m.tool_calls
                            .iter()
                            .map(|tc| ApiToolCall {
                                id: tc.id.clone(),
                                r#type: "function".into(),
                                function: ApiFunction {
                                    name: tc.name.clone(),
                                    arguments: tc.arguments.clone(),
                                },
                            })
                            .collect(),
                    )
                } else {
                    None
                },
                tool_call_id: m.tool_call_id.clone().filter(|_| m.role == Role::Tool),
                name: m.name.clone().filter(|_| m.role == Role::Tool),
            })
            .collect()
    }

    /// Convert tool definitions to OpenAI API format.
    fn to_api_tools(tools: &[ToolDefinition]) -> Vec<ApiToolDefinition> {
        tools
            .iter()
            .map(|t| ApiToolDefinition {
                r#type: "function".into(),
                function: ApiToolFunction {
                    name: t.name.clone(),
                    description: t.description.clone(),
                    parameters: t.parameters.clone(),
                },
            })
            .collect()
    }

    fn build_body(
        model: &ModelConfig,
        request: &CompletionRequest,
        stream: bool,
    ) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": model.name,
            "messages": Self::to_api_messages(&request.messages),
            "temperature": request.temperature.unwrap_or(model.temperature),
            "stream": stream,
        });

        if stream {
            body["stream_options"] = serde_json::json!({ "include_usage": true });
        }
        if let Some(max_tokens) = request.max_tokens {
            body["max_tokens"] = serde_json::json!(max_tokens);
        }
        if !request.tools.is_empty() {
            body["tools"] = serde_json::json!(Self::to_api_tools(&request.tools));
            if let Some(choice) = &request.tool_choice {
                body["tool_choice"] = choice.clone();
            }
        }
        body
    }

    /// POST to `/chat/completions` and map HTTP failures to provider errors.
    async fn post(
        &self,
        body: &serde_json::Value,
        extra_headers: &HashMap<String, String>,
        stream: bool,
    ) -> std::result::Result<reqwest::Response, ProviderError> {
        let url = format!("{}/chat/completions", self.base_url);

        let mut builder = self
            .client
            .post(&url)
            .header("Content-Type", "application/json");
        if !self.api_key.is_empty() {
            builder = builder.header("Authorization", format!("Bearer {}", self.api_key));
        }
        if stream {
            builder = builder.header("Accept", "text/event-stream");
        }
        for (name, value) in extra_headers {
            builder = builder.header(name, value);
        }

        let response = builder.json(body).send().await.map_err(map_reqwest_error)?;
        let status = response.status().as_u16();

        if status == 429 {
            let retry_after_secs = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok())
                .unwrap_or(5);
            return Err(ProviderError::RateLimited { retry_after_secs });
        }

        if status == 401 || status == 403 {
            return Err(ProviderError::AuthenticationFailed(
                "Invalid API key or insufficient permissions".into(),
            ));
        }

        if status == 404 {
            let error_body = response.text().await.unwrap_or_default();
            return Err(ProviderError::ModelNotFound(error_body));
        }

        if !(200..300).contains(&status) {
            let error_body = response.text().await.unwrap_or_default();
            warn!(provider = %self.provider.name, status, body = %error_body, "Provider returned error");
            return Err(ProviderError::ApiError {
                status_code: status,
                message: error_body,
            });
        }

        Ok(response)
    }

    async fn complete_once(
        &self,
        model: &ModelConfig,
        request: &CompletionRequest,
    ) -> std::result::Result<Completion, ProviderError> {
        let body = Self::build_body(model, request, false);
        debug!(provider = %self.provider.name, model = %model.name, "Sending completion request");

        let response = self.post(&body, &request.extra_headers, false).await?;
        let text = response.text().await.map_err(map_reqwest_error)?;

        Ok(parse_completion(
            &text,
            &model.name,
            &self.provider.reasoning_field_name,
        ))
    }
}

#[async_trait]
impl Backend for OpenAiCompatBackend {
    fn name(&self) -> &str {
        &self.provider.name
    }

    async fn complete(
        &self,
        model: &ModelConfig,
        request: CompletionRequest,
    ) -> std::result::Result<Completion, ProviderError> {
        let mut attempt = 0;
        loop {
            self.limiter.acquire(model.rate_limit_rpm).await;
            match self.complete_once(model, &request).await {
                Err(e) if e.is_transient() && attempt < self.retry.max_retries => {
                    let delay = match &e {
                        ProviderError::RateLimited { retry_after_secs } => {
                            Duration::from_secs(*retry_after_secs).max(self.retry.delay(attempt))
                        }
                        _ => self.retry.delay(attempt),
                    };
                    warn!(
                        provider = %self.provider.name,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Transient backend failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    async fn complete_streaming(
        &self,
        model: &ModelConfig,
        request: CompletionRequest,
    ) -> std::result::Result<ChunkStream, ProviderError> {
        self.limiter.acquire(model.rate_limit_rpm).await;

        let body = Self::build_body(model, &request, true);
        debug!(provider = %self.provider.name, model = %model.name, "Sending streaming request");
        let response = self.post(&body, &request.extra_headers, true).await?;

        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        let reasoning_field = self.provider.reasoning_field_name.clone();
        let provider_name = self.provider.name.clone();

        // Producer: drain the SSE byte stream into the channel
        tokio::spawn(async move {
            let mut byte_stream = response.bytes_stream();
            let mut decoder = SseLineDecoder::default();

            loop {
                let next = tokio::select! {
                    _ = tx.closed() => {
                        debug!(provider = %provider_name, "Stream consumer dropped, stopping reader");
                        return;
                    }
                    next = byte_stream.next() => next,
                };

                let bytes = match next {
                    None => return,
                    Some(Ok(bytes)) => bytes,
                    Some(Err(e)) => {
                        let _ = tx
                            .send(Err(ProviderError::StreamInterrupted(e.to_string())))
                            .await;
                        return;
                    }
                };

                for data in decoder.push(&bytes) {
                    if data == "[DONE]" {
                        return;
                    }
                    match parse_stream_chunk(&data, &reasoning_field) {
                        Some(chunk) => {
                            if tx.send(Ok(chunk)).await.is_err() {
                                return;
                            }
                        }
                        None => trace!(
                            provider = %provider_name,
                            data = %data,
                            "Ignoring unparseable SSE chunk"
                        ),
                    }
                }
            }
        });

        Ok(Box::pin(ReceiverStream::new(rx)))
    }
}

fn map_reqwest_error(e: reqwest::Error) -> ProviderError {
    if e.is_timeout() {
        ProviderError::Timeout(e.to_string())
    } else {
        ProviderError::Network(e.to_string())
    }
}

/// Pick reasoning text from the configured field, then the known fallbacks.
fn extract_reasoning(
    extra: &HashMap<String, serde_json::Value>,
    reasoning_field: &str,
) -> Option<String> {
    std::iter::once(reasoning_field)
        .chain(REASONING_FALLBACKS.iter().copied())
        .find_map(|field| extra.get(field).and_then(|v| v.as_str()))
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Parse a non-streaming response body.
///
/// An unexpected shape becomes an empty assistant message; the loop keeps going.
fn parse_completion(body: &str, model: &str, reasoning_field: &str) -> Completion {
    let parsed = match serde_json::from_str::<ApiResponse>(body) {
        Ok(parsed) => parsed,
        Err(e) => {
            warn!(error = %e, "Malformed completion response, using empty message");
            return empty_completion(model);
        }
    };

    let usage = parsed
        .usage
        .map(|u| Usage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
        })
        .unwrap_or_default();

    let Some(choice) = parsed.choices.into_iter().next() else {
        warn!("Completion response has no choices, using empty message");
        return Completion {
            usage,
            ..empty_completion(model)
        };
    };

    let tool_calls: Vec<MessageToolCall> = choice
        .message
        .tool_calls
        .unwrap_or_default()
        .into_iter()
        .enumerate()
        .map(|(i, tc)| MessageToolCall {
            id: tc.id.unwrap_or_else(|| format!("call_{i}")),
            index: i as u32,
            name: tc.function.name.unwrap_or_default(),
            arguments: tc.function.arguments.unwrap_or_default(),
        })
        .collect();

    let content = choice.message.content.filter(|c| !c.is_empty());
    let mut message = Message::assistant_with_tool_calls(content, tool_calls);
    message.reasoning_content = extract_reasoning(&choice.message.extra, reasoning_field);

    Completion {
        message,
        usage,
        model: parsed.model.unwrap_or_else(|| model.to_string()),
    }
}

fn empty_completion(model: &str) -> Completion {
    Completion {
        message: Message::assistant_with_tool_calls(None, Vec::new()),
        usage: Usage::default(),
        model: model.to_string(),
    }
}

/// Parse one SSE `data:` payload. `None` for unparseable or empty chunks.
fn parse_stream_chunk(data: &str, reasoning_field: &str) -> Option<StreamChunk> {
    let parsed: StreamResponse = serde_json::from_str(data).ok()?;

    let mut chunk = StreamChunk {
        usage: parsed.usage.map(|u| Usage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
        }),
        ..StreamChunk::default()
    };

    if let Some(choice) = parsed.choices.into_iter().next() {
        chunk.content = choice.delta.content.filter(|c| !c.is_empty());
        chunk.reasoning = extract_reasoning(&choice.delta.extra, reasoning_field);
        chunk.finish_reason = choice.finish_reason;
        chunk.tool_calls = choice
            .delta
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(|tc| ToolCallDelta {
                index: tc.index,
                id: tc.id,
                name: tc.function.as_ref().and_then(|f| f.name.clone()),
                arguments: tc.function.and_then(|f| f.arguments),
            })
            .collect();
    }

    let empty = chunk.content.is_none()
        && chunk.reasoning.is_none()
        && chunk.tool_calls.is_empty()
        && !chunk.is_terminal();
    (!empty).then_some(chunk)
}

/// Splits an SSE byte stream into `data:` payloads.
///
/// Bytes are buffered until a full line arrives, so multi-byte characters
/// split across network reads decode correctly.
#[derive(Default)]
struct SseLineDecoder {
    buffer: Vec<u8>,
}

impl SseLineDecoder {
    fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(bytes);
        let mut payloads = Vec::new();

        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line);
            let line = line.trim_end_matches(['\n', '\r']);

            // Skip blank separators and SSE comments
            if line.is_empty() || line.starts_with(':') {
                continue;
            }
            if let Some(data) = line.strip_prefix("data:") {
                payloads.push(data.trim().to_string());
            }
        }
        payloads
    }
}

// --- OpenAI API types (internal) ---

#[derive(Debug, Serialize)]
struct ApiMessage {
    role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<ApiToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
}

#[derive(Debug, Serialize)]
struct ApiToolCall {
    id: String,
    r#type: String,
    function: ApiFunction,
}

#[derive(Debug, Serialize)]
struct ApiFunction {
    name: String,
    arguments: String,
}

#[derive(Debug, Serialize)]
struct ApiToolDefinition {
    r#type: String,
    function: ApiToolFunction,
}

#[derive(Debug, Serialize)]
struct ApiToolFunction {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    model: Option<String>,
    choices: Vec<ApiChoice>,
    #[serde(default)]
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct ApiChoice {
    message: ApiResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ApiResponseMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ApiResponseToolCall>>,
    /// Provider-specific fields, including reasoning
    #[serde(flatten)]
    extra: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct ApiResponseToolCall {
    #[serde(default)]
    id: Option<String>,
    function: ApiFunctionDelta,
}

#[derive(Debug, Deserialize)]
struct ApiUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

// --- Streaming SSE types ---

/// A single SSE `data: {...}` chunk from a streaming response.
#[derive(Debug, Deserialize)]
struct StreamResponse {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<StreamToolCallDelta>>,
    #[serde(flatten)]
    extra: HashMap<String, serde_json::Value>,
}

/// A tool call delta — arrives incrementally across chunks.
#[derive(Debug, Deserialize)]
struct StreamToolCallDelta {
    index: u32,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<ApiFunctionDelta>,
}

#[derive(Debug, Deserialize)]
struct ApiFunctionDelta {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}
