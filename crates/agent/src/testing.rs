//! Test doubles: a scripted backend and a counting tool.
//!
//! Built for this crate's unit tests, and for other test code through the
//! `testing` feature.

use async_trait::async_trait;
use futures::StreamExt;
use hacxgent_core::error::{ProviderError, ToolError};
use hacxgent_core::message::MessageToolCall;
use hacxgent_core::model::ModelConfig;
use hacxgent_core::provider::{
    Backend, ChunkStream, Completion, CompletionRequest, StreamChunk, ToolCallDelta, Usage,
};
use hacxgent_core::tool::{InvokeContext, Tool, ToolConfig, ToolPermission, ToolResult};
use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::aggregator::StreamAggregator;

/// One scripted backend response.
#[derive(Debug, Clone)]
pub enum Scripted {
    /// Yield these chunks, then end.
    Chunks(Vec<StreamChunk>),
    /// Yield these chunks, then fail mid-stream.
    FailAfter(Vec<StreamChunk>, ProviderError),
    /// Yield these chunks, then never finish.
    Hang(Vec<StreamChunk>),
    /// Refuse the request outright.
    Reject(ProviderError),
}

/// A backend that returns scripted responses in order.
///
/// Both `complete` and `complete_streaming` consume the next script entry;
/// an exhausted script yields a `Malformed` error.
pub struct ScriptedBackend {
    script: Mutex<VecDeque<Scripted>>,
    requests: Mutex<Vec<CompletionRequest>>,
    repeat_last: bool,
}

impl ScriptedBackend {
    pub fn new(script: Vec<Scripted>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            requests: Mutex::new(Vec::new()),
            repeat_last: false,
        }
    }

    /// Keep returning the final entry once the script runs out.
    pub fn repeating(mut self) -> Self {
        self.repeat_last = true;
        self
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().map(|r| r.len()).unwrap_or(0)
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }

    fn next(&self, request: CompletionRequest) -> Scripted {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request);
        }
        let Ok(mut script) = self.script.lock() else {
            return Scripted::Reject(ProviderError::Malformed("script poisoned".into()));
        };
        match (script.len(), self.repeat_last) {
            (0, _) => Scripted::Reject(ProviderError::Malformed("script exhausted".into())),
            (1, true) => script[0].clone(),
            _ => script.pop_front().unwrap_or_else(|| {
                Scripted::Reject(ProviderError::Malformed("script exhausted".into()))
            }),
        }
    }
}

#[async_trait]
impl Backend for ScriptedBackend {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(
        &self,
        model: &ModelConfig,
        request: CompletionRequest,
    ) -> Result<Completion, ProviderError> {
        let chunks = match self.next(request) {
            Scripted::Chunks(chunks) => chunks,
            Scripted::FailAfter(_, e) | Scripted::Reject(e) => return Err(e),
            Scripted::Hang(_) => std::future::pending::<Vec<StreamChunk>>().await,
        };
        let mut aggregator = StreamAggregator::new();
        for chunk in &chunks {
            aggregator.push(chunk);
        }
        let out = aggregator.finish();
        Ok(Completion {
            message: out.message,
            usage: out.usage,
            model: model.name.clone(),
        })
    }

    async fn complete_streaming(
        &self,
        _model: &ModelConfig,
        request: CompletionRequest,
    ) -> Result<ChunkStream, ProviderError> {
        match self.next(request) {
            Scripted::Chunks(chunks) => Ok(futures::stream::iter(chunks.into_iter().map(Ok)).boxed()),
            Scripted::FailAfter(chunks, e) => Ok(futures::stream::iter(chunks.into_iter().map(Ok))
                .chain(futures::stream::once(async move { Err(e) }))
                .boxed()),
            Scripted::Hang(chunks) => Ok(futures::stream::iter(chunks.into_iter().map(Ok))
                .chain(futures::stream::pending())
                .boxed()),
            Scripted::Reject(e) => Err(e),
        }
    }
}

fn usage_chunk(finish: &str) -> StreamChunk {
    StreamChunk {
        finish_reason: Some(finish.into()),
        usage: Some(Usage {
            prompt_tokens: 10,
            completion_tokens: 5,
        }),
        ..Default::default()
    }
}

/// A plain text answer, streamed in two pieces.
pub fn text_response(text: &str) -> Scripted {
    let mid = (0..=text.len() / 2)
        .rev()
        .find(|&i| text.is_char_boundary(i))
        .unwrap_or(0);
    Scripted::Chunks(vec![
        StreamChunk {
            content: Some(text[..mid].to_string()),
            ..Default::default()
        },
        StreamChunk {
            content: Some(text[mid..].to_string()),
            ..Default::default()
        },
        usage_chunk("stop"),
    ])
}

/// An assistant message requesting the given calls, arguments split in two.
pub fn tool_call_response(calls: &[(&str, &str, &str)]) -> Scripted {
    let mut chunks = Vec::new();
    for (index, (id, name, arguments)) in calls.iter().enumerate() {
        let mid = arguments.len() / 2;
        let (head, tail) = if arguments.is_char_boundary(mid) {
            arguments.split_at(mid)
        } else {
            (*arguments, "")
        };
        chunks.push(StreamChunk {
            tool_calls: vec![ToolCallDelta {
                index: index as u32,
                id: Some(id.to_string()),
                name: Some(name.to_string()),
                arguments: Some(head.to_string()),
            }],
            ..Default::default()
        });
        chunks.push(StreamChunk {
            tool_calls: vec![ToolCallDelta {
                index: index as u32,
                arguments: Some(tail.to_string()),
                ..Default::default()
            }],
            ..Default::default()
        });
    }
    chunks.push(usage_chunk("tool_calls"));
    Scripted::Chunks(chunks)
}

/// A model config with the given per-million prices.
pub fn model(input_price: f64, output_price: f64) -> ModelConfig {
    let mut model = ModelConfig::new("scripted-model", "scripted");
    model.alias = "scripted".into();
    model.input_price = input_price;
    model.output_price = output_price;
    model
}

/// A tool call as it appears on an assistant message.
pub fn call(id: &str, name: &str, arguments: &str) -> MessageToolCall {
    MessageToolCall {
        id: id.into(),
        index: 0,
        name: name.into(),
        arguments: arguments.into(),
    }
}

/// A tool that counts its invocations and answers `ran <name>`.
pub struct CountingTool {
    name: String,
    permission: ToolPermission,
    delay: Option<Duration>,
    panics: bool,
    invocations: AtomicUsize,
}

impl CountingTool {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.into(),
            permission: ToolPermission::Always,
            delay: None,
            panics: false,
            invocations: AtomicUsize::new(0),
        }
    }

    pub fn with_permission(mut self, permission: ToolPermission) -> Self {
        self.permission = permission;
        self
    }

    pub fn with_delay_ms(mut self, ms: u64) -> Self {
        self.delay = Some(Duration::from_millis(ms));
        self
    }

    pub fn panicking(mut self) -> Self {
        self.panics = true;
        self
    }

    pub fn invocations(&self) -> usize {
        self.invocations.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Tool for CountingTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "Counts how often it runs"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({"type": "object", "properties": {}})
    }

    fn config(&self) -> ToolConfig {
        ToolConfig::with_permission(self.permission)
    }

    async fn execute(
        &self,
        _arguments: serde_json::Value,
        ctx: &InvokeContext,
    ) -> Result<ToolResult, ToolError> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        if self.panics {
            panic!("{} blew up", self.name);
        }
        if let Some(delay) = self.delay {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = ctx.cancel.cancelled() => return Err(ToolError::Cancelled(self.name.clone())),
            }
        }
        Ok(ToolResult::text(format!("ran {}", self.name)))
    }
}
