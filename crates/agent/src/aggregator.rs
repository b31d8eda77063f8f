//! Streaming aggregation — folds response chunks into one assistant message.
//!
//! Content and reasoning concatenate in arrival order. Tool-call deltas merge
//! by index: the first delta at an index opens a slot, later deltas append
//! argument text, and id/name come from whichever delta supplies them first.

use hacxgent_core::message::{Message, MessageToolCall};
use hacxgent_core::provider::{StreamChunk, Usage};
use std::collections::BTreeMap;

#[derive(Debug, Default)]
struct ToolCallSlot {
    id: Option<String>,
    name: Option<String>,
    arguments: String,
}

/// The reassembled response.
#[derive(Debug, Clone)]
pub struct Aggregated {
    pub message: Message,
    pub usage: Usage,
    pub finish_reason: Option<String>,
}

#[derive(Debug, Default)]
pub struct StreamAggregator {
    content: String,
    reasoning: String,
    slots: BTreeMap<u32, ToolCallSlot>,
    usage: Option<Usage>,
    finish_reason: Option<String>,
}

impl StreamAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &StreamChunk) {
        if let Some(text) = &chunk.content {
            self.content.push_str(text);
        }
        if let Some(text) = &chunk.reasoning {
            self.reasoning.push_str(text);
        }
        for delta in &chunk.tool_calls {
            let slot = self.slots.entry(delta.index).or_default();
            if slot.id.is_none()
                && let Some(id) = delta.id.as_ref().filter(|s| !s.is_empty())
            {
                slot.id = Some(id.clone());
            }
            if slot.name.is_none()
                && let Some(name) = delta.name.as_ref().filter(|s| !s.is_empty())
            {
                slot.name = Some(name.clone());
            }
            if let Some(fragment) = &delta.arguments {
                slot.arguments.push_str(fragment);
            }
        }
        if let Some(usage) = chunk.usage {
            self.usage = Some(usage);
        }
        if chunk.finish_reason.is_some() {
            self.finish_reason = chunk.finish_reason.clone();
        }
    }

    /// True once a usage record or finish reason has been seen.
    pub fn is_complete(&self) -> bool {
        self.usage.is_some() || self.finish_reason.is_some()
    }

    /// Emit the final message. Consumes the aggregator so it happens once.
    pub fn finish(self) -> Aggregated {
        let tool_calls: Vec<MessageToolCall> = self
            .slots
            .into_iter()
            .map(|(index, slot)| MessageToolCall {
                id: slot.id.unwrap_or_else(|| format!("call_{index}")),
                index,
                name: slot.name.unwrap_or_default(),
                arguments: slot.arguments,
            })
            .collect();

        let content = if self.content.is_empty() && !tool_calls.is_empty() {
            None
        } else {
            Some(self.content)
        };
        let mut message = Message::assistant_with_tool_calls(content, tool_calls);
        if !self.reasoning.is_empty() {
            message.reasoning_content = Some(self.reasoning);
        }

        Aggregated {
            message,
            usage: self.usage.unwrap_or_default(),
            finish_reason: self.finish_reason,
        }
    }
}
