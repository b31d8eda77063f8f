//! Conversation compaction — summarizes older history when it grows.
//!
//! The compactor picks a contiguous range of the oldest non-system messages,
//! asks the backend for a handoff summary, and swaps the range for one
//! summary message. Range edges never split an assistant tool-call group.

use hacxgent_config::AppConfig;
use hacxgent_core::error::ProviderError;
use hacxgent_core::message::{Conversation, Message, PairingViolation, Role};
use hacxgent_core::model::ModelConfig;
use hacxgent_core::provider::{Backend, CompletionRequest, Usage};
use std::ops::Range;
use tracing::debug;

pub const SUMMARY_PREFIX: &str =
    "The earlier part of this conversation was compacted. Summary of what happened so far:";

pub const SUMMARIZATION_PROMPT: &str = "You are performing a CONTEXT CHECKPOINT COMPACTION. Create a handoff summary for another model that will resume the task.\n\nInclude:\n- Current progress and key decisions made\n- Important context, constraints, or user preferences\n- What remains to be done (clear next steps)\n- File paths, identifiers and other data needed to continue\n\nBe concise and structured.";

/// Thresholds that decide when and how much to compact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompactionSettings {
    /// Compact whenever the estimate exceeds this many tokens.
    pub auto_compact_threshold: usize,
    /// Compact once more than this many messages were committed since the
    /// last compaction.
    pub interval: usize,
    pub token_threshold: usize,
    /// Newest messages always kept verbatim.
    pub keep_recent: usize,
}

impl CompactionSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            auto_compact_threshold: config.auto_compact_threshold,
            interval: config.compaction_interval,
            token_threshold: config.compaction_token_threshold,
            keep_recent: config.compaction_keep_recent,
        }
    }
}

impl Default for CompactionSettings {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

/// A summary ready to be swapped in.
#[derive(Debug, Clone)]
pub struct CompactionPlan {
    pub range: Range<usize>,
    pub summary: Message,
    /// What the summarization call cost.
    pub usage: Usage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompactionReport {
    pub replaced_messages: usize,
    pub tokens_before: usize,
    pub tokens_after: usize,
}

#[derive(Debug)]
pub struct Compactor {
    settings: CompactionSettings,
    since_last: usize,
}

impl Compactor {
    pub fn new(settings: CompactionSettings) -> Self {
        Self {
            settings,
            since_last: 0,
        }
    }

    pub fn settings(&self) -> CompactionSettings {
        self.settings
    }

    /// Count messages committed since the last successful compaction.
    pub fn note_committed(&mut self, count: usize) {
        self.since_last += count;
    }

    pub fn messages_since_last(&self) -> usize {
        self.since_last
    }

    /// Any one threshold is enough.
    pub fn should_compact(&self, estimated_tokens: usize) -> bool {
        estimated_tokens > self.settings.auto_compact_threshold
            || self.since_last > self.settings.interval
            || estimated_tokens > self.settings.token_threshold
    }

    /// Ask the backend to summarize the compactable range.
    ///
    /// `Ok(None)` means there is nothing worth compacting.
    pub async fn summarize(
        &self,
        backend: &dyn Backend,
        model: &ModelConfig,
        messages: &[Message],
    ) -> Result<Option<CompactionPlan>, ProviderError> {
        let Some(range) = select_range(messages, self.settings.keep_recent) else {
            return Ok(None);
        };

        let mut request_messages = messages[range.clone()].to_vec();
        request_messages.push(Message::user(SUMMARIZATION_PROMPT));
        let completion = backend
            .complete(model, CompletionRequest::new(request_messages, Vec::new()))
            .await?;

        let text = completion.message.text().trim();
        if text.is_empty() {
            return Err(ProviderError::Malformed("summary was empty".into()));
        }

        let mut summary = Message::user(format!("{SUMMARY_PREFIX}\n\n{text}"));
        summary
            .metadata
            .insert("compacted".into(), serde_json::Value::Bool(true));
        summary
            .metadata
            .insert("replaced_messages".into(), serde_json::json!(range.len()));
        debug!(range = ?range, "Summary produced");
        Ok(Some(CompactionPlan {
            range,
            summary,
            usage: completion.usage,
        }))
    }

    /// Swap the summarized range for its summary, all or nothing.
    pub fn apply(
        &mut self,
        conversation: &mut Conversation,
        plan: CompactionPlan,
    ) -> Result<CompactionReport, PairingViolation> {
        let tokens_before = conversation.estimated_tokens();
        let replaced_messages = plan.range.len();
        conversation.replace_range(plan.range, plan.summary)?;
        self.since_last = 0;
        Ok(CompactionReport {
            replaced_messages,
            tokens_before,
            tokens_after: conversation.estimated_tokens(),
        })
    }
}

/// The oldest non-system messages, minus the `keep_recent` newest, with both
/// edges moved outward past any tool-call group they would split.
pub fn select_range(messages: &[Message], keep_recent: usize) -> Option<Range<usize>> {
    let first = messages.iter().position(|m| m.role != Role::System)?;
    let mut start = first;
    let mut end = messages.len().saturating_sub(keep_recent).max(start);

    while start > 0 && messages[start].role == Role::Tool {
        start -= 1;
    }
    while end < messages.len() && messages[end].role == Role::Tool {
        end += 1;
    }

    // Replacing fewer than two messages with one saves nothing.
    (end - start >= 2).then_some(start..end)
}
