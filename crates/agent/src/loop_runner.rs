//! The agent loop — drives turns between the model and the tools.
//!
//! One call to [`AgentLoop::submit`] is one user interaction:
//!
//! 1. **Compact** older history if it crossed a threshold
//! 2. **Stage** the user message
//! 3. **Stream** a response from the backend and aggregate it
//! 4. **If tool calls**: execute them, stage the results in call order,
//!    and go back to step 3
//! 5. **Otherwise**: commit the interaction and return the text
//!
//! Every backend round-trip is one turn against the budget. Staged messages
//! join the conversation (and are persisted and reported) only when the
//! interaction ends normally or on a budget stop. Cancellation, backend
//! failures and dropping the event stream all leave the conversation where
//! it stood before the user message.

use chrono::Utc;
use futures::{FutureExt, Stream, StreamExt};
use hacxgent_config::{AppConfig, resolve_system_prompt};
use hacxgent_core::error::{ConversationLimit, Error, ProviderError};
use hacxgent_core::event::{DomainEvent, EventBus};
use hacxgent_core::message::{Conversation, Message, Role};
use hacxgent_core::model::ModelConfig;
use hacxgent_core::provider::{Backend, CompletionRequest};
use hacxgent_core::session::SessionLog;
use hacxgent_core::tool::ToolRegistry;
use hacxgent_providers::BackendRouter;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::aggregator::{Aggregated, StreamAggregator};
use crate::approval::{ApprovalBroker, ApprovalDecision};
use crate::budget::{Budget, Limits};
use crate::compaction::{CompactionPlan, CompactionSettings, Compactor};
use crate::executor::{PermissionPolicy, ToolExecutor};
use crate::stream_event::{AgentEvent, EventSink};

/// How an interaction ended.
#[derive(Debug)]
enum Outcome {
    Done(String),
    Limit(ConversationLimit),
    Cancelled,
    Failed(Error),
}

/// Why a streamed response did not complete.
enum Interrupted {
    Cancelled,
    Provider(ProviderError),
}

/// Cross-task control of a running loop: cancel the current interaction
/// and answer approval requests.
#[derive(Clone, Debug)]
pub struct LoopHandle {
    cancel: Arc<Mutex<CancellationToken>>,
    broker: ApprovalBroker,
}

impl LoopHandle {
    /// Cancel the interaction in flight, if any.
    pub fn cancel(&self) {
        if let Ok(token) = self.cancel.lock() {
            token.cancel();
        }
    }

    /// Answer a pending approval. False if nothing waits on `call_id`.
    pub fn approve(&self, call_id: &str, decision: ApprovalDecision) -> bool {
        self.broker.respond(call_id, decision)
    }

    pub fn pending_approvals(&self) -> Vec<String> {
        self.broker.pending()
    }
}

/// Enable/disable pattern pairs, applied in order to every tool set.
type ToolFilters = Vec<(Vec<String>, Vec<String>)>;

/// The core agent loop that orchestrates backend calls and tool execution.
pub struct AgentLoop {
    backend: Arc<dyn Backend>,
    model: ModelConfig,
    executor: Arc<ToolExecutor>,
    system_prompt: String,
    tool_filters: ToolFilters,
    conversation: Conversation,
    compactor: Compactor,
    budget: Budget,
    session_log: Option<Arc<dyn SessionLog>>,
    events: EventBus,
    cancel: Arc<Mutex<CancellationToken>>,
}

impl AgentLoop {
    /// Create a loop whose conversation starts with `system_prompt` plus the
    /// extra instructions of every visible tool.
    pub fn new(
        backend: Arc<dyn Backend>,
        model: ModelConfig,
        executor: ToolExecutor,
        system_prompt: &str,
    ) -> Self {
        let mut conversation = Conversation::new();
        conversation.push(Message::system(system_message(system_prompt, &executor)));
        Self {
            backend,
            model,
            executor: Arc::new(executor),
            system_prompt: system_prompt.to_string(),
            tool_filters: Vec::new(),
            conversation,
            compactor: Compactor::new(CompactionSettings::default()),
            budget: Budget::default(),
            session_log: None,
            events: EventBus::default(),
            cancel: Arc::new(Mutex::new(CancellationToken::new())),
        }
    }

    /// Wire a loop from validated configuration.
    ///
    /// `registry` holds every candidate tool; the configured and agent-level
    /// enable/disable lists decide which of them the model sees.
    pub fn from_config(
        config: &AppConfig,
        router: &BackendRouter,
        registry: ToolRegistry,
        events: EventBus,
    ) -> Result<Self, Error> {
        let model = config.get_active_model()?.clone();
        let backend = router.for_model(&model)?;
        let profile = config.agent_profile()?;

        let system_prompt = match &profile.system_prompt_id {
            Some(id) => resolve_system_prompt(
                id,
                &[AppConfig::project_prompts_dir(), AppConfig::global_prompts_dir()],
            )?,
            None => config.system_prompt()?,
        };

        let tool_filters = vec![
            (config.enabled_tools.clone(), config.disabled_tools.clone()),
            (profile.enabled_tools.clone(), profile.disabled_tools.clone()),
        ];
        let registry = apply_filters(registry, &tool_filters);
        info!(
            model = %model.alias(),
            agent = %profile.name,
            tools = ?registry.names(),
            "Agent loop configured"
        );

        let executor = ToolExecutor::new(registry, PermissionPolicy::new(profile, &config.tools))
            .with_max_concurrency(config.max_tool_concurrency)
            .with_event_bus(events.clone());

        let mut agent = Self::new(backend, model, executor, &system_prompt)
            .with_compaction(CompactionSettings::from_config(config))
            .with_event_bus(events);
        agent.tool_filters = tool_filters;
        Ok(agent)
    }

    pub fn with_compaction(mut self, settings: CompactionSettings) -> Self {
        self.compactor = Compactor::new(settings);
        self
    }

    pub fn with_limits(mut self, limits: Limits) -> Self {
        self.budget = Budget::new(limits);
        self
    }

    pub fn with_session_log(mut self, log: Arc<dyn SessionLog>) -> Self {
        self.session_log = Some(log);
        self
    }

    pub fn with_event_bus(mut self, events: EventBus) -> Self {
        self.events = events;
        self
    }

    /// Continue from a saved session. Its system messages are dropped in
    /// favour of this loop's own.
    pub fn seed(&mut self, messages: Vec<Message>) {
        let kept: Vec<Message> = messages
            .into_iter()
            .filter(|m| m.role != Role::System)
            .collect();
        debug!(count = kept.len(), "Seeding conversation from saved session");
        self.compactor.note_committed(kept.len());
        for message in kept {
            self.conversation.push(message);
        }
    }

    pub fn handle(&self) -> LoopHandle {
        LoopHandle {
            cancel: Arc::clone(&self.cancel),
            broker: self.executor.broker(),
        }
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    pub fn budget(&self) -> &Budget {
        &self.budget
    }

    pub fn model(&self) -> &ModelConfig {
        &self.model
    }

    pub fn executor(&self) -> &ToolExecutor {
        &self.executor
    }

    /// Swap in a new tool set, e.g. after the remote servers were reloaded.
    ///
    /// The enable/disable lists the loop was configured with still apply,
    /// and the system message is rebuilt from the new tools' prompts.
    pub fn refresh_tools(&mut self, registry: ToolRegistry) {
        let registry = apply_filters(registry, &self.tool_filters);
        info!(tools = ?registry.names(), "Tool set refreshed");
        self.executor.replace_registry(registry);

        let system = Message::system(system_message(&self.system_prompt, &self.executor));
        if let Some(first) = self.conversation.messages.first_mut()
            && first.role == Role::System
        {
            *first = system;
        }
    }

    /// Submit user input; the returned stream drives the interaction.
    ///
    /// It yields progress events and ends with exactly one final event
    /// (`Done`, `LimitReached`, `Cancelled` or `Error`). Nothing happens
    /// until the stream is polled, and `&mut self` keeps a second submission
    /// out until this one is dropped.
    pub fn submit(
        &mut self,
        text: impl Into<String>,
    ) -> impl Stream<Item = AgentEvent> + Send + '_ {
        let text = text.into();
        let (tx, rx) = mpsc::unbounded_channel();
        let driver = async move {
            let outcome = self.interact(text, &tx).await;
            let _ = tx.send(self.final_event(outcome));
        }
        .into_stream()
        .filter_map(|()| futures::future::ready(None::<AgentEvent>));

        futures::stream::select(driver, UnboundedReceiverStream::new(rx))
    }

    /// Single-shot mode: run `prompt` under `limits` and return the final
    /// text. Budget stops surface as [`Error::Limit`].
    pub async fn run_programmatic(
        &mut self,
        prompt: impl Into<String>,
        limits: Limits,
        sink: &EventSink,
    ) -> Result<String, Error> {
        self.budget = Budget::new(limits);
        match self.interact(prompt.into(), sink).await {
            Outcome::Done(text) => Ok(text),
            Outcome::Limit(limit) => Err(Error::Limit(limit)),
            Outcome::Cancelled => Err(Error::Cancelled),
            Outcome::Failed(e) => Err(e),
        }
    }

    /// Close the backend's connections.
    pub async fn close(&self) {
        self.backend.close().await;
    }

    fn final_event(&self, outcome: Outcome) -> AgentEvent {
        match outcome {
            Outcome::Done(text) => AgentEvent::Done {
                text,
                turns: self.budget.turns_used(),
                usage: self.budget.usage(),
                cost: self.budget.spent(),
            },
            Outcome::Limit(limit) => AgentEvent::LimitReached {
                reason: limit.to_string(),
            },
            Outcome::Cancelled => AgentEvent::Cancelled,
            Outcome::Failed(e) => AgentEvent::Error {
                message: e.to_string(),
            },
        }
    }

    /// A fresh token per interaction so an old cancel does not leak in.
    fn reset_cancel(&self) -> CancellationToken {
        let token = CancellationToken::new();
        if let Ok(mut current) = self.cancel.lock() {
            *current = token.clone();
        }
        token
    }

    async fn interact(&mut self, text: String, sink: &EventSink) -> Outcome {
        let cancel = self.reset_cancel();

        if self.maybe_compact(&cancel, sink).await.is_err() {
            return Outcome::Cancelled;
        }

        // Messages of this interaction live here until commit, so a future
        // dropped mid-turn never leaves half a turn in the conversation.
        let mut staged = vec![Message::user(text)];

        loop {
            let tools = self.executor.definitions();
            let mut messages = self.conversation.messages.clone();
            messages.extend(staged.iter().cloned());
            let estimated = self
                .backend
                .count_tokens(&self.model, &messages, &tools)
                .await;

            if let Err(limit) = self.budget.check(&self.model, estimated) {
                warn!(reason = %limit, "Conversation limit reached");
                self.events.publish(DomainEvent::LimitReached {
                    reason: limit.to_string(),
                    timestamp: Utc::now(),
                });
                self.commit(staged, sink).await;
                return Outcome::Limit(limit);
            }

            let request = CompletionRequest::new(messages, tools);
            let response = match self.stream_response(request, &cancel, sink).await {
                Ok(response) => response,
                Err(Interrupted::Cancelled) => {
                    info!("Interaction cancelled; discarding it");
                    return Outcome::Cancelled;
                }
                Err(Interrupted::Provider(e)) => {
                    warn!(error = %e, "Backend call failed; discarding the interaction");
                    self.events.publish(DomainEvent::ErrorOccurred {
                        context: format!("backend call for model {}", self.model.alias()),
                        error_message: e.to_string(),
                        timestamp: Utc::now(),
                    });
                    return Outcome::Failed(Error::Provider(e));
                }
            };

            self.budget.record(&self.model, response.usage);
            self.events.publish(DomainEvent::TurnCompleted {
                turn: self.budget.turns_used(),
                model: self.model.alias().to_string(),
                prompt_tokens: response.usage.prompt_tokens,
                completion_tokens: response.usage.completion_tokens,
                timestamp: Utc::now(),
            });

            let message = response.message;
            if !message.has_tool_calls() {
                let text = message.text().to_string();
                staged.push(message);
                self.commit(staged, sink).await;
                return Outcome::Done(text);
            }

            for call in &message.tool_calls {
                let _ = sink.send(AgentEvent::ToolCall {
                    id: call.id.clone(),
                    name: call.name.clone(),
                    arguments: call.arguments.clone(),
                });
            }
            let calls = message.tool_calls.clone();
            staged.push(message);

            let results = self.executor.execute_all(&calls, &cancel, sink).await;
            if cancel.is_cancelled() {
                info!("Interaction cancelled during tool execution; discarding it");
                return Outcome::Cancelled;
            }
            staged.extend(results);
        }
    }

    /// One backend round-trip, streamed into the aggregator.
    async fn stream_response(
        &self,
        request: CompletionRequest,
        cancel: &CancellationToken,
        sink: &EventSink,
    ) -> Result<Aggregated, Interrupted> {
        let started = tokio::select! {
            _ = cancel.cancelled() => return Err(Interrupted::Cancelled),
            started = self.backend.complete_streaming(&self.model, request) => started,
        };
        let mut stream = match started {
            Ok(stream) => stream,
            Err(e) => return malformed_as_empty(e),
        };

        let mut aggregator = StreamAggregator::new();
        loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => return Err(Interrupted::Cancelled),
                next = stream.next() => next,
            };
            match next {
                Some(Ok(chunk)) => {
                    if let Some(content) = chunk.content.as_ref().filter(|c| !c.is_empty()) {
                        let _ = sink.send(AgentEvent::Chunk {
                            content: content.clone(),
                        });
                    }
                    if let Some(reasoning) = chunk.reasoning.as_ref().filter(|r| !r.is_empty()) {
                        let _ = sink.send(AgentEvent::Reasoning {
                            content: reasoning.clone(),
                        });
                    }
                    aggregator.push(&chunk);
                }
                Some(Err(e)) => return malformed_as_empty(e),
                None => break,
            }
        }
        if !aggregator.is_complete() {
            return Err(Interrupted::Provider(ProviderError::StreamInterrupted(
                "stream ended before the response completed".into(),
            )));
        }
        Ok(aggregator.finish())
    }

    async fn maybe_compact(
        &mut self,
        cancel: &CancellationToken,
        sink: &EventSink,
    ) -> Result<(), Interrupted> {
        let tools = self.executor.definitions();
        let tokens = self
            .backend
            .count_tokens(&self.model, &self.conversation.messages, &tools)
            .await;
        if !self.compactor.should_compact(tokens) {
            return Ok(());
        }
        if let Err(limit) = self.budget.check_price(&self.model, tokens) {
            debug!(reason = %limit, "Skipping compaction; it would exceed the price budget");
            return Ok(());
        }

        debug!(
            tokens,
            since_last = self.compactor.messages_since_last(),
            "Compacting conversation"
        );
        let summarized = tokio::select! {
            _ = cancel.cancelled() => return Err(Interrupted::Cancelled),
            summarized = self.compactor.summarize(
                self.backend.as_ref(),
                &self.model,
                &self.conversation.messages,
            ) => summarized,
        };

        let failure = match summarized {
            Ok(None) => return Ok(()),
            Ok(Some(plan)) => {
                self.budget.record_extra(&self.model, plan.usage);
                self.compact_with(plan, sink)
            }
            Err(e) => Some(e.to_string()),
        };

        if let Some(failure) = failure {
            warn!(error = %failure, "Compaction failed; history left unchanged");
            self.events.publish(DomainEvent::CompactionFailed {
                error_message: failure,
                timestamp: Utc::now(),
            });
        }
        Ok(())
    }

    /// Swap the summary in. Returns the failure, if the swap was refused.
    fn compact_with(&mut self, plan: CompactionPlan, sink: &EventSink) -> Option<String> {
        let report = match self.compactor.apply(&mut self.conversation, plan) {
            Ok(report) => report,
            Err(violation) => return Some(violation.to_string()),
        };
        info!(
            replaced = report.replaced_messages,
            tokens_before = report.tokens_before,
            tokens_after = report.tokens_after,
            "Conversation compacted"
        );
        self.events.publish(DomainEvent::CompactionPerformed {
            replaced_messages: report.replaced_messages,
            tokens_before: report.tokens_before,
            tokens_after: report.tokens_after,
            timestamp: Utc::now(),
        });
        let _ = sink.send(AgentEvent::Compacted {
            replaced_messages: report.replaced_messages,
            tokens_before: report.tokens_before,
            tokens_after: report.tokens_after,
        });
        None
    }

    /// Append the staged messages, then report and persist them.
    async fn commit(&mut self, staged: Vec<Message>, sink: &EventSink) {
        let from = self.conversation.len();
        self.compactor.note_committed(staged.len());
        for message in staged {
            self.conversation.push(message);
        }

        for message in &self.conversation.messages[from..] {
            if let Some(log) = &self.session_log
                && let Err(e) = log.append(message).await
            {
                warn!(error = %e, "Failed to write session log");
            }
            let _ = sink.send(AgentEvent::Committed {
                message: message.clone(),
            });
        }
    }
}

/// Malformed responses become an empty assistant message; anything else
/// interrupts the interaction.
fn malformed_as_empty(e: ProviderError) -> Result<Aggregated, Interrupted> {
    match e {
        ProviderError::Malformed(reason) => {
            warn!(%reason, "Malformed backend response; treating as empty");
            Ok(StreamAggregator::new().finish())
        }
        other => Err(Interrupted::Provider(other)),
    }
}

fn apply_filters(registry: ToolRegistry, filters: &ToolFilters) -> ToolRegistry {
    filters
        .iter()
        .fold(registry, |registry, (enabled, disabled)| {
            registry.filtered(enabled, disabled)
        })
}

/// The system prompt followed by each visible tool's extra instructions.
fn system_message(prompt: &str, executor: &ToolExecutor) -> String {
    let mut prompts = executor.tool_prompts();
    if prompts.is_empty() {
        return prompt.to_string();
    }
    prompts.sort();
    let mut text = format!("{}\n\n# Tools\n", prompt.trim_end());
    for (name, instructions) in prompts {
        text.push_str(&format!("\n## {name}\n\n{}\n", instructions.trim()));
    }
    text
}
