//! Tool executor — resolves calls, gates them on permission, runs them,
//! and turns every outcome into exactly one tool-role message.

use chrono::Utc;
use futures::{FutureExt, StreamExt};
use hacxgent_core::agent::AgentProfile;
use hacxgent_core::error::ToolError;
use hacxgent_core::event::{DomainEvent, EventBus};
use hacxgent_core::message::{Message, MessageToolCall};
use hacxgent_core::provider::ToolDefinition;
use hacxgent_core::tool::{
    InvokeContext, Tool, ToolConfig, ToolEvent, ToolPermission, ToolRegistry, ToolResult,
};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::approval::{ApprovalBroker, ApprovalDecision};
use crate::stream_event::{AgentEvent, EventSink};

/// Resolves the effective permission of a tool.
///
/// Precedence: an "approve always" decision made during this session, then
/// the agent profile, then the per-tool configuration, then the tool's own
/// built-in default.
#[derive(Debug, Default)]
pub struct PermissionPolicy {
    profile: AgentProfile,
    overrides: HashMap<String, ToolPermission>,
    upgraded: Mutex<HashSet<String>>,
}

impl PermissionPolicy {
    pub fn new(profile: AgentProfile, tools: &HashMap<String, ToolConfig>) -> Self {
        Self {
            profile,
            overrides: tools
                .iter()
                .map(|(name, config)| (name.clone(), config.permission))
                .collect(),
            upgraded: Mutex::new(HashSet::new()),
        }
    }

    pub fn resolve(&self, tool: &dyn Tool) -> ToolPermission {
        let name = tool.name();
        let upgraded = self
            .upgraded
            .lock()
            .map(|u| u.contains(name))
            .unwrap_or(false);
        if upgraded {
            return ToolPermission::Always;
        }
        self.profile
            .permission_for(name)
            .or_else(|| self.overrides.get(name).copied())
            .unwrap_or_else(|| tool.config().permission)
    }

    /// Stop asking for `tool` for the rest of this policy's life.
    pub fn always_allow(&self, tool: &str) {
        if let Ok(mut upgraded) = self.upgraded.lock() {
            upgraded.insert(tool.to_string());
        }
    }

    pub fn profile(&self) -> &AgentProfile {
        &self.profile
    }
}

/// Why a call produced no tool output.
#[derive(Debug)]
enum Refusal {
    Denied(String),
    Failed(ToolError),
}

pub struct ToolExecutor {
    registry: RwLock<ToolRegistry>,
    policy: PermissionPolicy,
    broker: ApprovalBroker,
    max_concurrency: usize,
    events: EventBus,
}

impl ToolExecutor {
    pub fn new(registry: ToolRegistry, policy: PermissionPolicy) -> Self {
        Self {
            registry: RwLock::new(registry),
            policy,
            broker: ApprovalBroker::new(),
            max_concurrency: 4,
            events: EventBus::default(),
        }
    }

    pub fn with_max_concurrency(mut self, max: usize) -> Self {
        self.max_concurrency = max.max(1);
        self
    }

    pub fn with_event_bus(mut self, events: EventBus) -> Self {
        self.events = events;
        self
    }

    /// Snapshot of the current registry.
    pub fn registry(&self) -> ToolRegistry {
        self.registry
            .read()
            .map(|r| r.clone())
            .unwrap_or_default()
    }

    /// Swap in a new set of tools. Calls already dispatched keep the tool
    /// they resolved.
    pub fn replace_registry(&self, registry: ToolRegistry) {
        if let Ok(mut current) = self.registry.write() {
            debug!(tools = ?registry.names(), "Tool registry replaced");
            *current = registry;
        }
    }

    pub fn policy(&self) -> &PermissionPolicy {
        &self.policy
    }

    pub fn broker(&self) -> ApprovalBroker {
        self.broker.clone()
    }

    /// Catalog sent to the model: available tools only.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.registry().definitions()
    }

    /// Extra system-prompt text from visible tools, sorted by tool name.
    pub fn tool_prompts(&self) -> Vec<(String, String)> {
        self.registry()
            .tools()
            .iter()
            .filter(|t| t.is_available())
            .filter_map(|t| t.tool_prompt().map(|p| (t.name().to_string(), p)))
            .collect()
    }

    /// Run every call of one assistant message.
    ///
    /// Calls run concurrently up to the configured limit; the returned
    /// messages are in call order regardless of completion order.
    pub async fn execute_all(
        &self,
        calls: &[MessageToolCall],
        cancel: &CancellationToken,
        sink: &EventSink,
    ) -> Vec<Message> {
        let pending: Vec<_> = calls
            .iter()
            .map(|call| self.execute_one(call, cancel, sink).boxed())
            .collect();
        futures::stream::iter(pending)
            .buffered(self.max_concurrency)
            .collect()
            .await
    }

    async fn execute_one(
        &self,
        call: &MessageToolCall,
        cancel: &CancellationToken,
        sink: &EventSink,
    ) -> Message {
        let started = Instant::now();
        let outcome = self.dispatch(call, cancel, sink).await;

        let (content, success, flag) = match &outcome {
            Ok(result) => (result.output.clone(), true, None),
            Err(Refusal::Denied(reason)) => {
                self.events.publish(DomainEvent::ToolDenied {
                    tool_name: call.name.clone(),
                    reason: reason.clone(),
                    timestamp: Utc::now(),
                });
                (format!("Tool call denied: {reason}"), false, Some("denied"))
            }
            Err(Refusal::Failed(e)) => {
                warn!(tool = %call.name, error = %e, "Tool execution failed");
                (format!("Error: {e}"), false, Some("error"))
            }
        };

        if !matches!(outcome, Err(Refusal::Denied(_))) {
            self.events.publish(DomainEvent::ToolExecuted {
                tool_name: call.name.clone(),
                success,
                duration_ms: started.elapsed().as_millis() as u64,
                timestamp: Utc::now(),
            });
        }
        let _ = sink.send(AgentEvent::ToolResult {
            id: call.id.clone(),
            name: call.name.clone(),
            output: content.clone(),
            success,
        });

        let mut message = Message::tool_result(&call.id, &call.name, content);
        if let Some(flag) = flag {
            message
                .metadata
                .insert(flag.to_string(), serde_json::Value::Bool(true));
        }
        message
    }

    async fn dispatch(
        &self,
        call: &MessageToolCall,
        cancel: &CancellationToken,
        sink: &EventSink,
    ) -> Result<ToolResult, Refusal> {
        let resolved = self.registry.read().ok().and_then(|r| r.get(&call.name));
        let tool = resolved
            .ok_or_else(|| Refusal::Failed(ToolError::NotFound(call.name.clone())))?;

        if !tool.is_available() {
            return Err(Refusal::Denied(format!("tool '{}' is unavailable", call.name)));
        }

        let arguments = parse_arguments(&call.arguments).map_err(Refusal::Failed)?;

        match self.policy.resolve(tool.as_ref()) {
            ToolPermission::Always => {}
            ToolPermission::Never => {
                debug!(tool = %call.name, "Permission is never; not invoking");
                return Err(Refusal::Denied(format!(
                    "tool '{}' is not permitted",
                    call.name
                )));
            }
            ToolPermission::Ask => {
                let decision = self.await_approval(call, cancel, sink).await?;
                match decision {
                    ApprovalDecision::Approve => {}
                    ApprovalDecision::ApproveAlways => self.policy.always_allow(&call.name),
                    ApprovalDecision::Deny(reason) => {
                        return Err(Refusal::Denied(
                            reason.unwrap_or_else(|| "denied by user".into()),
                        ));
                    }
                }
            }
        }

        self.invoke(tool, call, arguments, cancel, sink)
            .await
            .map_err(Refusal::Failed)
    }

    async fn await_approval(
        &self,
        call: &MessageToolCall,
        cancel: &CancellationToken,
        sink: &EventSink,
    ) -> Result<ApprovalDecision, Refusal> {
        let rx = self.broker.request(&call.id);
        let _ = sink.send(AgentEvent::ApprovalRequired {
            id: call.id.clone(),
            name: call.name.clone(),
            arguments: call.arguments.clone(),
        });

        tokio::select! {
            _ = cancel.cancelled() => {
                self.broker.withdraw(&call.id);
                Err(Refusal::Failed(ToolError::Cancelled(call.name.clone())))
            }
            decision = rx => Ok(decision.unwrap_or_else(|_| {
                ApprovalDecision::Deny(Some("approval request was dropped".into()))
            })),
        }
    }

    /// Run the tool on its own task so a panic surfaces as a join error.
    async fn invoke(
        &self,
        tool: Arc<dyn Tool>,
        call: &MessageToolCall,
        arguments: serde_json::Value,
        cancel: &CancellationToken,
        sink: &EventSink,
    ) -> Result<ToolResult, ToolError> {
        let ctx = InvokeContext {
            call_id: call.id.clone(),
            cancel: cancel.child_token(),
        };
        let progress = sink.clone();
        let id = call.id.clone();
        let name = call.name.clone();

        let handle = tokio::spawn(async move {
            let mut events = tool.run(arguments, ctx);
            while let Some(event) = events.next().await {
                match event {
                    ToolEvent::Progress(message) => {
                        let _ = progress.send(AgentEvent::ToolProgress {
                            id: id.clone(),
                            name: name.clone(),
                            message,
                        });
                    }
                    ToolEvent::Result(result) => return Ok(result),
                    ToolEvent::Error(e) => return Err(e),
                }
            }
            Err(ToolError::ExecutionFailed {
                tool_name: name,
                reason: "tool finished without a result".into(),
            })
        });
        let abort = handle.abort_handle();

        tokio::select! {
            _ = cancel.cancelled() => {
                abort.abort();
                Err(ToolError::Cancelled(call.name.clone()))
            }
            joined = handle => match joined {
                Ok(outcome) => outcome,
                Err(e) if e.is_panic() => Err(ToolError::ExecutionFailed {
                    tool_name: call.name.clone(),
                    reason: "tool panicked".into(),
                }),
                Err(e) => Err(ToolError::ExecutionFailed {
                    tool_name: call.name.clone(),
                    reason: e.to_string(),
                }),
            },
        }
    }
}

/// Empty argument text means no arguments.
fn parse_arguments(raw: &str) -> Result<serde_json::Value, ToolError> {
    if raw.trim().is_empty() {
        return Ok(serde_json::json!({}));
    }
    serde_json::from_str(raw)
        .map_err(|e| ToolError::InvalidArguments(format!("arguments are not valid JSON: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{CountingTool, call};
    use tokio::sync::mpsc;

    fn registry(tools: Vec<Arc<dyn Tool>>) -> ToolRegistry {
        let mut registry = ToolRegistry::new();
        for tool in tools {
            registry.register(tool);
        }
        registry
    }

    fn executor(tools: Vec<Arc<dyn Tool>>) -> ToolExecutor {
        ToolExecutor::new(
            registry(tools),
            PermissionPolicy::new(AgentProfile::default_agent(), &HashMap::new()),
        )
    }

    #[tokio::test]
    async fn never_tool_is_not_invoked() {
        let tool = Arc::new(CountingTool::new("rm_rf").with_permission(ToolPermission::Never));
        let exec = executor(vec![tool.clone()]);
        let (tx, _rx) = mpsc::unbounded_channel();

        let calls: Vec<_> = (0..5).map(|i| call(&format!("c{i}"), "rm_rf", "{}")).collect();
        let results = exec
            .execute_all(&calls, &CancellationToken::new(), &tx)
            .await;

        assert_eq!(tool.invocations(), 0);
        assert_eq!(results.len(), 5);
        for (i, message) in results.iter().enumerate() {
            assert_eq!(message.tool_call_id.as_deref(), Some(format!("c{i}").as_str()));
            assert!(message.text().contains("denied"));
            assert_eq!(message.metadata["denied"], true);
        }
    }

    #[tokio::test]
    async fn ask_tool_waits_for_approval() {
        let tool = Arc::new(CountingTool::new("write_file").with_permission(ToolPermission::Ask));
        let exec = Arc::new(executor(vec![tool.clone()]));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let broker = exec.broker();

        let runner = {
            let exec = Arc::clone(&exec);
            tokio::spawn(async move {
                exec.execute_all(&[call("c1", "write_file", "{}")], &CancellationToken::new(), &tx)
                    .await
            })
        };

        match rx.recv().await.unwrap() {
            AgentEvent::ApprovalRequired { id, .. } => assert_eq!(id, "c1"),
            other => panic!("expected approval request, got {other:?}"),
        }
        assert_eq!(tool.invocations(), 0);

        assert!(broker.respond("c1", ApprovalDecision::Approve));
        let results = runner.await.unwrap();
        assert_eq!(tool.invocations(), 1);
        assert_eq!(results[0].text(), "ran write_file");
    }

    #[tokio::test]
    async fn approve_always_stops_asking() {
        let tool = Arc::new(CountingTool::new("write_file").with_permission(ToolPermission::Ask));
        let exec = Arc::new(executor(vec![tool.clone()]));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let broker = exec.broker();

        let first = {
            let exec = Arc::clone(&exec);
            let tx = tx.clone();
            tokio::spawn(async move {
                exec.execute_all(&[call("c1", "write_file", "{}")], &CancellationToken::new(), &tx)
                    .await
            })
        };
        let _ = rx.recv().await;
        broker.respond("c1", ApprovalDecision::ApproveAlways);
        first.await.unwrap();

        exec.execute_all(&[call("c2", "write_file", "{}")], &CancellationToken::new(), &tx)
            .await;
        assert_eq!(tool.invocations(), 2);
        assert_eq!(exec.policy().resolve(tool.as_ref()), ToolPermission::Always);
    }

    #[tokio::test]
    async fn denial_is_per_call() {
        let tool = Arc::new(CountingTool::new("write_file").with_permission(ToolPermission::Ask));
        let exec = Arc::new(executor(vec![tool.clone()]));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let broker = exec.broker();

        let runner = {
            let exec = Arc::clone(&exec);
            tokio::spawn(async move {
                let calls = [call("c1", "write_file", "{}"), call("c2", "write_file", "{}")];
                exec.execute_all(&calls, &CancellationToken::new(), &tx).await
            })
        };

        let mut asked = 0;
        while asked < 2 {
            if let Some(AgentEvent::ApprovalRequired { .. }) = rx.recv().await {
                asked += 1;
            }
        }
        broker.respond("c2", ApprovalDecision::Deny(Some("not now".into())));
        broker.respond("c1", ApprovalDecision::Approve);

        let results = runner.await.unwrap();
        assert_eq!(tool.invocations(), 1);
        assert_eq!(results[0].text(), "ran write_file");
        assert!(results[1].text().contains("not now"));
    }

    #[tokio::test(start_paused = true)]
    async fn results_keep_call_order() {
        let slow = Arc::new(CountingTool::new("slow").with_delay_ms(300));
        let fast = Arc::new(CountingTool::new("fast").with_delay_ms(10));
        let exec = executor(vec![slow, fast]).with_max_concurrency(4);
        let (tx, mut rx) = mpsc::unbounded_channel();

        let calls = [
            call("c1", "slow", "{}"),
            call("c2", "fast", "{}"),
            call("c3", "slow", "{}"),
            call("c4", "fast", "{}"),
        ];
        let results = exec
            .execute_all(&calls, &CancellationToken::new(), &tx)
            .await;

        let ids: Vec<_> = results
            .iter()
            .map(|m| m.tool_call_id.clone().unwrap())
            .collect();
        assert_eq!(ids, vec!["c1", "c2", "c3", "c4"]);

        // Completion order differs: a fast call finished first.
        match rx.recv().await.unwrap() {
            AgentEvent::ToolResult { name, .. } => assert_eq!(name, "fast"),
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn panics_become_error_results() {
        let tool = Arc::new(CountingTool::new("boom").panicking());
        let exec = executor(vec![tool]);
        let (tx, _rx) = mpsc::unbounded_channel();

        let results = exec
            .execute_all(&[call("c1", "boom", "{}")], &CancellationToken::new(), &tx)
            .await;
        assert!(results[0].text().contains("tool panicked"));
        assert_eq!(results[0].metadata["error"], true);
    }

    #[tokio::test]
    async fn unknown_tool_and_bad_arguments() {
        let tool = Arc::new(CountingTool::new("read_file"));
        let exec = executor(vec![tool.clone()]);
        let (tx, _rx) = mpsc::unbounded_channel();

        let results = exec
            .execute_all(
                &[call("c1", "nope", "{}"), call("c2", "read_file", "{not json")],
                &CancellationToken::new(),
                &tx,
            )
            .await;
        assert!(results[0].text().contains("Tool not found"));
        assert!(results[1].text().contains("not valid JSON"));
        assert_eq!(tool.invocations(), 0);
    }

    #[tokio::test]
    async fn cancel_while_waiting_for_approval() {
        let tool = Arc::new(CountingTool::new("write_file").with_permission(ToolPermission::Ask));
        let exec = executor(vec![tool.clone()]);
        let (tx, _rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let results = exec
            .execute_all(&[call("c1", "write_file", "{}")], &cancel, &tx)
            .await;
        assert!(results[0].text().contains("cancelled"));
        assert_eq!(tool.invocations(), 0);
        assert!(exec.broker().pending().is_empty());
    }

    #[tokio::test]
    async fn replaced_registry_takes_effect() {
        let old = Arc::new(CountingTool::new("old__echo"));
        let new = Arc::new(CountingTool::new("new__echo"));
        let exec = executor(vec![old.clone()]);
        let (tx, _rx) = mpsc::unbounded_channel();

        exec.replace_registry(registry(vec![new.clone()]));
        assert_eq!(exec.registry().names(), vec!["new__echo"]);
        assert_eq!(exec.definitions()[0].name, "new__echo");

        let results = exec
            .execute_all(
                &[call("c1", "old__echo", "{}"), call("c2", "new__echo", "{}")],
                &CancellationToken::new(),
                &tx,
            )
            .await;
        assert!(results[0].text().contains("Tool not found"));
        assert_eq!(results[1].text(), "ran new__echo");
        assert_eq!(old.invocations(), 0);
        assert_eq!(new.invocations(), 1);
    }

    #[test]
    fn agent_profile_overrides_tool_config() {
        let tool = CountingTool::new("write_file").with_permission(ToolPermission::Ask);
        let mut overrides = HashMap::new();
        overrides.insert(
            "write_file".to_string(),
            ToolConfig::with_permission(ToolPermission::Never),
        );

        let default = PermissionPolicy::new(AgentProfile::default_agent(), &overrides);
        assert_eq!(default.resolve(&tool), ToolPermission::Never);

        let auto = PermissionPolicy::new(AgentProfile::auto_approve(), &overrides);
        assert_eq!(auto.resolve(&tool), ToolPermission::Always);
    }
}
