//! Approval broker — parks ASK tool calls until someone decides.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;
use tracing::debug;

/// The user's decision on a pending tool call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApprovalDecision {
    /// Run this one call.
    Approve,
    /// Run it, and stop asking for this tool.
    ApproveAlways,
    /// Refuse, with an optional reason shown to the model.
    Deny(Option<String>),
}

/// Pending decisions keyed by tool call id. Cheap to clone.
#[derive(Clone, Default)]
pub struct ApprovalBroker {
    pending: Arc<Mutex<HashMap<String, oneshot::Sender<ApprovalDecision>>>>,
}

impl ApprovalBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a call and get the receiver its decision arrives on.
    pub fn request(&self, call_id: &str) -> oneshot::Receiver<ApprovalDecision> {
        let (tx, rx) = oneshot::channel();
        if let Ok(mut pending) = self.pending.lock() {
            pending.insert(call_id.to_string(), tx);
        }
        rx
    }

    /// Deliver a decision. Returns false if nothing was waiting on `call_id`.
    pub fn respond(&self, call_id: &str, decision: ApprovalDecision) -> bool {
        let waiter = self
            .pending
            .lock()
            .ok()
            .and_then(|mut pending| pending.remove(call_id));
        match waiter {
            Some(tx) => {
                debug!(call_id, ?decision, "Approval decision delivered");
                tx.send(decision).is_ok()
            }
            None => false,
        }
    }

    /// Forget a call whose wait was abandoned.
    pub fn withdraw(&self, call_id: &str) {
        if let Ok(mut pending) = self.pending.lock() {
            pending.remove(call_id);
        }
    }

    /// Ids of calls still waiting, sorted. Waits whose receiver is gone
    /// are dropped first.
    pub fn pending(&self) -> Vec<String> {
        let Ok(mut pending) = self.pending.lock() else {
            return Vec::new();
        };
        pending.retain(|_, tx| !tx.is_closed());
        let mut ids: Vec<String> = pending.keys().cloned().collect();
        ids.sort();
        ids
    }
}

impl std::fmt::Debug for ApprovalBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApprovalBroker")
            .field("pending", &self.pending())
            .finish()
    }
}
