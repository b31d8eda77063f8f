//! HTTP transports: one POST per JSON-RPC message.
//!
//! Plain `http` expects a JSON body back. `streamable-http` also accepts an
//! SSE body and carries the server-assigned `mcp-session-id` on every
//! later request.

use hacxgent_core::error::McpError;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::protocol::{JsonRpcMessage, JsonRpcRequest};

const SESSION_HEADER: &str = "mcp-session-id";

pub struct HttpTransport {
    server: String,
    url: String,
    headers: HashMap<String, String>,
    client: reqwest::Client,
    streamable: bool,
    session_id: Mutex<Option<String>>,
    next_id: AtomicU64,
    closed: CancellationToken,
}

impl HttpTransport {
    pub fn new(
        server: &str,
        url: &str,
        headers: HashMap<String, String>,
        streamable: bool,
    ) -> Result<Self, McpError> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| McpError::Spawn {
                server: server.to_string(),
                reason: e.to_string(),
            })?;
        Ok(Self {
            server: server.to_string(),
            url: url.to_string(),
            headers,
            client,
            streamable,
            session_id: Mutex::new(None),
            next_id: AtomicU64::new(1),
            closed: CancellationToken::new(),
        })
    }

    pub async fn request(&self, method: &str, params: Option<Value>) -> Result<Value, McpError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = self
            .post(&JsonRpcRequest::request(id, method, params))
            .await?;
        let message = self.extract_response(id, &body.0, &body.1)?;
        message.into_result(&self.server)
    }

    pub async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), McpError> {
        self.post(&JsonRpcRequest::notification(method, params))
            .await
            .map(|_| ())
    }

    /// Never fires on its own; HTTP servers have no process to lose.
    pub fn exited(&self) -> CancellationToken {
        self.closed.clone()
    }

    /// Ends the server-side session, if one was assigned.
    pub async fn close(&self) {
        self.closed.cancel();
        let session = self.session_id.lock().ok().and_then(|mut s| s.take());
        if let Some(session) = session {
            let result = self
                .client
                .delete(&self.url)
                .header(SESSION_HEADER, session)
                .send()
                .await;
            if let Err(e) = result {
                debug!(server = %self.server, "session delete failed: {e}");
            }
        }
    }

    /// Returns `(content_type, body)`.
    async fn post(&self, message: &JsonRpcRequest<'_>) -> Result<(String, String), McpError> {
        let mut request = self
            .client
            .post(&self.url)
            .header("Accept", "application/json, text/event-stream")
            .json(message);
        for (name, value) in &self.headers {
            request = request.header(name.as_str(), value.as_str());
        }
        if self.streamable {
            let session = self.session_id.lock().ok().and_then(|s| s.clone());
            if let Some(session) = session {
                request = request.header(SESSION_HEADER, session);
            }
        }

        trace!(server = %self.server, method = message.method, "POST {}", self.url);
        let response = request.send().await.map_err(|e| McpError::Transport {
            server: self.server.clone(),
            reason: e.to_string(),
        })?;

        let status = response.status();
        if self.streamable
            && let Some(session) = response
                .headers()
                .get(SESSION_HEADER)
                .and_then(|v| v.to_str().ok())
            && let Ok(mut slot) = self.session_id.lock()
        {
            *slot = Some(session.to_string());
        }
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let body = response.text().await.map_err(|e| McpError::Transport {
            server: self.server.clone(),
            reason: e.to_string(),
        })?;

        if !status.is_success() {
            return Err(McpError::Transport {
                server: self.server.clone(),
                reason: format!("HTTP {}: {body}", status.as_u16()),
            });
        }
        Ok((content_type, body))
    }

    fn extract_response(
        &self,
        id: u64,
        content_type: &str,
        body: &str,
    ) -> Result<JsonRpcMessage, McpError> {
        let protocol = |reason: String| McpError::Protocol {
            server: self.server.clone(),
            reason,
        };

        if content_type.starts_with("text/event-stream") {
            return sse_messages(body)
                .find(|m| m.response_id() == Some(id))
                .ok_or_else(|| protocol(format!("no response for request {id} in event stream")));
        }

        let message: JsonRpcMessage =
            serde_json::from_str(body).map_err(|e| protocol(e.to_string()))?;
        if message.response_id() != Some(id) {
            return Err(protocol(format!("expected response to request {id}")));
        }
        Ok(message)
    }
}

/// Parse every `data:` payload of an SSE body as a JSON-RPC message.
fn sse_messages(body: &str) -> impl Iterator<Item = JsonRpcMessage> + '_ {
    body.split("\n\n")
        .filter_map(|event| {
            let data: Vec<&str> = event
                .lines()
                .filter_map(|l| l.strip_prefix("data:"))
                .map(str::trim_start)
                .collect();
            (!data.is_empty()).then(|| data.join("\n"))
        })
        .filter_map(|data| serde_json::from_str(&data).ok())
}
