//! Newline-delimited JSON-RPC over a child process's standard streams.
//!
//! A reader task owns stdout and routes each response to the waiter
//! registered under its id. When stdout reaches EOF every waiter is failed
//! with `ProcessExited` and the `exited` token fires.

use hacxgent_core::error::McpError;
use serde_json::Value;
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::protocol::{JsonRpcMessage, JsonRpcRequest};

type Waiter = oneshot::Sender<Result<Value, McpError>>;
type PendingMap = Arc<Mutex<HashMap<u64, Waiter>>>;

pub struct StdioTransport {
    server: String,
    stdin: tokio::sync::Mutex<ChildStdin>,
    child: tokio::sync::Mutex<Child>,
    pending: PendingMap,
    next_id: AtomicU64,
    exited: CancellationToken,
}

/// Removes a pending entry when the waiting future is dropped early.
struct PendingGuard<'a> {
    pending: &'a PendingMap,
    id: u64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        if let Ok(mut map) = self.pending.lock() {
            map.remove(&self.id);
        }
    }
}

impl StdioTransport {
    pub fn spawn(
        server: &str,
        argv: &[String],
        env: &HashMap<String, String>,
    ) -> Result<Self, McpError> {
        let spawn_err = |reason: String| McpError::Spawn {
            server: server.to_string(),
            reason,
        };
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| spawn_err("empty command".into()))?;

        let mut child = Command::new(program)
            .args(args)
            .envs(env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| spawn_err(format!("{program}: {e}")))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| spawn_err("stdin not captured".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| spawn_err("stdout not captured".into()))?;

        if let Some(stderr) = child.stderr.take() {
            let name = server.to_string();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(server = %name, "stderr: {line}");
                }
            });
        }

        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let exited = CancellationToken::new();
        tokio::spawn(read_loop(
            server.to_string(),
            stdout,
            Arc::clone(&pending),
            exited.clone(),
        ));

        debug!(server, program = %program, "Spawned stdio server");
        Ok(Self {
            server: server.to_string(),
            stdin: tokio::sync::Mutex::new(stdin),
            child: tokio::sync::Mutex::new(child),
            pending,
            next_id: AtomicU64::new(1),
            exited,
        })
    }

    pub async fn request(&self, method: &str, params: Option<Value>) -> Result<Value, McpError> {
        if self.exited.is_cancelled() {
            return Err(McpError::ProcessExited {
                server: self.server.clone(),
            });
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .map_err(|_| self.transport_err("pending map poisoned"))?
            .insert(id, tx);
        let _guard = PendingGuard {
            pending: &self.pending,
            id,
        };
        // The reader cancels before draining, so a late insert is caught here.
        if self.exited.is_cancelled() {
            return Err(McpError::ProcessExited {
                server: self.server.clone(),
            });
        }

        self.write(&JsonRpcRequest::request(id, method, params))
            .await?;

        match rx.await {
            Ok(result) => result,
            Err(_) => Err(McpError::ProcessExited {
                server: self.server.clone(),
            }),
        }
    }

    pub async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), McpError> {
        self.write(&JsonRpcRequest::notification(method, params))
            .await
    }

    /// Fires once the process's stdout closes.
    pub fn exited(&self) -> CancellationToken {
        self.exited.clone()
    }

    pub async fn close(&self) {
        self.exited.cancel();
        let mut child = self.child.lock().await;
        if let Err(e) = child.start_kill() {
            trace!(server = %self.server, "kill: {e}");
        }
        let _ = child.wait().await;
    }

    async fn write(&self, message: &JsonRpcRequest<'_>) -> Result<(), McpError> {
        let mut line = serde_json::to_string(message)
            .map_err(|e| self.transport_err(&e.to_string()))?;
        line.push('\n');
        trace!(server = %self.server, "-> {line}");

        let mut stdin = self.stdin.lock().await;
        let written = async {
            stdin.write_all(line.as_bytes()).await?;
            stdin.flush().await
        }
        .await;
        written.map_err(|e| {
            if e.kind() == std::io::ErrorKind::BrokenPipe {
                McpError::ProcessExited {
                    server: self.server.clone(),
                }
            } else {
                self.transport_err(&e.to_string())
            }
        })
    }

    fn transport_err(&self, reason: &str) -> McpError {
        McpError::Transport {
            server: self.server.clone(),
            reason: reason.to_string(),
        }
    }
}

async fn read_loop(
    server: String,
    stdout: ChildStdout,
    pending: PendingMap,
    exited: CancellationToken,
) {
    let mut lines = BufReader::new(stdout).lines();
    loop {
        let line = tokio::select! {
            _ = exited.cancelled() => break,
            line = lines.next_line() => line,
        };
        let line = match line {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                warn!(server = %server, "stdout read failed: {e}");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        trace!(server = %server, "<- {line}");

        let message: JsonRpcMessage = match serde_json::from_str(&line) {
            Ok(m) => m,
            Err(_) => {
                debug!(server = %server, "ignoring non-JSON output: {line}");
                continue;
            }
        };
        let Some(id) = message.response_id() else {
            if let Some(method) = &message.method {
                debug!(server = %server, method = %method, "Ignoring server message");
            }
            continue;
        };
        let waiter = pending.lock().ok().and_then(|mut map| map.remove(&id));
        match waiter {
            Some(tx) => {
                let _ = tx.send(message.into_result(&server));
            }
            None => warn!(server = %server, id, "Response for unknown request"),
        }
    }

    if !exited.is_cancelled() {
        warn!(server = %server, "Server process exited");
    }
    exited.cancel();
    if let Ok(mut map) = pending.lock() {
        for (_, tx) in map.drain() {
            let _ = tx.send(Err(McpError::ProcessExited {
                server: server.clone(),
            }));
        }
    }
}
