//! Session log trait — persistence of committed conversation messages.
//!
//! The loop appends every message once it is committed (never mid-turn),
//! so a log always holds a prefix of a consistent conversation. Resuming
//! reads the log back through `find_latest` / `find_by_id` / `load`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::SessionError;
use crate::message::Message;

/// Descriptive header of one saved session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionMetadata {
    pub session_id: String,

    pub started_at: DateTime<Utc>,

    /// Model alias active when the session started
    #[serde(default)]
    pub model: String,

    /// Agent profile name
    #[serde(default)]
    pub agent: String,

    /// Working directory at start
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_directory: Option<String>,
}

impl SessionMetadata {
    pub fn new(model: impl Into<String>, agent: impl Into<String>) -> Self {
        Self {
            session_id: uuid::Uuid::new_v4().to_string(),
            started_at: Utc::now(),
            model: model.into(),
            agent: agent.into(),
            working_directory: None,
        }
    }
}

/// A handle to a stored session, as returned by the finders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRef {
    pub session_id: String,

    /// Backend-specific locator (a file path for JSONL logs)
    pub location: String,
}

#[async_trait]
pub trait SessionLog: Send + Sync {
    /// Persist one committed message.
    async fn append(&self, message: &Message) -> std::result::Result<(), SessionError>;

    /// The most recently modified session, if any.
    async fn find_latest(&self) -> std::result::Result<Option<SessionRef>, SessionError>;

    /// A session whose id starts with `id`.
    async fn find_by_id(&self, id: &str) -> std::result::Result<Option<SessionRef>, SessionError>;

    /// Read back a session's messages and header.
    async fn load(
        &self,
        session: &SessionRef,
    ) -> std::result::Result<(Vec<Message>, SessionMetadata), SessionError>;
}
