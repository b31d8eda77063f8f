//! JSONL session log.
//!
//! One file per session under the configured directory, named
//! `<prefix>_<YYYYmmdd_HHMMSS>_<id8>.jsonl`. The first line is the
//! [`SessionMetadata`] header; every following line is one committed
//! [`Message`]. The file is created on the first append.

use async_trait::async_trait;
use hacxgent_config::SessionLoggingConfig;
use hacxgent_core::error::SessionError;
use hacxgent_core::message::Message;
use hacxgent_core::session::{SessionLog, SessionMetadata, SessionRef};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::debug;

pub struct JsonlSessionLog {
    dir: PathBuf,
    prefix: String,
    metadata: SessionMetadata,
    /// Target file; `None` until the header has been written.
    path: Mutex<Option<PathBuf>>,
}

impl JsonlSessionLog {
    pub fn new(dir: impl Into<PathBuf>, prefix: impl Into<String>, metadata: SessionMetadata) -> Self {
        Self {
            dir: dir.into(),
            prefix: prefix.into(),
            metadata,
            path: Mutex::new(None),
        }
    }

    pub fn from_config(config: &SessionLoggingConfig, metadata: SessionMetadata) -> Self {
        Self::new(config.save_dir(), config.session_prefix.clone(), metadata)
    }

    /// Keep appending to an existing session file instead of starting one.
    pub fn resume(
        dir: impl Into<PathBuf>,
        prefix: impl Into<String>,
        session: &SessionRef,
        metadata: SessionMetadata,
    ) -> Self {
        Self {
            dir: dir.into(),
            prefix: prefix.into(),
            metadata,
            path: Mutex::new(Some(PathBuf::from(&session.location))),
        }
    }

    pub fn metadata(&self) -> &SessionMetadata {
        &self.metadata
    }

    /// The session file, once something has been written.
    pub async fn path(&self) -> Option<PathBuf> {
        self.path.lock().await.clone()
    }

    fn file_name(&self) -> String {
        let stamp = self.metadata.started_at.format("%Y%m%d_%H%M%S");
        let short: String = self.metadata.session_id.chars().take(8).collect();
        format!("{}_{stamp}_{short}.jsonl", self.prefix)
    }

    /// Session files in the directory, newest first.
    async fn session_files(&self) -> Result<Vec<PathBuf>, SessionError> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(storage("read session directory", e)),
        };

        let mut files: Vec<(SystemTime, PathBuf)> = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| storage("read session directory", e))?
        {
            let path = entry.path();
            let name = entry.file_name().to_string_lossy().into_owned();
            if !name.starts_with(&format!("{}_", self.prefix)) || !name.ends_with(".jsonl") {
                continue;
            }
            let modified = entry
                .metadata()
                .await
                .and_then(|m| m.modified())
                .unwrap_or(SystemTime::UNIX_EPOCH);
            files.push((modified, path));
        }
        files.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| b.1.cmp(&a.1)));
        Ok(files.into_iter().map(|(_, path)| path).collect())
    }
}

fn storage(action: &str, e: std::io::Error) -> SessionError {
    SessionError::Storage(format!("Failed to {action}: {e}"))
}

fn to_line<T: serde::Serialize>(value: &T) -> Result<String, SessionError> {
    let mut line = serde_json::to_string(value)
        .map_err(|e| SessionError::Storage(format!("Failed to serialize session line: {e}")))?;
    line.push('\n');
    Ok(line)
}

async fn read_header(path: &Path) -> Option<SessionMetadata> {
    let content = tokio::fs::read_to_string(path).await.ok()?;
    let first = content.lines().next()?;
    serde_json::from_str(first).ok()
}

fn session_ref(metadata: &SessionMetadata, path: &Path) -> SessionRef {
    SessionRef {
        session_id: metadata.session_id.clone(),
        location: path.to_string_lossy().into_owned(),
    }
}

#[async_trait]
impl SessionLog for JsonlSessionLog {
    async fn append(&self, message: &Message) -> Result<(), SessionError> {
        let mut current = self.path.lock().await;
        let mut content = String::new();

        let path = match current.as_ref() {
            Some(path) => path.clone(),
            None => {
                tokio::fs::create_dir_all(&self.dir)
                    .await
                    .map_err(|e| storage("create session directory", e))?;
                content.push_str(&to_line(&self.metadata)?);
                self.dir.join(self.file_name())
            }
        };
        content.push_str(&to_line(message)?);

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|e| storage("open session file", e))?;
        file.write_all(content.as_bytes())
            .await
            .map_err(|e| storage("write session file", e))?;
        file.flush()
            .await
            .map_err(|e| storage("flush session file", e))?;

        if current.is_none() {
            debug!(path = %path.display(), "Session log started");
            *current = Some(path);
        }
        Ok(())
    }

    async fn find_latest(&self) -> Result<Option<SessionRef>, SessionError> {
        for path in self.session_files().await? {
            if let Some(metadata) = read_header(&path).await {
                return Ok(Some(session_ref(&metadata, &path)));
            }
        }
        Ok(None)
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<SessionRef>, SessionError> {
        if id.is_empty() {
            return Ok(None);
        }
        for path in self.session_files().await? {
            if let Some(metadata) = read_header(&path).await
                && metadata.session_id.starts_with(id)
            {
                return Ok(Some(session_ref(&metadata, &path)));
            }
        }
        Ok(None)
    }

    async fn load(
        &self,
        session: &SessionRef,
    ) -> Result<(Vec<Message>, SessionMetadata), SessionError> {
        let content = match tokio::fs::read_to_string(&session.location).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(SessionError::NotFound(session.session_id.clone()));
            }
            Err(e) => return Err(storage("read session file", e)),
        };

        let mut lines = content
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty());
        let (_, header) = lines
            .next()
            .ok_or_else(|| SessionError::Corrupted(format!("{}: empty file", session.location)))?;
        let metadata: SessionMetadata = serde_json::from_str(header).map_err(|e| {
            SessionError::Corrupted(format!("{}: bad header: {e}", session.location))
        })?;

        let messages = lines
            .map(|(number, line)| {
                serde_json::from_str::<Message>(line).map_err(|e| {
                    SessionError::Corrupted(format!(
                        "{} line {}: {e}",
                        session.location,
                        number + 1
                    ))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok((messages, metadata))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::call;

    fn log_in(dir: &Path) -> JsonlSessionLog {
        JsonlSessionLog::new(dir, "session", SessionMetadata::new("scripted", "default"))
    }

    #[tokio::test]
    async fn round_trip() {
        let tmp = tempfile::tempdir().unwrap();
        let log = log_in(tmp.path());
        assert!(log.path().await.is_none());

        let messages = vec![
            Message::user("list the files"),
            Message::assistant_with_tool_calls(None, vec![call("c1", "list_directory", "{}")]),
            Message::tool_result("c1", "list_directory", "[]"),
            Message::assistant("Empty."),
        ];
        for m in &messages {
            log.append(m).await.unwrap();
        }

        let path = log.path().await.unwrap();
        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("session_"));
        assert!(name.ends_with(".jsonl"));

        let found = log.find_latest().await.unwrap().unwrap();
        assert_eq!(found.session_id, log.metadata().session_id);

        let (loaded, metadata) = log.load(&found).await.unwrap();
        assert_eq!(metadata.agent, "default");
        assert_eq!(loaded.len(), 4);
        assert_eq!(loaded[1].tool_calls[0].id, "c1");
        assert_eq!(loaded[3].text(), "Empty.");
    }

    #[tokio::test]
    async fn find_by_id_matches_prefix() {
        let tmp = tempfile::tempdir().unwrap();
        let first = log_in(tmp.path());
        let second = log_in(tmp.path());
        first.append(&Message::user("one")).await.unwrap();
        second.append(&Message::user("two")).await.unwrap();

        let id = &first.metadata().session_id[..6];
        let found = second.find_by_id(id).await.unwrap().unwrap();
        assert_eq!(found.session_id, first.metadata().session_id);
        assert!(second.find_by_id("zzzz-not-there").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn empty_directory_has_no_sessions() {
        let tmp = tempfile::tempdir().unwrap();
        let log = log_in(&tmp.path().join("missing"));
        assert!(log.find_latest().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn corrupted_line_is_reported() {
        let tmp = tempfile::tempdir().unwrap();
        let log = log_in(tmp.path());
        log.append(&Message::user("ok")).await.unwrap();
        let path = log.path().await.unwrap();

        let mut content = std::fs::read_to_string(&path).unwrap();
        content.push_str("{not json\n");
        std::fs::write(&path, content).unwrap();

        let found = log.find_latest().await.unwrap().unwrap();
        let err = log.load(&found).await.unwrap_err();
        assert!(matches!(err, SessionError::Corrupted(_)));
    }

    #[tokio::test]
    async fn resume_appends_to_the_same_file() {
        let tmp = tempfile::tempdir().unwrap();
        let log = log_in(tmp.path());
        log.append(&Message::user("before")).await.unwrap();
        let found = log.find_latest().await.unwrap().unwrap();

        let resumed = JsonlSessionLog::resume(
            tmp.path(),
            "session",
            &found,
            log.metadata().clone(),
        );
        resumed.append(&Message::assistant("after")).await.unwrap();

        let (messages, _) = resumed.load(&found).await.unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1].text(), "after");
    }
}
