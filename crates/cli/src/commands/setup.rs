//! Wiring shared by both modes: configuration, session resume, and the
//! agent loop with its tools and remote servers.

use hacxgent_agent::{AgentLoop, JsonlSessionLog, build_registry, start_mcp};
use hacxgent_config::AppConfig;
use hacxgent_core::agent::AgentProfile;
use hacxgent_core::event::EventBus;
use hacxgent_core::message::Message;
use hacxgent_core::session::{SessionLog, SessionMetadata, SessionRef};
use hacxgent_mcp::McpClient;
use std::error::Error;
use std::sync::Arc;
use tracing::info;

use crate::Cli;

/// Which saved session, if any, to continue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resume {
    Fresh,
    Latest,
    Id(String),
}

impl Resume {
    pub fn from_cli(cli: &Cli) -> Self {
        match (&cli.resume, cli.continue_session) {
            (Some(id), _) => Self::Id(id.clone()),
            (None, true) => Self::Latest,
            (None, false) => Self::Fresh,
        }
    }
}

/// A loaded session ready to seed a new loop.
pub struct Previous {
    pub session: SessionRef,
    pub metadata: SessionMetadata,
    pub messages: Vec<Message>,
}

/// Everything a mode needs to run and later shut down.
pub struct Runtime {
    pub agent: AgentLoop,
    pub mcp: McpClient,
    pub log: Option<Arc<JsonlSessionLog>>,
}

impl Runtime {
    /// Id to pass to `--resume`, once the session has been written.
    pub async fn resumable_id(&self) -> Option<String> {
        let log = self.log.as_ref()?;
        log.path().await?;
        Some(log.metadata().session_id.clone())
    }

    pub async fn shutdown(self) {
        self.agent.close().await;
        self.mcp.shutdown().await;
    }
}

/// Load the config file and fold the command-line overrides into it.
pub fn load_config(cli: &Cli) -> Result<AppConfig, Box<dyn Error>> {
    let mut config = match &cli.config {
        Some(path) => AppConfig::load_from(path),
        None => AppConfig::load(),
    }
    .map_err(|e| format!("Failed to load config: {e}"))?;

    apply_overrides(&mut config, cli);
    config.agent_profile()?;
    config.check_api_key()?;
    Ok(config)
}

/// Programmatic runs have nobody to answer approvals, so the default
/// agent becomes `auto-approve` there.
pub fn apply_overrides(config: &mut AppConfig, cli: &Cli) {
    if let Some(agent) = &cli.agent {
        config.agent = agent.clone();
    }
    if cli.prompt.is_some() && config.agent == AgentProfile::default_agent().name {
        config.agent = AgentProfile::auto_approve().name;
    }
    if !cli.enabled_tools.is_empty() {
        config.enabled_tools = cli.enabled_tools.clone();
    }
}

pub async fn load_previous(
    config: &AppConfig,
    resume: &Resume,
) -> Result<Option<Previous>, Box<dyn Error>> {
    if *resume == Resume::Fresh {
        return Ok(None);
    }
    if !config.session_logging.enabled {
        return Err(
            "Session logging is disabled in your config; enable it to use --continue or --resume"
                .into(),
        );
    }

    let finder =
        JsonlSessionLog::from_config(&config.session_logging, SessionMetadata::new("", ""));
    let found = match resume {
        Resume::Id(id) => finder.find_by_id(id).await?,
        _ => finder.find_latest().await?,
    };
    let Some(session) = found else {
        let dir = config.session_logging.save_dir();
        return Err(match resume {
            Resume::Id(id) => format!("Session '{id}' not found in {}", dir.display()),
            _ => format!("No previous session found in {}", dir.display()),
        }
        .into());
    };

    let (messages, metadata) = finder.load(&session).await?;
    info!(session = %session.session_id, messages = messages.len(), "Loaded saved session");
    Ok(Some(Previous {
        session,
        metadata,
        messages,
    }))
}

/// Build the loop: backends, remote servers, tools, session log.
pub async fn prepare(config: &AppConfig, resume: &Resume) -> Result<Runtime, Box<dyn Error>> {
    let previous = load_previous(config, resume).await?;
    let router = hacxgent_providers::router::build_from_config(config)?;
    let cwd = std::env::current_dir()?;

    let events = EventBus::default();
    let mcp = start_mcp(config, &events).await;
    let registry = build_registry(config, &cwd, Some(&mcp)).await;
    let mut agent = match AgentLoop::from_config(config, &router, registry, events) {
        Ok(agent) => agent,
        Err(e) => {
            mcp.shutdown().await;
            return Err(e.into());
        }
    };

    let mut log = None;
    if config.session_logging.enabled {
        let logging = &config.session_logging;
        let session_log = match &previous {
            Some(prev) => JsonlSessionLog::resume(
                logging.save_dir(),
                logging.session_prefix.clone(),
                &prev.session,
                prev.metadata.clone(),
            ),
            None => {
                let mut metadata = SessionMetadata::new(agent.model().alias(), &config.agent);
                metadata.working_directory = Some(cwd.display().to_string());
                JsonlSessionLog::from_config(logging, metadata)
            }
        };
        let session_log = Arc::new(session_log);
        agent = agent.with_session_log(session_log.clone());
        log = Some(session_log);
    }

    if let Some(prev) = previous {
        agent.seed(prev.messages);
    }

    Ok(Runtime { agent, mcp, log })
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    fn cli(args: &[&str]) -> Cli {
        let mut argv = vec!["hacxgent"];
        argv.extend_from_slice(args);
        Cli::try_parse_from(argv).unwrap()
    }

    fn logging_into(dir: &std::path::Path) -> AppConfig {
        let mut config = AppConfig::default();
        config.session_logging.save_dir = dir.display().to_string();
        config
    }

    #[test]
    fn programmatic_default_agent_auto_approves() {
        let mut config = AppConfig::default();
        apply_overrides(&mut config, &cli(&["-p", "hi"]));
        assert_eq!(config.agent, "auto-approve");
    }

    #[test]
    fn explicit_agent_is_kept() {
        let mut config = AppConfig::default();
        apply_overrides(&mut config, &cli(&["-p", "hi", "--agent", "plan"]));
        assert_eq!(config.agent, "plan");

        let mut config = AppConfig::default();
        apply_overrides(&mut config, &cli(&[]));
        assert_eq!(config.agent, "default");
    }

    #[test]
    fn enabled_tools_replace_config() {
        let mut config = AppConfig::default();
        config.enabled_tools = vec!["write_file".into()];
        apply_overrides(&mut config, &cli(&["--enabled-tools", "read_file"]));
        assert_eq!(config.enabled_tools, vec!["read_file"]);
    }

    #[test]
    fn resume_mode_from_flags() {
        assert_eq!(Resume::from_cli(&cli(&[])), Resume::Fresh);
        assert_eq!(Resume::from_cli(&cli(&["-c"])), Resume::Latest);
        assert_eq!(
            Resume::from_cli(&cli(&["--resume", "ab12"])),
            Resume::Id("ab12".into())
        );
    }

    #[tokio::test]
    async fn resume_requires_session_logging() {
        let mut config = AppConfig::default();
        config.session_logging.enabled = false;
        let err = load_previous(&config, &Resume::Latest).await.err().unwrap();
        assert!(err.to_string().contains("Session logging is disabled"));
    }

    #[tokio::test]
    async fn missing_session_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let config = logging_into(tmp.path());
        let err = load_previous(&config, &Resume::Latest).await.err().unwrap();
        assert!(err.to_string().contains("No previous session"));

        let err = load_previous(&config, &Resume::Id("nope".into()))
            .await
            .err()
            .unwrap();
        assert!(err.to_string().contains("'nope' not found"));
    }

    #[tokio::test]
    async fn prepare_seeds_from_the_latest_session() {
        let tmp = tempfile::tempdir().unwrap();
        let config = logging_into(tmp.path());

        let earlier = JsonlSessionLog::from_config(
            &config.session_logging,
            SessionMetadata::new("default", "default"),
        );
        earlier.append(&Message::system("old prompt")).await.unwrap();
        earlier.append(&Message::user("hello")).await.unwrap();
        earlier.append(&Message::assistant("hi there")).await.unwrap();

        let runtime = prepare(&config, &Resume::Latest).await.unwrap();
        let messages = &runtime.agent.conversation().messages;
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[1].text(), "hello");
        assert_ne!(messages[0].text(), "old prompt");
        assert_eq!(
            runtime.resumable_id().await,
            Some(earlier.metadata().session_id.clone())
        );
        runtime.shutdown().await;
    }

    #[tokio::test]
    async fn fresh_session_is_not_resumable_until_written() {
        let tmp = tempfile::tempdir().unwrap();
        let config = logging_into(tmp.path());
        let runtime = prepare(&config, &Resume::Fresh).await.unwrap();
        assert_eq!(runtime.agent.conversation().len(), 1);
        assert!(runtime.resumable_id().await.is_none());
        runtime.shutdown().await;
    }
}
