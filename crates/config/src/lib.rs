//! Configuration loading, validation, and management for Hacxgent.
//!
//! Loads configuration from `~/.hacxgent/config.toml` with environment
//! variable overrides. Validates all settings before the first turn: a
//! configuration error is the one failure class that aborts a run.

pub mod mcp;
pub mod prompt;

use hacxgent_core::{AgentProfile, ModelConfig, ProviderConfig, ToolConfig};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

pub use mcp::{CommandLine, HttpServerConfig, McpServerConfig, McpTransportConfig};
pub use prompt::{BUILTIN_PROMPTS, resolve_system_prompt};

/// The root configuration structure.
///
/// Maps directly to `~/.hacxgent/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Alias of the model to use; empty selects the first configured model
    #[serde(default)]
    pub active_model: String,

    #[serde(default = "default_providers")]
    pub providers: Vec<ProviderConfig>,

    #[serde(default = "default_models")]
    pub models: Vec<ModelConfig>,

    /// Built-in prompt name or a `<id>.md` file in a prompts directory
    #[serde(default = "default_system_prompt_id")]
    pub system_prompt_id: String,

    /// Backend request timeout in seconds
    #[serde(default = "default_api_timeout")]
    pub api_timeout: f64,

    /// Compact whenever the estimated context exceeds this many tokens
    #[serde(default = "default_auto_compact_threshold")]
    pub auto_compact_threshold: usize,

    /// Compact once more messages than this were committed since the last compaction
    #[serde(default = "default_compaction_interval")]
    pub compaction_interval: usize,

    /// Token estimate above which compaction also runs
    #[serde(default = "default_compaction_token_threshold")]
    pub compaction_token_threshold: usize,

    /// Most recent messages never folded into a summary
    #[serde(default = "default_compaction_keep_recent")]
    pub compaction_keep_recent: usize,

    /// Tool name patterns to expose; empty means all
    #[serde(default)]
    pub enabled_tools: Vec<String>,

    #[serde(default)]
    pub disabled_tools: Vec<String>,

    /// Per-tool overrides, keyed by tool name
    #[serde(default)]
    pub tools: HashMap<String, ToolConfig>,

    #[serde(default)]
    pub mcp_servers: Vec<McpServerConfig>,

    /// Selected agent profile
    #[serde(default = "default_agent")]
    pub agent: String,

    /// Tool calls from one assistant message that may run at once
    #[serde(default = "default_max_tool_concurrency")]
    pub max_tool_concurrency: usize,

    /// Retries for non-streaming backend calls on transient failures
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,

    #[serde(default)]
    pub session_logging: SessionLoggingConfig,
}

fn default_providers() -> Vec<ProviderConfig> {
    vec![ProviderConfig {
        name: "openai".into(),
        api_base: "https://api.openai.com/v1".into(),
        api_key_env_var: "OPENAI_API_KEY".into(),
        api_style: "openai".into(),
        backend: Default::default(),
        reasoning_field_name: "reasoning_content".into(),
    }]
}
fn default_models() -> Vec<ModelConfig> {
    let mut model = ModelConfig::new("gpt-4o", "openai");
    model.alias = "default".into();
    vec![model]
}
fn default_system_prompt_id() -> String {
    "cli".into()
}
fn default_api_timeout() -> f64 {
    720.0
}
fn default_auto_compact_threshold() -> usize {
    200_000
}
fn default_compaction_interval() -> usize {
    10
}
fn default_compaction_token_threshold() -> usize {
    100_000
}
fn default_compaction_keep_recent() -> usize {
    4
}
fn default_agent() -> String {
    "default".into()
}
fn default_max_tool_concurrency() -> usize {
    4
}
fn default_max_retries() -> u32 {
    3
}
fn default_retry_base_delay_ms() -> u64 {
    500
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionLoggingConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Empty resolves to `~/.hacxgent/logs/session`
    #[serde(default)]
    pub save_dir: String,

    #[serde(default = "default_session_prefix")]
    pub session_prefix: String,
}

fn default_true() -> bool {
    true
}
fn default_session_prefix() -> String {
    "session".into()
}

impl Default for SessionLoggingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            save_dir: String::new(),
            session_prefix: default_session_prefix(),
        }
    }
}

impl SessionLoggingConfig {
    pub fn save_dir(&self) -> PathBuf {
        if self.save_dir.is_empty() {
            AppConfig::config_dir().join("logs").join("session")
        } else {
            expand_home(&self.save_dir)
        }
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.hacxgent/config.toml).
    ///
    /// Environment overrides:
    /// - `HACXGENT_ACTIVE_MODEL`
    /// - `HACXGENT_AGENT`
    /// - `HACXGENT_SYSTEM_PROMPT_ID`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::read(&config_path)?;

        if let Ok(model) = std::env::var("HACXGENT_ACTIVE_MODEL") {
            config.active_model = model;
        }
        if let Ok(agent) = std::env::var("HACXGENT_AGENT") {
            config.agent = agent;
        }
        if let Ok(prompt) = std::env::var("HACXGENT_SYSTEM_PROMPT_ID") {
            config.system_prompt_id = prompt;
        }

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let config = Self::read(path)?;
        config.validate()?;
        Ok(config)
    }

    fn read(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".hacxgent")
    }

    /// Project-local prompt directory.
    pub fn project_prompts_dir() -> PathBuf {
        PathBuf::from(".hacxgent").join("prompts")
    }

    /// User-global prompt directory.
    pub fn global_prompts_dir() -> PathBuf {
        Self::config_dir().join("prompts")
    }

    /// Structural validation. Runs before any turn.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.models.is_empty() {
            return Err(ConfigError::ValidationError("no models configured".into()));
        }

        let mut seen = HashSet::new();
        for model in &self.models {
            if !seen.insert(model.alias()) {
                return Err(ConfigError::ValidationError(format!(
                    "duplicate model alias '{}'; aliases must be unique",
                    model.alias()
                )));
            }
            if !(0.0..=2.0).contains(&model.temperature) {
                return Err(ConfigError::ValidationError(format!(
                    "temperature of model '{}' must be between 0.0 and 2.0",
                    model.alias()
                )));
            }
        }

        let model = self.get_active_model()?;
        self.get_provider_for_model(model)?;

        if self.max_tool_concurrency == 0 {
            return Err(ConfigError::ValidationError(
                "max_tool_concurrency must be at least 1".into(),
            ));
        }

        let mut servers = HashSet::new();
        for server in &self.mcp_servers {
            let name = server.name();
            if name.is_empty() {
                return Err(ConfigError::ValidationError(
                    "tool server name is empty after normalization".into(),
                ));
            }
            if !servers.insert(name) {
                return Err(ConfigError::ValidationError(format!(
                    "duplicate tool server name '{name}'"
                )));
            }
            if server.startup_timeout_sec <= 0.0 || server.tool_timeout_sec <= 0.0 {
                return Err(ConfigError::ValidationError(format!(
                    "timeouts of tool server '{name}' must be positive"
                )));
            }
        }

        self.system_prompt()?;
        Ok(())
    }

    /// The model selected by `active_model`, or the first model when unset.
    pub fn get_active_model(&self) -> Result<&ModelConfig, ConfigError> {
        if self.active_model.is_empty() {
            return self
                .models
                .first()
                .ok_or_else(|| ConfigError::ValidationError("no models configured".into()));
        }
        self.models
            .iter()
            .find(|m| m.alias() == self.active_model)
            .ok_or_else(|| ConfigError::UnknownModel(self.active_model.clone()))
    }

    pub fn get_provider_for_model(
        &self,
        model: &ModelConfig,
    ) -> Result<&ProviderConfig, ConfigError> {
        self.providers
            .iter()
            .find(|p| p.name == model.provider)
            .ok_or_else(|| ConfigError::UnknownProvider {
                provider: model.provider.clone(),
                model: model.name.clone(),
            })
    }

    /// Fail when the active provider names an API key variable that is unset.
    pub fn check_api_key(&self) -> Result<(), ConfigError> {
        let provider = self.get_provider_for_model(self.get_active_model()?)?;
        let var = provider.api_key_env_var.trim();
        if !var.is_empty() && std::env::var(var).map(|v| v.is_empty()).unwrap_or(true) {
            return Err(ConfigError::MissingApiKey {
                env_var: var.to_string(),
                provider: provider.name.clone(),
            });
        }
        Ok(())
    }

    /// The resolved system prompt text.
    pub fn system_prompt(&self) -> Result<String, ConfigError> {
        resolve_system_prompt(
            &self.system_prompt_id,
            &[Self::project_prompts_dir(), Self::global_prompts_dir()],
        )
    }

    /// The agent profile named by `agent`.
    pub fn agent_profile(&self) -> Result<AgentProfile, ConfigError> {
        AgentProfile::builtin(&self.agent).ok_or_else(|| ConfigError::UnknownAgent {
            name: self.agent.clone(),
            available: AgentProfile::builtin_names().join(", "),
        })
    }

    /// Generate a default config TOML string.
    pub fn default_toml() -> String {
        toml::to_string_pretty(&Self::default()).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            active_model: "default".into(),
            providers: default_providers(),
            models: default_models(),
            system_prompt_id: default_system_prompt_id(),
            api_timeout: default_api_timeout(),
            auto_compact_threshold: default_auto_compact_threshold(),
            compaction_interval: default_compaction_interval(),
            compaction_token_threshold: default_compaction_token_threshold(),
            compaction_keep_recent: default_compaction_keep_recent(),
            enabled_tools: Vec::new(),
            disabled_tools: Vec::new(),
            tools: HashMap::new(),
            mcp_servers: Vec::new(),
            agent: default_agent(),
            max_tool_concurrency: default_max_tool_concurrency(),
            max_retries: default_max_retries(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            session_logging: SessionLoggingConfig::default(),
        }
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

fn expand_home(path: &str) -> PathBuf {
    match path.strip_prefix("~/") {
        Some(rest) => dirs_home().join(rest),
        None => PathBuf::from(path),
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),

    #[error("Active model '{0}' not found in configuration")]
    UnknownModel(String),

    #[error("Provider '{provider}' for model '{model}' not found in configuration")]
    UnknownProvider { provider: String, model: String },

    #[error("Missing API key for provider '{provider}': set the {env_var} environment variable")]
    MissingApiKey { env_var: String, provider: String },

    #[error("System prompt '{id}' is neither built in nor found in {searched}")]
    MissingPrompt { id: String, searched: String },

    #[error("Unknown agent '{name}' (available: {available})")]
    UnknownAgent { name: String, available: String },
}

impl From<ConfigError> for hacxgent_core::Error {
    fn from(e: ConfigError) -> Self {
        hacxgent_core::Error::Config {
            message: e.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hacxgent_core::ToolPermission;

    #[test]
    fn default_config_is_valid() {
        let config = AppConfig::default();
        config.validate().unwrap();
        assert_eq!(config.get_active_model().unwrap().name, "gpt-4o");
        assert_eq!(config.auto_compact_threshold, 200_000);
        assert_eq!(config.system_prompt_id, "cli");
    }

    #[test]
    fn config_roundtrip_toml() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.active_model, config.active_model);
        assert_eq!(parsed.models.len(), 1);
    }

    #[test]
    fn missing_config_file_returns_defaults() {
        let config = AppConfig::load_from(Path::new("/nonexistent/config.toml")).unwrap();
        assert_eq!(config.agent, "default");
    }

    #[test]
    fn full_file_parses() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
active_model = "devstral"
auto_compact_threshold = 50000
disabled_tools = ["write_file"]

[[providers]]
name = "hacxgent"
api_base = "https://api.hacxgent.ai/v1"
api_key_env_var = "MISTRAL_API_KEY"
backend = "hacxgent"

[[models]]
name = "hacxgent-cli-latest"
provider = "hacxgent"
alias = "devstral"
input_price = 0.4
output_price = 2.0
rate_limit_rpm = 60

[tools.list_directory]
permission = "always"

[[mcp_servers]]
name = "docs server"
transport = "stdio"
command = "uvx docs-mcp"
"#,
        )
        .unwrap();

        let config = AppConfig::load_from(&path).unwrap();
        let model = config.get_active_model().unwrap();
        assert_eq!(model.name, "hacxgent-cli-latest");
        assert_eq!(model.rate_limit_rpm, 60);
        assert_eq!(
            config.tools["list_directory"].permission,
            ToolPermission::Always
        );
        assert_eq!(config.mcp_servers[0].name(), "docs_server");
        assert_eq!(config.disabled_tools, vec!["write_file"]);
    }

    #[test]
    fn duplicate_aliases_rejected() {
        let mut config = AppConfig::default();
        config.models.push(config.models[0].clone());
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ValidationError(_))
        ));
    }

    #[test]
    fn unknown_active_model_rejected() {
        let config = AppConfig {
            active_model: "missing".into(),
            ..AppConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::UnknownModel(_))));
    }

    #[test]
    fn model_without_provider_rejected() {
        let mut config = AppConfig::default();
        config.models[0].provider = "nowhere".into();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::UnknownProvider { .. })
        ));
    }

    #[test]
    fn empty_active_model_selects_first() {
        let config = AppConfig {
            active_model: String::new(),
            ..AppConfig::default()
        };
        assert_eq!(config.get_active_model().unwrap().alias(), "default");
    }

    #[test]
    fn missing_api_key_detected() {
        let mut config = AppConfig::default();
        config.providers[0].api_key_env_var = "HACXGENT_TEST_KEY_THAT_IS_NEVER_SET".into();
        assert!(matches!(
            config.check_api_key(),
            Err(ConfigError::MissingApiKey { .. })
        ));

        config.providers[0].api_key_env_var.clear();
        assert!(config.check_api_key().is_ok());
    }

    #[test]
    fn unknown_agent_rejected() {
        let config = AppConfig {
            agent: "wizard".into(),
            ..AppConfig::default()
        };
        let err = config.agent_profile().unwrap_err();
        assert!(err.to_string().contains("auto-approve"));
    }

    #[test]
    fn unknown_prompt_rejected() {
        let config = AppConfig {
            system_prompt_id: "no-such-prompt-anywhere".into(),
            ..AppConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingPrompt { .. })
        ));
    }

    #[test]
    fn session_dir_defaults_under_config_dir() {
        let logging = SessionLoggingConfig::default();
        assert!(logging.save_dir().ends_with("logs/session"));
    }
}
