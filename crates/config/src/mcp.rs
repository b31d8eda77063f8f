//! Remote tool-server configuration.
//!
//! One entry per server, discriminated by `transport`:
//!
//! ```toml
//! [[mcp_servers]]
//! name = "docs"
//! transport = "stdio"
//! command = "uvx docs-mcp --stdio"
//!
//! [[mcp_servers]]
//! name = "search"
//! transport = "streamable-http"
//! url = "https://search.example.com/mcp"
//! api_key_env = "SEARCH_TOKEN"
//! ```

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;

const MAX_NAME_LEN: usize = 256;

/// Common settings plus the transport-specific part.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpServerConfig {
    /// Alias used to prefix this server's tool names
    #[serde(deserialize_with = "deserialize_name")]
    pub name: String,

    /// Usage hint appended to each proxied tool description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,

    #[serde(default = "default_startup_timeout")]
    pub startup_timeout_sec: f64,

    #[serde(default = "default_tool_timeout")]
    pub tool_timeout_sec: f64,

    #[serde(flatten)]
    pub transport: McpTransportConfig,
}

fn default_startup_timeout() -> f64 {
    10.0
}
fn default_tool_timeout() -> f64 {
    60.0
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "transport", rename_all = "kebab-case")]
pub enum McpTransportConfig {
    Stdio {
        command: CommandLine,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default)]
        env: HashMap<String, String>,
    },
    Http(HttpServerConfig),
    StreamableHttp(HttpServerConfig),
}

impl McpTransportConfig {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Stdio { .. } => "stdio",
            Self::Http(_) => "http",
            Self::StreamableHttp(_) => "streamable-http",
        }
    }
}

/// A command given either as one string or as an argv list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CommandLine {
    Line(String),
    Argv(Vec<String>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpServerConfig {
    pub url: String,

    #[serde(default)]
    pub headers: HashMap<String, String>,

    /// Environment variable holding a token
    #[serde(default)]
    pub api_key_env: String,

    #[serde(default = "default_api_key_header")]
    pub api_key_header: String,

    /// `{token}` is replaced by the variable's value
    #[serde(default = "default_api_key_format")]
    pub api_key_format: String,
}

fn default_api_key_header() -> String {
    "Authorization".into()
}
fn default_api_key_format() -> String {
    "Bearer {token}".into()
}

impl HttpServerConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            headers: HashMap::new(),
            api_key_env: String::new(),
            api_key_header: default_api_key_header(),
            api_key_format: default_api_key_format(),
        }
    }

    /// Configured headers plus the credential header, read from the environment.
    pub fn http_headers(&self) -> HashMap<String, String> {
        self.http_headers_with(|var| std::env::var(var).ok())
    }

    /// Same as [`Self::http_headers`] with an explicit variable lookup.
    ///
    /// An explicitly configured header of the same name (any case) wins.
    pub fn http_headers_with(
        &self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> HashMap<String, String> {
        let mut headers = self.headers.clone();
        let var = self.api_key_env.trim();
        if var.is_empty() {
            return headers;
        }
        let Some(token) = lookup(var).filter(|t| !t.is_empty()) else {
            return headers;
        };

        let target = match self.api_key_header.trim() {
            "" => "Authorization",
            h => h,
        };
        if headers.keys().any(|h| h.eq_ignore_ascii_case(target)) {
            return headers;
        }

        let value = if self.api_key_format.contains("{token}") {
            self.api_key_format.replace("{token}", &token)
        } else {
            token
        };
        headers.insert(target.to_string(), value);
        headers
    }
}

impl McpServerConfig {
    pub fn stdio(name: &str, argv: Vec<String>) -> Self {
        Self {
            name: normalize_name(name),
            prompt: None,
            startup_timeout_sec: default_startup_timeout(),
            tool_timeout_sec: default_tool_timeout(),
            transport: McpTransportConfig::Stdio {
                command: CommandLine::Argv(argv),
                args: Vec::new(),
                env: HashMap::new(),
            },
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Full argv for stdio servers: the command followed by `args`.
    pub fn argv(&self) -> Option<Vec<String>> {
        match &self.transport {
            McpTransportConfig::Stdio { command, args, .. } => {
                let mut argv: Vec<String> = match command {
                    CommandLine::Line(line) => {
                        line.split_whitespace().map(str::to_string).collect()
                    }
                    CommandLine::Argv(list) => list.clone(),
                };
                argv.extend(args.iter().cloned());
                Some(argv)
            }
            McpTransportConfig::Http(_) | McpTransportConfig::StreamableHttp(_) => None,
        }
    }
}

/// Characters outside `[A-Za-z0-9_-]` become `_`; edges of `_`/`-` are trimmed.
pub fn normalize_name(raw: &str) -> String {
    let replaced: String = raw
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect();
    replaced
        .trim_matches(|c| c == '_' || c == '-')
        .chars()
        .take(MAX_NAME_LEN)
        .collect()
}

fn deserialize_name<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    let raw = String::deserialize(deserializer)?;
    Ok(normalize_name(&raw))
}
