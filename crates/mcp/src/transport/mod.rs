//! Transport variants, one per configured `transport` kind.

mod http;
mod stdio;

pub use http::HttpTransport;
pub use stdio::StdioTransport;

use hacxgent_config::mcp::{McpServerConfig, McpTransportConfig};
use hacxgent_core::error::McpError;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

pub enum Transport {
    Stdio(StdioTransport),
    Http(HttpTransport),
    StreamableHttp(HttpTransport),
}

impl Transport {
    /// Spawn the process or prepare the HTTP client. No messages are sent.
    pub fn connect(config: &McpServerConfig) -> Result<Self, McpError> {
        let name = config.name();
        match &config.transport {
            McpTransportConfig::Stdio { env, .. } => {
                let argv = config.argv().unwrap_or_default();
                Ok(Self::Stdio(StdioTransport::spawn(name, &argv, env)?))
            }
            McpTransportConfig::Http(http) => Ok(Self::Http(HttpTransport::new(
                name,
                &http.url,
                http.http_headers(),
                false,
            )?)),
            McpTransportConfig::StreamableHttp(http) => Ok(Self::StreamableHttp(
                HttpTransport::new(name, &http.url, http.http_headers(), true)?,
            )),
        }
    }

    pub async fn request(&self, method: &str, params: Option<Value>) -> Result<Value, McpError> {
        match self {
            Self::Stdio(t) => t.request(method, params).await,
            Self::Http(t) | Self::StreamableHttp(t) => t.request(method, params).await,
        }
    }

    pub async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), McpError> {
        match self {
            Self::Stdio(t) => t.notify(method, params).await,
            Self::Http(t) | Self::StreamableHttp(t) => t.notify(method, params).await,
        }
    }

    pub fn exited(&self) -> CancellationToken {
        match self {
            Self::Stdio(t) => t.exited(),
            Self::Http(t) | Self::StreamableHttp(t) => t.exited(),
        }
    }

    pub async fn close(&self) {
        match self {
            Self::Stdio(t) => t.close().await,
            Self::Http(t) | Self::StreamableHttp(t) => t.close().await,
        }
    }
}
