//! Error types for the Hacxgent domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error variant.

use thiserror::Error;

/// The top-level error type for all Hacxgent operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Provider errors ---
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    // --- Tool errors ---
    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    // --- Remote tool-server errors ---
    #[error("Tool server error: {0}")]
    Mcp(#[from] McpError),

    // --- Session log errors ---
    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    // --- Budget errors ---
    #[error("{0}")]
    Limit(#[from] ConversationLimit),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Interaction cancelled")]
    Cancelled,

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("Stream interrupted: {0}")]
    StreamInterrupted(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Malformed response: {0}")]
    Malformed(String),
}

impl ProviderError {
    /// Whether a retry with backoff has a chance of succeeding.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Network(_) | Self::Timeout(_) | Self::RateLimited { .. } => true,
            Self::StreamInterrupted(_) => true,
            Self::ApiError { status_code, .. } => *status_code >= 500,
            Self::AuthenticationFailed(_)
            | Self::ModelNotFound(_)
            | Self::NotConfigured(_)
            | Self::Malformed(_) => false,
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum ToolError {
    #[error("Tool not found: {0}")]
    NotFound(String),

    #[error("Tool execution failed: {tool_name} — {reason}")]
    ExecutionFailed { tool_name: String, reason: String },

    #[error("Tool timed out: {tool_name} after {timeout_secs}s")]
    Timeout { tool_name: String, timeout_secs: u64 },

    #[error("Permission denied: {tool_name} — {reason}")]
    PermissionDenied { tool_name: String, reason: String },

    #[error("Tool unavailable: {tool_name} — {reason}")]
    Unavailable { tool_name: String, reason: String },

    #[error("Invalid tool arguments: {0}")]
    InvalidArguments(String),

    #[error("Tool call cancelled: {0}")]
    Cancelled(String),
}

#[derive(Debug, Clone, Error)]
pub enum McpError {
    #[error("Failed to start server '{server}': {reason}")]
    Spawn { server: String, reason: String },

    #[error("Server '{server}' did not become ready within {timeout_secs}s")]
    StartupTimeout { server: String, timeout_secs: f64 },

    #[error("Call to '{tool}' on server '{server}' timed out after {timeout_secs}s")]
    CallTimeout {
        server: String,
        tool: String,
        timeout_secs: f64,
    },

    #[error("Server '{server}' process exited")]
    ProcessExited { server: String },

    #[error("Server '{server}' is not ready (state: {state})")]
    NotReady { server: String, state: String },

    #[error("Transport failure on server '{server}': {reason}")]
    Transport { server: String, reason: String },

    #[error("Protocol error from server '{server}': {reason}")]
    Protocol { server: String, reason: String },

    #[error("Server '{server}' returned error {code}: {message}")]
    Rpc {
        server: String,
        code: i64,
        message: String,
    },
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Session storage error: {0}")]
    Storage(String),

    #[error("Session not found: {0}")]
    NotFound(String),

    #[error("Session file is corrupted: {0}")]
    Corrupted(String),
}

/// A programmatic run hit one of its hard budgets.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConversationLimit {
    #[error("Conversation limit reached: turn budget of {max_turns} exhausted")]
    MaxTurns { max_turns: u32 },

    #[error(
        "Conversation limit reached: projected cost ${projected:.4} exceeds price budget ${max_price:.4}"
    )]
    MaxPrice { max_price: f64, projected: f64 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_error_displays_correctly() {
        let err = Error::Provider(ProviderError::ApiError {
            status_code: 429,
            message: "Too many requests".into(),
        });
        assert!(err.to_string().contains("429"));
        assert!(err.to_string().contains("Too many requests"));
    }

    #[test]
    fn tool_error_displays_correctly() {
        let err = Error::Tool(ToolError::PermissionDenied {
            tool_name: "write_file".into(),
            reason: "denied by policy".into(),
        });
        assert!(err.to_string().contains("write_file"));
        assert!(err.to_string().contains("policy"));
    }

    #[test]
    fn transient_classification() {
        assert!(ProviderError::Network("reset".into()).is_transient());
        assert!(ProviderError::RateLimited { retry_after_secs: 1 }.is_transient());
        assert!(
            ProviderError::ApiError {
                status_code: 503,
                message: String::new()
            }
            .is_transient()
        );
        assert!(
            !ProviderError::ApiError {
                status_code: 400,
                message: String::new()
            }
            .is_transient()
        );
        assert!(!ProviderError::AuthenticationFailed("bad key".into()).is_transient());
    }

    #[test]
    fn limit_messages_are_human_readable() {
        let turns = Error::Limit(ConversationLimit::MaxTurns { max_turns: 3 });
        assert_eq!(
            turns.to_string(),
            "Conversation limit reached: turn budget of 3 exhausted"
        );

        let price = ConversationLimit::MaxPrice {
            max_price: 0.5,
            projected: 0.75,
        };
        assert!(price.to_string().contains("$0.7500"));
        assert!(price.to_string().contains("$0.5000"));
    }
}
