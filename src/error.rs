//! Error types for the memagent library.

use thiserror::Error;

/// Unified error type for the agent.
#[derive(Debug, Error)]
pub enum AgentError {
    /// The bridge is unreachable or the channel broke mid-flight
    #[error("Connection error: {0}")]
    Connection(String),

    /// The remote engine rejected the command or returned a malformed response
    #[error("Command error: {0}")]
    Command(String),

    /// A deadline expired at the transport, pool, or tool-execution level
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Bad or missing tool arguments
    #[error("Validation error: {0}")]
    Validation(String),

    /// Destructive tool blocked by the permission policy
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Invalid settings at startup; fatal, never caught
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// LLM backend failure (always recoverable via rule-based fallback)
    #[error("LLM error: {0}")]
    Llm(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl AgentError {
    /// Whether this error came from the I/O layer and warrants a
    /// reconnect-and-resend cycle at the transport level.
    pub fn is_io(&self) -> bool {
        matches!(self, AgentError::Connection(_) | AgentError::Io(_))
    }
}
