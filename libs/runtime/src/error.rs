//! Actor Runtime Error Types
//!
//! Structured error handling for actor lifecycle, messaging and
//! distribution with context preservation.

use thiserror::Error;
use troupe_transport::TransportError;

/// Errors surfaced by the actor runtime
#[derive(Error, Debug)]
pub enum ActorError {
    #[error("Actor named {0} already exists")]
    ActorExists(String),

    #[error("Actor named {0} not found")]
    ActorNotFound(String),

    #[error("Ask from {from} to {to} timed out after {timeout_ms}ms")]
    AskTimeout {
        from: String,
        to: String,
        timeout_ms: u64,
    },

    #[error("Message for {to} was undeliverable: {info}")]
    Undeliverable { to: String, info: String },

    #[error("Actor system has been shut down")]
    SystemShutDown,

    #[error("{0}")]
    Failure(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl ActorError {
    /// Application-level failure raised from inside an actor handler
    pub fn failure(message: impl Into<String>) -> Self {
        Self::Failure(message.into())
    }

    pub fn undeliverable(to: impl Into<String>, info: impl Into<String>) -> Self {
        Self::Undeliverable {
            to: to.into(),
            info: info.into(),
        }
    }

    /// Error category for logging and metrics
    pub fn category(&self) -> &'static str {
        match self {
            Self::ActorExists(_) | Self::ActorNotFound(_) => "registry",
            Self::AskTimeout { .. } => "timeout",
            Self::Undeliverable { .. } => "delivery",
            Self::SystemShutDown => "lifecycle",
            Self::Failure(_) => "handler",
            Self::Serialization(_) => "serialization",
            Self::Transport(_) => "transport",
        }
    }

    /// Whether retrying the operation could reasonably succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::AskTimeout { .. } | Self::Undeliverable { .. } => true,
            Self::Transport(e) => e.is_recoverable(),
            _ => false,
        }
    }
}

impl From<serde_json::Error> for ActorError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

/// Result type for actor runtime operations
pub type Result<T> = std::result::Result<T, ActorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages_name_the_actor() {
        let e = ActorError::ActorExists("actors://system/ping".to_string());
        assert!(e.to_string().contains("actors://system/ping"));

        let e = ActorError::AskTimeout {
            from: "actors://system".to_string(),
            to: "actors://system/slow".to_string(),
            timeout_ms: 5000,
        };
        assert!(e.to_string().contains("5000ms"));
    }

    #[test]
    fn test_categories() {
        assert_eq!(ActorError::SystemShutDown.category(), "lifecycle");
        assert_eq!(ActorError::failure("boom").category(), "handler");
        assert!(!ActorError::failure("boom").is_retryable());
        assert!(ActorError::undeliverable("a", "gone").is_retryable());
    }
}
