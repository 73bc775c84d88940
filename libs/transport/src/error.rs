//! Transport Error Types
//!
//! Error handling for the reliable websocket client, the message relay,
//! and distributor implementations.

use serde_json::Value;
use thiserror::Error;

/// Main transport error type
#[derive(Error, Debug)]
pub enum TransportError {
    /// An expected acknowledgement or answer never arrived before the deadline.
    /// Carries the original payload so callers can see what was lost.
    #[error("Delivery failed: {reason}")]
    Delivery { reason: String, payload: Value },

    /// The socket closed without the caller asking for it. Recoverable,
    /// the client reconnects on its own.
    #[error("Socket {client_id} closed: {message}")]
    SocketClosed { client_id: String, message: String },

    /// Websocket authorization failed. Terminal, no reconnection is attempted.
    #[error("Websocket authorization failed")]
    Authorization,

    /// The relay received a frame for a client id it has never seen.
    #[error("Unknown target {target_id}")]
    UnknownTarget { target_id: String },

    /// An operation exceeded its deadline.
    #[error("Timeout: {operation} exceeded {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },

    /// Connection establishment or handshake errors
    #[error("Connection error: {message}")]
    Connection { message: String },

    /// Malformed or unexpected frames on the wire
    #[error("Protocol error: {message}")]
    Protocol { message: String },

    /// Generic I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Frame or envelope (de)serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type alias for transport operations
pub type Result<T> = std::result::Result<T, TransportError>;

impl TransportError {
    /// Create a delivery failure naming the payload that was lost
    pub fn delivery(reason: impl Into<String>, payload: Value) -> Self {
        Self::Delivery {
            reason: reason.into(),
            payload,
        }
    }

    /// Create a socket-closed error
    pub fn socket_closed(client_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::SocketClosed {
            client_id: client_id.into(),
            message: message.into(),
        }
    }

    /// Create an unknown-target error
    pub fn unknown_target(target_id: impl Into<String>) -> Self {
        Self::UnknownTarget {
            target_id: target_id.into(),
        }
    }

    /// Create a timeout error
    pub fn timeout(operation: impl Into<String>, timeout_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_ms,
        }
    }

    /// Create a connection error
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Create a protocol error
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Whether the client may keep the connection logic running after this
    /// error. Authorization failures are the one terminal case.
    pub fn is_recoverable(&self) -> bool {
        match self {
            TransportError::Authorization => false,
            TransportError::SocketClosed { .. } => true,
            TransportError::Connection { .. } => true,
            TransportError::Timeout { .. } => true,
            TransportError::Delivery { .. } => true,
            TransportError::UnknownTarget { .. } => true,
            TransportError::Protocol { .. } => true,
            TransportError::Io(_) => true,
            TransportError::Serialization(_) => true,
        }
    }

    /// Get error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            TransportError::Delivery { .. } => "delivery",
            TransportError::SocketClosed { .. } => "socket_closed",
            TransportError::Authorization => "authorization",
            TransportError::UnknownTarget { .. } => "unknown_target",
            TransportError::Timeout { .. } => "timeout",
            TransportError::Connection { .. } => "connection",
            TransportError::Protocol { .. } => "protocol",
            TransportError::Io(_) => "io",
            TransportError::Serialization(_) => "serialization",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_error_construction() {
        let err = TransportError::delivery("ACK for message abc is missing", json!({"n": 1}));
        assert_eq!(err.category(), "delivery");
        assert!(err.is_recoverable());
    }

    #[test]
    fn test_authorization_is_terminal() {
        assert!(!TransportError::Authorization.is_recoverable());
        assert!(TransportError::socket_closed("nodeA", "code 1006").is_recoverable());
    }

    #[test]
    fn test_delivery_names_payload() {
        let err = TransportError::delivery("missing", json!("PING"));
        match err {
            TransportError::Delivery { payload, .. } => assert_eq!(payload, json!("PING")),
            _ => panic!("Expected Delivery error"),
        }
    }
}
