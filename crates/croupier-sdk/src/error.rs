//! Error types for the hot-reload client.
//!
//! `ClientError` is what every public operation returns. Transport
//! collaborators report failures as `TransportError`, which the connection
//! manager wraps in `ClientError::TransportFailure`.
//!
//! **Panic-Free Policy:** This module follows the project's panic-free guidelines.
//! No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, or `todo!()`.

use std::fmt;
use std::io;
use std::time::Duration;

use croupier_core::{ConfigError, FunctionId, HandlerError};
use croupier_protocol::VersionError;
use thiserror::Error;

// ============================================================================
// Transport Error
// ============================================================================

/// Failure reported by a [`Transport`](crate::transport::Transport).
#[derive(Error, Debug, Clone)]
pub enum TransportError {
    /// An operation needing an open session was called without one.
    #[error("transport is not open")]
    NotOpen,

    /// The peer closed the session.
    #[error("connection closed by agent")]
    Closed,

    /// Low-level I/O failure (kept as text so the error stays cloneable).
    #[error("I/O error: {0}")]
    Io(String),

    /// A message could not be encoded, decoded, or was unexpected.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The Agent refused the request.
    #[error("rejected by agent: {0}")]
    Rejected(String),

    #[error("protocol version mismatch (client: {client_version}, agent: {agent_version})")]
    VersionMismatch {
        client_version: String,
        agent_version: String,
    },

    /// No reply within the request deadline.
    #[error("timed out after {0:?}")]
    Timeout(Duration),
}

impl From<io::Error> for TransportError {
    fn from(err: io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<VersionError> for TransportError {
    fn from(err: VersionError) -> Self {
        match err {
            VersionError::Incompatible { got, expected } => Self::VersionMismatch {
                client_version: expected,
                agent_version: got,
            },
        }
    }
}

impl From<serde_json::Error> for TransportError {
    fn from(err: serde_json::Error) -> Self {
        Self::Protocol(err.to_string())
    }
}

// ============================================================================
// Client Error
// ============================================================================

/// One failed item of a batch reload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchFailure {
    pub id: FunctionId,
    pub message: String,
}

impl fmt::Display for BatchFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.id, self.message)
    }
}

/// Errors returned by client operations.
#[derive(Error, Debug, Clone)]
pub enum ClientError {
    /// A reload (or connect) is already running.
    #[error("{operation} rejected: another operation is in progress")]
    OperationInProgress { operation: &'static str },

    #[error("already connected to agent")]
    AlreadyConnected,

    #[error("function not found: {0}")]
    NotFound(FunctionId),

    #[error("transport failure: {0}")]
    TransportFailure(#[from] TransportError),

    /// Every attempt of a recovery cycle failed.
    #[error("all {attempts} reconnection attempts failed")]
    ReconnectExhausted { attempts: u32 },

    /// Some items of a batch reload failed; the others stay committed.
    #[error(
        "failed to reload {} out of {attempted} functions: {}",
        .failures.len(),
        join_failures(.failures)
    )]
    PartialBatchFailure {
        attempted: usize,
        failures: Vec<BatchFailure>,
    },

    #[error("graceful shutdown timed out after {timeout:?}")]
    ShutdownTimeout { timeout: Duration },

    #[error("invalid configuration: {0}")]
    InvalidConfig(#[from] ConfigError),

    #[error(transparent)]
    Handler(#[from] HandlerError),

    /// The registry actor has stopped.
    #[error("registry channel closed")]
    ChannelClosed,
}

fn join_failures(failures: &[BatchFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Convenience Result type alias for client operations.
pub type Result<T> = std::result::Result<T, ClientError>;

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_in_progress_display() {
        let err = ClientError::OperationInProgress {
            operation: "reload_function",
        };
        assert_eq!(
            err.to_string(),
            "reload_function rejected: another operation is in progress"
        );
    }

    #[test]
    fn test_partial_batch_failure_lists_items() {
        let err = ClientError::PartialBatchFailure {
            attempted: 3,
            failures: vec![BatchFailure {
                id: FunctionId::new("player.ban"),
                message: "rejected by agent: schema mismatch".to_string(),
            }],
        };
        let display = err.to_string();
        assert!(display.contains("failed to reload 1 out of 3 functions"));
        assert!(display.contains("player.ban: rejected by agent: schema mismatch"));
    }

    #[test]
    fn test_transport_error_conversions() {
        let io_error = io::Error::new(io::ErrorKind::ConnectionRefused, "refused");
        let transport: TransportError = io_error.into();
        assert!(matches!(transport, TransportError::Io(_)));

        let client: ClientError = transport.into();
        assert!(matches!(client, ClientError::TransportFailure(_)));
        assert!(client.to_string().contains("refused"));
    }

    #[test]
    fn test_incompatible_version_maps_to_mismatch() {
        use croupier_protocol::ProtocolVersion;

        let err = ProtocolVersion::new(1, 0)
            .ensure_compatible(&ProtocolVersion::new(3, 1))
            .unwrap_err();
        let transport: TransportError = err.into();

        match transport {
            TransportError::VersionMismatch {
                client_version,
                agent_version,
            } => {
                assert_eq!(client_version, "1.0");
                assert_eq!(agent_version, "3.1");
            }
            other => panic!("Expected VersionMismatch, got {other:?}"),
        }
    }

    #[test]
    fn test_json_error_becomes_protocol_error() {
        let json_error = serde_json::from_str::<serde_json::Value>("{ nope").unwrap_err();
        let transport: TransportError = json_error.into();
        assert!(matches!(transport, TransportError::Protocol(_)));
    }

    #[test]
    fn test_reconnect_exhausted_display() {
        let err = ClientError::ReconnectExhausted { attempts: 4 };
        assert_eq!(err.to_string(), "all 4 reconnection attempts failed");
    }
}
