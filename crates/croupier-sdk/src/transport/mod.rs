//! Transport seam between the connection manager and the Agent.
//!
//! The [`ConnectionManager`](crate::connection::ConnectionManager) owns
//! exactly one boxed [`Transport`] and drives it under its transport lock, so
//! implementations never see concurrent calls.
//!
//! Two implementations ship with the SDK:
//! - [`MemoryTransport`]: in-process fake with latency and failure injection,
//!   steered through its [`MemoryAgent`] handle.
//! - [`UnixSocketTransport`]: line-delimited JSON over a Unix socket.

use async_trait::async_trait;
use croupier_core::FunctionDescriptor;

use crate::error::TransportError;

mod memory;
mod socket;

pub use memory::{MemoryAgent, MemoryTransport};
pub use socket::{UnixSocketTransport, DEFAULT_REQUEST_TIMEOUT, DEFAULT_SOCKET_PATH};

/// Session-oriented channel to the Agent.
#[async_trait]
pub trait Transport: Send {
    /// Opens a session. Called on every connect, including reconnects.
    async fn open(&mut self) -> Result<(), TransportError>;

    /// Ends the session. Must tolerate being called when nothing is open.
    async fn close(&mut self) -> Result<(), TransportError>;

    /// Replaces every registration the Agent holds for this client.
    async fn register_all(&mut self, functions: &[FunctionDescriptor])
        -> Result<(), TransportError>;

    /// Adds or replaces a single registration.
    async fn register_single(&mut self, function: &FunctionDescriptor)
        -> Result<(), TransportError>;

    /// Lightweight liveness check.
    async fn probe_health(&mut self) -> Result<(), TransportError>;
}
