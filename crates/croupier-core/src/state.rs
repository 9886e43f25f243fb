//! Connection state of a client against the Agent.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle state of the client's logical connection.
///
/// ```text
/// Disconnected ──▶ Connecting ──▶ Connected ◀──▶ Reloading
///      ▲               │              │
///      │               ▼              ▼
///      └─────────── Error ◀───────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    /// Connected, with a function push in flight.
    Reloading,
    /// Last connect failed or the Agent stopped answering probes.
    Error,
}

impl ConnectionState {
    /// Returns true if the Agent currently holds our registrations.
    pub fn is_connected(self) -> bool {
        matches!(self, Self::Connected | Self::Reloading)
    }

    /// Returns true if a `connect()` may start from this state.
    pub fn can_connect(self) -> bool {
        matches!(self, Self::Disconnected | Self::Error)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reloading => "reloading",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
