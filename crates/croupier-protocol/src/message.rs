//! Protocol message types for Agent communication.

use crate::version::ProtocolVersion;
use croupier_core::FunctionDescriptor;
use serde::{Deserialize, Serialize};

/// Message types that can be sent by the SDK to the Agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageType {
    /// Handshake
    Connect {
        #[serde(skip_serializing_if = "Option::is_none")]
        client_id: Option<String>,
    },

    /// Replace every registration held by the Agent for this client.
    RegisterAll { functions: Vec<FunctionDescriptor> },

    /// Add or replace one registration.
    RegisterFunction { function: FunctionDescriptor },

    /// Liveness probe
    Ping { seq: u64 },

    /// Client disconnecting gracefully
    Disconnect,
}

/// Messages sent from the SDK to the Agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientMessage {
    pub protocol_version: ProtocolVersion,

    #[serde(flatten)]
    pub message: MessageType,
}

impl ClientMessage {
    /// Creates a new client message with current protocol version.
    pub fn new(message: MessageType) -> Self {
        Self {
            protocol_version: ProtocolVersion::CURRENT,
            message,
        }
    }

    pub fn connect(client_id: Option<String>) -> Self {
        Self::new(MessageType::Connect { client_id })
    }

    pub fn register_all(functions: Vec<FunctionDescriptor>) -> Self {
        Self::new(MessageType::RegisterAll { functions })
    }

    pub fn register_function(function: FunctionDescriptor) -> Self {
        Self::new(MessageType::RegisterFunction { function })
    }

    pub fn ping(seq: u64) -> Self {
        Self::new(MessageType::Ping { seq })
    }

    pub fn disconnect() -> Self {
        Self::new(MessageType::Disconnect)
    }
}

/// Messages sent from the Agent to the SDK.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentMessage {
    /// Handshake accepted
    Connected {
        protocol_version: ProtocolVersion,
        session_id: String,
    },

    /// Handshake refused
    Rejected {
        reason: String,
        protocol_version: ProtocolVersion,
    },

    /// Acknowledges `register_all` / `register_function`.
    Registered { count: usize },

    Pong { seq: u64 },

    /// Request failed on the Agent side
    Error {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        code: Option<String>,
    },
}

impl AgentMessage {
    pub fn connected(session_id: impl Into<String>) -> Self {
        Self::Connected {
            protocol_version: ProtocolVersion::CURRENT,
            session_id: session_id.into(),
        }
    }

    pub fn rejected(reason: impl Into<String>) -> Self {
        Self::Rejected {
            reason: reason.into(),
            protocol_version: ProtocolVersion::CURRENT,
        }
    }

    pub fn registered(count: usize) -> Self {
        Self::Registered { count }
    }

    pub fn pong(seq: u64) -> Self {
        Self::Pong { seq }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
            code: None,
        }
    }
}
