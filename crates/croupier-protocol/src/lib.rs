//! Croupier Protocol - Wire protocol for Agent communication
//!
//! Messages are newline-delimited JSON objects tagged by `type`. Every
//! client message carries the protocol version it was written against.

pub mod message;
pub mod version;

pub use message::{AgentMessage, ClientMessage, MessageType};
pub use version::{ProtocolVersion, VersionError};
