//! Unix socket transport speaking line-delimited JSON.
//!
//! Each request is one [`ClientMessage`] line, answered by exactly one
//! [`AgentMessage`] line. A session starts with a `connect`/`connected`
//! handshake whose protocol version must be compatible with ours.
//!
//! **Panic-Free Policy:** This module follows the project's panic-free guidelines.
//! No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, or `todo!()`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use croupier_core::FunctionDescriptor;
use croupier_protocol::{AgentMessage, ClientMessage, ProtocolVersion};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::UnixStream;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::Transport;
use crate::error::TransportError;

/// Socket path used when nothing else is configured.
pub const DEFAULT_SOCKET_PATH: &str = "/tmp/croupier-agent.sock";

/// Deadline for each request/response exchange.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Maximum accepted response line (1 MiB).
const MAX_LINE_BYTES: usize = 1024 * 1024;

struct Session {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    session_id: String,
}

/// Transport talking to an Agent listening on a Unix socket.
pub struct UnixSocketTransport {
    socket_path: PathBuf,
    client_id: Option<String>,
    request_timeout: Duration,
    session: Option<Session>,
    next_seq: u64,
}

impl UnixSocketTransport {
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
            client_id: None,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            session: None,
            next_seq: 0,
        }
    }

    /// Identifier announced in the handshake.
    #[must_use]
    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    #[must_use]
    pub fn with_request_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = request_timeout;
        self
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Session id assigned by the Agent, while a session is open.
    pub fn session_id(&self) -> Option<&str> {
        self.session.as_ref().map(|s| s.session_id.as_str())
    }

    /// Sends one request and waits for its reply.
    ///
    /// Any failure tears the session down; the stream position is no longer
    /// trustworthy once a reply went missing.
    async fn request(&mut self, message: &ClientMessage) -> Result<AgentMessage, TransportError> {
        let request_timeout = self.request_timeout;
        let session = self.session.as_mut().ok_or(TransportError::NotOpen)?;

        let result = match timeout(request_timeout, exchange(session, message)).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout(request_timeout)),
        };

        if result.is_err() {
            self.session = None;
        }
        result
    }

    async fn expect_registered(&mut self, message: ClientMessage) -> Result<(), TransportError> {
        match self.request(&message).await? {
            AgentMessage::Registered { count } => {
                debug!(count, "Agent acknowledged registration");
                Ok(())
            }
            AgentMessage::Error { message, code } => {
                warn!(error = %message, code = ?code, "Agent refused registration");
                Err(TransportError::Rejected(message))
            }
            other => Err(TransportError::Protocol(format!(
                "unexpected reply to registration: {other:?}"
            ))),
        }
    }
}

async fn write_message(
    writer: &mut OwnedWriteHalf,
    message: &ClientMessage,
) -> Result<(), TransportError> {
    let json = serde_json::to_string(message)?;
    writer.write_all(json.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await?;
    debug!(message_type = ?message.message, "Sent message to agent");
    Ok(())
}

async fn read_message(reader: &mut BufReader<OwnedReadHalf>) -> Result<AgentMessage, TransportError> {
    let mut line = String::new();
    let read = reader.read_line(&mut line).await?;
    if read == 0 {
        return Err(TransportError::Closed);
    }
    if line.len() > MAX_LINE_BYTES {
        return Err(TransportError::Protocol(format!(
            "response of {} bytes exceeds limit",
            line.len()
        )));
    }
    Ok(serde_json::from_str(line.trim())?)
}

async fn exchange(
    session: &mut Session,
    message: &ClientMessage,
) -> Result<AgentMessage, TransportError> {
    write_message(&mut session.writer, message).await?;
    read_message(&mut session.reader).await
}

#[async_trait]
impl Transport for UnixSocketTransport {
    async fn open(&mut self) -> Result<(), TransportError> {
        if self.session.is_some() {
            self.close().await?;
        }

        debug!(socket_path = %self.socket_path.display(), "Connecting to agent");

        let request_timeout = self.request_timeout;
        let stream = timeout(request_timeout, UnixStream::connect(&self.socket_path))
            .await
            .map_err(|_| TransportError::Timeout(request_timeout))??;

        let (reader, mut writer) = stream.into_split();
        let mut reader = BufReader::new(reader);

        let handshake = async {
            write_message(&mut writer, &ClientMessage::connect(self.client_id.clone())).await?;
            read_message(&mut reader).await
        };
        let response = timeout(request_timeout, handshake)
            .await
            .map_err(|_| TransportError::Timeout(request_timeout))??;

        let session_id = match response {
            AgentMessage::Connected {
                protocol_version,
                session_id,
            } => {
                ProtocolVersion::CURRENT.ensure_compatible(&protocol_version)?;
                info!(
                    session_id = %session_id,
                    protocol_version = %protocol_version,
                    "Handshake complete"
                );
                session_id
            }
            AgentMessage::Rejected {
                reason,
                protocol_version,
            } => {
                // Refusals over an incompatible version surface as VersionMismatch.
                ProtocolVersion::CURRENT.ensure_compatible(&protocol_version)?;
                return Err(TransportError::Rejected(reason));
            }
            other => {
                return Err(TransportError::Protocol(format!(
                    "unexpected response to connect: {other:?}"
                )));
            }
        };

        self.session = Some(Session {
            reader,
            writer,
            session_id,
        });
        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        let Some(mut session) = self.session.take() else {
            return Ok(());
        };

        let goodbye = async {
            write_message(&mut session.writer, &ClientMessage::disconnect()).await?;
            session.writer.shutdown().await?;
            Ok::<(), TransportError>(())
        };
        match timeout(self.request_timeout, goodbye).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout(self.request_timeout)),
        }
    }

    async fn register_all(
        &mut self,
        functions: &[FunctionDescriptor],
    ) -> Result<(), TransportError> {
        self.expect_registered(ClientMessage::register_all(functions.to_vec()))
            .await
    }

    async fn register_single(
        &mut self,
        function: &FunctionDescriptor,
    ) -> Result<(), TransportError> {
        self.expect_registered(ClientMessage::register_function(function.clone()))
            .await
    }

    async fn probe_health(&mut self) -> Result<(), TransportError> {
        self.next_seq = self.next_seq.wrapping_add(1);
        let seq = self.next_seq;

        match self.request(&ClientMessage::ping(seq)).await? {
            AgentMessage::Pong { seq: echoed } if echoed == seq => Ok(()),
            AgentMessage::Pong { seq: echoed } => {
                self.session = None;
                Err(TransportError::Protocol(format!(
                    "pong sequence mismatch (sent {seq}, got {echoed})"
                )))
            }
            AgentMessage::Error { message, .. } => Err(TransportError::Rejected(message)),
            other => Err(TransportError::Protocol(format!(
                "unexpected reply to ping: {other:?}"
            ))),
        }
    }
}
