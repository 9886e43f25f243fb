//! Integration tests for the Unix socket transport against an in-test Agent.
//!
//! Tests CAN use `.unwrap()` and `.expect()`.

use std::path::PathBuf;
use std::time::Duration;

use chrono::Utc;
use croupier_core::{handler_fn, FunctionDescriptor, FunctionId, HotReloadConfig};
use croupier_protocol::{AgentMessage, ClientMessage, MessageType, ProtocolVersion};
use croupier_sdk::transport::{Transport, UnixSocketTransport};
use croupier_sdk::{ClientError, HotReloadClient, TransportError};
use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::mpsc;

// ============================================================================
// Test Agent
// ============================================================================

#[derive(Debug, Clone, Copy)]
enum Behavior {
    Normal,
    /// Answers the handshake with an incompatible major version.
    FutureVersion,
    /// Completes the handshake, then never answers.
    Silent,
    /// Refuses the handshake at the current version.
    Refuse,
    /// Refuses the handshake while speaking an incompatible version.
    RefuseFutureVersion,
}

struct TestAgent {
    socket_path: PathBuf,
    received: mpsc::UnboundedReceiver<ClientMessage>,
    _temp_dir: TempDir,
}

impl TestAgent {
    fn spawn(behavior: Behavior) -> Self {
        let temp_dir = tempfile::tempdir().expect("create temp dir");
        let socket_path = temp_dir.path().join("agent.sock");
        let listener = UnixListener::bind(&socket_path).expect("bind agent socket");
        let (tx, received) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            let mut sessions = 0u32;
            while let Ok((stream, _)) = listener.accept().await {
                sessions += 1;
                tokio::spawn(serve(stream, behavior, format!("session-{sessions}"), tx.clone()));
            }
        });

        Self {
            socket_path,
            received,
            _temp_dir: temp_dir,
        }
    }

    fn drain(&mut self) -> Vec<MessageType> {
        let mut messages = Vec::new();
        while let Ok(msg) = self.received.try_recv() {
            messages.push(msg.message);
        }
        messages
    }
}

async fn serve(
    stream: UnixStream,
    behavior: Behavior,
    session_id: String,
    seen: mpsc::UnboundedSender<ClientMessage>,
) {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    while let Ok(Some(line)) = lines.next_line().await {
        let msg: ClientMessage = serde_json::from_str(&line).expect("valid client message");
        let _ = seen.send(msg.clone());

        let reply = match (&msg.message, behavior) {
            (MessageType::Connect { .. }, Behavior::FutureVersion) => AgentMessage::Connected {
                protocol_version: ProtocolVersion::new(2, 0),
                session_id: session_id.clone(),
            },
            (MessageType::Connect { .. }, Behavior::Refuse) => {
                AgentMessage::rejected("too many clients")
            }
            (MessageType::Connect { .. }, Behavior::RefuseFutureVersion) => AgentMessage::Rejected {
                reason: "upgrade required".to_string(),
                protocol_version: ProtocolVersion::new(2, 0),
            },
            (MessageType::Connect { .. }, _) => AgentMessage::connected(session_id.clone()),
            (MessageType::Disconnect, _) => break,
            (_, Behavior::Silent) => continue,
            (MessageType::RegisterAll { functions }, _) => AgentMessage::registered(functions.len()),
            (MessageType::RegisterFunction { function }, _) if function.id.as_str() == "bad" => {
                AgentMessage::error("function rejected")
            }
            (MessageType::RegisterFunction { .. }, _) => AgentMessage::registered(1),
            (MessageType::Ping { seq }, _) => AgentMessage::pong(*seq),
        };

        let mut json = serde_json::to_string(&reply).expect("serialize reply");
        json.push('\n');
        if writer.write_all(json.as_bytes()).await.is_err() {
            break;
        }
    }
}

fn descriptor(id: &str, version: &str) -> FunctionDescriptor {
    FunctionDescriptor {
        id: FunctionId::new(id),
        version: version.to_string(),
        registered_at: Utc::now(),
    }
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn test_full_session() {
    let mut agent = TestAgent::spawn(Behavior::Normal);
    let mut transport = UnixSocketTransport::new(&agent.socket_path).with_client_id("sdk-test");

    transport.open().await.unwrap();
    assert_eq!(transport.session_id(), Some("session-1"));

    transport
        .register_all(&[descriptor("player.ban", "1.0.0"), descriptor("server.status", "1.0.0")])
        .await
        .unwrap();
    transport
        .register_single(&descriptor("player.ban", "1.1.0"))
        .await
        .unwrap();
    transport.probe_health().await.unwrap();
    transport.probe_health().await.unwrap();
    transport.close().await.unwrap();
    assert!(transport.session_id().is_none());

    tokio::time::sleep(Duration::from_millis(50)).await;
    let messages = agent.drain();
    assert!(matches!(
        &messages[0],
        MessageType::Connect { client_id: Some(id) } if id == "sdk-test"
    ));
    assert!(matches!(&messages[1], MessageType::RegisterAll { functions } if functions.len() == 2));
    assert!(matches!(
        &messages[2],
        MessageType::RegisterFunction { function } if function.version == "1.1.0"
    ));
    assert!(matches!(messages[3], MessageType::Ping { seq: 1 }));
    assert!(matches!(messages[4], MessageType::Ping { seq: 2 }));
    assert!(matches!(messages[5], MessageType::Disconnect));
}

#[tokio::test]
async fn test_agent_error_is_rejection() {
    let agent = TestAgent::spawn(Behavior::Normal);
    let mut transport = UnixSocketTransport::new(&agent.socket_path);
    transport.open().await.unwrap();

    let err = transport
        .register_single(&descriptor("bad", "1.0.0"))
        .await
        .unwrap_err();
    assert!(matches!(err, TransportError::Rejected(msg) if msg == "function rejected"));

    // A refusal is an answer; the session stays usable.
    transport.probe_health().await.unwrap();
}

#[tokio::test]
async fn test_incompatible_version_rejected() {
    let agent = TestAgent::spawn(Behavior::FutureVersion);
    let mut transport = UnixSocketTransport::new(&agent.socket_path);

    let err = transport.open().await.unwrap_err();
    match err {
        TransportError::VersionMismatch {
            client_version,
            agent_version,
        } => {
            assert_eq!(client_version, ProtocolVersion::CURRENT.to_string());
            assert_eq!(agent_version, "2.0");
        }
        other => panic!("Expected VersionMismatch, got {other:?}"),
    }
    assert!(transport.session_id().is_none());
}

#[tokio::test]
async fn test_refused_handshake() {
    let agent = TestAgent::spawn(Behavior::Refuse);
    let mut transport = UnixSocketTransport::new(&agent.socket_path);
    let err = transport.open().await.unwrap_err();
    assert!(matches!(err, TransportError::Rejected(reason) if reason == "too many clients"));

    let agent = TestAgent::spawn(Behavior::RefuseFutureVersion);
    let mut transport = UnixSocketTransport::new(&agent.socket_path);
    let err = transport.open().await.unwrap_err();
    assert!(matches!(
        err,
        TransportError::VersionMismatch { ref agent_version, .. } if agent_version == "2.0"
    ));
    assert!(transport.session_id().is_none());
}

#[tokio::test]
async fn test_request_timeout_drops_session() {
    let agent = TestAgent::spawn(Behavior::Silent);
    let mut transport = UnixSocketTransport::new(&agent.socket_path)
        .with_request_timeout(Duration::from_millis(100));
    transport.open().await.unwrap();

    let err = transport.probe_health().await.unwrap_err();
    assert!(matches!(err, TransportError::Timeout(_)));

    let err = transport.probe_health().await.unwrap_err();
    assert!(matches!(err, TransportError::NotOpen));
}

#[tokio::test]
async fn test_missing_socket_is_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let mut transport = UnixSocketTransport::new(dir.path().join("nobody.sock"));

    let err = transport.open().await.unwrap_err();
    assert!(matches!(err, TransportError::Io(_)));
    transport.close().await.unwrap();
}

#[tokio::test]
async fn test_client_over_socket() {
    let mut agent = TestAgent::spawn(Behavior::Normal);
    let transport = UnixSocketTransport::new(&agent.socket_path);
    let client = HotReloadClient::new(HotReloadConfig::default(), transport).unwrap();

    client.register("player.ban", "1.0.0", handler_fn(Ok)).await.unwrap();
    client.connect().await.unwrap();
    client
        .reload_function("player.ban", "1.1.0", handler_fn(Ok))
        .await
        .unwrap();

    let err = client
        .reload_function("bad", "1.0.0", handler_fn(Ok))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ClientError::TransportFailure(TransportError::Rejected(_))
    ));
    assert!(matches!(client.get("bad").await, Err(ClientError::NotFound(_))));

    client.reconnect().await.unwrap();
    client
        .graceful_shutdown(Some(Duration::from_secs(5)))
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(50)).await;
    let registrations = agent
        .drain()
        .into_iter()
        .filter(|m| matches!(m, MessageType::RegisterAll { .. }))
        .count();
    assert_eq!(registrations, 2);
}
