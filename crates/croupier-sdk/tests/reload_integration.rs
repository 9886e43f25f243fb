//! Reload coordination through the public client: rollback, mutual
//! exclusion, batch semantics and file-driven reloads.

use std::sync::Arc;
use std::time::Duration;

use croupier_core::{handler_fn, ConnectionState, HotReloadConfig};
use croupier_sdk::transport::{MemoryAgent, MemoryTransport};
use croupier_sdk::{ChangeEvent, ClientError, FunctionUpdate, HotReloadClient};
use serde_json::json;

async fn connected_client(ids: &[&str]) -> (Arc<HotReloadClient>, MemoryAgent) {
    let (transport, agent) = MemoryTransport::new();
    let client = HotReloadClient::new(HotReloadConfig::default(), transport).unwrap();
    for id in ids {
        client.register(*id, "1.0.0", handler_fn(Ok)).await.unwrap();
    }
    client.connect().await.unwrap();
    (Arc::new(client), agent)
}

#[tokio::test]
async fn test_failed_push_restores_previous_binding() {
    let (client, agent) = connected_client(&["player.ban"]).await;
    let before = client.get("player.ban").await.unwrap();
    agent.reject_function("player.ban");

    let err = client
        .reload_function("player.ban", "2.0.0", handler_fn(|_| Ok(json!("v2"))))
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::TransportFailure(_)));

    let after = client.get("player.ban").await.unwrap();
    assert_eq!(after.version, before.version);
    assert_eq!(after.registered_at, before.registered_at);
    assert_eq!(agent.registered_version("player.ban").as_deref(), Some("1.0.0"));
    assert_eq!(client.invoke("player.ban", json!("p-1")).await.unwrap(), json!("p-1"));

    let status = client.status();
    assert_eq!(status.failed_reloads, 1);
    assert_eq!(status.function_reloads, 0);
    assert_eq!(status.connection_state, ConnectionState::Connected);
}

#[tokio::test]
async fn test_successful_reload_swaps_handler() {
    let (client, agent) = connected_client(&["player.ban"]).await;

    client
        .reload_function("player.ban", "2.0.0", handler_fn(|_| Ok(json!("v2"))))
        .await
        .unwrap();

    assert_eq!(client.invoke("player.ban", json!(null)).await.unwrap(), json!("v2"));
    assert_eq!(agent.registered_version("player.ban").as_deref(), Some("2.0.0"));
    assert_eq!(agent.register_single_calls(), 1);
    assert_eq!(client.status().function_reloads, 1);
}

#[tokio::test]
async fn test_concurrent_reloads_one_rejected() {
    let (client, agent) = connected_client(&["player.ban", "server.status"]).await;
    agent.set_latency(Duration::from_millis(50));

    let (first, second) = tokio::join!(
        client.reload_function("player.ban", "2.0.0", handler_fn(Ok)),
        client.reload_functions(vec![FunctionUpdate::new(
            "server.status",
            "2.0.0",
            handler_fn(Ok)
        )]),
    );

    assert!(first.is_ok());
    assert!(matches!(
        second,
        Err(ClientError::OperationInProgress {
            operation: "reload_functions"
        })
    ));
    assert_eq!(client.get("server.status").await.unwrap().version, "1.0.0");
    assert_eq!(agent.register_single_calls(), 1);
}

#[tokio::test]
async fn test_register_rejected_during_reload() {
    let (client, agent) = connected_client(&["player.ban"]).await;
    agent.set_latency(Duration::from_millis(200));

    let mut states = client.subscribe_state();
    let reloader = Arc::clone(&client);
    let reload = tokio::spawn(async move {
        reloader
            .reload_function("player.ban", "2.0.0", handler_fn(Ok))
            .await
    });

    states
        .wait_for(|s| *s == ConnectionState::Reloading)
        .await
        .unwrap();
    assert!(client.is_reloading());

    let err = client
        .register("player.kick", "1.0.0", handler_fn(Ok))
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::OperationInProgress { .. }));

    reload.await.unwrap().unwrap();
    assert!(!client.is_reloading());
    client
        .register("player.kick", "1.0.0", handler_fn(Ok))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_batch_partial_failure_commits_the_rest() {
    let (client, agent) = connected_client(&["fn.a", "fn.b", "fn.c"]).await;
    agent.reject_function("fn.b");

    let batch = ["fn.a", "fn.b", "fn.c"]
        .into_iter()
        .map(|id| FunctionUpdate::new(id, "2.0.0", handler_fn(Ok)))
        .collect();
    let err = client.reload_functions(batch).await.unwrap_err();

    match err {
        ClientError::PartialBatchFailure {
            attempted,
            failures,
        } => {
            assert_eq!(attempted, 3);
            assert_eq!(failures.len(), 1);
            assert_eq!(failures[0].id.as_str(), "fn.b");
        }
        other => panic!("Expected PartialBatchFailure, got {other:?}"),
    }

    assert_eq!(client.get("fn.a").await.unwrap().version, "2.0.0");
    assert_eq!(client.get("fn.b").await.unwrap().version, "1.0.0");
    assert_eq!(client.get("fn.c").await.unwrap().version, "2.0.0");
    assert_eq!(agent.registered_version("fn.a").as_deref(), Some("2.0.0"));
    assert_eq!(agent.registered_version("fn.c").as_deref(), Some("2.0.0"));

    let status = client.status();
    assert_eq!(status.function_reloads, 2);
    assert_eq!(status.failed_reloads, 1);
}

#[tokio::test]
async fn test_batch_success_returns_ids() {
    let (client, _agent) = connected_client(&["fn.a", "fn.b"]).await;

    let reloaded = client
        .reload_functions(vec![
            FunctionUpdate::new("fn.a", "2.0.0", handler_fn(Ok)),
            FunctionUpdate::new("fn.b", "2.0.0", handler_fn(Ok)),
        ])
        .await
        .unwrap();

    let ids: Vec<&str> = reloaded.iter().map(|id| id.as_str()).collect();
    assert_eq!(ids, vec!["fn.a", "fn.b"]);
}

#[tokio::test]
async fn test_config_reload_keeps_connection() {
    let (client, _agent) = connected_client(&["player.ban"]).await;

    let new_config = HotReloadConfig {
        health_check_interval: 10.0,
        ..HotReloadConfig::default()
    };
    client.reload_config(new_config).await.unwrap();
    client.restart_background_tasks().unwrap();

    assert_eq!(client.config().health_check_interval, 10.0);
    assert_eq!(client.state(), ConnectionState::Connected);
    assert_eq!(client.status().config_reloads, 1);

    client.graceful_shutdown(Some(Duration::from_secs(5))).await.unwrap();
}

#[tokio::test]
async fn test_change_events_drive_policy_reloads() {
    let (transport, agent) = MemoryTransport::new();
    let client = HotReloadClient::new(HotReloadConfig::default(), transport)
        .unwrap()
        .with_policy(|event: &ChangeEvent| {
            event
                .file_stem()
                .map(|stem| FunctionUpdate::new(stem, "from-file", handler_fn(Ok)))
        });
    client.connect().await.unwrap();
    client.start().unwrap();

    let sender = client.change_sender();
    sender
        .send(ChangeEvent::new("functions/player.ban.rs"))
        .await
        .unwrap();
    sender
        .send(ChangeEvent::new("functions/settings.toml"))
        .await
        .unwrap();

    let mut attempts = 0;
    while agent.registered_version("player.ban").is_none() && attempts < 100 {
        tokio::time::sleep(Duration::from_millis(10)).await;
        attempts += 1;
    }

    assert_eq!(agent.registered_version("player.ban").as_deref(), Some("from-file"));
    assert_eq!(client.functions().await.unwrap().len(), 1);
    assert_eq!(client.status().function_reloads, 1);

    client.graceful_shutdown(Some(Duration::from_secs(5))).await.unwrap();
}

#[tokio::test]
async fn test_polling_watcher_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = HotReloadConfig::default();
    config.file_watching.enabled = true;
    config.file_watching.watch_dir = dir.path().to_path_buf();
    config.file_watching.poll_interval = 0.05;

    let (transport, agent) = MemoryTransport::new();
    let client = HotReloadClient::new(config, transport)
        .unwrap()
        .with_policy(|event: &ChangeEvent| {
            event
                .file_stem()
                .map(|stem| FunctionUpdate::new(stem, "watched", handler_fn(Ok)))
        });
    client.connect().await.unwrap();
    client.start().unwrap();

    tokio::time::sleep(Duration::from_millis(200)).await;
    std::fs::write(dir.path().join("server.status.rs"), "// v2").unwrap();

    let mut attempts = 0;
    while agent.registered_version("server.status").is_none() && attempts < 200 {
        tokio::time::sleep(Duration::from_millis(25)).await;
        attempts += 1;
    }
    assert_eq!(agent.registered_version("server.status").as_deref(), Some("watched"));

    client.graceful_shutdown(Some(Duration::from_secs(5))).await.unwrap();
}
