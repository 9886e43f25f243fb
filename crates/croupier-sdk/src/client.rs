//! `HotReloadClient` - the public entry point.
//!
//! Wires the registry, connection manager, reload coordinator and the
//! background tasks together and owns their shutdown signal.
//!
//! **Panic-Free Policy:** This module follows the project's panic-free guidelines.
//! No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, or `todo!()`.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use croupier_core::{
    ConnectionState, FunctionBinding, FunctionHandler, FunctionId, HotReloadConfig, ReloadMetrics,
};
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::connection::ConnectionManager;
use crate::error::{ClientError, Result};
use crate::gate::ReloadGate;
use crate::health::spawn_health_monitor;
use crate::metrics::MetricsRecorder;
use crate::notifier::{
    spawn_change_listener, ChangeEvent, IgnoreChanges, PollingWatcher, ReloadPolicy,
    CHANGE_CHANNEL_CAPACITY,
};
use crate::reconnect::spawn_reconnect_loop;
use crate::registry::{spawn_registry, RegistryHandle};
use crate::reload::{FunctionUpdate, ReloadCoordinator};
use crate::transport::Transport;

// ============================================================================
// Background Tasks
// ============================================================================

/// Handles of the interval-driven tasks of one `start` epoch.
#[derive(Default)]
struct LoopTasks {
    cancel: Option<CancellationToken>,
    reconnect: Option<JoinHandle<()>>,
    health: Option<JoinHandle<()>>,
    watcher: Option<JoinHandle<()>>,
}

impl LoopTasks {
    fn abort(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel.cancel();
        }
        for handle in [self.reconnect.take(), self.health.take(), self.watcher.take()]
            .into_iter()
            .flatten()
        {
            handle.abort();
        }
    }
}

#[derive(Default)]
struct Tasks {
    loops: LoopTasks,
    listener: Option<JoinHandle<()>>,
    changes_rx: Option<mpsc::Receiver<ChangeEvent>>,
}

// ============================================================================
// Client
// ============================================================================

/// Reload-aware client for registering game functions with the Agent.
///
/// # Example
///
/// ```no_run
/// use croupier_core::{handler_fn, HotReloadConfig};
/// use croupier_sdk::{HotReloadClient, UnixSocketTransport};
/// use serde_json::json;
///
/// #[tokio::main]
/// async fn main() -> croupier_sdk::Result<()> {
///     let transport = UnixSocketTransport::new("/tmp/croupier-agent.sock");
///     let client = HotReloadClient::new(HotReloadConfig::default(), transport)?;
///
///     client
///         .register("player.ban", "1.0.0", handler_fn(|p| Ok(json!({ "banned": p }))))
///         .await?;
///     client.connect().await?;
///     client.start()?;
///
///     client
///         .reload_function("player.ban", "1.1.0", handler_fn(|p| Ok(json!({ "banned": p, "v": 2 }))))
///         .await?;
///
///     client.graceful_shutdown(None).await
/// }
/// ```
pub struct HotReloadClient {
    registry: RegistryHandle,
    gate: ReloadGate,
    connection: Arc<ConnectionManager>,
    coordinator: Arc<ReloadCoordinator>,
    metrics: Arc<MetricsRecorder>,
    policy: Arc<dyn ReloadPolicy>,
    changes_tx: mpsc::Sender<ChangeEvent>,
    tasks: Mutex<Tasks>,
    cancel: CancellationToken,
}

impl HotReloadClient {
    /// Builds a client. Must be called inside a tokio runtime.
    ///
    /// # Errors
    ///
    /// `ClientError::InvalidConfig` if `config` fails validation.
    pub fn new(config: HotReloadConfig, transport: impl Transport + 'static) -> Result<Self> {
        config.validate()?;

        let gate = ReloadGate::new();
        let registry = spawn_registry(gate.clone());
        let metrics = Arc::new(MetricsRecorder::new());
        let connection = Arc::new(ConnectionManager::new(
            Box::new(transport),
            registry.clone(),
            Arc::clone(&metrics),
        ));
        let coordinator = Arc::new(ReloadCoordinator::new(
            gate.clone(),
            registry.clone(),
            Arc::clone(&connection),
            Arc::new(config),
            Arc::clone(&metrics),
        ));
        let (changes_tx, changes_rx) = mpsc::channel(CHANGE_CHANNEL_CAPACITY);

        Ok(Self {
            registry,
            gate,
            connection,
            coordinator,
            metrics,
            policy: Arc::new(IgnoreChanges),
            changes_tx,
            tasks: Mutex::new(Tasks {
                changes_rx: Some(changes_rx),
                ..Tasks::default()
            }),
            cancel: CancellationToken::new(),
        })
    }

    /// Sets the policy mapping changed files to function reloads.
    #[must_use]
    pub fn with_policy(mut self, policy: impl ReloadPolicy + 'static) -> Self {
        self.policy = Arc::new(policy);
        self
    }

    // ========================================================================
    // Registry
    // ========================================================================

    /// Adds or replaces a function locally. The Agent learns about it on the
    /// next connect; use [`reload_function`](Self::reload_function) to push a
    /// change to a live session.
    pub async fn register(
        &self,
        id: impl Into<FunctionId>,
        version: impl Into<String>,
        handler: Arc<dyn FunctionHandler>,
    ) -> Result<()> {
        self.registry
            .register(FunctionBinding::new(id, version, handler))
            .await
    }

    pub async fn get(&self, id: impl Into<FunctionId>) -> Result<FunctionBinding> {
        self.registry.get(&id.into()).await
    }

    /// Every registered function, ordered by id.
    pub async fn functions(&self) -> Result<Vec<FunctionBinding>> {
        self.registry.snapshot().await
    }

    /// Runs the currently bound handler for `id`.
    pub async fn invoke(&self, id: impl Into<FunctionId>, payload: Value) -> Result<Value> {
        let binding = self.registry.get(&id.into()).await?;
        Ok(binding.handler.invoke(payload).await?)
    }

    // ========================================================================
    // Connection
    // ========================================================================

    pub async fn connect(&self) -> Result<()> {
        self.connection.connect().await
    }

    pub async fn disconnect(&self) {
        self.connection.disconnect().await;
    }

    pub async fn reconnect(&self) -> Result<()> {
        self.connection.reconnect().await
    }

    pub fn state(&self) -> ConnectionState {
        self.connection.state()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.connection.subscribe()
    }

    // ========================================================================
    // Reloads
    // ========================================================================

    pub async fn reload_function(
        &self,
        id: impl Into<FunctionId>,
        version: impl Into<String>,
        handler: Arc<dyn FunctionHandler>,
    ) -> Result<()> {
        self.coordinator
            .reload_function(FunctionUpdate::new(id, version, handler))
            .await
    }

    pub async fn reload_functions(&self, batch: Vec<FunctionUpdate>) -> Result<Vec<FunctionId>> {
        self.coordinator.reload_functions(batch).await
    }

    pub async fn reload_config(&self, config: HotReloadConfig) -> Result<()> {
        self.coordinator.reload_config(config).await
    }

    pub fn config(&self) -> Arc<HotReloadConfig> {
        self.coordinator.config()
    }

    pub fn is_reloading(&self) -> bool {
        self.gate.is_active()
    }

    /// Sender for feeding change events from an external watcher.
    pub fn change_sender(&self) -> mpsc::Sender<ChangeEvent> {
        self.changes_tx.clone()
    }

    /// Snapshot of counters, current state and uptime.
    pub fn status(&self) -> ReloadMetrics {
        self.metrics.snapshot(self.connection.state())
    }

    // ========================================================================
    // Background Tasks
    // ========================================================================

    /// Starts the change listener and the interval-driven tasks configured
    /// in the active configuration. Does nothing if hot reload is disabled.
    ///
    /// Calling it again restarts the interval-driven tasks.
    ///
    /// # Errors
    ///
    /// - `ClientError::InvalidConfig` if a file-watching pattern is invalid
    /// - `ClientError::ChannelClosed` if the registry actor is gone
    pub fn start(&self) -> Result<()> {
        let config = self.config();
        if !config.enabled {
            info!("Hot reload disabled, background tasks not started");
            return Ok(());
        }
        if !self.registry.is_alive() {
            error!("Function registry stopped, background tasks not started");
            return Err(ClientError::ChannelClosed);
        }

        let mut tasks = self.lock_tasks();
        if let Some(changes_rx) = tasks.changes_rx.take() {
            tasks.listener = Some(spawn_change_listener(
                Arc::clone(&self.coordinator),
                Arc::clone(&self.policy),
                changes_rx,
                self.cancel.clone(),
            ));
        }

        let loops = self.spawn_loops(&config)?;
        tasks.loops.abort();
        tasks.loops = loops;
        Ok(())
    }

    /// Restarts the interval-driven tasks with the active configuration's
    /// periods, e.g. after [`reload_config`](Self::reload_config).
    pub fn restart_background_tasks(&self) -> Result<()> {
        info!("Restarting background tasks");
        self.start()
    }

    fn spawn_loops(&self, config: &HotReloadConfig) -> Result<LoopTasks> {
        let watcher = if config.file_watching.enabled {
            Some(PollingWatcher::from_config(&config.file_watching)?)
        } else {
            None
        };

        let cancel = self.cancel.child_token();
        let mut loops = LoopTasks::default();

        if config.auto_reconnect {
            loops.reconnect = Some(spawn_reconnect_loop(
                Arc::clone(&self.connection),
                self.gate.clone(),
                self.coordinator.subscribe_config(),
                cancel.clone(),
            ));
        }

        loops.health = Some(spawn_health_monitor(
            Arc::clone(&self.connection),
            config.health_check_interval(),
            cancel.clone(),
        ));

        if let Some(watcher) = watcher {
            loops.watcher = Some(watcher.spawn(self.changes_tx.clone(), cancel.clone()));
        }

        loops.cancel = Some(cancel);
        debug!(
            auto_reconnect = config.auto_reconnect,
            file_watching = config.file_watching.enabled,
            "Background tasks spawned"
        );
        Ok(loops)
    }

    /// Stops every background task and closes the session.
    ///
    /// The change notifier is stopped first and awaited, so no reload races
    /// the final disconnect. `timeout` defaults to the configured
    /// `graceful_shutdown_timeout`.
    ///
    /// # Errors
    ///
    /// `ClientError::ShutdownTimeout` if the sequence did not finish in time;
    /// remaining tasks are aborted.
    pub async fn graceful_shutdown(&self, timeout: Option<Duration>) -> Result<()> {
        let timeout = timeout.unwrap_or_else(|| self.config().graceful_shutdown_timeout());
        info!(timeout_secs = timeout.as_secs_f64(), "Starting graceful shutdown");

        self.cancel.cancel();

        let (watcher, listener, reconnect, health) = {
            let mut tasks = self.lock_tasks();
            tasks.loops.cancel = None;
            (
                tasks.loops.watcher.take(),
                tasks.listener.take(),
                tasks.loops.reconnect.take(),
                tasks.loops.health.take(),
            )
        };

        let abort_handles: Vec<_> = [&watcher, &listener, &reconnect, &health]
            .into_iter()
            .flatten()
            .map(JoinHandle::abort_handle)
            .collect();

        let connection = Arc::clone(&self.connection);
        let sequence = async move {
            for (task, handle) in [("watcher", watcher), ("listener", listener)] {
                if let Some(handle) = handle {
                    report_exit(task, handle.await);
                }
            }
            for (task, handle) in [("reconnect", reconnect), ("health", health)] {
                if let Some(handle) = handle {
                    handle.abort();
                    report_exit(task, handle.await);
                }
            }
            connection.disconnect().await;
        };

        match tokio::time::timeout(timeout, sequence).await {
            Ok(()) => {
                info!("Graceful shutdown complete");
                Ok(())
            }
            Err(_) => {
                for handle in abort_handles {
                    handle.abort();
                }
                warn!(timeout_secs = timeout.as_secs_f64(), "Graceful shutdown timed out");
                Err(ClientError::ShutdownTimeout { timeout })
            }
        }
    }

    fn lock_tasks(&self) -> MutexGuard<'_, Tasks> {
        self.tasks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Logs how a background task ended. Cancellation is the normal outcome.
fn report_exit(task: &'static str, result: std::result::Result<(), JoinError>) {
    match result {
        Err(e) if e.is_panic() => error!(task, error = %e, "Background task panicked"),
        _ => debug!(task, "Background task stopped"),
    }
}

impl Drop for HotReloadClient {
    fn drop(&mut self) {
        self.cancel.cancel();
        let mut tasks = self.lock_tasks();
        tasks.loops.abort();
        if let Some(listener) = tasks.listener.take() {
            listener.abort();
        }
    }
}
