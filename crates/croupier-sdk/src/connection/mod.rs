//! Connection lifecycle manager.
//!
//! The [`ConnectionManager`] exclusively owns the [`Transport`] and the
//! connection state machine:
//!
//! ```text
//! Disconnected ──connect──▶ Connecting ──ok──▶ Connected ◀──▶ Reloading
//!      ▲                        │                  │
//!      │                      fail            probe fails
//!      │                        ▼                  ▼
//!      └────disconnect / exhausted retries───── Error
//! ```
//!
//! State lives in a `watch` channel. Transitions that race (connect,
//! mark-unhealthy, begin-reload) are atomic check-and-set operations; every
//! other transition happens while the transport lock is held, so the
//! transport and the published state never disagree for longer than one
//! locked section.
//!
//! **Panic-Free Policy:** This module follows the project's panic-free guidelines.
//! No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, or `todo!()`.

use std::sync::Arc;

use croupier_core::{ConnectionState, FunctionBinding, FunctionDescriptor};
use tokio::sync::{watch, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{ClientError, Result, TransportError};
use crate::gate::ReloadPermit;
use crate::metrics::MetricsRecorder;
use crate::registry::RegistryHandle;
use crate::transport::Transport;

mod retry;

pub use retry::{backoff_delay, RetryPolicy, BACKOFF_MULTIPLIER, MAX_BACKOFF};

// ============================================================================
// Outcomes
// ============================================================================

/// How a recovery cycle ended, when it did not exhaust its attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectOutcome {
    /// This cycle re-established the session.
    Reconnected { attempts: u32 },
    /// Another caller connected first.
    AlreadyConnected,
    /// Shutdown was requested mid-cycle.
    Cancelled,
}

/// Result of pushing a reloaded binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// The Agent acknowledged the new binding.
    Pushed,
    /// Not connected; the binding goes out with the next full registration.
    Deferred,
}

// ============================================================================
// Connection Manager
// ============================================================================

/// Owns the transport and drives the connection state machine.
pub struct ConnectionManager {
    transport: Mutex<Box<dyn Transport>>,
    state: watch::Sender<ConnectionState>,
    registry: RegistryHandle,
    metrics: Arc<MetricsRecorder>,
}

impl ConnectionManager {
    pub fn new(
        transport: Box<dyn Transport>,
        registry: RegistryHandle,
        metrics: Arc<MetricsRecorder>,
    ) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            transport: Mutex::new(transport),
            state,
            registry,
            metrics,
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Receiver observing every state transition.
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Opens a session and pushes the full registry snapshot.
    ///
    /// # Errors
    ///
    /// - `ClientError::AlreadyConnected` when Connected or Reloading
    /// - `ClientError::OperationInProgress` when another connect is running
    /// - `ClientError::TransportFailure` when the session could not be set
    ///   up; the state is then Error
    pub async fn connect(&self) -> Result<()> {
        let previous = self.begin_connect()?;
        let mut attempt = ConnectAttempt::new(&self.state);

        let mut transport = self.transport.lock().await;

        if self.state() != ConnectionState::Connecting {
            debug!(state = %self.state(), "Connect superseded while waiting for transport");
            attempt.disarm();
            return Err(TransportError::Closed.into());
        }

        if previous == ConnectionState::Error {
            if let Err(e) = transport.close().await {
                debug!(error = %e, "Closing stale session failed");
            }
        }

        match self.open_session(&mut **transport).await {
            Ok(count) => {
                let _ = self
                    .compare_and_set(&[ConnectionState::Connecting], ConnectionState::Connected);
                attempt.disarm();
                info!(functions = count, "Connected to agent");
                Ok(())
            }
            Err(e) => {
                let _ =
                    self.compare_and_set(&[ConnectionState::Connecting], ConnectionState::Error);
                attempt.disarm();
                warn!(error = %e, "Connection to agent failed");
                Err(e)
            }
        }
    }

    /// Closes the session. No-op when already disconnected.
    pub async fn disconnect(&self) {
        let mut transport = self.transport.lock().await;

        let state = self.state();
        if state == ConnectionState::Disconnected {
            debug!("Disconnect requested while already disconnected");
            return;
        }

        if let Err(e) = transport.close().await {
            warn!(error = %e, "Error while closing agent session");
        }
        self.set_state(ConnectionState::Disconnected);
        info!(previous = %state, "Disconnected from agent");
    }

    /// Disconnects, then connects again.
    pub async fn reconnect(&self) -> Result<()> {
        self.disconnect().await;
        self.connect().await?;
        self.metrics.record_reconnect();
        Ok(())
    }

    /// Runs one recovery cycle of up to `policy.max_attempts` connects with
    /// exponential backoff between failures.
    ///
    /// # Errors
    ///
    /// `ClientError::ReconnectExhausted` when every attempt failed; the state
    /// is then Disconnected.
    pub async fn attempt_reconnect(
        &self,
        policy: RetryPolicy,
        cancel: &CancellationToken,
    ) -> Result<ReconnectOutcome> {
        for attempt in 1..=policy.max_attempts {
            if cancel.is_cancelled() {
                return Ok(ReconnectOutcome::Cancelled);
            }

            info!(attempt, max_attempts = policy.max_attempts, "Attempting reconnection");

            match self.connect().await {
                Ok(()) => {
                    self.metrics.record_reconnect();
                    info!(attempt, "Reconnected to agent");
                    return Ok(ReconnectOutcome::Reconnected { attempts: attempt });
                }
                Err(ClientError::AlreadyConnected) => {
                    debug!(attempt, "Connection already re-established elsewhere");
                    return Ok(ReconnectOutcome::AlreadyConnected);
                }
                Err(e) => {
                    warn!(attempt, error = %e, "Reconnection attempt failed");
                }
            }

            if attempt < policy.max_attempts {
                let delay = policy.delay_after(attempt);
                debug!(attempt, delay_secs = delay.as_secs_f64(), "Backing off");

                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Ok(ReconnectOutcome::Cancelled),
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }

        {
            let _transport = self.transport.lock().await;
            let _ = self.compare_and_set(
                &[ConnectionState::Error, ConnectionState::Disconnected],
                ConnectionState::Disconnected,
            );
        }
        self.metrics.record_reconnect_exhausted();
        warn!(attempts = policy.max_attempts, "All reconnection attempts failed");

        Err(ClientError::ReconnectExhausted {
            attempts: policy.max_attempts,
        })
    }

    /// Sends a liveness probe over the current session.
    pub async fn probe(&self) -> Result<()> {
        let mut transport = self.transport.lock().await;
        transport.probe_health().await?;
        Ok(())
    }

    /// Connected -> Error. Returns false if the state was anything else.
    pub fn mark_unhealthy(&self) -> bool {
        self.compare_and_set(&[ConnectionState::Connected], ConnectionState::Error)
            .is_ok()
    }

    /// Pushes a reloaded binding to the Agent.
    ///
    /// Holds the transport lock for the whole push and shows Reloading while
    /// it runs. Not being connected is not an error: the binding is already
    /// in the registry and is sent with the next connect.
    pub(crate) async fn push_reload(
        &self,
        _permit: &ReloadPermit,
        function: &FunctionDescriptor,
    ) -> Result<PushOutcome> {
        let mut transport = self.transport.lock().await;

        let Some(_reloading) = self.begin_reload() else {
            debug!(function_id = %function.id, state = %self.state(), "Not connected, deferring push");
            return Ok(PushOutcome::Deferred);
        };

        transport.register_single(function).await?;
        debug!(function_id = %function.id, version = %function.version, "Reloaded function pushed");
        Ok(PushOutcome::Pushed)
    }

    // ========================================================================
    // Internals
    // ========================================================================

    async fn open_session(&self, transport: &mut dyn Transport) -> Result<usize> {
        transport.open().await?;

        let pushed = async {
            let functions: Vec<FunctionDescriptor> = self
                .registry
                .snapshot()
                .await?
                .iter()
                .map(FunctionBinding::descriptor)
                .collect();
            transport.register_all(&functions).await?;
            Ok::<usize, ClientError>(functions.len())
        }
        .await;

        if pushed.is_err() {
            if let Err(e) = transport.close().await {
                debug!(error = %e, "Closing half-open session failed");
            }
        }
        pushed
    }

    fn begin_connect(&self) -> Result<ConnectionState> {
        self.compare_and_set(
            &[ConnectionState::Disconnected, ConnectionState::Error],
            ConnectionState::Connecting,
        )
        .map_err(|current| match current {
            ConnectionState::Connecting => ClientError::OperationInProgress {
                operation: "connect",
            },
            _ => ClientError::AlreadyConnected,
        })
    }

    fn begin_reload(&self) -> Option<ReloadingGuard<'_>> {
        self.compare_and_set(&[ConnectionState::Connected], ConnectionState::Reloading)
            .ok()
            .map(|_| ReloadingGuard { state: &self.state })
    }

    /// Moves to `to` if the current state is one of `from`.
    ///
    /// Returns the state seen before the transition, as `Err` when no
    /// transition happened.
    fn compare_and_set(
        &self,
        from: &[ConnectionState],
        to: ConnectionState,
    ) -> std::result::Result<ConnectionState, ConnectionState> {
        let mut seen = ConnectionState::Disconnected;
        let changed = self.state.send_if_modified(|current| {
            seen = *current;
            if from.contains(current) {
                *current = to;
                true
            } else {
                false
            }
        });

        if changed {
            debug!(from = %seen, to = %to, "Connection state changed");
            Ok(seen)
        } else {
            Err(seen)
        }
    }

    fn set_state(&self, to: ConnectionState) {
        self.state.send_if_modified(|current| {
            if *current == to {
                return false;
            }
            debug!(from = %current, to = %to, "Connection state changed");
            *current = to;
            true
        });
    }
}

// ============================================================================
// Guards
// ============================================================================

/// Leaves the state at Error if a connect is dropped before finishing.
struct ConnectAttempt<'a> {
    state: &'a watch::Sender<ConnectionState>,
    armed: bool,
}

impl<'a> ConnectAttempt<'a> {
    fn new(state: &'a watch::Sender<ConnectionState>) -> Self {
        Self { state, armed: true }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for ConnectAttempt<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        self.state.send_if_modified(|current| {
            if *current == ConnectionState::Connecting {
                *current = ConnectionState::Error;
                true
            } else {
                false
            }
        });
    }
}

/// Restores Reloading -> Connected when a push ends, however it ends.
struct ReloadingGuard<'a> {
    state: &'a watch::Sender<ConnectionState>,
}

impl Drop for ReloadingGuard<'_> {
    fn drop(&mut self) {
        self.state.send_if_modified(|current| {
            if *current == ConnectionState::Reloading {
                *current = ConnectionState::Connected;
                true
            } else {
                false
            }
        });
    }
}

// ============================================================================
// Tests
// ============================================================================
