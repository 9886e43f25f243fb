//! Auto-reconnect loop.
//!
//! Runs independently of the health monitor: the monitor only marks the
//! connection unhealthy, this loop notices and drives recovery.
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`

use std::sync::Arc;

use croupier_core::HotReloadConfig;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::connection::{ConnectionManager, ReconnectOutcome, RetryPolicy};
use crate::gate::ReloadGate;
use crate::health::loop_interval;

/// Spawns the reconnect loop.
///
/// Ticks every `health_check_interval` of the configuration current at
/// spawn time. On each tick, if the connection is Disconnected or Error and
/// no reload is running, one recovery cycle runs with the retry settings of
/// the configuration current at that moment. A failed cycle is logged and
/// the next one starts one full period after it ended.
pub fn spawn_reconnect_loop(
    connection: Arc<ConnectionManager>,
    gate: ReloadGate,
    config: watch::Receiver<Arc<HotReloadConfig>>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let period = config.borrow().health_check_interval();
        info!(interval_secs = period.as_secs_f64(), "Auto-reconnect loop started");

        let mut ticker = loop_interval(period);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let state = connection.state();
            if !state.can_connect() {
                continue;
            }
            if gate.is_active() {
                debug!("Reload in progress, postponing reconnect");
                continue;
            }

            let policy = RetryPolicy::from_config(&config.borrow());
            info!(state = %state, "Connection lost, starting recovery");

            match connection.attempt_reconnect(policy, &cancel).await {
                Ok(ReconnectOutcome::Reconnected { attempts }) => {
                    info!(attempts, "Connection recovered");
                }
                Ok(ReconnectOutcome::AlreadyConnected) => {}
                Ok(ReconnectOutcome::Cancelled) => break,
                Err(e) => warn!(error = %e, "Recovery cycle failed, retrying on next tick"),
            }

            // A cycle can outlast several periods; wait a full one before the next.
            ticker.reset();
        }

        info!("Auto-reconnect loop stopped");
    })
}
