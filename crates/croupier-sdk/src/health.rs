//! Periodic liveness probing.
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`

use std::sync::Arc;
use std::time::Duration;

use croupier_core::{ConnectionState, MAX_DURATION};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::connection::ConnectionManager;

/// Shortest period any background loop ticks at.
const MIN_PERIOD: Duration = Duration::from_millis(1);

/// Ticker for the background loops: first tick one `period` from now, late
/// ticks delayed rather than bunched. `period` is clamped to
/// `1ms..=MAX_DURATION`.
pub(crate) fn loop_interval(period: Duration) -> Interval {
    let period = period.clamp(MIN_PERIOD, MAX_DURATION);
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

/// Spawns the health monitor.
///
/// Every `period` (first check one period after start) the monitor probes
/// the Agent if the connection is Connected. A failed probe moves the
/// connection to Error, which the reconnect loop picks up. Any other state
/// is left alone.
pub fn spawn_health_monitor(
    connection: Arc<ConnectionManager>,
    period: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(interval_secs = period.as_secs_f64(), "Health monitor started");

        let mut ticker = loop_interval(period);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            if connection.state() != ConnectionState::Connected {
                continue;
            }

            match connection.probe().await {
                Ok(()) => debug!("Health check passed"),
                Err(e) => {
                    if connection.mark_unhealthy() {
                        warn!(error = %e, "Health check failed, connection marked unhealthy");
                    } else {
                        debug!(error = %e, state = %connection.state(), "Health check failed during state change");
                    }
                }
            }
        }

        info!("Health monitor stopped");
    })
}
