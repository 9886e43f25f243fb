//! Reload counters shared by the connection manager and the coordinator.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Instant;

use chrono::{DateTime, Utc};
use croupier_core::{ConnectionState, ReloadMetrics};

/// Monotonic counters behind [`ReloadMetrics`].
#[derive(Debug)]
pub struct MetricsRecorder {
    started_at: Instant,
    reconnect_count: AtomicU64,
    function_reloads: AtomicU64,
    config_reloads: AtomicU64,
    failed_reloads: AtomicU64,
    reconnect_exhaustions: AtomicU64,
    last_reconnect: Mutex<Option<DateTime<Utc>>>,
}

impl MetricsRecorder {
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            reconnect_count: AtomicU64::new(0),
            function_reloads: AtomicU64::new(0),
            config_reloads: AtomicU64::new(0),
            failed_reloads: AtomicU64::new(0),
            reconnect_exhaustions: AtomicU64::new(0),
            last_reconnect: Mutex::new(None),
        }
    }

    pub fn record_reconnect(&self) {
        self.reconnect_count.fetch_add(1, Ordering::Relaxed);
        let mut last = self
            .last_reconnect
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *last = Some(Utc::now());
    }

    pub fn record_function_reload(&self) {
        self.function_reloads.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_config_reload(&self) {
        self.config_reloads.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failed_reload(&self) {
        self.failed_reloads.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_reconnect_exhausted(&self) {
        self.reconnect_exhaustions.fetch_add(1, Ordering::Relaxed);
    }

    /// Takes a snapshot, deriving uptime from construction time.
    pub fn snapshot(&self, connection_state: ConnectionState) -> ReloadMetrics {
        let last_reconnect = *self
            .last_reconnect
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        ReloadMetrics {
            reconnect_count: self.reconnect_count.load(Ordering::Relaxed),
            function_reloads: self.function_reloads.load(Ordering::Relaxed),
            config_reloads: self.config_reloads.load(Ordering::Relaxed),
            failed_reloads: self.failed_reloads.load(Ordering::Relaxed),
            reconnect_exhaustions: self.reconnect_exhaustions.load(Ordering::Relaxed),
            last_reconnect,
            connection_state,
            uptime: self.started_at.elapsed(),
        }
    }
}

impl Default for MetricsRecorder {
    fn default() -> Self {
        Self::new()
    }
}
