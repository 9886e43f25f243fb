//! Reload metrics snapshot exposed by `status()`.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::state::ConnectionState;

/// Point-in-time view of reload activity.
///
/// Counters never decrease over the life of a client. `uptime` is computed
/// when the snapshot is taken.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ReloadMetrics {
    pub reconnect_count: u64,
    pub function_reloads: u64,
    pub config_reloads: u64,
    pub failed_reloads: u64,
    /// Recovery cycles that used up every retry attempt.
    pub reconnect_exhaustions: u64,
    pub last_reconnect: Option<DateTime<Utc>>,
    pub connection_state: ConnectionState,
    #[serde(with = "duration_secs")]
    pub uptime: Duration,
}

impl ReloadMetrics {
    /// Formats uptime as `1h 2m 3s`, dropping leading zero units.
    pub fn uptime_display(&self) -> String {
        let total = self.uptime.as_secs();
        let (hours, minutes, seconds) = (total / 3600, (total % 3600) / 60, total % 60);
        if hours > 0 {
            format!("{hours}h {minutes}m {seconds}s")
        } else if minutes > 0 {
            format!("{minutes}m {seconds}s")
        } else {
            format!("{seconds}s")
        }
    }
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}
