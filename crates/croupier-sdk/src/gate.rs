//! Reload gate - the single in-flight flag shared by every reload path.
//!
//! The reload coordinator acquires a [`ReloadPermit`] before touching the
//! registry; the registry actor consults the same gate to refuse plain
//! registrations while a reload runs. Dropping the permit releases the gate,
//! so release happens on success, error, and cancellation alike.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::debug;

use crate::error::{ClientError, Result};

/// Shared mutual-exclusion flag for reload operations.
#[derive(Debug, Clone, Default)]
pub struct ReloadGate {
    active: Arc<AtomicBool>,
}

impl ReloadGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquires the gate without waiting.
    ///
    /// # Errors
    ///
    /// `ClientError::OperationInProgress` if another permit is alive.
    pub fn try_acquire(&self, operation: &'static str) -> Result<ReloadPermit> {
        self.active
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| ClientError::OperationInProgress { operation })?;

        debug!(operation, "Reload gate acquired");
        Ok(ReloadPermit {
            active: Arc::clone(&self.active),
            operation,
        })
    }

    /// Returns true while a permit is alive.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }
}

/// Proof that the holder owns the reload gate.
#[derive(Debug)]
pub struct ReloadPermit {
    active: Arc<AtomicBool>,
    operation: &'static str,
}

impl ReloadPermit {
    pub fn operation(&self) -> &'static str {
        self.operation
    }
}

impl Drop for ReloadPermit {
    fn drop(&mut self) {
        self.active.store(false, Ordering::Release);
        debug!(operation = self.operation, "Reload gate released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_acquire_fails_while_held() {
        let gate = ReloadGate::new();
        let permit = gate.try_acquire("reload_function").unwrap();
        assert!(gate.is_active());
        assert_eq!(permit.operation(), "reload_function");

        let err = gate.try_acquire("reload_config").unwrap_err();
        assert!(matches!(
            err,
            ClientError::OperationInProgress {
                operation: "reload_config"
            }
        ));
    }

    #[test]
    fn test_drop_releases() {
        let gate = ReloadGate::new();
        {
            let _permit = gate.try_acquire("reload_functions").unwrap();
        }
        assert!(!gate.is_active());
        assert!(gate.try_acquire("reload_functions").is_ok());
    }

    #[test]
    fn test_clones_share_state() {
        let gate = ReloadGate::new();
        let observer = gate.clone();
        let _permit = gate.try_acquire("reload_function").unwrap();
        assert!(observer.is_active());
    }
}
