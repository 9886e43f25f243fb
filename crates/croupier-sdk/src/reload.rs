//! Reload coordination.
//!
//! Function reloads, batch reloads and config reloads share one
//! [`ReloadGate`]: at most one of them runs at a time, and plain
//! registrations are refused while one does.
//!
//! A function reload installs the new binding, then pushes it to the Agent.
//! If the push fails the previous binding is restored, so the registry never
//! keeps a version the Agent refused.
//!
//! **Panic-Free Policy:** This module follows the project's panic-free guidelines.
//! No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, or `todo!()`.

use std::fmt;
use std::sync::Arc;

use croupier_core::{FunctionBinding, FunctionHandler, FunctionId, HotReloadConfig};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::connection::{ConnectionManager, PushOutcome};
use crate::error::{BatchFailure, ClientError, Result};
use crate::gate::{ReloadGate, ReloadPermit};
use crate::metrics::MetricsRecorder;
use crate::notifier::{ChangeEvent, ChangeKind, ReloadPolicy};
use crate::registry::RegistryHandle;

// ============================================================================
// Function Update
// ============================================================================

/// A new version of one function.
#[derive(Clone)]
pub struct FunctionUpdate {
    pub id: FunctionId,
    pub version: String,
    pub handler: Arc<dyn FunctionHandler>,
}

impl FunctionUpdate {
    pub fn new(
        id: impl Into<FunctionId>,
        version: impl Into<String>,
        handler: Arc<dyn FunctionHandler>,
    ) -> Self {
        Self {
            id: id.into(),
            version: version.into(),
            handler,
        }
    }

    fn into_binding(self) -> FunctionBinding {
        FunctionBinding::new(self.id, self.version, self.handler)
    }
}

impl fmt::Debug for FunctionUpdate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionUpdate")
            .field("id", &self.id)
            .field("version", &self.version)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Coordinator
// ============================================================================

/// Serializes reloads and applies them to the registry and the Agent.
pub struct ReloadCoordinator {
    gate: ReloadGate,
    registry: RegistryHandle,
    connection: Arc<ConnectionManager>,
    config: watch::Sender<Arc<HotReloadConfig>>,
    metrics: Arc<MetricsRecorder>,
}

impl ReloadCoordinator {
    pub fn new(
        gate: ReloadGate,
        registry: RegistryHandle,
        connection: Arc<ConnectionManager>,
        config: Arc<HotReloadConfig>,
        metrics: Arc<MetricsRecorder>,
    ) -> Self {
        let (config, _) = watch::channel(config);
        Self {
            gate,
            registry,
            connection,
            config,
            metrics,
        }
    }

    /// Active configuration.
    pub fn config(&self) -> Arc<HotReloadConfig> {
        Arc::clone(&self.config.borrow())
    }

    /// Receiver that sees every configuration swap.
    pub fn subscribe_config(&self) -> watch::Receiver<Arc<HotReloadConfig>> {
        self.config.subscribe()
    }

    pub fn is_reloading(&self) -> bool {
        self.gate.is_active()
    }

    /// Replaces one function's handler.
    ///
    /// # Errors
    ///
    /// - `ClientError::OperationInProgress` if another reload is running
    /// - `ClientError::TransportFailure` if the Agent refused the new
    ///   version; the previous binding has been restored
    pub async fn reload_function(&self, update: FunctionUpdate) -> Result<()> {
        let permit = self.gate.try_acquire("reload_function")?;

        let id = update.id.clone();
        match self.reload_one(&permit, update).await {
            Ok(outcome) => {
                self.metrics.record_function_reload();
                info!(function_id = %id, outcome = ?outcome, "Function reloaded");
                Ok(())
            }
            Err(e) => {
                self.metrics.record_failed_reload();
                warn!(function_id = %id, error = %e, "Function reload failed");
                Err(e)
            }
        }
    }

    /// Reloads every item of `batch` under a single permit.
    ///
    /// All items are attempted in order. Items that succeed stay committed
    /// even when others fail.
    ///
    /// # Errors
    ///
    /// - `ClientError::OperationInProgress` if another reload is running
    /// - `ClientError::PartialBatchFailure` listing only the failed items
    pub async fn reload_functions(&self, batch: Vec<FunctionUpdate>) -> Result<Vec<FunctionId>> {
        let permit = self.gate.try_acquire("reload_functions")?;

        let attempted = batch.len();
        let mut reloaded = Vec::with_capacity(attempted);
        let mut failures = Vec::new();

        for update in batch {
            let id = update.id.clone();
            match self.reload_one(&permit, update).await {
                Ok(_) => {
                    self.metrics.record_function_reload();
                    reloaded.push(id);
                }
                Err(e) => {
                    self.metrics.record_failed_reload();
                    debug!(function_id = %id, error = %e, "Batch item failed");
                    failures.push(BatchFailure {
                        id,
                        message: e.to_string(),
                    });
                }
            }
        }

        if failures.is_empty() {
            info!(count = reloaded.len(), "Batch reload complete");
            Ok(reloaded)
        } else {
            warn!(
                attempted,
                failed = failures.len(),
                "Batch reload partially failed"
            );
            Err(ClientError::PartialBatchFailure {
                attempted,
                failures,
            })
        }
    }

    /// Validates and activates a new configuration.
    ///
    /// Running background loops keep their current periods; call
    /// [`HotReloadClient::restart_background_tasks`](crate::HotReloadClient::restart_background_tasks)
    /// to apply new intervals.
    pub async fn reload_config(&self, new_config: HotReloadConfig) -> Result<()> {
        let _permit = self.gate.try_acquire("reload_config")?;

        if let Err(e) = new_config.validate() {
            self.metrics.record_failed_reload();
            warn!(error = %e, "Rejected configuration reload");
            return Err(e.into());
        }

        let new_config = Arc::new(new_config);
        let previous = self.config.send_replace(Arc::clone(&new_config));
        self.metrics.record_config_reload();

        if previous.intervals_differ(&new_config) {
            info!(
                health_check_interval = new_config.health_check_interval,
                poll_interval = new_config.file_watching.poll_interval,
                "Configuration reloaded; loop intervals changed and apply after a restart of background tasks"
            );
        } else {
            info!("Configuration reloaded");
        }
        Ok(())
    }

    /// Reacts to one notifier event. Never fails: errors are logged.
    pub async fn handle_change(&self, event: &ChangeEvent, policy: &dyn ReloadPolicy) {
        match event.kind {
            ChangeKind::Code => {
                let Some(update) = policy.resolve(event) else {
                    debug!(path = %event.path.display(), "No function mapped to changed file");
                    return;
                };
                info!(
                    path = %event.path.display(),
                    function_id = %update.id,
                    "Code change detected, reloading function"
                );
                if let Err(e) = self.reload_function(update).await {
                    warn!(path = %event.path.display(), error = %e, "Reload triggered by file change failed");
                }
            }
            ChangeKind::Config => {
                info!(path = %event.path.display(), "Configuration file changed");
            }
        }
    }

    /// Install-then-push with rollback on push failure.
    async fn reload_one(&self, permit: &ReloadPermit, update: FunctionUpdate) -> Result<PushOutcome> {
        let binding = update.into_binding();
        let descriptor = binding.descriptor();

        let previous = self.registry.install(permit, binding).await?;
        let previous_version = previous.as_ref().map(|b| b.version.clone());

        match self.connection.push_reload(permit, &descriptor).await {
            Ok(outcome) => {
                debug!(
                    function_id = %descriptor.id,
                    from = ?previous_version,
                    to = %descriptor.version,
                    "Binding replaced"
                );
                Ok(outcome)
            }
            Err(e) => {
                if let Err(restore_err) = self
                    .registry
                    .restore(permit, descriptor.id.clone(), previous)
                    .await
                {
                    warn!(
                        function_id = %descriptor.id,
                        error = %restore_err,
                        "Could not roll back binding"
                    );
                } else {
                    debug!(function_id = %descriptor.id, restored = ?previous_version, "Rolled back binding");
                }
                Err(e)
            }
        }
    }
}
