//! Registry actor - owns all function bindings and processes commands.
//!
//! # Panic-Free Guarantees
//!
//! This module follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Reply send failures are ignored (the caller went away)

use std::collections::HashMap;

use croupier_core::{FunctionBinding, FunctionId};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::commands::RegistryCommand;
use crate::error::{ClientError, Result};
use crate::gate::ReloadGate;

// ============================================================================
// Registry Actor
// ============================================================================

/// The registry actor - single owner of the binding map.
///
/// Commands are processed sequentially in one task, so every mutation is
/// atomic with respect to readers and a reload's replace-and-capture is a
/// single step.
pub struct RegistryActor {
    receiver: mpsc::Receiver<RegistryCommand>,

    bindings: HashMap<FunctionId, FunctionBinding>,

    /// Consulted on plain registrations; held by the reload coordinator.
    gate: ReloadGate,
}

impl RegistryActor {
    pub fn new(receiver: mpsc::Receiver<RegistryCommand>, gate: ReloadGate) -> Self {
        Self {
            receiver,
            bindings: HashMap::new(),
            gate,
        }
    }

    /// Runs the actor event loop until every handle is dropped.
    pub async fn run(mut self) {
        info!("Function registry starting");

        while let Some(cmd) = self.receiver.recv().await {
            self.handle_command(cmd);
        }

        info!(functions = self.bindings.len(), "Function registry stopped");
    }

    fn handle_command(&mut self, cmd: RegistryCommand) {
        match cmd {
            RegistryCommand::Register {
                binding,
                respond_to,
            } => {
                let result = self.handle_register(*binding);
                let _ = respond_to.send(result);
            }
            RegistryCommand::Install {
                binding,
                respond_to,
            } => {
                let previous = self.handle_install(*binding);
                let _ = respond_to.send(previous);
            }
            RegistryCommand::Restore {
                id,
                previous,
                respond_to,
            } => {
                self.handle_restore(id, previous.map(|b| *b));
                let _ = respond_to.send(());
            }
            RegistryCommand::Get { id, respond_to } => {
                let _ = respond_to.send(self.bindings.get(&id).cloned());
            }
            RegistryCommand::Snapshot { respond_to } => {
                let _ = respond_to.send(self.handle_snapshot());
            }
            RegistryCommand::Count { respond_to } => {
                let _ = respond_to.send(self.bindings.len());
            }
        }
    }

    // ========================================================================
    // Command Handlers
    // ========================================================================

    fn handle_register(&mut self, binding: FunctionBinding) -> Result<()> {
        if self.gate.is_active() {
            warn!(
                function_id = %binding.id,
                "Reload in progress, rejecting registration"
            );
            return Err(ClientError::OperationInProgress {
                operation: "register",
            });
        }

        let id = binding.id.clone();
        let version = binding.version.clone();
        let replaced = self.bindings.insert(id.clone(), binding);

        info!(
            function_id = %id,
            version = %version,
            replaced = replaced.is_some(),
            total_functions = self.bindings.len(),
            "Function registered"
        );
        Ok(())
    }

    fn handle_install(&mut self, binding: FunctionBinding) -> Option<FunctionBinding> {
        debug!(
            function_id = %binding.id,
            version = %binding.version,
            "Installing reloaded binding"
        );
        self.bindings.insert(binding.id.clone(), binding)
    }

    fn handle_restore(&mut self, id: FunctionId, previous: Option<FunctionBinding>) {
        match previous {
            Some(binding) => {
                debug!(
                    function_id = %id,
                    version = %binding.version,
                    "Restoring previous binding"
                );
                self.bindings.insert(id, binding);
            }
            None => {
                debug!(function_id = %id, "Dropping provisional binding");
                self.bindings.remove(&id);
            }
        }
    }

    fn handle_snapshot(&self) -> Vec<FunctionBinding> {
        let mut bindings: Vec<FunctionBinding> = self.bindings.values().cloned().collect();
        bindings.sort_by(|a, b| a.id.cmp(&b.id));
        bindings
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use croupier_core::handler_fn;

    fn create_test_actor() -> (RegistryActor, ReloadGate) {
        let (_tx, rx) = mpsc::channel(10);
        let gate = ReloadGate::new();
        (RegistryActor::new(rx, gate.clone()), gate)
    }

    fn binding(id: &str, version: &str) -> FunctionBinding {
        FunctionBinding::new(id, version, handler_fn(Ok))
    }

    #[test]
    fn test_register_inserts_and_overwrites() {
        let (mut actor, _gate) = create_test_actor();

        actor.handle_register(binding("player.ban", "1.0.0")).unwrap();
        actor.handle_register(binding("player.ban", "1.1.0")).unwrap();

        assert_eq!(actor.bindings.len(), 1);
        let stored = actor.bindings.get(&FunctionId::new("player.ban")).unwrap();
        assert_eq!(stored.version, "1.1.0");
    }

    #[test]
    fn test_register_rejected_while_gate_held() {
        let (mut actor, gate) = create_test_actor();
        let _permit = gate.try_acquire("reload_function").unwrap();

        let result = actor.handle_register(binding("player.ban", "1.0.0"));

        assert!(matches!(
            result,
            Err(ClientError::OperationInProgress {
                operation: "register"
            })
        ));
        assert!(actor.bindings.is_empty());
    }

    #[test]
    fn test_install_returns_previous() {
        let (mut actor, _gate) = create_test_actor();
        actor.handle_register(binding("player.ban", "1.0.0")).unwrap();

        let previous = actor.handle_install(binding("player.ban", "2.0.0"));
        assert_eq!(previous.map(|b| b.version), Some("1.0.0".to_string()));

        let fresh = actor.handle_install(binding("server.status", "1.0.0"));
        assert!(fresh.is_none());
    }

    #[test]
    fn test_install_ignores_gate() {
        let (mut actor, gate) = create_test_actor();
        let _permit = gate.try_acquire("reload_function").unwrap();

        actor.handle_install(binding("player.ban", "2.0.0"));
        assert_eq!(actor.bindings.len(), 1);
    }

    #[test]
    fn test_restore_previous_and_provisional() {
        let (mut actor, _gate) = create_test_actor();
        actor.handle_register(binding("player.ban", "1.0.0")).unwrap();

        let previous = actor.handle_install(binding("player.ban", "2.0.0"));
        actor.handle_restore(FunctionId::new("player.ban"), previous);
        let stored = actor.bindings.get(&FunctionId::new("player.ban")).unwrap();
        assert_eq!(stored.version, "1.0.0");

        let previous = actor.handle_install(binding("server.status", "1.0.0"));
        actor.handle_restore(FunctionId::new("server.status"), previous);
        assert!(!actor.bindings.contains_key(&FunctionId::new("server.status")));
    }

    #[test]
    fn test_snapshot_sorted_by_id() {
        let (mut actor, _gate) = create_test_actor();
        actor.handle_register(binding("zeta", "1")).unwrap();
        actor.handle_register(binding("alpha", "1")).unwrap();
        actor.handle_register(binding("mid", "1")).unwrap();

        let ids: Vec<String> = actor
            .handle_snapshot()
            .into_iter()
            .map(|b| b.id.to_string())
            .collect();
        assert_eq!(ids, vec!["alpha", "mid", "zeta"]);
    }

    #[tokio::test]
    async fn test_actor_stops_when_channel_closes() {
        let (tx, rx) = mpsc::channel(10);
        let actor = RegistryActor::new(rx, ReloadGate::new());
        let handle = tokio::spawn(actor.run());

        drop(tx);

        tokio::time::timeout(std::time::Duration::from_secs(1), handle)
            .await
            .expect("actor should stop")
            .expect("actor task should not panic");
    }
}
