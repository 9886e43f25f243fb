//! Client interface for interacting with the RegistryActor.
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Channel errors are mapped to `ClientError::ChannelClosed`

use croupier_core::{FunctionBinding, FunctionId};
use tokio::sync::{mpsc, oneshot};

use super::commands::RegistryCommand;
use crate::error::{ClientError, Result};
use crate::gate::ReloadPermit;

// ============================================================================
// Registry Handle
// ============================================================================

/// Cheap-to-clone handle to the registry actor.
#[derive(Clone)]
pub struct RegistryHandle {
    sender: mpsc::Sender<RegistryCommand>,
}

impl RegistryHandle {
    pub fn new(sender: mpsc::Sender<RegistryCommand>) -> Self {
        Self { sender }
    }

    /// Insert or overwrite a binding.
    ///
    /// # Errors
    ///
    /// - `ClientError::OperationInProgress` while a reload holds the gate
    /// - `ClientError::ChannelClosed` if the actor has shut down
    pub async fn register(&self, binding: FunctionBinding) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.send(RegistryCommand::Register {
            binding: Box::new(binding),
            respond_to: tx,
        })
        .await?;
        rx.await.map_err(|_| ClientError::ChannelClosed)?
    }

    /// Look up a binding.
    ///
    /// # Errors
    ///
    /// - `ClientError::NotFound` if no binding exists for `id`
    /// - `ClientError::ChannelClosed` if the actor has shut down
    pub async fn get(&self, id: &FunctionId) -> Result<FunctionBinding> {
        let (tx, rx) = oneshot::channel();
        self.send(RegistryCommand::Get {
            id: id.clone(),
            respond_to: tx,
        })
        .await?;
        rx.await
            .map_err(|_| ClientError::ChannelClosed)?
            .ok_or_else(|| ClientError::NotFound(id.clone()))
    }

    /// Immutable copy of every binding, ordered by id.
    pub async fn snapshot(&self) -> Result<Vec<FunctionBinding>> {
        let (tx, rx) = oneshot::channel();
        self.send(RegistryCommand::Snapshot { respond_to: tx })
            .await?;
        rx.await.map_err(|_| ClientError::ChannelClosed)
    }

    /// Number of bindings; zero if the actor is gone.
    pub async fn len(&self) -> usize {
        let (tx, rx) = oneshot::channel();
        if self
            .send(RegistryCommand::Count { respond_to: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or_default()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Replace a binding as part of a reload and return the previous one.
    pub(crate) async fn install(
        &self,
        _permit: &ReloadPermit,
        binding: FunctionBinding,
    ) -> Result<Option<FunctionBinding>> {
        let (tx, rx) = oneshot::channel();
        self.send(RegistryCommand::Install {
            binding: Box::new(binding),
            respond_to: tx,
        })
        .await?;
        rx.await.map_err(|_| ClientError::ChannelClosed)
    }

    /// Roll back an `install`.
    pub(crate) async fn restore(
        &self,
        _permit: &ReloadPermit,
        id: FunctionId,
        previous: Option<FunctionBinding>,
    ) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.send(RegistryCommand::Restore {
            id,
            previous: previous.map(Box::new),
            respond_to: tx,
        })
        .await?;
        rx.await.map_err(|_| ClientError::ChannelClosed)
    }

    /// Returns true while the actor is running.
    pub(crate) fn is_alive(&self) -> bool {
        !self.sender.is_closed()
    }

    async fn send(&self, cmd: RegistryCommand) -> Result<()> {
        self.sender
            .send(cmd)
            .await
            .map_err(|_| ClientError::ChannelClosed)
    }
}

// ============================================================================
// Tests
// ============================================================================
