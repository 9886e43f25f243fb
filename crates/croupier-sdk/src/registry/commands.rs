//! Registry actor commands.
//!
//! Every command carries a oneshot sender for its reply, giving
//! request-response semantics over the actor's mpsc channel.

use croupier_core::{FunctionBinding, FunctionId};
use tokio::sync::oneshot;

use crate::error::Result;

// ============================================================================
// Registry Commands
// ============================================================================

/// Commands sent to the registry actor.
///
/// Bindings are boxed to reduce enum size variance.
#[derive(Debug)]
pub enum RegistryCommand {
    /// Insert or overwrite a binding.
    ///
    /// # Errors
    /// - `ClientError::OperationInProgress` while the reload gate is held
    Register {
        binding: Box<FunctionBinding>,
        respond_to: oneshot::Sender<Result<()>>,
    },

    /// Replace a binding on behalf of a reload, returning the previous one.
    ///
    /// Skips the gate check: only a permit holder sends this.
    Install {
        binding: Box<FunctionBinding>,
        respond_to: oneshot::Sender<Option<FunctionBinding>>,
    },

    /// Undo an `Install`: reinstate `previous`, or drop the entry if the
    /// reload introduced it.
    Restore {
        id: FunctionId,
        previous: Option<Box<FunctionBinding>>,
        respond_to: oneshot::Sender<()>,
    },

    /// Look up one binding.
    Get {
        id: FunctionId,
        respond_to: oneshot::Sender<Option<FunctionBinding>>,
    },

    /// Copy every binding, ordered by id.
    Snapshot {
        respond_to: oneshot::Sender<Vec<FunctionBinding>>,
    },

    Count {
        respond_to: oneshot::Sender<usize>,
    },
}
