//! Function registry using the Actor pattern.
//!
//! The registry is the single owner of every function binding. It receives
//! commands via a tokio mpsc channel, so registrations, reload installs and
//! rollbacks are serialized without locks.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐    RegistryCommand    ┌─────────────────┐
//! │ HotReloadClient  │──────────────────────▶│  RegistryActor  │
//! │ ReloadCoordinator│     (mpsc channel)    │ HashMap<Id, B>  │
//! │ ConnectionManager│◀──────────────────────│                 │
//! └──────────────────┘   oneshot replies     └────────┬────────┘
//!                                                     │ reads
//!                                               ┌─────▼─────┐
//!                                               │ReloadGate │
//!                                               └───────────┘
//! ```

use tokio::sync::mpsc;

mod actor;
mod commands;
mod handle;

pub use actor::RegistryActor;
pub use commands::RegistryCommand;
pub use handle::RegistryHandle;

use crate::gate::ReloadGate;

/// Channel buffer size
const COMMAND_BUFFER: usize = 100;

/// Spawn the registry actor and return a handle for interaction.
///
/// The actor stops once every handle has been dropped.
///
/// # Example
///
/// ```no_run
/// use croupier_sdk::gate::ReloadGate;
/// use croupier_sdk::registry::spawn_registry;
///
/// #[tokio::main]
/// async fn main() {
///     let handle = spawn_registry(ReloadGate::new());
///     let bindings = handle.snapshot().await;
/// }
/// ```
pub fn spawn_registry(gate: ReloadGate) -> RegistryHandle {
    let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_BUFFER);

    let actor = RegistryActor::new(cmd_rx, gate);
    tokio::spawn(actor.run());

    RegistryHandle::new(cmd_tx)
}
