//! Croupier SDK - reload-aware connection manager for game functions.
//!
//! Registers game functions with the Croupier Agent and keeps them
//! registered while handlers are hot-reloaded, the Agent restarts, or the
//! configuration changes.
//!
//! # Architecture
//!
//! ```text
//!  change events ─▶ ┌───────────────────┐ install/restore ┌────────────────┐
//!  (PollingWatcher, │ ReloadCoordinator │────────────────▶│ Registry actor │
//!   change_sender)  │   (ReloadGate)    │                 └───────▲────────┘
//!                   └─────────┬─────────┘                         │ snapshot
//!                             │ push_reload              ┌────────┴─────────┐
//!                             └─────────────────────────▶│ConnectionManager │──▶ Transport ──▶ Agent
//!                                                        │ (watch state)    │
//!   health monitor ── probe / mark_unhealthy ───────────▶│                  │
//!   reconnect loop ── attempt_reconnect ────────────────▶└──────────────────┘
//! ```
//!
//! [`HotReloadClient`] wires everything together and owns the background
//! tasks.
//!
//! # Panic-Free Policy
//!
//! Library code never calls `.unwrap()`, `.expect()`, `panic!()`,
//! `unreachable!()` or `todo!()`; every failure is a [`ClientError`].

pub mod client;
pub mod connection;
pub mod error;
pub mod gate;
pub mod health;
pub mod metrics;
pub mod notifier;
pub mod reconnect;
pub mod registry;
pub mod reload;
pub mod transport;

pub use client::HotReloadClient;
pub use connection::{
    backoff_delay, ConnectionManager, PushOutcome, ReconnectOutcome, RetryPolicy,
};
pub use error::{BatchFailure, ClientError, Result, TransportError};
pub use gate::{ReloadGate, ReloadPermit};
pub use notifier::{ChangeEvent, ChangeKind, IgnoreChanges, PollingWatcher, ReloadPolicy};
pub use reload::{FunctionUpdate, ReloadCoordinator};
pub use transport::{MemoryAgent, MemoryTransport, Transport, UnixSocketTransport};

pub use croupier_core::{
    handler_fn, ConnectionState, FunctionBinding, FunctionHandler, FunctionId, HandlerError,
    HotReloadConfig, ReloadMetrics,
};
