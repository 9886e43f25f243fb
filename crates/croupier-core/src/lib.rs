//! Croupier Core - Shared types for the hot-reload SDK
//!
//! This crate provides the domain types shared between the wire protocol
//! (croupier-protocol) and the client runtime (croupier-sdk).
//!
//! All code follows the panic-free policy: no `.unwrap()`, `.expect()`,
//! `panic!()`, `unreachable!()`, `todo!()`, or direct indexing `[i]`.

pub mod config;
pub mod error;
pub mod function;
pub mod metrics;
pub mod state;

// Re-exports for convenience
pub use config::{FileWatchingConfig, HotReloadConfig, MAX_DURATION};
pub use error::{ConfigError, HandlerError};
pub use function::{
    handler_fn, FnHandler, FunctionBinding, FunctionDescriptor, FunctionHandler, FunctionId,
};
pub use metrics::ReloadMetrics;
pub use state::ConnectionState;
