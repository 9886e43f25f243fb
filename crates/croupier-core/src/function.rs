//! Function identity, handler capability and registry bindings.
//!
//! A [`FunctionBinding`] ties a [`FunctionId`] to one version of a handler.
//! Bindings are immutable; a reload replaces the whole binding. The
//! serializable [`FunctionDescriptor`] is what leaves the process: the
//! handler itself never crosses the wire.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::HandlerError;

// ============================================================================
// Function Identifier
// ============================================================================

/// Unique identifier of a game function (e.g. `player.ban`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FunctionId(String);

impl FunctionId {
    /// Creates a new FunctionId.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FunctionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for FunctionId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for FunctionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

// ============================================================================
// Handler Capability
// ============================================================================

/// A callable game function.
///
/// Handlers take a JSON payload and produce a JSON result. Any concrete
/// handler type (async service call, closure, plugin shim) binds behind this
/// single contract.
#[async_trait]
pub trait FunctionHandler: Send + Sync {
    async fn invoke(&self, payload: Value) -> Result<Value, HandlerError>;
}

/// Adapter turning a synchronous closure into a [`FunctionHandler`].
pub struct FnHandler<F>(F);

#[async_trait]
impl<F> FunctionHandler for FnHandler<F>
where
    F: Fn(Value) -> Result<Value, HandlerError> + Send + Sync,
{
    async fn invoke(&self, payload: Value) -> Result<Value, HandlerError> {
        (self.0)(payload)
    }
}

/// Wraps a closure as a shareable handler.
///
/// ```
/// use croupier_core::handler_fn;
/// use serde_json::json;
///
/// let echo = handler_fn(|payload| Ok(json!({ "echo": payload })));
/// ```
pub fn handler_fn<F>(f: F) -> Arc<dyn FunctionHandler>
where
    F: Fn(Value) -> Result<Value, HandlerError> + Send + Sync + 'static,
{
    Arc::new(FnHandler(f))
}

// ============================================================================
// Binding
// ============================================================================

/// A function identifier bound to a specific handler version.
#[derive(Clone)]
pub struct FunctionBinding {
    pub id: FunctionId,
    pub version: String,
    pub handler: Arc<dyn FunctionHandler>,
    pub registered_at: DateTime<Utc>,
}

impl FunctionBinding {
    /// Creates a binding stamped with the current time.
    pub fn new(
        id: impl Into<FunctionId>,
        version: impl Into<String>,
        handler: Arc<dyn FunctionHandler>,
    ) -> Self {
        Self {
            id: id.into(),
            version: version.into(),
            handler,
            registered_at: Utc::now(),
        }
    }

    /// Returns the wire-safe view of this binding.
    pub fn descriptor(&self) -> FunctionDescriptor {
        FunctionDescriptor {
            id: self.id.clone(),
            version: self.version.clone(),
            registered_at: self.registered_at,
        }
    }
}

impl fmt::Debug for FunctionBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionBinding")
            .field("id", &self.id)
            .field("version", &self.version)
            .field("registered_at", &self.registered_at)
            .finish_non_exhaustive()
    }
}

/// Serializable description of a binding, sent to the Agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionDescriptor {
    pub id: FunctionId,
    pub version: String,
    pub registered_at: DateTime<Utc>,
}
