//! In-process transport for tests and demos.
//!
//! [`MemoryTransport::new`] returns the transport together with a
//! [`MemoryAgent`] handle that shares its state. The handle injects latency
//! and failures and inspects what the "Agent" received.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use croupier_core::{FunctionDescriptor, FunctionId};
use tokio::time::Instant;
use tracing::debug;

use super::Transport;
use crate::error::TransportError;

#[derive(Debug, Default)]
struct AgentState {
    open: bool,
    registered: BTreeMap<FunctionId, FunctionDescriptor>,

    latency: Duration,
    failing_opens: Option<usize>,
    fail_all_opens: bool,
    rejected_functions: HashSet<FunctionId>,
    fail_probes: bool,
    fail_close: bool,

    open_calls: usize,
    close_calls: usize,
    register_all_calls: usize,
    register_single_calls: usize,
    probe_calls: usize,
    open_times: Vec<Instant>,
}

type Shared = Arc<Mutex<AgentState>>;

fn lock(state: &Shared) -> MutexGuard<'_, AgentState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ============================================================================
// Transport
// ============================================================================

/// Fake transport whose "Agent" lives in the same process.
#[derive(Debug)]
pub struct MemoryTransport {
    state: Shared,
}

impl MemoryTransport {
    pub fn new() -> (Self, MemoryAgent) {
        let state = Shared::default();
        (
            Self {
                state: Arc::clone(&state),
            },
            MemoryAgent { state },
        )
    }

    async fn simulate_latency(&self) {
        let latency = lock(&self.state).latency;
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn open(&mut self) -> Result<(), TransportError> {
        self.simulate_latency().await;

        let mut state = lock(&self.state);
        state.open_calls += 1;
        state.open_times.push(Instant::now());

        let refuse = state.fail_all_opens
            || match state.failing_opens.as_mut() {
                Some(remaining) if *remaining > 0 => {
                    *remaining -= 1;
                    true
                }
                _ => false,
            };
        if refuse {
            debug!(attempt = state.open_calls, "Memory agent refusing session");
            return Err(TransportError::Io("connection refused".to_string()));
        }

        state.open = true;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.simulate_latency().await;

        let mut state = lock(&self.state);
        state.close_calls += 1;
        state.open = false;
        if state.fail_close {
            return Err(TransportError::Io("close failed".to_string()));
        }
        Ok(())
    }

    async fn register_all(
        &mut self,
        functions: &[FunctionDescriptor],
    ) -> Result<(), TransportError> {
        self.simulate_latency().await;

        let mut state = lock(&self.state);
        if !state.open {
            return Err(TransportError::NotOpen);
        }
        state.register_all_calls += 1;

        if let Some(rejected) = functions
            .iter()
            .find(|f| state.rejected_functions.contains(&f.id))
        {
            return Err(TransportError::Rejected(format!(
                "registration of {} refused",
                rejected.id
            )));
        }

        state.registered = functions
            .iter()
            .map(|f| (f.id.clone(), f.clone()))
            .collect();
        Ok(())
    }

    async fn register_single(
        &mut self,
        function: &FunctionDescriptor,
    ) -> Result<(), TransportError> {
        self.simulate_latency().await;

        let mut state = lock(&self.state);
        if !state.open {
            return Err(TransportError::NotOpen);
        }
        state.register_single_calls += 1;

        if state.rejected_functions.contains(&function.id) {
            return Err(TransportError::Rejected(format!(
                "registration of {} refused",
                function.id
            )));
        }

        state
            .registered
            .insert(function.id.clone(), function.clone());
        Ok(())
    }

    async fn probe_health(&mut self) -> Result<(), TransportError> {
        self.simulate_latency().await;

        let mut state = lock(&self.state);
        state.probe_calls += 1;
        if !state.open {
            return Err(TransportError::Closed);
        }
        if state.fail_probes {
            return Err(TransportError::Timeout(Duration::from_secs(1)));
        }
        Ok(())
    }
}

// ============================================================================
// Control Handle
// ============================================================================

/// Steering and inspection handle for a [`MemoryTransport`].
#[derive(Debug, Clone)]
pub struct MemoryAgent {
    state: Shared,
}

impl MemoryAgent {
    /// Delay applied before every transport call.
    pub fn set_latency(&self, latency: Duration) {
        lock(&self.state).latency = latency;
    }

    /// Refuse the next `count` session opens.
    pub fn fail_next_opens(&self, count: usize) {
        lock(&self.state).failing_opens = Some(count);
    }

    /// Refuse every session open until switched off.
    pub fn refuse_connections(&self, refuse: bool) {
        lock(&self.state).fail_all_opens = refuse;
    }

    /// Reject registrations of `id` (both `register_all` and single).
    pub fn reject_function(&self, id: impl Into<FunctionId>) {
        lock(&self.state).rejected_functions.insert(id.into());
    }

    pub fn accept_function(&self, id: &FunctionId) {
        lock(&self.state).rejected_functions.remove(id);
    }

    pub fn fail_probes(&self, fail: bool) {
        lock(&self.state).fail_probes = fail;
    }

    pub fn fail_close(&self, fail: bool) {
        lock(&self.state).fail_close = fail;
    }

    /// Simulates the Agent dropping the session.
    pub fn drop_session(&self) {
        lock(&self.state).open = false;
    }

    pub fn is_open(&self) -> bool {
        lock(&self.state).open
    }

    /// Registrations the Agent currently holds, ordered by id.
    pub fn registered(&self) -> Vec<FunctionDescriptor> {
        lock(&self.state).registered.values().cloned().collect()
    }

    pub fn registered_version(&self, id: &str) -> Option<String> {
        lock(&self.state)
            .registered
            .get(&FunctionId::new(id))
            .map(|f| f.version.clone())
    }

    pub fn open_calls(&self) -> usize {
        lock(&self.state).open_calls
    }

    pub fn close_calls(&self) -> usize {
        lock(&self.state).close_calls
    }

    pub fn register_all_calls(&self) -> usize {
        lock(&self.state).register_all_calls
    }

    pub fn register_single_calls(&self) -> usize {
        lock(&self.state).register_single_calls
    }

    pub fn probe_calls(&self) -> usize {
        lock(&self.state).probe_calls
    }

    /// When each `open` call arrived (tokio clock, so paused time works).
    pub fn open_times(&self) -> Vec<Instant> {
        lock(&self.state).open_times.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn descriptor(id: &str, version: &str) -> FunctionDescriptor {
        FunctionDescriptor {
            id: FunctionId::new(id),
            version: version.to_string(),
            registered_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_calls_before_open_fail() {
        let (mut transport, _agent) = MemoryTransport::new();

        let err = transport
            .register_single(&descriptor("player.ban", "1.0.0"))
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::NotOpen));
        assert!(matches!(
            transport.probe_health().await,
            Err(TransportError::Closed)
        ));
    }

    #[tokio::test]
    async fn test_register_all_replaces_registrations() {
        let (mut transport, agent) = MemoryTransport::new();
        transport.open().await.unwrap();

        transport
            .register_single(&descriptor("stale.fn", "0.1.0"))
            .await
            .unwrap();
        transport
            .register_all(&[descriptor("player.ban", "1.0.0")])
            .await
            .unwrap();

        let ids: Vec<_> = agent.registered().into_iter().map(|f| f.id).collect();
        assert_eq!(ids, vec![FunctionId::new("player.ban")]);
        assert_eq!(agent.register_all_calls(), 1);
        assert_eq!(agent.register_single_calls(), 1);
    }

    #[tokio::test]
    async fn test_fail_next_opens_counts_down() {
        let (mut transport, agent) = MemoryTransport::new();
        agent.fail_next_opens(2);

        assert!(transport.open().await.is_err());
        assert!(transport.open().await.is_err());
        assert!(transport.open().await.is_ok());
        assert_eq!(agent.open_calls(), 3);
        assert_eq!(agent.open_times().len(), 3);
        assert!(agent.is_open());
    }

    #[tokio::test]
    async fn test_rejected_function() {
        let (mut transport, agent) = MemoryTransport::new();
        transport.open().await.unwrap();
        agent.reject_function("player.ban");

        let err = transport
            .register_single(&descriptor("player.ban", "2.0.0"))
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Rejected(_)));
        assert!(agent.registered_version("player.ban").is_none());

        agent.accept_function(&FunctionId::new("player.ban"));
        transport
            .register_single(&descriptor("player.ban", "2.0.0"))
            .await
            .unwrap();
        assert_eq!(agent.registered_version("player.ban").as_deref(), Some("2.0.0"));
    }

    #[tokio::test]
    async fn test_drop_session_breaks_probe() {
        let (mut transport, agent) = MemoryTransport::new();
        transport.open().await.unwrap();
        assert!(transport.probe_health().await.is_ok());

        agent.drop_session();
        assert!(matches!(
            transport.probe_health().await,
            Err(TransportError::Closed)
        ));
        assert_eq!(agent.probe_calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_latency_is_applied() {
        let (mut transport, agent) = MemoryTransport::new();
        agent.set_latency(Duration::from_millis(250));

        let start = Instant::now();
        transport.open().await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(250));
    }

    #[tokio::test]
    async fn test_close_failure_still_closes() {
        let (mut transport, agent) = MemoryTransport::new();
        transport.open().await.unwrap();
        agent.fail_close(true);

        assert!(transport.close().await.is_err());
        assert!(!agent.is_open());
        assert_eq!(agent.close_calls(), 1);
    }
}
