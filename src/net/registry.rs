//! Concurrency-safe registry of live sessions.
//!
//! # Responsibilities
//! - Track every successfully upgraded session by ID
//! - Tolerate racing removals from independent close paths
//! - Fan out a coordinated close and await completion (drain)
//!
//! # Design Decisions
//! - Membership invariant: a handle is present iff its connection upgraded
//!   and has not yet finished closing
//! - `close_all` operates on a snapshot; sessions registered after the
//!   snapshot are not awaited (the coordinator closes the listener first,
//!   so none arrive during a normal drain)
//! - The drain is bounded by a deadline so a stuck peer cannot hang `stop`

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::time::Instant;

use crate::net::session::{SessionHandle, SessionId};

/// Error type for the shutdown drain.
#[derive(Debug, thiserror::Error)]
pub enum DrainError {
    /// Not every session acknowledged closure before the deadline.
    #[error("{remaining} session(s) did not close within {timeout:?}")]
    Timeout {
        remaining: usize,
        timeout: Duration,
    },
}

/// Tracking set of live sessions, used for coordinated shutdown.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: DashMap<SessionId, Arc<SessionHandle>>,
}

impl SessionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
        }
    }

    /// Register a session. Must happen before the caller's handler sees it,
    /// so that a concurrent drain is guaranteed to observe the session.
    pub fn add(&self, handle: Arc<SessionHandle>) {
        let id = handle.id();
        self.sessions.insert(id, handle);
        tracing::trace!(session = %id, active = self.sessions.len(), "Session registered");
    }

    /// Remove a session. Returns `false` if it was already gone, which is
    /// not an error: independent close paths may race.
    pub fn remove(&self, id: &SessionId) -> bool {
        let removed = self.sessions.remove(id).is_some();
        if removed {
            tracing::trace!(session = %id, active = self.sessions.len(), "Session deregistered");
        }
        removed
    }

    /// Current number of live sessions.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Whether no sessions are live.
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Request close on every currently-registered session and wait until
    /// each has acknowledged closure.
    ///
    /// Returns the number of sessions drained. Every member at the moment
    /// this is invoked is closed and awaited; on deadline expiry the count
    /// of still-open sessions is reported and the caller proceeds with
    /// resource release regardless.
    pub async fn close_all(&self, drain_timeout: Duration) -> Result<usize, DrainError> {
        let snapshot: Vec<Arc<SessionHandle>> = self
            .sessions
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();

        if snapshot.is_empty() {
            return Ok(0);
        }

        tracing::info!(sessions = snapshot.len(), "Draining sessions");

        for handle in &snapshot {
            handle.close();
        }

        let deadline = Instant::now() + drain_timeout;
        for handle in &snapshot {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if tokio::time::timeout(remaining, handle.wait_closed())
                .await
                .is_err()
            {
                let open = snapshot.iter().filter(|h| !h.is_closed()).count();
                tracing::warn!(
                    remaining = open,
                    timeout = ?drain_timeout,
                    "Drain deadline expired with sessions still open"
                );
                return Err(DrainError::Timeout {
                    remaining: open,
                    timeout: drain_timeout,
                });
            }
        }

        tracing::info!(sessions = snapshot.len(), "Drain complete");
        Ok(snapshot.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::session::SessionHandle;
    use std::net::SocketAddr;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn test_peer() -> SocketAddr {
        "127.0.0.1:4242".parse().unwrap()
    }

    /// Register a session backed by a miniature pump: a task that waits for
    /// the close request, then deregisters and fires the closed signal,
    /// exactly like the real teardown supervisor.
    fn spawn_test_session(registry: &Arc<SessionRegistry>) -> Arc<SessionHandle> {
        let (handle, _session, pipes) = SessionHandle::channel(test_peer());
        registry.add(Arc::clone(&handle));

        let registry = Arc::clone(registry);
        let pump_handle = Arc::clone(&handle);
        tokio::spawn(async move {
            let mut close_rx = pump_handle.close_signal();
            let _ = close_rx.wait_for(|requested| *requested).await;
            registry.remove(&pump_handle.id());
            let _ = pipes.closed_tx.send(true);
        });

        handle
    }

    #[tokio::test]
    async fn add_remove_len() {
        let registry = Arc::new(SessionRegistry::new());
        assert!(registry.is_empty());

        let (handle, _session, _pipes) = SessionHandle::channel(test_peer());
        let id = handle.id();
        registry.add(handle);
        assert_eq!(registry.len(), 1);

        assert!(registry.remove(&id));
        assert!(!registry.remove(&id));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn close_all_on_empty_registry_is_immediate() {
        let registry = SessionRegistry::new();
        let drained = registry.close_all(Duration::from_secs(1)).await.unwrap();
        assert_eq!(drained, 0);
    }

    #[tokio::test]
    async fn close_all_drains_every_member() {
        let registry = Arc::new(SessionRegistry::new());
        let handles: Vec<_> = (0..16).map(|_| spawn_test_session(&registry)).collect();

        let drained = registry.close_all(Duration::from_secs(5)).await.unwrap();
        assert_eq!(drained, 16);
        assert!(registry.is_empty());
        for handle in handles {
            assert!(handle.is_closed());
        }
    }

    #[tokio::test]
    async fn close_all_times_out_on_stuck_session() {
        let registry = Arc::new(SessionRegistry::new());
        // No pump: nothing ever acknowledges the close request.
        let (handle, _session, _pipes) = SessionHandle::channel(test_peer());
        registry.add(Arc::clone(&handle));

        let err = registry
            .close_all(Duration::from_millis(50))
            .await
            .unwrap_err();
        match err {
            DrainError::Timeout { remaining, .. } => assert_eq!(remaining, 1),
        }
    }

    #[tokio::test]
    async fn double_close_yields_single_removal() {
        let registry = Arc::new(SessionRegistry::new());
        let handle = spawn_test_session(&registry);

        handle.close();
        handle.close();
        handle.wait_closed().await;

        assert!(registry.is_empty());
        // The pump already deregistered; a second removal must be a no-op.
        assert!(!registry.remove(&handle.id()));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn registration_is_never_dropped_by_concurrent_drain() {
        for _ in 0..1000 {
            let registry = Arc::new(SessionRegistry::new());
            let handle = spawn_test_session(&registry);

            let drain = {
                let registry = Arc::clone(&registry);
                tokio::spawn(async move { registry.close_all(Duration::from_secs(5)).await })
            };

            let drained = drain.await.unwrap().unwrap();
            assert_eq!(drained, 1);
            handle.wait_closed().await;
            assert!(registry.is_empty());
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn self_closes_racing_a_drain_settle_to_empty() {
        for _ in 0..100 {
            let registry = Arc::new(SessionRegistry::new());
            let handles: Vec<_> = (0..32).map(|_| spawn_test_session(&registry)).collect();

            // Half the sessions close themselves while the drain runs.
            let closers: Vec<_> = handles
                .iter()
                .step_by(2)
                .map(|handle| {
                    let handle = Arc::clone(handle);
                    tokio::spawn(async move { handle.close() })
                })
                .collect();

            let drained = registry.close_all(Duration::from_secs(5)).await.unwrap();
            assert_eq!(drained, 32);
            for closer in closers {
                closer.await.unwrap();
            }
            assert!(registry.is_empty());
            for handle in &handles {
                assert!(handle.is_closed());
            }
        }
    }

    #[tokio::test]
    async fn every_close_path_fires_exactly_once() {
        let registry = Arc::new(SessionRegistry::new());
        let fired = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8).map(|_| spawn_test_session(&registry)).collect();
        let waiters: Vec<_> = handles
            .iter()
            .map(|handle| {
                let handle = Arc::clone(handle);
                let fired = Arc::clone(&fired);
                tokio::spawn(async move {
                    handle.wait_closed().await;
                    fired.fetch_add(1, Ordering::SeqCst);
                })
            })
            .collect();

        registry.close_all(Duration::from_secs(5)).await.unwrap();
        for waiter in waiters {
            waiter.await.unwrap();
        }
        assert_eq!(fired.load(Ordering::SeqCst), 8);
    }
}
