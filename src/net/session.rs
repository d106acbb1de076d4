//! Session identity and lifecycle tracking.
//!
//! # Responsibilities
//! - Generate unique session IDs for tracing
//! - Expose the per-session control surface (write, close, closed signal)
//! - Guarantee the close path fires exactly once per session
//!
//! A session is split in two: [`SessionHandle`] is the control surface kept
//! in the registry and shared with the I/O pump, while [`Session`] is the
//! value handed to the caller's handler and additionally owns the inbound
//! byte stream. The handle never touches transport frames; the pump converts
//! bytes to frames at the edge.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::{mpsc, watch};

/// Global atomic counter for session IDs.
/// Relaxed ordering is sufficient since we only need uniqueness.
static SESSION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Buffered outbound frames per session before `write` applies backpressure.
const OUTBOUND_BUFFER: usize = 64;

/// Buffered inbound payloads per session before the reader applies backpressure.
const INPUT_BUFFER: usize = 64;

/// Unique identifier for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(u64);

impl SessionId {
    /// Generate a new unique session ID.
    pub fn new() -> Self {
        Self(SESSION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

/// Error returned when operating on a session that is already closing.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The session has closed or close has been requested.
    #[error("session is closed")]
    Closed,
}

/// Control surface of one upgraded session.
///
/// Shared between the registry (for coordinated shutdown), the I/O pump
/// tasks, and the handler (through [`Session`]). Closing is an idempotent
/// latch: the first `close` call wins, every later call is a no-op.
#[derive(Debug)]
pub struct SessionHandle {
    id: SessionId,
    peer: SocketAddr,
    outbound: mpsc::Sender<Bytes>,
    close_requested: watch::Sender<bool>,
    closed_rx: watch::Receiver<bool>,
}

impl SessionHandle {
    /// Build the handle, the handler-facing session, and the pump-facing
    /// channel ends for one upgraded connection.
    pub(crate) fn channel(peer: SocketAddr) -> (Arc<SessionHandle>, Session, SessionPipes) {
        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_BUFFER);
        let (input_tx, input_rx) = mpsc::channel(INPUT_BUFFER);
        let (close_tx, _) = watch::channel(false);
        let (closed_tx, closed_rx) = watch::channel(false);

        let handle = Arc::new(SessionHandle {
            id: SessionId::new(),
            peer,
            outbound: outbound_tx,
            close_requested: close_tx,
            closed_rx,
        });

        let session = Session {
            handle: Arc::clone(&handle),
            input: input_rx,
        };

        let pipes = SessionPipes {
            outbound_rx,
            input_tx,
            closed_tx,
        };

        (handle, session, pipes)
    }

    /// This session's unique ID.
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Address of the remote peer.
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// Queue bytes for delivery to the peer.
    ///
    /// Applies backpressure when the outbound buffer is full. Fails once
    /// close has been requested.
    pub async fn write(&self, data: Bytes) -> Result<(), SessionError> {
        if self.is_close_requested() {
            return Err(SessionError::Closed);
        }
        self.outbound
            .send(data)
            .await
            .map_err(|_| SessionError::Closed)
    }

    /// Request that this session close.
    ///
    /// Idempotent: only the first call flips the latch. The pump observes
    /// the request, tears the connection down, and fires the closed signal.
    pub fn close(&self) {
        let first = self
            .close_requested
            .send_if_modified(|requested| !std::mem::replace(requested, true));
        if first {
            tracing::debug!(session = %self.id, "Session close requested");
        }
    }

    /// Whether close has been requested (the session may still be draining).
    pub fn is_close_requested(&self) -> bool {
        *self.close_requested.borrow()
    }

    /// Whether the session has finished closing.
    pub fn is_closed(&self) -> bool {
        // A dropped sender means the pump is gone, which only happens
        // after teardown.
        *self.closed_rx.borrow() || self.closed_rx.has_changed().is_err()
    }

    /// Wait until the session has finished closing.
    ///
    /// Resolves immediately if it already has. Safe to await from any number
    /// of tasks concurrently.
    pub async fn wait_closed(&self) {
        let mut rx = self.closed_rx.clone();
        let _ = rx.wait_for(|closed| *closed).await;
    }

    /// Subscribe to the close-request latch (used by the pump tasks).
    pub(crate) fn close_signal(&self) -> watch::Receiver<bool> {
        self.close_requested.subscribe()
    }
}

/// Pump-facing channel ends produced alongside a [`SessionHandle`].
pub(crate) struct SessionPipes {
    /// Bytes queued by `write`, to be framed and sent to the peer.
    pub outbound_rx: mpsc::Receiver<Bytes>,
    /// Inbound payloads, surfaced through `Session::recv`.
    pub input_tx: mpsc::Sender<Bytes>,
    /// Flipped exactly once by the teardown supervisor.
    pub closed_tx: watch::Sender<bool>,
}

/// One accepted, upgraded, bidirectional connection, as seen by the
/// caller's handler.
#[derive(Debug)]
pub struct Session {
    handle: Arc<SessionHandle>,
    input: mpsc::Receiver<Bytes>,
}

impl Session {
    /// This session's unique ID.
    pub fn id(&self) -> SessionId {
        self.handle.id()
    }

    /// Address of the remote peer.
    pub fn peer_addr(&self) -> SocketAddr {
        self.handle.peer_addr()
    }

    /// Queue bytes for delivery to the peer.
    pub async fn write(&self, data: Bytes) -> Result<(), SessionError> {
        self.handle.write(data).await
    }

    /// Receive the next inbound payload. Returns `None` once the session
    /// has closed and the buffer is drained.
    pub async fn recv(&mut self) -> Option<Bytes> {
        self.input.recv().await
    }

    /// Request that this session close. Idempotent.
    pub fn close(&self) {
        self.handle.close();
    }

    /// Wait until the session has finished closing.
    pub async fn closed(&self) {
        self.handle.wait_closed().await;
    }

    /// The shared control surface for this session.
    pub fn handle(&self) -> &Arc<SessionHandle> {
        &self.handle
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_peer() -> SocketAddr {
        "127.0.0.1:4242".parse().unwrap()
    }

    #[test]
    fn session_id_unique() {
        let id1 = SessionId::new();
        let id2 = SessionId::new();
        assert_ne!(id1, id2);
    }

    #[tokio::test]
    async fn close_latch_fires_once() {
        let (handle, _session, pipes) = SessionHandle::channel(test_peer());
        let mut signal = handle.close_signal();
        assert!(!handle.is_close_requested());

        handle.close();
        handle.close();
        handle.close();

        assert!(handle.is_close_requested());
        // One observable transition, regardless of how many close calls raced.
        signal.changed().await.unwrap();
        assert!(!signal.has_changed().unwrap());
        drop(pipes);
    }

    #[tokio::test]
    async fn write_fails_after_close_requested() {
        let (handle, _session, _pipes) = SessionHandle::channel(test_peer());
        handle.write(Bytes::from_static(b"ok")).await.unwrap();
        handle.close();
        assert!(matches!(
            handle.write(Bytes::from_static(b"no")).await,
            Err(SessionError::Closed)
        ));
    }

    #[tokio::test]
    async fn wait_closed_resolves_when_pump_finishes() {
        let (handle, _session, pipes) = SessionHandle::channel(test_peer());
        assert!(!handle.is_closed());

        let waiter = {
            let handle = Arc::clone(&handle);
            tokio::spawn(async move { handle.wait_closed().await })
        };

        pipes.closed_tx.send(true).unwrap();
        waiter.await.unwrap();
        assert!(handle.is_closed());
    }

    #[tokio::test]
    async fn dropped_pump_counts_as_closed() {
        let (handle, _session, pipes) = SessionHandle::channel(test_peer());
        drop(pipes);
        handle.wait_closed().await;
        assert!(handle.is_closed());
    }

    #[tokio::test]
    async fn recv_sees_pump_input_then_none() {
        let (_handle, mut session, pipes) = SessionHandle::channel(test_peer());
        pipes.input_tx.send(Bytes::from_static(b"hi")).await.unwrap();
        assert_eq!(session.recv().await.unwrap(), Bytes::from_static(b"hi"));

        drop(pipes);
        assert!(session.recv().await.is_none());
    }
}
