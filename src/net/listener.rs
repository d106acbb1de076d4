//! TCP listener implementation with backpressure.
//!
//! # Responsibilities
//! - Bind to the configured host/port
//! - Accept incoming TCP connections
//! - Enforce max_sessions limit via semaphore
//! - Graceful handling of accept errors

use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;

use crate::config::ListenerConfig;

/// Error type for listener operations.
#[derive(Debug)]
pub enum ListenerError {
    /// Failed to bind to address.
    Bind(std::io::Error),
    /// Failed to accept connection.
    Accept(std::io::Error),
}

impl std::fmt::Display for ListenerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ListenerError::Bind(e) => write!(f, "Failed to bind: {}", e),
            ListenerError::Accept(e) => write!(f, "Failed to accept: {}", e),
        }
    }
}

impl std::error::Error for ListenerError {}

/// A bounded TCP listener that limits concurrent sessions.
///
/// Uses a semaphore to enforce `max_sessions`. When the limit is reached,
/// new connections will wait until a slot becomes available.
pub struct Listener {
    /// The underlying TCP listener.
    inner: TcpListener,
    /// Semaphore to limit concurrent sessions.
    session_limit: Arc<Semaphore>,
    /// Configured maximum sessions.
    max_sessions: usize,
}

impl Listener {
    /// Bind to the configured host and port with session limits.
    pub async fn bind(config: &ListenerConfig) -> Result<Self, ListenerError> {
        let listener = TcpListener::bind((config.host.as_str(), config.port))
            .await
            .map_err(ListenerError::Bind)?;

        let local_addr = listener.local_addr().map_err(ListenerError::Bind)?;

        tracing::info!(
            address = %local_addr,
            max_sessions = config.max_sessions,
            "Listener bound"
        );

        Ok(Self {
            inner: listener,
            session_limit: Arc::new(Semaphore::new(config.max_sessions)),
            max_sessions: config.max_sessions,
        })
    }

    /// Accept a new connection, respecting the session limit.
    ///
    /// This will wait if the session limit has been reached.
    /// Returns the stream and a permit that must be held for the session's lifetime.
    pub async fn accept(&self) -> Result<(TcpStream, SocketAddr, SessionPermit), ListenerError> {
        // Acquire permit first (backpressure)
        let permit = self
            .session_limit
            .clone()
            .acquire_owned()
            .await
            .expect("Semaphore closed unexpectedly");

        // Then accept the connection
        let (stream, addr) = self.inner.accept().await.map_err(ListenerError::Accept)?;

        tracing::debug!(
            peer_addr = %addr,
            available_permits = self.session_limit.available_permits(),
            "Connection accepted"
        );

        Ok((stream, addr, SessionPermit { _permit: permit }))
    }

    /// Get the local address this listener is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, std::io::Error> {
        self.inner.local_addr()
    }

    /// Get current available session slots.
    pub fn available_permits(&self) -> usize {
        self.session_limit.available_permits()
    }

    /// Get configured maximum sessions.
    pub fn max_sessions(&self) -> usize {
        self.max_sessions
    }
}

/// A permit representing a session slot.
///
/// When dropped, the slot is released back to the pool. This ensures
/// backpressure is maintained even if the session pump panics.
#[derive(Debug)]
pub struct SessionPermit {
    _permit: tokio::sync::OwnedSemaphorePermit,
}
