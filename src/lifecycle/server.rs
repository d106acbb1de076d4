//! Lifecycle coordination: start, stop, and the running state machine.
//!
//! # Responsibilities
//! - Own the server configuration and the per-run resources
//! - start: bind the listener, spawn the accept loop, enter Running
//! - stop: close the listener, drain the registry, release resources
//! - Reject usage errors (start while not idle) without touching state
//!
//! # Data Flow
//! ```text
//! start:
//!     Idle → Starting → bind → spawn accept loop → Running
//!            (bind failure → Idle, error returned)
//!
//! stop:
//!     Running → Stopping
//!         (1) trigger shutdown, await accept task  → listener closed
//!         (2) registry.close_all(drain deadline)   → sessions drained
//!         (3) release run resources (always runs)
//!     → Idle, captured drain cause returned
//! ```

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;

use crate::config::ServerConfig;
use crate::lifecycle::shutdown::Shutdown;
use crate::net::{DrainError, Listener, ListenerError, Session, SessionRegistry};
use crate::ws::{initializer, SessionHandler};

/// Lifecycle state of the server. Stopped is identical to Idle: a stopped
/// server can be started again, with a new configuration if desired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// No listener bound; ready to start.
    Idle,
    /// Bind in progress.
    Starting,
    /// Accepting connections.
    Running,
    /// Shutdown sequence in progress.
    Stopping,
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            LifecycleState::Idle => "idle",
            LifecycleState::Starting => "starting",
            LifecycleState::Running => "running",
            LifecycleState::Stopping => "stopping",
        };
        f.write_str(name)
    }
}

/// Error type for `start` (and `set_config`).
#[derive(Debug, thiserror::Error)]
pub enum StartError {
    /// The server already has a run in progress. The existing run is
    /// left untouched.
    #[error("server is not idle (state: {0})")]
    NotIdle(LifecycleState),

    /// Binding the listener failed. The server reverts to idle.
    #[error("failed to bind listener: {0}")]
    Bind(#[from] ListenerError),
}

/// Error type for `stop`. Whatever the cause, the server has released its
/// run resources and returned to idle by the time this is observed.
#[derive(Debug, thiserror::Error)]
pub enum StopError {
    /// Draining registered sessions did not complete cleanly.
    #[error(transparent)]
    Drain(#[from] DrainError),
}

/// Per-run resources, owned under the coordinator's lock.
struct Inner {
    config: ServerConfig,
    state: LifecycleState,
    shutdown: Option<Shutdown>,
    accept_task: Option<JoinHandle<()>>,
    local_addr: Option<SocketAddr>,
}

/// The terminal server: binds a listener, upgrades connections to
/// sessions, and coordinates graceful shutdown of everything it accepted.
pub struct Server {
    registry: Arc<SessionRegistry>,
    inner: Mutex<Inner>,
}

impl Server {
    /// Create a server with the given configuration. Nothing is bound
    /// until `start`.
    pub fn new(config: ServerConfig) -> Self {
        Self {
            registry: Arc::new(SessionRegistry::new()),
            inner: Mutex::new(Inner {
                config,
                state: LifecycleState::Idle,
                shutdown: None,
                accept_task: None,
                local_addr: None,
            }),
        }
    }

    /// Bind the listener and begin accepting connections.
    ///
    /// Each successfully upgraded connection is registered and handed to
    /// `handler` exactly once. Resolves with the bound address (useful with
    /// port 0) or the bind failure; on failure the server is idle again and
    /// a later `start` may succeed.
    pub async fn start<H>(&self, handler: H) -> Result<SocketAddr, StartError>
    where
        H: Fn(Session) + Send + Sync + 'static,
    {
        let mut inner = self.inner.lock().await;
        if inner.state != LifecycleState::Idle {
            return Err(StartError::NotIdle(inner.state));
        }
        inner.state = LifecycleState::Starting;
        tracing::info!(
            host = %inner.config.listener.host,
            port = inner.config.listener.port,
            "Server starting"
        );

        let listener = match Listener::bind(&inner.config.listener).await {
            Ok(listener) => listener,
            Err(e) => {
                inner.state = LifecycleState::Idle;
                return Err(StartError::Bind(e));
            }
        };
        let local_addr = match listener.local_addr() {
            Ok(addr) => addr,
            Err(e) => {
                inner.state = LifecycleState::Idle;
                return Err(StartError::Bind(ListenerError::Bind(e)));
            }
        };

        let shutdown = Shutdown::new();
        let handler: SessionHandler = Arc::new(handler);
        let handshake_timeout = Duration::from_secs(inner.config.timeouts.handshake_secs);
        let accept_task = tokio::spawn(accept_loop(
            listener,
            Arc::clone(&self.registry),
            handler,
            handshake_timeout,
            shutdown.subscribe(),
        ));

        inner.shutdown = Some(shutdown);
        inner.accept_task = Some(accept_task);
        inner.local_addr = Some(local_addr);
        inner.state = LifecycleState::Running;
        tracing::info!(address = %local_addr, "Server running");
        Ok(local_addr)
    }

    /// Stop accepting, drain every registered session, and release the
    /// run's resources.
    ///
    /// Total: the server is idle again when this resolves, even when the
    /// drain step failed; its cause is captured and returned. Stopping an
    /// idle server is a no-op that succeeds immediately.
    pub async fn stop(&self) -> Result<(), StopError> {
        let mut inner = self.inner.lock().await;
        if inner.state == LifecycleState::Idle {
            tracing::debug!("Stop requested while idle, nothing to do");
            return Ok(());
        }
        inner.state = LifecycleState::Stopping;
        tracing::info!("Server stopping");

        // (1) Close the listener and wait until the accept loop has exited,
        // so no new sessions can register behind the drain.
        if let Some(shutdown) = inner.shutdown.take() {
            shutdown.trigger();
        }
        if let Some(task) = inner.accept_task.take() {
            let _ = task.await;
        }

        // (2) Drain, capturing the cause instead of bailing out.
        let drain_timeout = Duration::from_secs(inner.config.timeouts.drain_secs);
        let drained = self.registry.close_all(drain_timeout).await;

        // (3) Release run resources unconditionally.
        inner.local_addr = None;
        inner.state = LifecycleState::Idle;
        tracing::info!("Server stopped");

        drained.map(|_| ()).map_err(StopError::from)
    }

    /// Replace the configuration. Permitted only while idle; the next
    /// `start` uses the new values.
    pub async fn set_config(&self, config: ServerConfig) -> Result<(), StartError> {
        let mut inner = self.inner.lock().await;
        if inner.state != LifecycleState::Idle {
            return Err(StartError::NotIdle(inner.state));
        }
        inner.config = config;
        Ok(())
    }

    /// Current configuration.
    pub async fn config(&self) -> ServerConfig {
        self.inner.lock().await.config.clone()
    }

    /// Current lifecycle state.
    pub async fn state(&self) -> LifecycleState {
        self.inner.lock().await.state
    }

    /// Address the listener is bound to, while running.
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        self.inner.lock().await.local_addr
    }

    /// Number of currently live sessions.
    pub fn active_sessions(&self) -> usize {
        self.registry.len()
    }

    /// The session registry backing this server.
    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }
}

/// Accept connections until the shutdown signal fires, spawning an
/// initializer per connection so a slow handshake never blocks accepts.
async fn accept_loop(
    listener: Listener,
    registry: Arc<SessionRegistry>,
    handler: SessionHandler,
    handshake_timeout: Duration,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => {
                tracing::info!("Listener closing");
                break;
            }
            accepted = listener.accept() => match accepted {
                Ok((stream, peer, permit)) => {
                    tokio::spawn(initializer::initialize(
                        stream,
                        peer,
                        permit,
                        Arc::clone(&registry),
                        Arc::clone(&handler),
                        handshake_timeout,
                    ));
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Accept failed");
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            }
        }
    }
    // The listener drops here, releasing the socket.
}
