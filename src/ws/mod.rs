//! WebSocket transport subsystem.
//!
//! # Data Flow
//! ```text
//! Accepted TCP stream
//!     → initializer.rs (upgrade handshake, timeout-bounded)
//!     → register SessionHandle, spawn reader/writer pumps
//!     → invoke caller handler with the Session
//!
//! Frames ←→ bytes translation happens only at the pump edge; the rest of
//! the crate deals in `Bytes`.
//! ```
//!
//! # Design Decisions
//! - Handshake failures never escalate past this layer: log, count, drop
//! - Registration is visible before the handler runs
//! - One teardown supervisor per session owns deregistration and the
//!   closed signal, so both fire exactly once

pub mod initializer;

use std::sync::Arc;

use crate::net::Session;

/// Caller-supplied per-session handler.
///
/// Invoked at most once per successfully upgraded connection, after the
/// session is registered for shutdown tracking.
pub type SessionHandler = Arc<dyn Fn(Session) + Send + Sync>;
