//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (accept loop, session limits)
//!     → ws::initializer (upgrade handshake)
//!     → session.rs (identity, close-once lifecycle)
//!     → registry.rs (shutdown reachability)
//!
//! Session lifecycle:
//!     Accepted → Upgrading → Registered/Active → Closing → Deregistered
//! ```
//!
//! # Design Decisions
//! - Bounded accept queue prevents resource exhaustion
//! - Each session tracked for graceful shutdown
//! - Close is an idempotent latch; teardown fires exactly once

pub mod listener;
pub mod registry;
pub mod session;

pub use listener::{Listener, ListenerError, SessionPermit};
pub use registry::{DrainError, SessionRegistry};
pub use session::{Session, SessionError, SessionHandle, SessionId};
