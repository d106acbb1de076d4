//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Start (server.rs):
//!     Validate state → Bind listener → Spawn accept loop → Running
//!
//! Stop (server.rs):
//!     Close listener → Drain sessions → Release resources → Idle
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger graceful shutdown
//! ```
//!
//! # Design Decisions
//! - Ordered shutdown: stop accept, drain, release; each step waits for
//!   the previous, and release runs even when the drain fails
//! - Shutdown has a deadline: the drain cannot stall stop forever
//! - Start while not idle is a usage error, never queued

pub mod server;
pub mod shutdown;
pub mod signals;

pub use server::{LifecycleState, Server, StartError, StopError};
pub use shutdown::Shutdown;
