//! WebSocket Terminal Server Library
//!
//! A lifecycle wrapper around an upgradeable terminal transport: binds a
//! TCP listener, upgrades each accepted connection to a websocket session,
//! hands sessions to a caller-supplied handler, and tracks every live
//! session for coordinated graceful shutdown.
//!
//! # Architecture Overview
//!
//! ```text
//!                  ┌──────────────────────────────────────────────┐
//!                  │                 TERMINAL SERVER               │
//!                  │                                               │
//!   TCP connect    │  ┌─────────┐   ┌───────────┐   ┌──────────┐  │
//!   ───────────────┼─▶│   net   │──▶│    ws     │──▶│ caller's │  │
//!                  │  │listener │   │initializer│   │ handler  │  │
//!                  │  └─────────┘   └─────┬─────┘   └──────────┘  │
//!                  │                      │ register              │
//!                  │                      ▼                       │
//!                  │               ┌──────────────┐               │
//!                  │               │   session    │               │
//!                  │               │   registry   │◀── close_all ─┼── stop
//!                  │               └──────────────┘               │
//!                  │                                               │
//!                  │  ┌────────────────────────────────────────┐  │
//!                  │  │         Cross-Cutting Concerns          │  │
//!                  │  │  config · observability · lifecycle     │  │
//!                  │  └────────────────────────────────────────┘  │
//!                  └──────────────────────────────────────────────┘
//! ```

// Core subsystems
pub mod config;
pub mod net;
pub mod ws;

// Cross-cutting concerns
pub mod lifecycle;
pub mod observability;

pub use config::ServerConfig;
pub use lifecycle::{LifecycleState, Server, StartError, StopError};
pub use net::{DrainError, Session, SessionError, SessionHandle, SessionId, SessionRegistry};
pub use ws::SessionHandler;
