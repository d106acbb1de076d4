//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (limits > 0, timeouts > 0)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ServerConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use crate::config::schema::ServerConfig;

/// A single semantic validation failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Listener host is empty.
    EmptyHost,
    /// Session limit must be at least 1.
    ZeroMaxSessions,
    /// A timeout was configured as zero seconds.
    ZeroTimeout(&'static str),
    /// Metrics endpoint enabled but its address does not parse.
    InvalidMetricsAddress(String),
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationError::EmptyHost => write!(f, "listener.host must not be empty"),
            ValidationError::ZeroMaxSessions => {
                write!(f, "listener.max_sessions must be at least 1")
            }
            ValidationError::ZeroTimeout(name) => {
                write!(f, "timeouts.{} must be at least 1 second", name)
            }
            ValidationError::InvalidMetricsAddress(addr) => {
                write!(f, "observability.metrics_address '{}' is not a socket address", addr)
            }
        }
    }
}

/// Validate a configuration, collecting every failure.
pub fn validate_config(config: &ServerConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.host.trim().is_empty() {
        errors.push(ValidationError::EmptyHost);
    }
    if config.listener.max_sessions == 0 {
        errors.push(ValidationError::ZeroMaxSessions);
    }
    if config.timeouts.handshake_secs == 0 {
        errors.push(ValidationError::ZeroTimeout("handshake_secs"));
    }
    if config.timeouts.drain_secs == 0 {
        errors.push(ValidationError::ZeroTimeout("drain_secs"));
    }
    if config.observability.metrics_enabled
        && config
            .observability
            .metrics_address
            .parse::<std::net::SocketAddr>()
            .is_err()
    {
        errors.push(ValidationError::InvalidMetricsAddress(
            config.observability.metrics_address.clone(),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
