//! Metrics collection and exposition.
//!
//! # Metrics
//! - `termws_sessions_opened_total` (counter): successful upgrades
//! - `termws_sessions_closed_total` (counter): completed teardowns
//! - `termws_handshake_failures_total` (counter): failed/timed-out upgrades
//! - `termws_active_sessions` (gauge): currently registered sessions
//!
//! # Design Decisions
//! - Recording goes through the `metrics` facade; without an installed
//!   exporter every call is a cheap no-op
//! - The Prometheus exporter is optional and toggled by config

use std::net::SocketAddr;

use metrics_exporter_prometheus::PrometheusBuilder;

pub const SESSIONS_OPENED: &str = "termws_sessions_opened_total";
pub const SESSIONS_CLOSED: &str = "termws_sessions_closed_total";
pub const HANDSHAKE_FAILURES: &str = "termws_handshake_failures_total";
pub const ACTIVE_SESSIONS: &str = "termws_active_sessions";

/// Install the Prometheus exporter on the given address.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => {
            describe();
            tracing::info!(address = %addr, "Metrics exporter listening");
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to install metrics exporter");
        }
    }
}

fn describe() {
    metrics::describe_counter!(SESSIONS_OPENED, "Sessions successfully upgraded");
    metrics::describe_counter!(SESSIONS_CLOSED, "Sessions fully torn down");
    metrics::describe_counter!(HANDSHAKE_FAILURES, "Upgrade handshakes that failed or timed out");
    metrics::describe_gauge!(ACTIVE_SESSIONS, "Currently registered sessions");
}

/// Record a successful upgrade.
pub fn session_opened() {
    metrics::counter!(SESSIONS_OPENED).increment(1);
    metrics::gauge!(ACTIVE_SESSIONS).increment(1.0);
}

/// Record a completed teardown.
pub fn session_closed() {
    metrics::counter!(SESSIONS_CLOSED).increment(1);
    metrics::gauge!(ACTIVE_SESSIONS).decrement(1.0);
}

/// Record a failed or timed-out handshake.
pub fn handshake_failed() {
    metrics::counter!(HANDSHAKE_FAILURES).increment(1);
}
