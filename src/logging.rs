//! Tracing subscriber setup.
//!
//! Log levels:
//! - ERROR: transport failures, exhausted joins, failed uplinks
//! - WARN: timeouts, device error codes, unrecognized lines
//! - INFO: provisioning steps, join status, uplinks and downlinks
//! - DEBUG: every command/response pair, state transitions
//! - TRACE: raw serial bytes

use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::time::ChronoLocal;

const TIME_FORMAT: &str = "%H:%M:%S%.3f";

/// Human-readable output. `RUST_LOG` overrides the default `info` level.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(ChronoLocal::new(TIME_FORMAT.to_string()))
        .init();
}

/// JSON lines, selected with `RUST_LOG_FORMAT=json`.
pub fn init_json() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .json()
        .with_env_filter(filter)
        .with_timer(ChronoLocal::rfc_3339())
        .init();
}
