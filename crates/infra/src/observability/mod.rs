//! Tracing bootstrap
//!
//! Structured tracing only; nothing in the workspace prints to stdout
//! directly.

use portbroker_domain::{BrokerError, Result};
use tracing_subscriber::{fmt, EnvFilter};

/// Initialise the global tracing subscriber.
///
/// The filter comes from `RUST_LOG`, defaulting to `info`. Safe to call
/// once per process; a second call reports the conflict instead of
/// panicking.
pub fn init_tracing() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .map_err(|err| BrokerError::Config(format!("tracing init failed: {err}")))
}
