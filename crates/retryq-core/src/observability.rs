//! Tracing/logging initialization.
//!
//! Library code only emits `tracing` events; the binary decides where they go.

use tracing_subscriber::EnvFilter;

/// Initialize tracing for the process.
///
/// The filter comes from `RUST_LOG`, falling back to `default_directive`
/// (e.g. `"info"`). Safe to call multiple times; later calls are no-ops.
pub fn init(default_directive: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}
