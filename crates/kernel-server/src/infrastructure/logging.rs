//! Structured logging setup.
//!
//! The host application normally installs its own `tracing` subscriber.
//! Hosts that do not can call [`init_tracing`] once at start-up.

use tracing_subscriber::EnvFilter;

/// Installs a global fmt subscriber filtered at `default_level`.
///
/// `RUST_LOG` overrides `default_level` when set.  Returns `false` if a
/// global subscriber was already installed.
pub fn init_tracing(default_level: &str) -> bool {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .try_init()
        .is_ok()
}
