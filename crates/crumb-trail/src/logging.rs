//! Logging setup for the replay binary

use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

/// Install a `fmt` subscriber filtered by `RUST_LOG`.
///
/// If RUST_LOG is not set, a default is picked: `debug` for the trail crates
/// in debug builds, `info` otherwise.
pub fn setup_logging() {
    if std::env::var("RUST_LOG").is_err() {
        // Safety: single-threaded at startup
        unsafe {
            if cfg!(debug_assertions) {
                std::env::set_var("RUST_LOG", "info,crumb_trail=debug,crumb_trail_lib=debug");
            } else {
                std::env::set_var("RUST_LOG", "info");
            }
        }
    }

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_thread_names(true)
        .with_filter(EnvFilter::from_default_env());
    if tracing_subscriber::registry().with(fmt_layer).try_init().is_err() {
        tracing::warn!("A global subscriber was already installed; keeping it");
    }

    tracing::debug!(
        rust_log = std::env::var("RUST_LOG").unwrap_or_default(),
        "logging initialized"
    );
}
