//! Tracing initialization for embedding applications.

use tracing_subscriber::EnvFilter;

const ENV_FILTER_VAR: &str = "CHATLINK_LOG";

/// Install a global subscriber honoring `CHATLINK_LOG` (default `info`).
///
/// Safe to call more than once; later calls are no-ops when a global
/// subscriber is already installed (e.g. by the host app).
pub fn init() {
    let filter =
        EnvFilter::try_from_env(ENV_FILTER_VAR).unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}
