//! Log subscriber installation for applications embedding the pipeline.
//!
//! The library only emits `tracing` events; nothing is printed unless the
//! host installs a subscriber, either its own or the one below.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install a fmt subscriber filtered by `RUST_LOG`, falling back to `level`
/// (for example `"info"` or `"quarry_core=debug"`).
///
/// Returns false if a global subscriber was already installed, which makes
/// repeated calls from tests harmless.
///
/// ```no_run
/// quarry_core::telemetry::init_tracing("info");
/// ```
pub fn init_tracing(level: &str) -> bool {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_target(true))
        .try_init()
        .is_ok()
}
