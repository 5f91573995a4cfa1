//! Telemetry and Observability
//!
//! Installs the `tracing-subscriber` registry for a reconciliation process.
//! Engine and sdk events follow the configured level; dependencies such as
//! the HTTP stack stay at `warn` unless `RUST_LOG` says otherwise.
//!
//! Debug builds print pretty terminal output. Release builds emit JSON with
//! the current span, so every line carries the `reconcile` span's kind and
//! state.

use crate::config::CoreConfig;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Filter directive for a configured level
pub fn filter_directive(log_level: &str) -> String {
    format!("warn,trellis_engine={0},sdk={0}", log_level)
}

/// Install the global subscriber at the given level
///
/// Priority: `RUST_LOG` env var > `log_level` parameter.
///
/// Returns `false` if a subscriber was already installed; the existing one
/// is kept.
pub fn init_telemetry_with_level(log_level: &str) -> bool {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter_directive(log_level)));

    #[cfg(debug_assertions)]
    let installed = tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().pretty().with_target(false))
        .try_init()
        .is_ok();

    #[cfg(not(debug_assertions))]
    let installed = tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().json().with_current_span(true))
        .try_init()
        .is_ok();

    installed
}

/// Install the global subscriber from the `[core]` section
pub fn init_telemetry(core: &CoreConfig) -> bool {
    init_telemetry_with_level(&core.log_level)
}
