//! Diagnostic tracing for the `waypoints` binary.
//!
//! Tracing goes to stderr and is never persisted. The per-run execution log
//! (`io/execution_log`, under `.waypoints/logs/`) is the product artifact and
//! is written whatever the filter says.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_FILTER: &str = "warn";
const VERBOSE_FILTER: &str = "warn,waypoint_engine=debug";

/// Install the stderr subscriber.
///
/// `RUST_LOG` wins when set. Otherwise `verbose` turns on debug output for
/// this crate only:
///
/// ```bash
/// RUST_LOG=waypoint_engine::io::command_runner=debug waypoints run
/// waypoints --verbose run
/// ```
///
/// Calling it twice is harmless; the second subscriber is dropped.
pub fn init(verbose: bool) {
    let fallback = if verbose {
        VERBOSE_FILTER
    } else {
        DEFAULT_FILTER
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(verbose)
                .compact(),
        )
        .try_init();
}
