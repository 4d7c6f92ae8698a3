//! Development-time tracing for the live-state core.
//!
//! The library only emits `tracing` events; the binary installs the
//! subscriber here. Dropped telemetry (malformed, duplicate, stale, foreign)
//! is logged where it is dropped, in `normalize`, `reconcile` and `channel`,
//! and surfaces on stderr through this subscriber.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize tracing subscriber for development logging.
///
/// Reads `RUST_LOG` env var. Defaults to `warn` if unset.
/// Output: stderr, compact format, so stdout stays machine-readable JSON.
///
/// # Example
/// ```bash
/// RUST_LOG=livestate=debug livestate replay --graph graph.json --trace run.jsonl
/// ```
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}
