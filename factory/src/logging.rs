//! Diagnostics for the `factory` binary.
//!
//! Lifecycle events are the product output: the CLI renders them to stdout.
//! Tracing goes to stderr so the two streams never interleave, and neither
//! changes what is written under `.factory/` (feature list, execution logs).

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Filter used when `RUST_LOG` is unset or invalid.
pub const DEFAULT_FILTER: &str = "warn";

/// Install the stderr subscriber. Calling it again is a no-op.
///
/// ```bash
/// RUST_LOG=factory::engine=info,factory::machine=debug factory loop
/// ```
pub fn init() {
    let _ = tracing_subscriber::registry()
        .with(env_filter())
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .try_init();
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}
