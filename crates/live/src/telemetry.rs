//! Tracing setup for host applications.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize tracing with an `EnvFilter` and a fmt layer.
///
/// Hosts embedding the live core call this once at startup. Defaults to
/// info level for this crate if `RUST_LOG` is not set. Safe to call more
/// than once; later calls are no-ops.
pub fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "stallside_live=info".into());

    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}
