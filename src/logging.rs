//! Log output
//!
//! `RUST_LOG` selects what is printed; without it everything at `info` and above is.

use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "info";

pub fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| DEFAULT_FILTER.into())
}

/// Install the global subscriber. Later calls are ignored.
pub fn init_logging() {
    let installed = tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_target(true)
        .try_init()
        .is_ok();

    if installed {
        tracing::info!("logging initialized (version {})", env!("CARGO_PKG_VERSION"));
    }
}
