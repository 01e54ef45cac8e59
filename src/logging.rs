//! Diagnostics go to stderr; stdout carries nothing but protocol responses.
//!
//! `RUST_LOG` overrides the default filter, e.g. `RUST_LOG=edudeskd=debug`.

use std::io;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub const DEFAULT_FILTER: &str = "edudeskd=info,warn";

fn build_env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Install the global subscriber. A second call is a no-op.
pub fn init_logging() {
    let layer = fmt::layer()
        .compact()
        .with_writer(io::stderr)
        .with_ansi(false)
        .with_target(false);
    let _ = tracing_subscriber::registry()
        .with(build_env_filter())
        .with(layer)
        .try_init();
}
