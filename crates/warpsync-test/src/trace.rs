//! Tracing setup for test runs

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Install a formatted subscriber filtered by `RUST_LOG`
/// (default `warpsync=debug`). Safe to call from every test.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warpsync=debug"));

    let _ = tracing_subscriber::registry()
        .with(fmt::layer().with_test_writer().with_target(true))
        .with(filter)
        .try_init();
}
