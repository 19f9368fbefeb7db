//! Logging setup for the `runwatch` binary.
//!
//! Output goes to stderr so stdout carries only progress lines. The filter is
//! taken from `RUST_LOG` and defaults to `info`.

use std::io;

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Installs the global subscriber.
///
/// `verbose` raises the default level to `debug` when `RUST_LOG` is unset.
///
/// # Errors
///
/// Returns an error if a global subscriber was already installed.
pub fn init_logging(verbose: bool) -> Result<(), tracing_subscriber::util::TryInitError> {
    let default_level = if verbose { "debug" } else { "info" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_writer(io::stderr)
        .with_target(false);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stderr_layer)
        .try_init()
}
