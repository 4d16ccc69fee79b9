use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Install a global tracing subscriber for compile and sync runs.
///
/// `RUST_LOG` takes precedence. Without it the level is `info`, or `debug`
/// when `verbose` is set. Fails if a subscriber is already installed.
pub fn init_logging(verbose: bool) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let fmt_layer = fmt::layer()
        .with_target(true)
        .with_level(true)
        .compact();

    let default_level = if verbose { "debug" } else { "info" };
    let filter_layer =
        EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(default_level))?;

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt_layer)
        .try_init()?;

    Ok(())
}
