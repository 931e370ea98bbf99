//! Tracing subscriber setup for symdex.
//!
//! Installs a `fmt` layer for human-readable console output with an
//! env-filter that respects `RUST_LOG`. Exporter layers (OTLP and friends)
//! belong to the embedding daemon, not this library.

use anyhow::{Context, Result};
use tracing::Level;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize the tracing subscriber.
///
/// # Arguments
/// * `log_level` – minimum tracing level used when `RUST_LOG` is unset
///
/// # Errors
/// Returns an error if a global subscriber is already installed.
pub fn init_telemetry(log_level: Level) -> Result<()> {
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level.to_string()));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()
        .context("Failed to install tracing subscriber")?;

    Ok(())
}
