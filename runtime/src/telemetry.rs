//! Tracing subscriber setup.

use fractal_core::settings::Settings;
use thiserror::Error;
use tracing_subscriber::util::TryInitError;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Errors from installing the global subscriber.
#[derive(Error, Debug)]
pub enum TelemetryError {
    /// A global subscriber is already installed
    #[error("Failed to install tracing subscriber: {0}")]
    Init(#[from] TryInitError),
}

/// Filter used when `RUST_LOG` is unset: `settings.log_level` for every
/// target.
#[must_use]
pub fn env_filter(settings: &Settings) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&settings.log_level))
}

/// Install a `fmt` subscriber filtered by `RUST_LOG`, falling back to
/// `settings.log_level`.
///
/// # Errors
///
/// Returns [`TelemetryError::Init`] if a global subscriber is already set.
pub fn init_tracing(settings: &Settings) -> Result<(), TelemetryError> {
    tracing_subscriber::registry()
        .with(env_filter(settings))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .try_init()?;
    tracing::info!(
        app = %settings.app_name,
        environment = %settings.environment,
        "Tracing initialized"
    );
    Ok(())
}
