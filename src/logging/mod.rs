//! Logging bootstrap on `tracing-subscriber`.
//!
//! One registry with an `EnvFilter`, a console layer in the configured
//! format and an optional daily-rolling file layer.

mod filters;
mod formatter;
pub mod handle;
mod sinks;

pub use handle::LoggingHandle;
use mallbus_error::LoggingError;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::LoggingSettings;

/// Installs the global subscriber.
///
/// `RUST_LOG`, when set, replaces the configured level and directives. Keep
/// the returned handle alive for as long as file output is wanted.
pub fn init_logging(settings: &LoggingSettings) -> Result<LoggingHandle, LoggingError> {
    let env_filter = filters::build_filter(settings)?;
    let mut layers = Vec::new();

    if settings.console_enabled {
        layers.push(sinks::console::layer(settings));
    }

    let file_guard = if settings.file_enabled {
        let (file_layer, guard) = sinks::file::layer(settings)?;
        layers.push(file_layer);
        Some(guard)
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(layers)
        .try_init()
        .map_err(|e| LoggingError::AlreadyInitialized {
            reason: e.to_string(),
        })?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        level = %settings.level,
        format = %settings.format,
        file_enabled = settings.file_enabled,
        log_dir = %settings.log_dir.display(),
        "logging initialized"
    );

    Ok(LoggingHandle::new(file_guard))
}
