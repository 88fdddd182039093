use std::fs;

use mallbus_error::LoggingError;
use tracing_appender::{non_blocking, non_blocking::WorkerGuard, rolling};
use tracing_subscriber::registry::LookupSpan;

use crate::{
    config::LoggingSettings,
    logging::formatter::{self, BoxedLayer},
};

/// Daily-rolling file layer under `log_dir`.
///
/// The returned guard flushes the background writer when dropped.
pub fn layer<S>(settings: &LoggingSettings) -> Result<(BoxedLayer<S>, WorkerGuard), LoggingError>
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
{
    fs::create_dir_all(&settings.log_dir).map_err(|e| LoggingError::LogDir {
        path: settings.log_dir.display().to_string(),
        reason: e.to_string(),
    })?;

    let appender = rolling::daily(&settings.log_dir, &settings.file_prefix);
    let (writer, guard) = non_blocking(appender);
    let layer = formatter::build_formatter(settings, settings.format, writer, false);
    Ok((layer, guard))
}
