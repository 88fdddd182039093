use mallbus_error::LoggingError;
use tracing_subscriber::EnvFilter;

use crate::config::LoggingSettings;

/// `RUST_LOG` wins; otherwise the directive built from the settings.
pub(crate) fn build_filter(settings: &LoggingSettings) -> Result<EnvFilter, LoggingError> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    let directive = settings.filter_directive();
    EnvFilter::try_new(&directive).map_err(|e| LoggingError::InvalidDirective {
        directive,
        reason: e.to_string(),
    })
}
