use std::io::{self, Stdout};

use tracing_subscriber::registry::LookupSpan;

use crate::{
    config::LoggingSettings,
    logging::formatter::{self, BoxedLayer},
};

/// Console layer on stdout in the configured format.
pub fn layer<S>(settings: &LoggingSettings) -> BoxedLayer<S>
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
{
    let writer: fn() -> Stdout = io::stdout;
    formatter::build_formatter(settings, settings.format, writer, settings.with_ansi)
}
