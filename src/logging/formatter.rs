use tracing_subscriber::{
    fmt::{self, format::FmtSpan, MakeWriter},
    layer::Layer,
    registry::LookupSpan,
};

use crate::config::{LogFormat, LoggingSettings};

/// Boxed fmt layer so callers need not name the concrete format type.
pub type BoxedLayer<S> = Box<dyn Layer<S> + Send + Sync>;

/// Builds a fmt layer in `format` writing to `writer`.
pub(crate) fn build_formatter<S, W>(
    settings: &LoggingSettings,
    format: LogFormat,
    writer: W,
    with_ansi: bool,
) -> BoxedLayer<S>
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let base = fmt::layer().with_writer(writer).with_ansi(with_ansi);
    let event = fmt::format()
        .with_target(settings.with_target)
        .with_thread_ids(settings.with_thread_ids)
        .with_thread_names(settings.with_thread_ids);

    match format {
        LogFormat::Json => Box::new(
            base.event_format(event.json().with_current_span(true))
                .fmt_fields(fmt::format::JsonFields::new()),
        ),
        LogFormat::Pretty => Box::new(
            base.event_format(event.pretty())
                .with_span_events(FmtSpan::CLOSE),
        ),
        LogFormat::Compact => Box::new(base.event_format(event.compact())),
    }
}
