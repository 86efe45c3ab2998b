use colored::Colorize;
use std::fmt;
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::fmt::format::{FormatEvent, FormatFields, Writer};
use tracing_subscriber::fmt::FmtContext;
use tracing_subscriber::registry::LookupSpan;

/// Event formatter for interactive CLI use: a short colored level tag, the
/// event fields, and nothing else. Timestamps and targets belong to the
/// default formatter that `RUST_LOG` selects.
pub struct LevelTagFormatter;

impl<S, N> FormatEvent<S, N> for LevelTagFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        // Buffer the fields so the tag and line land in one write.
        let mut line = String::new();
        let mut buffered = Writer::new(&mut line);
        ctx.format_fields(buffered.by_ref(), event)?;

        let tag = match *event.metadata().level() {
            Level::ERROR => "error".red().bold(),
            Level::WARN => " warn".yellow(),
            Level::INFO => " info".green(),
            Level::DEBUG => "debug".blue(),
            Level::TRACE => "trace".purple(),
        };

        writeln!(writer, "{} {}", tag, line)
    }
}
