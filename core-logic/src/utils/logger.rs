use chrono::Local;
use nu_ansi_term::{Color, Style};
use std::fmt;
use std::path::PathBuf;
use tracing::{Event, Subscriber};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    fmt::{format::Writer, FmtContext, FormatEvent, FormatFields},
    prelude::*,
    registry::LookupSpan,
    Layer,
};

#[derive(Debug, Clone)]
pub struct LogConfig {
    pub dir: PathBuf,
    /// Also print INFO from every target on the console.
    pub verbose: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("logs"),
            verbose: false,
        }
    }
}

/// Installs the console and rolling-file layers. Keep the guard alive for the
/// whole run or buffered file lines are lost.
pub fn setup_logger(config: &LogConfig) -> Option<WorkerGuard> {
    std::fs::create_dir_all(&config.dir).ok();

    let file_appender = tracing_appender::rolling::hourly(&config.dir, "fantasy");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let (file_default, console_default) = if config.verbose {
        (tracing::Level::INFO, tracing::Level::INFO)
    } else {
        (tracing::Level::WARN, tracing::Level::ERROR)
    };

    let file_filter = tracing_subscriber::filter::Targets::new()
        .with_target("task_result", tracing::Level::INFO)
        .with_default(file_default);

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .event_format(FileFormatter)
        .with_filter(file_filter);

    let console_filter = tracing_subscriber::filter::Targets::new()
        .with_target("task_result", tracing::Level::INFO)
        .with_target("sqlx", tracing::Level::ERROR)
        .with_target("hyper", tracing::Level::ERROR)
        .with_target("reqwest", tracing::Level::ERROR)
        .with_default(console_default);

    let console_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stdout)
        .with_ansi(true)
        .event_format(TerminalFormatter)
        .with_filter(console_filter);

    // a second init (tests, embedded use) keeps the first subscriber
    if tracing_subscriber::registry()
        .with(file_layer)
        .with(console_layer)
        .try_init()
        .is_err()
    {
        return None;
    }

    Some(guard)
}

struct MessageVisitor {
    message: String,
}

impl tracing::field::Visit for MessageVisitor {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{:?}", value);
        }
    }
    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        }
    }
}

fn slot_prefix<S, N>(ctx: &FmtContext<'_, S, N>) -> Option<String>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    let scope = ctx.event_scope()?;
    for span in scope.from_root() {
        if span.name() == "worker" {
            let ext = span.extensions();
            let fields = ext
                .get::<tracing_subscriber::fmt::FormattedFields<N>>()
                .map(|f| f.to_string())?;
            // fields render as `slot="001"`
            let slot = fields
                .split('=')
                .nth(1)
                .map(|s| s.trim_matches('"').to_string())?;
            return Some(slot);
        }
    }
    None
}

fn colorize(msg: String) -> String {
    const KEYWORDS: [(&str, Color); 4] = [
        ("SUCCESS", Color::LightGreen),
        ("FAILED", Color::LightRed),
        ("RATE LIMIT", Color::LightYellow),
        ("SKIPPED", Color::LightCyan),
    ];
    for (word, color) in KEYWORDS {
        if msg.contains(word) {
            let painted = Style::new().fg(color).bold().paint(word).to_string();
            return msg.replace(word, &painted);
        }
    }
    msg
}

pub struct TerminalFormatter;

impl<S, N> FormatEvent<S, N> for TerminalFormatter
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
        let mut msg_visitor = MessageVisitor {
            message: String::new(),
        };
        event.record(&mut msg_visitor);

        let time = Local::now().format("%H:%M:%S");
        write!(writer, "{} ", Style::new().dimmed().paint(time.to_string()))?;
        if let Some(slot) = slot_prefix(ctx) {
            write!(writer, "[{}] ", Color::Cyan.paint(slot))?;
        }
        writeln!(writer, "{}", colorize(msg_visitor.message))
    }
}

pub struct FileFormatter;

impl<S, N> FormatEvent<S, N> for FileFormatter
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
        let timestamp = Local::now().format("%Y-%m-%d %H:%M:%S");
        let level = event.metadata().level();

        write!(writer, "{} [{}] ", timestamp, level)?;
        if let Some(slot) = slot_prefix(ctx) {
            write!(writer, "[{}] ", slot)?;
        }

        let mut msg_visitor = MessageVisitor {
            message: String::new(),
        };
        event.record(&mut msg_visitor);
        writeln!(writer, "{}", msg_visitor.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_colorize_marks_outcome_keyword() {
        let out = colorize("#1 0xabc | daily SUCCESS".to_string());
        assert!(out.contains("\u{1b}["));
        assert!(out.starts_with("#1 0xabc | daily "));

        let plain = colorize("Starting 3 accounts".to_string());
        assert_eq!(plain, "Starting 3 accounts");
    }
}
