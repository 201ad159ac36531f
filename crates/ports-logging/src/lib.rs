use colored::*;
use std::fs::{self, OpenOptions};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Mutex;
use tracing::Level;
use tracing_subscriber::fmt::format::{FormatEvent, FormatFields, Writer};
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::fmt::{FmtContext, Layer};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Where log lines end up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogTarget {
    Stderr,
    /// Append to a file. Used while the terminal UI owns stdout.
    File(PathBuf),
}

/// `YYYY-MM-DD HH:MM`, local time.
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M";

/// A custom event formatter that produces logs in the desired format.
struct CustomFormatter {
    use_color: bool,
}

impl<S, N> FormatEvent<S, N> for CustomFormatter
where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &tracing::Event<'_>,
    ) -> std::fmt::Result {
        let level = *event.metadata().level();
        let time = chrono::Local::now().format(TIMESTAMP_FORMAT);

        write!(writer, "{} {} ", time, level_tag(level, self.use_color))?;

        ctx.format_fields(writer.by_ref(), event)?;

        writeln!(writer)
    }
}

fn level_tag(level: Level, use_color: bool) -> ColoredString {
    if use_color {
        match level {
            Level::TRACE => "TRACE".magenta().bold(),
            Level::DEBUG => "DEBUG".blue().bold(),
            Level::INFO => " INFO".green().bold(),
            Level::WARN => " WARN".yellow().bold(),
            Level::ERROR => "ERROR".red().bold(),
        }
    } else {
        match level {
            Level::TRACE => "TRACE".normal(),
            Level::DEBUG => "DEBUG".normal(),
            Level::INFO => " INFO".normal(),
            Level::WARN => " WARN".normal(),
            Level::ERROR => "ERROR".normal(),
        }
    }
}

/// Unknown level names fall back to `info`.
pub fn parse_level(level_str: &str) -> Level {
    Level::from_str(level_str).unwrap_or(Level::INFO)
}

/// Initializes the global logger. `RUST_LOG` still overrides the level.
pub fn init_logging(
    level_str: &str,
    use_color: bool,
    target: LogTarget,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let level = parse_level(level_str);

    let env_filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();

    let (writer, use_color) = match target {
        LogTarget::Stderr => (BoxMakeWriter::new(std::io::stderr), use_color),
        LogTarget::File(path) => {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            let file = OpenOptions::new().create(true).append(true).open(&path)?;
            (BoxMakeWriter::new(Mutex::new(file)), false)
        }
    };

    let formatter = CustomFormatter { use_color };

    let layer = Layer::default().with_writer(writer).event_format(formatter);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(layer)
        .try_init()?;

    Ok(())
}
