//! Tracing subscriber setup: console formatter, file layer, and initialisation.
use std::fs;
use std::io::Write as _;
use std::path::Path;
use std::sync::Mutex;

use super::utils::{format_utc_datetime, format_utc_time, log_file_path, strip_ansi};

/// `tracing` target for stage headers.
pub const STAGE_TARGET: &str = "theme_engine::stage";
/// `tracing` target for dry-run actions.
pub const DRY_RUN_TARGET: &str = "theme_engine::dry_run";
/// `tracing` target for per-target results; events carry `app` and `status`.
pub const RESULT_TARGET: &str = "theme_engine::result";

/// Fields the formatters read from a [`tracing::Event`].
#[derive(Debug, Default)]
struct EventFields {
    message: String,
    app: Option<String>,
    status: Option<String>,
}

impl EventFields {
    fn from_event(event: &tracing::Event<'_>) -> Self {
        let mut fields = Self::default();
        event.record(&mut fields);
        fields
    }

    fn set(&mut self, name: &str, value: String) {
        match name {
            "message" => self.message = value,
            "app" => self.app = Some(value),
            "status" => self.status = Some(value),
            _ => {}
        }
    }

    /// `kitty [applied]: detail`, with the detail omitted when empty.
    fn result_line(&self, msg: &str) -> String {
        let app = self.app.as_deref().unwrap_or("?");
        let status = self.status.as_deref().unwrap_or("?");
        if msg.is_empty() {
            format!("{app} [{status}]")
        } else {
            format!("{app} [{status}]: {msg}")
        }
    }
}

impl tracing::field::Visit for EventFields {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        self.set(field.name(), format!("{value:?}"));
    }

    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        self.set(field.name(), value.to_string());
    }
}

/// Engine module an event came from (`cache`, `transaction`, ...), if it is
/// one worth naming. Events sent through the logger carry no scope.
fn scope(target: &str) -> Option<&str> {
    let module = target.strip_prefix("theme_engine::")?;
    let module = module.split("::").next().unwrap_or(module);
    (!matches!(module, "logging" | "stage" | "dry_run" | "result")).then_some(module)
}

/// One line of the persistent log file.
fn file_line(level: tracing::Level, target: &str, fields: &EventFields, ts: &str) -> String {
    let msg = strip_ansi(&fields.message);
    let scoped = scope(target).map_or_else(|| msg.clone(), |module| format!("({module}) {msg}"));
    match (level, target) {
        (tracing::Level::INFO, STAGE_TARGET) => format!("[{ts}] ==> {msg}"),
        (tracing::Level::INFO, DRY_RUN_TARGET) => format!("[{ts}]     [dry run] {msg}"),
        (_, RESULT_TARGET) => format!("[{ts}]     [result] {}", fields.result_line(&msg)),
        (tracing::Level::ERROR, _) => format!("[{ts}]     [error] {scoped}"),
        (tracing::Level::WARN, _) => format!("[{ts}]     [warn] {scoped}"),
        (tracing::Level::DEBUG | tracing::Level::TRACE, _) => {
            format!("[{ts}]     [debug] {scoped}")
        }
        _ => format!("[{ts}]     {scoped}"),
    }
}

/// A [`tracing_subscriber::Layer`] that appends every event to the
/// persistent log file with timestamps and ANSI codes stripped.
#[derive(Debug)]
pub(super) struct FileLayer {
    file: Mutex<fs::File>,
}

impl FileLayer {
    /// Open the log file for `command` under the cache directory.
    ///
    /// Returns `None` if the directory or file cannot be created.
    pub(super) fn new(command: &str) -> Option<Self> {
        Self::at(&log_file_path(command)?)
    }

    /// Truncate `path`, write a run header and append events to it.
    pub(super) fn at(path: &Path) -> Option<Self> {
        let version = option_env!("THEME_ENGINE_VERSION")
            .unwrap_or(concat!("dev-", env!("CARGO_PKG_VERSION")));
        let header = format!(
            "==========================================\n\
             theme-engine {version} {}\n\
             ==========================================\n",
            format_utc_datetime(),
        );
        fs::write(path, header).ok()?;
        let file = fs::OpenOptions::new().append(true).open(path).ok()?;
        Some(Self {
            file: Mutex::new(file),
        })
    }
}

impl<S: tracing::Subscriber> tracing_subscriber::Layer<S> for FileLayer {
    fn on_event(
        &self,
        event: &tracing::Event<'_>,
        _ctx: tracing_subscriber::layer::Context<'_, S>,
    ) {
        let metadata = event.metadata();
        let fields = EventFields::from_event(event);
        let line = file_line(*metadata.level(), metadata.target(), &fields, &format_utc_time());

        if let Ok(mut f) = self.file.lock() {
            writeln!(f, "{line}").ok();
        }
    }
}

/// Console formatter: coloured level tags, `==>` stage headers, module
/// scope on warnings and errors.
struct ConsoleFormatter;

impl<S, N> tracing_subscriber::fmt::FormatEvent<S, N> for ConsoleFormatter
where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
    N: for<'a> tracing_subscriber::fmt::FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        _ctx: &tracing_subscriber::fmt::FmtContext<'_, S, N>,
        mut writer: tracing_subscriber::fmt::format::Writer<'_>,
        event: &tracing::Event<'_>,
    ) -> std::fmt::Result {
        let metadata = event.metadata();
        let target = metadata.target();
        let fields = EventFields::from_event(event);
        let msg = &fields.message;
        let prefix = scope(target)
            .map_or_else(String::new, |module| format!("\x1b[2m{module}:\x1b[0m "));

        match *metadata.level() {
            tracing::Level::ERROR => writeln!(writer, "\x1b[31mERROR\x1b[0m {prefix}{msg}"),
            tracing::Level::WARN => writeln!(writer, "\x1b[33mWARN\x1b[0m  {prefix}{msg}"),
            _ if target == RESULT_TARGET => {
                writeln!(writer, "  \x1b[2m{}\x1b[0m", fields.result_line(msg))
            }
            tracing::Level::INFO if target == STAGE_TARGET => {
                writeln!(writer, "\x1b[1;34m==>\x1b[0m \x1b[1m{msg}\x1b[0m")
            }
            tracing::Level::INFO if target == DRY_RUN_TARGET => {
                writeln!(writer, "  \x1b[33m[DRY RUN]\x1b[0m {msg}")
            }
            tracing::Level::INFO => writeln!(writer, "  {msg}"),
            _ => writeln!(writer, "  \x1b[2m{prefix}{msg}\x1b[0m"),
        }
    }
}

/// Initialise the global [`tracing`] subscriber.
///
/// Console output goes to stdout (info) and stderr (warnings and errors);
/// every event down to `debug` is also appended to
/// `$XDG_CACHE_HOME/theme-engine/<command>.log`. Call once at startup.
pub fn init_subscriber(verbose: bool, command: &str) {
    use tracing_subscriber::fmt::writer::MakeWriterExt as _;
    use tracing_subscriber::{
        Layer as _, filter::LevelFilter, fmt, layer::SubscriberExt as _,
        util::SubscriberInitExt as _,
    };

    let console_level = if verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    };

    let make_writer = std::io::stderr
        .with_max_level(tracing::Level::WARN)
        .and(std::io::stdout.with_min_level(tracing::Level::INFO));

    let console_layer = fmt::layer()
        .event_format(ConsoleFormatter)
        .with_writer(make_writer)
        .with_filter(console_level);

    let file_layer = FileLayer::new(command).map(|l| l.with_filter(LevelFilter::DEBUG));

    tracing_subscriber::registry()
        .with(console_layer)
        .with(file_layer)
        .init();
}
