//! Log and panic output for applications built on rivulet.
//!
//! The runtime itself only emits `tracing` events under the `rivulet::*` targets. This module
//! installs a subscriber that prints them to stderr, and a panic hook that routes panics
//! through the same output.

use std::{
    backtrace::Backtrace,
    io::{self, Write},
    panic::{self, PanicHookInfo},
    sync::Once,
    thread,
};

use rivulet_core::Config;
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, FormatEvent, FormatFields, format::Writer, writer::MakeWriter},
    prelude::*,
    registry::LookupSpan,
};

const LOG_PREFIX: &str = "[rivulet] ";
const DEFAULT_DIRECTIVE: &str = "info";
const MAX_PANIC_LINES: usize = 8;

// ============================================================================
// Global State
// ============================================================================

static PANIC_HOOK_INSTALLED: Once = Once::new();
static TRACING_INSTALLED: Once = Once::new();

// ============================================================================
// Installation
// ============================================================================

/// Installs the stderr subscriber (idempotent).
///
/// The filter comes from `RUST_LOG` when set, then from [`Config::log_filter`], then defaults
/// to `info`. Does nothing if another global subscriber is already installed.
pub fn init(config: &Config) {
    TRACING_INSTALLED.call_once(|| {
        let rust_log = std::env::var(EnvFilter::DEFAULT_ENV).ok();
        let directive = directive(rust_log.as_deref(), config);
        let filter = EnvFilter::try_new(directive).unwrap_or_else(|error| {
            eprintln!("{LOG_PREFIX}invalid log filter `{directive}`: {error}");
            EnvFilter::new(DEFAULT_DIRECTIVE)
        });

        let console = fmt::layer()
            .event_format(PanicAwareFormatter)
            .with_writer(PrefixedWriter)
            .with_ansi(false)
            .with_filter(filter);

        if tracing_subscriber::registry().with(console).try_init().is_err() {
            eprintln!("{LOG_PREFIX}a global tracing subscriber is already installed");
        }
    });
}

/// Installs a panic hook that logs panics under the `rivulet::panic` target before running
/// the previous hook (idempotent).
pub fn install_panic_logger() {
    PANIC_HOOK_INSTALLED.call_once(|| {
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            log_panic(info);
            previous(info);
        }));
    });
}

fn directive<'a>(rust_log: Option<&'a str>, config: &'a Config) -> &'a str {
    rust_log
        .or(config.log_filter.as_deref())
        .map(str::trim)
        .filter(|directive| !directive.is_empty())
        .unwrap_or(DEFAULT_DIRECTIVE)
}

// ============================================================================
// Panic Logging
// ============================================================================

fn log_panic(info: &PanicHookInfo<'_>) {
    let message = panic_message(info);
    let location = info
        .location()
        .map(|location| format!("{}:{}:{}", location.file(), location.line(), location.column()))
        .unwrap_or_default();
    let thread_name = thread::current().name().unwrap_or("unnamed").to_owned();
    let backtrace = Backtrace::force_capture().to_string();

    tracing::error!(
        target: "rivulet::panic",
        message = %message,
        location = %location,
        thread = %thread_name,
        backtrace = %backtrace
    );
}

fn panic_message(info: &PanicHookInfo<'_>) -> String {
    if let Some(s) = info.payload().downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = info.payload().downcast_ref::<String>() {
        s.clone()
    } else {
        "Unknown panic".to_owned()
    }
}

// ============================================================================
// Console Output
// ============================================================================

#[derive(Clone, Default)]
struct PrefixedWriter;

impl<'a> MakeWriter<'a> for PrefixedWriter {
    type Writer = PrefixedWriterInner<io::Stderr>;

    fn make_writer(&'a self) -> Self::Writer {
        PrefixedWriterInner {
            inner: io::stderr(),
            wrote_prefix: false,
        }
    }
}

struct PrefixedWriterInner<W> {
    inner: W,
    wrote_prefix: bool,
}

impl<W: Write> Write for PrefixedWriterInner<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if !self.wrote_prefix {
            self.inner.write_all(LOG_PREFIX.as_bytes())?;
            self.wrote_prefix = true;
        }
        self.inner.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

#[derive(Clone, Default)]
struct PanicAwareFormatter;

impl<S, N> FormatEvent<S, N> for PanicAwareFormatter
where
    S: tracing::Subscriber + for<'span> LookupSpan<'span>,
    N: for<'writer> FormatFields<'writer> + 'static,
{
    fn format_event(
        &self,
        ctx: &fmt::FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &tracing::Event<'_>,
    ) -> std::fmt::Result {
        let target = event.metadata().target();

        if target == "rivulet::panic" {
            let mut visitor = PanicFieldVisitor::default();
            event.record(&mut visitor);

            let message = visitor.message.as_deref().unwrap_or("panic");
            write!(writer, "PANIC: {message}")?;
            if let Some(location) = visitor.location.as_deref()
                && !location.is_empty()
            {
                write!(writer, " at {location}")?;
            }
            if let Some(backtrace) = visitor.backtrace.as_deref() {
                writeln!(writer)?;
                write!(writer, "Stack:")?;
                for line in backtrace.lines().take(MAX_PANIC_LINES) {
                    write!(writer, "\n  {line}")?;
                }
                if backtrace.lines().count() > MAX_PANIC_LINES {
                    write!(writer, "\n  ... (truncated)")?;
                }
            }
            writeln!(writer)
        } else {
            let level = event.metadata().level();
            write!(writer, "{level} {target}: ")?;
            ctx.field_format().format_fields(writer.by_ref(), event)?;
            writeln!(writer)
        }
    }
}

#[derive(Default)]
struct PanicFieldVisitor {
    message: Option<String>,
    location: Option<String>,
    backtrace: Option<String>,
}

impl PanicFieldVisitor {
    fn record(&mut self, field: &tracing::field::Field, value: String) {
        match field.name() {
            "message" => self.message = Some(value),
            "location" => self.location = Some(value),
            "backtrace" => self.backtrace = Some(value),
            _ => {}
        }
    }
}

impl tracing::field::Visit for PanicFieldVisitor {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        self.record(field, format!("{value:?}"));
    }

    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        self.record(field, value.to_owned());
    }
}
