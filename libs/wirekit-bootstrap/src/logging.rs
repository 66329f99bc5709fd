use crate::config::{LoggingConfig, Section};
use std::io::IsTerminal;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::level_filters::LevelFilter;
use tracing::Level;
use tracing_subscriber::filter::Targets;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer, Registry};

// Keep a guard for non-blocking console output alive for the process.
static CONSOLE_GUARD: std::sync::OnceLock<tracing_appender::non_blocking::WorkerGuard> =
    std::sync::OnceLock::new();

fn parse_tracing_level(s: &str) -> Option<Level> {
    match s.to_ascii_lowercase().as_str() {
        "trace" => Some(Level::TRACE),
        "debug" => Some(Level::DEBUG),
        "info" => Some(Level::INFO),
        "warn" => Some(Level::WARN),
        "error" => Some(Level::ERROR),
        "off" | "none" => None,
        _ => Some(Level::INFO),
    }
}

// ================= rotating writer for the file sink =================

use file_rotate::{
    compression::Compression,
    suffix::{AppendTimestamp, FileLimit},
    ContentLimit, FileRotate,
};

#[derive(Clone)]
struct RotWriter(Arc<Mutex<FileRotate<AppendTimestamp>>>);

#[derive(Clone)]
struct RotWriterHandle(Arc<Mutex<FileRotate<AppendTimestamp>>>);

impl<'a> fmt::MakeWriter<'a> for RotWriter {
    type Writer = RotWriterHandle;
    fn make_writer(&'a self) -> Self::Writer {
        RotWriterHandle(self.0.clone())
    }
}

impl Write for RotWriterHandle {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().write(buf)
    }
    fn flush(&mut self) -> std::io::Result<()> {
        self.0.lock().unwrap().flush()
    }
}

fn resolve_log_path(file: &str, base_dir: &Path) -> PathBuf {
    let p = Path::new(file);
    if p.is_absolute() {
        p.to_path_buf()
    } else {
        base_dir.join(p)
    }
}

fn create_rotating_writer(section: &Section, base_dir: &Path) -> Option<RotWriter> {
    if section.file.trim().is_empty() {
        return None;
    }

    let log_path = resolve_log_path(&section.file, base_dir);
    if let Some(parent) = log_path.parent() {
        if let Err(e) = std::fs::create_dir_all(parent) {
            eprintln!("Failed to create log directory '{}': {e}", parent.display());
            return None;
        }
    }

    let max_bytes = section.max_size_mb.unwrap_or(100) as usize * 1024 * 1024;
    // Retention: prefer a file-count limit if provided, else prune by age.
    let limit = if let Some(n) = section.max_backups {
        FileLimit::MaxFiles(n)
    } else {
        FileLimit::Age(chrono::Duration::days(
            section.max_age_days.unwrap_or(1) as i64
        ))
    };

    let rot = FileRotate::new(
        &log_path,
        AppendTimestamp::default(limit),
        ContentLimit::BytesSurpassed(max_bytes),
        Compression::None,
        None,
    );

    Some(RotWriter(Arc::new(Mutex::new(rot))))
}

// ================= target filters =================

/// Which per-section level field a sink reads.
enum SinkKind {
    Console,
    File,
}

fn build_targets(cfg: &LoggingConfig, kind: SinkKind) -> Targets {
    let level_of = |section: &Section| match kind {
        SinkKind::Console => parse_tracing_level(&section.console_level),
        SinkKind::File => parse_tracing_level(&section.file_level),
    };

    let default_level = cfg
        .get("default")
        .and_then(|section| level_of(section))
        .map(LevelFilter::from_level)
        .unwrap_or(LevelFilter::INFO);

    let mut targets = Targets::new().with_default(default_level);
    for (subsystem, section) in cfg.iter().filter(|(k, _)| k.as_str() != "default") {
        if let Some(level) = level_of(section).map(LevelFilter::from_level) {
            targets = targets.with_target(subsystem.clone(), level);
        }
    }
    targets
}

// ================= public init =================

/// Install the global subscriber: a human-readable console layer plus an
/// optional rotating JSON file sink taken from the "default" section.
/// `RUST_LOG`, when set, caps both sinks.
pub fn init_logging(cfg: &LoggingConfig, base_dir: &Path) {
    // Bridge `log` → `tracing` before installing the subscriber.
    if let Err(e) = tracing_log::LogTracer::init() {
        eprintln!("LogTracer init skipped: {e}");
    }

    if cfg.is_empty() {
        init_minimal();
        return;
    }

    let env: Option<EnvFilter> = EnvFilter::try_from_default_env().ok();

    let (nb_stderr, guard) = tracing_appender::non_blocking(std::io::stderr());
    let _ = CONSOLE_GUARD.set(guard);

    let console_layer = fmt::layer()
        .with_writer(nb_stderr)
        .with_ansi(std::io::stderr().is_terminal())
        .with_target(true)
        .with_level(true)
        .with_filter(build_targets(cfg, SinkKind::Console));

    let file_layer = cfg
        .get("default")
        .and_then(|section| create_rotating_writer(section, base_dir))
        .map(|writer| {
            fmt::layer()
                .json()
                .with_ansi(false)
                .with_target(true)
                .with_level(true)
                .with_writer(writer)
                .with_filter(build_targets(cfg, SinkKind::File))
        });

    let _ = Registry::default()
        .with(env)
        .with(console_layer)
        .with(file_layer)
        .try_init();
}

fn init_minimal() {
    let env = EnvFilter::try_from_default_env().ok();
    let fmt_layer = fmt::layer().with_target(true);
    let _ = Registry::default().with(env).with(fmt_layer).try_init();
}
