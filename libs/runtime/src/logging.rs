use crate::config::{LoggingConfig, Section};
use parking_lot::Mutex;
use std::{
    collections::HashMap,
    io::{IsTerminal, Write},
    path::{Path, PathBuf},
    sync::Arc,
};
use tracing::{level_filters::LevelFilter, Level};
use tracing_subscriber::{filter::Targets, fmt};

use file_rotate::{
    compression::Compression,
    suffix::{AppendTimestamp, FileLimit},
    ContentLimit, FileRotate,
};

const DEFAULT_SECTION: &str = "default";

// -------- level helpers --------
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

fn level_filter(s: &str) -> LevelFilter {
    parse_tracing_level(s)
        .map(LevelFilter::from_level)
        .unwrap_or(LevelFilter::OFF)
}

/// Returns true if target == prefix or target starts with "prefix::"
fn matches_target_prefix(target: &str, prefix: &str) -> bool {
    target == prefix
        || (target.starts_with(prefix) && target[prefix.len()..].starts_with("::"))
}

// -------- rotating writer for files --------
type SharedRotation = Arc<Mutex<FileRotate<AppendTimestamp>>>;

#[derive(Clone)]
struct RotatingFile(SharedRotation);

impl Write for RotatingFile {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.0.lock().flush()
    }
}

/// Writer that silently drops output when no file is routed for a target.
struct MaybeFile(Option<RotatingFile>);

impl Write for MaybeFile {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match &mut self.0 {
            Some(w) => w.write(buf),
            None => Ok(buf.len()),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match &mut self.0 {
            Some(w) => w.flush(),
            None => Ok(()),
        }
    }
}

/// Route records to per-subsystem files by target prefix, falling back to the default file.
#[derive(Clone, Default)]
struct FileRouter {
    default: Option<RotatingFile>,
    by_prefix: HashMap<String, RotatingFile>,
}

impl FileRouter {
    fn resolve_for(&self, target: &str) -> Option<RotatingFile> {
        self.by_prefix
            .iter()
            .filter(|(prefix, _)| matches_target_prefix(target, prefix))
            // longest prefix wins so "farm_sync::infra" beats "farm_sync"
            .max_by_key(|(prefix, _)| prefix.len())
            .map(|(_, w)| w.clone())
            .or_else(|| self.default.clone())
    }

    fn is_empty(&self) -> bool {
        self.default.is_none() && self.by_prefix.is_empty()
    }
}

impl<'a> fmt::MakeWriter<'a> for FileRouter {
    type Writer = MaybeFile;

    fn make_writer(&'a self) -> Self::Writer {
        MaybeFile(self.default.clone())
    }

    fn make_writer_for(&'a self, meta: &tracing::Metadata<'_>) -> Self::Writer {
        MaybeFile(self.resolve_for(meta.target()))
    }
}

// -------- path resolution helpers --------

/// Resolve a log file path against `base_dir` (home_dir).
fn resolve_log_path(file: &str, base_dir: &Path) -> PathBuf {
    let p = Path::new(file);
    if p.is_absolute() {
        p.to_path_buf()
    } else {
        base_dir.join(p)
    }
}

/// Create a rotating writer, ensuring the parent directory exists.
fn open_rotating_file(
    log_path: &Path,
    max_bytes: usize,
    max_backups: usize,
) -> std::io::Result<RotatingFile> {
    if let Some(parent) = log_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let rot = FileRotate::new(
        log_path,
        AppendTimestamp::default(FileLimit::MaxFiles(max_backups)),
        ContentLimit::BytesSurpassed(max_bytes),
        Compression::None,
        #[cfg(unix)]
        None,
    );

    Ok(RotatingFile(Arc::new(Mutex::new(rot))))
}

fn file_for_section(name: &str, section: &Section, base_dir: &Path) -> Option<RotatingFile> {
    if section.file.trim().is_empty() {
        return None;
    }

    let max_bytes = section.max_size_mb.unwrap_or(100) * 1024 * 1024;
    let log_path = resolve_log_path(&section.file, base_dir);

    match open_rotating_file(&log_path, max_bytes as usize, section.max_backups.unwrap_or(3)) {
        Ok(writer) => Some(writer),
        Err(e) => {
            eprintln!(
                "Failed to open log file for '{}': {} ({})",
                name,
                log_path.to_string_lossy(),
                e
            );
            None
        }
    }
}

// -------- filters --------

/// Console filter: the "default" section sets the fallback level, other sections
/// override it for their target prefix.
fn console_targets(cfg: &LoggingConfig) -> Targets {
    let default = cfg
        .get(DEFAULT_SECTION)
        .map(|s| level_filter(&s.console_level))
        .unwrap_or(LevelFilter::INFO);

    cfg.iter()
        .filter(|(name, _)| name.as_str() != DEFAULT_SECTION)
        .fold(Targets::new().with_default(default), |targets, (name, s)| {
            targets.with_target(name.clone(), level_filter(&s.console_level))
        })
}

/// File filter: only targets that actually have a file (own or default) are enabled.
fn file_targets(cfg: &LoggingConfig, router: &FileRouter) -> Targets {
    let default = match (cfg.get(DEFAULT_SECTION), &router.default) {
        (Some(s), Some(_)) => level_filter(&s.file_level),
        _ => LevelFilter::OFF,
    };

    cfg.iter()
        .filter(|(name, _)| name.as_str() != DEFAULT_SECTION)
        .fold(Targets::new().with_default(default), |targets, (name, s)| {
            if router.by_prefix.contains_key(name) {
                targets.with_target(name.clone(), level_filter(&s.file_level))
            } else {
                targets
            }
        })
}

fn build_file_router(cfg: &LoggingConfig, base_dir: &Path) -> FileRouter {
    let mut router = FileRouter::default();
    for (name, section) in cfg {
        let Some(writer) = file_for_section(name, section, base_dir) else {
            continue;
        };
        if name == DEFAULT_SECTION {
            router.default = Some(writer);
        } else {
            router.by_prefix.insert(name.clone(), writer);
        }
    }
    router
}

// -------- public init --------

/// Initialize logging from a configuration.
/// - `cfg`: LoggingConfig containing the logging sections
/// - `base_dir`: base directory used to resolve relative log file paths (usually app.home_dir)
pub fn init_logging_from_config(cfg: &LoggingConfig, base_dir: &Path) {
    use tracing_subscriber::{layer::SubscriberExt, prelude::*, Registry};

    // Bridge `log` → `tracing` *before* installing the subscriber
    let _ = tracing_log::LogTracer::init();

    if cfg.is_empty() {
        init_default_logging();
        return;
    }

    // stdout carries command output, logs go to stderr
    let ansi = std::io::stderr().is_terminal();
    let console_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(ansi)
        .with_target(true)
        .with_level(true)
        .with_timer(fmt::time::UtcTime::rfc_3339())
        .with_filter(console_targets(cfg));

    let router = build_file_router(cfg, base_dir);
    let file_layer = if router.is_empty() {
        None
    } else {
        let targets = file_targets(cfg, &router);
        Some(
            fmt::layer()
                .json()
                .with_ansi(false)
                .with_target(true)
                .with_level(true)
                .with_timer(fmt::time::UtcTime::rfc_3339())
                .with_writer(router)
                .with_filter(targets),
        )
    };

    let _ = Registry::default()
        .with(console_layer)
        .with(file_layer)
        .try_init();
}

fn init_default_logging() {
    let _ = fmt()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_timer(fmt::time::UtcTime::rfc_3339())
        .try_init();
}

// =================== tests ===================
