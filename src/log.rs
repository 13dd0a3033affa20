//! Structured logging and operator audit trail for hush.
//!
//! Log levels:
//! - ERROR: Store failures and other conditions that disable buffering
//! - WARN: Kill switch use, purges, dropped events
//! - INFO: Mode transitions, overrides, syntheses
//! - DEBUG: Per-message routing decisions
//! - TRACE: Latency samples
//!
//! Operator actions (halt, resume, overrides, purges, syntheses) are also
//! written as `[AUDIT] action=<name> key=value ...` lines, whatever the level.
//! The file is appended across runs, so those lines form the audit trail.
//! Debug mode can be enabled with `--debug` flag or `HUSH_DEBUG=1` env var.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::OnceLock;

static LOG_PATH: OnceLock<PathBuf> = OnceLock::new();
static LOG_LEVEL: AtomicU8 = AtomicU8::new(LogLevel::Info as u8);

/// Log levels for filtering messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum LogLevel {
    Error = 0,
    Warn = 1,
    Info = 2,
    Debug = 3,
    Trace = 4,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Error => "ERROR",
            LogLevel::Warn => "WARN",
            LogLevel::Info => "INFO",
            LogLevel::Debug => "DEBUG",
            LogLevel::Trace => "TRACE",
        }
    }

    fn from_u8(v: u8) -> Self {
        match v {
            0 => LogLevel::Error,
            1 => LogLevel::Warn,
            2 => LogLevel::Info,
            3 => LogLevel::Debug,
            _ => LogLevel::Trace,
        }
    }
}

/// Initialize logging to ~/.hush/hush.log.
pub fn init_with_debug(debug: bool) {
    let env_debug = std::env::var("HUSH_DEBUG")
        .map(|v| v == "1" || v.to_lowercase() == "true")
        .unwrap_or(false);

    let level = if debug || env_debug {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };
    LOG_LEVEL.store(level as u8, Ordering::SeqCst);

    if let Some(hush_dir) = dirs::home_dir().map(|h| h.join(".hush")) {
        let _ = std::fs::create_dir_all(&hush_dir);
        LOG_PATH.set(hush_dir.join("hush.log")).ok();
    }
}

/// Get the current log level.
pub fn get_level() -> LogLevel {
    LogLevel::from_u8(LOG_LEVEL.load(Ordering::Relaxed))
}

/// Log a message at the specified level.
///
/// Does nothing until [`init_with_debug`] has resolved a log path.
pub fn log_at(level: LogLevel, msg: &str) {
    if level > get_level() {
        return;
    }
    write_line(level.as_str(), msg);
}

/// Record an operator action in the audit trail.
///
/// Not subject to the level filter.
pub fn audit(action: &str, detail: &str) {
    write_line("AUDIT", &audit_message(action, detail));
}

fn audit_message(action: &str, detail: &str) -> String {
    let detail = detail.trim();
    if detail.is_empty() {
        format!("action={}", action)
    } else {
        format!("action={} {}", action, detail)
    }
}

fn write_line(label: &str, msg: &str) {
    if let Some(path) = LOG_PATH.get() {
        if let Ok(mut file) = OpenOptions::new().create(true).append(true).open(path) {
            let timestamp = chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f");
            let _ = writeln!(file, "[{}] [{}] {}", timestamp, label, msg);
        }
    }
}

/// Log a message at INFO level.
pub fn log(msg: &str) {
    log_at(LogLevel::Info, msg);
}

/// Log a message at ERROR level.
pub fn error(msg: &str) {
    log_at(LogLevel::Error, msg);
}

/// Log a message at WARN level.
pub fn warn(msg: &str) {
    log_at(LogLevel::Warn, msg);
}

/// Log a message at DEBUG level (only in debug mode).
pub fn debug(msg: &str) {
    log_at(LogLevel::Debug, msg);
}

/// Log a message at TRACE level.
pub fn trace(msg: &str) {
    log_at(LogLevel::Trace, msg);
}

/// Log macro for INFO level.
#[macro_export]
macro_rules! hlog {
    ($($arg:tt)*) => {
        $crate::log::log(&format!($($arg)*))
    };
}

/// Log macro for ERROR level.
#[macro_export]
macro_rules! hlog_error {
    ($($arg:tt)*) => {
        $crate::log::error(&format!($($arg)*))
    };
}

/// Log macro for WARN level.
#[macro_export]
macro_rules! hlog_warn {
    ($($arg:tt)*) => {
        $crate::log::warn(&format!($($arg)*))
    };
}

/// Log macro for DEBUG level (only logs when debug mode is enabled).
#[macro_export]
macro_rules! hlog_debug {
    ($($arg:tt)*) => {
        $crate::log::debug(&format!($($arg)*))
    };
}

/// Audit macro: `hlog_audit!("halt")` or `hlog_audit!("purge", "agent={} count={}", a, n)`.
#[macro_export]
macro_rules! hlog_audit {
    ($action:expr) => {
        $crate::log::audit($action, "")
    };
    ($action:expr, $($arg:tt)*) => {
        $crate::log::audit($action, &format!($($arg)*))
    };
}

/// Log macro for TRACE level.
#[macro_export]
macro_rules! hlog_trace {
    ($($arg:tt)*) => {
        $crate::log::trace(&format!($($arg)*))
    };
}
