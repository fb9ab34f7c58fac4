//! Leveled logging to the console with an optional file mirror.
//!
//! Console output goes to stderr so stdout stays clean for tool output.
//! The file mirror gets every record plus the raw interleaved output of
//! stage commands, timestamped and with ANSI styling stripped. Debug
//! records go to a separate fixed-path debug log, truncated per run.

use crate::config::RunConfig;
use crate::project::ProjectContext;
use anyhow::{Context, Result};
use regex::Regex;
use std::borrow::Cow;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::{Mutex, OnceLock};
use std::time::{Duration, SystemTime};

/// Debug log file name under the system temp directory.
pub const DEBUG_LOG_NAME: &str = "rtbuild-debug.log";

/// Raw ANSI color codes for console records.
pub mod colors {
    pub const RED: &str = "\x1b[31m";
    pub const GREEN: &str = "\x1b[32m";
    pub const YELLOW: &str = "\x1b[33m";
    pub const CYAN: &str = "\x1b[36m";
    pub const BOLD: &str = "\x1b[1m";
    pub const RESET: &str = "\x1b[0m";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Info,
    Warning,
    Error,
    Success,
    Debug,
}

impl Level {
    pub fn tag(self) -> &'static str {
        match self {
            Level::Info => "INFO",
            Level::Warning => "WARNING",
            Level::Error => "ERROR",
            Level::Success => "SUCCESS",
            Level::Debug => "DEBUG",
        }
    }

    fn color(self) -> &'static str {
        match self {
            Level::Info => colors::CYAN,
            Level::Warning => colors::YELLOW,
            Level::Error => colors::RED,
            Level::Success => colors::GREEN,
            Level::Debug => colors::BOLD,
        }
    }
}

/// Single-writer log sink. Shared by reference with the exec gateway's
/// output pumps, hence the mutexes around the file handles.
pub struct Logger {
    file: Option<Mutex<File>>,
    debug_file: Option<Mutex<File>>,
}

impl Logger {
    /// Console-only logger (logging and debug both off).
    pub fn console_only() -> Self {
        Self {
            file: None,
            debug_file: None,
        }
    }

    /// Set up the file mirror and debug log according to the configuration.
    ///
    /// Creates `logs/` if missing and records the timestamped log file path
    /// in the context. The debug log is truncated at each debug run.
    pub fn init(cfg: &RunConfig, ctx: &mut ProjectContext) -> Result<Self> {
        let file = if cfg.log_enabled {
            std::fs::create_dir_all(&ctx.logs_dir).with_context(|| {
                format!("failed to create log directory {}", ctx.logs_dir.display())
            })?;
            let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S").to_string();
            ctx.set_log_file(&stamp);
            // set_log_file always fills the path in; guard anyway
            match &ctx.log_file {
                Some(path) => {
                    let f = OpenOptions::new()
                        .create(true)
                        .append(true)
                        .open(path)
                        .with_context(|| format!("failed to open log file {}", path.display()))?;
                    Some(Mutex::new(f))
                }
                None => None,
            }
        } else {
            None
        };

        let debug_file = if cfg.debug {
            let path = std::env::temp_dir().join(DEBUG_LOG_NAME);
            let f = File::create(&path)
                .with_context(|| format!("failed to open debug log {}", path.display()))?;
            Some(Mutex::new(f))
        } else {
            None
        };

        Ok(Self { file, debug_file })
    }

    pub fn info(&self, msg: &str) {
        self.record(Level::Info, msg);
    }

    pub fn warn(&self, msg: &str) {
        self.record(Level::Warning, msg);
    }

    pub fn error(&self, msg: &str) {
        self.record(Level::Error, msg);
    }

    pub fn success(&self, msg: &str) {
        self.record(Level::Success, msg);
    }

    /// Verbose trace record; goes to the debug log only.
    pub fn debug(&self, msg: &str) {
        if let Some(f) = &self.debug_file {
            if let Ok(mut f) = f.lock() {
                let _ = writeln!(f, "[{}] [DEBUG] {}", timestamp(), strip_ansi(msg));
            }
        }
    }

    fn record(&self, level: Level, msg: &str) {
        eprintln!("{}[{}]{} {}", level.color(), level.tag(), colors::RESET, msg);
        self.mirror(level.tag(), msg);
        if level != Level::Debug {
            self.debug(msg);
        }
    }

    fn mirror(&self, tag: &str, msg: &str) {
        if let Some(f) = &self.file {
            if let Ok(mut f) = f.lock() {
                let _ = writeln!(f, "[{}] [{}] {}", timestamp(), tag, strip_ansi(msg));
            }
        }
    }

    /// Append one line of raw stage output to the file mirror, unmodified
    /// except for ANSI stripping. Console echo is the gateway's job.
    pub fn raw(&self, line: &str) {
        if let Some(f) = &self.file {
            if let Ok(mut f) = f.lock() {
                let _ = writeln!(f, "{}", strip_ansi(line.trim_end_matches(['\n', '\r'])));
            }
        }
    }

    pub fn file_logging_enabled(&self) -> bool {
        self.file.is_some()
    }

    pub fn debug_enabled(&self) -> bool {
        self.debug_file.is_some()
    }
}

fn timestamp() -> String {
    chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Remove ANSI escape sequences (CSI and the two-byte ESC forms).
pub fn strip_ansi(s: &str) -> Cow<'_, str> {
    static ANSI: OnceLock<Regex> = OnceLock::new();
    let re = ANSI.get_or_init(|| {
        Regex::new(r"\x1b(?:\[[0-9;?]*[ -/]*[@-~]|[@-Z\\-_])").expect("literal pattern")
    });
    re.replace_all(s, "")
}

/// Delete `build_*.log` files in `logs_dir` older than `days` days.
///
/// A missing log directory is not an error (nothing to purge). Returns the
/// number of files removed.
pub fn purge_old_logs(logs_dir: &Path, days: u32) -> Result<usize> {
    if !logs_dir.is_dir() {
        return Ok(0);
    }

    let cutoff = SystemTime::now() - Duration::from_secs(u64::from(days) * 86_400);
    let mut removed = 0;

    for entry in std::fs::read_dir(logs_dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if !name.starts_with("build_") || !name.ends_with(".log") {
            continue;
        }
        let modified = entry.metadata()?.modified()?;
        if modified < cutoff {
            std::fs::remove_file(entry.path())
                .with_context(|| format!("failed to delete old log {}", entry.path().display()))?;
            removed += 1;
        }
    }

    Ok(removed)
}
