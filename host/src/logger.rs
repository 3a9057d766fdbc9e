//! The logging collaborator: every record becomes one `[YYYY-MM-DD HH:MM] LEVEL message` line,
//! appended to a text file and mirrored to stderr.
//!
//! Logging never stops the probe. If the file cannot be opened the lines still go to stderr, and a
//! failed write is dropped.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

use chrono::{Local, NaiveDateTime};
use log::{Level, LevelFilter, Log, Metadata, Record, SetLoggerError};

pub struct FileLogger {
    level: LevelFilter,
    file: Mutex<Option<File>>,
}

impl FileLogger {
    /// Opens (or creates) `path` for appending. Without a usable file the logger writes to stderr
    /// only.
    pub fn new(path: Option<&Path>, level: LevelFilter) -> Self {
        let file = path.and_then(|path| {
            match OpenOptions::new().create(true).append(true).open(path) {
                Ok(file) => Some(file),
                Err(e) => {
                    eprintln!("Cannot open log file {}: {e}", path.display());
                    None
                }
            }
        });
        FileLogger {
            level,
            file: Mutex::new(file),
        }
    }

    /// Makes this the global logger.
    pub fn install(self) -> Result<(), SetLoggerError> {
        let level = self.level;
        log::set_boxed_logger(Box::new(self)).map(|()| log::set_max_level(level))
    }
}

/// One log line, without the trailing newline.
pub fn format_line(time: NaiveDateTime, level: Level, message: &std::fmt::Arguments) -> String {
    format!("[{}] {level} {message}", time.format("%Y-%m-%d %H:%M"))
}

impl Log for FileLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let line = format_line(Local::now().naive_local(), record.level(), record.args());
        eprintln!("{line}");
        if let Ok(mut file) = self.file.lock() {
            if let Some(file) = file.as_mut() {
                let _ = writeln!(file, "{line}");
            }
        }
    }

    fn flush(&self) {
        if let Ok(mut file) = self.file.lock() {
            if let Some(file) = file.as_mut() {
                let _ = file.flush();
            }
        }
    }
}

/// Maps the number of `-v` flags to a level: info, then debug, then trace.
pub fn level_from_verbosity(verbose: u8) -> LevelFilter {
    match verbose {
        0 => LevelFilter::Info,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    }
}
