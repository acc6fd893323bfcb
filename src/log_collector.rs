//! Decoupled build log persistence.
//!
//! ```text
//! BuildContext / log::Record
//!     |
//! [LogCollector] (non-blocking send)
//!     | (crossbeam unbounded channel)
//!     v
//! [DiskPersister thread] ---> kernel_build.log (append)
//!     |
//!     +--> stderr echo (records at or above the echo level)
//! ```
//!
//! The persister is a plain OS thread so records sent from any tokio worker,
//! or from outside a runtime, reach the file. `wait_for_empty` pushes a flush
//! marker through the same channel and returns once everything queued before
//! it is on disk.

use chrono::Local;
use crossbeam_channel::{unbounded, Sender};
use log::{Level, LevelFilter, Log, Metadata, Record};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Internal log line or special marker
enum LogMessage {
    Line(LogLine),
    /// Flush marker with channel sender to signal completion
    Flush(std::sync::mpsc::Sender<()>),
}

/// A log line with metadata
#[derive(Clone, Debug)]
pub struct LogLine {
    pub level: Level,
    pub message: String,
    /// Wall-clock time the line was created, already formatted
    pub timestamp: String,
}

impl LogLine {
    pub fn new(level: Level, message: impl Into<String>) -> Self {
        LogLine {
            level,
            message: message.into(),
            timestamp: Local::now().format("%Y-%m-%d %H:%M:%S%.3f").to_string(),
        }
    }

    /// `[timestamp] [LEVEL] message`
    pub fn render(&self) -> String {
        format!("[{}] [{}] {}", self.timestamp, self.level, self.message)
    }
}

/// Persists log records to a single append-mode file
pub struct LogCollector {
    tx: Sender<LogMessage>,
    log_path: PathBuf,
    level: LevelFilter,
}

impl LogCollector {
    /// Open (or create) `log_path` in append mode and start the persister thread.
    ///
    /// # Arguments
    /// * `log_path` - File every record is appended to
    /// * `echo_level` - Records at or above this level are also echoed to stderr
    pub fn new(log_path: impl Into<PathBuf>, echo_level: LevelFilter) -> Result<Self, String> {
        let log_path = log_path.into();
        if let Some(parent) = log_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| format!("Failed to create log directory: {}", e))?;
        }

        let file = open_append(&log_path)?;
        let (tx, rx) = unbounded::<LogMessage>();

        std::thread::Builder::new()
            .name("log-persister".to_string())
            .spawn(move || {
                let mut file = file;
                while let Ok(msg) = rx.recv() {
                    match msg {
                        LogMessage::Line(line) => {
                            let rendered = line.render();
                            let _ = writeln!(file, "{}", rendered);
                            if line.level <= echo_level {
                                eprintln!("{}", rendered);
                            }
                        }
                        LogMessage::Flush(done) => {
                            let _ = file.flush();
                            let _ = file.sync_data();
                            let _ = done.send(());
                        }
                    }
                }
                let _ = file.flush();
            })
            .map_err(|e| format!("Failed to spawn log persister: {}", e))?;

        Ok(LogCollector {
            tx,
            log_path,
            level: LevelFilter::Debug,
        })
    }

    /// Most verbose level written to the file (defaults to `Debug`).
    pub fn with_file_level(mut self, level: LevelFilter) -> Self {
        self.level = level;
        self
    }

    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    /// Queue a line (non-blocking, cannot fail).
    pub fn log_line(&self, line: LogLine) {
        if line.level <= self.level {
            let _ = self.tx.send(LogMessage::Line(line));
        }
    }

    pub fn log_str(&self, level: Level, message: impl Into<String>) {
        self.log_line(LogLine::new(level, message));
    }

    /// Wait for all pending lines to be written to disk.
    ///
    /// Call before emitting the terminal sentinel so the final records are
    /// durable when the process exits.
    pub async fn wait_for_empty(&self) -> Result<(), String> {
        let (tx, rx) = std::sync::mpsc::channel::<()>();
        self.tx
            .send(LogMessage::Flush(tx))
            .map_err(|e| format!("Failed to send flush marker: {}", e))?;
        rx.recv()
            .map_err(|e| format!("Flush signal interrupted: {}", e))?;
        Ok(())
    }
}

impl Clone for LogCollector {
    fn clone(&self) -> Self {
        LogCollector {
            tx: self.tx.clone(),
            log_path: self.log_path.clone(),
            level: self.level,
        }
    }
}

/// Lets `log::Record`s built by callers flow into the collector.
impl Log for LogCollector {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            self.log_line(LogLine::new(record.level(), record.args().to_string()));
        }
    }

    fn flush(&self) {}
}

fn open_append(path: &Path) -> Result<File, String> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| format!("Failed to open log file {}: {}", path.display(), e))
}
