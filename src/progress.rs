//! Line-oriented progress protocol.
//!
//! Every stage reports through a `ProgressEmitter`, which renders events to a
//! `ProgressSink` (stdout for the binary, a recorder in tests) and mirrors them
//! into the diagnostic log.

use std::fmt;
use std::io::Write;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};

use log::Level;

use crate::error::PipelineError;
use crate::log_collector::LogCollector;

pub const SUCCESS_MESSAGE: &str = "Kernel customization finished successfully!";

/// Terminal outcome of a pipeline run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildOutcome {
    Success(String),
    Cancelled(String),
    Failed(String),
}

impl BuildOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, BuildOutcome::Success(_))
    }

    /// Map a finished run onto its terminal line.
    pub fn from_result<T>(result: &Result<T, PipelineError>) -> Self {
        match result {
            Ok(_) => BuildOutcome::Success(SUCCESS_MESSAGE.to_string()),
            Err(e) => Self::from_error(e),
        }
    }

    pub fn from_error(error: &PipelineError) -> Self {
        if error.is_cancelled() {
            BuildOutcome::Cancelled(error.user_message())
        } else {
            BuildOutcome::Failed(error.user_message())
        }
    }

    /// A run that never returned a result, e.g. a panicked worker task.
    pub fn unexpected(detail: impl fmt::Display) -> Self {
        BuildOutcome::Failed(format!("Unexpected error - {}", detail))
    }
}

/// One event of the progress protocol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent {
    Step(String),
    Progress { percent: u8, message: String },
    Finished(BuildOutcome),
}

impl ProgressEvent {
    /// Render as a single protocol line (no trailing newline).
    pub fn to_line(&self) -> String {
        match self {
            ProgressEvent::Step(name) => format!("STEP: {}", name),
            ProgressEvent::Progress { percent, message } => {
                format!("PROGRESS: {}% - {}", percent, message)
            }
            ProgressEvent::Finished(BuildOutcome::Success(msg)) => {
                format!("BUILD_COMPLETE: {}", msg)
            }
            ProgressEvent::Finished(BuildOutcome::Cancelled(msg)) => {
                format!("BUILD_CANCELLED: {}", msg)
            }
            ProgressEvent::Finished(BuildOutcome::Failed(msg)) => format!("BUILD_FAILED: {}", msg),
        }
    }

    /// Parse a protocol line. Anything else yields `None`.
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim_end_matches(['\r', '\n']);
        if let Some(name) = line.strip_prefix("STEP: ") {
            return Some(ProgressEvent::Step(name.to_string()));
        }
        if let Some(rest) = line.strip_prefix("PROGRESS: ") {
            let (percent, message) = rest.split_once("% - ")?;
            let percent = percent.trim().parse::<u8>().ok().filter(|p| *p <= 100)?;
            return Some(ProgressEvent::Progress {
                percent,
                message: message.to_string(),
            });
        }
        if let Some(msg) = line.strip_prefix("BUILD_COMPLETE: ") {
            return Some(ProgressEvent::Finished(BuildOutcome::Success(msg.to_string())));
        }
        if let Some(msg) = line.strip_prefix("BUILD_CANCELLED: ") {
            return Some(ProgressEvent::Finished(BuildOutcome::Cancelled(
                msg.to_string(),
            )));
        }
        if let Some(msg) = line.strip_prefix("BUILD_FAILED: ") {
            return Some(ProgressEvent::Finished(BuildOutcome::Failed(msg.to_string())));
        }
        None
    }
}

/// Destination of rendered progress events.
pub trait ProgressSink: Send + Sync {
    fn emit(&self, event: &ProgressEvent);
}

/// Writes protocol lines to stdout, flushing after each one.
#[derive(Debug, Default)]
pub struct StdoutSink;

impl ProgressSink for StdoutSink {
    fn emit(&self, event: &ProgressEvent) {
        let stdout = std::io::stdout();
        let mut handle = stdout.lock();
        let _ = writeln!(handle, "{}", event.to_line());
        let _ = handle.flush();
    }
}

/// Keeps every event in memory.
#[derive(Debug, Default, Clone)]
pub struct RecordingSink {
    events: Arc<Mutex<Vec<ProgressEvent>>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn steps(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                ProgressEvent::Step(name) => Some(name),
                _ => None,
            })
            .collect()
    }

    pub fn percentages(&self) -> Vec<u8> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                ProgressEvent::Progress { percent, .. } => Some(percent),
                _ => None,
            })
            .collect()
    }
}

impl ProgressSink for RecordingSink {
    fn emit(&self, event: &ProgressEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
    }
}

/// Front end used by the stages.
pub struct ProgressEmitter {
    sink: Arc<dyn ProgressSink>,
    collector: Option<Arc<LogCollector>>,
    last_percent: AtomicU8,
}

impl Clone for ProgressEmitter {
    fn clone(&self) -> Self {
        ProgressEmitter {
            sink: self.sink.clone(),
            collector: self.collector.clone(),
            last_percent: AtomicU8::new(self.last_percent.load(Ordering::Relaxed)),
        }
    }
}

impl ProgressEmitter {
    pub fn new(sink: Arc<dyn ProgressSink>) -> Self {
        ProgressEmitter {
            sink,
            collector: None,
            last_percent: AtomicU8::new(0),
        }
    }

    pub fn stdout() -> Self {
        Self::new(Arc::new(StdoutSink))
    }

    pub fn with_collector(mut self, collector: Option<Arc<LogCollector>>) -> Self {
        self.collector = collector;
        self
    }

    pub fn step(&self, name: impl Into<String>) {
        let name = name.into();
        self.record(Level::Info, format!("Current step: {}", name));
        self.sink.emit(&ProgressEvent::Step(name));
    }

    /// Report a percentage; values above 100 are clamped.
    ///
    /// Stage-local heuristics may move backwards when stages are skipped.
    /// That is allowed and only noted in the log.
    pub fn progress(&self, percent: u32, message: impl Into<String>) {
        let percent = percent.min(100) as u8;
        let message = message.into();
        let previous = self.last_percent.swap(percent, Ordering::Relaxed);
        if percent < previous {
            self.record(
                Level::Debug,
                format!("Progress moved back from {}% to {}%", previous, percent),
            );
        }
        self.record(Level::Info, format!("Progress: {}% - {}", percent, message));
        self.sink.emit(&ProgressEvent::Progress { percent, message });
    }

    pub fn finish(&self, outcome: BuildOutcome) {
        let level = match outcome {
            BuildOutcome::Success(_) => Level::Info,
            BuildOutcome::Cancelled(_) => Level::Warn,
            BuildOutcome::Failed(_) => Level::Error,
        };
        let event = ProgressEvent::Finished(outcome);
        self.record(level, event.to_line());
        self.sink.emit(&event);
    }

    fn record(&self, level: Level, message: String) {
        if let Some(ref collector) = self.collector {
            collector.log_str(level, message);
        }
    }
}
