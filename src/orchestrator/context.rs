//! Execution context handed to every stage.
//!
//! Bundles the command gateway, the execution target, the progress emitter,
//! the diagnostic log and the cancellation flag. Stages borrow it; nothing in
//! the pipeline reaches for global state.

use std::sync::Arc;

use log::Level;
use tokio::sync::watch;

use crate::error::GatewayError;
use crate::log_collector::LogCollector;
use crate::progress::{ProgressEmitter, ProgressSink, RecordingSink};
use crate::system::{CommandGateway, CommandOutput, CommandSpec, ExecutionTarget};

pub struct BuildContext {
    gateway: Arc<dyn CommandGateway>,
    target: ExecutionTarget,
    progress: ProgressEmitter,
    collector: Option<Arc<LogCollector>>,
    cancel_rx: watch::Receiver<bool>,
}

impl BuildContext {
    pub fn new(
        gateway: Arc<dyn CommandGateway>,
        target: ExecutionTarget,
        progress: ProgressEmitter,
        collector: Option<Arc<LogCollector>>,
        cancel_rx: watch::Receiver<bool>,
    ) -> Self {
        BuildContext {
            gateway,
            target,
            progress,
            collector,
            cancel_rx,
        }
    }

    /// Context with no log file, recording progress into `sink`, never cancelled.
    pub fn detached(
        gateway: Arc<dyn CommandGateway>,
        target: ExecutionTarget,
        sink: Arc<dyn ProgressSink>,
    ) -> Self {
        // The sender is dropped: the flag stays false forever.
        let (_, rx) = watch::channel(false);
        Self::new(gateway, target, ProgressEmitter::new(sink), None, rx)
    }

    /// Shorthand for tests: detached context recording into a fresh sink.
    pub fn recording(
        gateway: Arc<dyn CommandGateway>,
        target: ExecutionTarget,
    ) -> (Self, RecordingSink) {
        let sink = RecordingSink::new();
        let ctx = Self::detached(gateway, target, Arc::new(sink.clone()));
        (ctx, sink)
    }

    pub fn target(&self) -> &ExecutionTarget {
        &self.target
    }

    pub fn progress_emitter(&self) -> &ProgressEmitter {
        &self.progress
    }

    pub fn collector(&self) -> Option<&Arc<LogCollector>> {
        self.collector.as_ref()
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancel_rx.borrow()
    }

    /// Run one command in the configured target and log its output.
    pub async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, GatewayError> {
        self.run_in(spec, &self.target).await
    }

    /// Run one command in an explicit target.
    pub async fn run_in(
        &self,
        spec: &CommandSpec,
        target: &ExecutionTarget,
    ) -> Result<CommandOutput, GatewayError> {
        let display = spec.display();
        if self.is_cancelled() {
            return Err(GatewayError::Cancelled { command: display });
        }
        self.debug(format!("Executing in {}: {}", target, display));

        let result = match self.gateway.execute(spec, target).await {
            // Ctrl-C reaches the child too; a command that died while the flag
            // was raised is a cancellation, not a tool failure.
            Err(e) if !e.is_cancelled() && self.is_cancelled() => {
                self.debug(format!("Command ended after cancellation: {}", e));
                Err(GatewayError::Cancelled { command: display.clone() })
            }
            other => other,
        };
        match &result {
            Ok(output) => {
                self.info(format!("Command executed successfully: {}", display));
                if !output.stdout.trim().is_empty() {
                    self.debug(format!("Stdout:\n{}", output.stdout.trim()));
                }
                if !output.stderr.trim().is_empty() {
                    self.debug(format!("Stderr:\n{}", output.stderr.trim()));
                }
            }
            Err(GatewayError::Failed { stderr, .. }) => {
                if !stderr.trim().is_empty() {
                    self.debug(format!("Stderr:\n{}", stderr.trim()));
                }
            }
            Err(_) => {}
        }
        result
    }

    pub fn step(&self, name: impl Into<String>) {
        self.progress.step(name);
    }

    pub fn progress(&self, percent: u32, message: impl Into<String>) {
        self.progress.progress(percent, message);
    }

    pub fn log(&self, level: Level, message: impl Into<String>) {
        if let Some(ref collector) = self.collector {
            collector.log_str(level, message);
        }
    }

    pub fn info(&self, message: impl Into<String>) {
        self.log(Level::Info, message);
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.log(Level::Warn, message);
    }

    pub fn error(&self, message: impl Into<String>) {
        self.log(Level::Error, message);
    }

    pub fn debug(&self, message: impl Into<String>) {
        self.log(Level::Debug, message);
    }
}
