//! Unified error type hierarchy for the kernel customizer
//!
//! One enum per pipeline stage plus `GatewayError` for the command gateway and
//! `PipelineError` for the terminal report. Stage errors keep the gateway
//! failure as their source so cancellation can be told apart from tool failure.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Failure of a single command sent through the gateway.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    #[error("Command '{command}' exited with {}: {}", exit_label(.exit_code), .stderr.trim())]
    Failed {
        command: String,
        exit_code: Option<i32>,
        stderr: String,
    },

    #[error("Command '{command}' could not be started: {reason}")]
    Spawn { command: String, reason: String },

    #[error("Command '{command}' was cancelled")]
    Cancelled { command: String },

    #[error("Command '{command}' timed out after {seconds}s")]
    TimedOut { command: String, seconds: u64 },
}

fn exit_label(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("status {}", code),
        None => "no status (terminated by signal)".to_string(),
    }
}

impl GatewayError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, GatewayError::Cancelled { .. })
    }

    /// Exit code of a command that ran to completion and failed.
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            GatewayError::Failed { exit_code, .. } => *exit_code,
            _ => None,
        }
    }
}

/// Host path that cannot be addressed from inside the execution environment.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Path format not recognized or not absolute for environment conversion: {path}")]
pub struct PathFormatError {
    pub path: String,
}

/// Configuration document errors (fatal, raised before the pipeline starts).
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("Invalid configuration document {}: {reason}", .path.display())]
    Malformed { path: PathBuf, reason: String },

    #[error("Cannot read configuration file {}: {source}", .path.display())]
    Unreadable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Execution environment validation errors.
#[derive(Error, Debug)]
pub enum EnvironmentError {
    #[error("Execution environment is not installed or not running: {source}")]
    NotInstalled {
        #[source]
        source: GatewayError,
    },

    #[error("Profile '{profile}' not found (available: {})", .available.join(", "))]
    ProfileMissing {
        profile: String,
        available: Vec<String>,
    },

    #[error("Profile listing failed: {source}")]
    ListingFailed {
        #[source]
        source: GatewayError,
    },

    #[error("Profile '{profile}' is not reachable: {source}")]
    Unreachable {
        profile: String,
        #[source]
        source: GatewayError,
    },
}

impl EnvironmentError {
    pub fn is_cancelled(&self) -> bool {
        match self {
            EnvironmentError::NotInstalled { source }
            | EnvironmentError::ListingFailed { source }
            | EnvironmentError::Unreachable { source, .. } => source.is_cancelled(),
            EnvironmentError::ProfileMissing { .. } => false,
        }
    }
}

/// Toolchain provisioning failure.
#[derive(Error, Debug)]
#[error("Environment setup failed while running '{command}': {source}")]
pub struct ProvisionError {
    pub command: String,
    #[source]
    pub source: GatewayError,
}

impl ProvisionError {
    pub fn is_cancelled(&self) -> bool {
        self.source.is_cancelled()
    }
}

/// Repository synchronisation failure.
#[derive(Error, Debug)]
pub enum CloneError {
    #[error("Failed to synchronise {repo} into {path}: {source}")]
    Gateway {
        repo: String,
        path: String,
        #[source]
        source: GatewayError,
    },

    #[error("Failed to create {path} inside the execution environment: {source}")]
    Workspace {
        path: String,
        #[source]
        source: GatewayError,
    },

    #[error("Failed to create output directory {}: {source}", .path.display())]
    OutputDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl CloneError {
    pub fn is_cancelled(&self) -> bool {
        match self {
            CloneError::Gateway { source, .. } | CloneError::Workspace { source, .. } => {
                source.is_cancelled()
            }
            CloneError::OutputDir { .. } => false,
        }
    }
}

/// Per-file patch failure. Never fatal on its own.
#[derive(Error, Debug)]
pub enum PatchError {
    #[error("Patch '{patch}' does not apply cleanly: {source}")]
    CheckFailed {
        patch: String,
        #[source]
        source: GatewayError,
    },

    #[error("Patch '{patch}' failed to apply: {source}")]
    ApplyFailed {
        patch: String,
        #[source]
        source: GatewayError,
    },

    #[error("Patching interrupted: {0}")]
    Interrupted(#[source] GatewayError),
}

impl PatchError {
    pub fn is_cancelled(&self) -> bool {
        match self {
            PatchError::CheckFailed { source, .. }
            | PatchError::ApplyFailed { source, .. }
            | PatchError::Interrupted(source) => source.is_cancelled(),
        }
    }
}

/// Kernel compilation failure.
#[derive(Error, Debug)]
pub enum BuildError {
    #[error("Kernel build step '{step}' failed: {source}")]
    StepFailed {
        step: String,
        #[source]
        source: GatewayError,
    },

    #[error("Config tweak reconciliation failed: {0}")]
    Tweak(#[source] GatewayError),
}

impl BuildError {
    pub fn is_cancelled(&self) -> bool {
        match self {
            BuildError::StepFailed { source, .. } | BuildError::Tweak(source) => {
                source.is_cancelled()
            }
        }
    }
}

/// No compiled image matched the configured patterns. Downgraded to a warning.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Could not locate compiled kernel images matching: {}", .patterns.join(", "))]
pub struct ArtifactNotFound {
    pub patterns: Vec<String>,
}

/// Terminal failure of the whole pipeline.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Environment(EnvironmentError),

    #[error(transparent)]
    Provision(ProvisionError),

    #[error(transparent)]
    Clone(CloneError),

    #[error(transparent)]
    Build(BuildError),

    #[error(transparent)]
    PathFormat(#[from] PathFormatError),

    #[error("Failed to clean output directory {}: {source}", .path.display())]
    CleanOutput {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Build was cancelled by user")]
    Cancelled,
}

impl PipelineError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, PipelineError::Cancelled)
    }

    /// Message embedded in the terminal sentinel line.
    pub fn user_message(&self) -> String {
        match self {
            PipelineError::Config(e) => format!("Configuration error: {}", e),
            PipelineError::Environment(e) => format!("Environment check failed: {}", e),
            PipelineError::Provision(e) => e.to_string(),
            PipelineError::Clone(e) => format!("Repository cloning failed: {}", e),
            PipelineError::Build(e) => format!("Kernel build failed: {}", e),
            PipelineError::PathFormat(e) => e.to_string(),
            PipelineError::CleanOutput { .. } => self.to_string(),
            PipelineError::Cancelled => "Build was cancelled by user".to_string(),
        }
    }
}

/// Stage errors caused by a cancelled command collapse into `Cancelled`.
macro_rules! cancellable_from {
    ($($err:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$err> for PipelineError {
                fn from(e: $err) -> Self {
                    if e.is_cancelled() {
                        PipelineError::Cancelled
                    } else {
                        PipelineError::$variant(e)
                    }
                }
            }
        )*
    };
}

cancellable_from! {
    EnvironmentError => Environment,
    ProvisionError => Provision,
    CloneError => Clone,
    BuildError => Build,
}

/// Top-level result type for pipeline operations.
pub type Result<T> = std::result::Result<T, PipelineError>;
