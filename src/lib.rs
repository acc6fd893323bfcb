//! NetHunter kernel customizer
//!
//! Fetches an Android kernel tree and a patch collection into a Linux
//! execution environment, rewrites the device defconfig, applies the patches
//! and cross-compiles the kernel image, reporting progress as line-oriented
//! events on stdout.
//!
//! The system is organized into functional modules:
//! - **error**: error families for every stage plus the pipeline-level error
//! - **models**: configuration and artifact types
//! - **config**: configuration resolution (defaults + user document) and validation
//! - **system**: execution targets, path translation, the command gateway,
//!   environment validation and provisioning
//! - **kernel**: repository sync, defconfig reconciliation, patch application
//! - **orchestrator**: execution context, stage sequencing and the build executor
//! - **progress**: the stdout progress protocol
//! - **log_collector**: append-mode diagnostic log

pub mod config;
pub mod error;
pub mod kernel;
pub mod log_collector;
pub mod models;
pub mod orchestrator;
pub mod progress;
pub mod system;

pub use log;

pub use log_collector::{LogCollector, LogLine};

pub use error::{
    ArtifactNotFound, BuildError, CloneError, ConfigError, EnvironmentError, GatewayError,
    PatchError, PathFormatError, PipelineError, ProvisionError, Result,
};

pub use models::{
    BuildArtifact, BuildConfiguration, ConfigOptionLine, FeatureFlag, FeatureToggles, PatchFile,
    PatchLevel,
};

pub use config::ResolvedConfig;

pub use orchestrator::{BuildContext, Pipeline, PipelineReport, SkipFlags, Stage, StageStatus};

pub use progress::{BuildOutcome, ProgressEmitter, ProgressEvent, ProgressSink};

pub use system::{CommandGateway, CommandOutput, CommandSpec, ExecutionTarget, SystemGateway};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
