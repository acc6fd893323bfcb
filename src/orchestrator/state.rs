//! Pipeline stage tracking.
//!
//! **Architecture**:
//! - `Stage`: the discrete stages, in execution order
//! - `StageStatus`: what happened to a stage in one run
//! - `StageLog`: ordered record of every stage the orchestrator reached

use std::fmt;

/// Pipeline stages in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Stage {
    CleanOutput,
    EnvironmentCheck,
    Provisioning,
    Synchronization,
    ConfigTweaks,
    Patching,
    Building,
}

impl Stage {
    pub const ALL: [Stage; 7] = [
        Stage::CleanOutput,
        Stage::EnvironmentCheck,
        Stage::Provisioning,
        Stage::Synchronization,
        Stage::ConfigTweaks,
        Stage::Patching,
        Stage::Building,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::CleanOutput => "clean-output",
            Stage::EnvironmentCheck => "environment-check",
            Stage::Provisioning => "provisioning",
            Stage::Synchronization => "synchronization",
            Stage::ConfigTweaks => "config-tweaks",
            Stage::Patching => "patching",
            Stage::Building => "building",
        }
    }

    /// Stages that need the synchronised checkouts.
    pub fn needs_sources(&self) -> bool {
        matches!(self, Stage::ConfigTweaks | Stage::Patching | Stage::Building)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a stage did or did not run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageStatus {
    Completed,
    /// Skipped on the caller's request.
    SkippedByFlag,
    /// Skipped because an earlier stage produced nothing to work on.
    SkippedNoSources,
    /// Nothing to do in this configuration (e.g. host mode has no environment to check).
    NotApplicable,
}

impl StageStatus {
    pub fn ran(&self) -> bool {
        matches!(self, StageStatus::Completed)
    }
}

/// Ordered stage outcomes of one run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StageLog {
    entries: Vec<(Stage, StageStatus)>,
}

impl StageLog {
    pub fn record(&mut self, stage: Stage, status: StageStatus) {
        self.entries.push((stage, status));
    }

    pub fn status(&self, stage: Stage) -> Option<StageStatus> {
        self.entries
            .iter()
            .find(|(s, _)| *s == stage)
            .map(|(_, status)| *status)
    }

    pub fn ran(&self, stage: Stage) -> bool {
        self.status(stage).map(|s| s.ran()).unwrap_or(false)
    }

    pub fn entries(&self) -> &[(Stage, StageStatus)] {
        &self.entries
    }
}
