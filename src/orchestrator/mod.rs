//! Build Orchestration: clean-output -> environment check -> provisioning ->
//! synchronisation -> config tweaks -> patches -> build.
//!
//! Stages run strictly in sequence, one gateway command at a time. Every stage
//! except the environment check can be skipped by flag; when synchronisation is
//! skipped there are no checkouts, so every stage after it is skipped too.
//! Failures abort the run, except inside the patch stage, which continues past
//! individual patches.

pub mod context;
pub mod executor;
pub mod state;

use std::path::{Path, PathBuf};

pub use context::BuildContext;
pub use executor::{run_kernel_build, BuildReport};
pub use state::{Stage, StageLog, StageStatus};

use crate::error::{CloneError, PipelineError, Result};
use crate::kernel::git::{sync_repositories, SyncedPaths, KERNEL_SOURCE_DIR};
use crate::kernel::kconfig::{reconcile_defconfig, TweakSummary};
use crate::kernel::patcher::{apply_patches, PatchSummary};
use crate::models::BuildConfiguration;
use crate::progress::BuildOutcome;
use crate::system::health::{validate_environment, EnvironmentReport};
use crate::system::provision::provision_environment;

/// Caller-supplied stage switches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SkipFlags {
    pub skip_env_setup: bool,
    pub skip_clone: bool,
    pub skip_patches: bool,
    pub skip_config_tweaks: bool,
    pub skip_build: bool,
    /// Delete the host output directory before anything else runs.
    pub clean_output: bool,
}

/// Host output directory and its address inside the execution target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workspace {
    pub host_output: PathBuf,
    pub env_output: String,
}

impl Workspace {
    /// Create the host output directory and translate it for the execution target.
    pub fn prepare(ctx: &BuildContext, host_output: &Path) -> Result<Self> {
        std::fs::create_dir_all(host_output).map_err(|source| {
            PipelineError::from(CloneError::OutputDir {
                path: host_output.to_path_buf(),
                source,
            })
        })?;
        let host_output =
            std::fs::canonicalize(host_output).unwrap_or_else(|_| host_output.to_path_buf());

        let translated = ctx.target().address_host_path(&host_output)?;
        if !translated.exact {
            ctx.warn(format!(
                "UNC path detected: {}. Environment path conversion might be inexact.",
                host_output.display()
            ));
        }
        ctx.debug(format!(
            "Output directory {} is {} inside {}",
            host_output.display(),
            translated.path,
            ctx.target()
        ));

        Ok(Workspace {
            host_output,
            env_output: translated.path,
        })
    }

    /// Where the kernel checkout is visible on the host.
    pub fn host_kernel_dir(&self) -> PathBuf {
        self.host_output.join(KERNEL_SOURCE_DIR)
    }
}

/// Everything a finished run produced.
#[derive(Debug, Default)]
pub struct PipelineReport {
    pub stages: StageLog,
    pub environment: Option<EnvironmentReport>,
    pub workspace: Option<Workspace>,
    pub synced: Option<SyncedPaths>,
    pub tweaks: Option<TweakSummary>,
    pub patches: Option<PatchSummary>,
    pub build: Option<BuildReport>,
}

/// Recursively delete the host output directory if it exists.
///
/// Returns whether anything was removed.
pub fn clean_output_dir(ctx: &BuildContext, output_dir: &Path) -> Result<bool> {
    if !output_dir.exists() {
        ctx.debug(format!(
            "Output directory {} does not exist; nothing to clean",
            output_dir.display()
        ));
        return Ok(false);
    }
    ctx.info(format!("Cleaning output directory: {}", output_dir.display()));
    std::fs::remove_dir_all(output_dir).map_err(|source| PipelineError::CleanOutput {
        path: output_dir.to_path_buf(),
        source,
    })?;
    Ok(true)
}

/// One configured pipeline run.
pub struct Pipeline<'a> {
    ctx: &'a BuildContext,
    config: &'a BuildConfiguration,
    output_dir: PathBuf,
    flags: SkipFlags,
}

impl<'a> Pipeline<'a> {
    pub fn new(
        ctx: &'a BuildContext,
        config: &'a BuildConfiguration,
        output_dir: PathBuf,
        flags: SkipFlags,
    ) -> Self {
        Pipeline {
            ctx,
            config,
            output_dir,
            flags,
        }
    }

    /// Run every stage in order and return what happened.
    pub async fn run(&self) -> Result<PipelineReport> {
        let ctx = self.ctx;
        let config = self.config;
        let flags = self.flags;
        let mut report = PipelineReport::default();

        ctx.info(format!(
            "Building kernel for device: {} ({})",
            config.device, config.codename
        ));

        if flags.clean_output {
            clean_output_dir(ctx, &self.output_dir)?;
            report.stages.record(Stage::CleanOutput, StageStatus::Completed);
        } else {
            report.stages.record(Stage::CleanOutput, StageStatus::SkippedByFlag);
        }

        self.check_cancelled()?;
        if ctx.target().is_host() {
            validate_environment(ctx).await?;
            report.stages.record(Stage::EnvironmentCheck, StageStatus::NotApplicable);
        } else {
            report.environment = Some(validate_environment(ctx).await?);
            report.stages.record(Stage::EnvironmentCheck, StageStatus::Completed);
        }

        if flags.skip_env_setup {
            ctx.info("Skipping environment setup as requested.");
            report.stages.record(Stage::Provisioning, StageStatus::SkippedByFlag);
        } else {
            provision_environment(ctx).await?;
            report.stages.record(Stage::Provisioning, StageStatus::Completed);
        }

        let synced = if flags.skip_clone {
            ctx.info("Skipping repository cloning as requested.");
            report.stages.record(Stage::Synchronization, StageStatus::SkippedByFlag);
            None
        } else {
            self.check_cancelled()?;
            let workspace = Workspace::prepare(ctx, &self.output_dir)?;
            let synced = sync_repositories(ctx, config, &workspace.env_output).await?;
            report.stages.record(Stage::Synchronization, StageStatus::Completed);
            report.workspace = Some(workspace);
            Some(synced)
        };

        let (synced, workspace) = match (synced, report.workspace.clone()) {
            (Some(synced), Some(workspace)) => (synced, workspace),
            _ => {
                ctx.info("No source checkouts available; skipping tweaks, patches and build.");
                for stage in Stage::ALL.into_iter().filter(Stage::needs_sources) {
                    report.stages.record(stage, StageStatus::SkippedNoSources);
                }
                return Ok(report);
            }
        };

        if flags.skip_config_tweaks {
            ctx.info("Skipping kernel config tweaks as requested.");
            report.stages.record(Stage::ConfigTweaks, StageStatus::SkippedByFlag);
        } else {
            let summary = reconcile_defconfig(ctx, config, &synced.kernel_dir).await?;
            report.stages.record(Stage::ConfigTweaks, StageStatus::Completed);
            report.tweaks = Some(summary);
        }

        if flags.skip_patches {
            ctx.info("Skipping NetHunter patches as requested.");
            report.stages.record(Stage::Patching, StageStatus::SkippedByFlag);
        } else {
            match apply_patches(ctx, config, &synced.kernel_dir, &synced.patches_dir).await {
                Ok(summary) => {
                    report.stages.record(Stage::Patching, StageStatus::Completed);
                    report.patches = Some(summary);
                }
                Err(e) if e.is_cancelled() => return Err(PipelineError::Cancelled),
                Err(e) => {
                    // Per-patch failures are already inside the summary; anything
                    // else reaching here is logged and the run goes on.
                    ctx.warn(format!("Patch stage ended early: {}", e));
                    report.stages.record(Stage::Patching, StageStatus::Completed);
                }
            }
        }

        if flags.skip_build {
            ctx.info("Skipping kernel build as requested.");
            report.stages.record(Stage::Building, StageStatus::SkippedByFlag);
        } else {
            let build = run_kernel_build(
                ctx,
                config,
                &synced.kernel_dir,
                &workspace.host_kernel_dir(),
            )
            .await?;
            report.stages.record(Stage::Building, StageStatus::Completed);
            report.build = Some(build);
        }

        report.synced = Some(synced);
        ctx.info("Kernel customization process completed successfully!");
        Ok(report)
    }

    fn check_cancelled(&self) -> Result<()> {
        if self.ctx.is_cancelled() {
            Err(PipelineError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Log the leftovers of a finished run and emit its terminal line.
pub fn finish_run(ctx: &BuildContext, result: &Result<PipelineReport>) -> BuildOutcome {
    if let Ok(PipelineReport {
        patches: Some(patches),
        ..
    }) = result
    {
        if !patches.failed.is_empty() {
            ctx.warn(format!(
                "{} of {} patches failed to apply",
                patches.failed.len(),
                patches.attempted()
            ));
        }
    }
    let outcome = BuildOutcome::from_result(result);
    ctx.progress_emitter().finish(outcome.clone());
    outcome
}

/// Run the pipeline on its own task and emit exactly one terminal line.
///
/// A task that panics still ends with `BUILD_FAILED`.
pub async fn run_to_completion(
    ctx: BuildContext,
    config: BuildConfiguration,
    output_dir: PathBuf,
    flags: SkipFlags,
) -> BuildOutcome {
    let fallback = ctx.progress_emitter().clone();
    let handle = tokio::spawn(async move {
        let result = Pipeline::new(&ctx, &config, output_dir, flags).run().await;
        finish_run(&ctx, &result)
    });
    match handle.await {
        Ok(outcome) => outcome,
        Err(e) => {
            let outcome = BuildOutcome::unexpected(e);
            fallback.finish(outcome.clone());
            outcome
        }
    }
}

/// Validate the execution environment alone and emit the terminal line.
pub async fn check_environment(ctx: &BuildContext) -> BuildOutcome {
    let outcome = match validate_environment(ctx).await {
        Ok(EnvironmentReport {
            profile: Some(profile),
            available_profiles,
        }) => {
            ctx.info(format!("Available profiles: {:?}", available_profiles));
            BuildOutcome::Success(format!(
                "Environment profile '{}' is reachable (available: {})",
                profile,
                available_profiles.join(", ")
            ))
        }
        Ok(_) => BuildOutcome::Success(
            "Running in host mode; no environment profile to check".to_string(),
        ),
        Err(e) => BuildOutcome::from_error(&PipelineError::from(e)),
    };
    ctx.progress_emitter().finish(outcome.clone());
    outcome
}
