//! Defconfig reconciliation.
//!
//! Feature flags expand to fixed option lines; custom lines follow as given,
//! with surrounding whitespace trimmed before they are written.
//! Every live line for a NAME is deleted in place before the new line is
//! appended, so repeated runs leave exactly one line per NAME. Lines for
//! different NAMEs may change relative order: survivors stay put, new lines
//! go to the end of the file.

use crate::error::BuildError;
use crate::models::{BuildConfiguration, ConfigOptionLine};
use crate::orchestrator::context::BuildContext;
use crate::system::paths::join_env_path;
use crate::system::CommandSpec;

/// What the reconciler did, for the pipeline report.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TweakSummary {
    /// Environment path of the defconfig that was edited (`None` when nothing ran).
    pub target: Option<String>,
    pub applied: Vec<String>,
    /// Lines whose commands failed. Logged, never fatal.
    pub failed: Vec<String>,
    /// Lines rejected before any command ran.
    pub rejected: Vec<String>,
}

/// Ordered tweak list: enabled features in fixed order, then custom lines as given.
///
/// Custom lines are returned untrimmed; `reconcile_defconfig` trims each one
/// before writing it, so `"  CONFIG_X=y "` lands as `CONFIG_X=y`.
pub fn collect_tweaks(config: &BuildConfiguration) -> Vec<String> {
    let mut tweaks: Vec<String> = config
        .features
        .enabled()
        .into_iter()
        .flat_map(|flag| flag.option_lines().iter().map(|line| line.to_string()))
        .collect();
    tweaks.extend(config.custom_kernel_configs.iter().cloned());
    tweaks
}

/// `sed` invocation removing every live line for `name` from `file`.
pub fn delete_command(name: &str, file: &str) -> CommandSpec {
    CommandSpec::new("sed").args([
        "-i".to_string(),
        "-e".to_string(),
        format!("/^{}=/d", name),
        "-e".to_string(),
        format!("/^{} is not set/d", name),
        "-e".to_string(),
        format!("/^# {} is not set/d", name),
        file.to_string(),
    ])
}

/// `tee -a` invocation appending `line` (fed on stdin) to `file`.
pub fn append_command(line: &str, file: &str) -> CommandSpec {
    CommandSpec::new("tee")
        .args(["-a", file])
        .stdin(format!("{}\n", line))
}

/// Apply every tweak to `<kernel_dir>/<defconfig>`.
///
/// Each line is written with surrounding whitespace trimmed; an indented line
/// would not match the `^NAME` deletion on the next run.
///
/// Failing per-line commands are logged and skipped. Failing to create the
/// defconfig itself, or a cancelled command, is an error.
pub async fn reconcile_defconfig(
    ctx: &BuildContext,
    config: &BuildConfiguration,
    kernel_dir: &str,
) -> Result<TweakSummary, BuildError> {
    ctx.step("Applying kernel configuration tweaks");
    ctx.progress(45, "Configuring kernel features");

    let tweaks = collect_tweaks(config);
    let mut summary = TweakSummary::default();
    if tweaks.is_empty() {
        ctx.info("No kernel config tweaks to apply.");
        return Ok(summary);
    }

    let target = join_env_path(kernel_dir, &config.defconfig_path());
    ctx.info(format!("Applying kernel config tweaks to {}", target));

    if let Some((parent, _)) = target.rsplit_once('/').filter(|(p, _)| !p.is_empty()) {
        ctx.run(&CommandSpec::new("mkdir").args(["-p", parent]))
            .await
            .map_err(BuildError::Tweak)?;
    }
    ctx.run(&CommandSpec::new("touch").arg(&target))
        .await
        .map_err(BuildError::Tweak)?;

    let total = tweaks.len();
    for (i, tweak) in tweaks.iter().enumerate() {
        let option = match ConfigOptionLine::parse(tweak) {
            Some(option) => option,
            None => continue,
        };
        if !option.has_valid_name() {
            ctx.warn(format!(
                "Skipping config line with invalid option name: {}",
                tweak.trim()
            ));
            summary.rejected.push(tweak.clone());
            continue;
        }

        let line = tweak.trim();
        let result = async {
            ctx.run(&delete_command(&option.name, &target)).await?;
            ctx.run(&append_command(line, &target)).await
        }
        .await;

        match result {
            Ok(_) => {
                summary.applied.push(line.to_string());
                ctx.progress(
                    45 + ((i + 1) * 5 / total) as u32,
                    format!("Applied config: {}", option.name),
                );
            }
            Err(e) if e.is_cancelled() => return Err(BuildError::Tweak(e)),
            Err(e) => {
                ctx.error(format!("Failed to apply tweak: {} ({})", line, e));
                summary.failed.push(line.to_string());
            }
        }
    }

    ctx.progress(50, "Kernel configuration tweaks applied");
    summary.target = Some(target);
    Ok(summary)
}
