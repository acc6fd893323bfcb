//! Patch application with check-before-apply.
//!
//! Each patch is first dry-run with `git apply --check`; only a clean check is
//! followed by the real apply. A failing patch is logged and the next one is
//! tried. The stage itself only fails when the run is cancelled.

use crate::error::PatchError;
use crate::models::{BuildConfiguration, PatchFile};
use crate::orchestrator::context::BuildContext;
use crate::system::paths::join_env_path;
use crate::system::CommandSpec;

/// Suffix that selects patch files in the patch directory.
pub const PATCH_SUFFIX: &str = ".patch";

/// Outcome of one patch stage.
#[derive(Debug, Default)]
pub struct PatchSummary {
    /// Patch directory that was scanned, when it exists.
    pub directory: Option<String>,
    pub applied: Vec<String>,
    pub failed: Vec<PatchError>,
}

impl PatchSummary {
    pub fn attempted(&self) -> usize {
        self.applied.len() + self.failed.len()
    }
}

/// Apply every patch under `<patches_dir>/<nethunter_patches_dir_relative>` to `kernel_dir`.
pub async fn apply_patches(
    ctx: &BuildContext,
    config: &BuildConfiguration,
    kernel_dir: &str,
    patches_dir: &str,
) -> Result<PatchSummary, PatchError> {
    ctx.step("Applying NetHunter patches");
    ctx.progress(55, "Locating patch files");

    let mut summary = PatchSummary::default();
    let relative = config.nethunter_patches_dir_relative.trim();
    if relative.is_empty() {
        ctx.warn("NetHunter patches directory not specified. Skipping patches.");
        return Ok(summary);
    }

    let patch_dir = join_env_path(patches_dir, relative);
    match ctx.run(&CommandSpec::new("test").args(["-d", patch_dir.as_str()])).await {
        Ok(_) => ctx.info(format!("Found NetHunter patch directory: {}", patch_dir)),
        Err(e) if e.is_cancelled() => return Err(PatchError::Interrupted(e)),
        Err(_) => {
            ctx.warn(format!(
                "NetHunter patch directory not found at '{}'. Skipping patching.",
                patch_dir
            ));
            return Ok(summary);
        }
    }
    summary.directory = Some(patch_dir.clone());

    let patches = discover_patches(ctx, &patch_dir).await?;
    if patches.is_empty() {
        ctx.info("No .patch files found in NetHunter patch directory.");
        return Ok(summary);
    }

    let level = config.git_patch_level.to_string();
    let total = patches.len();
    for (i, patch) in patches.iter().enumerate() {
        ctx.info(format!("Applying patch {}/{}: {}", i + 1, total, patch.name));
        match apply_patch(ctx, kernel_dir, patch, &level).await {
            Ok(()) => {
                ctx.progress(
                    55 + ((i + 1) * 10 / total) as u32,
                    format!("Applied patch: {}", patch.name),
                );
                ctx.info(format!("Successfully applied patch: {}", patch.name));
                summary.applied.push(patch.name.clone());
            }
            Err(e) if e.is_cancelled() => return Err(e),
            Err(e) => {
                ctx.error(format!("Failed to apply patch '{}': {}", patch.name, e));
                ctx.warn("Continuing with next patch...");
                summary.failed.push(e);
            }
        }
    }

    ctx.info(format!(
        "Patching finished: {} applied, {} failed",
        summary.applied.len(),
        summary.failed.len()
    ));
    Ok(summary)
}

/// `*.patch` files directly inside `patch_dir`, sorted by file name.
///
/// A failed listing is logged and treated as an empty directory.
pub async fn discover_patches(
    ctx: &BuildContext,
    patch_dir: &str,
) -> Result<Vec<PatchFile>, PatchError> {
    let listing = CommandSpec::new("find").args([
        patch_dir,
        "-maxdepth",
        "1",
        "-type",
        "f",
        "-name",
        "*.patch",
    ]);
    let output = match ctx.run(&listing).await {
        Ok(output) => output,
        Err(e) if e.is_cancelled() => return Err(PatchError::Interrupted(e)),
        Err(_) => {
            ctx.warn(format!("Could not list .patch files from '{}'.", patch_dir));
            return Ok(Vec::new());
        }
    };

    let mut patches: Vec<PatchFile> = output
        .lines()
        .into_iter()
        .filter_map(|line| {
            let name = line.rsplit('/').next().unwrap_or(&line).to_string();
            name.ends_with(PATCH_SUFFIX).then(|| PatchFile {
                path: join_env_path(patch_dir, &name),
                name,
            })
        })
        .collect();
    patches.sort();
    patches.dedup();
    Ok(patches)
}

/// Check then apply a single patch with the kernel tree as working directory.
pub async fn apply_patch(
    ctx: &BuildContext,
    kernel_dir: &str,
    patch: &PatchFile,
    level: &str,
) -> Result<(), PatchError> {
    let strip = format!("-p{}", level);
    let git_apply = |check: bool| {
        let mut spec = CommandSpec::new("git").arg("apply").arg(strip.as_str());
        if check {
            spec = spec.arg("--check");
        }
        spec.arg("--verbose")
            .arg(patch.path.as_str())
            .current_dir(kernel_dir)
    };

    ctx.run(&git_apply(true)).await.map_err(|source| {
        if source.is_cancelled() {
            PatchError::Interrupted(source)
        } else {
            PatchError::CheckFailed {
                patch: patch.name.clone(),
                source,
            }
        }
    })?;
    ctx.run(&git_apply(false)).await.map_err(|source| {
        if source.is_cancelled() {
            PatchError::Interrupted(source)
        } else {
            PatchError::ApplyFailed {
                patch: patch.name.clone(),
                source,
            }
        }
    })?;
    Ok(())
}
