//! Repository synchronisation through the command gateway.
//!
//! Clone-or-update is decided by a single probe for `.git` metadata. Nothing
//! here reconciles diverged histories: an existing checkout is only
//! fast-forwarded.

use crate::error::{CloneError, GatewayError};
use crate::models::BuildConfiguration;
use crate::orchestrator::context::BuildContext;
use crate::system::paths::join_env_path;
use crate::system::CommandSpec;

/// Checkout directory names under the output directory.
pub const KERNEL_SOURCE_DIR: &str = "kernel_source";
pub const PATCHES_SOURCE_DIR: &str = "nethunter_patches_source";

/// In-environment locations of both checkouts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncedPaths {
    pub kernel_dir: String,
    pub patches_dir: String,
}

/// Outcome for one repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncAction {
    Cloned,
    Updated,
}

/// Clone or update both repositories under `output_dir` (an environment path).
pub async fn sync_repositories(
    ctx: &BuildContext,
    config: &BuildConfiguration,
    output_dir: &str,
) -> Result<SyncedPaths, CloneError> {
    ctx.step("Cloning repositories");

    let kernel_dir = join_env_path(output_dir, KERNEL_SOURCE_DIR);
    let patches_dir = join_env_path(output_dir, PATCHES_SOURCE_DIR);

    ctx.progress(25, "Creating build directories");
    ctx.run(&CommandSpec::new("mkdir").args(["-p", output_dir]))
        .await
        .map_err(|source| CloneError::Workspace {
            path: output_dir.to_string(),
            source,
        })?;

    ctx.progress(30, "Cloning kernel repository");
    ctx.info(format!("Cloning kernel repository to {}", kernel_dir));
    sync_repository(ctx, &config.kernel_repo, &config.kernel_branch, &kernel_dir).await?;

    ctx.progress(35, "Cloning NetHunter patches");
    ctx.info(format!(
        "Cloning NetHunter patches repository to {}",
        patches_dir
    ));
    sync_repository(
        ctx,
        &config.nethunter_patches_repo,
        &config.nethunter_patches_branch,
        &patches_dir,
    )
    .await?;

    ctx.progress(40, "Repository cloning completed");
    Ok(SyncedPaths {
        kernel_dir,
        patches_dir,
    })
}

/// Shallow single-branch clone when `dir` has no checkout, fast-forward pull otherwise.
pub async fn sync_repository(
    ctx: &BuildContext,
    url: &str,
    branch: &str,
    dir: &str,
) -> Result<SyncAction, CloneError> {
    let wrap = |source: GatewayError| CloneError::Gateway {
        repo: url.to_string(),
        path: dir.to_string(),
        source,
    };

    if has_checkout(ctx, dir).await.map_err(wrap)? {
        ctx.info(format!("{} exists, updating...", dir));
        ctx.run(&CommandSpec::new("git").args(["-C", dir, "pull", "--ff-only"]))
            .await
            .map_err(wrap)?;
        Ok(SyncAction::Updated)
    } else {
        ctx.run(&CommandSpec::new("git").args([
            "clone",
            "--depth",
            "1",
            "--single-branch",
            "-b",
            branch,
            url,
            dir,
        ]))
        .await
        .map_err(wrap)?;
        Ok(SyncAction::Cloned)
    }
}

/// `test -d <dir>/.git`: exit 1 means absent, anything else but success is an error.
async fn has_checkout(ctx: &BuildContext, dir: &str) -> Result<bool, GatewayError> {
    let probe = CommandSpec::new("test")
        .arg("-d")
        .arg(join_env_path(dir, ".git"));
    match ctx.run(&probe).await {
        Ok(_) => Ok(true),
        Err(e) if e.exit_code() == Some(1) => Ok(false),
        Err(e) => Err(e),
    }
}
