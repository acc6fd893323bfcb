/// Execution environment health checks
///
/// Three strictly ordered probes: the environment subsystem is running, the
/// configured profile is installed, and a no-op command completes inside it.

use super::{CommandSpec, ExecutionTarget, ENVIRONMENT_TOOL};
use crate::error::EnvironmentError;
use crate::orchestrator::context::BuildContext;

/// Result of a successful validation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvironmentReport {
    /// Profile that was verified; `None` in host mode.
    pub profile: Option<String>,
    /// Every profile the environment reported.
    pub available_profiles: Vec<String>,
}

/// Validate the context's execution target.
///
/// Host mode has nothing to probe and succeeds immediately.
pub async fn validate_environment(ctx: &BuildContext) -> Result<EnvironmentReport, EnvironmentError> {
    let profile = match ctx.target() {
        ExecutionTarget::Host => {
            ctx.info("Host execution selected; skipping environment checks");
            return Ok(EnvironmentReport::default());
        }
        ExecutionTarget::Profile(name) => name.clone(),
    };

    ctx.step("Checking WSL environment");
    ctx.progress(5, "Verifying WSL installation");
    ctx.info("Checking WSL and distribution setup...");

    ctx.run_in(&CommandSpec::new(ENVIRONMENT_TOOL).arg("--status"), &ExecutionTarget::Host)
        .await
        .map_err(|source| {
            ctx.error("WSL does not seem to be installed or enabled.");
            EnvironmentError::NotInstalled { source }
        })?;
    ctx.info("WSL is installed.");
    ctx.progress(7, "WSL found");

    let available_profiles = list_profiles(ctx).await?;
    if !available_profiles.iter().any(|p| p == &profile) {
        ctx.error(format!(
            "{} not found in WSL distributions: {:?}",
            profile, available_profiles
        ));
        return Err(EnvironmentError::ProfileMissing {
            profile,
            available: available_profiles,
        });
    }
    ctx.info(format!("{} is installed in WSL.", profile));
    ctx.progress(10, format!("Found {} distribution", profile));

    ctx.run(&CommandSpec::new("echo").arg("WSL connectivity test"))
        .await
        .map_err(|source| EnvironmentError::Unreachable {
            profile: profile.clone(),
            source,
        })?;
    ctx.progress(12, "WSL connectivity verified");

    Ok(EnvironmentReport {
        profile: Some(profile),
        available_profiles,
    })
}

/// Installed profile names, as reported by the environment tool.
pub async fn list_profiles(ctx: &BuildContext) -> Result<Vec<String>, EnvironmentError> {
    let output = ctx
        .run_in(
            &CommandSpec::new(ENVIRONMENT_TOOL).args(["--list", "--quiet"]),
            &ExecutionTarget::Host,
        )
        .await
        .map_err(|source| EnvironmentError::ListingFailed { source })?;
    Ok(parse_profile_list(&output.stdout))
}

/// One profile per line; NULs and blank lines dropped.
pub fn parse_profile_list(stdout: &str) -> Vec<String> {
    stdout
        .lines()
        .map(|line| line.replace('\0', "").trim().to_string())
        .filter(|line| !line.is_empty())
        .collect()
}
