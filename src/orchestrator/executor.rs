//! Kernel build execution: clean, configure, compile, then locate images.
//!
//! The three make sub-stages are strictly ordered and any failure aborts the
//! build before the next one runs. Locating images afterwards never fails the
//! build; a miss is only a warning.

use std::path::{Path, PathBuf};

use crate::error::{ArtifactNotFound, BuildError, GatewayError};
use crate::models::{BuildArtifact, BuildConfiguration};
use crate::orchestrator::context::BuildContext;
use crate::system::paths::join_env_path;
use crate::system::{CommandSpec, ExecutionTarget};

/// One make sub-stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildStep {
    pub name: &'static str,
    pub commands: Vec<CommandSpec>,
    /// Progress reported once the step finishes; `target - 2` is reported before it starts.
    pub progress_target: u32,
}

/// Result of a successful build.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildReport {
    pub cores: usize,
    pub artifacts: Vec<BuildArtifact>,
    /// Set when no image matched the configured patterns.
    pub missing: Option<ArtifactNotFound>,
}

/// Toolchain environment exported to every make invocation.
pub fn build_environment(config: &BuildConfiguration) -> Vec<(String, String)> {
    vec![
        ("ARCH".to_string(), config.kernel_arch.clone()),
        ("SUBARCH".to_string(), config.kernel_arch.clone()),
        ("CROSS_COMPILE".to_string(), config.kernel_cross_compile.clone()),
        ("KBUILD_BUILD_USER".to_string(), config.kbuild_build_user.clone()),
        ("KBUILD_BUILD_HOST".to_string(), config.kbuild_build_host.clone()),
    ]
}

/// The clean, configure and compile steps for `kernel_dir`.
pub fn build_steps(config: &BuildConfiguration, kernel_dir: &str, cores: usize) -> Vec<BuildStep> {
    let env = build_environment(config);
    let make = |args: &[&str]| {
        let mut spec = CommandSpec::new("make").args(args.iter().copied()).current_dir(kernel_dir);
        for (key, value) in &env {
            spec = spec.env(key.as_str(), value.as_str());
        }
        spec
    };
    let jobs = format!("-j{}", cores);
    let defconfig = config.defconfig_target();

    vec![
        BuildStep {
            name: "Clean previous build",
            commands: vec![make(&["clean"]), make(&["mrproper"])],
            progress_target: 70,
        },
        BuildStep {
            name: "Generate kernel config",
            commands: vec![make(&[defconfig.as_str()])],
            progress_target: 75,
        },
        BuildStep {
            name: "Compile kernel",
            commands: vec![make(&[jobs.as_str()])],
            progress_target: 95,
        },
    ]
}

/// Worker count for `make -j`: `nproc` inside a profile, `num_cpus` on the host.
///
/// Detection problems fall back to a serial build; only cancellation is an error.
pub async fn detect_cores(ctx: &BuildContext) -> Result<usize, GatewayError> {
    let cores = match ctx.target() {
        ExecutionTarget::Host => Some(num_cpus::get()),
        ExecutionTarget::Profile(_) => match ctx.run(&CommandSpec::new("nproc")).await {
            Ok(output) => output.stdout.trim().parse::<usize>().ok(),
            Err(e) if e.is_cancelled() => return Err(e),
            Err(e) => {
                ctx.warn(format!("Could not determine number of cores: {}. Using 1 core.", e));
                return Ok(1);
            }
        },
    };

    match cores.filter(|n| *n > 0) {
        Some(n) => {
            ctx.info(format!("Using {} cores for parallel build", n));
            Ok(n)
        }
        None => {
            ctx.warn("Could not determine number of cores. Using 1 core.");
            Ok(1)
        }
    }
}

/// Run the build in `kernel_dir` and locate the produced images.
///
/// `host_kernel_dir` is where the same tree is visible on the host.
pub async fn run_kernel_build(
    ctx: &BuildContext,
    config: &BuildConfiguration,
    kernel_dir: &str,
    host_kernel_dir: &Path,
) -> Result<BuildReport, BuildError> {
    ctx.step("Building kernel");
    ctx.progress(65, "Starting kernel compilation");
    ctx.info(format!("Starting kernel build at {}", kernel_dir));

    let cores = detect_cores(ctx).await.map_err(|source| BuildError::StepFailed {
        step: "Detect cores".to_string(),
        source,
    })?;

    for step in build_steps(config, kernel_dir, cores) {
        ctx.info(format!("Build step: {}", step.name));
        ctx.progress(step.progress_target - 2, step.name);
        for command in &step.commands {
            ctx.run(command).await.map_err(|source| {
                ctx.error(format!("Kernel build step failed: {}", step.name));
                BuildError::StepFailed {
                    step: step.name.to_string(),
                    source,
                }
            })?;
        }
        ctx.progress(step.progress_target, format!("Completed: {}", step.name));
    }

    let (artifacts, missing) = locate_artifacts(ctx, config, kernel_dir, host_kernel_dir).await?;
    Ok(BuildReport {
        cores,
        artifacts,
        missing,
    })
}

/// `find` invocation matching any of `patterns` down to `depth`.
pub fn artifact_search_command(patterns: &[String], depth: u32, kernel_dir: &str) -> CommandSpec {
    let mut spec = CommandSpec::new("find")
        .args([".", "-maxdepth"])
        .arg(depth.to_string())
        .arg("(");
    for (i, pattern) in patterns.iter().enumerate() {
        if i > 0 {
            spec = spec.arg("-o");
        }
        spec = spec.arg("-name").arg(pattern.as_str());
    }
    spec.arg(")").current_dir(kernel_dir)
}

/// Map a `find` hit (relative to the kernel tree) to both sides.
pub fn map_artifact(relative: &str, kernel_dir: &str, host_kernel_dir: &Path) -> BuildArtifact {
    let relative = relative.trim().trim_start_matches("./");
    let host_path = relative
        .split('/')
        .filter(|part| !part.is_empty())
        .fold(PathBuf::from(host_kernel_dir), |path, part| path.join(part));
    BuildArtifact {
        relative_path: relative.to_string(),
        environment_path: join_env_path(kernel_dir, relative),
        host_path,
    }
}

async fn locate_artifacts(
    ctx: &BuildContext,
    config: &BuildConfiguration,
    kernel_dir: &str,
    host_kernel_dir: &Path,
) -> Result<(Vec<BuildArtifact>, Option<ArtifactNotFound>), BuildError> {
    ctx.step("Locating kernel images");
    ctx.progress(97, "Searching for compiled kernel images");

    let patterns: Vec<String> = config
        .kernel_image_name_patterns
        .iter()
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty())
        .collect();
    let not_found = ArtifactNotFound {
        patterns: patterns.clone(),
    };

    if patterns.is_empty() {
        ctx.warn(not_found.to_string());
        ctx.progress(100, "Build completed, but kernel images not found automatically");
        return Ok((Vec::new(), Some(not_found)));
    }

    let search = artifact_search_command(&patterns, config.artifact_search_depth, kernel_dir);
    let output = match ctx.run(&search).await {
        Ok(output) => output,
        Err(e) if e.is_cancelled() => {
            return Err(BuildError::StepFailed {
                step: "Locating kernel images".to_string(),
                source: e,
            })
        }
        Err(e) => {
            ctx.warn(format!("Failed to search for compiled kernel images: {}", e));
            ctx.progress(100, "Build completed");
            return Ok((Vec::new(), Some(not_found)));
        }
    };

    let artifacts: Vec<BuildArtifact> = output
        .lines()
        .iter()
        .map(|line| map_artifact(line, kernel_dir, host_kernel_dir))
        .collect();

    if artifacts.is_empty() {
        ctx.warn(not_found.to_string());
        ctx.progress(100, "Build completed, but kernel images not found automatically");
        return Ok((artifacts, Some(not_found)));
    }

    ctx.info("Found compiled kernel images:");
    for artifact in &artifacts {
        ctx.info(format!("  Environment path: {}", artifact.environment_path));
        ctx.info(format!("  Host path: {}", artifact.host_path.display()));
    }
    ctx.progress(
        100,
        format!(
            "Build completed successfully! Found {} kernel image(s)",
            artifacts.len()
        ),
    );
    ctx.step("Build completed successfully");
    Ok((artifacts, None))
}
