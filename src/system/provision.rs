/// Toolchain provisioning inside the execution profile
///
/// Installs the packages the kernel build needs. Relies on the package
/// manager's own idempotence; any failing command aborts the pipeline.

use super::CommandSpec;
use crate::error::ProvisionError;
use crate::orchestrator::context::BuildContext;

/// Base packages for cloning, patching and building the kernel.
const BASE_PACKAGES: &[&str] = &[
    "git",
    "python3",
    "python3-pip",
    "bison",
    "flex",
    "gawk",
    "bc",
    "ccache",
    "device-tree-compiler",
    "libssl-dev",
];

const CROSS_TOOLCHAIN_PACKAGES: &[&str] = &["build-essential", "gcc-aarch64-linux-gnu"];

const MENUCONFIG_PACKAGES: &[&str] = &["libncurses5-dev"];

/// Provisioning commands in execution order.
pub fn provisioning_commands() -> Vec<CommandSpec> {
    let install = |packages: &[&str]| {
        CommandSpec::new("sudo")
            .args(["apt-get", "install", "-y"])
            .args(packages.iter().copied())
    };
    vec![
        CommandSpec::new("sudo").args(["apt-get", "update", "-y"]),
        install(BASE_PACKAGES),
        install(CROSS_TOOLCHAIN_PACKAGES),
        install(MENUCONFIG_PACKAGES),
    ]
}

/// Run every provisioning command; the first failure is fatal.
pub async fn provision_environment(ctx: &BuildContext) -> Result<(), ProvisionError> {
    let commands = provisioning_commands();
    let total = commands.len();

    ctx.step("Setting up WSL environment");
    ctx.progress(15, format!("Installing build tools in {}", ctx.target()));
    ctx.info(format!("Setting up build environment in {}...", ctx.target()));

    for (i, command) in commands.iter().enumerate() {
        ctx.info(format!("Running in environment: {}", command.display()));
        ctx.run(command).await.map_err(|source| {
            ctx.error(format!(
                "Failed to execute: {}. Error: {}",
                command.display(),
                source
            ));
            ProvisionError {
                command: command.display(),
                source,
            }
        })?;
        ctx.progress(
            15 + (i as u32 + 1) * 2,
            format!("Installing packages ({}/{})", i + 1, total),
        );
    }

    Ok(())
}
