use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use log::{Level, LevelFilter};
use tokio::sync::watch;

use kernel_customizer::config;
use kernel_customizer::orchestrator::{check_environment, run_to_completion};
use kernel_customizer::{
    BuildContext, BuildOutcome, ExecutionTarget, LogCollector, PipelineError, ProgressEmitter,
    SkipFlags, SystemGateway,
};

/// Customize and cross-compile an Android kernel with NetHunter patches.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Cli {
    /// JSON configuration document (overrides the built-in defaults)
    #[arg(long, value_name = "PATH")]
    config: PathBuf,

    /// Skip installing build dependencies in the environment
    #[arg(long)]
    skip_env_setup: bool,

    /// Skip cloning or updating the repositories (also skips every later stage)
    #[arg(long)]
    skip_clone: bool,

    /// Skip applying NetHunter patches
    #[arg(long)]
    skip_patches: bool,

    /// Skip defconfig tweaks
    #[arg(long)]
    skip_config_tweaks: bool,

    /// Skip the kernel build
    #[arg(long)]
    skip_build: bool,

    /// Delete the output directory before starting
    #[arg(long)]
    clean_output: bool,

    /// Diagnostic log file (appended to)
    #[arg(long, value_name = "PATH", default_value = "kernel_build.log")]
    log_file: PathBuf,

    /// Echo debug records to stderr
    #[arg(long)]
    verbose: bool,

    /// Only validate the execution environment and list available profiles
    #[arg(long)]
    check_env: bool,
}

impl Cli {
    fn skip_flags(&self) -> SkipFlags {
        SkipFlags {
            skip_env_setup: self.skip_env_setup,
            skip_clone: self.skip_clone,
            skip_patches: self.skip_patches,
            skip_config_tweaks: self.skip_config_tweaks,
            skip_build: self.skip_build,
            clean_output: self.clean_output,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let echo_level = if cli.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Warn
    };
    let collector = match LogCollector::new(&cli.log_file, echo_level) {
        Ok(collector) => Some(Arc::new(collector)),
        Err(e) => {
            eprintln!("WARNING: diagnostic log disabled: {}", e);
            None
        }
    };
    let progress = ProgressEmitter::stdout().with_collector(collector.clone());

    let outcome = run(&cli, collector.clone(), progress).await;

    if let Some(ref collector) = collector {
        if let Err(e) = collector.wait_for_empty().await {
            eprintln!("WARNING: failed to flush diagnostic log: {}", e);
        }
    }
    if outcome {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

/// Resolve the configuration, run the requested mode and emit the terminal line.
///
/// Returns whether the run succeeded.
async fn run(cli: &Cli, collector: Option<Arc<LogCollector>>, progress: ProgressEmitter) -> bool {
    let note = |level: Level, message: String| {
        if let Some(ref collector) = collector {
            collector.log_str(level, message);
        }
    };

    note(
        Level::Info,
        format!("Starting kernel customizer {}", kernel_customizer::VERSION),
    );

    let resolved = match config::resolve(&cli.config) {
        Ok(resolved) => resolved,
        Err(e) => {
            progress.finish(BuildOutcome::from_error(&PipelineError::from(e)));
            return false;
        }
    };
    note(
        Level::Info,
        format!("Loaded configuration from {}", cli.config.display()),
    );
    for warning in &resolved.warnings {
        note(Level::Warn, format!("Configuration warning: {}", warning));
    }
    for key in &resolved.ignored_keys {
        note(Level::Debug, format!("Ignoring unknown configuration key: {}", key));
    }

    let (cancel_tx, cancel_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = cancel_tx.send(true);
        }
    });

    let timeout = resolved.config.command_timeout_secs.map(Duration::from_secs);
    let gateway = Arc::new(SystemGateway::new(cancel_rx.clone()).with_timeout(timeout));
    let target = ExecutionTarget::from_profile(&resolved.config.execution_profile);
    let ctx = BuildContext::new(gateway, target, progress, collector, cancel_rx);

    let outcome = if cli.check_env {
        check_environment(&ctx).await
    } else {
        let output_dir = resolved.output_dir();
        run_to_completion(ctx, resolved.config, output_dir, cli.skip_flags()).await
    };
    outcome.is_success()
}
