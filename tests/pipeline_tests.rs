//! End-to-end pipeline runs against the scripted gateway.
//!
//! Host mode is used wherever the output directory must exist, so the
//! workspace can live in a temp dir; profile mode covers the stages that run
//! before any path is translated.

use kernel_customizer::error::PipelineError;
use kernel_customizer::models::BuildConfiguration;
use kernel_customizer::orchestrator::{run_to_completion, Pipeline, SkipFlags, Stage, StageStatus};
use kernel_customizer::progress::{ProgressEmitter, ProgressEvent, RecordingSink};
use kernel_customizer::system::mock::{ScriptedGateway, ScriptedResponse};
use kernel_customizer::system::{CommandGateway, CommandOutput, CommandSpec, ExecutionTarget};
use kernel_customizer::{BuildContext, GatewayError};
use futures::future::BoxFuture;
use futures::FutureExt;
use std::sync::Arc;
use tempfile::tempdir;
use tokio::sync::watch;

fn host_config() -> BuildConfiguration {
    BuildConfiguration {
        execution_profile: String::new(),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_skip_clone_issues_no_downstream_commands() {
    let dir = tempdir().expect("Failed to create temp dir");
    let out = dir.path().join("out");
    let gateway = Arc::new(ScriptedGateway::new());
    let (ctx, _sink) = BuildContext::recording(gateway.clone(), ExecutionTarget::Host);
    let flags = SkipFlags {
        skip_env_setup: true,
        skip_clone: true,
        ..Default::default()
    };

    let report = Pipeline::new(&ctx, &host_config(), out.clone(), flags)
        .run()
        .await
        .expect("skipped run succeeds");

    assert!(gateway.calls().is_empty());
    assert!(!out.exists());
    assert_eq!(report.stages.status(Stage::EnvironmentCheck), Some(StageStatus::NotApplicable));
    assert_eq!(report.stages.status(Stage::Synchronization), Some(StageStatus::SkippedByFlag));
    for stage in [Stage::ConfigTweaks, Stage::Patching, Stage::Building] {
        assert_eq!(report.stages.status(stage), Some(StageStatus::SkippedNoSources));
    }
    assert!(report.build.is_none());
}

#[tokio::test]
async fn test_full_host_run() {
    let dir = tempdir().expect("Failed to create temp dir");
    let out = dir.path().join("out");
    let gateway = Arc::new(
        ScriptedGateway::new()
            .on("test -d", ScriptedResponse::fail(1, ""))
            .on(
                "find . -maxdepth",
                ScriptedResponse::Succeed("./arch/arm64/boot/Image.gz-dtb".to_string()),
            ),
    );
    let (ctx, sink) = BuildContext::recording(gateway.clone(), ExecutionTarget::Host);

    let report = Pipeline::new(&ctx, &host_config(), out.clone(), SkipFlags::default())
        .run()
        .await
        .expect("Failed to run pipeline");

    assert!(out.is_dir());
    let workspace = report.workspace.as_ref().expect("workspace prepared");
    let commands = gateway.commands();
    assert!(commands[0].starts_with("sudo apt-get update"));
    assert_eq!(commands[4], format!("mkdir -p {}", workspace.env_output));
    assert_eq!(gateway.count("git clone"), 2);

    // The patch directory probe fails like the checkout probes, so no patches run.
    let patches = report.patches.as_ref().expect("patch stage ran");
    assert!(patches.directory.is_none());
    assert_eq!(gateway.count("git apply"), 0);

    let tweaks = report.tweaks.as_ref().expect("tweak stage ran");
    assert_eq!(tweaks.applied.len(), 13);

    let build = report.build.as_ref().expect("build stage ran");
    assert_eq!(build.artifacts.len(), 1);
    assert_eq!(
        build.artifacts[0].host_path,
        workspace
            .host_kernel_dir()
            .join("arch")
            .join("arm64")
            .join("boot")
            .join("Image.gz-dtb")
    );

    for stage in Stage::ALL {
        let status = report.stages.status(stage).expect("every stage is recorded");
        match stage {
            Stage::CleanOutput => assert_eq!(status, StageStatus::SkippedByFlag),
            Stage::EnvironmentCheck => assert_eq!(status, StageStatus::NotApplicable),
            _ => assert_eq!(status, StageStatus::Completed, "{}", stage),
        }
    }
    assert_eq!(sink.percentages().last(), Some(&100));
}

#[tokio::test]
async fn test_stage_order_with_skips() {
    let dir = tempdir().expect("Failed to create temp dir");
    let gateway = Arc::new(ScriptedGateway::new().on("test -d", ScriptedResponse::fail(1, "")));
    let (ctx, _sink) = BuildContext::recording(gateway.clone(), ExecutionTarget::Host);
    let flags = SkipFlags {
        skip_env_setup: true,
        skip_config_tweaks: true,
        skip_patches: true,
        ..Default::default()
    };

    let report = Pipeline::new(&ctx, &host_config(), dir.path().join("out"), flags)
        .run()
        .await
        .expect("Failed to run pipeline");

    let programs: Vec<String> = gateway
        .calls()
        .into_iter()
        .map(|c| c.command.program)
        .collect();
    let first_make = programs.iter().position(|p| p == "make").expect("build ran");
    let last_git = programs.iter().rposition(|p| p == "git").expect("sync ran");
    assert!(last_git < first_make);
    assert_eq!(gateway.count("sudo"), 0);
    assert_eq!(gateway.count("sed"), 0);
    assert!(report.tweaks.is_none());
    assert!(report.patches.is_none());
}

#[tokio::test]
async fn test_cancellation_is_distinct_from_failure() {
    let dir = tempdir().expect("Failed to create temp dir");
    let gateway = Arc::new(
        ScriptedGateway::new()
            .on("test -d", ScriptedResponse::fail(1, ""))
            .on("make -j", ScriptedResponse::Cancel),
    );
    let (ctx, _sink) = BuildContext::recording(gateway.clone(), ExecutionTarget::Host);

    let err = Pipeline::new(&ctx, &host_config(), dir.path().join("out"), SkipFlags::default())
        .run()
        .await
        .expect_err("cancelled build");
    assert!(matches!(err, PipelineError::Cancelled));
    assert_eq!(err.user_message(), "Build was cancelled by user");
    assert_eq!(gateway.count("find . -maxdepth"), 0);
}

/// Ctrl-C as the terminal delivers it: the compiler dies from the signal
/// while the cancel flag goes up, so the gateway sees a plain failure.
struct InterruptedCompile {
    cancel_tx: watch::Sender<bool>,
}

impl CommandGateway for InterruptedCompile {
    fn execute<'a>(
        &'a self,
        command: &'a CommandSpec,
        _target: &'a ExecutionTarget,
    ) -> BoxFuture<'a, Result<CommandOutput, GatewayError>> {
        let plain = command.plain();
        let result = if plain.starts_with("make -j") {
            self.cancel_tx.send_replace(true);
            Err(GatewayError::Failed {
                command: command.display(),
                exit_code: None,
                stderr: "make: *** [Makefile:1234: vmlinux] Interrupt".to_string(),
            })
        } else if plain.starts_with("test -d") {
            Err(GatewayError::Failed {
                command: command.display(),
                exit_code: Some(1),
                stderr: String::new(),
            })
        } else {
            Ok(CommandOutput::default())
        };
        async move { result }.boxed()
    }
}

#[tokio::test]
async fn test_interrupted_compile_is_cancelled_not_failed() {
    let dir = tempdir().expect("Failed to create temp dir");
    let (tx, rx) = watch::channel(false);
    let ctx = BuildContext::new(
        Arc::new(InterruptedCompile { cancel_tx: tx }),
        ExecutionTarget::Host,
        ProgressEmitter::new(Arc::new(RecordingSink::new())),
        None,
        rx,
    );

    let err = Pipeline::new(&ctx, &host_config(), dir.path().join("out"), SkipFlags::default())
        .run()
        .await
        .expect_err("interrupted build");
    assert!(matches!(err, PipelineError::Cancelled), "{:?}", err);
    assert_eq!(err.user_message(), "Build was cancelled by user");
}

#[tokio::test]
async fn test_raised_flag_runs_no_commands() {
    let dir = tempdir().expect("Failed to create temp dir");
    let gateway = Arc::new(ScriptedGateway::new());
    let (tx, rx) = watch::channel(false);
    let ctx = BuildContext::new(
        gateway.clone(),
        ExecutionTarget::Host,
        ProgressEmitter::new(Arc::new(RecordingSink::new())),
        None,
        rx,
    );
    tx.send(true).expect("receiver alive");

    let err = Pipeline::new(&ctx, &host_config(), dir.path().join("out"), SkipFlags::default())
        .run()
        .await
        .expect_err("cancelled before start");
    assert!(err.is_cancelled());
    assert!(gateway.calls().is_empty());
}

#[tokio::test]
async fn test_missing_profile_fails_before_provisioning() {
    let dir = tempdir().expect("Failed to create temp dir");
    let gateway = Arc::new(
        ScriptedGateway::new().on(
            "wsl --list --quiet",
            ScriptedResponse::Succeed("Ubuntu\nDebian\n".to_string()),
        ),
    );
    let (ctx, _sink) = BuildContext::recording(
        gateway.clone(),
        ExecutionTarget::Profile("kali-linux".to_string()),
    );

    let err = Pipeline::new(
        &ctx,
        &BuildConfiguration::default(),
        dir.path().join("out"),
        SkipFlags::default(),
    )
    .run()
    .await
    .expect_err("missing profile is fatal");
    assert!(matches!(err, PipelineError::Environment(_)));
    assert!(err.user_message().starts_with("Environment check failed"));
    assert_eq!(gateway.count("sudo"), 0);
    assert_eq!(gateway.calls().len(), 2);
}

#[tokio::test]
async fn test_clean_output_runs_first() {
    let dir = tempdir().expect("Failed to create temp dir");
    let out = dir.path().join("out");
    std::fs::create_dir_all(out.join("kernel_source")).expect("Failed to seed output");
    std::fs::write(out.join("stale.txt"), "old").expect("Failed to seed output");
    let gateway = Arc::new(ScriptedGateway::new());
    let (ctx, _sink) = BuildContext::recording(gateway, ExecutionTarget::Host);
    let flags = SkipFlags {
        clean_output: true,
        skip_env_setup: true,
        skip_clone: true,
        ..Default::default()
    };

    let report = Pipeline::new(&ctx, &host_config(), out.clone(), flags)
        .run()
        .await
        .expect("Failed to run pipeline");
    assert!(!out.exists());
    assert_eq!(report.stages.status(Stage::CleanOutput), Some(StageStatus::Completed));
}

/// A gateway bug: the worker task dies mid-run.
struct PanickingGateway;

impl CommandGateway for PanickingGateway {
    fn execute<'a>(
        &'a self,
        command: &'a CommandSpec,
        _target: &'a ExecutionTarget,
    ) -> BoxFuture<'a, Result<CommandOutput, GatewayError>> {
        panic!("gateway exploded on {}", command.display());
    }
}

fn terminal_lines(sink: &RecordingSink) -> Vec<String> {
    sink.events()
        .into_iter()
        .filter(|e| matches!(e, ProgressEvent::Finished(_)))
        .map(|e| e.to_line())
        .collect()
}

#[tokio::test]
async fn test_run_to_completion_reports_success() {
    let dir = tempdir().expect("Failed to create temp dir");
    let sink = RecordingSink::new();
    let (_tx, rx) = watch::channel(false);
    let ctx = BuildContext::new(
        Arc::new(ScriptedGateway::new()),
        ExecutionTarget::Host,
        ProgressEmitter::new(Arc::new(sink.clone())),
        None,
        rx,
    );
    let flags = SkipFlags {
        skip_env_setup: true,
        skip_clone: true,
        ..Default::default()
    };

    let outcome = run_to_completion(ctx, host_config(), dir.path().join("out"), flags).await;
    assert!(outcome.is_success());
    assert_eq!(
        terminal_lines(&sink),
        vec!["BUILD_COMPLETE: Kernel customization finished successfully!".to_string()]
    );
}

#[tokio::test]
async fn test_panicking_worker_still_ends_with_failure_line() {
    let dir = tempdir().expect("Failed to create temp dir");
    let sink = RecordingSink::new();
    let (_tx, rx) = watch::channel(false);
    let ctx = BuildContext::new(
        Arc::new(PanickingGateway),
        ExecutionTarget::Host,
        ProgressEmitter::new(Arc::new(sink.clone())),
        None,
        rx,
    );

    let outcome =
        run_to_completion(ctx, host_config(), dir.path().join("out"), SkipFlags::default()).await;
    assert!(!outcome.is_success());
    let lines = terminal_lines(&sink);
    assert_eq!(lines.len(), 1);
    assert!(lines[0].starts_with("BUILD_FAILED: Unexpected error - "), "{}", lines[0]);
}
