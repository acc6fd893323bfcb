//! Defconfig reconciliation against a real file with the system `sed` and `tee`.
#![cfg(target_os = "linux")]

use kernel_customizer::kernel::kconfig::reconcile_defconfig;
use kernel_customizer::models::{BuildConfiguration, FeatureFlag};
use kernel_customizer::progress::RecordingSink;
use kernel_customizer::system::{ExecutionTarget, SystemGateway};
use kernel_customizer::BuildContext;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tempfile::tempdir;
use tokio::sync::watch;

fn host_context() -> (BuildContext, watch::Sender<bool>) {
    let (tx, rx) = watch::channel(false);
    let gateway = Arc::new(SystemGateway::new(rx));
    let ctx = BuildContext::detached(gateway, ExecutionTarget::Host, Arc::new(RecordingSink::new()));
    (ctx, tx)
}

fn wifi_only() -> BuildConfiguration {
    let mut config = BuildConfiguration {
        execution_profile: String::new(),
        ..Default::default()
    };
    for flag in FeatureFlag::ALL {
        config.features.set(flag, flag == FeatureFlag::WifiMonitorMode);
    }
    config
}

fn defconfig(kernel_dir: &Path) -> std::path::PathBuf {
    kernel_dir.join("arch/arm64/configs/avicii_defconfig")
}

#[tokio::test]
async fn test_wifi_only_on_missing_defconfig() {
    let dir = tempdir().expect("Failed to create temp dir");
    let kernel_dir = dir.path().to_str().expect("utf-8 temp path");
    let (ctx, _tx) = host_context();

    let summary = reconcile_defconfig(&ctx, &wifi_only(), kernel_dir)
        .await
        .expect("Failed to reconcile defconfig");
    assert_eq!(summary.applied.len(), 4);
    assert!(summary.failed.is_empty());

    let content = fs::read_to_string(defconfig(dir.path())).expect("Failed to read defconfig");
    assert_eq!(
        content,
        "CONFIG_PACKET=y\nCONFIG_CFG80211_WEXT=y\nCONFIG_MAC80211=y\nCONFIG_RFKILL=y\n"
    );
}

#[tokio::test]
async fn test_existing_lines_are_replaced_once() {
    let dir = tempdir().expect("Failed to create temp dir");
    let path = defconfig(dir.path());
    fs::create_dir_all(path.parent().expect("defconfig has a parent")).expect("Failed to create configs dir");
    fs::write(
        &path,
        "CONFIG_LOCALVERSION=\"-nethunter\"\n\
         CONFIG_PACKET=n\n\
         # CONFIG_RFKILL is not set\n\
         CONFIG_MAC80211 is not set\n\
         CONFIG_PACKET_DIAG=y\n",
    )
    .expect("Failed to seed defconfig");

    let (ctx, _tx) = host_context();
    let kernel_dir = dir.path().to_str().expect("utf-8 temp path");
    reconcile_defconfig(&ctx, &wifi_only(), kernel_dir)
        .await
        .expect("Failed to reconcile defconfig");

    let content = fs::read_to_string(&path).expect("Failed to read defconfig");
    let lines: Vec<&str> = content.lines().collect();
    assert_eq!(
        lines,
        vec![
            "CONFIG_LOCALVERSION=\"-nethunter\"",
            "CONFIG_PACKET_DIAG=y",
            "CONFIG_PACKET=y",
            "CONFIG_CFG80211_WEXT=y",
            "CONFIG_MAC80211=y",
            "CONFIG_RFKILL=y",
        ]
    );
}

#[tokio::test]
async fn test_reconcile_is_idempotent() {
    let dir = tempdir().expect("Failed to create temp dir");
    let kernel_dir = dir.path().to_str().expect("utf-8 temp path");
    let (ctx, _tx) = host_context();

    let mut config = wifi_only();
    config.custom_kernel_configs = vec![
        "CONFIG_NF_TABLES=y".to_string(),
        "CONFIG_DEBUG_INFO is not set".to_string(),
    ];

    reconcile_defconfig(&ctx, &config, kernel_dir)
        .await
        .expect("first run");
    let first = fs::read_to_string(defconfig(dir.path())).expect("Failed to read defconfig");
    reconcile_defconfig(&ctx, &config, kernel_dir)
        .await
        .expect("second run");
    let second = fs::read_to_string(defconfig(dir.path())).expect("Failed to read defconfig");

    assert_eq!(first, second);
    assert_eq!(first.lines().count(), 6);
    assert!(first.lines().any(|l| l == "CONFIG_DEBUG_INFO is not set"));
}
