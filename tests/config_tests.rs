//! Integration tests for configuration resolution.
//!
//! Covers reading documents from disk, the shallow merge over defaults and
//! the non-fatal validation findings.

use kernel_customizer::config::{self, loader};
use kernel_customizer::error::{ConfigError, PipelineError};
use kernel_customizer::models::{BuildConfiguration, FeatureFlag, PatchLevel};
use kernel_customizer::progress::{BuildOutcome, ProgressEvent};
use proptest::prelude::*;
use serde_json::{json, Map, Value};
use std::fs;
use tempfile::tempdir;

#[test]
fn test_resolve_reads_document_from_disk() {
    let dir = tempdir().expect("Failed to create temp dir");
    let path = dir.path().join("config.json");
    fs::write(
        &path,
        r#"{
            "device": "oneplus_8t",
            "codename": "kebab",
            "git_patch_level": "2",
            "features": {"rtl8812au_driver": true, "hid_support": false},
            "custom_kernel_configs": ["CONFIG_NF_TABLES=y"],
            "wsl_distro_name": ""
        }"#,
    )
    .expect("Failed to write config");

    let resolved = config::resolve(&path).expect("Failed to resolve config");
    let cfg = &resolved.config;
    assert_eq!(cfg.device, "oneplus_8t");
    assert_eq!(cfg.codename, "kebab");
    assert_eq!(cfg.git_patch_level, PatchLevel(2));
    assert_eq!(cfg.execution_profile, "");
    assert_eq!(cfg.defconfig_path(), "arch/arm64/configs/kebab_defconfig");
    assert_eq!(cfg.kernel_branch, BuildConfiguration::default().kernel_branch);

    // `features` replaces the default map wholesale: omitted flags are off.
    assert!(cfg.features.is_enabled(FeatureFlag::Rtl8812auDriver));
    assert!(!cfg.features.is_enabled(FeatureFlag::HidSupport));
    assert!(!cfg.features.is_enabled(FeatureFlag::WifiMonitorMode));
    assert!(resolved.warnings.is_empty());
}

#[test]
fn test_missing_file_is_not_found() {
    let dir = tempdir().expect("Failed to create temp dir");
    let path = dir.path().join("absent.json");
    match config::resolve(&path) {
        Err(ConfigError::NotFound(p)) => assert_eq!(p, path),
        other => panic!("expected NotFound, got {:?}", other.map(|r| r.config)),
    }
}

#[cfg(target_os = "linux")]
#[test]
fn test_directory_is_unreadable() {
    let dir = tempdir().expect("Failed to create temp dir");
    let err = config::resolve(dir.path()).expect_err("a directory is not a document");
    match err {
        ConfigError::Unreadable { ref path, .. } => assert_eq!(path, dir.path()),
        ref other => panic!("unexpected error: {:?}", other),
    }

    let line = ProgressEvent::Finished(BuildOutcome::from_error(&PipelineError::from(err))).to_line();
    assert!(
        line.starts_with("BUILD_FAILED: Configuration error: Cannot read configuration file"),
        "{}",
        line
    );
}

#[test]
fn test_non_utf8_document_is_unreadable() {
    let dir = tempdir().expect("Failed to create temp dir");
    let path = dir.path().join("config.json");
    fs::write(&path, [0x7b, 0xff, 0xfe, 0x7d]).expect("Failed to write config");

    let err = config::resolve(&path).expect_err("invalid UTF-8 cannot be read");
    assert!(matches!(err, ConfigError::Unreadable { .. }), "{:?}", err);
}

#[test]
fn test_malformed_documents() {
    let dir = tempdir().expect("Failed to create temp dir");
    for (name, body) in [
        ("syntax.json", "{ not json"),
        ("array.json", "[1, 2, 3]"),
        ("types.json", r#"{"kernel_image_name_patterns": "Image"}"#),
    ] {
        let path = dir.path().join(name);
        fs::write(&path, body).expect("Failed to write config");
        let err = config::resolve(&path).expect_err("document should be rejected");
        assert!(
            matches!(err, ConfigError::Malformed { .. }),
            "{} produced {:?}",
            name,
            err
        );
    }
}

#[test]
fn test_unknown_keys_are_reported_not_fatal() {
    let resolved = loader::resolve_document(
        r#"{"codename": "lemonadep", "build_flavour": "nightly"}"#,
        std::path::Path::new("inline.json"),
    )
    .expect("Failed to resolve document");
    assert_eq!(resolved.config.codename, "lemonadep");
    assert_eq!(resolved.ignored_keys, vec!["build_flavour".to_string()]);
}

#[test]
fn test_validation_warnings_surface() {
    let resolved = loader::resolve_document(
        r#"{
            "features": {"bluetooth_sniffing": true},
            "custom_kernel_configs": ["CONFIG_OK=y", "garbage line here"],
            "kernel_image_name_patterns": [],
            "defconfig_filename_template": "arch/arm64/configs/vendor_defconfig"
        }"#,
        std::path::Path::new("inline.json"),
    )
    .expect("Failed to resolve document");

    let warnings = resolved.warnings.join("\n");
    assert!(warnings.contains("bluetooth_sniffing"), "{}", warnings);
    assert!(warnings.contains("garbage line here"), "{}", warnings);
    assert!(resolved.warnings.len() >= 4, "{:?}", resolved.warnings);
}

#[test]
fn test_output_dir_expands_home() {
    let resolved = loader::resolve_document(
        r#"{"output_dir": "~/nethunter_out"}"#,
        std::path::Path::new("inline.json"),
    )
    .expect("Failed to resolve document");
    let out = resolved.output_dir();
    assert!(out.ends_with("nethunter_out"));
    if let Some(home) = dirs::home_dir() {
        assert!(out.starts_with(home));
    }
}

fn known_string_fields() -> Vec<&'static str> {
    vec![
        "device",
        "codename",
        "kernel_repo",
        "kernel_branch",
        "nethunter_patches_repo",
        "nethunter_patches_branch",
        "nethunter_patches_dir_relative",
        "output_dir",
        "kernel_arch",
        "kernel_cross_compile",
        "wsl_distro_name",
    ]
}

proptest! {
    /// Overriding any subset of string fields changes exactly those fields.
    #[test]
    fn prop_subset_override_keeps_other_defaults(
        mask in proptest::collection::vec(any::<bool>(), 11),
        value in "[a-z0-9_]{1,12}",
    ) {
        let fields = known_string_fields();
        let mut overrides = Map::new();
        for (field, chosen) in fields.iter().zip(mask.iter()) {
            if *chosen {
                overrides.insert(field.to_string(), json!(value.clone()));
            }
        }

        let (merged, ignored) = loader::merge_over_defaults(overrides.clone())
            .expect("string overrides always merge");
        prop_assert!(ignored.is_empty());

        let merged = serde_json::to_value(&merged).expect("serialise merged");
        let defaults = serde_json::to_value(BuildConfiguration::default()).expect("serialise defaults");
        for field in fields {
            let expected: &Value = overrides.get(field).unwrap_or(&defaults[field]);
            prop_assert_eq!(&merged[field], expected);
        }
        prop_assert_eq!(&merged["features"], &defaults["features"]);
    }
}
