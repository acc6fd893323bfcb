//! Core data types for the kernel customizer.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Known feature flags. Each expands to a fixed set of defconfig lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FeatureFlag {
    WifiMonitorMode,
    UsbGadget,
    HidSupport,
    Rtl8812auDriver,
}

/// Static feature -> option-line table, indexed by discriminant.
const FEATURE_TABLE: [(&str, &[&str]); 4] = [
    (
        "wifi_monitor_mode",
        &[
            "CONFIG_PACKET=y",
            "CONFIG_CFG80211_WEXT=y",
            "CONFIG_MAC80211=y",
            "CONFIG_RFKILL=y",
        ],
    ),
    (
        "usb_gadget",
        &[
            "CONFIG_USB_GADGET=y",
            "CONFIG_USB_CONFIGFS=y",
            "CONFIG_USB_CONFIGFS_F_FS=y",
            "CONFIG_USB_CONFIGFS_F_ACM=y",
            "CONFIG_USB_CONFIGFS_F_ECM=y",
            "CONFIG_USB_CONFIGFS_F_RNDIS=y",
        ],
    ),
    (
        "hid_support",
        &["CONFIG_USB_CONFIGFS_F_HID=y", "CONFIG_UHID=y", "CONFIG_HIDRAW=y"],
    ),
    ("rtl8812au_driver", &["CONFIG_RTL8812AU=m"]),
];

impl FeatureFlag {
    pub const ALL: [FeatureFlag; 4] = [
        FeatureFlag::WifiMonitorMode,
        FeatureFlag::UsbGadget,
        FeatureFlag::HidSupport,
        FeatureFlag::Rtl8812auDriver,
    ];

    /// Key used in the configuration document.
    pub fn as_key(&self) -> &'static str {
        FEATURE_TABLE[*self as usize].0
    }

    /// Defconfig lines this feature enables.
    pub fn option_lines(&self) -> &'static [&'static str] {
        FEATURE_TABLE[*self as usize].1
    }
}

impl fmt::Display for FeatureFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_key())
    }
}

impl FromStr for FeatureFlag {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        FeatureFlag::ALL
            .into_iter()
            .find(|flag| flag.as_key() == s)
            .ok_or_else(|| format!("Unknown feature flag: {}", s))
    }
}

/// Feature map from the configuration document.
///
/// Known names land in `flags`; anything else is kept in `unknown` so the
/// validator can warn about it instead of dropping it silently.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeatureToggles {
    pub flags: BTreeMap<FeatureFlag, bool>,
    pub unknown: BTreeMap<String, bool>,
}

impl FeatureToggles {
    pub fn is_enabled(&self, flag: FeatureFlag) -> bool {
        self.flags.get(&flag).copied().unwrap_or(false)
    }

    /// Enabled features in fixed expansion order.
    pub fn enabled(&self) -> Vec<FeatureFlag> {
        FeatureFlag::ALL
            .into_iter()
            .filter(|flag| self.is_enabled(*flag))
            .collect()
    }

    pub fn set(&mut self, flag: FeatureFlag, enabled: bool) {
        self.flags.insert(flag, enabled);
    }
}

impl From<BTreeMap<String, bool>> for FeatureToggles {
    fn from(raw: BTreeMap<String, bool>) -> Self {
        let mut toggles = FeatureToggles::default();
        for (name, enabled) in raw {
            match name.parse::<FeatureFlag>() {
                Ok(flag) => {
                    toggles.flags.insert(flag, enabled);
                }
                Err(_) => {
                    toggles.unknown.insert(name, enabled);
                }
            }
        }
        toggles
    }
}

impl From<&FeatureToggles> for BTreeMap<String, bool> {
    fn from(toggles: &FeatureToggles) -> Self {
        let mut raw: BTreeMap<String, bool> = toggles.unknown.clone();
        for (flag, enabled) in &toggles.flags {
            raw.insert(flag.as_key().to_string(), *enabled);
        }
        raw
    }
}

impl Serialize for FeatureToggles {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        BTreeMap::<String, bool>::from(self).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for FeatureToggles {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        BTreeMap::<String, bool>::deserialize(deserializer).map(FeatureToggles::from)
    }
}

/// Strip level passed to `git apply -p<N>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(into = "String")]
pub struct PatchLevel(pub u32);

impl From<PatchLevel> for String {
    fn from(level: PatchLevel) -> Self {
        level.0.to_string()
    }
}

impl Default for PatchLevel {
    fn default() -> Self {
        PatchLevel(1)
    }
}

impl fmt::Display for PatchLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl<'de> Deserialize<'de> for PatchLevel {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        use serde::de::{self, Visitor};

        struct PatchLevelVisitor;

        impl<'de> Visitor<'de> for PatchLevelVisitor {
            type Value = PatchLevel;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("a patch strip level as integer or numeric string")
            }

            fn visit_u64<E>(self, value: u64) -> Result<PatchLevel, E>
            where
                E: de::Error,
            {
                u32::try_from(value)
                    .map(PatchLevel)
                    .map_err(|_| E::custom(format!("patch level out of range: {}", value)))
            }

            fn visit_i64<E>(self, value: i64) -> Result<PatchLevel, E>
            where
                E: de::Error,
            {
                u32::try_from(value)
                    .map(PatchLevel)
                    .map_err(|_| E::custom(format!("patch level out of range: {}", value)))
            }

            fn visit_str<E>(self, value: &str) -> Result<PatchLevel, E>
            where
                E: de::Error,
            {
                value
                    .trim()
                    .parse::<u32>()
                    .map(PatchLevel)
                    .map_err(|_| E::invalid_value(de::Unexpected::Str(value), &self))
            }
        }

        deserializer.deserialize_any(PatchLevelVisitor)
    }
}

/// Complete build configuration: built-in defaults overlaid by the user document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildConfiguration {
    pub device: String,
    pub codename: String,
    pub kernel_repo: String,
    pub kernel_branch: String,
    pub nethunter_patches_repo: String,
    pub nethunter_patches_branch: String,
    pub nethunter_patches_dir_relative: String,
    pub git_patch_level: PatchLevel,
    /// Host-side output directory; `~` is expanded at use.
    pub output_dir: String,
    /// Defconfig path relative to the kernel tree, `{codename}` substituted.
    pub defconfig_filename_template: String,
    pub kernel_arch: String,
    pub kernel_cross_compile: String,
    pub kernel_image_name_patterns: Vec<String>,
    pub features: FeatureToggles,
    pub custom_kernel_configs: Vec<String>,
    /// Execution profile name. Empty means commands run in the host shell.
    #[serde(rename = "wsl_distro_name")]
    pub execution_profile: String,
    pub kbuild_build_user: String,
    pub kbuild_build_host: String,
    pub artifact_search_depth: u32,
    pub command_timeout_secs: Option<u64>,
}

impl Default for BuildConfiguration {
    fn default() -> Self {
        let mut features = FeatureToggles::default();
        features.set(FeatureFlag::WifiMonitorMode, true);
        features.set(FeatureFlag::UsbGadget, true);
        features.set(FeatureFlag::HidSupport, true);
        features.set(FeatureFlag::Rtl8812auDriver, false);

        BuildConfiguration {
            device: "oneplus_nord".to_string(),
            codename: "avicii".to_string(),
            kernel_repo: "https://github.com/OnePlusOSS/android_kernel_oneplus_sm7250.git"
                .to_string(),
            kernel_branch: "android-10.0".to_string(),
            nethunter_patches_repo:
                "https://gitlab.com/kalilinux/nethunter/build-scripts/kali-nethunter-project.git"
                    .to_string(),
            nethunter_patches_branch: "master".to_string(),
            nethunter_patches_dir_relative: "nethunter-kernel-patches".to_string(),
            git_patch_level: PatchLevel::default(),
            output_dir: "~/kernel_build_output".to_string(),
            defconfig_filename_template: "arch/arm64/configs/{codename}_defconfig".to_string(),
            kernel_arch: "arm64".to_string(),
            kernel_cross_compile: "aarch64-linux-gnu-".to_string(),
            kernel_image_name_patterns: vec![
                "Image.gz-dtb".to_string(),
                "Image.gz".to_string(),
                "Image".to_string(),
            ],
            features,
            custom_kernel_configs: Vec::new(),
            execution_profile: "kali-linux".to_string(),
            kbuild_build_user: "NethunterHost".to_string(),
            kbuild_build_host: "WSL".to_string(),
            artifact_search_depth: 3,
            command_timeout_secs: None,
        }
    }
}

impl BuildConfiguration {
    /// Defconfig path relative to the kernel tree.
    pub fn defconfig_path(&self) -> String {
        self.defconfig_filename_template
            .replace("{codename}", &self.codename)
    }

    /// Make target for the configure step (basename of the defconfig path).
    pub fn defconfig_target(&self) -> String {
        let path = self.defconfig_path();
        path.rsplit('/').next().unwrap_or(&path).to_string()
    }
}

/// A single declarative defconfig line, identified by its option NAME.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigOptionLine {
    pub name: String,
    /// `Some(value)` for `NAME=VALUE`, `None` for `NAME is not set`.
    pub value: Option<String>,
    /// Line exactly as it will be appended.
    pub raw: String,
}

impl ConfigOptionLine {
    /// Parse a tweak line. Blank lines and `#` comments yield `None`.
    pub fn parse(line: &str) -> Option<Self> {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            return None;
        }

        if let Some(name) = trimmed.strip_suffix(" is not set") {
            return Some(ConfigOptionLine {
                name: name.trim().to_string(),
                value: None,
                raw: line.to_string(),
            });
        }

        let (name, value) = match trimmed.split_once('=') {
            Some((name, value)) => (name.trim(), Some(value.to_string())),
            None => (trimmed, None),
        };

        Some(ConfigOptionLine {
            name: name.to_string(),
            value,
            raw: line.to_string(),
        })
    }

    pub fn is_negated(&self) -> bool {
        self.value.is_none() && self.raw.trim().ends_with(" is not set")
    }

    /// NAME is safe to splice into a `sed` address.
    pub fn has_valid_name(&self) -> bool {
        OPTION_NAME.is_match(&self.name)
    }

    /// `NAME=VALUE` or `NAME is not set` with a valid NAME.
    pub fn is_well_formed(&self) -> bool {
        self.has_valid_name() && (self.value.is_some() || self.is_negated())
    }
}

static OPTION_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_]+$").expect("Invalid option name regex"));

impl fmt::Display for ConfigOptionLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// One `.patch` file in the patch directory.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct PatchFile {
    pub name: String,
    /// Full path inside the execution environment.
    pub path: String,
}

/// A compiled image located after a successful build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BuildArtifact {
    /// Path relative to the kernel source tree.
    pub relative_path: String,
    /// Path inside the execution environment.
    pub environment_path: String,
    /// Corresponding path on the host.
    pub host_path: std::path::PathBuf,
}
