//! Config validation. Findings are warnings; nothing here stops a build.

use crate::models::{BuildConfiguration, ConfigOptionLine};

/// Collect every non-fatal problem in a resolved configuration.
pub fn validate_configuration(config: &BuildConfiguration) -> Vec<String> {
    let mut warnings = Vec::new();

    for name in config.features.unknown.keys() {
        warnings.push(format!("Unknown feature flag '{}' ignored", name));
    }

    warnings.extend(validate_custom_lines(&config.custom_kernel_configs));

    if config.kernel_image_name_patterns.is_empty() {
        warnings.push(
            "kernel_image_name_patterns is empty; no kernel image will be located".to_string(),
        );
    } else if config
        .kernel_image_name_patterns
        .iter()
        .any(|p| p.trim().is_empty())
    {
        warnings.push("kernel_image_name_patterns contains an empty pattern".to_string());
    }

    if !config.defconfig_filename_template.contains("{codename}") {
        warnings.push(format!(
            "defconfig_filename_template '{}' does not reference {{codename}}",
            config.defconfig_filename_template
        ));
    }

    if config.artifact_search_depth == 0 {
        warnings.push("artifact_search_depth is 0; only the tree root is searched".to_string());
    }

    warnings
}

/// Custom lines must be `NAME=VALUE`, `NAME is not set`, blank or a comment.
pub fn validate_custom_lines(lines: &[String]) -> Vec<String> {
    lines
        .iter()
        .filter_map(|line| {
            let option = ConfigOptionLine::parse(line)?;
            if option.is_well_formed() {
                None
            } else {
                Some(format!(
                    "Custom kernel config line '{}' is not NAME=VALUE or 'NAME is not set'",
                    line.trim()
                ))
            }
        })
        .collect()
}
