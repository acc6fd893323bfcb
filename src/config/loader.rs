//! Config document loader: JSON overlaid key-by-key on the built-in defaults.

use super::validator::validate_configuration;
use super::ResolvedConfig;
use crate::error::ConfigError;
use crate::models::BuildConfiguration;
use serde_json::{Map, Value};
use std::fs;
use std::path::Path;

/// Read the user document at `path` and merge it over the defaults.
///
/// # Returns
/// `ConfigError::NotFound` if nothing exists at `path`,
/// `ConfigError::Unreadable` on any other I/O failure,
/// `ConfigError::Malformed` if the document is not a JSON object or a known
/// key holds a value of the wrong type.
pub fn resolve(path: &Path) -> Result<ResolvedConfig, ConfigError> {
    let content = fs::read_to_string(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            ConfigError::NotFound(path.to_path_buf())
        } else {
            ConfigError::Unreadable {
                path: path.to_path_buf(),
                source: e,
            }
        }
    })?;

    resolve_document(&content, path)
}

/// Merge an in-memory document. `origin` is only used in error messages.
pub fn resolve_document(content: &str, origin: &Path) -> Result<ResolvedConfig, ConfigError> {
    let malformed = |reason: String| ConfigError::Malformed {
        path: origin.to_path_buf(),
        reason,
    };

    let document: Value = serde_json::from_str(content).map_err(|e| malformed(e.to_string()))?;
    let overrides = match document {
        Value::Object(map) => map,
        other => {
            return Err(malformed(format!(
                "expected a JSON object at the top level, found {}",
                json_kind(&other)
            )))
        }
    };

    let (config, ignored_keys) = merge_over_defaults(overrides).map_err(malformed)?;
    let warnings = validate_configuration(&config);

    Ok(ResolvedConfig {
        config,
        warnings,
        ignored_keys,
    })
}

/// Shallow merge: every known top-level key replaces its default wholesale.
///
/// Returns the merged configuration and the unknown keys that were dropped.
pub fn merge_over_defaults(
    overrides: Map<String, Value>,
) -> Result<(BuildConfiguration, Vec<String>), String> {
    let mut merged = match serde_json::to_value(BuildConfiguration::default()) {
        Ok(Value::Object(map)) => map,
        Ok(_) => return Err("defaults did not serialise to an object".to_string()),
        Err(e) => return Err(format!("failed to serialise defaults: {}", e)),
    };

    let mut ignored = Vec::new();
    for (key, value) in overrides {
        if merged.contains_key(&key) {
            merged.insert(key, value);
        } else {
            ignored.push(key);
        }
    }

    let config = serde_json::from_value(Value::Object(merged)).map_err(|e| e.to_string())?;
    Ok((config, ignored))
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
