//! Build configuration resolution.
//!
//! # Module Structure
//!
//! - `loader`: reads the user document and overlays it on the built-in defaults
//! - `validator`: non-fatal checks whose findings are reported as warnings
//!
//! # Configuration Flow
//!
//! 1. Defaults are serialised to a JSON object
//! 2. Each known top-level key of the user document replaces its default wholesale
//! 3. The merged object is deserialised into `BuildConfiguration`
//! 4. Validator findings are attached as warnings; the configuration is immutable from here on

pub mod loader;
pub mod validator;

use crate::models::BuildConfiguration;
use std::path::PathBuf;

pub use loader::resolve;

/// Resolved configuration plus everything worth telling the operator about it.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub config: BuildConfiguration,
    /// Validation findings; never fatal.
    pub warnings: Vec<String>,
    /// Top-level keys of the document that match no known field.
    pub ignored_keys: Vec<String>,
}

impl ResolvedConfig {
    /// Absolute host output directory with `~` expanded.
    pub fn output_dir(&self) -> PathBuf {
        expand_home(&self.config.output_dir)
    }
}

/// Expand a leading `~` using the user's home directory.
pub fn expand_home(raw: &str) -> PathBuf {
    let home = || dirs::home_dir();
    if raw == "~" {
        if let Some(home) = home() {
            return home;
        }
    } else if let Some(rest) = raw.strip_prefix("~/").or_else(|| raw.strip_prefix("~\\")) {
        if let Some(home) = home() {
            return home.join(rest);
        }
    }
    PathBuf::from(raw)
}
