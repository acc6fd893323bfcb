/// Host-to-environment path translation
///
/// Converts an absolute Windows host path into the form the isolated execution
/// environment mounts it under. Pure string work: nothing touches the filesystem.

use crate::error::PathFormatError;

/// A path addressable from inside the execution environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranslatedPath {
    pub path: String,
    /// False for UNC shares, whose mapping inside the environment is a best guess.
    pub exact: bool,
}

const VERBATIM_PREFIX: &str = r"\\?\";
const VERBATIM_UNC_PREFIX: &str = r"\\?\UNC\";

/// Translate an absolute Windows host path.
///
/// # Rules
/// * `C:\Users\me\out` (or `C:/Users/me/out`) becomes `/mnt/c/Users/me/out`
/// * the `\\?\` verbatim prefix produced by canonicalisation is stripped first
/// * `\\server\share\dir` becomes `//server/share/dir` and is flagged inexact
/// * anything else is rejected
pub fn translate_host_path(raw: &str) -> Result<TranslatedPath, PathFormatError> {
    let reject = || PathFormatError {
        path: raw.to_string(),
    };

    let path = if let Some(rest) = raw.strip_prefix(VERBATIM_UNC_PREFIX) {
        return translate_unc(rest).ok_or_else(reject);
    } else if let Some(rest) = raw.strip_prefix(VERBATIM_PREFIX) {
        rest
    } else {
        raw
    };

    if let Some(rest) = path.strip_prefix(r"\\") {
        return translate_unc(rest).ok_or_else(reject);
    }

    let mut chars = path.chars();
    match (chars.next(), chars.next(), chars.next()) {
        (Some(drive), Some(':'), Some('\\' | '/')) if drive.is_ascii_alphabetic() => {
            let rest = path[3..].replace('\\', "/");
            let rest = rest.trim_end_matches('/');
            let mut translated = format!("/mnt/{}", drive.to_ascii_lowercase());
            if !rest.is_empty() {
                translated.push('/');
                translated.push_str(rest);
            }
            Ok(TranslatedPath {
                path: translated,
                exact: true,
            })
        }
        _ => Err(reject()),
    }
}

/// Join a relative path onto a path inside the execution environment.
pub fn join_env_path(base: &str, relative: &str) -> String {
    let relative = relative.trim_start_matches("./").trim_start_matches('/');
    let base = base.trim_end_matches('/');
    if relative.is_empty() {
        base.to_string()
    } else {
        format!("{}/{}", base, relative)
    }
}

/// `server\share\dir` (leading slashes already removed) to `//server/share/dir`.
fn translate_unc(rest: &str) -> Option<TranslatedPath> {
    let rest = rest.replace('\\', "/");
    let rest = rest.trim_matches('/');
    let mut parts = rest.splitn(2, '/');
    let server = parts.next().filter(|s| !s.is_empty())?;
    let remainder = parts.next().unwrap_or_default();
    if remainder.is_empty() {
        return None;
    }
    Some(TranslatedPath {
        path: format!("//{}/{}", server, remainder),
        exact: false,
    })
}
