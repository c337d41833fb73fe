//! Path helpers.
//!
//! Remote names come straight out of a user-edited config file. Before one is used as a
//! directory name under the mount base it has to be mapped to a single, safe path component:
//! - no separators, so a name cannot escape the mount base
//! - no characters that are illegal on Windows filesystems
//! - no "." / ".." / reserved device names

use std::path::{Path, PathBuf};

pub(crate) fn is_windows_reserved_name(name: &str) -> bool {
    // Windows device names are reserved (case-insensitive), even with extensions (e.g. CON.txt).
    let upper = name.to_ascii_uppercase();
    matches!(upper.as_str(), "CON" | "PRN" | "AUX" | "NUL")
        || (upper.len() == 4
            && (upper.starts_with("COM") || upper.starts_with("LPT"))
            && upper[3..].chars().all(|c| ('1'..='9').contains(&c)))
}

/// Map a remote name to a single directory name.
pub fn mount_dir_name(remote: &str) -> String {
    let raw = remote.trim().trim_end_matches(':');
    let mut out: String = raw
        .chars()
        .map(|c| {
            if matches!(c, '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*') || c.is_control()
            {
                '_'
            } else {
                c
            }
        })
        .collect();

    // Trailing dots/spaces are not allowed on Windows; strip everywhere for consistency.
    out = out.trim_end_matches(['.', ' ']).to_string();

    if out.is_empty() || out == "." || out == ".." {
        return "_".to_string();
    }

    let stem = out.split('.').next().unwrap_or(&out);
    if is_windows_reserved_name(stem) {
        out = format!("_{}", out);
    }

    out
}

/// Expand a leading `~` to the user's home directory.
pub fn expand_tilde(path: impl AsRef<Path>) -> PathBuf {
    let path = path.as_ref();
    let Ok(rest) = path.strip_prefix("~") else {
        return path.to_path_buf();
    };
    match dirs::home_dir() {
        Some(home) if rest.as_os_str().is_empty() => home,
        Some(home) => home.join(rest),
        None => path.to_path_buf(),
    }
}
