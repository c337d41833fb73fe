//! Runtime settings shared by the library and the CLI

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::plugins::PluginCatalog;
use crate::rclone::ProcessRunner;
use crate::utils::path::expand_tilde;

pub const DEFAULT_MOUNT_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_TEST_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct Settings {
    /// rclone config file
    pub config_path: PathBuf,
    /// rclone executable
    pub rclone_path: PathBuf,
    /// Parent directory of all mount points
    pub mount_base: PathBuf,
    pub plugin_dirs: Vec<PathBuf>,
    pub mount_timeout: Duration,
    pub test_timeout: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self::new()
    }
}

impl Settings {
    pub fn new() -> Self {
        Self {
            config_path: default_config_path(),
            rclone_path: resolve_rclone(None),
            mount_base: default_mount_base(),
            plugin_dirs: PluginCatalog::default_dirs(),
            mount_timeout: DEFAULT_MOUNT_TIMEOUT,
            test_timeout: DEFAULT_TEST_TIMEOUT,
        }
    }

    pub fn with_config(mut self, path: impl AsRef<Path>) -> Self {
        self.config_path = expand_tilde(path);
        self
    }

    pub fn with_rclone(mut self, path: impl AsRef<Path>) -> Self {
        self.rclone_path = resolve_rclone(Some(path.as_ref()));
        self
    }

    pub fn with_mount_base(mut self, path: impl AsRef<Path>) -> Self {
        self.mount_base = expand_tilde(path);
        self
    }

    pub fn with_plugin_dirs(mut self, dirs: Vec<PathBuf>) -> Self {
        self.plugin_dirs = dirs.into_iter().map(expand_tilde).collect();
        self
    }

    pub fn with_mount_timeout(mut self, timeout: Duration) -> Self {
        self.mount_timeout = timeout;
        self
    }

    pub fn with_test_timeout(mut self, timeout: Duration) -> Self {
        self.test_timeout = timeout;
        self
    }

    /// Runner bound to the configured executable and config file
    pub fn runner(&self) -> ProcessRunner {
        ProcessRunner::new(&self.rclone_path).with_config(&self.config_path)
    }
}

/// Where rclone itself looks for its config by default
pub fn default_config_path() -> PathBuf {
    let base = if cfg!(windows) {
        dirs::config_dir()
    } else {
        // rclone uses ~/.config on macOS too, not ~/Library
        std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .filter(|p| p.is_absolute())
            .or_else(|| dirs::home_dir().map(|h| h.join(".config")))
    };
    base.unwrap_or_else(|| PathBuf::from("."))
        .join("rclone")
        .join("rclone.conf")
}

pub fn default_mount_base() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("mnt")
}

/// Locate the rclone executable.
///
/// Paths are taken as given. Bare names are looked up on PATH, then next to
/// the running executable; if both fail the bare name is used and the spawn
/// error surfaces later.
pub fn resolve_rclone(requested: Option<&Path>) -> PathBuf {
    let requested = requested.map(expand_tilde);
    if let Some(path) = &requested {
        if path.components().count() > 1 {
            return path.clone();
        }
    }

    let name = requested.unwrap_or_else(|| {
        PathBuf::from(if cfg!(windows) { "rclone.exe" } else { "rclone" })
    });
    if let Ok(found) = which::which(&name) {
        return found;
    }

    if let Some(sibling) = std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join(&name)))
        .filter(|p| p.is_file())
    {
        return sibling;
    }

    name
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_path_ends_with_rclone_conf() {
        let path = default_config_path();
        assert!(path.ends_with("rclone/rclone.conf"));
    }

    #[test]
    fn test_explicit_rclone_path_is_kept() {
        let path = resolve_rclone(Some(Path::new("/opt/tools/rclone")));
        assert_eq!(path, PathBuf::from("/opt/tools/rclone"));
    }

    #[test]
    fn test_unknown_bare_name_falls_back_to_name() {
        let path = resolve_rclone(Some(Path::new("definitely-not-installed-rclone-xyz")));
        assert_eq!(path, PathBuf::from("definitely-not-installed-rclone-xyz"));
    }

    #[test]
    fn test_builders_expand_and_store() {
        let settings = Settings::new()
            .with_config("/tmp/x/rclone.conf")
            .with_mount_base("/tmp/x/mnt")
            .with_test_timeout(Duration::from_millis(10));
        assert_eq!(settings.config_path, PathBuf::from("/tmp/x/rclone.conf"));
        assert_eq!(settings.mount_base, PathBuf::from("/tmp/x/mnt"));
        assert_eq!(settings.test_timeout, Duration::from_millis(10));
        assert_eq!(settings.runner().config_path(), Some(Path::new("/tmp/x/rclone.conf")));
    }
}
