//! Per-platform mount policy
//!
//! Linux and macOS mount onto an existing empty directory and let rclone
//! daemonize itself. WinFsp wants to create the mount directory itself and
//! rclone cannot daemonize on Windows, so the spawned process is the mount.

use std::ffi::OsString;
use std::path::Path;
use std::time::Duration;

use crate::utils::path::mount_dir_name;

/// How the mount directory must look before rclone is started
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirPolicy {
    /// Directory must exist (FUSE)
    CreateIfMissing,
    /// Directory must not exist (WinFsp creates it)
    RemoveIfPresent,
}

/// One unmount attempt; tried in order until one succeeds
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnmountCommand {
    pub program: String,
    pub args: Vec<String>,
    /// Append the mount path as the last argument
    pub takes_path: bool,
}

impl UnmountCommand {
    pub fn new(program: impl Into<String>, args: &[&str], takes_path: bool) -> Self {
        Self {
            program: program.into(),
            args: args.iter().map(|a| a.to_string()).collect(),
            takes_path,
        }
    }

    /// Arguments for `mount_point`
    pub fn args_for(&self, mount_point: &Path) -> Vec<OsString> {
        let mut args: Vec<OsString> = self.args.iter().map(OsString::from).collect();
        if self.takes_path {
            args.push(mount_point.as_os_str().to_os_string());
        }
        args
    }
}

/// Platform-dependent knobs of the mount lifecycle
#[derive(Debug, Clone)]
pub struct PlatformProfile {
    pub dir_policy: DirPolicy,
    /// Wait between spawning the mount and re-probing
    pub settle_interval: Duration,
    /// Pass `--daemon` so the mount process detaches itself
    pub daemonize: bool,
    /// Log to `<tmp>/rclone-mount-<name>.log` plus WinFsp-friendly cache limits
    pub windows_flags: bool,
    pub unmount_commands: Vec<UnmountCommand>,
    /// Whether a cron-style scheduler table exists
    pub supports_scheduler: bool,
}

impl PlatformProfile {
    /// Profile for the platform this binary was built for
    pub fn current() -> Self {
        if cfg!(windows) {
            Self::windows()
        } else if cfg!(target_os = "macos") {
            Self::macos()
        } else {
            Self::linux()
        }
    }

    pub fn linux() -> Self {
        Self {
            dir_policy: DirPolicy::CreateIfMissing,
            settle_interval: Duration::from_secs(1),
            daemonize: true,
            windows_flags: false,
            unmount_commands: vec![
                UnmountCommand::new("fusermount", &["-u"], true),
                UnmountCommand::new("umount", &[], true),
            ],
            supports_scheduler: true,
        }
    }

    pub fn macos() -> Self {
        Self {
            unmount_commands: vec![
                UnmountCommand::new("umount", &[], true),
                UnmountCommand::new("diskutil", &["unmount", "force"], true),
            ],
            ..Self::linux()
        }
    }

    pub fn windows() -> Self {
        Self {
            dir_policy: DirPolicy::RemoveIfPresent,
            settle_interval: Duration::from_secs(3),
            daemonize: false,
            windows_flags: true,
            // No per-mount handle survives a restart, so every rclone image goes.
            unmount_commands: vec![UnmountCommand::new(
                "taskkill",
                &["/f", "/im", "rclone.exe"],
                false,
            )],
            supports_scheduler: false,
        }
    }

    pub fn with_settle_interval(mut self, interval: Duration) -> Self {
        self.settle_interval = interval;
        self
    }

    pub fn with_unmount_commands(mut self, commands: Vec<UnmountCommand>) -> Self {
        self.unmount_commands = commands;
        self
    }

    /// Arguments of the mount invocation, after any global `--config` flag
    pub fn mount_args(&self, remote: &str, mount_point: &Path) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            "mount".into(),
            format!("{}:", remote).into(),
            mount_point.as_os_str().to_os_string(),
            "--vfs-cache-mode".into(),
            "writes".into(),
        ];
        if self.daemonize {
            args.push("--daemon".into());
        }
        if self.windows_flags {
            let log_file =
                std::env::temp_dir().join(format!("rclone-mount-{}.log", mount_dir_name(remote)));
            for flag in [
                "--vfs-cache-max-age",
                "1h",
                "--vfs-cache-max-size",
                "100M",
                "--log-level",
                "INFO",
                "--log-file",
            ] {
                args.push(flag.into());
            }
            args.push(log_file.into_os_string());
        }
        args
    }
}
