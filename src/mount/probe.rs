//! Mount state detection
//!
//! Answers "is this path an active mount right now" from the operating system,
//! never from what this process remembers doing. Any failure to find out is
//! reported as "not mounted".

use async_trait::async_trait;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::rclone::ProcessRunner;

/// Authoritative mount check
#[async_trait]
pub trait MountProbe: Send + Sync {
    /// Whether `path` is currently a mount point. Never fails; unknown means `false`.
    async fn is_mounted(&self, path: &Path) -> bool;
}

const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Probe backed by the OS mount table
#[derive(Debug, Clone)]
pub struct SystemMountProbe {
    /// Image name looked up in the process table where no mount table exists
    #[cfg_attr(not(windows), allow(dead_code))]
    process_name: String,
}

impl SystemMountProbe {
    pub fn new() -> Self {
        Self {
            process_name: "rclone.exe".to_string(),
        }
    }

    /// Image name to look for in the process table (Windows fallback)
    pub fn with_process_name(mut self, name: impl Into<String>) -> Self {
        self.process_name = name.into();
        self
    }
}

impl Default for SystemMountProbe {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MountProbe for SystemMountProbe {
    async fn is_mounted(&self, path: &Path) -> bool {
        // A dead FUSE mount fails stat with ENOTCONN but is still in the table,
        // so only a plain "not found" short-circuits.
        if let Err(e) = tokio::fs::symlink_metadata(path).await {
            if e.kind() == std::io::ErrorKind::NotFound {
                return false;
            }
        }
        let target = normalize(path).await;

        #[cfg(target_os = "linux")]
        {
            match tokio::fs::read_to_string("/proc/self/mountinfo").await {
                Ok(table) => mountinfo_contains(&table, &target),
                Err(e) => {
                    tracing::debug!("mountinfo unavailable ({}), trying mountpoint", e);
                    mountpoint_command(&target).await
                }
            }
        }

        #[cfg(target_os = "macos")]
        {
            match ProcessRunner::run_program("mount", &[] as &[&str], None, Some(PROBE_TIMEOUT))
                .await
            {
                Ok(output) if output.success() => mount_output_contains(&output.stdout, &target),
                _ => false,
            }
        }

        #[cfg(windows)]
        {
            self.process_table_probe(&target).await
        }

        #[cfg(not(any(target_os = "linux", target_os = "macos", windows)))]
        {
            mountpoint_command(&target).await
        }
    }
}

#[cfg(windows)]
impl SystemMountProbe {
    /// No per-path mount primitive: a running rclone image plus a readable path
    /// counts as mounted. Racy by nature.
    async fn process_table_probe(&self, target: &Path) -> bool {
        let filter = format!("IMAGENAME eq {}", self.process_name);
        let output = match ProcessRunner::run_program(
            "tasklist",
            &["/fi", filter.as_str(), "/fo", "csv", "/nh"],
            None,
            Some(PROBE_TIMEOUT),
        )
        .await
        {
            Ok(output) if output.success() => output,
            _ => return false,
        };

        let wanted = self.process_name.to_ascii_lowercase();
        let running = output
            .stdout
            .iter()
            .any(|line| line.to_ascii_lowercase().contains(&wanted));
        running && tokio::fs::read_dir(target).await.is_ok()
    }
}

/// Canonical form used for comparisons; falls back to the literal path
async fn normalize(path: &Path) -> PathBuf {
    tokio::fs::canonicalize(path)
        .await
        .unwrap_or_else(|_| path.to_path_buf())
}

#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
async fn mountpoint_command(target: &Path) -> bool {
    let args = [OsStr::new("-q"), target.as_os_str()];
    match ProcessRunner::run_program("mountpoint", &args, None, Some(PROBE_TIMEOUT)).await {
        Ok(output) => output.success(),
        Err(_) => false,
    }
}

/// Decode the octal escapes (`\040` for space) used in the kernel mount tables
pub fn unescape_mount_field(field: &str) -> String {
    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 4 <= bytes.len() {
            let digits = &bytes[i + 1..i + 4];
            if digits.iter().all(|b| (b'0'..=b'7').contains(b)) {
                let value = digits
                    .iter()
                    .fold(0u32, |acc, b| acc * 8 + u32::from(b - b'0'));
                if let Ok(value) = u8::try_from(value) {
                    out.push(value);
                    i += 4;
                    continue;
                }
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Whether `/proc/self/mountinfo` text lists `target` as a mount point.
///
/// Field 5 of each line is the mount point.
pub fn mountinfo_contains(table: &str, target: &Path) -> bool {
    table.lines().any(|line| {
        line.split_whitespace()
            .nth(4)
            .map(|field| Path::new(&unescape_mount_field(field)) == target)
            .unwrap_or(false)
    })
}

/// Whether BSD-style `mount` output (`<src> on <path> (<opts>)`) lists `target`
pub fn mount_output_contains(lines: &[String], target: &Path) -> bool {
    lines.iter().any(|line| {
        let Some((_, rest)) = line.split_once(" on ") else {
            return false;
        };
        let mount_point = match rest.rfind(" (") {
            Some(idx) => &rest[..idx],
            None => rest,
        };
        Path::new(mount_point) == target
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const MOUNTINFO: &str = "\
22 1 8:1 / / rw,relatime shared:1 - ext4 /dev/sda1 rw
35 22 0:31 / /home/user/mnt/gdrive rw,nosuid,nodev,relatime shared:20 - fuse.rclone gdrive: rw,user_id=1000,group_id=1000
36 22 0:32 / /home/user/mnt/with\\040space rw,nosuid,nodev - fuse.rclone box: rw
";

    #[test]
    fn test_mountinfo_exact_match() {
        assert!(mountinfo_contains(MOUNTINFO, Path::new("/home/user/mnt/gdrive")));
        assert!(!mountinfo_contains(MOUNTINFO, Path::new("/home/user/mnt/gdriv")));
        assert!(!mountinfo_contains(MOUNTINFO, Path::new("/home/user/mnt")));
    }

    #[test]
    fn test_mountinfo_decodes_escapes() {
        assert!(mountinfo_contains(MOUNTINFO, Path::new("/home/user/mnt/with space")));
    }

    #[test]
    fn test_unescape_mount_field() {
        assert_eq!(unescape_mount_field("a\\040b"), "a b");
        assert_eq!(unescape_mount_field("tab\\011x"), "tab\tx");
        assert_eq!(unescape_mount_field("plain"), "plain");
        assert_eq!(unescape_mount_field("trailing\\04"), "trailing\\04");
    }

    #[test]
    fn test_mount_output_parse() {
        let lines = vec![
            "/dev/disk1s1 on / (apfs, local, journaled)".to_string(),
            "gdrive: on /Users/me/mnt/gdrive (macfuse, nodev, nosuid, synchronous, mounted by me)"
                .to_string(),
        ];
        assert!(mount_output_contains(&lines, Path::new("/Users/me/mnt/gdrive")));
        assert!(!mount_output_contains(&lines, Path::new("/Users/me/mnt")));
    }

    #[tokio::test]
    async fn test_nonexistent_path_is_not_mounted() {
        let probe = SystemMountProbe::new();
        let dir = tempfile::tempdir().unwrap();
        assert!(!probe.is_mounted(&dir.path().join("missing")).await);
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_plain_directory_is_not_mounted() {
        let probe = SystemMountProbe::new();
        let dir = tempfile::tempdir().unwrap();
        let sub = dir.path().join("plain");
        std::fs::create_dir(&sub).unwrap();
        assert!(!probe.is_mounted(&sub).await);
    }
}
