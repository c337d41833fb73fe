//! Auto-mount at boot through the user's crontab
//!
//! Entries are `@reboot` lines recognised by substring, so entries edited by
//! hand (extra flags, different quoting) are still found. The flip side is that
//! an unrelated line mentioning the same executable, remote and path also matches.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::error::{RemoteError, Result};
use crate::rclone::ProcessRunner;

const CRONTAB_TIMEOUT: Duration = Duration::from_secs(10);
const ENTRY_MARKER: &str = "# added by rclone-mountctl:";

/// Line-oriented scheduler table, read and replaced as a whole
#[async_trait]
pub trait SchedulerTable: Send + Sync {
    async fn read(&self) -> Result<String>;
    async fn write(&self, content: &str) -> Result<()>;
}

/// The invoking user's crontab
#[derive(Debug, Clone, Default)]
pub struct CrontabTable;

#[async_trait]
impl SchedulerTable for CrontabTable {
    async fn read(&self) -> Result<String> {
        let output =
            ProcessRunner::run_program("crontab", &["-l"], None, Some(CRONTAB_TIMEOUT)).await?;
        if !output.success() {
            // "no crontab for <user>" also lands here
            return Err(RemoteError::Scheduler(format!(
                "crontab -l failed: {}",
                output.diagnostic()
            )));
        }
        let mut text = output.stdout_string();
        if !text.is_empty() {
            text.push('\n');
        }
        Ok(text)
    }

    async fn write(&self, content: &str) -> Result<()> {
        let output =
            ProcessRunner::run_program("crontab", &["-"], Some(content), Some(CRONTAB_TIMEOUT))
                .await?;
        if !output.success() {
            return Err(RemoteError::Scheduler(format!(
                "crontab - failed: {}",
                output.diagnostic()
            )));
        }
        Ok(())
    }
}

/// The `@reboot` entry that mounts one remote
#[derive(Debug, Clone)]
pub struct BootEntry {
    exe: PathBuf,
    remote: String,
    mount_point: PathBuf,
    config: Option<PathBuf>,
}

impl BootEntry {
    pub fn new(exe: impl AsRef<Path>, remote: &str, mount_point: impl AsRef<Path>) -> Self {
        Self {
            exe: exe.as_ref().to_path_buf(),
            remote: remote.to_string(),
            mount_point: mount_point.as_ref().to_path_buf(),
            config: None,
        }
    }

    pub fn with_config(mut self, config: Option<&Path>) -> Self {
        self.config = config.map(Path::to_path_buf);
        self
    }

    fn exe_name(&self) -> String {
        self.exe
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "rclone".to_string())
    }

    /// Full table line for this entry
    pub fn line(&self) -> String {
        let mut words = vec![
            self.exe.display().to_string(),
            "mount".to_string(),
            format!("{}:", self.remote),
            self.mount_point.display().to_string(),
            "--vfs-cache-mode".to_string(),
            "writes".to_string(),
            "--daemon".to_string(),
        ];
        if let Some(config) = &self.config {
            words.push("--config".to_string());
            words.push(config.display().to_string());
        }
        format!(
            "@reboot {} {} {}",
            shell_words::join(&words),
            ENTRY_MARKER,
            self.remote
        )
    }

    /// Whether `line` is a mount entry for this remote and path
    pub fn matches(&self, line: &str) -> bool {
        let trimmed = line.trim_start();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            return false;
        }
        let unquoted = trimmed.replace(['\'', '"'], "");
        let mount_point = self.mount_point.display().to_string();
        unquoted.contains(&format!("{} mount", self.exe_name()))
            && unquoted.contains(&format!("{}:", self.remote))
            && unquoted.contains(&mount_point)
    }
}

/// Keeps the scheduler table in line with the remotes that should mount at boot
pub struct BootPersistence {
    table: Arc<dyn SchedulerTable>,
    exe: PathBuf,
    config: Option<PathBuf>,
    supported: bool,
}

impl BootPersistence {
    pub fn new(table: Arc<dyn SchedulerTable>, exe: impl AsRef<Path>) -> Self {
        Self {
            table,
            exe: exe.as_ref().to_path_buf(),
            config: None,
            supported: !cfg!(windows),
        }
    }

    /// Config path baked into new entries
    pub fn with_config(mut self, config: impl AsRef<Path>) -> Self {
        self.config = Some(config.as_ref().to_path_buf());
        self
    }

    pub fn with_supported(mut self, supported: bool) -> Self {
        self.supported = supported;
        self
    }

    pub fn entry(&self, remote: &str, mount_point: &Path) -> BootEntry {
        BootEntry::new(&self.exe, remote, mount_point).with_config(self.config.as_deref())
    }

    /// Add an entry unless one already exists. Returns whether the table changed.
    pub async fn enable(&self, remote: &str, mount_point: &Path) -> Result<bool> {
        self.ensure_supported()?;
        let entry = self.entry(remote, mount_point);
        let table = self.read_table().await;

        if table.lines().any(|line| entry.matches(line)) {
            tracing::debug!("Boot entry for {} already present", remote);
            return Ok(false);
        }

        let mut content = table.trim_end().to_string();
        if !content.is_empty() {
            content.push('\n');
        }
        content.push_str(&entry.line());
        content.push('\n');

        self.table.write(&content).await?;
        tracing::info!("Enabled auto-mount for {}", remote);
        Ok(true)
    }

    /// Remove every entry for the remote. Returns whether anything was removed.
    pub async fn disable(&self, remote: &str, mount_point: &Path) -> Result<bool> {
        self.ensure_supported()?;
        let entry = self.entry(remote, mount_point);
        let table = self.read_table().await;

        if !table.lines().any(|line| entry.matches(line)) {
            return Ok(false);
        }

        let kept: Vec<&str> = table
            .lines()
            .filter(|line| !entry.matches(line) && !line.trim().is_empty())
            .collect();
        let mut content = kept.join("\n");
        if !content.is_empty() {
            content.push('\n');
        }

        self.table.write(&content).await?;
        tracing::info!("Disabled auto-mount for {}", remote);
        Ok(true)
    }

    pub async fn is_enabled(&self, remote: &str, mount_point: &Path) -> Result<bool> {
        self.ensure_supported()?;
        let entry = self.entry(remote, mount_point);
        Ok(self.read_table().await.lines().any(|line| entry.matches(line)))
    }

    /// Table text for checking many remotes against a single read
    pub async fn current_table(&self) -> Result<String> {
        self.ensure_supported()?;
        Ok(self.read_table().await)
    }

    fn ensure_supported(&self) -> Result<()> {
        if self.supported {
            Ok(())
        } else {
            Err(RemoteError::Unsupported("Auto-mount".to_string()))
        }
    }

    /// Unreadable tables count as empty
    async fn read_table(&self) -> String {
        match self.table.read().await {
            Ok(text) => text,
            Err(e) => {
                tracing::debug!("Treating scheduler table as empty: {}", e);
                String::new()
            }
        }
    }
}
