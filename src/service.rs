//! Operations surface
//!
//! Everything a front end needs, expressed per remote name. Mutating and
//! external operations report a [`CommandResult`] instead of failing, so callers
//! only ever handle errors from plain reads.

use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::boot::{BootPersistence, CrontabTable, SchedulerTable};
use crate::error::{RemoteError, Result};
use crate::mount::{MountOrchestrator, MountProbe, MountState, PlatformProfile, SystemMountProbe};
use crate::plugins::{self, PluginCatalog, PluginDescriptor, REMOTE_NAME_FIELD};
use crate::rclone::{ConfigStore, RemoteDefinition, RemoteProperties};
use crate::settings::Settings;

/// Outcome of one operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandResult {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
}

impl CommandResult {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            latency_ms: None,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            latency_ms: None,
        }
    }
}

impl From<RemoteError> for CommandResult {
    fn from(err: RemoteError) -> Self {
        CommandResult::failed(err.to_string())
    }
}

/// One row of the remote listing
#[derive(Debug, Clone, Serialize)]
pub struct RemoteSummary {
    pub name: String,
    #[serde(rename = "type")]
    pub remote_type: String,
    pub mounted: bool,
    pub auto_mount: bool,
    pub mount_point: PathBuf,
    /// The remote's plugin is flagged as holding credentials
    pub secure: bool,
}

pub struct RemoteService {
    settings: Settings,
    orchestrator: MountOrchestrator,
    boot: BootPersistence,
    catalog: PluginCatalog,
}

impl RemoteService {
    /// Service backed by the real mount table and the user's crontab
    pub async fn new(settings: Settings) -> Self {
        let catalog = PluginCatalog::discover(&settings.plugin_dirs).await;
        Self::with_parts(
            settings,
            Arc::new(SystemMountProbe::new()),
            Arc::new(CrontabTable),
            catalog,
            PlatformProfile::current(),
        )
    }

    pub fn with_parts(
        settings: Settings,
        probe: Arc<dyn MountProbe>,
        table: Arc<dyn SchedulerTable>,
        catalog: PluginCatalog,
        profile: PlatformProfile,
    ) -> Self {
        let boot = BootPersistence::new(table, &settings.rclone_path)
            .with_config(&settings.config_path)
            .with_supported(profile.supports_scheduler);
        let orchestrator = MountOrchestrator::new(
            ConfigStore::new(&settings.config_path),
            settings.runner(),
            probe,
            &settings.mount_base,
        )
        .with_profile(profile);
        Self {
            settings,
            orchestrator,
            boot,
            catalog,
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn orchestrator(&self) -> &MountOrchestrator {
        &self.orchestrator
    }

    fn store(&self) -> &ConfigStore {
        self.orchestrator.store()
    }

    /// Every remote with its live mount state and auto-mount flag
    pub async fn list_remotes(&self) -> Result<Vec<RemoteSummary>> {
        let remotes = self.store().list_remotes().await?;
        let table = self.boot.current_table().await.ok();

        let mut summaries = Vec::with_capacity(remotes.len());
        for remote in remotes {
            let mount_point = self.orchestrator.mount_point_for(&remote.name);
            let mounted = self.orchestrator.mount_state(&remote.name).await == MountState::Mounted;
            let entry = self.boot.entry(&remote.name, &mount_point);
            let auto_mount = table
                .as_deref()
                .is_some_and(|t| t.lines().any(|line| entry.matches(line)));
            let secure = self
                .catalog
                .find(&remote.remote_type)
                .is_some_and(|p| p.secure);
            summaries.push(RemoteSummary {
                name: remote.name,
                remote_type: remote.remote_type,
                mounted,
                auto_mount,
                mount_point,
                secure,
            });
        }
        Ok(summaries)
    }

    pub async fn mount(&self, name: &str, cancel: &CancellationToken) -> CommandResult {
        match self
            .orchestrator
            .mount(name, cancel, self.settings.mount_timeout)
            .await
        {
            Ok(report) => CommandResult {
                success: report.success,
                message: report.message,
                latency_ms: None,
            },
            Err(e) => e.into(),
        }
    }

    pub async fn unmount(&self, name: &str, cancel: &CancellationToken) -> CommandResult {
        match self
            .orchestrator
            .unmount(name, cancel, self.settings.mount_timeout)
            .await
        {
            Ok(report) => CommandResult {
                success: report.success,
                message: report.message,
                latency_ms: None,
            },
            Err(e) => e.into(),
        }
    }

    /// Quick listing of the remote; `timeout` defaults to the configured test timeout
    pub async fn test_connection(&self, name: &str, timeout: Option<Duration>) -> CommandResult {
        let timeout = timeout.unwrap_or(self.settings.test_timeout);
        match self.orchestrator.test_connection(name, timeout).await {
            Ok(latency) => {
                let ms = u64::try_from(latency.as_millis()).unwrap_or(u64::MAX);
                CommandResult {
                    success: true,
                    message: format!("Connection to {} successful ({}ms)", name, ms),
                    latency_ms: Some(ms),
                }
            }
            Err(e) => e.into(),
        }
    }

    /// Create a remote of `plugin_name`'s type; `values["remote_name"]` names it
    pub async fn add_remote(
        &self,
        plugin_name: &str,
        values: &BTreeMap<String, String>,
    ) -> CommandResult {
        match self.try_add_remote(plugin_name, values).await {
            Ok(name) => CommandResult::ok(format!("Added remote {}", name)),
            Err(e) => e.into(),
        }
    }

    async fn try_add_remote(
        &self,
        plugin_name: &str,
        values: &BTreeMap<String, String>,
    ) -> Result<String> {
        let plugin = self.catalog.get(plugin_name)?;
        let mut definition = plugins::build_definition(plugin, values, None)?;
        if self.store().has_remote(&definition.name).await? {
            return Err(RemoteError::Validation(format!(
                "Remote '{}' already exists",
                definition.name
            )));
        }
        self.obscure_passwords(plugin, values, &mut definition).await?;
        self.store().append_remote(&definition).await?;
        Ok(definition.name)
    }

    /// Rewrite `name` from submitted values in one atomic config write.
    ///
    /// Omitted fields keep their stored values, an empty password keeps the
    /// stored password, and a different `remote_name` renames the remote.
    pub async fn edit_remote(
        &self,
        name: &str,
        plugin_name: Option<&str>,
        values: &BTreeMap<String, String>,
    ) -> CommandResult {
        match self.try_edit_remote(name, plugin_name, values).await {
            Ok(new_name) if new_name == name => CommandResult::ok(format!("Updated remote {}", name)),
            Ok(new_name) => CommandResult::ok(format!("Updated remote {} (now {})", name, new_name)),
            Err(e) => e.into(),
        }
    }

    async fn try_edit_remote(
        &self,
        name: &str,
        plugin_name: Option<&str>,
        values: &BTreeMap<String, String>,
    ) -> Result<String> {
        let existing = self.store().get_remote_properties(name).await?;
        let bare;
        let plugin = match plugin_name {
            Some(p) => self.catalog.get(p)?,
            // Backends without a plugin can still have their options edited
            None => {
                let remote_type = existing
                    .get("type")
                    .ok_or_else(|| RemoteError::RemoteNotFound(name.to_string()))?;
                match self.catalog.find(remote_type) {
                    Some(p) => p,
                    None => {
                        bare = PluginDescriptor::bare(remote_type);
                        &bare
                    }
                }
            }
        };

        let mut values = values.clone();
        values
            .entry(REMOTE_NAME_FIELD.to_string())
            .or_insert_with(|| name.to_string());

        let mut definition = plugins::build_definition(plugin, &values, Some(&existing))?;
        self.obscure_passwords(plugin, &values, &mut definition).await?;
        self.store().replace_remote(name, &definition).await?;

        if definition.name != name {
            self.move_auto_mount(name, &definition.name).await;
        }
        Ok(definition.name)
    }

    /// Remove the remote and any auto-mount entry pointing at it.
    ///
    /// A name with no section is a successful no-op.
    pub async fn delete_remote(&self, name: &str) -> CommandResult {
        match self.store().delete_remote(name).await {
            Ok(true) => {
                let mount_point = self.orchestrator.mount_point_for(name);
                if let Ok(true) = self.boot.disable(name, &mount_point).await {
                    tracing::info!("Dropped auto-mount entry of deleted remote {}", name);
                }
                CommandResult::ok(format!("Deleted remote {}", name))
            }
            Ok(false) => CommandResult::ok(format!("Remote {} is not present, nothing to delete", name)),
            Err(e) => e.into(),
        }
    }

    /// All stored key/value pairs of the remote, `type` included
    pub async fn get_remote_config(&self, name: &str) -> Result<RemoteProperties> {
        self.store().get_remote_properties(name).await
    }

    pub async fn enable_auto_mount(&self, name: &str) -> CommandResult {
        if let Err(e) = self.store().get_remote(name).await {
            return e.into();
        }
        let mount_point = self.orchestrator.mount_point_for(name);
        match self.boot.enable(name, &mount_point).await {
            Ok(true) => CommandResult::ok(format!("Enabled auto-mount for {}", name)),
            Ok(false) => CommandResult::ok(format!("{} is already enabled for auto-mount", name)),
            Err(e) => e.into(),
        }
    }

    pub async fn disable_auto_mount(&self, name: &str) -> CommandResult {
        let mount_point = self.orchestrator.mount_point_for(name);
        match self.boot.disable(name, &mount_point).await {
            Ok(true) => CommandResult::ok(format!("Disabled auto-mount for {}", name)),
            Ok(false) => CommandResult::ok(format!("{} is not enabled for auto-mount", name)),
            Err(e) => e.into(),
        }
    }

    pub async fn auto_mount_status(&self, name: &str) -> Result<bool> {
        let mount_point = self.orchestrator.mount_point_for(name);
        self.boot.is_enabled(name, &mount_point).await
    }

    pub fn plugins(&self) -> &[PluginDescriptor] {
        self.catalog.plugins()
    }

    pub async fn rclone_installed(&self) -> bool {
        self.orchestrator.runner().is_installed().await
    }

    async fn obscure_passwords(
        &self,
        plugin: &PluginDescriptor,
        values: &BTreeMap<String, String>,
        definition: &mut RemoteDefinition,
    ) -> Result<()> {
        for key in plugins::fields_to_obscure(plugin, values) {
            let Some(plain) = definition.properties.get(&key).map(str::to_string) else {
                continue;
            };
            let obscured = self.orchestrator.runner().obscure(&plain).await?;
            definition.properties.insert(key, obscured);
        }
        Ok(())
    }

    /// Keep an auto-mount entry attached to a renamed remote
    async fn move_auto_mount(&self, old_name: &str, new_name: &str) {
        let old_point = self.orchestrator.mount_point_for(old_name);
        if !matches!(self.boot.is_enabled(old_name, &old_point).await, Ok(true)) {
            return;
        }
        let new_point = self.orchestrator.mount_point_for(new_name);
        let moved = async {
            self.boot.disable(old_name, &old_point).await?;
            self.boot.enable(new_name, &new_point).await
        };
        if let Err(e) = moved.await {
            tracing::warn!(
                "Could not move auto-mount entry from {} to {}: {}",
                old_name,
                new_name,
                e
            );
        }
    }
}
