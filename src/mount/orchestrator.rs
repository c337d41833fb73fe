//! Mount lifecycle
//!
//! Mount state is never remembered: every decision starts from a fresh probe and
//! every mount or unmount is confirmed by probing again afterwards.

use serde::Serialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::{sleep, sleep_until, Instant};
use tokio_util::sync::CancellationToken;

use super::platform::{DirPolicy, PlatformProfile};
use super::probe::MountProbe;
use crate::error::{RemoteError, Result};
use crate::rclone::{ConfigStore, DetachedProcess, ProcessRunner};
use crate::utils::path::mount_dir_name;

/// Observed mount state of a remote
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MountState {
    Mounted,
    Unmounted,
}

/// Outcome of a mount or unmount call that ran to completion
#[derive(Debug, Clone, Serialize)]
pub struct MountReport {
    pub remote: String,
    pub mount_point: PathBuf,
    pub state: MountState,
    /// Whether the requested transition happened (or was already in place for mounts)
    pub success: bool,
    pub message: String,
}

/// Names with an operation currently running
#[derive(Debug, Clone, Default)]
struct InFlight(Arc<Mutex<HashSet<String>>>);

impl InFlight {
    fn acquire(&self, name: &str) -> Result<InFlightGuard> {
        let mut names = self.0.lock().unwrap_or_else(|e| e.into_inner());
        if !names.insert(name.to_string()) {
            return Err(RemoteError::OperationInProgress(name.to_string()));
        }
        Ok(InFlightGuard {
            set: Arc::clone(&self.0),
            name: name.to_string(),
        })
    }
}

struct InFlightGuard {
    set: Arc<Mutex<HashSet<String>>>,
    name: String,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        let mut names = self.set.lock().unwrap_or_else(|e| e.into_inner());
        names.remove(&self.name);
    }
}

enum Raced<T> {
    Done(T),
    Interrupted(RemoteError),
}

/// Mounts, unmounts and tests remotes defined in a config store
pub struct MountOrchestrator {
    store: ConfigStore,
    runner: ProcessRunner,
    probe: Arc<dyn MountProbe>,
    profile: PlatformProfile,
    mount_base: PathBuf,
    in_flight: InFlight,
}

impl MountOrchestrator {
    pub fn new(
        store: ConfigStore,
        runner: ProcessRunner,
        probe: Arc<dyn MountProbe>,
        mount_base: impl AsRef<Path>,
    ) -> Self {
        Self {
            store,
            runner,
            probe,
            profile: PlatformProfile::current(),
            mount_base: mount_base.as_ref().to_path_buf(),
            in_flight: InFlight::default(),
        }
    }

    pub fn with_profile(mut self, profile: PlatformProfile) -> Self {
        self.profile = profile;
        self
    }

    pub fn store(&self) -> &ConfigStore {
        &self.store
    }

    pub fn runner(&self) -> &ProcessRunner {
        &self.runner
    }

    pub fn profile(&self) -> &PlatformProfile {
        &self.profile
    }

    pub fn mount_base(&self) -> &Path {
        &self.mount_base
    }

    /// Directory a remote is mounted on
    pub fn mount_point_for(&self, name: &str) -> PathBuf {
        self.mount_base.join(mount_dir_name(name))
    }

    /// Current state according to the probe
    pub async fn mount_state(&self, name: &str) -> MountState {
        if self.probe.is_mounted(&self.mount_point_for(name)).await {
            MountState::Mounted
        } else {
            MountState::Unmounted
        }
    }

    /// Mount `name` and confirm it with a probe after the settle interval.
    ///
    /// `cancel` and `timeout` stop the orchestration and signal the spawned
    /// process group; they never decide the reported mount state.
    pub async fn mount(
        &self,
        name: &str,
        cancel: &CancellationToken,
        timeout: Duration,
    ) -> Result<MountReport> {
        let _guard = self.in_flight.acquire(name)?;
        let deadline = Instant::now() + timeout;

        // Must exist before anything touches the disk or spawns
        self.store.get_remote(name).await?;

        let mount_point = self.mount_point_for(name);
        if self.probe.is_mounted(&mount_point).await {
            tracing::info!("{} already mounted at {}", name, mount_point.display());
            return Ok(MountReport {
                remote: name.to_string(),
                message: format!("{} is already mounted at {}", name, mount_point.display()),
                mount_point,
                state: MountState::Mounted,
                success: true,
            });
        }

        let operation = format!("Mount of '{}'", name);
        if cancel.is_cancelled() {
            return Err(RemoteError::Cancelled(operation));
        }

        self.prepare_mount_dir(&mount_point).await?;

        let args = self.profile.mount_args(name, &mount_point);
        tracing::info!("Mounting {}: at {}", name, mount_point.display());
        let process = self.runner.spawn_detached(&args)?;

        let raced = tokio::select! {
            _ = cancel.cancelled() => Raced::Interrupted(RemoteError::Cancelled(operation)),
            _ = sleep_until(deadline) => Raced::Interrupted(RemoteError::TimedOut {
                operation,
                elapsed: timeout,
            }),
            mounted = self.settle_and_probe(&mount_point) => Raced::Done(mounted),
        };

        match raced {
            Raced::Done(true) => {
                tracing::info!("Mounted {} at {}", name, mount_point.display());
                Ok(MountReport {
                    remote: name.to_string(),
                    message: format!("Successfully mounted {} at {}", name, mount_point.display()),
                    mount_point,
                    state: MountState::Mounted,
                    success: true,
                })
            }
            Raced::Done(false) => {
                let detail = failure_detail(&process);
                tracing::warn!("Mount of {} not detected: {}", name, detail);
                Err(RemoteError::MountVerificationFailed {
                    path: mount_point,
                    detail,
                })
            }
            Raced::Interrupted(err) => {
                tracing::warn!("{}", err);
                process.terminate().await;
                Err(err)
            }
        }
    }

    /// Unmount `name` with the platform's unmount commands, then confirm by probing.
    ///
    /// A remote that is not mounted is not an error: the report says so with
    /// `success == false`, after removing a stale empty mount directory.
    pub async fn unmount(
        &self,
        name: &str,
        cancel: &CancellationToken,
        timeout: Duration,
    ) -> Result<MountReport> {
        let _guard = self.in_flight.acquire(name)?;
        let deadline = Instant::now() + timeout;
        let mount_point = self.mount_point_for(name);

        if !self.probe.is_mounted(&mount_point).await {
            remove_dir_if_empty(&mount_point).await;
            return Ok(MountReport {
                remote: name.to_string(),
                message: format!("{} is not mounted", name),
                mount_point,
                state: MountState::Unmounted,
                success: false,
            });
        }

        let operation = format!("Unmount of '{}'", name);
        let raced = tokio::select! {
            _ = cancel.cancelled() => Raced::Interrupted(RemoteError::Cancelled(operation)),
            _ = sleep_until(deadline) => Raced::Interrupted(RemoteError::TimedOut {
                operation,
                elapsed: timeout,
            }),
            detail = self.run_unmount_commands(&mount_point, deadline) => Raced::Done(detail),
        };
        let last_error = match raced {
            Raced::Done(detail) => detail,
            Raced::Interrupted(err) => {
                tracing::warn!("{}", err);
                return Err(err);
            }
        };

        remove_dir_if_empty(&mount_point).await;

        if self.probe.is_mounted(&mount_point).await {
            return Err(RemoteError::UnmountFailed {
                path: mount_point,
                detail: last_error.unwrap_or_else(|| "still mounted".to_string()),
            });
        }

        tracing::info!("Unmounted {} from {}", name, mount_point.display());
        Ok(MountReport {
            remote: name.to_string(),
            message: format!("Successfully unmounted {}", name),
            mount_point,
            state: MountState::Unmounted,
            success: true,
        })
    }

    /// List the top level of the remote under a hard timeout. Returns the latency.
    pub async fn test_connection(&self, name: &str, timeout: Duration) -> Result<Duration> {
        let _guard = self.in_flight.acquire(name)?;
        self.store.get_remote(name).await?;

        let remote = format!("{}:", name);
        let started = Instant::now();
        let output = self
            .runner
            .run(&["lsf", remote.as_str(), "--max-depth", "1"], Some(timeout))
            .await?;

        if output.timed_out {
            return Err(RemoteError::TimedOut {
                operation: format!("Connection test for '{}'", name),
                elapsed: timeout,
            });
        }
        if !output.success() {
            return Err(RemoteError::ConnectionFailed {
                remote: name.to_string(),
                detail: output.diagnostic(),
            });
        }

        let latency = started.elapsed();
        tracing::info!("Connection to {} ok ({}ms)", name, latency.as_millis());
        Ok(latency)
    }

    async fn prepare_mount_dir(&self, mount_point: &Path) -> Result<()> {
        tokio::fs::create_dir_all(&self.mount_base).await?;
        match self.profile.dir_policy {
            DirPolicy::CreateIfMissing => {
                tokio::fs::create_dir_all(mount_point).await?;
            }
            DirPolicy::RemoveIfPresent => {
                if tokio::fs::symlink_metadata(mount_point).await.is_ok()
                    && tokio::fs::remove_dir(mount_point).await.is_err()
                {
                    // Leftovers from a crashed mount; the mount fails anyway if this does.
                    if let Err(e) = tokio::fs::remove_dir_all(mount_point).await {
                        tracing::warn!("Could not clear {}: {}", mount_point.display(), e);
                    }
                }
            }
        }
        Ok(())
    }

    async fn settle_and_probe(&self, mount_point: &Path) -> bool {
        sleep(self.profile.settle_interval).await;
        self.probe.is_mounted(mount_point).await
    }

    /// Try each unmount command until one exits 0. Returns the last failure, if any.
    async fn run_unmount_commands(&self, mount_point: &Path, deadline: Instant) -> Option<String> {
        let mut last_error = None;
        for command in &self.profile.unmount_commands {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let args = command.args_for(mount_point);
            tracing::debug!("Running {} for {}", command.program, mount_point.display());
            match ProcessRunner::run_program(&command.program, &args, None, Some(remaining)).await
            {
                Ok(output) if output.success() => return None,
                Ok(output) => last_error = Some(output.diagnostic()),
                Err(e) => last_error = Some(e.to_string()),
            }
        }
        last_error
    }
}

fn failure_detail(process: &DetachedProcess) -> String {
    match process.early_exit() {
        Some(exit) if !exit.stderr.is_empty() => match exit.code {
            Some(code) => format!("rclone exited with code {}: {}", code, exit.stderr),
            None => format!("rclone was terminated: {}", exit.stderr),
        },
        Some(exit) => match exit.code {
            Some(0) => "rclone exited cleanly but no mount appeared".to_string(),
            Some(code) => format!("rclone exited with code {}", code),
            None => "rclone was terminated by a signal".to_string(),
        },
        None => {
            let stderr = process.stderr_text();
            if stderr.is_empty() {
                "mount point not detected; rclone is still running".to_string()
            } else {
                stderr
            }
        }
    }
}

async fn remove_dir_if_empty(path: &Path) {
    // remove_dir refuses non-empty directories, which is exactly the guard we want.
    match tokio::fs::remove_dir(path).await {
        Ok(()) => tracing::debug!("Removed mount directory {}", path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::debug!("Left {} in place: {}", path.display(), e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct AlwaysMounted;

    #[async_trait]
    impl MountProbe for AlwaysMounted {
        async fn is_mounted(&self, _path: &Path) -> bool {
            true
        }
    }

    fn orchestrator(dir: &Path) -> MountOrchestrator {
        let config = dir.join("rclone.conf");
        std::fs::write(&config, "[drive]\ntype = drive\n").unwrap();
        MountOrchestrator::new(
            ConfigStore::new(&config),
            ProcessRunner::new(dir.join("no-such-rclone")),
            Arc::new(AlwaysMounted),
            dir.join("mnt"),
        )
        .with_profile(PlatformProfile::linux().with_settle_interval(Duration::from_millis(10)))
    }

    #[test]
    fn test_in_flight_rejects_second_holder() {
        let in_flight = InFlight::default();
        let guard = in_flight.acquire("drive").unwrap();
        assert!(matches!(
            in_flight.acquire("drive"),
            Err(RemoteError::OperationInProgress(_))
        ));
        assert!(in_flight.acquire("box").is_ok());
        drop(guard);
        assert!(in_flight.acquire("drive").is_ok());
    }

    #[test]
    fn test_mount_point_uses_safe_name() {
        let dir = tempfile::tempdir().unwrap();
        let orch = orchestrator(dir.path());
        assert_eq!(orch.mount_point_for("drive"), dir.path().join("mnt").join("drive"));
        assert_eq!(orch.mount_point_for("a/b"), dir.path().join("mnt").join("a_b"));
    }

    #[tokio::test]
    async fn test_already_mounted_skips_spawn() {
        // The runner points at a missing binary, so any spawn would fail.
        let dir = tempfile::tempdir().unwrap();
        let orch = orchestrator(dir.path());
        let report = orch
            .mount("drive", &CancellationToken::new(), Duration::from_secs(5))
            .await
            .unwrap();
        assert!(report.success);
        assert_eq!(report.state, MountState::Mounted);
        assert!(report.message.contains("already mounted"));
    }

    #[tokio::test]
    async fn test_mount_unknown_remote_has_no_side_effects() {
        let dir = tempfile::tempdir().unwrap();
        let orch = orchestrator(dir.path());
        let err = orch
            .mount("ghost", &CancellationToken::new(), Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, RemoteError::RemoteNotFound(ref n) if n == "ghost"));
        assert!(!dir.path().join("mnt").exists());
    }

    #[tokio::test]
    async fn test_test_connection_unknown_remote() {
        let dir = tempfile::tempdir().unwrap();
        let orch = orchestrator(dir.path());
        let err = orch
            .test_connection("ghost", Duration::from_millis(10))
            .await
            .unwrap_err();
        assert!(matches!(err, RemoteError::RemoteNotFound(_)));
    }
}
