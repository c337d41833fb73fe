//! Rclone process runner
//!
//! Wraps spawning rclone (and the few system tools the engine needs) with
//! captured output, hard timeouts and detached mount processes. Windows builds
//! hide the console window for every child.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tokio::sync::watch;

use crate::error::{RemoteError, Result};

/// Windows-specific: CREATE_NO_WINDOW flag
#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x08000000;

/// Output from a foreground process
#[derive(Debug, Clone, Default)]
pub struct ProcessOutput {
    /// Standard output lines
    pub stdout: Vec<String>,
    /// Standard error lines
    pub stderr: Vec<String>,
    /// Exit status (-1 if killed or unknown)
    pub status: i32,
    /// Whether the process was killed due to timeout
    pub timed_out: bool,
}

impl ProcessOutput {
    /// Check if the command succeeded
    pub fn success(&self) -> bool {
        self.status == 0 && !self.timed_out
    }

    /// Get stdout as a single string
    pub fn stdout_string(&self) -> String {
        self.stdout.join("\n")
    }

    /// Get stderr as a single string
    pub fn stderr_string(&self) -> String {
        self.stderr.join("\n")
    }

    /// Best human-readable explanation of a failure
    pub fn diagnostic(&self) -> String {
        let stderr = self.stderr_string();
        if !stderr.trim().is_empty() {
            return stderr.trim().to_string();
        }
        let stdout = self.stdout_string();
        if !stdout.trim().is_empty() {
            return stdout.trim().to_string();
        }
        format!("exit code {}", self.status)
    }
}

/// Exit information of a detached process that has already terminated
#[derive(Debug, Clone)]
pub struct DetachedExit {
    /// Exit code, `None` if terminated by a signal
    pub code: Option<i32>,
    /// Everything the process wrote to stderr
    pub stderr: String,
}

/// Handle to a background process started by `spawn_detached`.
///
/// Dropping the handle does not stop the process.
#[derive(Debug)]
pub struct DetachedProcess {
    pid: Option<u32>,
    exit: watch::Receiver<Option<Option<i32>>>,
    stderr: Arc<Mutex<String>>,
}

impl DetachedProcess {
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Stderr captured so far
    pub fn stderr_text(&self) -> String {
        self.stderr
            .lock()
            .map(|s| s.trim().to_string())
            .unwrap_or_default()
    }

    /// Exit status and stderr if the process has already exited.
    ///
    /// Diagnostic only: a mount process that daemonizes exits 0 immediately.
    pub fn early_exit(&self) -> Option<DetachedExit> {
        let code = (*self.exit.borrow())?;
        Some(DetachedExit {
            code,
            stderr: self.stderr_text(),
        })
    }

    /// Ask the process group to stop. Best effort: a daemon that started its own
    /// session is not reached.
    pub async fn terminate(&self) {
        let Some(pid) = self.pid else {
            return;
        };
        if self.early_exit().is_some() {
            return;
        }

        #[cfg(unix)]
        {
            let Ok(pgid) = i32::try_from(pid) else {
                return;
            };
            // SAFETY: kill(2) with a negative pid signals the process group we created.
            let rc = unsafe { libc::kill(-pgid, libc::SIGTERM) };
            if rc != 0 {
                tracing::debug!("Failed to signal process group {}", pgid);
            } else {
                tracing::info!("Sent SIGTERM to mount process group {}", pgid);
            }
        }

        #[cfg(windows)]
        {
            let pid = pid.to_string();
            let result = ProcessRunner::run_program(
                "taskkill",
                &["/PID", pid.as_str(), "/T", "/F"],
                None,
                Some(Duration::from_secs(5)),
            )
            .await;
            if let Err(e) = result {
                tracing::debug!("taskkill for {} failed: {}", pid, e);
            }
        }
    }
}

/// Runs rclone processes with proper configuration
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    /// Path to rclone executable
    exe_path: PathBuf,
    /// Path to rclone config file (optional)
    config_path: Option<PathBuf>,
}

impl ProcessRunner {
    /// Create a new rclone runner
    pub fn new(exe_path: impl AsRef<Path>) -> Self {
        Self {
            exe_path: exe_path.as_ref().to_path_buf(),
            config_path: None,
        }
    }

    /// Set the config file path
    pub fn with_config(mut self, config_path: impl AsRef<Path>) -> Self {
        self.config_path = Some(config_path.as_ref().to_path_buf());
        self
    }

    /// Get the executable path
    pub fn exe_path(&self) -> &Path {
        &self.exe_path
    }

    pub fn config_path(&self) -> Option<&Path> {
        self.config_path.as_deref()
    }

    /// Run a rclone command and capture output
    pub async fn run<S: AsRef<OsStr>>(
        &self,
        args: &[S],
        timeout: Option<Duration>,
    ) -> Result<ProcessOutput> {
        execute(self.build_command(args), &self.program_name(), None, timeout).await
    }

    /// Run a rclone command feeding `input` on stdin
    pub async fn run_with_input<S: AsRef<OsStr>>(
        &self,
        args: &[S],
        input: &str,
        timeout: Option<Duration>,
    ) -> Result<ProcessOutput> {
        execute(
            self.build_command(args),
            &self.program_name(),
            Some(input),
            timeout,
        )
        .await
    }

    /// Run a system program (crontab, umount, ...) and capture output
    pub async fn run_program<S: AsRef<OsStr>>(
        program: impl AsRef<OsStr>,
        args: &[S],
        input: Option<&str>,
        timeout: Option<Duration>,
    ) -> Result<ProcessOutput> {
        let program = program.as_ref();
        let mut cmd = Command::new(program);
        cmd.args(args);
        hide_console(&mut cmd);
        execute(cmd, &program.to_string_lossy(), input, timeout).await
    }

    /// Start a long-lived rclone process without waiting for it.
    ///
    /// Only a failure to start is an error. Exit codes are diagnostics, see
    /// [`DetachedProcess::early_exit`].
    pub fn spawn_detached<S: AsRef<OsStr>>(&self, args: &[S]) -> Result<DetachedProcess> {
        let mut cmd = self.build_command(args);
        cmd.stdout(Stdio::null())
            .stderr(Stdio::piped())
            .stdin(Stdio::null())
            .kill_on_drop(false);

        // Own process group so cancellation can signal everything it started
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = cmd.spawn().map_err(|source| RemoteError::SpawnFailed {
            program: self.program_name(),
            source,
        })?;
        let pid = child.id();
        tracing::debug!("Spawned detached {} (pid {:?})", self.program_name(), pid);

        let stderr_buf = Arc::new(Mutex::new(String::new()));
        if let Some(mut stderr) = child.stderr.take() {
            let buf = Arc::clone(&stderr_buf);
            tokio::spawn(async move {
                let mut chunk = [0u8; 4096];
                loop {
                    match stderr.read(&mut chunk).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => {
                            if let Ok(mut text) = buf.lock() {
                                text.push_str(&String::from_utf8_lossy(&chunk[..n]));
                            }
                        }
                    }
                }
            });
        }

        let (tx, rx) = watch::channel(None);
        tokio::spawn(async move {
            let code = child.wait().await.ok().and_then(|s| s.code());
            let _ = tx.send(Some(code));
        });

        Ok(DetachedProcess {
            pid,
            exit: rx,
            stderr: stderr_buf,
        })
    }

    /// Get rclone version
    pub async fn version(&self) -> Result<String> {
        let output = self
            .run(&["--version"], Some(Duration::from_secs(10)))
            .await?;
        if !output.success() {
            return Err(RemoteError::Validation(format!(
                "rclone --version failed: {}",
                output.diagnostic()
            )));
        }
        // First line usually contains "rclone vX.Y.Z"
        Ok(output.stdout.first().cloned().unwrap_or_default())
    }

    /// Whether the executable starts and answers `--version`
    pub async fn is_installed(&self) -> bool {
        self.version().await.is_ok()
    }

    /// Obscure a secret the way rclone stores passwords.
    ///
    /// The secret is passed on stdin so it never shows up in the process table.
    pub async fn obscure(&self, secret: &str) -> Result<String> {
        let output = self
            .run_with_input(&["obscure", "-"], secret, Some(Duration::from_secs(10)))
            .await?;
        if !output.success() {
            return Err(RemoteError::Validation(format!(
                "Failed to obscure password: {}",
                output.diagnostic()
            )));
        }
        let obscured = output.stdout_string().trim().to_string();
        if obscured.is_empty() {
            return Err(RemoteError::Validation(
                "rclone obscure returned no output".to_string(),
            ));
        }
        Ok(obscured)
    }

    fn program_name(&self) -> String {
        self.exe_path.display().to_string()
    }

    /// Build the command with appropriate flags
    fn build_command<S: AsRef<OsStr>>(&self, args: &[S]) -> Command {
        let mut cmd = Command::new(&self.exe_path);

        // Add config flag if set
        if let Some(ref config) = self.config_path {
            cmd.arg("--config").arg(config);
        }

        cmd.args(args);
        hide_console(&mut cmd);
        cmd
    }
}

fn hide_console(cmd: &mut Command) {
    #[cfg(windows)]
    cmd.creation_flags(CREATE_NO_WINDOW);
    #[cfg(not(windows))]
    let _ = cmd;
}

fn split_lines(bytes: &[u8]) -> Vec<String> {
    String::from_utf8_lossy(bytes)
        .lines()
        .map(String::from)
        .collect()
}

/// Spawn `cmd`, feed optional stdin, and wait for it under an optional timeout.
///
/// On timeout the child is killed and the result is marked `timed_out`.
async fn execute(
    mut cmd: Command,
    program: &str,
    input: Option<&str>,
    timeout: Option<Duration>,
) -> Result<ProcessOutput> {
    cmd.stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .stdin(if input.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .kill_on_drop(true);

    let mut child = cmd.spawn().map_err(|source| RemoteError::SpawnFailed {
        program: program.to_string(),
        source,
    })?;

    if let (Some(input), Some(mut stdin)) = (input, child.stdin.take()) {
        let data = input.as_bytes().to_vec();
        tokio::spawn(async move {
            let _ = stdin.write_all(&data).await;
            let _ = stdin.shutdown().await;
        });
    }

    let wait = child.wait_with_output();
    let output = match timeout {
        Some(limit) => match tokio::time::timeout(limit, wait).await {
            Ok(output) => output?,
            Err(_) => {
                // The dropped future kills the child.
                tracing::warn!("{} timed out after {}ms", program, limit.as_millis());
                return Ok(ProcessOutput {
                    status: -1,
                    timed_out: true,
                    ..ProcessOutput::default()
                });
            }
        },
        None => wait.await?,
    };

    Ok(ProcessOutput {
        stdout: split_lines(&output.stdout),
        stderr: split_lines(&output.stderr),
        status: output.status.code().unwrap_or(-1),
        timed_out: false,
    })
}
