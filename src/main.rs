//! rclone-mountctl: manage and mount rclone remotes
//!
//! Thin CLI over `RemoteService`. Logs go to stderr so `--json` output on
//! stdout stays machine-readable.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rclone_mountctl::plugins::REMOTE_NAME_FIELD;
use rclone_mountctl::{CommandResult, RemoteService, Settings};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging();

    let service = RemoteService::new(settings_from(&cli)).await;

    // First Ctrl+C stops the running operation, a second one exits
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        ctrlc::set_handler(move || {
            if cancel.is_cancelled() {
                std::process::exit(130);
            }
            cancel.cancel();
        })
        .context("Failed to install Ctrl+C handler")?;
    }

    let success = run(&cli, &service, &cancel).await?;
    if !success {
        std::process::exit(1);
    }
    Ok(())
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("rclone_mountctl=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn settings_from(cli: &Cli) -> Settings {
    let mut settings = Settings::new();
    if let Some(config) = &cli.config {
        settings = settings.with_config(config);
    }
    if let Some(rclone) = &cli.rclone {
        settings = settings.with_rclone(rclone);
    }
    if let Some(base) = &cli.mount_base {
        settings = settings.with_mount_base(base);
    }
    if !cli.plugins_dir.is_empty() {
        settings = settings.with_plugin_dirs(cli.plugins_dir.clone());
    }
    if let Some(ms) = cli.mount_timeout_ms {
        settings = settings.with_mount_timeout(Duration::from_millis(ms));
    }
    if let Some(ms) = cli.test_timeout_ms {
        settings = settings.with_test_timeout(Duration::from_millis(ms));
    }
    settings
}

/// Execute the subcommand. Returns whether it succeeded.
async fn run(cli: &Cli, service: &RemoteService, cancel: &CancellationToken) -> Result<bool> {
    let result = match &cli.command {
        Command::List => {
            let remotes = service.list_remotes().await?;
            if cli.json {
                print_json(&remotes)?;
            } else if remotes.is_empty() {
                println!("No remotes in {}", service.settings().config_path.display());
            } else {
                println!(
                    "{:<20} {:<12} {:<8} {:<6} MOUNT POINT",
                    "NAME", "TYPE", "MOUNTED", "BOOT"
                );
                for remote in &remotes {
                    println!(
                        "{:<20} {:<12} {:<8} {:<6} {}",
                        remote.name,
                        remote.remote_type,
                        yes_no(remote.mounted),
                        yes_no(remote.auto_mount),
                        remote.mount_point.display()
                    );
                }
            }
            return Ok(true);
        }
        Command::Show { name } => {
            let properties = service.get_remote_config(name).await?;
            if cli.json {
                print_json(&properties)?;
            } else {
                println!("[{}]", name);
                for (key, value) in properties.iter() {
                    println!("{} = {}", key, value);
                }
            }
            return Ok(true);
        }
        Command::Plugins => {
            let plugins = service.plugins();
            if cli.json {
                print_json(&plugins)?;
            } else if plugins.is_empty() {
                println!("No plugins found in:");
                for dir in &service.settings().plugin_dirs {
                    println!("  {}", dir.display());
                }
            } else {
                for plugin in plugins {
                    let fields: Vec<&str> = plugin.all_fields().map(|f| f.name.as_str()).collect();
                    println!("{:<16} {:<24} {}", plugin.name, plugin.label(), fields.join(", "));
                }
            }
            return Ok(true);
        }
        Command::Check => {
            let installed = service.rclone_installed().await;
            let settings = service.settings();
            let config_exists = tokio::fs::metadata(&settings.config_path).await.is_ok();
            if cli.json {
                print_json(&serde_json::json!({
                    "rclone": settings.rclone_path,
                    "rclone_installed": installed,
                    "config": settings.config_path,
                    "config_exists": config_exists,
                    "mount_base": settings.mount_base,
                }))?;
            } else {
                println!(
                    "rclone:     {} ({})",
                    settings.rclone_path.display(),
                    if installed { "ok" } else { "not working" }
                );
                println!(
                    "config:     {} ({})",
                    settings.config_path.display(),
                    if config_exists { "found" } else { "missing" }
                );
                println!("mount base: {}", settings.mount_base.display());
            }
            return Ok(installed);
        }
        Command::Mount { name } => service.mount(name, cancel).await,
        Command::Unmount { name } => service.unmount(name, cancel).await,
        Command::Test { name } => service.test_connection(name, None).await,
        Command::Add { plugin, name, set } => {
            let mut values: BTreeMap<String, String> = set.iter().cloned().collect();
            values.insert(REMOTE_NAME_FIELD.to_string(), name.clone());
            service.add_remote(plugin, &values).await
        }
        Command::Edit {
            name,
            plugin,
            rename,
            set,
        } => {
            let mut values: BTreeMap<String, String> = set.iter().cloned().collect();
            if let Some(new_name) = rename {
                values.insert(REMOTE_NAME_FIELD.to_string(), new_name.clone());
            }
            service.edit_remote(name, plugin.as_deref(), &values).await
        }
        Command::Delete { name } => service.delete_remote(name).await,
        Command::Automount { action } => match action {
            AutomountAction::Enable { name } => service.enable_auto_mount(name).await,
            AutomountAction::Disable { name } => service.disable_auto_mount(name).await,
            AutomountAction::Status { name } => {
                let enabled = service.auto_mount_status(name).await?;
                if cli.json {
                    print_json(&serde_json::json!({ "name": name, "auto_mount": enabled }))?;
                } else {
                    let state = if enabled { "enabled" } else { "disabled" };
                    println!("{}: auto-mount {}", name, state);
                }
                return Ok(true);
            }
        },
    };

    report(cli.json, &result)?;
    Ok(result.success)
}

fn report(json: bool, result: &CommandResult) -> Result<()> {
    if json {
        print_json(result)
    } else {
        if result.success {
            println!("{}", result.message);
        } else {
            eprintln!("Error: {}", result.message);
        }
        Ok(())
    }
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn yes_no(value: bool) -> &'static str {
    if value {
        "yes"
    } else {
        "no"
    }
}

fn parse_key_val(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{}'", s))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("empty key in '{}'", s));
    }
    Ok((key.to_string(), value.to_string()))
}

/// CLI arguments
#[derive(Parser, Debug)]
#[command(author, version, about = "Manage and mount rclone remotes")]
struct Cli {
    /// rclone config file
    #[arg(long, global = true, env = "RCLONE_CONFIG")]
    config: Option<PathBuf>,

    /// rclone executable (name on PATH or full path)
    #[arg(long, global = true, env = "RCLONE_MOUNTCTL_RCLONE")]
    rclone: Option<PathBuf>,

    /// Directory holding one mount point per remote. Defaults to ~/mnt
    #[arg(long, global = true)]
    mount_base: Option<PathBuf>,

    /// Plugin directory (repeatable); replaces the default search path
    #[arg(long = "plugins-dir", global = true)]
    plugins_dir: Vec<PathBuf>,

    /// Print results as JSON
    #[arg(long, global = true, default_value_t = false)]
    json: bool,

    /// Timeout for mount and unmount (milliseconds, default 30000)
    #[arg(long, global = true, env = "RCLONE_MOUNTCTL_MOUNT_TIMEOUT_MS")]
    mount_timeout_ms: Option<u64>,

    /// Timeout for connection tests (milliseconds, default 5000)
    #[arg(long, global = true, env = "RCLONE_MOUNTCTL_TEST_TIMEOUT_MS")]
    test_timeout_ms: Option<u64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List remotes with mount and auto-mount state
    List,
    /// Show the stored options of a remote
    Show { name: String },
    /// Mount a remote under the mount base
    Mount { name: String },
    /// Unmount a remote
    Unmount { name: String },
    /// Check that a remote answers a directory listing
    Test { name: String },
    /// Add a remote using a plugin's fields
    Add {
        /// Plugin (backend type) name
        plugin: String,
        /// Name of the new remote
        #[arg(long)]
        name: String,
        /// Field value, KEY=VALUE (repeatable)
        #[arg(long, value_parser = parse_key_val)]
        set: Vec<(String, String)>,
    },
    /// Change options of a remote, optionally renaming it
    Edit {
        name: String,
        /// Plugin to validate against; defaults to the remote's type
        #[arg(long)]
        plugin: Option<String>,
        #[arg(long)]
        rename: Option<String>,
        /// Field value, KEY=VALUE (repeatable)
        #[arg(long, value_parser = parse_key_val)]
        set: Vec<(String, String)>,
    },
    /// Delete a remote from the config
    Delete { name: String },
    /// Manage mounting at boot
    Automount {
        #[command(subcommand)]
        action: AutomountAction,
    },
    /// List available plugins
    Plugins,
    /// Check the rclone executable and config file
    Check,
}

#[derive(Subcommand, Debug)]
enum AutomountAction {
    Enable { name: String },
    Disable { name: String },
    Status { name: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeouts_are_set_separately() {
        let cli = Cli::try_parse_from([
            "rclone-mountctl",
            "--mount-timeout-ms",
            "60000",
            "--test-timeout-ms",
            "2000",
            "test",
            "drive",
        ])
        .unwrap();
        let settings = settings_from(&cli);
        assert_eq!(settings.mount_timeout, Duration::from_secs(60));
        assert_eq!(settings.test_timeout, Duration::from_secs(2));
    }

    #[test]
    fn test_mount_timeout_leaves_test_default() {
        let cli =
            Cli::try_parse_from(["rclone-mountctl", "mount", "drive", "--mount-timeout-ms", "100"])
                .unwrap();
        let settings = settings_from(&cli);
        assert_eq!(settings.mount_timeout, Duration::from_millis(100));
        assert_eq!(settings.test_timeout, Settings::new().test_timeout);
    }

    #[test]
    fn test_parse_key_val() {
        assert_eq!(
            parse_key_val("url=https://x/?a=b").unwrap(),
            ("url".to_string(), "https://x/?a=b".to_string())
        );
        assert!(parse_key_val("novalue").is_err());
        assert!(parse_key_val("=v").is_err());
    }
}
