//! Rclone integration module
//!
//! Provides functionality for:
//! - Running rclone and helper processes
//! - Reading and rewriting the rclone config file

pub mod config;
pub mod process;

pub use config::{ConfigSection, ConfigStore, ParsedConfig, RemoteDefinition, RemoteProperties};
pub use process::{DetachedExit, DetachedProcess, ProcessOutput, ProcessRunner};
