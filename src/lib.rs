//! rclone-mountctl library crate
//!
//! Remote lifecycle for rclone: config editing, mount and unmount with verified
//! state, connection tests, and auto-mount at boot. Exposed for the binary and
//! for integration tests.

pub mod boot;
pub mod error;
pub mod mount;
pub mod plugins;
pub mod rclone;
pub mod service;
pub mod settings;
pub mod utils;

pub use error::{RemoteError, Result};
pub use service::{CommandResult, RemoteService, RemoteSummary};
pub use settings::Settings;
