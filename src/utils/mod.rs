//! Small helpers shared across modules.

pub mod path;

pub use path::{expand_tilde, mount_dir_name};
