//! Mount lifecycle: state probing, platform policy and orchestration

pub mod orchestrator;
pub mod platform;
pub mod probe;

pub use orchestrator::{MountOrchestrator, MountReport, MountState};
pub use platform::{DirPolicy, PlatformProfile, UnmountCommand};
pub use probe::{MountProbe, SystemMountProbe};
