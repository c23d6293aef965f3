//! WoeUSB installation pipeline.
//!
//! Turns a Windows installation image or disc into a bootable USB stick.
//! [`Installer`] drives an [`InstallationJob`] through the stages defined in
//! `woeusb-workflow`, talking to the system only through a
//! [`woeusb_hal::InstallerHal`].

pub mod boot;
pub mod cleanup;
pub mod config;
pub mod deploy;
pub mod errors;
pub mod job;
pub mod mounts;
pub mod orchestrator;
pub mod partitioning;
pub mod progress;
pub mod tools;

pub use cleanup::CleanupReport;
pub use config::Settings;
pub use deploy::{CopyStatus, CopyTask};
pub use errors::{CopyError, InstallError, Result};
pub use job::{FsKind, InstallMode, InstallRequest, InstallationJob};
pub use orchestrator::{InstallOutcome, Installer};
pub use progress::{ProgressSink, ProgressUpdate};
pub use woeusb_workflow::{CancelToken, Stage};
