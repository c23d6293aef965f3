//! Mount operations trait.

use crate::HalResult;
use std::path::{Path, PathBuf};

/// Trait for mounting and unmounting filesystems.
pub trait MountOps {
    /// Mount a device (or an image file, with the `loop` option) on a target path.
    ///
    /// # Arguments
    /// * `device` - Device or image path (e.g., `/dev/sdb1`, `Win10.iso`)
    /// * `target` - Mount point path (must already exist)
    /// * `fstype` - Optional filesystem type list (e.g., `"udf,iso9660"`)
    /// * `options` - Mount options
    fn mount_device(
        &self,
        device: &Path,
        target: &Path,
        fstype: Option<&str>,
        options: MountOptions,
    ) -> HalResult<()>;

    /// Unmount a filesystem.
    fn unmount(&self, target: &Path) -> HalResult<()>;

    /// Check if a path is currently a mountpoint.
    fn is_mounted(&self, path: &Path) -> HalResult<bool>;

    /// Mountpoints of `device` or any of its partitions.
    fn mounts_of_device(&self, device: &Path) -> HalResult<Vec<PathBuf>>;
}

/// Mount options and flags.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MountOptions {
    /// Additional mount options as a comma-separated string (e.g., "loop,ro")
    pub options: Option<String>,
}

impl MountOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(options: impl Into<String>) -> Self {
        Self {
            options: Some(options.into()),
        }
    }

    pub fn is_read_only(&self) -> bool {
        self.options
            .as_deref()
            .map(|opts| opts.split(',').any(|o| o == "ro"))
            .unwrap_or(false)
    }
}
