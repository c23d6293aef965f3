//! Device probing operations (lsblk, exclusive open).

use crate::HalResult;
use std::path::Path;

/// Probing operations trait.
pub trait ProbeOps {
    /// True if `path` is a block device node.
    fn is_block_device(&self, path: &Path) -> HalResult<bool>;

    /// True if the kernel refuses an exclusive open of `device` (held by a
    /// mounted filesystem, a device-mapper user, another partitioner...).
    fn is_device_busy(&self, device: &Path) -> HalResult<bool>;

    /// Filesystem type reported by `lsblk` for a partition (e.g. `vfat`,
    /// `ntfs`). Empty when no filesystem is recognised.
    fn filesystem_type(&self, device: &Path) -> HalResult<String>;
}
