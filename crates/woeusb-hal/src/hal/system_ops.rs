//! System-level operations (sync, partition table re-read).

use crate::HalResult;
use std::path::Path;

/// System operations trait.
pub trait SystemOps {
    /// Flush pending writes to all filesystems.
    fn sync(&self) -> HalResult<()>;

    /// Best-effort udev settle (wait for block device events to quiesce).
    fn udev_settle(&self) -> HalResult<()>;

    /// Ask the kernel to re-read the partition table of `device` and wait for
    /// the partition nodes to appear.
    fn reread_partition_table(&self, device: &Path) -> HalResult<()>;

    /// Whether the current process runs with an effective uid of 0.
    fn is_root(&self) -> bool;
}
