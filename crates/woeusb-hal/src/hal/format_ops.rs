//! Filesystem formatting operations trait.

use crate::{FatFormatter, HalResult};
use std::path::Path;

/// Trait for formatting partitions.
pub trait FormatOps {
    /// Format a partition as FAT.
    ///
    /// # Arguments
    /// * `device` - Partition path (e.g., `/dev/sdb1`)
    /// * `fat_bits` - FAT size passed to `-F` (32 for the data partition, 16 for the support partition)
    /// * `label` - Volume label, already validated by the caller
    /// * `formatter` - Which `mkfs.fat` flavour to run
    fn format_fat(
        &self,
        device: &Path,
        fat_bits: u8,
        label: &str,
        formatter: FatFormatter,
    ) -> HalResult<()>;

    /// Quick-format a partition as NTFS (`mkntfs --quick`).
    fn format_ntfs(&self, device: &Path, label: &str) -> HalResult<()>;
}
