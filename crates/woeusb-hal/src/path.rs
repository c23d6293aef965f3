//! Block device path helpers.

use std::path::{Path, PathBuf};

fn needs_p_separator(disk: &str) -> bool {
    disk.contains("nvme") || disk.contains("mmcblk") || disk.contains("loop")
}

/// Partition path helper for block devices. Handles nvme/mmcblk/loop postfixing.
pub fn partition_path(disk: &Path, num: u32) -> PathBuf {
    let disk = disk.to_string_lossy();
    if needs_p_separator(&disk) {
        PathBuf::from(format!("{}p{}", disk, num))
    } else {
        PathBuf::from(format!("{}{}", disk, num))
    }
}

/// Inverse of [`partition_path`]: strips the partition number (and the `p`
/// separator where the naming scheme uses one).
///
/// Returns `None` when the path carries no partition number.
pub fn parent_device(partition: &Path) -> Option<PathBuf> {
    let s = partition.to_string_lossy();
    let trimmed = s.trim_end_matches(|c: char| c.is_ascii_digit());
    if trimmed.len() == s.len() || trimmed.is_empty() {
        return None;
    }
    if needs_p_separator(trimmed) {
        // `/dev/nvme0n1` and `/dev/loop0` end in a digit but are whole disks.
        let base = trimmed.strip_suffix('p')?;
        if !base.ends_with(|c: char| c.is_ascii_digit()) {
            return None;
        }
        return Some(PathBuf::from(base));
    }
    Some(PathBuf::from(trimmed))
}
