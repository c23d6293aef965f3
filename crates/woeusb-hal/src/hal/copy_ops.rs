//! Native file copy operations used to deploy the installer tree.

use crate::HalResult;
use std::path::{Path, PathBuf};

/// Options controlling how trees are copied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CopyOptions {
    /// Preserve permissions (mode bits).
    pub preserve_perms: bool,
    /// Preserve modification times.
    pub preserve_times: bool,
}

impl CopyOptions {
    /// Archive-style copy (perms + times).
    pub fn archive() -> Self {
        Self {
            preserve_perms: true,
            preserve_times: true,
        }
    }

    /// VFAT-safe copy (no perms/times).
    pub fn vfat_safe() -> Self {
        Self {
            preserve_perms: false,
            preserve_times: false,
        }
    }

    /// NTFS (ntfs-3g/ntfs3) keeps timestamps but has no POSIX mode bits.
    pub fn ntfs_safe() -> Self {
        Self {
            preserve_perms: false,
            preserve_times: true,
        }
    }
}

/// Progress information for a copy operation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CopyProgress {
    pub bytes_copied: u64,
    pub bytes_total: u64,
    pub files_copied: u64,
    pub files_total: u64,
    /// Entry being processed, relative to the source root.
    pub current: PathBuf,
}

impl CopyProgress {
    /// Overall completion percentage, `None` while the total is unknown/zero.
    pub fn percent(&self) -> Option<f64> {
        if self.bytes_total == 0 {
            return None;
        }
        Some((self.bytes_copied as f64 / self.bytes_total as f64 * 100.0).min(100.0))
    }
}

/// Copy operations abstraction.
pub trait CopyOps {
    /// Recursively copy a directory tree from `src` into `dst`, reporting progress.
    ///
    /// The callback returns `true` to continue or `false` to abort the copy,
    /// in which case [`crate::HalError::Cancelled`] is returned. It is invoked for
    /// every entry and for every chunk written.
    fn copy_tree_native(
        &self,
        src: &Path,
        dst: &Path,
        opts: &CopyOptions,
        on_progress: &mut dyn FnMut(&CopyProgress) -> bool,
    ) -> HalResult<()>;
}
