//! File Deployment Engine.

mod task;

pub use task::{CopyStatus, CopyTask};

use crate::errors::{CopyError, InstallError, Result};
use crate::job::FsKind;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;
use woeusb_hal::{CopyProgress, InstallerHal};

/// Largest file FAT32 can hold (4 GiB - 1 byte).
pub const FAT32_MAX_FILE_SIZE: u64 = u32::MAX as u64;

/// Files that do not fit the requested filesystem.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapacityReport {
    pub oversized: Vec<(PathBuf, u64)>,
}

impl CapacityReport {
    pub fn requires_ntfs(&self) -> bool {
        !self.oversized.is_empty()
    }
}

/// Scan the source tree for files FAT cannot store. NTFS targets are not
/// scanned.
pub fn check_filesystem_capacity_limits(source_mount: &Path, fs: FsKind) -> Result<CapacityReport> {
    let mut report = CapacityReport::default();
    if fs != FsKind::Fat {
        return Ok(report);
    }
    for entry in WalkDir::new(source_mount).follow_links(false) {
        let entry = entry.map_err(|e| {
            let path = e.path().map(Path::to_path_buf).unwrap_or_default();
            match e.into_io_error() {
                Some(source) => InstallError::Copy(CopyError::Io { path, source }),
                None => InstallError::Validation(format!(
                    "filesystem loop in source at {}",
                    path.display()
                )),
            }
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let size = entry
            .metadata()
            .map_err(|e| {
                let path = entry.path().to_path_buf();
                match e.into_io_error() {
                    Some(source) => InstallError::Copy(CopyError::Io { path, source }),
                    None => InstallError::Validation(format!("cannot stat {}", path.display())),
                }
            })?
            .len();
        if size > FAT32_MAX_FILE_SIZE {
            let rel = entry
                .path()
                .strip_prefix(source_mount)
                .unwrap_or(entry.path())
                .to_path_buf();
            log::warn!(
                "⚠️ {} is {} bytes, larger than FAT32 allows",
                rel.display(),
                size
            );
            report.oversized.push((rel, size));
        }
    }
    Ok(report)
}

/// Copy synchronously on the calling thread.
///
/// `on_progress` returns `false` to cancel.
pub fn copy_tree(
    hal: &dyn InstallerHal,
    source_mount: &Path,
    target_mount: &Path,
    fs: FsKind,
    on_progress: &mut dyn FnMut(&CopyProgress) -> bool,
) -> std::result::Result<(), CopyError> {
    log::info!(
        "Copying {} -> {}",
        source_mount.display(),
        target_mount.display()
    );
    hal.copy_tree_native(source_mount, target_mount, &fs.copy_options(), on_progress)
        .map_err(CopyError::from)
}
