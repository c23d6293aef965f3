//! Fake HAL implementation for testing.
//!
//! This implementation records all operations without touching real devices,
//! allowing the installation pipeline to be tested without root privileges or
//! hardware. Devices can be backed by fixture directories: mounting such a
//! device points the mountpoint at the fixture, so the copy step sees a real
//! tree.

use super::{
    copy_native, BootOps, CopyOps, CopyOptions, CopyProgress, ExtractOps, FetchOps, FlashOps,
    FormatOps, MountOps, MountOptions, PartedOp, PartitionOps, ProbeOps, SystemOps,
};
use crate::path::parent_device;
use crate::{FatFormatter, GrubInstaller, HalError, HalResult};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// Operation records for testing and verification.
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    Mount {
        device: PathBuf,
        target: PathBuf,
        fstype: Option<String>,
        options: Option<String>,
    },
    Unmount {
        target: PathBuf,
    },
    WipeFs {
        disk: PathBuf,
    },
    Parted {
        disk: PathBuf,
        op: PartedOp,
    },
    FormatFat {
        device: PathBuf,
        fat_bits: u8,
        label: String,
        formatter: FatFormatter,
    },
    FormatNtfs {
        device: PathBuf,
        label: String,
    },
    InstallGrub {
        installer: GrubInstaller,
        boot_directory: PathBuf,
        device: PathBuf,
    },
    Sync,
    UdevSettle,
    RereadPartitionTable {
        device: PathBuf,
    },
    ExtractMember {
        archive: PathBuf,
        member: String,
    },
    Download {
        url: String,
        dest: PathBuf,
    },
    FlashImage {
        image: PathBuf,
        target: PathBuf,
    },
    CopyTree {
        src: PathBuf,
        dst: PathBuf,
    },
}

/// Operations that can be told to fail.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FailPoint {
    /// Mounting this device (or image) fails.
    Mount(PathBuf),
    Unmount(PathBuf),
    /// Unmounting whatever this device is mounted on fails.
    UnmountDevice(PathBuf),
    Wipefs,
    Parted,
    FormatFat,
    FormatNtfs,
    InstallGrub,
    Extract,
    Download,
    Flash,
    Sync,
    /// The copy fails with "no space left on device".
    CopyNoSpace,
}

impl FailPoint {
    fn program(&self) -> &'static str {
        match self {
            FailPoint::Mount(_) => "mount",
            FailPoint::Unmount(_) | FailPoint::UnmountDevice(_) => "umount",
            FailPoint::Wipefs => "wipefs",
            FailPoint::Parted => "parted",
            FailPoint::FormatFat => "mkdosfs",
            FailPoint::FormatNtfs => "mkntfs",
            FailPoint::InstallGrub => "grub-install",
            FailPoint::Extract => "7z",
            FailPoint::Download => "download",
            FailPoint::Flash => "dd",
            FailPoint::Sync => "sync",
            FailPoint::CopyNoSpace => "copy",
        }
    }
}

const DEFAULT_EXTRACT_PAYLOAD: &[u8] = b"fake bootmgfw.efi";
const DEFAULT_DOWNLOAD_PAYLOAD: &[u8] = b"fake uefi-ntfs.img";

/// Shared state for FakeHal operations.
#[derive(Debug, Clone)]
struct FakeHalState {
    /// All operations that were recorded
    operations: Vec<Operation>,
    /// Mountpoint -> device for mounts made through this HAL.
    mounted: HashMap<PathBuf, PathBuf>,
    /// Mounts that exist "outside" the installer, keyed by device.
    external_mounts: HashMap<PathBuf, Vec<PathBuf>>,
    fixtures: HashMap<PathBuf, PathBuf>,
    busy: HashSet<PathBuf>,
    failures: HashSet<FailPoint>,
    fstypes: HashMap<PathBuf, String>,
    extract_payload: Option<Vec<u8>>,
    download_payload: Vec<u8>,
    native_copy: bool,
    copy_delay: Option<Duration>,
    root: bool,
}

impl Default for FakeHalState {
    fn default() -> Self {
        Self {
            operations: Vec::new(),
            mounted: HashMap::new(),
            external_mounts: HashMap::new(),
            fixtures: HashMap::new(),
            busy: HashSet::new(),
            failures: HashSet::new(),
            fstypes: HashMap::new(),
            extract_payload: Some(DEFAULT_EXTRACT_PAYLOAD.to_vec()),
            download_payload: DEFAULT_DOWNLOAD_PAYLOAD.to_vec(),
            native_copy: false,
            copy_delay: None,
            root: true,
        }
    }
}

/// Fake HAL implementation that records operations without executing them.
///
/// Paths under `/dev/` are treated as block devices.
#[derive(Debug, Clone, Default)]
pub struct FakeHal {
    state: Arc<Mutex<FakeHalState>>,
}

impl FakeHal {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, FakeHalState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Back `device` with a directory: mounting it exposes `dir` at the mountpoint.
    pub fn with_fixture(self, device: impl Into<PathBuf>, dir: impl Into<PathBuf>) -> Self {
        self.state().fixtures.insert(device.into(), dir.into());
        self
    }

    /// Report `device` as held by another process.
    pub fn with_busy_device(self, device: impl Into<PathBuf>) -> Self {
        self.state().busy.insert(device.into());
        self
    }

    /// Pretend `device` is already mounted at `mountpoint` by someone else.
    pub fn with_external_mount(
        self,
        device: impl Into<PathBuf>,
        mountpoint: impl Into<PathBuf>,
    ) -> Self {
        self.state()
            .external_mounts
            .entry(device.into())
            .or_default()
            .push(mountpoint.into());
        self
    }

    pub fn with_failure(self, point: FailPoint) -> Self {
        self.state().failures.insert(point);
        self
    }

    /// Filesystem type reported for `device` by `filesystem_type`.
    pub fn with_fstype(self, device: impl Into<PathBuf>, fstype: impl Into<String>) -> Self {
        self.state().fstypes.insert(device.into(), fstype.into());
        self
    }

    /// Bytes returned by `extract_member`; `None` makes extraction fail.
    pub fn with_extract_payload(self, payload: Option<Vec<u8>>) -> Self {
        self.state().extract_payload = payload;
        self
    }

    pub fn with_download_payload(self, payload: impl Into<Vec<u8>>) -> Self {
        self.state().download_payload = payload.into();
        self
    }

    /// Run the real tree copier instead of only recording the copy.
    pub fn with_native_copy(self, enabled: bool) -> Self {
        self.state().native_copy = enabled;
        self
    }

    /// Sleep this long at every copy progress callback.
    pub fn with_copy_delay(self, delay: Duration) -> Self {
        self.state().copy_delay = Some(delay);
        self
    }

    pub fn with_root(self, root: bool) -> Self {
        self.state().root = root;
        self
    }

    /// Get all recorded operations.
    pub fn operations(&self) -> Vec<Operation> {
        self.state().operations.clone()
    }

    /// Get the number of operations recorded.
    pub fn operation_count(&self) -> usize {
        self.state().operations.len()
    }

    /// Check if a specific operation was recorded.
    pub fn has_operation(&self, check: impl Fn(&Operation) -> bool) -> bool {
        self.state().operations.iter().any(check)
    }

    /// Number of recorded operations matching `check`.
    pub fn count_operations(&self, check: impl Fn(&Operation) -> bool) -> usize {
        self.state().operations.iter().filter(|op| check(op)).count()
    }

    /// Mountpoints currently mounted through this HAL.
    pub fn active_mounts(&self) -> Vec<PathBuf> {
        self.state().mounted.keys().cloned().collect()
    }

    /// Clear all recorded operations.
    pub fn clear(&self) {
        let mut state = self.state();
        state.operations.clear();
        state.mounted.clear();
    }

    fn record_operation(&self, op: Operation) {
        self.state().operations.push(op);
    }

    fn check_failure(&self, point: FailPoint) -> HalResult<()> {
        if self.state().failures.contains(&point) {
            return Err(HalError::CommandFailed {
                program: point.program().to_string(),
                code: Some(1),
                stderr: "injected failure".to_string(),
            });
        }
        Ok(())
    }
}

fn belongs_to(device: &Path, candidate: &Path) -> bool {
    candidate == device || parent_device(candidate).as_deref() == Some(device)
}

impl MountOps for FakeHal {
    fn mount_device(
        &self,
        device: &Path,
        target: &Path,
        fstype: Option<&str>,
        options: MountOptions,
    ) -> HalResult<()> {
        self.record_operation(Operation::Mount {
            device: device.to_path_buf(),
            target: target.to_path_buf(),
            fstype: fstype.map(str::to_string),
            options: options.options.clone(),
        });
        self.check_failure(FailPoint::Mount(device.to_path_buf()))?;

        let fixture = self.state().fixtures.get(device).cloned();
        if let Some(fixture) = fixture {
            if target.is_dir() {
                fs::remove_dir(target)?;
            }
            std::os::unix::fs::symlink(&fixture, target)?;
        }
        self.state()
            .mounted
            .insert(target.to_path_buf(), device.to_path_buf());
        Ok(())
    }

    fn unmount(&self, target: &Path) -> HalResult<()> {
        self.record_operation(Operation::Unmount {
            target: target.to_path_buf(),
        });
        self.check_failure(FailPoint::Unmount(target.to_path_buf()))?;
        let device = self.state().mounted.get(target).cloned();
        if let Some(device) = device {
            self.check_failure(FailPoint::UnmountDevice(device))?;
        }

        if self.state().mounted.remove(target).is_none() {
            return Err(HalError::Nix(nix::errno::Errno::EINVAL));
        }
        let is_symlink = fs::symlink_metadata(target)
            .map(|m| m.file_type().is_symlink())
            .unwrap_or(false);
        if is_symlink {
            fs::remove_file(target)?;
            fs::create_dir(target)?;
        }
        Ok(())
    }

    fn is_mounted(&self, path: &Path) -> HalResult<bool> {
        Ok(self.state().mounted.contains_key(path))
    }

    fn mounts_of_device(&self, device: &Path) -> HalResult<Vec<PathBuf>> {
        let state = self.state();
        let mut found: Vec<PathBuf> = state
            .mounted
            .iter()
            .filter(|(_, dev)| belongs_to(device, dev))
            .map(|(target, _)| target.clone())
            .collect();
        for (dev, targets) in &state.external_mounts {
            if belongs_to(device, dev) {
                found.extend(targets.iter().cloned());
            }
        }
        found.sort();
        Ok(found)
    }
}

impl PartitionOps for FakeHal {
    fn wipefs_all(&self, disk: &Path) -> HalResult<()> {
        self.record_operation(Operation::WipeFs {
            disk: disk.to_path_buf(),
        });
        self.check_failure(FailPoint::Wipefs)
    }

    fn parted(&self, disk: &Path, op: PartedOp) -> HalResult<String> {
        self.record_operation(Operation::Parted {
            disk: disk.to_path_buf(),
            op,
        });
        self.check_failure(FailPoint::Parted)?;
        Ok(String::new())
    }
}

impl FormatOps for FakeHal {
    fn format_fat(
        &self,
        device: &Path,
        fat_bits: u8,
        label: &str,
        formatter: FatFormatter,
    ) -> HalResult<()> {
        self.record_operation(Operation::FormatFat {
            device: device.to_path_buf(),
            fat_bits,
            label: label.to_string(),
            formatter,
        });
        self.check_failure(FailPoint::FormatFat)
    }

    fn format_ntfs(&self, device: &Path, label: &str) -> HalResult<()> {
        self.record_operation(Operation::FormatNtfs {
            device: device.to_path_buf(),
            label: label.to_string(),
        });
        self.check_failure(FailPoint::FormatNtfs)
    }
}

impl BootOps for FakeHal {
    fn install_grub(
        &self,
        installer: GrubInstaller,
        boot_directory: &Path,
        device: &Path,
    ) -> HalResult<()> {
        self.record_operation(Operation::InstallGrub {
            installer,
            boot_directory: boot_directory.to_path_buf(),
            device: device.to_path_buf(),
        });
        self.check_failure(FailPoint::InstallGrub)
    }
}

impl SystemOps for FakeHal {
    fn sync(&self) -> HalResult<()> {
        self.record_operation(Operation::Sync);
        self.check_failure(FailPoint::Sync)
    }

    fn udev_settle(&self) -> HalResult<()> {
        self.record_operation(Operation::UdevSettle);
        Ok(())
    }

    fn reread_partition_table(&self, device: &Path) -> HalResult<()> {
        self.record_operation(Operation::RereadPartitionTable {
            device: device.to_path_buf(),
        });
        Ok(())
    }

    fn is_root(&self) -> bool {
        self.state().root
    }
}

impl ProbeOps for FakeHal {
    fn is_block_device(&self, path: &Path) -> HalResult<bool> {
        Ok(path.starts_with("/dev"))
    }

    fn is_device_busy(&self, device: &Path) -> HalResult<bool> {
        if self.state().busy.contains(device) {
            return Ok(true);
        }
        Ok(!self.mounts_of_device(device)?.is_empty())
    }

    fn filesystem_type(&self, device: &Path) -> HalResult<String> {
        Ok(self.state().fstypes.get(device).cloned().unwrap_or_default())
    }
}

impl ExtractOps for FakeHal {
    fn extract_member(&self, archive: &Path, member: &str) -> HalResult<Vec<u8>> {
        self.record_operation(Operation::ExtractMember {
            archive: archive.to_path_buf(),
            member: member.to_string(),
        });
        self.check_failure(FailPoint::Extract)?;
        self.state().extract_payload.clone().ok_or_else(|| {
            HalError::Other(format!("{} not found in {}", member, archive.display()))
        })
    }
}

impl FetchOps for FakeHal {
    fn download(&self, url: &str, dest: &Path, _timeout: Duration) -> HalResult<u64> {
        self.record_operation(Operation::Download {
            url: url.to_string(),
            dest: dest.to_path_buf(),
        });
        if self.state().failures.contains(&FailPoint::Download) {
            return Err(HalError::Download(format!("{}: injected failure", url)));
        }
        let payload = self.state().download_payload.clone();
        fs::write(dest, &payload)?;
        Ok(payload.len() as u64)
    }
}

impl FlashOps for FakeHal {
    fn flash_image(&self, image_path: &Path, target: &Path) -> HalResult<()> {
        self.record_operation(Operation::FlashImage {
            image: image_path.to_path_buf(),
            target: target.to_path_buf(),
        });
        self.check_failure(FailPoint::Flash)
    }
}

impl CopyOps for FakeHal {
    fn copy_tree_native(
        &self,
        src: &Path,
        dst: &Path,
        opts: &CopyOptions,
        on_progress: &mut dyn FnMut(&CopyProgress) -> bool,
    ) -> HalResult<()> {
        self.record_operation(Operation::CopyTree {
            src: src.to_path_buf(),
            dst: dst.to_path_buf(),
        });
        let (native, delay, no_space) = {
            let state = self.state();
            (
                state.native_copy,
                state.copy_delay,
                state.failures.contains(&FailPoint::CopyNoSpace),
            )
        };
        if no_space {
            return Err(HalError::NoSpace(dst.to_path_buf()));
        }

        let mut tick = |p: &CopyProgress| {
            if let Some(delay) = delay {
                std::thread::sleep(delay);
            }
            on_progress(p)
        };

        if native {
            return copy_native::copy_tree(src, dst, opts, &mut tick);
        }

        // Recording-only copy: report the measured tree once, then completion.
        let (files_total, bytes_total) = copy_native::measure_tree(src)?;
        let mut progress = CopyProgress {
            bytes_total,
            files_total,
            ..Default::default()
        };
        if !tick(&progress) {
            return Err(HalError::Cancelled);
        }
        progress.bytes_copied = bytes_total;
        progress.files_copied = files_total;
        if !tick(&progress) {
            return Err(HalError::Cancelled);
        }
        Ok(())
    }
}
