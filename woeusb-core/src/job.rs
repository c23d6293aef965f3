//! The unit of work: one source, one target, one pass through the pipeline.

use crate::errors::{InstallError, Result};
use crate::tools::ToolSet;
use std::fmt;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use woeusb_hal::path::{parent_device, partition_path};
use woeusb_hal::CopyOptions;
use woeusb_workflow::{StageTracker, WorkflowState};

pub const DEFAULT_LABEL: &str = "Windows USB";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallMode {
    /// Wipe and repartition a whole block device.
    Device,
    /// Copy onto an existing, already formatted partition.
    Partition,
}

impl InstallMode {
    /// Resolve the mutually exclusive `--device`/`--partition` selection.
    pub fn from_flags(device: bool, partition: bool) -> Result<Self> {
        match (device, partition) {
            (true, false) => Ok(InstallMode::Device),
            (false, true) => Ok(InstallMode::Partition),
            (false, false) => Err(InstallError::Validation(
                "no install mode selected, pass --device or --partition".to_string(),
            )),
            (true, true) => Err(InstallError::Validation(
                "--device and --partition are mutually exclusive".to_string(),
            )),
        }
    }
}

impl fmt::Display for InstallMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InstallMode::Device => f.write_str("device"),
            InstallMode::Partition => f.write_str("partition"),
        }
    }
}

/// Target filesystem kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum FsKind {
    #[default]
    #[value(name = "fat", alias = "FAT", alias = "fat32")]
    Fat,
    #[value(name = "ntfs", alias = "NTFS")]
    Ntfs,
}

impl FsKind {
    /// Filesystem type passed to `parted mkpart`.
    pub fn parted_fs_type(self) -> &'static str {
        match self {
            FsKind::Fat => "fat32",
            FsKind::Ntfs => "ntfs",
        }
    }

    /// Map an `lsblk` FSTYPE value onto a supported kind.
    pub fn from_lsblk(fstype: &str) -> Option<Self> {
        match fstype.trim() {
            "vfat" => Some(FsKind::Fat),
            "ntfs" | "ntfs3" => Some(FsKind::Ntfs),
            _ => None,
        }
    }

    pub fn copy_options(self) -> CopyOptions {
        match self {
            FsKind::Fat => CopyOptions::vfat_safe(),
            FsKind::Ntfs => CopyOptions::ntfs_safe(),
        }
    }
}

impl fmt::Display for FsKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FsKind::Fat => f.write_str("FAT"),
            FsKind::Ntfs => f.write_str("NTFS"),
        }
    }
}

/// Caller-supplied parameters for one installation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallRequest {
    pub device_mode: bool,
    pub partition_mode: bool,
    pub source: PathBuf,
    pub target: PathBuf,
    pub filesystem: FsKind,
    pub label: String,
    pub workaround_bios_boot_flag: bool,
    pub skip_legacy_bootloader: bool,
}

impl InstallRequest {
    pub fn device(source: impl Into<PathBuf>, target: impl Into<PathBuf>) -> Self {
        Self {
            device_mode: true,
            partition_mode: false,
            source: source.into(),
            target: target.into(),
            filesystem: FsKind::Fat,
            label: DEFAULT_LABEL.to_string(),
            workaround_bios_boot_flag: false,
            skip_legacy_bootloader: false,
        }
    }

    pub fn partition(source: impl Into<PathBuf>, target: impl Into<PathBuf>) -> Self {
        Self {
            device_mode: false,
            partition_mode: true,
            ..Self::device(source, target)
        }
    }
}

/// Mountpoint owned by a job. `mounted` is only true after a successful mount.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobMount {
    pub path: PathBuf,
    pub mounted: bool,
}

#[derive(Debug)]
pub struct InstallationJob {
    pub mode: InstallMode,
    pub source: PathBuf,
    /// Whole device holding the target partition.
    pub target_device: PathBuf,
    /// Partition receiving the installer tree.
    pub target_partition: PathBuf,
    /// May be upgraded from FAT to NTFS by the capacity check.
    pub filesystem: FsKind,
    pub label: String,
    pub workaround_bios_boot_flag: bool,
    pub skip_legacy_bootloader: bool,
    pub tools: Option<ToolSet>,
    pub source_mount: Option<JobMount>,
    pub target_mount: Option<JobMount>,
    pub temp_dir: Option<TempDir>,
    tracker: StageTracker,
}

impl InstallationJob {
    pub fn from_request(request: &InstallRequest) -> Result<Self> {
        let mode = InstallMode::from_flags(request.device_mode, request.partition_mode)?;
        if request.source.as_os_str().is_empty() {
            return Err(InstallError::Validation("no source given".to_string()));
        }
        if request.target.as_os_str().is_empty() {
            return Err(InstallError::Validation("no target given".to_string()));
        }

        let (target_device, target_partition) = match mode {
            InstallMode::Device => (request.target.clone(), partition_path(&request.target, 1)),
            InstallMode::Partition => {
                let device = parent_device(&request.target).ok_or_else(|| {
                    InstallError::Validation(format!(
                        "{} does not look like a partition",
                        request.target.display()
                    ))
                })?;
                (device, request.target.clone())
            }
        };

        Ok(Self {
            mode,
            source: request.source.clone(),
            target_device,
            target_partition,
            filesystem: request.filesystem,
            label: request.label.clone(),
            workaround_bios_boot_flag: request.workaround_bios_boot_flag,
            skip_legacy_bootloader: request.skip_legacy_bootloader,
            tools: None,
            source_mount: None,
            target_mount: None,
            temp_dir: None,
            tracker: StageTracker::new(),
        })
    }

    /// Second partition of the target device, carrying the UEFI:NTFS loader.
    pub fn uefi_support_partition(&self) -> PathBuf {
        partition_path(&self.target_device, 2)
    }

    pub fn tools(&self) -> Result<&ToolSet> {
        self.tools
            .as_ref()
            .ok_or_else(|| InstallError::Validation("tools were not discovered".to_string()))
    }

    pub fn source_mountpoint(&self) -> Option<&Path> {
        self.source_mount
            .as_ref()
            .filter(|m| m.mounted)
            .map(|m| m.path.as_path())
    }

    pub fn target_mountpoint(&self) -> Option<&Path> {
        self.target_mount
            .as_ref()
            .filter(|m| m.mounted)
            .map(|m| m.path.as_path())
    }

    pub fn temp_path(&self) -> Result<&Path> {
        self.temp_dir
            .as_ref()
            .map(TempDir::path)
            .ok_or_else(|| InstallError::Validation("no work directory".to_string()))
    }
}

impl WorkflowState for InstallationJob {
    fn tracker(&self) -> &StageTracker {
        &self.tracker
    }

    fn tracker_mut(&mut self) -> &mut StageTracker {
        &mut self.tracker
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_flags_must_select_exactly_one_mode() {
        assert_eq!(InstallMode::from_flags(true, false).unwrap(), InstallMode::Device);
        assert_eq!(
            InstallMode::from_flags(false, true).unwrap(),
            InstallMode::Partition
        );
        assert!(matches!(
            InstallMode::from_flags(false, false),
            Err(InstallError::Validation(_))
        ));
        assert!(matches!(
            InstallMode::from_flags(true, true),
            Err(InstallError::Validation(_))
        ));
    }

    #[test]
    fn device_mode_derives_partition_paths() {
        let job =
            InstallationJob::from_request(&InstallRequest::device("Win10.iso", "/dev/nvme0n1"))
                .unwrap();
        assert_eq!(job.target_partition, PathBuf::from("/dev/nvme0n1p1"));
        assert_eq!(job.uefi_support_partition(), PathBuf::from("/dev/nvme0n1p2"));
    }

    #[test]
    fn partition_mode_derives_parent_device() {
        let job = InstallationJob::from_request(&InstallRequest::partition("Win10.iso", "/dev/sdc1"))
            .unwrap();
        assert_eq!(job.target_device, PathBuf::from("/dev/sdc"));
        assert_eq!(job.target_partition, PathBuf::from("/dev/sdc1"));

        let err = InstallationJob::from_request(&InstallRequest::partition("Win10.iso", "/dev/sdc"))
            .unwrap_err();
        assert!(matches!(err, InstallError::Validation(_)));
    }

    #[test]
    fn lsblk_types_map_to_kinds() {
        assert_eq!(FsKind::from_lsblk("vfat\n"), Some(FsKind::Fat));
        assert_eq!(FsKind::from_lsblk("ntfs"), Some(FsKind::Ntfs));
        assert_eq!(FsKind::from_lsblk("ext4"), None);
        assert_eq!(FsKind::from_lsblk(""), None);
    }

    #[test]
    fn new_job_starts_pre_init_without_mounts() {
        let job = InstallationJob::from_request(&InstallRequest::device("a.iso", "/dev/sdb"))
            .unwrap();
        assert_eq!(job.tracker().current(), woeusb_workflow::Stage::PreInit);
        assert!(job.source_mountpoint().is_none());
        assert!(job.target_mountpoint().is_none());
    }
}
