//! Device & Partition Manager.
//!
//! Layout produced in device mode (msdos label):
//!
//! | # | type    | start  | end      | contents                     |
//! |---|---------|--------|----------|------------------------------|
//! | 1 | primary | 4MiB   | -2049s   | FAT32 or NTFS installer tree |
//! | 2 | primary | -2048s | -1s      | UEFI:NTFS image (NTFS only)  |

use crate::errors::{InstallError, Result};
use crate::job::FsKind;
use crate::tools::ToolSet;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Duration;
use woeusb_hal::{InstallerHal, PartedOp};

pub const UEFI_SUPPORT_LABEL: &str = "UEFI_NTFS";
const UEFI_NTFS_IMAGE: &str = "uefi-ntfs.img";
const FAT_LABEL_MAX: usize = 11;
const NTFS_LABEL_MAX: usize = 32;
const FAT_LABEL_FORBIDDEN: &str = "\"*+,./:;<=>?[\\]|";

/// Partition table flavour written by [`create_partition_table`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableScheme {
    /// Legacy MBR, readable by every BIOS and UEFI firmware.
    Msdos,
}

impl TableScheme {
    fn parted_label(self) -> &'static str {
        match self {
            TableScheme::Msdos => "msdos",
        }
    }
}

/// Where the UEFI:NTFS loader image comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UefiNtfsSource {
    pub url: String,
    pub sha256: Option<String>,
    pub timeout: Duration,
}

pub fn validate_label(label: &str, fs: FsKind, device: &Path) -> Result<()> {
    let reject = |reason: String| {
        Err(InstallError::Format {
            device: device.to_path_buf(),
            reason,
        })
    };
    if label.is_empty() {
        return reject("empty filesystem label".to_string());
    }
    if label.chars().any(char::is_control) {
        return reject(format!("label {:?} contains control characters", label));
    }
    match fs {
        FsKind::Fat => {
            if !label.is_ascii() {
                return reject(format!("FAT label {:?} must be ASCII", label));
            }
            if label.len() > FAT_LABEL_MAX {
                return reject(format!(
                    "FAT label {:?} is longer than {} characters",
                    label, FAT_LABEL_MAX
                ));
            }
            if let Some(c) = label.chars().find(|c| FAT_LABEL_FORBIDDEN.contains(*c)) {
                return reject(format!("FAT label {:?} contains {:?}", label, c));
            }
        }
        FsKind::Ntfs => {
            if label.chars().count() > NTFS_LABEL_MAX {
                return reject(format!(
                    "NTFS label {:?} is longer than {} characters",
                    label, NTFS_LABEL_MAX
                ));
            }
        }
    }
    Ok(())
}

/// Destroy every partition-table and filesystem signature on `device`.
pub fn wipe(hal: &dyn InstallerHal, device: &Path) -> Result<()> {
    let mountpoints = hal
        .mounts_of_device(device)
        .map_err(|e| InstallError::device_io("reading mount table", e))?;
    if !mountpoints.is_empty() {
        return Err(InstallError::Busy {
            device: device.to_path_buf(),
            mountpoints,
        });
    }
    log::info!("Wiping all signatures on {}", device.display());
    hal.wipefs_all(device)
        .map_err(|e| InstallError::device_io(format!("wipefs {}", device.display()), e))
}

pub fn create_partition_table(
    hal: &dyn InstallerHal,
    device: &Path,
    scheme: TableScheme,
) -> Result<()> {
    log::info!(
        "Creating {} partition table on {}",
        scheme.parted_label(),
        device.display()
    );
    hal.parted(
        device,
        PartedOp::MkLabel {
            label: scheme.parted_label().to_string(),
        },
    )
    .map(drop)
    .map_err(|e| InstallError::device_io("parted mklabel", e))
}

fn refresh(hal: &dyn InstallerHal, device: &Path) -> Result<()> {
    hal.reread_partition_table(device)
        .map_err(|e| InstallError::device_io("re-reading partition table", e))?;
    if let Err(err) = hal.udev_settle() {
        log::warn!("⚠️ udevadm settle failed: {}", err);
    }
    Ok(())
}

/// Create the primary partition (leaving room for the support partition at
/// the end of the disk) and format it.
pub fn create_partition(
    hal: &dyn InstallerHal,
    device: &Path,
    partition: &Path,
    fs: FsKind,
    label: &str,
    tools: &ToolSet,
) -> Result<()> {
    validate_label(label, fs, partition)?;

    log::info!("Creating {} partition {}", fs, partition.display());
    hal.parted(
        device,
        PartedOp::MkPart {
            part_type: "primary".to_string(),
            fs_type: fs.parted_fs_type().to_string(),
            start: "4MiB".to_string(),
            end: "-2049s".to_string(),
            align: true,
        },
    )
    .map_err(|e| InstallError::device_io("parted mkpart", e))?;
    refresh(hal, device)?;

    let formatted = match fs {
        FsKind::Fat => hal.format_fat(partition, 32, label, tools.fat_formatter),
        FsKind::Ntfs => hal.format_ntfs(partition, label),
    };
    formatted.map_err(|e| format_error(partition, fs, e))?;
    log::info!("✅ Formatted {} as {} ({:?})", partition.display(), fs, label);
    Ok(())
}

/// Allocate the last 2048 sectors as a second partition and format it FAT16.
pub fn create_uefi_support_partition(
    hal: &dyn InstallerHal,
    device: &Path,
    partition: &Path,
    tools: &ToolSet,
) -> Result<()> {
    log::info!("Creating UEFI:NTFS support partition {}", partition.display());
    hal.parted(
        device,
        PartedOp::MkPart {
            part_type: "primary".to_string(),
            fs_type: "fat16".to_string(),
            start: "-2048s".to_string(),
            end: "-1s".to_string(),
            align: false,
        },
    )
    .map_err(|e| InstallError::device_io("parted mkpart (UEFI support)", e))?;
    refresh(hal, device)?;

    hal.format_fat(partition, 16, UEFI_SUPPORT_LABEL, tools.fat_formatter)
        .map_err(|e| format_error(partition, FsKind::Fat, e))
}

/// Download the UEFI:NTFS loader into `temp_dir` and write it raw onto
/// `partition`.
pub fn install_uefi_support_payload(
    hal: &dyn InstallerHal,
    partition: &Path,
    temp_dir: &Path,
    source: &UefiNtfsSource,
) -> Result<PathBuf> {
    let image = temp_dir.join(UEFI_NTFS_IMAGE);
    let bytes = hal
        .download(&source.url, &image, source.timeout)
        .map_err(|e| {
            InstallError::BootWorkaround(format!("downloading UEFI:NTFS image: {}", e))
        })?;
    if bytes == 0 {
        return Err(InstallError::BootWorkaround(format!(
            "UEFI:NTFS image from {} is empty",
            source.url
        )));
    }
    if let Some(expected) = &source.sha256 {
        verify_sha256(&image, expected)?;
    }

    hal.flash_image(&image, partition)
        .map_err(|e| InstallError::device_io(format!("writing {}", UEFI_NTFS_IMAGE), e))?;
    log::info!(
        "✅ Installed UEFI:NTFS loader ({} bytes) on {}",
        bytes,
        partition.display()
    );
    Ok(image)
}

fn verify_sha256(path: &Path, expected: &str) -> Result<()> {
    let mut file =
        File::open(path).map_err(|e| InstallError::io(format!("open {}", path.display()), e))?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 8192];
    loop {
        let read = file
            .read(&mut buffer)
            .map_err(|e| InstallError::io(format!("read {}", path.display()), e))?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    let computed = format!("{:x}", hasher.finalize());
    if !computed.eq_ignore_ascii_case(expected) {
        return Err(InstallError::BootWorkaround(format!(
            "UEFI:NTFS image checksum mismatch: {} != {}",
            computed, expected
        )));
    }
    Ok(())
}

fn format_error(partition: &Path, fs: FsKind, err: woeusb_hal::HalError) -> InstallError {
    if err.is_permission_denied() {
        return InstallError::Permission(format!("formatting {}: {}", partition.display(), err));
    }
    InstallError::Format {
        device: partition.to_path_buf(),
        reason: format!("{} formatting failed: {}", fs, err),
    }
}
