//! Boot Compatibility Engine.

use crate::errors::{InstallError, Result};
use std::fs;
use std::path::{Path, PathBuf};
use woeusb_hal::{GrubInstaller, InstallerHal, PartedOp};

const WIN7_VERSION_FILE: &str = "sources/cversion.ini";
const WIN7_BOOT_MANAGER: &str = "bootmgr.efi";
const INSTALL_WIM: &str = "sources/install.wim";
const WIM_EFI_LOADER: &str = "Windows/Boot/EFI/bootmgfw.efi";
const GRUB_CONFIG: &str = "ntldr /bootmgr\nboot\n";

/// Inputs of the pre-copy BIOS workarounds (device mode only).
#[derive(Debug, Clone)]
pub struct BiosWorkaround<'a> {
    pub target_mount: &'a Path,
    pub device: &'a Path,
    pub partition_number: u32,
    pub toggle_boot_flag: bool,
    /// Installer resolved at discovery; `None` when legacy boot is skipped.
    pub grub: Option<GrubInstaller>,
    pub skip_legacy: bool,
}

/// Set the boot flag and/or install GRUB into the device's boot sector.
pub fn apply_bios_boot_flag_workaround(hal: &dyn InstallerHal, w: &BiosWorkaround<'_>) -> Result<()> {
    if w.toggle_boot_flag {
        log::info!(
            "Applying boot flag workaround on {} partition {}",
            w.device.display(),
            w.partition_number
        );
        hal.parted(
            w.device,
            PartedOp::SetFlag {
                part_num: w.partition_number,
                flag: "boot".to_string(),
                state: "on".to_string(),
            },
        )
        .map_err(|e| InstallError::BootWorkaround(format!("setting boot flag: {}", e)))?;
    }

    if w.skip_legacy {
        log::info!("Skipping legacy bootloader installation");
        return Ok(());
    }
    let grub = w.grub.ok_or_else(|| {
        InstallError::BootWorkaround("no GRUB installer available".to_string())
    })?;
    log::info!("Installing legacy bootloader with {}", grub);
    hal.install_grub(grub, w.target_mount, w.device)
        .map_err(|e| InstallError::BootWorkaround(format!("{}: {}", grub, e)))?;
    Ok(())
}

/// Write the GRUB config that chainloads the Windows boot manager.
pub fn write_legacy_boot_config(target_mount: &Path, grub: GrubInstaller) -> Result<PathBuf> {
    let dir = target_mount.join(grub.prefix());
    fs::create_dir_all(&dir).map_err(|e| {
        InstallError::BootWorkaround(format!("creating {}: {}", dir.display(), e))
    })?;
    let cfg = dir.join("grub.cfg");
    fs::write(&cfg, GRUB_CONFIG).map_err(|e| {
        InstallError::BootWorkaround(format!("writing {}: {}", cfg.display(), e))
    })?;
    log::info!("✅ Wrote {}", cfg.display());
    Ok(cfg)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Win7UefiOutcome {
    NotWindows7,
    LoaderAlreadyPresent(PathBuf),
    Installed(PathBuf),
}

fn is_windows7_media(source_mount: &Path) -> bool {
    source_mount.join(WIN7_VERSION_FILE).is_file() && source_mount.join(WIN7_BOOT_MANAGER).is_file()
}

/// Look up `efi/boot/boot*.efi` ignoring case, as FAT/NTFS lookups do.
fn find_efi_loader(target_mount: &Path) -> Option<PathBuf> {
    let efi = find_child_ci(target_mount, "efi")?;
    let boot = find_child_ci(&efi, "boot")?;
    fs::read_dir(&boot)
        .ok()?
        .flatten()
        .map(|entry| entry.path())
        .find(|path| {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().to_ascii_lowercase())
                .unwrap_or_default();
            name.starts_with("boot") && name.ends_with(".efi") && path.is_file()
        })
}

fn find_child_ci(dir: &Path, name: &str) -> Option<PathBuf> {
    fs::read_dir(dir)
        .ok()?
        .flatten()
        .map(|entry| entry.path())
        .find(|path| {
            path.is_dir()
                && path
                    .file_name()
                    .map(|n| n.to_string_lossy().eq_ignore_ascii_case(name))
                    .unwrap_or(false)
        })
}

/// Windows 7 media ship no EFI loader in the tree; pull it out of
/// `install.wim` and stage it as the removable-media default loader.
pub fn support_windows7_uefi_boot(
    hal: &dyn InstallerHal,
    source_mount: &Path,
    target_mount: &Path,
    has_extractor: bool,
) -> Result<Win7UefiOutcome> {
    if !is_windows7_media(source_mount) {
        return Ok(Win7UefiOutcome::NotWindows7);
    }
    if let Some(existing) = find_efi_loader(target_mount) {
        log::debug!("EFI loader already present: {}", existing.display());
        return Ok(Win7UefiOutcome::LoaderAlreadyPresent(existing));
    }
    if !has_extractor {
        return Err(InstallError::BootWorkaround(
            "Windows 7 media needs 7z to extract its UEFI bootloader".to_string(),
        ));
    }

    log::info!("Windows 7 media detected, extracting UEFI bootloader");
    let loader = hal
        .extract_member(&source_mount.join(INSTALL_WIM), WIM_EFI_LOADER)
        .map_err(|e| InstallError::BootWorkaround(format!("extracting {}: {}", WIM_EFI_LOADER, e)))?;

    let boot_dir = find_child_ci(target_mount, "efi")
        .and_then(|efi| find_child_ci(&efi, "boot"))
        .unwrap_or_else(|| target_mount.join("efi").join("boot"));
    fs::create_dir_all(&boot_dir).map_err(|e| {
        InstallError::BootWorkaround(format!("creating {}: {}", boot_dir.display(), e))
    })?;
    let dest = boot_dir.join("bootx64.efi");
    fs::write(&dest, &loader).map_err(|e| {
        InstallError::BootWorkaround(format!("writing {}: {}", dest.display(), e))
    })?;
    log::info!("✅ Installed {}", dest.display());
    Ok(Win7UefiOutcome::Installed(dest))
}
