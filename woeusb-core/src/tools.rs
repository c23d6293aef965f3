//! Dependency discovery: resolve the external tools a job needs, once.

use crate::config::ToolOverrides;
use crate::errors::{InstallError, Result};
use crate::job::InstallMode;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use woeusb_hal::{FatFormatter, GrubInstaller};

const ALWAYS_REQUIRED: [&str; 5] = ["wipefs", "parted", "lsblk", "blockdev", "mount"];
const NTFS_FORMATTER: &str = "mkntfs";
const EXTRACTOR: &str = "7z";

/// Tools chosen for a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolSet {
    pub fat_formatter: FatFormatter,
    /// `None` when the legacy bootloader is not going to be installed.
    pub grub_installer: Option<GrubInstaller>,
    /// `7z` is only needed by the Windows 7 UEFI workaround.
    pub has_extractor: bool,
}

pub fn find_executable_in_path(binary: &str, path_env: &str) -> Option<PathBuf> {
    for dir in path_env.split(':').filter(|dir| !dir.is_empty()) {
        let candidate = Path::new(dir).join(binary);
        if let Ok(metadata) = fs::metadata(&candidate) {
            if metadata.is_file() && metadata.permissions().mode() & 0o111 != 0 {
                return Some(candidate);
            }
        }
    }
    None
}

fn pick<T: Copy>(
    candidates: &[T],
    preferred: Option<T>,
    command: impl Fn(T) -> &'static str,
    path_env: &str,
) -> std::result::Result<T, Option<T>> {
    if let Some(tool) = preferred {
        return match find_executable_in_path(command(tool), path_env) {
            Some(_) => Ok(tool),
            None => Err(Some(tool)),
        };
    }
    candidates
        .iter()
        .copied()
        .find(|tool| find_executable_in_path(command(*tool), path_env).is_some())
        .ok_or(None)
}

/// Probe `path_env` for everything `mode` needs.
///
/// All missing tools are reported together.
pub fn discover(
    mode: InstallMode,
    skip_legacy_bootloader: bool,
    overrides: &ToolOverrides,
    path_env: &str,
) -> Result<ToolSet> {
    let mut missing: Vec<String> = ALWAYS_REQUIRED
        .iter()
        .filter(|bin| find_executable_in_path(bin, path_env).is_none())
        .map(|bin| bin.to_string())
        .collect();

    let fat_formatter = match pick(
        &FatFormatter::ALL,
        overrides.fat_formatter()?,
        FatFormatter::command,
        path_env,
    ) {
        Ok(tool) => Some(tool),
        Err(Some(pinned)) => {
            missing.push(pinned.command().to_string());
            None
        }
        Err(None) => {
            missing.push("mkdosfs/mkfs.fat/mkfs.vfat".to_string());
            None
        }
    };

    let mut grub_installer = None;
    if mode == InstallMode::Device {
        if find_executable_in_path(NTFS_FORMATTER, path_env).is_none() {
            missing.push(NTFS_FORMATTER.to_string());
        }
        if !skip_legacy_bootloader {
            match pick(
                &GrubInstaller::ALL,
                overrides.grub_installer()?,
                GrubInstaller::command,
                path_env,
            ) {
                Ok(tool) => grub_installer = Some(tool),
                Err(Some(pinned)) => missing.push(pinned.command().to_string()),
                Err(None) => missing.push("grub-install/grub2-install".to_string()),
            }
        }
    }

    let has_extractor = find_executable_in_path(EXTRACTOR, path_env).is_some();
    if !has_extractor {
        log::warn!("⚠️ 7z not found; Windows 7 UEFI support will be unavailable");
    }

    match fat_formatter {
        Some(fat_formatter) if missing.is_empty() => {
            log::debug!(
                "tools: fat={} grub={:?} 7z={}",
                fat_formatter,
                grub_installer.map(GrubInstaller::command),
                has_extractor
            );
            Ok(ToolSet {
                fat_formatter,
                grub_installer,
                has_extractor,
            })
        }
        _ => Err(InstallError::Validation(format!(
            "missing required tools on PATH: {}",
            missing.join(", ")
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn stub_bin(dir: &Path, names: &[&str]) {
        for name in names {
            let path = dir.join(name);
            fs::write(&path, "#!/bin/sh\nexit 0\n").unwrap();
            fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        }
    }

    fn base_tools(dir: &Path) {
        stub_bin(dir, &ALWAYS_REQUIRED);
    }

    #[test]
    fn device_mode_prefers_first_available_variants() {
        let dir = tempdir().unwrap();
        base_tools(dir.path());
        stub_bin(dir.path(), &["mkfs.vfat", "mkfs.fat", "mkntfs", "grub2-install", "7z"]);
        let path_env = dir.path().display().to_string();

        let tools = discover(InstallMode::Device, false, &ToolOverrides::default(), &path_env)
            .unwrap();

        assert_eq!(tools.fat_formatter, FatFormatter::MkfsFat);
        assert_eq!(tools.grub_installer, Some(GrubInstaller::Grub2Install));
        assert!(tools.has_extractor);
    }

    #[test]
    fn missing_tools_are_reported_together() {
        let dir = tempdir().unwrap();
        stub_bin(dir.path(), &["wipefs", "lsblk", "blockdev", "mount"]);
        let path_env = dir.path().display().to_string();

        let err = discover(InstallMode::Device, false, &ToolOverrides::default(), &path_env)
            .unwrap_err()
            .to_string();

        assert!(err.contains("parted"));
        assert!(err.contains("mkntfs"));
        assert!(err.contains("grub-install/grub2-install"));
    }

    #[test]
    fn partition_mode_needs_no_grub_or_mkntfs() {
        let dir = tempdir().unwrap();
        base_tools(dir.path());
        stub_bin(dir.path(), &["mkdosfs"]);
        let path_env = dir.path().display().to_string();

        let tools = discover(
            InstallMode::Partition,
            false,
            &ToolOverrides::default(),
            &path_env,
        )
        .unwrap();
        assert_eq!(tools.grub_installer, None);
        assert!(!tools.has_extractor);
    }

    #[test]
    fn skipping_legacy_bootloader_skips_grub_probe() {
        let dir = tempdir().unwrap();
        base_tools(dir.path());
        stub_bin(dir.path(), &["mkdosfs", "mkntfs"]);
        let path_env = dir.path().display().to_string();

        let tools =
            discover(InstallMode::Device, true, &ToolOverrides::default(), &path_env).unwrap();
        assert_eq!(tools.grub_installer, None);
    }

    #[test]
    fn pinned_tool_must_exist() {
        let dir = tempdir().unwrap();
        base_tools(dir.path());
        stub_bin(dir.path(), &["mkdosfs", "mkntfs", "grub-install"]);
        let path_env = dir.path().display().to_string();
        let overrides = ToolOverrides {
            fat_formatter: Some("mkfs.vfat".to_string()),
            grub_installer: None,
        };

        let err = discover(InstallMode::Device, false, &overrides, &path_env).unwrap_err();
        assert!(err.to_string().contains("mkfs.vfat"));
    }

    #[test]
    fn non_executable_files_are_ignored() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("parted");
        fs::write(&path, "").unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o644)).unwrap();
        assert!(find_executable_in_path("parted", &dir.path().display().to_string()).is_none());
    }
}
