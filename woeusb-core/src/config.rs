//! Host-level settings, read from an optional TOML file.
//!
//! Per-job parameters (source, target, filesystem...) are not configured here;
//! they come from the command line as an [`crate::job::InstallRequest`].

use crate::errors::{InstallError, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use woeusb_hal::{FatFormatter, GrubInstaller};

pub const DEFAULT_CONFIG_PATH: &str = "/etc/woeusb/config.toml";
pub const DEFAULT_MOUNT_ROOT: &str = "/media";
pub const DEFAULT_UEFI_NTFS_URL: &str =
    "https://github.com/pbatard/rufus/raw/master/res/uefi/uefi-ntfs.img";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub mount_root: PathBuf,
    /// Parent of the `WoeUSB.*` work directory; system temp dir when unset.
    pub temp_root: Option<PathBuf>,
    pub poll_interval_ms: u64,
    pub uefi_ntfs_url: String,
    pub uefi_ntfs_sha256: Option<String>,
    pub download_timeout_secs: u64,
    pub log_file: Option<PathBuf>,
    pub tools: ToolOverrides,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            mount_root: PathBuf::from(DEFAULT_MOUNT_ROOT),
            temp_root: None,
            poll_interval_ms: 250,
            uefi_ntfs_url: DEFAULT_UEFI_NTFS_URL.to_string(),
            uefi_ntfs_sha256: None,
            download_timeout_secs: 60,
            log_file: None,
            tools: ToolOverrides::default(),
        }
    }
}

/// Pin a specific tool instead of probing `PATH` in the default order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ToolOverrides {
    pub fat_formatter: Option<String>,
    pub grub_installer: Option<String>,
}

impl ToolOverrides {
    pub fn fat_formatter(&self) -> Result<Option<FatFormatter>> {
        self.fat_formatter
            .as_deref()
            .map(|name| {
                FatFormatter::from_command(name).ok_or_else(|| {
                    InstallError::Config(format!("unknown fat_formatter `{}`", name))
                })
            })
            .transpose()
    }

    pub fn grub_installer(&self) -> Result<Option<GrubInstaller>> {
        self.grub_installer
            .as_deref()
            .map(|name| {
                GrubInstaller::from_command(name).ok_or_else(|| {
                    InstallError::Config(format!("unknown grub_installer `{}`", name))
                })
            })
            .transpose()
    }
}

impl Settings {
    /// Load settings from `path`, or from [`DEFAULT_CONFIG_PATH`] when it
    /// exists, or fall back to defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => {
                let default = PathBuf::from(DEFAULT_CONFIG_PATH);
                if !default.exists() {
                    log::debug!("no settings file, using defaults");
                    return Ok(Self::default());
                }
                default
            }
        };
        let text = fs::read_to_string(&path)
            .map_err(|e| InstallError::Config(format!("{}: {}", path.display(), e)))?;
        let settings = Self::from_toml_str(&text)
            .map_err(|e| InstallError::Config(format!("{}: {}", path.display(), e)))?;
        log::debug!("loaded settings from {}", path.display());
        Ok(settings)
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        let settings: Settings =
            toml::from_str(text).map_err(|e| InstallError::Config(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if !self.mount_root.is_absolute() {
            return Err(InstallError::Config(format!(
                "mount_root must be an absolute path, got {}",
                self.mount_root.display()
            )));
        }
        if !(1..=999).contains(&self.poll_interval_ms) {
            return Err(InstallError::Config(format!(
                "poll_interval_ms must be between 1 and 999, got {}",
                self.poll_interval_ms
            )));
        }
        if self.download_timeout_secs == 0 {
            return Err(InstallError::Config(
                "download_timeout_secs must be positive".to_string(),
            ));
        }
        if let Some(sum) = &self.uefi_ntfs_sha256 {
            if sum.len() != 64 || !sum.chars().all(|c| c.is_ascii_hexdigit()) {
                return Err(InstallError::Config(format!(
                    "uefi_ntfs_sha256 is not a SHA-256 hex digest: {}",
                    sum
                )));
            }
        }
        self.tools.fat_formatter()?;
        self.tools.grub_installer()?;
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn download_timeout(&self) -> Duration {
        Duration::from_secs(self.download_timeout_secs)
    }

    pub fn temp_root(&self) -> PathBuf {
        self.temp_root.clone().unwrap_or_else(std::env::temp_dir)
    }
}
