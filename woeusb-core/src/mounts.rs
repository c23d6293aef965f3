//! Mount Manager: process-private mountpoints for the source and target.

use crate::errors::{InstallError, Result};
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use woeusb_hal::{InstallerHal, MountOptions};

const SOURCE_FSTYPES: &str = "udf,iso9660";
const MAX_NAME_ATTEMPTS: u32 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MountRole {
    Source,
    Target,
}

impl fmt::Display for MountRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MountRole::Source => f.write_str("source"),
            MountRole::Target => f.write_str("target"),
        }
    }
}

pub struct MountManager<'a> {
    hal: &'a dyn InstallerHal,
    root: PathBuf,
}

impl<'a> MountManager<'a> {
    pub fn new(hal: &'a dyn InstallerHal, root: impl Into<PathBuf>) -> Self {
        Self {
            hal,
            root: root.into(),
        }
    }

    /// Create a fresh `<root>/woeusb_<role>_<secs>_<pid>` directory.
    ///
    /// An existing directory is never reused: on collision a numeric suffix
    /// is appended. The returned path is fully resolved so it matches the
    /// kernel's mount table.
    pub fn create_mountpoint(&self, role: MountRole) -> Result<PathBuf> {
        fs::create_dir_all(&self.root).map_err(|e| {
            InstallError::io(format!("creating mount root {}", self.root.display()), e)
        })?;
        let root = fs::canonicalize(&self.root).map_err(|e| {
            InstallError::io(format!("resolving mount root {}", self.root.display()), e)
        })?;
        let secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        let base = format!("woeusb_{}_{}_{}", role, secs, std::process::id());

        for attempt in 0..MAX_NAME_ATTEMPTS {
            let name = if attempt == 0 {
                base.clone()
            } else {
                format!("{}_{}", base, attempt)
            };
            let path = root.join(name);
            match fs::create_dir(&path) {
                Ok(()) => {
                    log::debug!("created {} mountpoint {}", role, path.display());
                    return Ok(path);
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
                Err(e) => {
                    return Err(InstallError::io(
                        format!("creating mountpoint {}", path.display()),
                        e,
                    ))
                }
            }
        }
        Err(InstallError::io(
            format!("no free mountpoint name under {}", root.display()),
            io::Error::from(io::ErrorKind::AlreadyExists),
        ))
    }

    /// Mount the installation source read-only.
    ///
    /// Image files are loop-mounted as UDF or ISO 9660; optical drives and
    /// other block devices are mounted with their detected filesystem.
    pub fn mount_source(&self, source: &Path, mountpoint: &Path) -> Result<()> {
        let is_block = self
            .hal
            .is_block_device(source)
            .map_err(|e| mount_error(source, mountpoint, e))?;
        let (fstype, options) = if is_block {
            (None, MountOptions::with_options("ro"))
        } else {
            (Some(SOURCE_FSTYPES), MountOptions::with_options("loop,ro"))
        };
        log::info!(
            "Mounting source {} on {}",
            source.display(),
            mountpoint.display()
        );
        self.hal
            .mount_device(source, mountpoint, fstype, options)
            .map_err(|e| mount_error(source, mountpoint, e))
    }

    /// Mount the target partition read-write.
    pub fn mount_target(&self, partition: &Path, mountpoint: &Path) -> Result<()> {
        log::info!(
            "Mounting target {} on {}",
            partition.display(),
            mountpoint.display()
        );
        self.hal
            .mount_device(partition, mountpoint, None, MountOptions::new())
            .map_err(|e| mount_error(partition, mountpoint, e))
    }

    /// Unmount `mountpoint` and remove the directory.
    ///
    /// Returns `Ok(false)` without touching anything when nothing is mounted
    /// there, so calling it twice is harmless.
    pub fn unmount(&self, mountpoint: &Path) -> Result<bool> {
        let mounted = self
            .hal
            .is_mounted(mountpoint)
            .map_err(|source| InstallError::Unmount {
                mountpoint: mountpoint.to_path_buf(),
                source,
            })?;
        if !mounted {
            log::debug!("{} is not mounted", mountpoint.display());
            return Ok(false);
        }
        self.hal
            .unmount(mountpoint)
            .map_err(|source| InstallError::Unmount {
                mountpoint: mountpoint.to_path_buf(),
                source,
            })?;
        log::info!("Unmounted {}", mountpoint.display());
        self.remove_mountpoint(mountpoint);
        Ok(true)
    }

    /// Remove an (unmounted) mountpoint directory, best effort.
    pub fn remove_mountpoint(&self, mountpoint: &Path) {
        match fs::remove_dir(mountpoint) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => log::warn!(
                "⚠️ Could not remove mountpoint {}: {}",
                mountpoint.display(),
                e
            ),
        }
    }
}

fn mount_error(device: &Path, mountpoint: &Path, source: woeusb_hal::HalError) -> InstallError {
    if source.is_permission_denied() {
        return InstallError::Permission(format!("mount {}: {}", device.display(), source));
    }
    InstallError::Mount {
        device: device.to_path_buf(),
        mountpoint: mountpoint.to_path_buf(),
        source,
    }
}
