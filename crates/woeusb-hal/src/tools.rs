//! Identifiers for external tools that have interchangeable implementations.
//!
//! The pipeline resolves these once at startup and passes the chosen variant
//! down to the HAL, so call sites never compare command names.

use std::fmt;

/// FAT filesystem formatter. All variants accept the same `mkfs.fat` flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FatFormatter {
    Mkdosfs,
    MkfsFat,
    MkfsVfat,
}

impl FatFormatter {
    /// Probe order used during dependency discovery.
    pub const ALL: [FatFormatter; 3] = [
        FatFormatter::Mkdosfs,
        FatFormatter::MkfsFat,
        FatFormatter::MkfsVfat,
    ];

    pub fn command(self) -> &'static str {
        match self {
            FatFormatter::Mkdosfs => "mkdosfs",
            FatFormatter::MkfsFat => "mkfs.fat",
            FatFormatter::MkfsVfat => "mkfs.vfat",
        }
    }

    pub fn from_command(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.command() == name)
    }
}

impl fmt::Display for FatFormatter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.command())
    }
}

/// Legacy (BIOS) GRUB installer. Distributions ship it under one of two names,
/// and the name decides the directory GRUB looks for its config in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrubInstaller {
    GrubInstall,
    Grub2Install,
}

impl GrubInstaller {
    pub const ALL: [GrubInstaller; 2] = [GrubInstaller::GrubInstall, GrubInstaller::Grub2Install];

    pub fn command(self) -> &'static str {
        match self {
            GrubInstaller::GrubInstall => "grub-install",
            GrubInstaller::Grub2Install => "grub2-install",
        }
    }

    /// Directory name (under the boot directory) holding `grub.cfg`.
    pub fn prefix(self) -> &'static str {
        match self {
            GrubInstaller::GrubInstall => "grub",
            GrubInstaller::Grub2Install => "grub2",
        }
    }

    pub fn from_command(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|g| g.command() == name)
    }
}

impl fmt::Display for GrubInstaller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.command())
    }
}
