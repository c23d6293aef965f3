//! Legacy bootloader installation.

use crate::{GrubInstaller, HalResult};
use std::path::Path;

pub trait BootOps {
    /// Install GRUB for i386-pc into the boot sector of `device`, keeping its
    /// files under `boot_directory` (the mounted target filesystem).
    fn install_grub(
        &self,
        installer: GrubInstaller,
        boot_directory: &Path,
        device: &Path,
    ) -> HalResult<()>;
}
