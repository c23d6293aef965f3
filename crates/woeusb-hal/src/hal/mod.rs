//! HAL trait definitions and implementations.
//!
//! This module defines the core traits for system operations and provides
//! both real (LinuxHal) and fake (FakeHal) implementations.

pub mod boot_ops;
pub mod copy_native;
pub mod copy_ops;
pub mod extract_ops;
pub mod fake_hal;
pub mod fetch_ops;
pub mod flash_ops;
pub mod format_ops;
pub mod linux_hal;
pub mod mount_ops;
pub mod partition_ops;
pub mod probe_ops;
pub mod system_ops;

pub use boot_ops::BootOps;
pub use copy_ops::{CopyOps, CopyOptions, CopyProgress};
pub use extract_ops::ExtractOps;
pub use fake_hal::{FailPoint, FakeHal, Operation};
pub use fetch_ops::FetchOps;
pub use flash_ops::FlashOps;
pub use format_ops::FormatOps;
pub use linux_hal::LinuxHal;
pub use mount_ops::{MountOps, MountOptions};
pub use partition_ops::{PartedOp, PartitionOps};
pub use probe_ops::ProbeOps;
pub use system_ops::SystemOps;

/// Complete HAL combining all operation traits the installer needs.
pub trait InstallerHal:
    MountOps
    + PartitionOps
    + FormatOps
    + BootOps
    + SystemOps
    + ProbeOps
    + ExtractOps
    + FetchOps
    + FlashOps
    + CopyOps
    + Send
    + Sync
{
}

/// Automatically implement InstallerHal for any type implementing all required traits.
impl<T> InstallerHal for T where
    T: MountOps
        + PartitionOps
        + FormatOps
        + BootOps
        + SystemOps
        + ProbeOps
        + ExtractOps
        + FetchOps
        + FlashOps
        + CopyOps
        + Send
        + Sync
{
}
