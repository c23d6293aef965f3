use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use woeusb_core::job::DEFAULT_LABEL;
use woeusb_core::{FsKind, InstallRequest};

#[derive(Parser, Debug)]
#[command(
    name = "woeusb",
    version,
    about = "Create a bootable Windows USB installer from an ISO image or DVD"
)]
pub struct Cli {
    /// Settings file (default: /etc/woeusb/config.toml when it exists)
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Log debug output
    #[arg(long, short, global = true)]
    pub verbose: bool,

    /// Plain, uncolored status output
    #[arg(long, global = true)]
    pub no_color: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Write a Windows installer onto a USB device or partition
    Install(InstallArgs),
}

#[derive(Args, Debug, Clone)]
pub struct InstallArgs {
    /// Wipe TARGET, a whole device, and build the installer from scratch
    #[arg(long)]
    pub device: bool,

    /// Copy onto TARGET, an existing FAT or NTFS partition
    #[arg(long)]
    pub partition: bool,

    /// Windows ISO image or optical drive (e.g. /dev/sr0)
    #[arg(long, value_name = "PATH")]
    pub source: PathBuf,

    /// Target device (e.g. /dev/sdb) or partition (e.g. /dev/sdb1)
    #[arg(long, value_name = "PATH")]
    pub target: PathBuf,

    /// Filesystem for the installer partition (device mode)
    #[arg(long, value_enum, default_value_t = FsKind::Fat)]
    pub target_filesystem: FsKind,

    /// Filesystem label of the installer partition
    #[arg(long, default_value = DEFAULT_LABEL)]
    pub label: String,

    /// Set the boot flag on the installer partition, for firmware that
    /// ignores unflagged disks
    #[arg(long)]
    pub workaround_bios_boot_flag: bool,

    /// Do not install GRUB for legacy BIOS booting
    #[arg(long)]
    pub workaround_skip_grub: bool,
}

impl InstallArgs {
    /// Mode flags are passed through unchecked; the pipeline rejects
    /// conflicting or missing modes itself.
    pub fn to_request(&self) -> InstallRequest {
        InstallRequest {
            device_mode: self.device,
            partition_mode: self.partition,
            source: self.source.clone(),
            target: self.target.clone(),
            filesystem: self.target_filesystem,
            label: self.label.clone(),
            workaround_bios_boot_flag: self.workaround_bios_boot_flag,
            skip_legacy_bootloader: self.workaround_skip_grub,
        }
    }
}
