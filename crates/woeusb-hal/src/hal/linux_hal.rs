//! Linux HAL implementation using real system calls and host tools.

use super::{
    copy_native, BootOps, CopyOps, CopyOptions, CopyProgress, ExtractOps, FetchOps, FlashOps,
    FormatOps, MountOps, MountOptions, PartedOp, PartitionOps, ProbeOps, SystemOps,
};
use crate::procfs::mountinfo;
use crate::{FatFormatter, GrubInstaller, HalError, HalResult};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::os::unix::fs::{FileTypeExt, OpenOptionsExt};
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};
use std::time::Duration;
use wait_timeout::ChildExt;

/// Real HAL implementation for Linux systems.
#[derive(Debug, Clone, Default)]
pub struct LinuxHal;

impl LinuxHal {
    pub fn new() -> Self {
        Self
    }
}

const PROBE_TIMEOUT: Duration = Duration::from_secs(10);
const MOUNT_TIMEOUT: Duration = Duration::from_secs(60);
const SYNC_TIMEOUT: Duration = Duration::from_secs(30 * 60);
const SETTLE_TIMEOUT: Duration = Duration::from_secs(60);
const FORMAT_TIMEOUT: Duration = Duration::from_secs(10 * 60);
const WIPEFS_TIMEOUT: Duration = Duration::from_secs(60);
const PARTED_TIMEOUT: Duration = Duration::from_secs(5 * 60);
const GRUB_TIMEOUT: Duration = Duration::from_secs(5 * 60);
const EXTRACT_TIMEOUT: Duration = Duration::from_secs(5 * 60);
/// The kernel needs a moment to publish partition nodes after a re-read.
const REREAD_SETTLE: Duration = Duration::from_secs(3);

fn map_command_err(program: &str, err: std::io::Error) -> HalError {
    if err.kind() == std::io::ErrorKind::NotFound {
        return HalError::CommandNotFound(program.to_string());
    }
    HalError::Io(err)
}

fn output_failed(program: &str, output: &Output) -> HalError {
    HalError::CommandFailed {
        program: program.to_string(),
        code: output.status.code(),
        stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
    }
}

fn output_with_timeout(program: &str, cmd: &mut Command, timeout: Duration) -> HalResult<Output> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    log::debug!("exec: {:?}", cmd);
    let mut child = cmd.spawn().map_err(|e| map_command_err(program, e))?;

    let mut stdout = child.stdout.take();
    let mut stderr = child.stderr.take();

    // Drain pipes concurrently to avoid deadlocks on large output.
    let stdout_handle = std::thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut out) = stdout.take() {
            let _ = out.read_to_end(&mut buf);
        }
        buf
    });
    let stderr_handle = std::thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut err) = stderr.take() {
            let _ = err.read_to_end(&mut buf);
        }
        buf
    });

    let status = match child.wait_timeout(timeout).map_err(HalError::Io)? {
        Some(status) => status,
        None => {
            let _ = child.kill();
            let _ = child.wait();
            let _ = stdout_handle.join();
            let _ = stderr_handle.join();
            return Err(HalError::CommandTimeout {
                program: program.to_string(),
                timeout_secs: timeout.as_secs(),
            });
        }
    };

    let stdout = stdout_handle.join().unwrap_or_default();
    let stderr = stderr_handle.join().unwrap_or_default();
    Ok(Output {
        status,
        stdout,
        stderr,
    })
}

fn status_with_timeout(program: &str, cmd: &mut Command, timeout: Duration) -> HalResult<()> {
    let output = output_with_timeout(program, cmd, timeout)?;
    if !output.status.success() {
        return Err(output_failed(program, &output));
    }
    Ok(())
}

fn map_nix_err(err: nix::errno::Errno) -> HalError {
    use nix::errno::Errno;
    match err {
        Errno::EBUSY => HalError::DiskBusy,
        Errno::EACCES | Errno::EPERM => HalError::PermissionDenied,
        other => HalError::Nix(other),
    }
}

fn read_mountinfo() -> HalResult<Vec<mountinfo::MountInfo>> {
    let content = fs::read_to_string("/proc/self/mountinfo")?;
    Ok(mountinfo::parse_mountinfo(&content))
}

impl MountOps for LinuxHal {
    fn mount_device(
        &self,
        device: &Path,
        target: &Path,
        fstype: Option<&str>,
        options: MountOptions,
    ) -> HalResult<()> {
        // mount(8) takes care of loop setup and of trying each type in a list.
        let mut cmd = Command::new("mount");
        if let Some(fstype) = fstype {
            cmd.args(["-t", fstype]);
        }
        if let Some(opts) = options.options.as_deref() {
            cmd.args(["-o", opts]);
        }
        cmd.arg(device).arg(target);
        status_with_timeout("mount", &mut cmd, MOUNT_TIMEOUT)
    }

    fn unmount(&self, target: &Path) -> HalResult<()> {
        nix::mount::umount2(target, nix::mount::MntFlags::empty()).map_err(map_nix_err)?;
        Ok(())
    }

    fn is_mounted(&self, path: &Path) -> HalResult<bool> {
        let entries = read_mountinfo()?;
        Ok(mountinfo::is_mounted_from_info(path, &entries))
    }

    fn mounts_of_device(&self, device: &Path) -> HalResult<Vec<PathBuf>> {
        let entries = read_mountinfo()?;
        Ok(mountinfo::mounts_of_device(device, &entries))
    }
}

impl FormatOps for LinuxHal {
    fn format_fat(
        &self,
        device: &Path,
        fat_bits: u8,
        label: &str,
        formatter: FatFormatter,
    ) -> HalResult<()> {
        let program = formatter.command();
        let mut cmd = Command::new(program);
        cmd.arg("-F")
            .arg(fat_bits.to_string())
            .args(["-n", label])
            .arg(device);
        status_with_timeout(program, &mut cmd, FORMAT_TIMEOUT)
    }

    fn format_ntfs(&self, device: &Path, label: &str) -> HalResult<()> {
        let mut cmd = Command::new("mkntfs");
        cmd.args(["--quick", "--label", label]).arg(device);
        status_with_timeout("mkntfs", &mut cmd, FORMAT_TIMEOUT)
    }
}

impl PartitionOps for LinuxHal {
    fn wipefs_all(&self, disk: &Path) -> HalResult<()> {
        let mut cmd = Command::new("wipefs");
        cmd.args(["--all"]).arg(disk);
        status_with_timeout("wipefs", &mut cmd, WIPEFS_TIMEOUT)
    }

    fn parted(&self, disk: &Path, op: PartedOp) -> HalResult<String> {
        let (global, args) = op.to_args();
        let mut cmd = Command::new("parted");
        cmd.args(&global).arg("--script").arg(disk).args(&args);
        let output = output_with_timeout("parted", &mut cmd, PARTED_TIMEOUT)?;
        if !output.status.success() {
            return Err(output_failed("parted", &output));
        }
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

impl BootOps for LinuxHal {
    fn install_grub(
        &self,
        installer: GrubInstaller,
        boot_directory: &Path,
        device: &Path,
    ) -> HalResult<()> {
        let program = installer.command();
        let mut cmd = Command::new(program);
        cmd.arg("--target=i386-pc")
            .arg(format!("--boot-directory={}", boot_directory.display()))
            .arg("--force")
            .arg(device);
        status_with_timeout(program, &mut cmd, GRUB_TIMEOUT)
    }
}

impl SystemOps for LinuxHal {
    fn sync(&self) -> HalResult<()> {
        let mut cmd = Command::new("sync");
        status_with_timeout("sync", &mut cmd, SYNC_TIMEOUT)
    }

    fn udev_settle(&self) -> HalResult<()> {
        let mut cmd = Command::new("udevadm");
        cmd.arg("settle");
        status_with_timeout("udevadm", &mut cmd, SETTLE_TIMEOUT)
    }

    fn reread_partition_table(&self, device: &Path) -> HalResult<()> {
        let mut cmd = Command::new("blockdev");
        cmd.arg("--rereadpt").arg(device);
        status_with_timeout("blockdev", &mut cmd, PROBE_TIMEOUT)?;
        std::thread::sleep(REREAD_SETTLE);
        Ok(())
    }

    fn is_root(&self) -> bool {
        nix::unistd::geteuid().is_root()
    }
}

impl ProbeOps for LinuxHal {
    fn is_block_device(&self, path: &Path) -> HalResult<bool> {
        match fs::metadata(path) {
            Ok(meta) => Ok(meta.file_type().is_block_device()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(HalError::Io(err)),
        }
    }

    fn is_device_busy(&self, device: &Path) -> HalResult<bool> {
        if !self.mounts_of_device(device)?.is_empty() {
            return Ok(true);
        }
        // Block devices refuse O_EXCL opens while anything else holds them.
        match OpenOptions::new()
            .read(true)
            .custom_flags(libc::O_EXCL)
            .open(device)
        {
            Ok(_) => Ok(false),
            Err(err) if err.raw_os_error() == Some(libc::EBUSY) => Ok(true),
            Err(err) if err.kind() == io::ErrorKind::PermissionDenied => {
                Err(HalError::PermissionDenied)
            }
            Err(err) => Err(HalError::Io(err)),
        }
    }

    fn filesystem_type(&self, device: &Path) -> HalResult<String> {
        let mut cmd = Command::new("lsblk");
        cmd.args(["--noheadings", "--nodeps", "--output", "FSTYPE"])
            .arg(device);
        let output = output_with_timeout("lsblk", &mut cmd, PROBE_TIMEOUT)?;
        if !output.status.success() {
            return Err(output_failed("lsblk", &output));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

impl ExtractOps for LinuxHal {
    fn extract_member(&self, archive: &Path, member: &str) -> HalResult<Vec<u8>> {
        let mut cmd = Command::new("7z");
        cmd.args(["e", "-so"]).arg(archive).arg(member);
        let output = output_with_timeout("7z", &mut cmd, EXTRACT_TIMEOUT)?;
        if !output.status.success() {
            return Err(output_failed("7z", &output));
        }
        if output.stdout.is_empty() {
            return Err(HalError::Other(format!(
                "{} not found in {}",
                member,
                archive.display()
            )));
        }
        Ok(output.stdout)
    }
}

impl FetchOps for LinuxHal {
    fn download(&self, url: &str, dest: &Path, timeout: Duration) -> HalResult<u64> {
        log::info!("📥 Downloading {} -> {}", url, dest.display());
        let client = reqwest::blocking::Client::builder()
            .user_agent(concat!("woeusb/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .map_err(|e| HalError::Download(e.to_string()))?;

        let mut response = client
            .get(url)
            .send()
            .and_then(|r| r.error_for_status())
            .map_err(|e| HalError::Download(format!("{}: {}", url, e)))?;

        let mut file = File::create(dest)?;
        let written = response
            .copy_to(&mut file)
            .map_err(|e| HalError::Download(format!("{}: {}", url, e)))?;
        file.flush()?;
        log::debug!("downloaded {} bytes from {}", written, url);
        Ok(written)
    }
}

impl FlashOps for LinuxHal {
    fn flash_image(&self, image_path: &Path, target: &Path) -> HalResult<()> {
        log::info!(
            "💾 Writing image {} -> {}",
            image_path.display(),
            target.display()
        );
        // The target must already exist; a missing node means the kernel has
        // not published the partition yet.
        let mut out = match OpenOptions::new().write(true).open(target) {
            Ok(out) => out,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(HalError::Other(format!(
                    "device node {} does not exist",
                    target.display()
                )));
            }
            Err(err) => return Err(HalError::Io(err)),
        };
        let mut input = File::open(image_path)?;
        io::copy(&mut input, &mut out)?;
        // Best-effort flush (block devices may ignore).
        out.sync_all().ok();
        Ok(())
    }
}

impl CopyOps for LinuxHal {
    fn copy_tree_native(
        &self,
        src: &Path,
        dst: &Path,
        opts: &CopyOptions,
        on_progress: &mut dyn FnMut(&CopyProgress) -> bool,
    ) -> HalResult<()> {
        copy_native::copy_tree(src, dst, opts, on_progress)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn flash_image_overwrites_existing_target_in_place() {
        let dir = tempdir().unwrap();
        let image = dir.path().join("uefi-ntfs.img");
        let target = dir.path().join("target.img");
        std::fs::write(&image, b"test content").unwrap();
        std::fs::write(&target, vec![0u8; 32]).unwrap();

        let hal = LinuxHal::new();
        hal.flash_image(&image, &target).unwrap();

        let written = std::fs::read(&target).unwrap();
        assert_eq!(written.len(), 32);
        assert_eq!(&written[..12], b"test content");
    }

    #[test]
    fn flash_image_never_creates_a_missing_node() {
        let dir = tempdir().unwrap();
        let image = dir.path().join("uefi-ntfs.img");
        let target = dir.path().join("sdb2");
        std::fs::write(&image, b"test content").unwrap();

        let hal = LinuxHal::new();
        let err = hal.flash_image(&image, &target).unwrap_err();

        assert!(err.to_string().contains("does not exist"));
        assert!(!target.exists());
    }

    #[test]
    fn regular_files_are_not_block_devices() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("disk.img");
        std::fs::write(&file, b"").unwrap();

        let hal = LinuxHal::new();
        assert!(!hal.is_block_device(&file).unwrap());
        assert!(!hal.is_block_device(&dir.path().join("missing")).unwrap());
    }

    #[test]
    fn unused_regular_file_is_not_busy() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("disk.img");
        std::fs::write(&file, b"").unwrap();

        let hal = LinuxHal::new();
        assert!(!hal.is_device_busy(&file).unwrap());
    }

    #[test]
    fn missing_program_maps_to_command_not_found() {
        let mut cmd = Command::new("woeusb-definitely-missing-tool");
        let err = output_with_timeout(
            "woeusb-definitely-missing-tool",
            &mut cmd,
            Duration::from_secs(1),
        )
        .unwrap_err();
        assert!(matches!(err, HalError::CommandNotFound(_)));
    }

    #[test]
    fn nix_busy_maps_to_disk_busy() {
        assert!(matches!(
            map_nix_err(nix::errno::Errno::EBUSY),
            HalError::DiskBusy
        ));
        assert!(matches!(
            map_nix_err(nix::errno::Errno::EPERM),
            HalError::PermissionDenied
        ));
    }
}
