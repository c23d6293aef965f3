use std::fs::{self, File};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;
use tempfile::{tempdir, TempDir};
use woeusb_core::{
    CancelToken, FsKind, InstallError, InstallOutcome, InstallRequest, Installer, ProgressUpdate,
    Settings, Stage,
};
use woeusb_hal::{FailPoint, FakeHal, Operation, PartedOp};

const TOOLS: [&str; 8] = [
    "wipefs",
    "parted",
    "lsblk",
    "blockdev",
    "mount",
    "mkdosfs",
    "mkntfs",
    "grub-install",
];

struct Harness {
    dir: TempDir,
    iso: PathBuf,
    source: PathBuf,
    target: PathBuf,
}

impl Harness {
    fn new() -> Self {
        let dir = tempdir().expect("tempdir");
        let harness = Self {
            iso: dir.path().join("Win10_x64.iso"),
            source: dir.path().join("iso-contents"),
            target: dir.path().join("usb-contents"),
            dir,
        };
        fs::create_dir_all(harness.bin()).expect("bin dir");
        for tool in TOOLS {
            harness.add_tool(tool);
        }
        fs::create_dir_all(harness.mount_root()).expect("mount root");
        fs::create_dir_all(harness.dir.path().join("tmp")).expect("temp root");
        fs::write(&harness.iso, b"CD001").expect("iso");

        fs::create_dir_all(harness.source.join("sources")).expect("source tree");
        fs::create_dir_all(harness.source.join("efi/boot")).expect("source tree");
        fs::write(harness.source.join("setup.exe"), b"MZ setup").expect("setup.exe");
        fs::write(harness.source.join("bootmgr"), vec![7u8; 4096]).expect("bootmgr");
        fs::write(harness.source.join("sources/boot.wim"), vec![1u8; 64 * 1024]).expect("wim");
        fs::write(harness.source.join("efi/boot/bootx64.efi"), b"EFI loader").expect("efi");
        fs::create_dir_all(&harness.target).expect("target tree");
        harness
    }

    fn bin(&self) -> PathBuf {
        self.dir.path().join("bin")
    }

    fn mount_root(&self) -> PathBuf {
        self.dir.path().join("media")
    }

    fn add_tool(&self, name: &str) {
        let path = self.bin().join(name);
        fs::write(&path, "#!/bin/sh\nexit 0\n").expect("stub tool");
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).expect("chmod");
    }

    fn remove_tool(&self, name: &str) {
        fs::remove_file(self.bin().join(name)).expect("remove stub tool");
    }

    /// Add a 5 GiB (sparse) `install.wim`, too large for FAT32.
    fn add_oversized_file(&self) {
        File::create(self.source.join("sources/install.wim"))
            .expect("install.wim")
            .set_len(5 * 1024 * 1024 * 1024)
            .expect("sparse file");
    }

    fn make_windows7_media(&self) {
        fs::remove_dir_all(self.source.join("efi")).expect("drop efi dir");
        fs::write(self.source.join("sources/cversion.ini"), "[HostBuild]\n").expect("cversion");
        fs::write(self.source.join("bootmgr.efi"), b"bootmgr efi").expect("bootmgr.efi");
        fs::write(self.source.join("sources/install.wim"), b"wim").expect("install.wim");
    }

    fn hal(&self) -> FakeHal {
        FakeHal::new()
            .with_fixture(&self.iso, &self.source)
            .with_fixture("/dev/sdb1", &self.target)
    }

    fn installer(&self, hal: &FakeHal) -> Installer {
        let settings = Settings {
            mount_root: self.mount_root(),
            temp_root: Some(self.dir.path().join("tmp")),
            poll_interval_ms: 5,
            ..Settings::default()
        };
        Installer::new(Arc::new(hal.clone()), settings)
            .with_path_env(self.bin().display().to_string())
    }

    fn run(&self, hal: &FakeHal, request: &InstallRequest) -> InstallOutcome {
        self.installer(hal).run(request)
    }

    fn device_request(&self) -> InstallRequest {
        InstallRequest::device(&self.iso, "/dev/sdb")
    }

    fn partition_request(&self) -> InstallRequest {
        InstallRequest::partition(&self.iso, "/dev/sdb1")
    }

    fn leftover_mountpoints(&self) -> usize {
        fs::read_dir(self.mount_root())
            .expect("read mount root")
            .count()
    }

    fn leftover_temp_dirs(&self) -> usize {
        fs::read_dir(self.dir.path().join("tmp"))
            .expect("read temp root")
            .count()
    }
}

fn is_mount_of(op: &Operation, dev: &Path) -> bool {
    matches!(op, Operation::Mount { device, .. } if device == dev)
}

fn position(ops: &[Operation], check: impl Fn(&Operation) -> bool) -> usize {
    ops.iter()
        .position(check)
        .expect("operation should have been recorded")
}

fn is_uefi_support_mkpart(op: &Operation) -> bool {
    matches!(op, Operation::Parted { op: PartedOp::MkPart { fs_type, start, .. }, .. }
        if fs_type == "fat16" && start == "-2048s")
}

#[test]
fn device_mode_fat_install_reaches_finalized() {
    let h = Harness::new();
    let hal = h.hal().with_native_copy(true);

    let outcome = h.run(&hal, &h.device_request());

    assert!(outcome.is_success(), "{:?}", outcome.result);
    assert_eq!(outcome.final_stage, Stage::Finalized);
    assert_eq!(outcome.exit_code(), 0);
    assert_eq!(outcome.filesystem, FsKind::Fat);
    assert!(outcome.cleanup.is_clean());

    let ops = hal.operations();
    assert_eq!(hal.count_operations(|op| matches!(op, Operation::Mount { .. })), 2);
    assert_eq!(hal.count_operations(|op| matches!(op, Operation::Unmount { .. })), 2);

    let target_mount = position(&ops, |op| is_mount_of(op, Path::new("/dev/sdb1")));
    match &ops[target_mount] {
        Operation::Mount { options, .. } => assert_eq!(*options, None, "target must be rw"),
        other => panic!("unexpected {:?}", other),
    }
    let wipe = position(&ops, |op| matches!(op, Operation::WipeFs { .. }));
    let format = position(&ops, |op| {
        matches!(op, Operation::FormatFat { fat_bits: 32, label, .. } if label == "Windows USB")
    });
    let copy = position(&ops, |op| matches!(op, Operation::CopyTree { .. }));
    let unmount = position(&ops, |op| matches!(op, Operation::Unmount { .. }));
    assert!(wipe < format && format < target_mount && target_mount < copy && copy < unmount);
    assert!(!ops.iter().any(is_uefi_support_mkpart));
    assert!(matches!(ops.last(), Some(Operation::RereadPartitionTable { .. })));

    assert_eq!(
        fs::read(h.source.join("sources/boot.wim")).expect("source"),
        fs::read(h.target.join("sources/boot.wim")).expect("copied")
    );
    assert_eq!(
        fs::read_to_string(h.target.join("grub/grub.cfg")).expect("grub.cfg"),
        "ntldr /bootmgr\nboot\n"
    );
    assert_eq!(h.leftover_mountpoints(), 0);
    assert_eq!(h.leftover_temp_dirs(), 0);
    assert!(hal.active_mounts().is_empty());
}

#[test]
fn oversized_file_upgrades_device_install_to_ntfs() {
    let h = Harness::new();
    h.add_oversized_file();
    let hal = h.hal();

    let outcome = h.run(&hal, &h.device_request());

    assert!(outcome.is_success(), "{:?}", outcome.result);
    assert_eq!(outcome.exit_code(), 0);
    assert_eq!(outcome.filesystem, FsKind::Ntfs);

    let ops = hal.operations();
    let first_format = position(&ops, |op| {
        matches!(op, Operation::FormatFat { .. } | Operation::FormatNtfs { .. })
    });
    assert!(matches!(&ops[first_format], Operation::FormatNtfs { device, .. }
        if device == Path::new("/dev/sdb1")));
    assert!(!hal.has_operation(|op| matches!(op, Operation::FormatFat { fat_bits: 32, .. })));

    assert!(ops.iter().any(is_uefi_support_mkpart));
    assert!(hal.has_operation(|op| matches!(op,
        Operation::FormatFat { device, fat_bits: 16, label, .. }
            if device == Path::new("/dev/sdb2") && label == "UEFI_NTFS")));
    let flash = position(&ops, |op| {
        matches!(op, Operation::FlashImage { target, .. } if target == Path::new("/dev/sdb2"))
    });
    let target_mount = position(&ops, |op| is_mount_of(op, Path::new("/dev/sdb1")));
    assert!(flash < target_mount, "support partition is populated before mounting");
}

#[test]
fn busy_target_fails_at_enter_init_without_touching_the_disk() {
    let h = Harness::new();
    let hal = h.hal().with_external_mount("/dev/sdb1", "/run/media/user/USB");

    let outcome = h.run(&hal, &h.device_request());

    assert!(matches!(outcome.result, Err(InstallError::Busy { .. })));
    assert_eq!(outcome.last_stage, Stage::EnterInit);
    assert_eq!(outcome.final_stage, Stage::Failed);
    assert_eq!(outcome.exit_code(), 1);
    assert!(!hal.has_operation(|op| matches!(
        op,
        Operation::WipeFs { .. } | Operation::Parted { .. } | Operation::Mount { .. }
    )));
    assert_eq!(h.leftover_temp_dirs(), 0);
}

#[test]
fn cancelling_the_copy_fails_the_job_and_releases_mounts() {
    let h = Harness::new();
    for i in 0..40 {
        fs::write(h.source.join(format!("sources/part{i:02}.swm")), vec![i as u8; 2048])
            .expect("source file");
    }
    let hal = h
        .hal()
        .with_native_copy(true)
        .with_copy_delay(Duration::from_millis(20));
    let cancel = CancelToken::new();
    let (tx, rx) = mpsc::channel();
    let installer = h
        .installer(&hal)
        .with_cancel_token(cancel.clone())
        .with_progress(tx);
    let request = h.device_request();

    let outcome = std::thread::scope(|s| {
        let worker = s.spawn(move || installer.run(&request));
        let mut saw_stopped_copy = false;
        for update in rx {
            if let ProgressUpdate::Copy(status) = update {
                if status.current_item.is_some() {
                    cancel.cancel();
                }
                if !status.running && status.cancel_requested {
                    saw_stopped_copy = true;
                }
            }
        }
        assert!(saw_stopped_copy, "copy status never reported the stop");
        worker.join().expect("installer thread")
    });

    let err = outcome.result.as_ref().expect_err("cancelled run must fail");
    assert!(err.is_cancelled(), "{}", err);
    assert_eq!(outcome.last_stage, Stage::StartCopying);
    assert_eq!(outcome.final_stage, Stage::Failed);
    assert_eq!(outcome.exit_code(), 1);
    assert_eq!(outcome.cleanup.unmounted.len(), 2);
    assert!(!hal.has_operation(|op| matches!(op, Operation::Sync)));
    assert!(hal.active_mounts().is_empty());
    assert_eq!(h.leftover_mountpoints(), 0);
}

#[test]
fn failed_target_mount_never_reaches_copying() {
    let h = Harness::new();
    let hal = h
        .hal()
        .with_failure(FailPoint::Mount(PathBuf::from("/dev/sdb1")));

    let outcome = h.run(&hal, &h.device_request());

    assert!(matches!(outcome.result, Err(InstallError::Mount { .. })));
    assert_eq!(outcome.last_stage, Stage::StartMounting);
    assert!(!hal.has_operation(|op| matches!(op, Operation::CopyTree { .. })));

    // Only the source was mounted, so only the source is released.
    assert_eq!(outcome.cleanup.unmounted.len(), 1);
    let unmounts: Vec<_> = hal
        .operations()
        .into_iter()
        .filter(|op| matches!(op, Operation::Unmount { .. }))
        .collect();
    assert_eq!(unmounts.len(), 1);
    assert!(matches!(&unmounts[0], Operation::Unmount { target }
        if target.file_name().is_some_and(|n| n.to_string_lossy().starts_with("woeusb_source_"))));
    assert!(outcome.cleanup.is_clean());
    assert_eq!(h.leftover_mountpoints(), 0);
}

#[test]
fn uefi_support_partition_exists_only_for_ntfs() {
    for fs_kind in [FsKind::Fat, FsKind::Ntfs] {
        let h = Harness::new();
        let hal = h.hal();
        let mut request = h.device_request();
        request.filesystem = fs_kind;

        let outcome = h.run(&hal, &request);
        assert!(outcome.is_success(), "{}: {:?}", fs_kind, outcome.result);

        let has_support = hal.operations().iter().any(is_uefi_support_mkpart);
        let downloaded = hal.has_operation(|op| matches!(op, Operation::Download { .. }));
        assert_eq!(has_support, fs_kind == FsKind::Ntfs, "{}", fs_kind);
        assert_eq!(downloaded, fs_kind == FsKind::Ntfs, "{}", fs_kind);
    }
}

#[test]
fn failed_uefi_download_is_fatal() {
    let h = Harness::new();
    let hal = h.hal().with_failure(FailPoint::Download);
    let mut request = h.device_request();
    request.filesystem = FsKind::Ntfs;

    let outcome = h.run(&hal, &request);

    assert!(matches!(outcome.result, Err(InstallError::BootWorkaround(_))));
    assert_eq!(outcome.last_stage, Stage::StartMounting);
    assert!(!hal.has_operation(|op| is_mount_of(op, Path::new("/dev/sdb1"))));
}

#[test]
fn invalid_label_is_rejected_before_wiping() {
    let h = Harness::new();
    let hal = h.hal();
    let mut request = h.device_request();
    request.label = "WINDOWS10_INSTALLER".to_string();

    let outcome = h.run(&hal, &request);

    assert!(matches!(outcome.result, Err(InstallError::Format { .. })));
    assert!(!hal.has_operation(|op| matches!(op, Operation::WipeFs { .. })));
}

#[test]
fn boot_flag_is_only_set_when_requested() {
    for flag in [false, true] {
        let h = Harness::new();
        let hal = h.hal();
        let mut request = h.device_request();
        request.workaround_bios_boot_flag = flag;

        assert!(h.run(&hal, &request).is_success());
        let set_flag = hal.has_operation(|op| matches!(op,
            Operation::Parted { op: PartedOp::SetFlag { part_num: 1, flag, .. }, .. }
                if flag == "boot"));
        assert_eq!(set_flag, flag);
    }
}

#[test]
fn skipping_grub_needs_no_grub_installer() {
    let h = Harness::new();
    h.remove_tool("grub-install");
    let hal = h.hal().with_native_copy(true);
    let mut request = h.device_request();
    request.skip_legacy_bootloader = true;

    let outcome = h.run(&hal, &request);

    assert!(outcome.is_success(), "{:?}", outcome.result);
    assert!(!hal.has_operation(|op| matches!(op, Operation::InstallGrub { .. })));
    assert!(!h.target.join("grub").exists());
}

#[test]
fn missing_grub_installer_fails_validation() {
    let h = Harness::new();
    h.remove_tool("grub-install");
    let hal = h.hal();

    let outcome = h.run(&hal, &h.device_request());

    assert!(matches!(outcome.result, Err(InstallError::Validation(_))));
    assert_eq!(outcome.last_stage, Stage::EnterInit);
    assert_eq!(hal.operation_count(), 0);
}

#[test]
fn sync_failure_is_only_a_warning() {
    let h = Harness::new();
    let hal = h.hal().with_failure(FailPoint::Sync);

    let outcome = h.run(&hal, &h.device_request());
    assert!(outcome.is_success(), "{:?}", outcome.result);
}

#[test]
fn windows7_media_gets_an_efi_loader() {
    let h = Harness::new();
    h.make_windows7_media();
    h.add_tool("7z");
    let hal = h.hal().with_native_copy(true);

    let outcome = h.run(&hal, &h.device_request());

    assert!(outcome.is_success(), "{:?}", outcome.result);
    assert_eq!(
        fs::read(h.target.join("efi/boot/bootx64.efi")).expect("loader"),
        b"fake bootmgfw.efi"
    );
    let ops = hal.operations();
    let copy = position(&ops, |op| matches!(op, Operation::CopyTree { .. }));
    let extract = position(&ops, |op| matches!(op, Operation::ExtractMember { .. }));
    assert!(copy < extract);
}

#[test]
fn windows7_extraction_failure_fails_the_job() {
    let h = Harness::new();
    h.make_windows7_media();
    h.add_tool("7z");
    let hal = h
        .hal()
        .with_native_copy(true)
        .with_extract_payload(None);

    let outcome = h.run(&hal, &h.device_request());

    assert!(matches!(outcome.result, Err(InstallError::BootWorkaround(_))));
    assert_eq!(outcome.last_stage, Stage::StartCopying);
    assert_eq!(outcome.cleanup.unmounted.len(), 2);
    assert_eq!(h.leftover_mountpoints(), 0);
}

#[test]
fn partition_mode_copies_without_repartitioning() {
    let h = Harness::new();
    let hal = h.hal().with_fstype("/dev/sdb1", "vfat").with_native_copy(true);

    let outcome = h.run(&hal, &h.partition_request());

    assert!(outcome.is_success(), "{:?}", outcome.result);
    assert_eq!(outcome.filesystem, FsKind::Fat);
    assert!(!hal.has_operation(|op| matches!(
        op,
        Operation::WipeFs { .. }
            | Operation::Parted { .. }
            | Operation::FormatFat { .. }
            | Operation::FormatNtfs { .. }
            | Operation::InstallGrub { .. }
            | Operation::RereadPartitionTable { .. }
    )));
    assert!(h.target.join("setup.exe").is_file());
    assert!(!h.target.join("grub").exists());
}

#[test]
fn partition_mode_follows_the_existing_filesystem() {
    let h = Harness::new();
    let hal = h.hal().with_fstype("/dev/sdb1", "ntfs");

    let outcome = h.run(&hal, &h.partition_request());

    assert!(outcome.is_success(), "{:?}", outcome.result);
    assert_eq!(outcome.filesystem, FsKind::Ntfs);
}

#[test]
fn partition_mode_fat_cannot_hold_oversized_files() {
    let h = Harness::new();
    h.add_oversized_file();
    let hal = h.hal().with_fstype("/dev/sdb1", "vfat");

    let outcome = h.run(&hal, &h.partition_request());

    assert!(matches!(outcome.result, Err(InstallError::Validation(_))));
    assert_eq!(outcome.last_stage, Stage::StartMounting);
    assert!(!hal.has_operation(|op| matches!(op, Operation::CopyTree { .. })));
    assert_eq!(h.leftover_mountpoints(), 0);
}

#[test]
fn copy_progress_is_published() {
    let h = Harness::new();
    let hal = h.hal().with_native_copy(true);
    let (tx, rx) = mpsc::channel();

    let outcome = h.installer(&hal).with_progress(tx).run(&h.device_request());
    assert!(outcome.is_success());

    let updates: Vec<ProgressUpdate> = rx.try_iter().collect();
    let last_copy = updates
        .iter()
        .rev()
        .find_map(|u| match u {
            ProgressUpdate::Copy(status) => Some(status.clone()),
            _ => None,
        })
        .expect("copy status");
    assert!(!last_copy.running);
    assert_eq!(last_copy.percent, Some(100.0));
    assert!(matches!(
        updates.last(),
        Some(ProgressUpdate::Finished { success: true })
    ));
}

#[test]
fn unmount_failure_fails_the_job_and_is_reported_unclean() {
    let h = Harness::new();
    let hal = h
        .hal()
        .with_failure(FailPoint::UnmountDevice(PathBuf::from("/dev/sdb1")));

    let outcome = h.run(&hal, &h.device_request());

    assert!(matches!(outcome.result, Err(InstallError::Unmount { .. })));
    assert_eq!(outcome.last_stage, Stage::StartUnmounting);
    assert_eq!(outcome.final_stage, Stage::Failed);
    assert_eq!(outcome.exit_code(), 1);
    assert!(!outcome.cleanup.is_clean());
    assert!(outcome.cleanup.target_unsafe_to_detach);
    assert_eq!(outcome.cleanup.unclean.len(), 1);
    assert!(outcome.cleanup.unclean[0]
        .file_name()
        .is_some_and(|n| n.to_string_lossy().starts_with("woeusb_target_")));
    // The source still comes off even though the target is stuck.
    assert_eq!(outcome.cleanup.unmounted.len(), 1);
    assert!(!hal.has_operation(|op| matches!(op, Operation::RereadPartitionTable { .. })));
}

#[test]
fn cancelling_the_partition_mode_copy_fails_the_job() {
    let h = Harness::new();
    for i in 0..40 {
        fs::write(h.source.join(format!("sources/part{i:02}.swm")), vec![i as u8; 2048])
            .expect("source file");
    }
    let hal = h
        .hal()
        .with_fstype("/dev/sdb1", "vfat")
        .with_native_copy(true)
        .with_copy_delay(Duration::from_millis(20));
    let cancel = CancelToken::new();
    let (tx, rx) = mpsc::channel();
    let installer = h
        .installer(&hal)
        .with_cancel_token(cancel.clone())
        .with_progress(tx);
    let request = h.partition_request();

    let outcome = std::thread::scope(|s| {
        let worker = s.spawn(move || installer.run(&request));
        let mut saw_stopped_copy = false;
        for update in rx {
            if let ProgressUpdate::Copy(status) = update {
                if status.current_item.is_some() {
                    cancel.cancel();
                }
                if !status.running && status.cancel_requested {
                    saw_stopped_copy = true;
                }
            }
        }
        assert!(saw_stopped_copy, "copy status never reported the stop");
        worker.join().expect("installer thread")
    });

    let err = outcome.result.as_ref().expect_err("cancelled run must fail");
    assert!(err.is_cancelled(), "{}", err);
    assert_eq!(outcome.last_stage, Stage::StartCopying);
    assert_eq!(outcome.exit_code(), 1);
    assert_eq!(outcome.cleanup.unmounted.len(), 2);
    assert!(!hal.has_operation(|op| matches!(op, Operation::Sync)));
    let copied = fs::read_dir(h.target.join("sources"))
        .map(|d| d.count())
        .unwrap_or(0);
    assert!(copied < 41);
    assert_eq!(h.leftover_mountpoints(), 0);
}
