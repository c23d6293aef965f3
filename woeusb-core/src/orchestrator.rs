//! Stage Orchestrator: drives one [`InstallationJob`] through the pipeline.
//!
//! ```text
//! pre-init -> enter-init -> start-mounting -> start-copying
//!          -> start-unmounting -> finalized
//! ```
//!
//! Any failure moves the job to `failed`. Cleanup runs after every run,
//! successful or not.

use crate::boot::{
    apply_bios_boot_flag_workaround, support_windows7_uefi_boot, write_legacy_boot_config,
    BiosWorkaround, Win7UefiOutcome,
};
use crate::cleanup::{run_cleanup, CleanupReport};
use crate::config::Settings;
use crate::deploy::{self, check_filesystem_capacity_limits, CopyStatus, CopyTask};
use crate::errors::{InstallError, Result};
use crate::job::{FsKind, InstallMode, InstallRequest, InstallationJob, JobMount};
use crate::mounts::{MountManager, MountRole};
use crate::partitioning::{
    create_partition, create_partition_table, create_uefi_support_partition,
    install_uefi_support_payload, validate_label, wipe, TableScheme, UefiNtfsSource,
};
use crate::progress::{ProgressSink, ProgressUpdate};
use crate::tools;
use std::path::{Path, PathBuf};
use std::sync::mpsc::Sender;
use std::sync::Arc;
use woeusb_hal::{CopyProgress, InstallerHal};
use woeusb_workflow::{CancelToken, RunError, Stage, StageDefinition, StageRunner, WorkflowState};

/// Result of one run.
#[derive(Debug)]
pub struct InstallOutcome {
    pub result: Result<()>,
    /// Last stage entered before the run ended.
    pub last_stage: Stage,
    /// `finalized` on success, `failed` otherwise.
    pub final_stage: Stage,
    /// Filesystem actually used, after any automatic upgrade.
    pub filesystem: FsKind,
    pub cleanup: CleanupReport,
}

impl InstallOutcome {
    pub fn is_success(&self) -> bool {
        self.result.is_ok() && self.final_stage == Stage::Finalized
    }

    pub fn exit_code(&self) -> i32 {
        if self.is_success() {
            0
        } else {
            1
        }
    }
}

pub struct Installer {
    hal: Arc<dyn InstallerHal>,
    settings: Settings,
    path_env: String,
    cancel: CancelToken,
    progress: ProgressSink,
}

impl Installer {
    pub fn new(hal: Arc<dyn InstallerHal>, settings: Settings) -> Self {
        Self {
            hal,
            settings,
            path_env: std::env::var("PATH").unwrap_or_default(),
            cancel: CancelToken::new(),
            progress: ProgressSink::none(),
        }
    }

    /// Search `path_env` instead of `$PATH` during dependency discovery.
    pub fn with_path_env(mut self, path_env: impl Into<String>) -> Self {
        self.path_env = path_env.into();
        self
    }

    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_progress(mut self, tx: Sender<ProgressUpdate>) -> Self {
        self.progress = ProgressSink::new(tx);
        self
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn run(&self, request: &InstallRequest) -> InstallOutcome {
        let mut job = match InstallationJob::from_request(request) {
            Ok(job) => job,
            Err(err) => {
                log::error!("❌ {}", err);
                self.progress.send(ProgressUpdate::Finished { success: false });
                return InstallOutcome {
                    result: Err(err),
                    last_stage: Stage::EnterInit,
                    final_stage: Stage::Failed,
                    filesystem: request.filesystem,
                    cleanup: CleanupReport::default(),
                };
            }
        };
        log::info!(
            "Installing {} onto {} ({} mode, {})",
            job.source.display(),
            match job.mode {
                InstallMode::Device => job.target_device.display(),
                InstallMode::Partition => job.target_partition.display(),
            },
            job.mode,
            job.filesystem
        );

        let hal = self.hal.as_ref();
        let mounts = MountManager::new(hal, &self.settings.mount_root);
        let stages: [StageDefinition<'_, InstallationJob, InstallError>; 5] = [
            StageDefinition::new(Stage::EnterInit, |job: &mut InstallationJob| {
                self.announce(Stage::EnterInit);
                self.enter_init(job)
            }),
            StageDefinition::new(Stage::StartMounting, |job: &mut InstallationJob| {
                self.announce(Stage::StartMounting);
                self.start_mounting(job, &mounts)
            }),
            StageDefinition::new(Stage::StartCopying, |job: &mut InstallationJob| {
                self.announce(Stage::StartCopying);
                self.start_copying(job)
            }),
            StageDefinition::new(Stage::StartUnmounting, |job: &mut InstallationJob| {
                self.announce(Stage::StartUnmounting);
                self.start_unmounting(job, &mounts)
            }),
            StageDefinition::new(Stage::Finalized, |job: &mut InstallationJob| {
                self.announce(Stage::Finalized);
                self.finalize(job)
            }),
        ];

        let result = StageRunner::new(self.cancel.clone())
            .run(&mut job, &stages)
            .map_err(|err| {
                let stage = err.stage();
                let err = into_install_error(err);
                log::error!("❌ {}: {}", stage, err);
                err
            });

        let cleanup = run_cleanup(hal, &mut job, &mounts);
        let outcome = InstallOutcome {
            result,
            last_stage: job.tracker().last_reached(),
            final_stage: job.tracker().current(),
            filesystem: job.filesystem,
            cleanup,
        };
        if outcome.is_success() {
            log::info!("✅ Done, the target device is ready to be removed");
        }
        self.progress.send(ProgressUpdate::Finished {
            success: outcome.is_success(),
        });
        outcome
    }

    fn announce(&self, stage: Stage) {
        self.progress.send(ProgressUpdate::StageEntered(stage));
    }

    fn target_locator<'j>(&self, job: &'j InstallationJob) -> &'j Path {
        match job.mode {
            InstallMode::Device => &job.target_device,
            InstallMode::Partition => &job.target_partition,
        }
    }

    fn enter_init(&self, job: &mut InstallationJob) -> Result<()> {
        let hal = self.hal.as_ref();

        if !job.source.exists() {
            return Err(InstallError::Validation(format!(
                "source {} does not exist",
                job.source.display()
            )));
        }
        let target = self.target_locator(job).to_path_buf();
        let target_is_block = hal
            .is_block_device(&target)
            .map_err(|e| InstallError::device_io("probing target", e))?;
        if !target_is_block {
            return Err(InstallError::Validation(format!(
                "target {} does not exist or is not a block device",
                target.display()
            )));
        }
        if !hal.is_root() {
            log::warn!("⚠️ Not running as root; device operations will probably fail");
        }

        job.tools = Some(tools::discover(
            job.mode,
            job.skip_legacy_bootloader,
            &self.settings.tools,
            &self.path_env,
        )?);

        self.check_not_busy(job)?;

        if job.mode == InstallMode::Partition {
            let fstype = hal
                .filesystem_type(&job.target_partition)
                .map_err(|e| InstallError::device_io("probing target filesystem", e))?;
            let detected = FsKind::from_lsblk(&fstype).ok_or_else(|| {
                InstallError::Validation(format!(
                    "{} has unsupported filesystem {:?}, expected FAT or NTFS",
                    job.target_partition.display(),
                    fstype.trim()
                ))
            })?;
            if detected != job.filesystem {
                log::info!(
                    "Target partition is {}, using it instead of {}",
                    detected,
                    job.filesystem
                );
            }
            job.filesystem = detected;
            if detected == FsKind::Ntfs {
                log::warn!(
                    "⚠️ UEFI booting from an NTFS partition requires firmware NTFS support"
                );
            }
        }

        let temp_root = self.settings.temp_root();
        let temp_dir = tempfile::Builder::new()
            .prefix("WoeUSB.")
            .tempdir_in(&temp_root)
            .map_err(|e| {
                InstallError::io(
                    format!("creating work directory under {}", temp_root.display()),
                    e,
                )
            })?;
        log::debug!("work directory {}", temp_dir.path().display());
        job.temp_dir = Some(temp_dir);
        Ok(())
    }

    fn check_not_busy(&self, job: &InstallationJob) -> Result<()> {
        let hal = self.hal.as_ref();
        let mounts_of = |device: &Path| {
            hal.mounts_of_device(device)
                .map_err(|e| InstallError::device_io("reading mount table", e))
        };

        match job.mode {
            InstallMode::Device => {
                let busy = hal
                    .is_device_busy(&job.target_device)
                    .map_err(|e| InstallError::device_io("checking target device", e))?;
                if busy {
                    return Err(InstallError::Busy {
                        device: job.target_device.clone(),
                        mountpoints: mounts_of(&job.target_device)?,
                    });
                }
            }
            InstallMode::Partition => {
                let mountpoints = mounts_of(&job.target_partition)?;
                if !mountpoints.is_empty() {
                    return Err(InstallError::Busy {
                        device: job.target_partition.clone(),
                        mountpoints,
                    });
                }
            }
        }

        // Image files may be opened by anyone; only media in a drive are exclusive.
        let source_is_block = hal
            .is_block_device(&job.source)
            .map_err(|e| InstallError::device_io("probing source", e))?;
        if source_is_block {
            let busy = hal
                .is_device_busy(&job.source)
                .map_err(|e| InstallError::device_io("checking source device", e))?;
            if busy {
                return Err(InstallError::Busy {
                    device: job.source.clone(),
                    mountpoints: mounts_of(&job.source)?,
                });
            }
        }
        Ok(())
    }

    fn start_mounting(&self, job: &mut InstallationJob, mounts: &MountManager<'_>) -> Result<()> {
        let hal = self.hal.as_ref();

        let source_mp = mounts.create_mountpoint(MountRole::Source)?;
        job.source_mount = Some(JobMount {
            path: source_mp.clone(),
            mounted: false,
        });
        mounts.mount_source(&job.source, &source_mp)?;
        set_mounted(&mut job.source_mount);

        let report = check_filesystem_capacity_limits(&source_mp, job.filesystem)?;
        if report.requires_ntfs() {
            for (path, size) in &report.oversized {
                log::warn!(
                    "⚠️ {} ({} bytes) exceeds the FAT32 file size limit",
                    path.display(),
                    size
                );
            }
            match job.mode {
                InstallMode::Device => {
                    log::warn!("⚠️ Switching target filesystem from FAT to NTFS");
                    self.progress.send(ProgressUpdate::FilesystemChanged {
                        from: job.filesystem,
                        to: FsKind::Ntfs,
                    });
                    job.filesystem = FsKind::Ntfs;
                }
                InstallMode::Partition => {
                    return Err(InstallError::Validation(format!(
                        "{} is FAT but the source holds files of 4 GiB or more; \
                         reformat it as NTFS or use --device",
                        job.target_partition.display()
                    )));
                }
            }
        }

        if job.mode == InstallMode::Device {
            self.prepare_device(job)?;
        }

        let target_mp = mounts.create_mountpoint(MountRole::Target)?;
        job.target_mount = Some(JobMount {
            path: target_mp.clone(),
            mounted: false,
        });
        mounts.mount_target(&job.target_partition, &target_mp)?;
        set_mounted(&mut job.target_mount);

        if job.mode == InstallMode::Device {
            let tools = job.tools()?;
            apply_bios_boot_flag_workaround(
                hal,
                &BiosWorkaround {
                    target_mount: &target_mp,
                    device: &job.target_device,
                    partition_number: 1,
                    toggle_boot_flag: job.workaround_bios_boot_flag,
                    grub: tools.grub_installer,
                    skip_legacy: job.skip_legacy_bootloader,
                },
            )?;
        }
        Ok(())
    }

    /// Wipe, repartition and format the target device. Past this point the
    /// previous contents of the device are gone.
    fn prepare_device(&self, job: &InstallationJob) -> Result<()> {
        let hal = self.hal.as_ref();
        let tools = job.tools()?;

        validate_label(&job.label, job.filesystem, &job.target_partition)?;
        wipe(hal, &job.target_device)?;
        create_partition_table(hal, &job.target_device, TableScheme::Msdos)?;
        create_partition(
            hal,
            &job.target_device,
            &job.target_partition,
            job.filesystem,
            &job.label,
            tools,
        )?;

        if job.filesystem == FsKind::Ntfs {
            let support = job.uefi_support_partition();
            create_uefi_support_partition(hal, &job.target_device, &support, tools)?;
            let source = UefiNtfsSource {
                url: self.settings.uefi_ntfs_url.clone(),
                sha256: self.settings.uefi_ntfs_sha256.clone(),
                timeout: self.settings.download_timeout(),
            };
            install_uefi_support_payload(hal, &support, job.temp_path()?, &source)?;
        }
        Ok(())
    }

    fn start_copying(&self, job: &InstallationJob) -> Result<()> {
        let hal = self.hal.as_ref();
        let source_mp = mounted_path(job.source_mountpoint(), "source")?;
        let target_mp = mounted_path(job.target_mountpoint(), "target")?;

        self.progress.status(format!(
            "Copying files to the {} filesystem, this may take a while",
            job.filesystem
        ));
        match job.mode {
            InstallMode::Device => {
                let task = CopyTask::start(
                    Arc::clone(&self.hal),
                    source_mp.clone(),
                    target_mp.clone(),
                    job.filesystem,
                    self.cancel.clone(),
                )?;
                task.wait(self.settings.poll_interval(), |status| {
                    self.progress.send(ProgressUpdate::Copy(status.clone()));
                })?;
            }
            InstallMode::Partition => {
                let mut status = CopyStatus {
                    running: true,
                    ..Default::default()
                };
                let copied = deploy::copy_tree(
                    hal,
                    &source_mp,
                    &target_mp,
                    job.filesystem,
                    &mut |p: &CopyProgress| {
                        if self.cancel.is_cancelled() {
                            return false;
                        }
                        status.absorb(p);
                        self.progress.send(ProgressUpdate::Copy(status.clone()));
                        true
                    },
                );
                status.running = false;
                status.cancel_requested = self.cancel.is_cancelled();
                if let Err(err) = &copied {
                    status.last_error = Some(err.to_string());
                }
                self.progress.send(ProgressUpdate::Copy(status));
                copied?;
            }
        }
        log::info!("✅ Copied installer files");

        let tools = job.tools()?;
        if job.mode == InstallMode::Device && !job.skip_legacy_bootloader {
            if let Some(grub) = tools.grub_installer {
                write_legacy_boot_config(&target_mp, grub)?;
            }
        }
        match support_windows7_uefi_boot(hal, &source_mp, &target_mp, tools.has_extractor)? {
            Win7UefiOutcome::NotWindows7 => log::debug!("not Windows 7 media"),
            Win7UefiOutcome::LoaderAlreadyPresent(path) => {
                log::debug!("EFI loader already staged at {}", path.display())
            }
            Win7UefiOutcome::Installed(_) => {}
        }
        Ok(())
    }

    fn start_unmounting(&self, job: &mut InstallationJob, mounts: &MountManager<'_>) -> Result<()> {
        self.progress
            .status("Flushing write buffers, this may take a while");
        if let Err(err) = self.hal.sync() {
            log::warn!("⚠️ sync failed: {}", err);
        }
        release_mount(mounts, &mut job.target_mount)?;
        release_mount(mounts, &mut job.source_mount)?;
        Ok(())
    }

    fn finalize(&self, job: &InstallationJob) -> Result<()> {
        if job.mode == InstallMode::Device {
            self.hal
                .reread_partition_table(&job.target_device)
                .map_err(|source| InstallError::PartitionRefresh {
                    device: job.target_device.clone(),
                    source,
                })?;
        }
        Ok(())
    }
}

fn set_mounted(slot: &mut Option<JobMount>) {
    if let Some(mount) = slot {
        mount.mounted = true;
    }
}

fn mounted_path(path: Option<&Path>, role: &str) -> Result<PathBuf> {
    path.map(Path::to_path_buf)
        .ok_or_else(|| InstallError::Validation(format!("{} is not mounted", role)))
}

/// Unmount the job's mount in `slot`. On failure the mount stays recorded
/// so cleanup can report it.
fn release_mount(mounts: &MountManager<'_>, slot: &mut Option<JobMount>) -> Result<()> {
    let Some(mount) = slot.take() else {
        return Ok(());
    };
    match mounts.unmount(&mount.path) {
        Ok(true) => Ok(()),
        Ok(false) => {
            mounts.remove_mountpoint(&mount.path);
            Ok(())
        }
        Err(err) => {
            *slot = Some(mount);
            Err(err)
        }
    }
}

fn into_install_error(err: RunError<InstallError>) -> InstallError {
    match err {
        RunError::Cancelled { .. } => InstallError::Cancelled,
        RunError::Transition(err) => InstallError::Workflow(err),
        RunError::Failed { source, .. } => source,
    }
}
