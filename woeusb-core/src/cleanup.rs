//! Cleanup/Rollback Manager.
//!
//! Only releases what the job acquired. Partitioning and formatting are never
//! rolled back.

use crate::job::{InstallMode, InstallationJob};
use crate::mounts::MountManager;
use std::path::PathBuf;
use woeusb_hal::InstallerHal;
use woeusb_workflow::{Stage, WorkflowState};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub unmounted: Vec<PathBuf>,
    /// Mountpoints that are still mounted and must be cleaned up by hand.
    pub unclean: Vec<PathBuf>,
    /// The target filesystem could not be released; unplugging now is unsafe.
    pub target_unsafe_to_detach: bool,
    pub temp_dir_removed: bool,
    /// The target device is still held after cleanup (device mode only).
    pub device_still_busy: bool,
}

impl CleanupReport {
    pub fn is_clean(&self) -> bool {
        self.unclean.is_empty() && !self.target_unsafe_to_detach && !self.device_still_busy
    }
}

pub fn run_cleanup(
    hal: &dyn InstallerHal,
    job: &mut InstallationJob,
    mounts: &MountManager<'_>,
) -> CleanupReport {
    let mut report = CleanupReport::default();
    let mounted_stage = job.tracker().reached(Stage::StartMounting);
    log::debug!(
        "cleanup after {} (last reached {})",
        job.tracker().current(),
        job.tracker().last_reached()
    );

    // Mountpoints only exist from start-mounting on; target before source.
    if mounted_stage {
        if let Some(mount) = job.target_mount.take() {
            if !release(mounts, mount, &mut report) {
                report.target_unsafe_to_detach = true;
            }
        }
        if let Some(mount) = job.source_mount.take() {
            release(mounts, mount, &mut report);
        }
    }

    if let Some(temp) = job.temp_dir.take() {
        let path = temp.path().to_path_buf();
        match temp.close() {
            Ok(()) => report.temp_dir_removed = true,
            Err(err) => log::warn!(
                "⚠️ Could not remove work directory {}: {}",
                path.display(),
                err
            ),
        }
    }

    if job.mode == InstallMode::Device && mounted_stage {
        match hal.is_device_busy(&job.target_device) {
            Ok(true) => {
                log::warn!(
                    "⚠️ {} is still busy; do not detach it yet",
                    job.target_device.display()
                );
                report.device_still_busy = true;
            }
            Ok(false) => {}
            Err(err) => log::debug!("busy probe after cleanup failed: {}", err),
        }
    }

    for path in &report.unclean {
        log::warn!(
            "⚠️ {} is still mounted and must be cleaned up manually",
            path.display()
        );
    }
    report
}

/// Returns false when the mountpoint is left mounted.
fn release(mounts: &MountManager<'_>, mount: crate::job::JobMount, report: &mut CleanupReport) -> bool {
    if !mount.mounted {
        mounts.remove_mountpoint(&mount.path);
        return true;
    }
    match mounts.unmount(&mount.path) {
        Ok(true) => {
            report.unmounted.push(mount.path);
            true
        }
        Ok(false) => {
            mounts.remove_mountpoint(&mount.path);
            true
        }
        Err(err) => {
            log::error!("{}", err);
            report.unclean.push(mount.path);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{InstallRequest, JobMount};
    use crate::mounts::MountRole;
    use std::path::Path;
    use tempfile::tempdir;
    use woeusb_hal::{FailPoint, FakeHal, MountOps, MountOptions, Operation};

    fn job_at(stage: Stage) -> InstallationJob {
        let mut job =
            InstallationJob::from_request(&InstallRequest::device("/isos/w.iso", "/dev/sdb"))
                .unwrap();
        for s in &Stage::SEQUENCE[1..] {
            if *s > stage {
                break;
            }
            job.tracker_mut().advance(*s).unwrap();
        }
        job
    }

    #[test]
    fn failure_at_mounting_unmounts_source_but_not_unmounted_target() {
        let dir = tempdir().unwrap();
        let hal = FakeHal::new();
        let mounts = MountManager::new(&hal, dir.path());
        let src_mp = mounts.create_mountpoint(MountRole::Source).unwrap();
        let dst_mp = mounts.create_mountpoint(MountRole::Target).unwrap();
        hal.mount_device(Path::new("/isos/w.iso"), &src_mp, None, MountOptions::new())
            .unwrap();

        let mut job = job_at(Stage::StartMounting);
        job.source_mount = Some(JobMount {
            path: src_mp.clone(),
            mounted: true,
        });
        job.target_mount = Some(JobMount {
            path: dst_mp.clone(),
            mounted: false,
        });
        job.tracker_mut().fail();

        let report = run_cleanup(&hal, &mut job, &mounts);

        assert_eq!(report.unmounted, vec![src_mp.clone()]);
        assert!(report.is_clean());
        assert_eq!(
            hal.operations()
                .iter()
                .filter(|op| matches!(op, Operation::Unmount { .. }))
                .collect::<Vec<_>>(),
            vec![&Operation::Unmount { target: src_mp.clone() }]
        );
        assert!(!src_mp.exists());
        assert!(!dst_mp.exists());
    }

    #[test]
    fn early_failure_only_removes_temp_dir() {
        let dir = tempdir().unwrap();
        let hal = FakeHal::new();
        let mounts = MountManager::new(&hal, dir.path());
        let mut job = job_at(Stage::EnterInit);
        let temp = tempfile::Builder::new()
            .prefix("WoeUSB.")
            .tempdir_in(dir.path())
            .unwrap();
        let temp_path = temp.path().to_path_buf();
        job.temp_dir = Some(temp);
        job.tracker_mut().fail();

        let report = run_cleanup(&hal, &mut job, &mounts);

        assert!(report.temp_dir_removed);
        assert!(!temp_path.exists());
        assert_eq!(hal.operation_count(), 0);
    }

    #[test]
    fn stuck_target_is_reported_unsafe_to_detach() {
        let dir = tempdir().unwrap();
        let mounts_root = dir.path().to_path_buf();
        let dst_mp = mounts_root.join("woeusb_target_x");
        std::fs::create_dir(&dst_mp).unwrap();
        let hal = FakeHal::new().with_failure(FailPoint::Unmount(dst_mp.clone()));
        hal.mount_device(Path::new("/dev/sdb1"), &dst_mp, None, MountOptions::new())
            .unwrap();
        let mounts = MountManager::new(&hal, &mounts_root);

        let mut job = job_at(Stage::StartCopying);
        job.target_mount = Some(JobMount {
            path: dst_mp.clone(),
            mounted: true,
        });
        job.tracker_mut().fail();

        let report = run_cleanup(&hal, &mut job, &mounts);

        assert_eq!(report.unclean, vec![dst_mp]);
        assert!(report.target_unsafe_to_detach);
        assert!(report.device_still_busy);
        assert!(!report.is_clean());
    }

    #[test]
    fn cleanup_twice_is_harmless() {
        let dir = tempdir().unwrap();
        let hal = FakeHal::new();
        let mounts = MountManager::new(&hal, dir.path());
        let mut job = job_at(Stage::Finalized);

        let first = run_cleanup(&hal, &mut job, &mounts);
        let second = run_cleanup(&hal, &mut job, &mounts);
        assert_eq!(first, second);
    }
}
