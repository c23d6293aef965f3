use crate::errors::CopyError;
use crate::job::FsKind;
use std::ops::ControlFlow;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use woeusb_hal::{CopyProgress, InstallerHal};
use woeusb_workflow::{BackgroundTask, CancelToken, TaskContext};

/// Read-only view of a running copy.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CopyStatus {
    pub running: bool,
    /// Entry being copied, relative to the source root.
    pub current_item: Option<PathBuf>,
    /// `None` until the source size is known.
    pub percent: Option<f32>,
    pub last_error: Option<String>,
    pub cancel_requested: bool,
}

impl CopyStatus {
    pub(crate) fn absorb(&mut self, progress: &CopyProgress) {
        if !progress.current.as_os_str().is_empty() {
            self.current_item = Some(progress.current.clone());
        }
        self.percent = progress.percent().map(|p| p as f32);
    }
}

#[derive(Debug, Clone, Default)]
struct SharedStatus(Arc<Mutex<CopyStatus>>);

impl SharedStatus {
    fn lock(&self) -> MutexGuard<'_, CopyStatus> {
        self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// The tree copy running on its own worker thread.
///
/// The worker keeps the shared view current, so [`CopyTask::status`] can be
/// polled from any thread while the copy runs.
pub struct CopyTask {
    task: BackgroundTask<Result<(), CopyError>, CopyProgress>,
    cancel: CancelToken,
    status: SharedStatus,
}

impl CopyTask {
    pub fn start(
        hal: Arc<dyn InstallerHal>,
        source_mount: PathBuf,
        target_mount: PathBuf,
        fs: FsKind,
        cancel: CancelToken,
    ) -> Result<Self, CopyError> {
        let opts = fs.copy_options();
        let status = SharedStatus::default();
        status.lock().running = true;
        let worker_status = status.clone();
        let task = BackgroundTask::spawn(
            "woeusb-copy",
            cancel.clone(),
            move |ctx: TaskContext<CopyProgress>| {
                log::info!(
                    "Copying {} -> {}",
                    source_mount.display(),
                    target_mount.display()
                );
                let result = hal
                    .copy_tree_native(&source_mount, &target_mount, &opts, &mut |p| {
                        if ctx.is_cancelled() {
                            return false;
                        }
                        worker_status.lock().absorb(p);
                        ctx.report(p.clone());
                        true
                    })
                    .map_err(CopyError::from);
                if let Err(err) = &result {
                    worker_status.lock().last_error = Some(err.to_string());
                }
                result
            },
        )
        .map_err(|e| CopyError::Worker(format!("spawning copy worker: {}", e)))?;

        Ok(Self {
            task,
            cancel,
            status,
        })
    }

    pub fn status(&self) -> CopyStatus {
        CopyStatus {
            running: self.task.is_running(),
            cancel_requested: self.cancel.is_cancelled(),
            ..self.status.lock().clone()
        }
    }

    /// Poll the worker every `poll_interval` until it finishes, handing each
    /// refreshed status to `on_status`.
    pub fn wait(
        self,
        poll_interval: Duration,
        mut on_status: impl FnMut(&CopyStatus),
    ) -> Result<(), CopyError> {
        let CopyTask {
            task,
            cancel,
            status,
        } = self;

        let outcome = task.wait_with_timeout(poll_interval, |_| {
            let mut view = status.lock().clone();
            view.cancel_requested = cancel.is_cancelled();
            on_status(&view);
            ControlFlow::Continue(())
        });

        let result = match outcome {
            Ok(result) => result,
            Err(err) => Err(CopyError::Worker(err.to_string())),
        };
        let last = {
            let mut shared = status.lock();
            shared.running = false;
            shared.cancel_requested = cancel.is_cancelled();
            if let Err(err) = &result {
                shared.last_error = Some(err.to_string());
            }
            shared.clone()
        };
        on_status(&last);
        result
    }
}
