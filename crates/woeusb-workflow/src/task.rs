//! Cooperative cancellation and background work with a progress channel.

use std::any::Any;
use std::io;
use std::ops::ControlFlow;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use thiserror::Error;

/// Shared cancellation flag. Clones observe the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Error)]
pub enum TaskError {
    #[error("worker {name} panicked: {message}")]
    Panicked { name: String, message: String },

    #[error("worker {name} exited without reporting a result")]
    Disconnected { name: String },
}

/// Handle given to the worker closure.
pub struct TaskContext<P> {
    progress: Sender<P>,
    cancel: CancelToken,
}

impl<P> TaskContext<P> {
    /// Publish a progress update. Updates are dropped once the waiter is gone.
    pub fn report(&self, update: P) {
        let _ = self.progress.send(update);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }
}

struct RunningGuard(Arc<AtomicBool>);

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// A worker thread producing `T`, streaming `P` progress updates.
///
/// Dropping an unfinished task requests cancellation and joins the worker.
pub struct BackgroundTask<T, P> {
    name: String,
    handle: Option<JoinHandle<()>>,
    done: Receiver<thread::Result<T>>,
    progress: Receiver<P>,
    running: Arc<AtomicBool>,
    cancel: CancelToken,
}

impl<T, P> BackgroundTask<T, P>
where
    T: Send + 'static,
    P: Send + 'static,
{
    pub fn spawn<F>(name: impl Into<String>, cancel: CancelToken, work: F) -> io::Result<Self>
    where
        F: FnOnce(TaskContext<P>) -> T + Send + 'static,
    {
        let name = name.into();
        let (done_tx, done) = mpsc::channel();
        let (progress_tx, progress) = mpsc::channel();
        let running = Arc::new(AtomicBool::new(true));

        let ctx = TaskContext {
            progress: progress_tx,
            cancel: cancel.clone(),
        };
        let guard = RunningGuard(Arc::clone(&running));
        let handle = thread::Builder::new().name(name.clone()).spawn(move || {
            let result = panic::catch_unwind(AssertUnwindSafe(move || work(ctx)));
            // Clear the flag before publishing so a waiter never sees a
            // finished result while `is_running` is still true.
            drop(guard);
            let _ = done_tx.send(result);
        })?;
        log::debug!("spawned background task {}", name);

        Ok(Self {
            name,
            handle: Some(handle),
            done,
            progress,
            running,
            cancel,
        })
    }
}

impl<T, P> BackgroundTask<T, P> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Ask the worker to stop at its next cancellation check.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Wait for the worker, waking every `poll_interval`.
    ///
    /// `on_tick` receives the progress updates gathered since the previous
    /// tick (possibly none). Returning `ControlFlow::Break` requests
    /// cancellation; waiting continues until the worker acknowledges it.
    pub fn wait_with_timeout<F>(mut self, poll_interval: Duration, mut on_tick: F) -> Result<T, TaskError>
    where
        F: FnMut(&[P]) -> ControlFlow<()>,
    {
        loop {
            match self.done.recv_timeout(poll_interval) {
                Ok(result) => {
                    if let Some(handle) = self.handle.take() {
                        let _ = handle.join();
                    }
                    let tail: Vec<P> = self.progress.try_iter().collect();
                    if !tail.is_empty() {
                        let _ = on_tick(&tail);
                    }
                    return result.map_err(|payload| TaskError::Panicked {
                        name: self.name.clone(),
                        message: panic_message(payload.as_ref()),
                    });
                }
                Err(RecvTimeoutError::Timeout) => {
                    let batch: Vec<P> = self.progress.try_iter().collect();
                    if on_tick(&batch).is_break() && !self.cancel.is_cancelled() {
                        log::info!("Cancelling background task {}", self.name);
                        self.cancel.cancel();
                    }
                }
                Err(RecvTimeoutError::Disconnected) => {
                    if let Some(handle) = self.handle.take() {
                        let _ = handle.join();
                    }
                    return Err(TaskError::Disconnected {
                        name: self.name.clone(),
                    });
                }
            }
        }
    }

    /// Block until the worker finishes, discarding progress.
    pub fn join(self, poll_interval: Duration) -> Result<T, TaskError> {
        self.wait_with_timeout(poll_interval, |_| ControlFlow::Continue(()))
    }
}

impl<T, P> Drop for BackgroundTask<T, P> {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.cancel.cancel();
            let _ = handle.join();
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        return (*s).to_string();
    }
    if let Some(s) = payload.downcast_ref::<String>() {
        return s.clone();
    }
    "unknown panic".to_string()
}
