//! Progress events published by the orchestrator.

use crate::deploy::CopyStatus;
use crate::job::FsKind;
use std::sync::mpsc::Sender;
use woeusb_workflow::Stage;

#[derive(Debug, Clone, PartialEq)]
pub enum ProgressUpdate {
    StageEntered(Stage),
    Status(String),
    /// The capacity check forced the target filesystem to change.
    FilesystemChanged { from: FsKind, to: FsKind },
    Copy(CopyStatus),
    Finished { success: bool },
}

/// Optional progress sink; sending never fails the pipeline.
#[derive(Debug, Clone, Default)]
pub struct ProgressSink(Option<Sender<ProgressUpdate>>);

impl ProgressSink {
    pub fn new(tx: Sender<ProgressUpdate>) -> Self {
        Self(Some(tx))
    }

    pub fn none() -> Self {
        Self(None)
    }

    pub fn send(&self, update: ProgressUpdate) {
        if let Some(tx) = &self.0 {
            let _ = tx.send(update);
        }
    }

    pub fn status(&self, msg: impl Into<String>) {
        let msg = msg.into();
        log::info!("{}", msg);
        self.send(ProgressUpdate::Status(msg));
    }
}
