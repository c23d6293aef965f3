use std::io;
use std::path::PathBuf;
use thiserror::Error;
use woeusb_hal::HalError;
use woeusb_workflow::TransitionError;

pub type Result<T> = std::result::Result<T, InstallError>;

/// Failure of the file deployment stage.
#[derive(Error, Debug)]
pub enum CopyError {
    #[error("copy cancelled")]
    Cancelled,

    #[error("no space left on target while writing {}", .0.display())]
    NoSpace(PathBuf),

    #[error("I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("copy worker failed: {0}")]
    Worker(String),
}

impl From<HalError> for CopyError {
    fn from(err: HalError) -> Self {
        match err {
            HalError::Cancelled => CopyError::Cancelled,
            HalError::NoSpace(path) => CopyError::NoSpace(path),
            HalError::CopyFailed { path, source } => CopyError::Io { path, source },
            HalError::Io(source) => CopyError::Io {
                path: PathBuf::new(),
                source,
            },
            other => CopyError::Worker(other.to_string()),
        }
    }
}

#[derive(Error, Debug)]
pub enum InstallError {
    #[error("invalid parameters: {0}")]
    Validation(String),

    #[error("{} is busy (mounted at: {})", device.display(), format_paths(mountpoints))]
    Busy {
        device: PathBuf,
        mountpoints: Vec<PathBuf>,
    },

    #[error("insufficient privileges: {0} (run as root)")]
    Permission(String),

    #[error("failed to mount {} on {}: {source}", device.display(), mountpoint.display())]
    Mount {
        device: PathBuf,
        mountpoint: PathBuf,
        #[source]
        source: HalError,
    },

    #[error("failed to unmount {}: {source}", mountpoint.display())]
    Unmount {
        mountpoint: PathBuf,
        #[source]
        source: HalError,
    },

    #[error("{step} failed: {source}")]
    DeviceIo {
        step: String,
        #[source]
        source: HalError,
    },

    #[error("cannot format {}: {reason}", device.display())]
    Format { device: PathBuf, reason: String },

    #[error(transparent)]
    Copy(#[from] CopyError),

    #[error("boot workaround failed: {0}")]
    BootWorkaround(String),

    #[error("failed to refresh partition table of {}: {source}", device.display())]
    PartitionRefresh {
        device: PathBuf,
        #[source]
        source: HalError,
    },

    #[error("installation cancelled")]
    Cancelled,

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Workflow(#[from] TransitionError),
}

impl InstallError {
    /// Wrap a failed device-level tool call, singling out privilege problems.
    pub fn device_io(step: impl Into<String>, source: HalError) -> Self {
        let step = step.into();
        if source.is_permission_denied() {
            return InstallError::Permission(format!("{}: {}", step, source));
        }
        InstallError::DeviceIo { step, source }
    }

    pub fn io(context: impl Into<String>, source: io::Error) -> Self {
        InstallError::Io {
            context: context.into(),
            source,
        }
    }

    /// True for user-requested aborts, whether seen at a stage boundary or
    /// inside the copy.
    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            InstallError::Cancelled | InstallError::Copy(CopyError::Cancelled)
        )
    }
}

fn format_paths(paths: &[PathBuf]) -> String {
    if paths.is_empty() {
        return "in use".to_string();
    }
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permission_failures_are_not_reported_as_device_io() {
        let err = InstallError::device_io(
            "wipefs",
            HalError::CommandFailed {
                program: "wipefs".into(),
                code: Some(1),
                stderr: "wipefs: error: /dev/sdb: probing initialization failed: Permission denied"
                    .into(),
            },
        );
        assert!(matches!(err, InstallError::Permission(_)));

        let err = InstallError::device_io("parted", HalError::Other("boom".into()));
        assert!(matches!(err, InstallError::DeviceIo { .. }));
    }

    #[test]
    fn busy_message_lists_mountpoints() {
        let err = InstallError::Busy {
            device: PathBuf::from("/dev/sdb"),
            mountpoints: vec![PathBuf::from("/run/media/u/USB")],
        };
        assert_eq!(
            err.to_string(),
            "/dev/sdb is busy (mounted at: /run/media/u/USB)"
        );
    }

    #[test]
    fn hal_copy_errors_map_onto_copy_taxonomy() {
        assert!(matches!(
            CopyError::from(HalError::Cancelled),
            CopyError::Cancelled
        ));
        assert!(matches!(
            CopyError::from(HalError::NoSpace(PathBuf::from("/t/x"))),
            CopyError::NoSpace(_)
        ));
    }
}
