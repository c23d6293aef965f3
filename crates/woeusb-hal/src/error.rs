use std::path::PathBuf;
use thiserror::Error;

pub type HalResult<T> = std::result::Result<T, HalError>;

#[derive(Error, Debug)]
pub enum HalError {
    #[error("Device is busy (mounted or in use)")]
    DiskBusy,

    #[error("Permission denied")]
    PermissionDenied,

    #[error("Command not found: {0}")]
    CommandNotFound(String),

    #[error("Command failed: {program} (exit={code:?}): {stderr}")]
    CommandFailed {
        program: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("Command timed out: {program} after {timeout_secs}s")]
    CommandTimeout { program: String, timeout_secs: u64 },

    #[error("Download failed: {0}")]
    Download(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("No space left on target while writing {}", .0.display())]
    NoSpace(PathBuf),

    #[error("Copy failed at {}: {source}", path.display())]
    CopyFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("nix errno: {0}")]
    Nix(#[from] nix::errno::Errno),

    #[error("UTF-8 decode error: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("{0}")]
    Other(String),
}

impl HalError {
    /// True when the failure means the caller lacks privileges, either as a
    /// syscall errno or as a tool complaining on stderr.
    pub fn is_permission_denied(&self) -> bool {
        match self {
            HalError::PermissionDenied => true,
            HalError::Io(err) => err.kind() == std::io::ErrorKind::PermissionDenied,
            HalError::CommandFailed { stderr, .. } => {
                let lower = stderr.to_ascii_lowercase();
                lower.contains("permission denied") || lower.contains("must be root")
            }
            _ => false,
        }
    }
}
