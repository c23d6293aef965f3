//! Network downloads.

use crate::HalResult;
use std::path::Path;
use std::time::Duration;

pub trait FetchOps {
    /// Download `url` into `dest`, returning the number of bytes written.
    fn download(&self, url: &str, dest: &Path, timeout: Duration) -> HalResult<u64>;
}
