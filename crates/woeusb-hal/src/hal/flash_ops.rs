//! Raw image writing operations trait.

use crate::HalResult;
use std::path::Path;

/// Trait for writing raw filesystem images onto block devices.
pub trait FlashOps {
    /// Copy `image_path` byte-for-byte onto `target` (the `dd` equivalent) and
    /// flush it. Fails instead of creating `target` when it does not exist.
    fn flash_image(&self, image_path: &Path, target: &Path) -> HalResult<()>;
}
