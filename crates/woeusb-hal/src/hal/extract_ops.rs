//! Archive/image extraction (7z).

use crate::HalResult;
use std::path::Path;

pub trait ExtractOps {
    /// Extract a single member of `archive` and return its bytes
    /// (`7z e -so <archive> <member>`).
    fn extract_member(&self, archive: &Path, member: &str) -> HalResult<Vec<u8>>;
}
