use std::sync::Arc;

use fstore_error::{FsckError, Result};

use crate::CheckFile;

/// An immutable in-memory file image.
///
/// Cheap to clone; the bytes are shared. Tests build an image with the
/// harness and hand clones to as many checker threads as they like.
#[derive(Debug, Clone)]
pub struct MemoryFile {
    bytes: Arc<Vec<u8>>,
}

impl MemoryFile {
    /// Wrap a finished byte image.
    #[must_use]
    pub fn new(bytes: Vec<u8>) -> Self {
        Self {
            bytes: Arc::new(bytes),
        }
    }

    /// The raw image bytes.
    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }
}

impl CheckFile for MemoryFile {
    fn size(&self) -> u64 {
        self.bytes.len() as u64
    }

    fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<()> {
        let start = usize::try_from(offset)
            .map_err(|_| FsckError::internal("offset exceeds usize"))?;
        let end = start.checked_add(buf.len()).ok_or_else(|| {
            FsckError::internal("read range overflows usize")
        })?;
        if end > self.bytes.len() {
            let actual = self.bytes.len().saturating_sub(start);
            return Err(FsckError::ShortRead {
                offset,
                expected: buf.len(),
                actual,
            });
        }
        buf.copy_from_slice(&self.bytes[start..end]);
        Ok(())
    }
}
