//! The per-block header every serializer block starts with.

use fstore_error::{FsckError, Result};
use fstore_types::limits::BLOCK_HEADER_SIZE;
use fstore_types::{BlockId, TransactionId};

use crate::get_u64;

/// Header written in front of every serializer block's payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockHeader {
    /// The serializer block id this body was written for.
    pub block_id: BlockId,
    /// The write epoch that produced this body.
    pub transaction_id: TransactionId,
}

impl BlockHeader {
    /// Parse the header from the first bytes of a raw block.
    pub fn parse(block: &[u8]) -> Result<Self> {
        if block.len() < BLOCK_HEADER_SIZE {
            return Err(FsckError::BufferTooSmall {
                what: "block header",
                len: block.len(),
            });
        }
        Ok(Self {
            block_id: get_u64(block, 0),
            transaction_id: get_u64(block, 8),
        })
    }

    /// Write the header into the first bytes of a raw block.
    pub fn write(&self, block: &mut [u8]) {
        block[0..8].copy_from_slice(&self.block_id.to_le_bytes());
        block[8..16].copy_from_slice(&self.transaction_id.to_le_bytes());
    }
}

/// The payload of a raw block (everything after the header).
#[must_use]
pub fn payload(block: &[u8]) -> &[u8] {
    &block[BLOCK_HEADER_SIZE..]
}

/// Mutable view of a raw block's payload.
pub fn payload_mut(block: &mut [u8]) -> &mut [u8] {
    &mut block[BLOCK_HEADER_SIZE..]
}
