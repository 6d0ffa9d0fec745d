//! The single point of truth for "this block was visited".
//!
//! Loading a block snapshots its LBA entry under the read lock, reads and
//! header-checks the body, replays any diff-log patches that postdate the
//! on-disk revision, and stamps the observed transaction id back into the
//! block info under the write lock. A second load of the same serializer
//! block is an error by construction.

use std::fmt;

use fstore_layout::block::{payload, BlockHeader};
use fstore_layout::patch::Patch;
use fstore_types::limits::FIRST_TRANSACTION_ID;
use fstore_types::BlockId;
use fstore_vfs::CheckFile;

use crate::knowledge::FileKnowledge;
use crate::raw_block::{read_raw, RawBlockError};

/// Why a block failed to load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockLoadError {
    /// The raw read itself failed.
    Raw(RawBlockError),
    /// The LBA never placed this block (or the id is out of range).
    NoBlock,
    /// Something already read this block; one visit per slice is the law.
    AlreadyAccessed,
    /// The header's transaction id predates the first valid epoch.
    TransactionIdInvalid,
    /// The header's transaction id postdates the metablock's.
    TransactionIdTooLarge,
    /// Applied patches disagree about their transaction id.
    PatchTransactionIdMismatch,
}

impl fmt::Display for BlockLoadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Raw(e) => write!(f, "{e}"),
            Self::NoBlock => f.write_str("no block"),
            Self::AlreadyAccessed => f.write_str("already accessed"),
            Self::TransactionIdInvalid => f.write_str("bad transaction id"),
            Self::TransactionIdTooLarge => f.write_str("transaction id too large"),
            Self::PatchTransactionIdMismatch => {
                f.write_str("patch applies to future revision of the block")
            }
        }
    }
}

/// A successfully loaded block: its header and its payload with any
/// pending patches already replayed.
#[derive(Debug)]
pub struct LoadedBlock {
    /// The on-disk block header.
    pub header: BlockHeader,
    /// The payload, caught up to its written revision.
    pub payload: Vec<u8>,
}

impl LoadedBlock {
    /// The first four payload bytes — the structure magic, for
    /// diagnostics about blocks of unknown type.
    #[must_use]
    pub fn magic(&self) -> [u8; 4] {
        let mut m = [0u8; 4];
        m.copy_from_slice(&self.payload[0..4]);
        m
    }
}

/// Load serializer block `ser_id`, replaying `patches` (already sorted by
/// transaction id and counter) on top of the on-disk body.
pub fn load_ser_block(
    file: &dyn CheckFile,
    knog: &FileKnowledge,
    ser_id: BlockId,
    patches: Option<&[Patch]>,
) -> Result<LoadedBlock, BlockLoadError> {
    let Some(info) = knog.snapshot(ser_id) else {
        return Err(BlockLoadError::NoBlock);
    };
    let Some(offset) = info.offset.offset() else {
        return Err(BlockLoadError::NoBlock);
    };
    if info.visited() {
        return Err(BlockLoadError::AlreadyAccessed);
    }

    let block_size = knog.block_size();
    let buf = read_raw(file, block_size.ser() as usize, offset).map_err(BlockLoadError::Raw)?;
    let header = BlockHeader::parse(&buf).map_err(|_| BlockLoadError::Raw(RawBlockError::BadSize))?;

    if header.transaction_id < FIRST_TRANSACTION_ID {
        return Err(BlockLoadError::TransactionIdInvalid);
    }
    if header.transaction_id > knog.metablock.expect().transaction_id {
        return Err(BlockLoadError::TransactionIdTooLarge);
    }

    let mut body = payload(&buf).to_vec();
    if let Some(patches) = patches {
        let mut applied_transaction = None;
        for patch in patches {
            if patch.transaction_id >= header.transaction_id {
                match applied_transaction {
                    None => applied_transaction = Some(patch.transaction_id),
                    Some(t) if t != patch.transaction_id => {
                        return Err(BlockLoadError::PatchTransactionIdMismatch);
                    }
                    Some(_) => {}
                }
                patch.apply_to(&mut body);
            }
        }
    }

    knog.stamp_transaction(ser_id, header.transaction_id);
    Ok(LoadedBlock {
        header,
        payload: body,
    })
}
