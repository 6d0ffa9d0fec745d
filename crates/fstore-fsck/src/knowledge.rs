//! What the checker has learned about each file so far.
//!
//! A [`FileKnowledge`] accumulates discoveries layer by layer: the file
//! size, then the static config, then the winning metablock, then the
//! per-block offsets from the LBA, then per-block transaction ids as
//! blocks get visited. The `Learned` fields transition Unknown → Known
//! exactly once; the block-info vector is the one piece shared across
//! slice threads and sits behind a reader-writer lock. Readers copy
//! entries out — nobody holds a reference across a suspension point.

use parking_lot::RwLock;

use fstore_layout::config_block::{CacheConfig, MultiplexerConfig};
use fstore_layout::metablock::Metablock;
use fstore_layout::static_header::StaticConfig;
use fstore_types::limits::NULL_TRANSACTION_ID;
use fstore_types::{BlockId, BlockSize, FlaggedOffset, Learned, TransactionId};

/// Everything known about one serializer block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockKnowledge {
    /// The offset the LBA ended up assigning, if any.
    pub offset: FlaggedOffset,
    /// The transaction id observed when the block was read, or
    /// [`NULL_TRANSACTION_ID`] while unread.
    pub transaction_id: TransactionId,
}

impl BlockKnowledge {
    /// A block nothing is known about.
    pub const UNUSED: Self = Self {
        offset: FlaggedOffset::Unused,
        transaction_id: NULL_TRANSACTION_ID,
    };

    /// Whether some phase has already read this block.
    #[must_use]
    pub fn visited(&self) -> bool {
        self.transaction_id != NULL_TRANSACTION_ID
    }
}

/// The non-error knowledge accumulated about one file.
#[derive(Debug, Default)]
pub struct FileKnowledge {
    /// Display name of the file (for diagnostics).
    pub filename: String,
    /// File size, learned first.
    pub filesize: Learned<u64>,
    /// Geometry from the static header.
    pub static_config: Learned<StaticConfig>,
    /// The winning metablock.
    pub metablock: Learned<Metablock>,
    /// The multiplexer config block (data files only).
    pub config_block: Learned<MultiplexerConfig>,
    /// The cache config block.
    pub mc_config_block: Learned<CacheConfig>,
    block_info: RwLock<Vec<BlockKnowledge>>,
}

impl FileKnowledge {
    /// Fresh knowledge for the named file.
    #[must_use]
    pub fn new(filename: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
            ..Self::default()
        }
    }

    /// The block size. Panics before the static header is learned.
    #[must_use]
    pub fn block_size(&self) -> BlockSize {
        self.static_config.expect().block_size
    }

    /// The extent size. Panics before the static header is learned.
    #[must_use]
    pub fn extent_size(&self) -> u64 {
        self.static_config.expect().extent_size
    }

    /// Number of block-info slots (one past the highest published id).
    #[must_use]
    pub fn block_info_len(&self) -> u64 {
        self.block_info.read().len() as u64
    }

    /// Copy out one block's knowledge, if the id is in range.
    #[must_use]
    pub fn snapshot(&self, ser_id: BlockId) -> Option<BlockKnowledge> {
        let info = self.block_info.read();
        usize::try_from(ser_id).ok().and_then(|i| info.get(i).copied())
    }

    /// Record an LBA offset for a block, growing the vector as needed.
    /// Later calls for the same id supersede earlier ones — that is the
    /// LBA's replay order doing its job.
    pub fn publish_offset(&self, ser_id: BlockId, offset: FlaggedOffset) {
        let idx = usize::try_from(ser_id).expect("block id exceeds address space");
        let mut info = self.block_info.write();
        if info.len() <= idx {
            info.resize(idx + 1, BlockKnowledge::UNUSED);
        }
        info[idx].offset = offset;
    }

    /// Stamp the transaction id observed when reading a block.
    pub fn stamp_transaction(&self, ser_id: BlockId, transaction_id: TransactionId) {
        let idx = usize::try_from(ser_id).expect("block id exceeds address space");
        let mut info = self.block_info.write();
        if let Some(entry) = info.get_mut(idx) {
            entry.transaction_id = transaction_id;
        }
    }
}
