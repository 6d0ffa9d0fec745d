//! Large-buffer references and segment-tree geometry.
//!
//! Values too big for a leaf node live in a segment tree of blocks. The
//! in-node reference carries the logical `[offset, offset+size)` window
//! plus the inline ids of the top-level segments. Leaf segments hold
//! bytes; internal segments hold child ids. The tree is left-shifted:
//! the window starts inside the first child of the shallowest shape that
//! can hold it.

use fstore_error::{FsckError, Result};
use fstore_types::limits::ceil_divide;
use fstore_types::magic::{LARGE_BUF_INTERNAL_MAGIC, LARGE_BUF_LEAF_MAGIC};
use fstore_types::{BlockId, BlockSize};

use crate::{get_i64, get_u64};

/// Bytes of a large-buf reference before the inline block ids.
pub const REF_HEADER_SIZE: usize = 16;
/// Bytes of magic at the front of each segment payload.
pub const SEGMENT_HEADER_SIZE: usize = 4;

/// An in-node reference to a large buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LargeBufRef {
    /// Logical start of the live window.
    pub offset: i64,
    /// Length of the live window.
    pub size: i64,
    /// Inline ids of the top-level segments.
    pub block_ids: Vec<BlockId>,
}

impl LargeBufRef {
    /// Decode a reference from its in-node bytes. The id count is implied
    /// by the byte length.
    pub fn parse(body: &[u8]) -> Result<Self> {
        if body.len() < REF_HEADER_SIZE {
            return Err(FsckError::BufferTooSmall {
                what: "large-buf reference",
                len: body.len(),
            });
        }
        let n_ids = (body.len() - REF_HEADER_SIZE) / 8;
        Ok(Self {
            offset: get_i64(body, 0),
            size: get_i64(body, 8),
            block_ids: (0..n_ids)
                .map(|i| get_u64(body, REF_HEADER_SIZE + i * 8))
                .collect(),
        })
    }

    /// Encode to in-node bytes.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(REF_HEADER_SIZE + self.block_ids.len() * 8);
        out.extend_from_slice(&self.offset.to_le_bytes());
        out.extend_from_slice(&self.size.to_le_bytes());
        for id in &self.block_ids {
            out.extend_from_slice(&id.to_le_bytes());
        }
        out
    }
}

// ---------------------------------------------------------------------------
// Geometry
// ---------------------------------------------------------------------------

/// Bytes one leaf segment holds.
#[must_use]
pub fn leaf_capacity(block_size: BlockSize) -> u64 {
    u64::from(block_size.payload()) - SEGMENT_HEADER_SIZE as u64
}

/// Child ids one internal segment holds.
#[must_use]
pub fn internal_fanout(block_size: BlockSize) -> u64 {
    (u64::from(block_size.payload()) - SEGMENT_HEADER_SIZE as u64) / 8
}

/// Logical bytes a subtree of the given depth covers (1 = a single leaf
/// segment). Saturates instead of overflowing for absurd depths.
#[must_use]
pub fn max_offset(block_size: BlockSize, levels: u32) -> u64 {
    let mut x = leaf_capacity(block_size);
    for _ in 1..levels {
        x = x.saturating_mul(internal_fanout(block_size));
    }
    x
}

/// Most inline ids a reference of `ref_size_bytes` can carry.
#[must_use]
pub fn max_inline_ids(ref_size_bytes: usize) -> u64 {
    (ref_size_bytes.saturating_sub(REF_HEADER_SIZE) / 8) as u64
}

/// Depth of the subtrees hanging off the inline ids: the smallest depth
/// at which the whole `[0, end_offset)` range fits behind at most
/// `max_inline_ids(ref_limit)` top-level segments.
#[must_use]
pub fn compute_num_sublevels(block_size: BlockSize, end_offset: u64, ref_limit: usize) -> u32 {
    let budget = max_inline_ids(ref_limit).max(1);
    let mut levels = 1;
    while ceil_divide(end_offset.max(1), max_offset(block_size, levels)) > budget {
        levels += 1;
    }
    levels
}

/// How many inline ids a well-formed reference covering `[0, end_offset)`
/// carries.
#[must_use]
pub fn compute_num_inlined(block_size: BlockSize, end_offset: u64, ref_limit: usize) -> u64 {
    let sublevels = compute_num_sublevels(block_size, end_offset, ref_limit);
    ceil_divide(end_offset.max(1), max_offset(block_size, sublevels))
}

// ---------------------------------------------------------------------------
// Segment payloads
// ---------------------------------------------------------------------------

/// Whether a segment payload carries the leaf magic.
#[must_use]
pub fn leaf_segment_magic_ok(payload: &[u8]) -> bool {
    payload.len() >= SEGMENT_HEADER_SIZE && &payload[0..4] == LARGE_BUF_LEAF_MAGIC
}

/// Whether a segment payload carries the internal magic.
#[must_use]
pub fn internal_segment_magic_ok(payload: &[u8]) -> bool {
    payload.len() >= SEGMENT_HEADER_SIZE && &payload[0..4] == LARGE_BUF_INTERNAL_MAGIC
}

/// The child ids of an internal segment.
#[must_use]
pub fn internal_segment_kids(payload: &[u8]) -> Vec<BlockId> {
    let n = (payload.len() - SEGMENT_HEADER_SIZE) / 8;
    (0..n)
        .map(|i| get_u64(payload, SEGMENT_HEADER_SIZE + i * 8))
        .collect()
}

/// Build a leaf segment payload holding `data` at its front.
#[must_use]
pub fn write_leaf_segment(payload_len: usize, data: &[u8]) -> Vec<u8> {
    let mut payload = vec![0u8; payload_len];
    payload[0..4].copy_from_slice(LARGE_BUF_LEAF_MAGIC);
    payload[SEGMENT_HEADER_SIZE..SEGMENT_HEADER_SIZE + data.len()].copy_from_slice(data);
    payload
}

/// Build an internal segment payload naming the given children.
#[must_use]
pub fn write_internal_segment(payload_len: usize, kids: &[BlockId]) -> Vec<u8> {
    let mut payload = vec![0u8; payload_len];
    payload[0..4].copy_from_slice(LARGE_BUF_INTERNAL_MAGIC);
    for (i, id) in kids.iter().enumerate() {
        let base = SEGMENT_HEADER_SIZE + i * 8;
        payload[base..base + 8].copy_from_slice(&id.to_le_bytes());
    }
    payload
}

#[cfg(test)]
mod tests {
    use super::*;

    const BS: BlockSize = BlockSize::from_ser(4096);

    #[test]
    fn ref_roundtrip() {
        let r = LargeBufRef {
            offset: 0,
            size: 5000,
            block_ids: vec![8, 9],
        };
        let bytes = r.to_bytes();
        assert_eq!(bytes.len(), REF_HEADER_SIZE + 16);
        assert_eq!(LargeBufRef::parse(&bytes).unwrap(), r);
    }

    #[test]
    fn ref_too_short_rejected() {
        assert!(LargeBufRef::parse(&[0u8; 8]).is_err());
    }

    #[test]
    fn geometry_for_4k_blocks() {
        // payload = 4080, leaf capacity = 4076, fanout = 509.
        assert_eq!(leaf_capacity(BS), 4076);
        assert_eq!(internal_fanout(BS), 509);
        assert_eq!(max_offset(BS, 1), 4076);
        assert_eq!(max_offset(BS, 2), 4076 * 509);
    }

    #[test]
    fn sublevels_grow_with_size() {
        let limit = 250;
        // 29 ids fit in a 250-byte ref.
        assert_eq!(max_inline_ids(limit), 29);
        assert_eq!(compute_num_sublevels(BS, 0, limit), 1);
        assert_eq!(compute_num_sublevels(BS, 4076, limit), 1);
        // 29 leaves cover 29 * 4076 bytes at depth 1.
        assert_eq!(compute_num_sublevels(BS, 29 * 4076, limit), 1);
        assert_eq!(compute_num_sublevels(BS, 29 * 4076 + 1, limit), 2);
    }

    #[test]
    fn inlined_count_matches_shape() {
        let limit = 250;
        assert_eq!(compute_num_inlined(BS, 0, limit), 1);
        assert_eq!(compute_num_inlined(BS, 300, limit), 1);
        assert_eq!(compute_num_inlined(BS, 5000, limit), 2);
        assert_eq!(compute_num_inlined(BS, 29 * 4076, limit), 29);
    }

    #[test]
    fn segment_payload_roundtrip() {
        let leaf = write_leaf_segment(4080, b"hello");
        assert!(leaf_segment_magic_ok(&leaf));
        assert!(!internal_segment_magic_ok(&leaf));
        assert_eq!(&leaf[4..9], b"hello");

        let internal = write_internal_segment(4080, &[5, 6, 7]);
        assert!(internal_segment_magic_ok(&internal));
        assert_eq!(internal_segment_kids(&internal)[..3], [5, 6, 7]);
    }

    mod props {
        use proptest::prelude::*;

        use super::*;

        proptest! {
            #[test]
            fn window_always_fits_behind_inline_ids(end in 1u64..100_000_000) {
                let limit = 250;
                let levels = compute_num_sublevels(BS, end, limit);
                let inlined = compute_num_inlined(BS, end, limit);
                prop_assert!(inlined >= 1);
                prop_assert!(inlined <= max_inline_ids(limit));
                prop_assert!(inlined * max_offset(BS, levels) >= end);
            }
        }
    }
}
