//! The replication delete-queue block.
//!
//! One block per slice records recently deleted keys for replication
//! catch-up: a primal offset, a fixed-size large-buf reference to the
//! (timestamp, offset) index, and a large-buf reference to the packed
//! keys filling the rest of the block.

use fstore_error::{FsckError, Result};
use fstore_types::limits::T_AND_O_REF_SIZE;
use fstore_types::magic::DELETE_QUEUE_MAGIC;

use crate::get_i64;

/// Payload offset of the timestamps-and-offsets reference.
const T_AND_O_OFFSET: usize = 16;
/// Payload offset of the keys reference.
const KEYS_REF_OFFSET: usize = T_AND_O_OFFSET + T_AND_O_REF_SIZE;

/// A decoded delete-queue block payload. The two references are kept as
/// raw bytes; the large-buf checker owns their interpretation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteQueueBlock<'a> {
    /// Logical byte position of the queue's oldest retained entry.
    pub primal_offset: i64,
    /// The timestamps-and-offsets large-buf reference bytes.
    pub timestamps_and_offsets: &'a [u8],
    /// The keys large-buf reference bytes.
    pub keys: &'a [u8],
}

impl<'a> DeleteQueueBlock<'a> {
    /// Parse from a block payload, checking the magic.
    pub fn parse(payload: &'a [u8]) -> Result<Option<Self>> {
        if payload.len() < KEYS_REF_OFFSET {
            return Err(FsckError::BufferTooSmall {
                what: "delete queue block",
                len: payload.len(),
            });
        }
        if &payload[0..4] != DELETE_QUEUE_MAGIC {
            return Ok(None);
        }
        Ok(Some(Self {
            primal_offset: get_i64(payload, 8),
            timestamps_and_offsets: &payload[T_AND_O_OFFSET..KEYS_REF_OFFSET],
            keys: &payload[KEYS_REF_OFFSET..],
        }))
    }
}

/// Byte size available to the keys reference in a payload of the given
/// size.
#[must_use]
pub fn keys_ref_size(payload_len: usize) -> usize {
    payload_len - KEYS_REF_OFFSET
}

/// Write a delete-queue payload from its parts. The reference byte
/// slices may be shorter than their regions; the remainder stays zero.
pub fn write_delete_queue(
    payload: &mut [u8],
    primal_offset: i64,
    t_and_o_ref: &[u8],
    keys_ref: &[u8],
) {
    assert!(t_and_o_ref.len() <= T_AND_O_REF_SIZE);
    assert!(keys_ref.len() <= keys_ref_size(payload.len()));
    payload[0..4].copy_from_slice(DELETE_QUEUE_MAGIC);
    payload[8..16].copy_from_slice(&primal_offset.to_le_bytes());
    payload[T_AND_O_OFFSET..T_AND_O_OFFSET + t_and_o_ref.len()].copy_from_slice(t_and_o_ref);
    payload[KEYS_REF_OFFSET..KEYS_REF_OFFSET + keys_ref.len()].copy_from_slice(keys_ref);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip() {
        let mut payload = vec![0u8; 4080];
        write_delete_queue(&mut payload, 77, &[1u8; 32], &[2u8; 40]);
        let dq = DeleteQueueBlock::parse(&payload).unwrap().unwrap();
        assert_eq!(dq.primal_offset, 77);
        assert_eq!(dq.timestamps_and_offsets.len(), T_AND_O_REF_SIZE);
        assert_eq!(&dq.timestamps_and_offsets[..32], &[1u8; 32]);
        assert_eq!(dq.keys.len(), keys_ref_size(4080));
        assert_eq!(&dq.keys[..40], &[2u8; 40]);
    }

    #[test]
    fn wrong_magic_is_none() {
        let payload = vec![0u8; 4080];
        assert_eq!(DeleteQueueBlock::parse(&payload).unwrap(), None);
    }
}
