//! Diff-log patch records.
//!
//! A diff-log block is the `"LOGB00"` magic followed by packed patch
//! records. Each record:
//!
//! ```text
//! Offset  Size  Field
//!   0       2   len (total record bytes; 0 terminates the block)
//!   2       8   target_block_id (slice-logical)
//!  10       8   transaction_id
//!  18       4   patch_counter
//!  22       1   op
//!  23       -   op payload
//! ```
//!
//! Ops: `0x01` write-bytes `{offset: u16, data}`, `0x02` move-range
//! `{dest: u16, src: u16, count: u16}`. Offsets address the target
//! block's payload; records whose effect would not fit inside a payload
//! of the serializer's block size are corrupt.

use fstore_types::{BlockId, TransactionId};

use crate::{get_u16, get_u32, get_u64};

/// Byte size of the fixed patch header.
pub const PATCH_HEADER_SIZE: usize = 23;

/// The smallest well-formed patch record (a zero-length write).
pub const MIN_PATCH_SIZE: usize = PATCH_HEADER_SIZE + 2;

/// Op code of a write-bytes patch.
pub const OP_WRITE: u8 = 0x01;
/// Op code of a move-range patch.
pub const OP_MOVE: u8 = 0x02;

/// A patch's mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatchOp {
    /// Overwrite `data.len()` bytes at `offset`.
    Write { offset: u16, data: Vec<u8> },
    /// Copy `count` bytes from `src` to `dest` (memmove semantics).
    Move { dest: u16, src: u16, count: u16 },
}

/// One decoded diff-log record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Patch {
    /// The slice-logical block the patch applies to.
    pub target_block_id: BlockId,
    /// Write epoch the patch belongs to.
    pub transaction_id: TransactionId,
    /// Position within the transaction's patch sequence for the block.
    pub patch_counter: u32,
    /// The mutation.
    pub op: PatchOp,
}

impl Patch {
    /// Serialized record size.
    #[must_use]
    pub fn serialized_size(&self) -> usize {
        PATCH_HEADER_SIZE
            + match &self.op {
                PatchOp::Write { data, .. } => 2 + data.len(),
                PatchOp::Move { .. } => 6,
            }
    }

    /// Append the record to a log-block image.
    pub fn write_to(&self, out: &mut Vec<u8>) {
        let len = self.serialized_size() as u16;
        out.extend_from_slice(&len.to_le_bytes());
        out.extend_from_slice(&self.target_block_id.to_le_bytes());
        out.extend_from_slice(&self.transaction_id.to_le_bytes());
        out.extend_from_slice(&self.patch_counter.to_le_bytes());
        match &self.op {
            PatchOp::Write { offset, data } => {
                out.push(OP_WRITE);
                out.extend_from_slice(&offset.to_le_bytes());
                out.extend_from_slice(data);
            }
            PatchOp::Move { dest, src, count } => {
                out.push(OP_MOVE);
                out.extend_from_slice(&dest.to_le_bytes());
                out.extend_from_slice(&src.to_le_bytes());
                out.extend_from_slice(&count.to_le_bytes());
            }
        }
    }

    /// Apply the mutation to a block payload. Bounds were validated at
    /// decode time against the same payload size.
    pub fn apply_to(&self, payload: &mut [u8]) {
        match &self.op {
            PatchOp::Write { offset, data } => {
                let off = *offset as usize;
                payload[off..off + data.len()].copy_from_slice(data);
            }
            PatchOp::Move { dest, src, count } => {
                payload.copy_within(
                    *src as usize..*src as usize + *count as usize,
                    *dest as usize,
                );
            }
        }
    }
}

/// Why a patch record failed to decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchDecodeError {
    /// The record length field is impossible.
    BadLength,
    /// The op code is unknown.
    BadOp,
    /// The op payload is malformed or would write outside a block.
    BadOpPayload,
}

/// Decode the patch record at `at` inside a log-block payload.
///
/// `target_payload_size` is the payload size patches will be applied to;
/// a record whose effect falls outside it is corrupt. Returns
/// `Ok(None)` at the zero-length terminator.
pub fn decode_patch(
    log_payload: &[u8],
    at: usize,
    target_payload_size: usize,
) -> Result<Option<(Patch, usize)>, PatchDecodeError> {
    let len = get_u16(log_payload, at) as usize;
    if len == 0 {
        return Ok(None);
    }
    if len < MIN_PATCH_SIZE || at + len > log_payload.len() {
        return Err(PatchDecodeError::BadLength);
    }
    let target_block_id = get_u64(log_payload, at + 2);
    let transaction_id = get_u64(log_payload, at + 10);
    let patch_counter = get_u32(log_payload, at + 18);
    let op_code = log_payload[at + 22];
    let body = &log_payload[at + PATCH_HEADER_SIZE..at + len];

    let op = match op_code {
        OP_WRITE => {
            let offset = get_u16(body, 0);
            let data = body[2..].to_vec();
            if offset as usize + data.len() > target_payload_size {
                return Err(PatchDecodeError::BadOpPayload);
            }
            PatchOp::Write { offset, data }
        }
        OP_MOVE => {
            if body.len() != 6 {
                return Err(PatchDecodeError::BadOpPayload);
            }
            let dest = get_u16(body, 0);
            let src = get_u16(body, 2);
            let count = get_u16(body, 4);
            if dest as usize + count as usize > target_payload_size
                || src as usize + count as usize > target_payload_size
            {
                return Err(PatchDecodeError::BadOpPayload);
            }
            PatchOp::Move { dest, src, count }
        }
        _ => return Err(PatchDecodeError::BadOp),
    };

    Ok(Some((
        Patch {
            target_block_id,
            transaction_id,
            patch_counter,
            op,
        },
        len,
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Patch {
        Patch {
            target_block_id: 12,
            transaction_id: 5,
            patch_counter: 1,
            op: PatchOp::Write {
                offset: 100,
                data: b"xyz".to_vec(),
            },
        }
    }

    #[test]
    fn record_roundtrip() {
        let patch = sample();
        let mut image = Vec::new();
        patch.write_to(&mut image);
        image.resize(512, 0);

        let (decoded, consumed) = decode_patch(&image, 0, 4080).unwrap().unwrap();
        assert_eq!(decoded, patch);
        assert_eq!(consumed, patch.serialized_size());
        // The zero terminator stops the walk.
        assert_eq!(decode_patch(&image, consumed, 4080).unwrap(), None);
    }

    #[test]
    fn move_roundtrip_and_apply() {
        let patch = Patch {
            target_block_id: 2,
            transaction_id: 9,
            patch_counter: 3,
            op: PatchOp::Move {
                dest: 0,
                src: 4,
                count: 4,
            },
        };
        let mut image = Vec::new();
        patch.write_to(&mut image);
        image.resize(64, 0);
        let (decoded, _) = decode_patch(&image, 0, 4080).unwrap().unwrap();
        assert_eq!(decoded, patch);

        let mut payload = vec![1, 2, 3, 4, 9, 9, 9, 9];
        decoded.apply_to(&mut payload);
        assert_eq!(payload, vec![9, 9, 9, 9, 9, 9, 9, 9]);
    }

    #[test]
    fn write_apply() {
        let mut payload = vec![0u8; 200];
        sample().apply_to(&mut payload);
        assert_eq!(&payload[100..103], b"xyz");
    }

    #[test]
    fn out_of_block_write_is_corrupt() {
        let patch = Patch {
            target_block_id: 1,
            transaction_id: 1,
            patch_counter: 0,
            op: PatchOp::Write {
                offset: 4079,
                data: vec![0, 0],
            },
        };
        let mut image = Vec::new();
        patch.write_to(&mut image);
        image.resize(64, 0);
        assert_eq!(
            decode_patch(&image, 0, 4080).unwrap_err(),
            PatchDecodeError::BadOpPayload
        );
    }

    #[test]
    fn unknown_op_is_corrupt() {
        let mut image = Vec::new();
        sample().write_to(&mut image);
        image[22] = 0x7F;
        image.resize(64, 0);
        assert_eq!(decode_patch(&image, 0, 4080).unwrap_err(), PatchDecodeError::BadOp);
    }

    #[test]
    fn impossible_length_is_corrupt() {
        let mut image = vec![0u8; 16];
        image[0] = 5; // len 5 < minimum
        assert_eq!(
            decode_patch(&image, 0, 4080).unwrap_err(),
            PatchDecodeError::BadLength
        );
    }
}
