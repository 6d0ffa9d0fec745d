//! Metablock ring slots.
//!
//! The whole of extent 0 after the static header is a ring of fixed
//! 512-byte metablock slots. The serializer rotates through them; the
//! newest slot (highest version counter) names the live LBA head and the
//! last committed transaction id.
//!
//! ```text
//! Offset  Size  Field
//!   0       8   magic marker  "mblkmagi"
//!   8       4   crc marker    "crc:"
//!  12       4   crc32 of bytes [24..424)
//!  16       8   version marker "version:"
//!  24       8   version counter
//!  32       8   transaction_id
//!  40     384   16 LBA shard records, 24 bytes each
//! ```
//!
//! Shard record: `last_extent_offset: i64`, `superblock_offset: i64`,
//! `last_extent_entry_count: u32`, `superblock_entry_count: u32`
//! (offsets 0, 8, 16, 20). A `-1` offset means "none".

use fstore_error::{FsckError, Result};
use fstore_types::limits::{DEVICE_BLOCK_SIZE, LBA_SHARD_FACTOR};
use fstore_types::magic::{MB_MARKER_CRC, MB_MARKER_MAGIC, MB_MARKER_VERSION};
use fstore_types::TransactionId;

use crate::{get_i64, get_u32, get_u64};

/// Offset of the CRC-covered region within a slot.
const CRC_REGION_START: usize = 24;
/// End of the CRC-covered region.
const CRC_REGION_END: usize = SLOT_SIZE;
/// Serialized size of one metablock slot's meaningful prefix.
pub const SLOT_SIZE: usize = 40 + LBA_SHARD_FACTOR as usize * SHARD_RECORD_SIZE;
/// Serialized size of one LBA shard record.
pub const SHARD_RECORD_SIZE: usize = 24;

/// One LBA shard's head pointers as recorded in a metablock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LbaShardRecord {
    /// Offset of the shard's currently open LBA extent, or -1.
    pub last_extent_offset: i64,
    /// Offset of the shard's LBA superblock, or -1.
    pub superblock_offset: i64,
    /// Entries used in the open extent.
    pub last_extent_entry_count: u32,
    /// Entries in the superblock.
    pub superblock_entry_count: u32,
}

/// The metablock body: transaction id plus the LBA index head.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Metablock {
    /// Last committed transaction id.
    pub transaction_id: TransactionId,
    /// Per-shard LBA head pointers.
    pub shards: [LbaShardRecord; LBA_SHARD_FACTOR as usize],
}

/// A fully decoded metablock slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrcMetablock {
    /// Slot markers as read (checked separately from the CRC).
    pub markers_ok: bool,
    /// Stored CRC of the version + body region.
    pub crc: u32,
    /// Write-generation counter; the ring's newest slot wins.
    pub version: u64,
    /// The body.
    pub metablock: Metablock,
}

impl CrcMetablock {
    /// Decode a slot from one device block. This never fails on content:
    /// garbage decodes to garbage values and the caller classifies it.
    pub fn parse(buf: &[u8]) -> Result<Self> {
        if buf.len() < SLOT_SIZE {
            return Err(FsckError::BufferTooSmall {
                what: "metablock slot",
                len: buf.len(),
            });
        }
        let markers_ok = &buf[0..8] == MB_MARKER_MAGIC
            && &buf[8..12] == MB_MARKER_CRC
            && &buf[16..24] == MB_MARKER_VERSION;
        let mut shards = [LbaShardRecord::default(); LBA_SHARD_FACTOR as usize];
        for (i, shard) in shards.iter_mut().enumerate() {
            let base = 40 + i * SHARD_RECORD_SIZE;
            *shard = LbaShardRecord {
                last_extent_offset: get_i64(buf, base),
                superblock_offset: get_i64(buf, base + 8),
                last_extent_entry_count: get_u32(buf, base + 16),
                superblock_entry_count: get_u32(buf, base + 20),
            };
        }
        Ok(Self {
            markers_ok,
            crc: get_u32(buf, 12),
            version: get_u64(buf, 24),
            metablock: Metablock {
                transaction_id: get_u64(buf, 32),
                shards,
            },
        })
    }

    /// Whether the stored CRC matches the version + body bytes.
    #[must_use]
    pub fn crc_ok(&self, buf: &[u8]) -> bool {
        self.crc == slot_crc(buf)
    }
}

/// CRC over a slot's version + body region.
#[must_use]
pub fn slot_crc(buf: &[u8]) -> u32 {
    crc32fast::hash(&buf[CRC_REGION_START..CRC_REGION_END])
}

/// Serialize a metablock into a zeroed device block, markers and CRC
/// included.
pub fn write_slot(buf: &mut [u8], version: u64, metablock: &Metablock) {
    buf[0..8].copy_from_slice(MB_MARKER_MAGIC);
    buf[8..12].copy_from_slice(MB_MARKER_CRC);
    buf[16..24].copy_from_slice(MB_MARKER_VERSION);
    buf[24..32].copy_from_slice(&version.to_le_bytes());
    buf[32..40].copy_from_slice(&metablock.transaction_id.to_le_bytes());
    for (i, shard) in metablock.shards.iter().enumerate() {
        let base = 40 + i * SHARD_RECORD_SIZE;
        buf[base..base + 8].copy_from_slice(&shard.last_extent_offset.to_le_bytes());
        buf[base + 8..base + 16].copy_from_slice(&shard.superblock_offset.to_le_bytes());
        buf[base + 16..base + 20].copy_from_slice(&shard.last_extent_entry_count.to_le_bytes());
        buf[base + 20..base + 24].copy_from_slice(&shard.superblock_entry_count.to_le_bytes());
    }
    let crc = slot_crc(buf);
    buf[12..16].copy_from_slice(&crc.to_le_bytes());
}

/// The fixed slot offsets for a file with the given extent size: every
/// device block of extent 0 except block 0 (the static header).
#[must_use]
pub fn metablock_offsets(extent_size: u64) -> Vec<u64> {
    (1..extent_size / DEVICE_BLOCK_SIZE)
        .map(|i| i * DEVICE_BLOCK_SIZE)
        .collect()
}

/// An empty metablock, every shard pointing nowhere.
#[must_use]
pub fn empty_metablock(transaction_id: TransactionId) -> Metablock {
    Metablock {
        transaction_id,
        shards: [LbaShardRecord {
            last_extent_offset: -1,
            superblock_offset: -1,
            last_extent_entry_count: 0,
            superblock_entry_count: 0,
        }; LBA_SHARD_FACTOR as usize],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_fits_in_device_block() {
        assert!(SLOT_SIZE <= DEVICE_BLOCK_SIZE as usize);
    }

    #[test]
    fn slot_roundtrip_with_valid_crc() {
        let mut mb = empty_metablock(99);
        mb.shards[3] = LbaShardRecord {
            last_extent_offset: 512 * 1024,
            superblock_offset: -1,
            last_extent_entry_count: 12,
            superblock_entry_count: 0,
        };
        let mut buf = vec![0u8; DEVICE_BLOCK_SIZE as usize];
        write_slot(&mut buf, 7, &mb);

        let parsed = CrcMetablock::parse(&buf).unwrap();
        assert!(parsed.markers_ok);
        assert!(parsed.crc_ok(&buf));
        assert_eq!(parsed.version, 7);
        assert_eq!(parsed.metablock, mb);
    }

    #[test]
    fn corrupt_body_fails_crc() {
        let mut buf = vec![0u8; DEVICE_BLOCK_SIZE as usize];
        write_slot(&mut buf, 1, &empty_metablock(1));
        buf[40] ^= 0xFF;
        let parsed = CrcMetablock::parse(&buf).unwrap();
        assert!(!parsed.crc_ok(&buf));
    }

    #[test]
    fn zeroed_slot_parses_with_bad_markers() {
        let buf = vec![0u8; DEVICE_BLOCK_SIZE as usize];
        let parsed = CrcMetablock::parse(&buf).unwrap();
        assert!(!parsed.markers_ok);
        assert_eq!(parsed.version, 0);
    }

    #[test]
    fn offsets_cover_extent_zero_only() {
        let offsets = metablock_offsets(512 * 1024);
        assert_eq!(offsets.len(), 1023);
        assert_eq!(offsets[0], 512);
        assert_eq!(*offsets.last().unwrap(), 512 * 1024 - 512);
    }
}
