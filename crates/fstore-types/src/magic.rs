//! Magic byte strings identifying each on-disk structure.

/// Static-header software name, NUL-padded to its field width.
pub const SOFTWARE_NAME: &[u8; 16] = b"FrankenStore\0\0\0\0";

/// Static-header version string, NUL-padded to its field width.
pub const VERSION_STRING: &[u8; 8] = b"0.4\0\0\0\0\0";

/// Metablock slot marker preceding the CRC field.
pub const MB_MARKER_MAGIC: &[u8; 8] = b"mblkmagi";
/// Metablock slot marker preceding the CRC value.
pub const MB_MARKER_CRC: &[u8; 4] = b"crc:";
/// Metablock slot marker preceding the version counter.
pub const MB_MARKER_VERSION: &[u8; 8] = b"version:";

/// First bytes of an LBA superblock.
pub const LBA_SUPER_MAGIC: &[u8; 8] = b"lbasuper";
/// First bytes of an LBA extent.
pub const LBA_EXTENT_MAGIC: &[u8; 4] = b"lbax";

/// Multiplexer config block payload magic.
pub const MULTIPLEXER_CONFIG_MAGIC: &[u8; 4] = b"mpxc";
/// Cache config block payload magic.
pub const CACHE_CONFIG_MAGIC: &[u8; 4] = b"mccb";

/// Diff-log block payload magic.
pub const LOG_BLOCK_MAGIC: &[u8; 6] = b"LOGB00";

/// B-tree superblock payload magic.
pub const BTREE_SUPERBLOCK_MAGIC: &[u8; 4] = b"supe";
/// Internal B-tree node payload magic.
pub const INTERNAL_NODE_MAGIC: &[u8; 4] = b"intr";
/// Leaf B-tree node payload magic.
pub const LEAF_NODE_MAGIC: &[u8; 4] = b"leaf";

/// Large-buffer internal segment payload magic.
pub const LARGE_BUF_INTERNAL_MAGIC: &[u8; 4] = b"lbin";
/// Large-buffer leaf segment payload magic.
pub const LARGE_BUF_LEAF_MAGIC: &[u8; 4] = b"lblf";

/// Delete-queue block payload magic.
pub const DELETE_QUEUE_MAGIC: &[u8; 4] = b"delq";

/// Payload magic of a deleted block's zeroed body.
pub const ZERO_BLOCK_MAGIC: &[u8; 4] = b"zero";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn four_byte_magics_are_distinct() {
        let magics = [
            LBA_EXTENT_MAGIC,
            MULTIPLEXER_CONFIG_MAGIC,
            CACHE_CONFIG_MAGIC,
            BTREE_SUPERBLOCK_MAGIC,
            INTERNAL_NODE_MAGIC,
            LEAF_NODE_MAGIC,
            LARGE_BUF_INTERNAL_MAGIC,
            LARGE_BUF_LEAF_MAGIC,
            DELETE_QUEUE_MAGIC,
            ZERO_BLOCK_MAGIC,
            MB_MARKER_CRC,
        ];
        for (i, a) in magics.iter().enumerate() {
            for b in &magics[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }
}
