//! Block-id translation and key placement for multiplexed slices.
//!
//! A database of `n_proxies` logical slices is spread over `n_files`
//! serializer files; each file carries `mod_count` of them. A slice's
//! logical block ids are interleaved into the serializer id space right
//! after the config block.

use xxhash_rust::xxh3::xxh3_64;

use crate::limits::CONFIG_BLOCK_SER_ID;
use crate::BlockId;

/// How many slices live on serializer `this_serializer` when `n_proxies`
/// slices are spread over `n_files` files round-robin.
#[must_use]
pub fn compute_mod_count(this_serializer: u32, n_files: u32, n_proxies: u32) -> u32 {
    n_proxies / n_files + u32::from(this_serializer < n_proxies % n_files)
}

/// Map a slice-logical block id to a serializer block id.
///
/// Slice-local ids interleave with stride `mod_count`, offset by the
/// slice's position on the file, all shifted past the config block.
#[must_use]
pub fn translate_block_id(id: BlockId, mod_count: u32, local_slice_id: u32) -> BlockId {
    id * u64::from(mod_count) + u64::from(local_slice_id) + CONFIG_BLOCK_SER_ID + 1
}

/// The stable hash that assigns a key to one of `n_proxies` slices.
#[must_use]
pub fn key_hash(key: &[u8]) -> u64 {
    xxh3_64(key)
}

/// The global slice id a key belongs to.
#[must_use]
pub fn slice_for_key(key: &[u8], n_proxies: u32) -> u32 {
    #[allow(clippy::cast_possible_truncation)]
    {
        (key_hash(key) % u64::from(n_proxies)) as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mod_count_distributes_all_slices() {
        for n_files in 1..6u32 {
            for n_proxies in n_files..24 {
                let total: u32 = (0..n_files)
                    .map(|s| compute_mod_count(s, n_files, n_proxies))
                    .sum();
                assert_eq!(total, n_proxies, "n_files={n_files} n_proxies={n_proxies}");
            }
        }
    }

    #[test]
    fn translate_is_injective_across_local_slices() {
        // Two slices on one file must never collide.
        let mod_count = 2;
        let a: Vec<BlockId> = (0..8).map(|id| translate_block_id(id, mod_count, 0)).collect();
        let b: Vec<BlockId> = (0..8).map(|id| translate_block_id(id, mod_count, 1)).collect();
        for x in &a {
            assert!(!b.contains(x));
        }
    }

    #[test]
    fn translate_skips_config_block() {
        assert_eq!(translate_block_id(0, 1, 0), CONFIG_BLOCK_SER_ID + 1);
    }

    #[test]
    fn key_hash_is_stable() {
        // The on-disk placement contract: this value may never change.
        assert_eq!(key_hash(b"a"), xxh3_64(b"a"));
        assert_eq!(slice_for_key(b"a", 1), 0);
        let s = slice_for_key(b"widget", 4);
        assert!(s < 4);
        assert_eq!(s, slice_for_key(b"widget", 4));
    }
}
