//! Assembles well-formed (and deliberately damaged) FrankenStore files
//! in memory, for exercising the checker end to end.
//!
//! The builder lays a file out the way the engine would: static header
//! and metablock ring in extent 0, serializer blocks packed from extent 1
//! upward, one LBA extent per shard after the data, everything padded to
//! a whole number of extents. Logical ids inside a slice follow the
//! engine's fixed plan — superblock, cache config, diff-log blocks,
//! delete queue, root, then anything extra — which [`StoreBuilder::slice_plan`]
//! exposes so tests can aim corruption at a specific block.

use std::collections::BTreeMap;

use fstore_layout::block::{payload_mut, BlockHeader};
use fstore_layout::config_block::{CacheConfig, MultiplexerConfig};
use fstore_layout::lba::{write_extent_header, LbaEntry};
use fstore_layout::metablock::{empty_metablock, write_slot, LbaShardRecord, Metablock};
use fstore_layout::node::{
    assemble_node, encode_large_value, encode_leaf_pair, encode_small_value, BtreeSuperblock,
    NodeKind,
};
use fstore_layout::patch::Patch;
use fstore_layout::static_header::{StaticConfig, StaticHeader};
use fstore_layout::{delete_queue, large_buf};
use fstore_types::limits::{ceil_aligned, DEVICE_BLOCK_SIZE, LBA_SHARD_FACTOR};
use fstore_types::magic::{LOG_BLOCK_MAGIC, ZERO_BLOCK_MAGIC};
use fstore_types::multiplexer::{compute_mod_count, slice_for_key, translate_block_id};
use fstore_types::{BlockId, BlockSize, FlaggedOffset, NULL_BLOCK_ID};

/// The transaction id stamped on every synthetic block.
pub const BUILD_TRANSACTION_ID: u64 = 2;

/// One finished file image.
#[derive(Debug, Clone)]
pub struct StoreFile {
    /// Display name ("data_0", "data_1", … or "metadata").
    pub name: String,
    /// The raw image.
    pub bytes: Vec<u8>,
}

/// How a value should be materialized.
#[derive(Debug, Clone)]
enum ValueSpec {
    Small(Vec<u8>),
    Large { len: usize },
    Raw {
        value_image_for: fn(&[BlockId]) -> Vec<u8>,
        segments: Vec<Vec<u8>>,
    },
}

/// The logical-id plan of one slice, as the builder will lay it out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlicePlan {
    /// Logical id of the B-tree superblock.
    pub superblock: BlockId,
    /// Logical id of the cache config block.
    pub cache_config: BlockId,
    /// Logical ids of the diff-log blocks.
    pub log_blocks: std::ops::Range<BlockId>,
    /// Logical id of the delete-queue block.
    pub delete_queue: BlockId,
    /// Logical id of the root node, when the slice has keys.
    pub root: Option<BlockId>,
    /// First logical id handed to segments, orphans and deleted blocks.
    pub extras_start: BlockId,
}

/// Builds a whole store: `n_files` data files and optionally a metadata
/// file, all sharing one geometry.
#[derive(Debug)]
pub struct StoreBuilder {
    /// Serializer block size.
    pub block_size: u32,
    /// Extent size.
    pub extent_size: u64,
    /// Number of data files.
    pub n_files: u32,
    /// Number of logical slices.
    pub n_proxies: u32,
    /// Creation timestamp shared by every file.
    pub creation_timestamp: u64,
    /// Diff-log blocks per slice.
    pub n_patch_log_blocks: u32,
    /// Metablock ring slots to write, as `(ring index, version,
    /// transaction id override)`. The default single slot carries
    /// [`BUILD_TRANSACTION_ID`].
    pub metablock_slots: Vec<(usize, u64, Option<u64>)>,
    /// Applied to every file's metablock just before it is written (the
    /// CRC is computed afterwards, so tweaked rings still validate).
    pub metablock_tweak: Option<fn(&mut Metablock)>,
    entries: BTreeMap<Vec<u8>, ValueSpec>,
    patches: Vec<Patch>,
    orphan_payloads: Vec<Vec<u8>>,
    deleted_blocks: usize,
}

impl Default for StoreBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl StoreBuilder {
    /// A single-file, single-slice store with 4 KiB blocks and 512 KiB
    /// extents.
    #[must_use]
    pub fn new() -> Self {
        Self {
            block_size: 4096,
            extent_size: 512 * 1024,
            n_files: 1,
            n_proxies: 1,
            creation_timestamp: 1_700_000_000,
            n_patch_log_blocks: 4,
            metablock_slots: vec![(0, 1, None)],
            metablock_tweak: None,
            entries: BTreeMap::new(),
            patches: Vec::new(),
            orphan_payloads: Vec::new(),
            deleted_blocks: 0,
        }
    }

    /// Insert a small in-node value.
    pub fn insert(&mut self, key: &[u8], value: &[u8]) -> &mut Self {
        self.entries
            .insert(key.to_vec(), ValueSpec::Small(value.to_vec()));
        self
    }

    /// Insert a large value of `len` deterministic bytes, stored as a
    /// depth-one large buffer.
    pub fn insert_large(&mut self, key: &[u8], len: usize) -> &mut Self {
        assert!(len > 250, "a large value must exceed the in-node limit");
        self.entries.insert(key.to_vec(), ValueSpec::Large { len });
        self
    }

    /// Insert a hand-built value. `value_image_for` receives the logical
    /// ids allocated for `segments` (which become slice blocks verbatim)
    /// and returns the full value image (flags, size, body).
    pub fn insert_raw_value(
        &mut self,
        key: &[u8],
        value_image_for: fn(&[BlockId]) -> Vec<u8>,
        segments: Vec<Vec<u8>>,
    ) -> &mut Self {
        self.entries.insert(
            key.to_vec(),
            ValueSpec::Raw {
                value_image_for,
                segments,
            },
        );
        self
    }

    /// Add a patch to the first diff-log block of the slice owning its
    /// target.
    pub fn add_patch(&mut self, patch: Patch) -> &mut Self {
        self.patches.push(patch);
        self
    }

    /// Allocate a published block on slice 0 that nothing references.
    pub fn add_orphan_block(&mut self, payload: Vec<u8>) -> &mut Self {
        self.orphan_payloads.push(payload);
        self
    }

    /// Allocate a deleted (zeroed) block on slice 0.
    pub fn add_deleted_block(&mut self) -> &mut Self {
        self.deleted_blocks += 1;
        self
    }

    fn block_size_t(&self) -> BlockSize {
        BlockSize::from_ser(self.block_size)
    }

    fn payload_len(&self) -> usize {
        self.block_size_t().payload() as usize
    }

    /// The keys routed to one global slice, in order.
    fn slice_entries(&self, global_slice: u32) -> Vec<(&[u8], &ValueSpec)> {
        self.entries
            .iter()
            .filter(|(k, _)| slice_for_key(k, self.n_proxies) == global_slice)
            .map(|(k, v)| (k.as_slice(), v))
            .collect()
    }

    /// The logical-id plan for one global slice.
    #[must_use]
    pub fn slice_plan(&self, global_slice: u32) -> SlicePlan {
        let logs = 2..2 + u64::from(self.n_patch_log_blocks);
        let delete_queue = logs.end;
        let has_root = !self.slice_entries(global_slice).is_empty();
        let root = has_root.then_some(delete_queue + 1);
        SlicePlan {
            superblock: 0,
            cache_config: 1,
            log_blocks: logs,
            delete_queue,
            root,
            extras_start: delete_queue + 1 + u64::from(has_root),
        }
    }

    /// Build every data file.
    #[must_use]
    pub fn build(&self) -> Vec<StoreFile> {
        (0..self.n_files)
            .map(|f| StoreFile {
                name: format!("data_{f}"),
                bytes: self.build_data_file(f),
            })
            .collect()
    }

    /// Build a standalone metadata file (identity translation, no
    /// multiplexer config block).
    #[must_use]
    pub fn build_metadata(&self) -> StoreFile {
        let mut blocks: BTreeMap<BlockId, BlockBody> = BTreeMap::new();
        // The metadata file is its own single slice at identity ids.
        self.populate_slice(&mut blocks, None, 0);
        StoreFile {
            name: "metadata".to_owned(),
            bytes: self.lay_out(blocks),
        }
    }

    fn build_data_file(&self, this_serializer: u32) -> Vec<u8> {
        let mod_count = compute_mod_count(this_serializer, self.n_files, self.n_proxies);
        let mut blocks: BTreeMap<BlockId, BlockBody> = BTreeMap::new();

        let mut config_payload = vec![0u8; self.payload_len()];
        MultiplexerConfig {
            creation_timestamp: self.creation_timestamp,
            n_files: self.n_files,
            n_proxies: self.n_proxies,
            this_serializer,
        }
        .write(&mut config_payload);
        blocks.insert(0, BlockBody::Live(config_payload));

        for local_slice in 0..mod_count {
            let global_slice = local_slice * self.n_files + this_serializer;
            self.populate_slice(
                &mut blocks,
                Some((mod_count, local_slice)),
                global_slice,
            );
        }

        self.lay_out(blocks)
    }

    /// Fill in one slice's blocks. `translation` is `None` for the
    /// identity (metadata) layout.
    fn populate_slice(
        &self,
        blocks: &mut BTreeMap<BlockId, BlockBody>,
        translation: Option<(u32, u32)>,
        global_slice: u32,
    ) {
        let to_ser = |logical: BlockId| match translation {
            None => logical,
            Some((mod_count, local_slice)) => {
                translate_block_id(logical, mod_count, local_slice)
            }
        };
        let plan = self.slice_plan(global_slice);
        let payload_len = self.payload_len();

        // Cache config.
        let mut mc = vec![0u8; payload_len];
        CacheConfig {
            n_patch_log_blocks: self.n_patch_log_blocks,
        }
        .write(&mut mc);
        blocks.insert(to_ser(plan.cache_config), BlockBody::Live(mc));

        // Diff-log blocks; patches land in the first one of slice 0.
        for (i, logical) in plan.log_blocks.clone().enumerate() {
            let mut log = vec![0u8; payload_len];
            log[..6].copy_from_slice(LOG_BLOCK_MAGIC);
            if i == 0 && global_slice == 0 && translation.is_some() {
                let mut image = Vec::new();
                for patch in &self.patches {
                    patch.write_to(&mut image);
                }
                assert!(6 + image.len() < payload_len, "patches overflow log block");
                log[6..6 + image.len()].copy_from_slice(&image);
            }
            blocks.insert(to_ser(logical), BlockBody::Live(log));
        }

        // Delete queue with empty buffers.
        let mut dq = vec![0u8; payload_len];
        let empty_ref = large_buf::LargeBufRef {
            offset: 0,
            size: 0,
            block_ids: vec![],
        }
        .to_bytes();
        delete_queue::write_delete_queue(&mut dq, 0, &empty_ref, &empty_ref);
        blocks.insert(to_ser(plan.delete_queue), BlockBody::Live(dq));

        // Leaf root holding every entry of the slice, extras after it.
        let mut next_extra = plan.extras_start;
        let entries = self.slice_entries(global_slice);
        if let Some(root) = plan.root {
            let mut pairs = Vec::new();
            for (key, spec) in &entries {
                let value_image = match spec {
                    ValueSpec::Small(data) => encode_small_value(data),
                    ValueSpec::Large { len } => {
                        let (ref_bytes, segments) = self.build_large_buf(key, *len);
                        let ids: Vec<BlockId> = segments
                            .iter()
                            .map(|_| {
                                let id = next_extra;
                                next_extra += 1;
                                id
                            })
                            .collect();
                        for (id, payload) in ids.iter().zip(segments) {
                            blocks.insert(to_ser(*id), BlockBody::Live(payload));
                        }
                        let mut lbref = large_buf::LargeBufRef::parse(&ref_bytes).unwrap();
                        lbref.block_ids = ids;
                        encode_large_value(&lbref.to_bytes())
                    }
                    ValueSpec::Raw {
                        value_image_for,
                        segments,
                    } => {
                        let ids: Vec<BlockId> = segments
                            .iter()
                            .map(|_| {
                                let id = next_extra;
                                next_extra += 1;
                                id
                            })
                            .collect();
                        for (id, payload) in ids.iter().zip(segments.iter()) {
                            blocks.insert(to_ser(*id), BlockBody::Live(payload.clone()));
                        }
                        value_image_for(&ids)
                    }
                };
                pairs.push(encode_leaf_pair(key, &value_image));
            }
            blocks.insert(
                to_ser(root),
                BlockBody::Live(assemble_node(payload_len, NodeKind::Leaf, &pairs)),
            );
        }

        // Orphans and deleted blocks (slice 0 of the data files only).
        if global_slice == 0 && translation.is_some() {
            for payload in &self.orphan_payloads {
                let mut body = vec![0u8; payload_len];
                body[..payload.len()].copy_from_slice(payload);
                blocks.insert(to_ser(next_extra), BlockBody::Live(body));
                next_extra += 1;
            }
            for _ in 0..self.deleted_blocks {
                blocks.insert(to_ser(next_extra), BlockBody::Deleted);
                next_extra += 1;
            }
        }

        // Superblock last: it names the other ids.
        let mut sb = vec![0u8; payload_len];
        BtreeSuperblock {
            root_block: plan.root.unwrap_or(NULL_BLOCK_ID),
            delete_queue_block: plan.delete_queue,
        }
        .write(&mut sb);
        blocks.insert(to_ser(plan.superblock), BlockBody::Live(sb));
    }

    /// A depth-one large buffer: the reference (with placeholder ids)
    /// plus the leaf segment payloads.
    fn build_large_buf(&self, key: &[u8], len: usize) -> (Vec<u8>, Vec<Vec<u8>>) {
        let bs = self.block_size_t();
        let cap = large_buf::leaf_capacity(bs) as usize;
        let n_segments = len.div_ceil(cap);
        assert!(
            large_buf::compute_num_sublevels(bs, len as u64, fstore_types::limits::LBREF_LIMIT)
                == 1,
            "builder only materializes depth-one large buffers"
        );

        let data: Vec<u8> = key.iter().copied().cycle().take(len).collect();
        let segments: Vec<Vec<u8>> = data
            .chunks(cap)
            .map(|chunk| large_buf::write_leaf_segment(self.payload_len(), chunk))
            .collect();
        assert_eq!(segments.len(), n_segments);

        let lbref = large_buf::LargeBufRef {
            offset: 0,
            size: len as i64,
            block_ids: vec![0; n_segments],
        };
        (lbref.to_bytes(), segments)
    }

    /// Place blocks, build the LBA, write header and metablocks.
    fn lay_out(&self, blocks: BTreeMap<BlockId, BlockBody>) -> Vec<u8> {
        let bs = u64::from(self.block_size);
        let data_start = self.extent_size;

        // Assign offsets in ser-id order.
        let mut offsets: BTreeMap<BlockId, u64> = BTreeMap::new();
        let mut cursor = data_start;
        for &id in blocks.keys() {
            offsets.insert(id, cursor);
            cursor += bs;
        }

        // One LBA extent per shard that has entries.
        let mut shard_entries: Vec<Vec<LbaEntry>> =
            vec![Vec::new(); LBA_SHARD_FACTOR as usize];
        for (&id, body) in &blocks {
            let offset = offsets[&id];
            let flagged = match body {
                BlockBody::Live(_) => FlaggedOffset::Value(offset),
                BlockBody::Deleted => FlaggedOffset::Delete(offset),
            };
            shard_entries[(id % LBA_SHARD_FACTOR) as usize].push(LbaEntry {
                block_id: id,
                offset: flagged,
            });
        }

        let lba_start = ceil_aligned(cursor, self.extent_size);
        let mut shard_records = [LbaShardRecord {
            last_extent_offset: -1,
            superblock_offset: -1,
            last_extent_entry_count: 0,
            superblock_entry_count: 0,
        }; LBA_SHARD_FACTOR as usize];
        let mut lba_cursor = lba_start;
        for (shard, entries) in shard_entries.iter().enumerate() {
            if entries.is_empty() {
                continue;
            }
            shard_records[shard] = LbaShardRecord {
                last_extent_offset: lba_cursor as i64,
                superblock_offset: -1,
                last_extent_entry_count: entries.len() as u32,
                superblock_entry_count: 0,
            };
            lba_cursor += self.extent_size;
        }

        let file_size = ceil_aligned(lba_cursor, self.extent_size).max(2 * self.extent_size);
        let mut bytes = vec![0u8; file_size as usize];

        // Static header.
        StaticHeader::current(StaticConfig {
            block_size: self.block_size_t(),
            extent_size: self.extent_size,
        })
        .write(&mut bytes);

        // Metablock ring.
        for &(ring_index, version, txn) in &self.metablock_slots {
            let mut metablock = empty_metablock(txn.unwrap_or(BUILD_TRANSACTION_ID));
            metablock.shards = shard_records;
            if let Some(tweak) = self.metablock_tweak {
                tweak(&mut metablock);
            }
            let off = (ring_index as u64 + 1) * DEVICE_BLOCK_SIZE;
            write_slot(
                &mut bytes[off as usize..(off + DEVICE_BLOCK_SIZE) as usize],
                version,
                &metablock,
            );
        }

        // Blocks.
        for (&id, body) in &blocks {
            let off = offsets[&id] as usize;
            let block = &mut bytes[off..off + bs as usize];
            BlockHeader {
                block_id: id,
                transaction_id: BUILD_TRANSACTION_ID,
            }
            .write(block);
            match body {
                BlockBody::Live(payload) => {
                    payload_mut(block).copy_from_slice(payload);
                }
                BlockBody::Deleted => {
                    payload_mut(block)[..4].copy_from_slice(ZERO_BLOCK_MAGIC);
                }
            }
        }

        // LBA extents.
        let mut lba_cursor = lba_start;
        for entries in &shard_entries {
            if entries.is_empty() {
                continue;
            }
            let extent =
                &mut bytes[lba_cursor as usize..(lba_cursor + self.extent_size) as usize];
            write_extent_header(extent);
            for (i, entry) in entries.iter().enumerate() {
                entry.write_at(extent, i);
            }
            lba_cursor += self.extent_size;
        }

        bytes
    }
}

enum BlockBody {
    Live(Vec<u8>),
    Deleted,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plan_is_stable() {
        let mut b = StoreBuilder::new();
        b.n_patch_log_blocks = 4;
        b.insert(b"a", b"1");
        let plan = b.slice_plan(0);
        assert_eq!(plan.superblock, 0);
        assert_eq!(plan.cache_config, 1);
        assert_eq!(plan.log_blocks, 2..6);
        assert_eq!(plan.delete_queue, 6);
        assert_eq!(plan.root, Some(7));
        assert_eq!(plan.extras_start, 8);
    }

    #[test]
    fn empty_slice_has_no_root() {
        let b = StoreBuilder::new();
        let plan = b.slice_plan(0);
        assert_eq!(plan.root, None);
        assert_eq!(plan.extras_start, plan.delete_queue + 1);
    }

    #[test]
    fn file_is_extent_padded_and_headed() {
        let mut b = StoreBuilder::new();
        b.insert(b"a", b"1");
        let files = b.build();
        assert_eq!(files.len(), 1);
        let bytes = &files[0].bytes;
        assert_eq!(bytes.len() as u64 % b.extent_size, 0);
        assert_eq!(&bytes[0..12], b"FrankenStore");
    }

    #[test]
    fn two_files_share_geometry() {
        let mut b = StoreBuilder::new();
        b.n_files = 2;
        b.n_proxies = 2;
        b.insert(b"a", b"1");
        let files = b.build();
        assert_eq!(files.len(), 2);
        assert_eq!(files[0].name, "data_0");
        assert_eq!(files[1].name, "data_1");
    }
}
