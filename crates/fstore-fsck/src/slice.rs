//! Per-slice checking context.
//!
//! A slice context wraps one file plus one slice's view of it: how
//! logical block ids translate to serializer ids, and which keys belong
//! here. The metadata file's single slice uses the identity translation
//! and accepts every key; data slices go through the multiplexer.

use std::collections::BTreeMap;

use fstore_layout::patch::Patch;
use fstore_types::multiplexer::{compute_mod_count, slice_for_key, translate_block_id};
use fstore_types::{BlockId, BlockSize};
use fstore_vfs::CheckFile;

use crate::block_loader::{load_ser_block, BlockLoadError, LoadedBlock};
use crate::knowledge::FileKnowledge;

enum SliceKind {
    Raw,
    Multiplexed {
        global_slice_id: u32,
        local_slice_id: u32,
        mod_count: u32,
        n_proxies: u32,
    },
}

/// One slice's view of one file.
pub struct SliceCtx<'a> {
    /// The file being checked.
    pub file: &'a dyn CheckFile,
    /// The file's accumulated knowledge.
    pub knog: &'a FileKnowledge,
    /// Patches loaded from the diff log, keyed by logical target id.
    pub patch_map: BTreeMap<BlockId, Vec<Patch>>,
    /// When set, loads skip patch replay.
    pub ignore_diff_log: bool,
    kind: SliceKind,
}

impl<'a> SliceCtx<'a> {
    /// Context for the metadata file's lone slice.
    pub fn raw(file: &'a dyn CheckFile, knog: &'a FileKnowledge, ignore_diff_log: bool) -> Self {
        Self {
            file,
            knog,
            patch_map: BTreeMap::new(),
            ignore_diff_log,
            kind: SliceKind::Raw,
        }
    }

    /// Context for one multiplexed data slice. The multiplexer geometry
    /// comes from the file's learned config block.
    pub fn multiplexed(
        file: &'a dyn CheckFile,
        knog: &'a FileKnowledge,
        global_slice_id: u32,
        ignore_diff_log: bool,
    ) -> Self {
        let cfg = knog.config_block.expect();
        Self {
            file,
            knog,
            patch_map: BTreeMap::new(),
            ignore_diff_log,
            kind: SliceKind::Multiplexed {
                global_slice_id,
                local_slice_id: global_slice_id / cfg.n_files,
                mod_count: compute_mod_count(cfg.this_serializer, cfg.n_files, cfg.n_proxies),
                n_proxies: cfg.n_proxies,
            },
        }
    }

    /// The file's block size.
    #[must_use]
    pub fn block_size(&self) -> BlockSize {
        self.knog.block_size()
    }

    /// Map a slice-logical block id to this file's serializer id space.
    #[must_use]
    pub fn to_ser_block_id(&self, id: BlockId) -> BlockId {
        match self.kind {
            SliceKind::Raw => id,
            SliceKind::Multiplexed {
                mod_count,
                local_slice_id,
                ..
            } => translate_block_id(id, mod_count, local_slice_id),
        }
    }

    /// Whether a key is allowed to live on this slice.
    #[must_use]
    pub fn is_valid_key(&self, key: &[u8]) -> bool {
        match self.kind {
            SliceKind::Raw => true,
            SliceKind::Multiplexed {
                global_slice_id,
                n_proxies,
                ..
            } => slice_for_key(key, n_proxies) == global_slice_id,
        }
    }

    /// Load a logical block through the translation, replaying its
    /// pending patches.
    pub fn load(&self, logical_id: BlockId) -> Result<LoadedBlock, BlockLoadError> {
        let patches = if self.ignore_diff_log {
            None
        } else {
            self.patch_map.get(&logical_id).map(Vec::as_slice)
        };
        load_ser_block(self.file, self.knog, self.to_ser_block_id(logical_id), patches)
    }
}

#[cfg(test)]
mod tests {
    use fstore_layout::config_block::MultiplexerConfig;
    use fstore_types::multiplexer::slice_for_key;
    use fstore_vfs::MemoryFile;

    use super::*;

    fn knog_with_config(n_files: u32, n_proxies: u32, this_serializer: u32) -> FileKnowledge {
        let mut knog = FileKnowledge::new("t");
        knog.config_block.learn(MultiplexerConfig {
            creation_timestamp: 1,
            n_files,
            n_proxies,
            this_serializer,
        });
        knog
    }

    #[test]
    fn raw_context_is_identity() {
        let file = MemoryFile::new(vec![]);
        let knog = FileKnowledge::new("t");
        let cx = SliceCtx::raw(&file, &knog, false);
        assert_eq!(cx.to_ser_block_id(0), 0);
        assert_eq!(cx.to_ser_block_id(17), 17);
        assert!(cx.is_valid_key(b"anything"));
    }

    #[test]
    fn multiplexed_translation_single_slice() {
        let file = MemoryFile::new(vec![]);
        let knog = knog_with_config(1, 1, 0);
        let cx = SliceCtx::multiplexed(&file, &knog, 0, false);
        // mod_count 1, local slice 0: logical ids shift past the config
        // block.
        assert_eq!(cx.to_ser_block_id(0), 1);
        assert_eq!(cx.to_ser_block_id(5), 6);
        assert!(cx.is_valid_key(b"k"));
    }

    #[test]
    fn multiplexed_key_routing() {
        let file = MemoryFile::new(vec![]);
        let knog = knog_with_config(1, 4, 0);
        let key = b"routed";
        let home = slice_for_key(key, 4);
        for slice in 0..4 {
            let cx = SliceCtx::multiplexed(&file, &knog, slice, false);
            assert_eq!(cx.is_valid_key(key), slice == home);
        }
    }

    #[test]
    fn two_slices_interleave() {
        let file = MemoryFile::new(vec![]);
        let knog = knog_with_config(1, 2, 0);
        let a = SliceCtx::multiplexed(&file, &knog, 0, false);
        let b = SliceCtx::multiplexed(&file, &knog, 1, false);
        assert_eq!(a.to_ser_block_id(0), 1);
        assert_eq!(b.to_ser_block_id(0), 2);
        assert_eq!(a.to_ser_block_id(1), 3);
        assert_eq!(b.to_ser_block_id(1), 4);
    }
}
