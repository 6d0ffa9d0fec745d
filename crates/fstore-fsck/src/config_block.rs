//! Multiplexer and cache config block checks.
//!
//! Data files carry the multiplexer config in serializer block 0 plus one
//! cache config block per local slice (all of which must agree). The
//! metadata file has no multiplexer layer; its cache config sits at the
//! fixed logical id directly.

use fstore_layout::config_block::{CacheConfig, MultiplexerConfig};
use fstore_types::limits::{CONFIG_BLOCK_SER_ID, MC_CONFIG_BLOCK_ID};
use fstore_types::multiplexer::{compute_mod_count, translate_block_id};
use fstore_types::BlockId;
use fstore_vfs::CheckFile;
use tracing::debug;

use crate::block_loader::{load_ser_block, BlockLoadError};
use crate::knowledge::FileKnowledge;
use crate::report::{Report, Scope};

/// What went wrong while reading the config blocks.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ConfigBlockErrors {
    /// The multiplexer config block failed to load.
    pub block_open: Option<BlockLoadError>,
    /// The multiplexer config block has the wrong magic.
    pub bad_magic: bool,
    /// A cache config block failed to load.
    pub mc_block_open: Option<BlockLoadError>,
    /// A cache config block has the wrong magic.
    pub mc_bad_magic: bool,
    /// The per-slice cache config blocks disagree.
    pub mc_inconsistent: bool,
}

impl ConfigBlockErrors {
    /// Convert to diagnostics.
    pub fn report(&self, scope: &Scope, out: &mut Report) {
        if let Some(code) = self.block_open {
            out.error(scope.clone(), format!("config block not found: {code}"));
        } else if self.bad_magic {
            out.error(scope.clone(), "config block had bad magic");
        }
        if let Some(code) = self.mc_block_open {
            out.error(
                scope.clone(),
                format!("cache config block not found: {code}"),
            );
        } else if self.mc_bad_magic {
            out.error(scope.clone(), "cache config block had bad magic");
        }
        if self.mc_inconsistent {
            out.error(scope.clone(), "cache config blocks are inconsistent");
        }
    }
}

fn load_mc_config_block(
    file: &dyn CheckFile,
    knog: &FileKnowledge,
    ser_id: BlockId,
    errs: &mut ConfigBlockErrors,
) -> Option<CacheConfig> {
    let block = match load_ser_block(file, knog, ser_id, None) {
        Ok(block) => block,
        Err(code) => {
            errs.mc_block_open = Some(code);
            return None;
        }
    };
    match CacheConfig::parse(&block.payload) {
        Ok(Some(cfg)) => Some(cfg),
        _ => {
            errs.mc_bad_magic = true;
            None
        }
    }
}

/// Read the multiplexer config block and every local slice's cache
/// config block.
pub fn check_multiplexed_config_block(
    file: &dyn CheckFile,
    knog: &mut FileKnowledge,
    errs: &mut ConfigBlockErrors,
) -> bool {
    let block = match load_ser_block(file, knog, CONFIG_BLOCK_SER_ID, None) {
        Ok(block) => block,
        Err(code) => {
            errs.block_open = Some(code);
            return false;
        }
    };
    let cfg = match MultiplexerConfig::parse(&block.payload) {
        Ok(Some(cfg)) => cfg,
        _ => {
            errs.bad_magic = true;
            return false;
        }
    };
    knog.config_block.learn(cfg);

    let mod_count = compute_mod_count(cfg.this_serializer, cfg.n_files, cfg.n_proxies);
    debug!(
        file = %knog.filename,
        mod_count = mod_count,
        n_files = cfg.n_files,
        n_proxies = cfg.n_proxies,
        this_serializer = cfg.this_serializer,
        "read multiplexer config"
    );
    let mut first: Option<CacheConfig> = None;
    for slice_id in 0..mod_count {
        let ser_id = translate_block_id(MC_CONFIG_BLOCK_ID, mod_count, slice_id);
        let Some(mc) = load_mc_config_block(file, knog, ser_id, errs) else {
            return false;
        };
        match first {
            None => first = Some(mc),
            Some(f) if f != mc => {
                errs.mc_inconsistent = true;
                return false;
            }
            Some(_) => {}
        }
    }
    if let Some(mc) = first {
        knog.mc_config_block.learn(mc);
    }
    true
}

/// Read the cache config block of the metadata file (no multiplexer).
pub fn check_raw_config_block(
    file: &dyn CheckFile,
    knog: &mut FileKnowledge,
    errs: &mut ConfigBlockErrors,
) -> bool {
    let Some(mc) = load_mc_config_block(file, knog, MC_CONFIG_BLOCK_ID, errs) else {
        return false;
    };
    knog.mc_config_block.learn(mc);
    true
}

#[cfg(test)]
mod tests {
    use fstore_layout::block::{payload_mut, BlockHeader};
    use fstore_layout::metablock::empty_metablock;
    use fstore_layout::static_header::StaticConfig;
    use fstore_types::{BlockSize, FlaggedOffset};
    use fstore_vfs::MemoryFile;

    use super::*;

    const BS: u32 = 512;

    struct Builder {
        bytes: Vec<u8>,
        knog: FileKnowledge,
    }

    impl Builder {
        fn new(n_blocks: usize) -> Self {
            let mut knog = FileKnowledge::new("t");
            knog.static_config.learn(StaticConfig {
                block_size: BlockSize::from_ser(BS),
                extent_size: 8192,
            });
            knog.metablock.learn(empty_metablock(10));
            Self {
                bytes: vec![0u8; n_blocks * BS as usize],
                knog,
            }
        }

        fn put_block(&mut self, ser_id: u64, fill: impl FnOnce(&mut [u8])) {
            let off = ser_id * u64::from(BS);
            let block = &mut self.bytes[off as usize..off as usize + BS as usize];
            BlockHeader {
                block_id: ser_id,
                transaction_id: 5,
            }
            .write(block);
            fill(payload_mut(block));
            self.knog.publish_offset(ser_id, FlaggedOffset::Value(off));
        }

        fn file(&self) -> MemoryFile {
            MemoryFile::new(self.bytes.clone())
        }
    }

    fn mux_config(n_proxies: u32) -> MultiplexerConfig {
        MultiplexerConfig {
            creation_timestamp: 7,
            n_files: 1,
            n_proxies,
            this_serializer: 0,
        }
    }

    #[test]
    fn multiplexed_happy_path_two_slices() {
        let mut b = Builder::new(8);
        b.put_block(0, |p| mux_config(2).write(p));
        // mod_count 2: cache config blocks at ser ids 3 and 4.
        for ser in [3u64, 4] {
            b.put_block(ser, |p| {
                CacheConfig {
                    n_patch_log_blocks: 8,
                }
                .write(p);
            });
        }
        let file = b.file();
        let mut errs = ConfigBlockErrors::default();
        assert!(check_multiplexed_config_block(&file, &mut b.knog, &mut errs));
        assert_eq!(errs, ConfigBlockErrors::default());
        assert_eq!(b.knog.config_block.expect().n_proxies, 2);
        assert_eq!(b.knog.mc_config_block.expect().n_patch_log_blocks, 8);
    }

    #[test]
    fn inconsistent_cache_configs_flagged() {
        let mut b = Builder::new(8);
        b.put_block(0, |p| mux_config(2).write(p));
        b.put_block(3, |p| {
            CacheConfig {
                n_patch_log_blocks: 8,
            }
            .write(p);
        });
        b.put_block(4, |p| {
            CacheConfig {
                n_patch_log_blocks: 9,
            }
            .write(p);
        });
        let file = b.file();
        let mut errs = ConfigBlockErrors::default();
        assert!(!check_multiplexed_config_block(&file, &mut b.knog, &mut errs));
        assert!(errs.mc_inconsistent);
    }

    #[test]
    fn missing_config_block_reports_open_code() {
        let b = Builder::new(8);
        let file = b.file();
        let mut knog = b.knog;
        let mut errs = ConfigBlockErrors::default();
        assert!(!check_multiplexed_config_block(&file, &mut knog, &mut errs));
        assert_eq!(errs.block_open, Some(BlockLoadError::NoBlock));
    }

    #[test]
    fn wrong_magic_reported() {
        let mut b = Builder::new(8);
        b.put_block(0, |_| {});
        let file = b.file();
        let mut errs = ConfigBlockErrors::default();
        assert!(!check_multiplexed_config_block(&file, &mut b.knog, &mut errs));
        assert!(errs.bad_magic);
    }

    #[test]
    fn raw_flavor_reads_fixed_id() {
        let mut b = Builder::new(4);
        b.put_block(MC_CONFIG_BLOCK_ID, |p| {
            CacheConfig {
                n_patch_log_blocks: 4,
            }
            .write(p);
        });
        let file = b.file();
        let mut errs = ConfigBlockErrors::default();
        assert!(check_raw_config_block(&file, &mut b.knog, &mut errs));
        assert_eq!(b.knog.mc_config_block.expect().n_patch_log_blocks, 4);
    }
}
