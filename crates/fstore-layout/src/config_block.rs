//! Multiplexer and cache config block payloads.

use fstore_error::{FsckError, Result};
use fstore_types::magic::{CACHE_CONFIG_MAGIC, MULTIPLEXER_CONFIG_MAGIC};

use crate::{get_u32, get_u64};

/// Serialized size of a multiplexer config payload.
pub const MULTIPLEXER_CONFIG_SIZE: usize = 28;
/// Serialized size of a cache config payload.
pub const CACHE_CONFIG_SIZE: usize = 8;

/// The multiplexer's creation record, stored in serializer block 0 of
/// every data file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MultiplexerConfig {
    /// Database creation time; all files of one database share it.
    pub creation_timestamp: u64,
    /// Number of serializer files the database was created with.
    pub n_files: u32,
    /// Number of logical slices spread across those files.
    pub n_proxies: u32,
    /// This file's position in `[0, n_files)`.
    pub this_serializer: u32,
}

impl MultiplexerConfig {
    /// Parse from a block payload, checking the magic.
    pub fn parse(payload: &[u8]) -> Result<Option<Self>> {
        if payload.len() < MULTIPLEXER_CONFIG_SIZE {
            return Err(FsckError::BufferTooSmall {
                what: "multiplexer config block",
                len: payload.len(),
            });
        }
        if &payload[0..4] != MULTIPLEXER_CONFIG_MAGIC {
            return Ok(None);
        }
        Ok(Some(Self {
            creation_timestamp: get_u64(payload, 8),
            n_files: get_u32(payload, 16),
            n_proxies: get_u32(payload, 20),
            this_serializer: get_u32(payload, 24),
        }))
    }

    /// Write into a zeroed block payload.
    pub fn write(&self, payload: &mut [u8]) {
        payload[0..4].copy_from_slice(MULTIPLEXER_CONFIG_MAGIC);
        payload[8..16].copy_from_slice(&self.creation_timestamp.to_le_bytes());
        payload[16..20].copy_from_slice(&self.n_files.to_le_bytes());
        payload[20..24].copy_from_slice(&self.n_proxies.to_le_bytes());
        payload[24..28].copy_from_slice(&self.this_serializer.to_le_bytes());
    }
}

/// The cache's per-slice config record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheConfig {
    /// How many diff-log blocks follow the cache config block.
    pub n_patch_log_blocks: u32,
}

impl CacheConfig {
    /// Parse from a block payload, checking the magic.
    pub fn parse(payload: &[u8]) -> Result<Option<Self>> {
        if payload.len() < CACHE_CONFIG_SIZE {
            return Err(FsckError::BufferTooSmall {
                what: "cache config block",
                len: payload.len(),
            });
        }
        if &payload[0..4] != CACHE_CONFIG_MAGIC {
            return Ok(None);
        }
        Ok(Some(Self {
            n_patch_log_blocks: get_u32(payload, 4),
        }))
    }

    /// Write into a zeroed block payload.
    pub fn write(&self, payload: &mut [u8]) {
        payload[0..4].copy_from_slice(CACHE_CONFIG_MAGIC);
        payload[4..8].copy_from_slice(&self.n_patch_log_blocks.to_le_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn multiplexer_roundtrip() {
        let cfg = MultiplexerConfig {
            creation_timestamp: 1_700_000_000,
            n_files: 4,
            n_proxies: 16,
            this_serializer: 2,
        };
        let mut payload = vec![0u8; 4080];
        cfg.write(&mut payload);
        assert_eq!(MultiplexerConfig::parse(&payload).unwrap(), Some(cfg));
    }

    #[test]
    fn multiplexer_bad_magic_is_none() {
        let payload = vec![0u8; 4080];
        assert_eq!(MultiplexerConfig::parse(&payload).unwrap(), None);
    }

    #[test]
    fn cache_config_roundtrip() {
        let cfg = CacheConfig {
            n_patch_log_blocks: 32,
        };
        let mut payload = vec![0u8; 4080];
        cfg.write(&mut payload);
        assert_eq!(CacheConfig::parse(&payload).unwrap(), Some(cfg));
    }
}
