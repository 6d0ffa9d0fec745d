//! The static header in device block 0.
//!
//! ```text
//! Offset  Size  Field
//!   0      16   software_name (NUL padded)
//!  16       8   version (NUL padded)
//!  24       4   block_size (u32)
//!  28       8   extent_size (u64)
//! ```
//!
//! The rest of the device block is zero.

use fstore_error::{FsckError, Result};
use fstore_types::magic::{SOFTWARE_NAME, VERSION_STRING};
use fstore_types::{get_display_str, BlockSize};

use crate::{get_u32, get_u64};

/// Byte length of the meaningful prefix of block 0.
pub const STATIC_HEADER_SIZE: usize = 36;

/// The serializer's immutable geometry, recorded once at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StaticConfig {
    /// Size of one serializer block (header included).
    pub block_size: BlockSize,
    /// Size of one allocation extent.
    pub extent_size: u64,
}

/// Raw contents of the static header, before any validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaticHeader {
    /// The software-name field bytes.
    pub software_name: [u8; 16],
    /// The version field bytes.
    pub version: [u8; 8],
    /// The geometry trailer.
    pub config: StaticConfig,
}

impl StaticHeader {
    /// Parse the static header from the first device block.
    pub fn parse(buf: &[u8]) -> Result<Self> {
        if buf.len() < STATIC_HEADER_SIZE {
            return Err(FsckError::BufferTooSmall {
                what: "static header",
                len: buf.len(),
            });
        }
        let mut software_name = [0u8; 16];
        software_name.copy_from_slice(&buf[0..16]);
        let mut version = [0u8; 8];
        version.copy_from_slice(&buf[16..24]);
        Ok(Self {
            software_name,
            version,
            config: StaticConfig {
                block_size: BlockSize::from_ser(get_u32(buf, 24)),
                extent_size: get_u64(buf, 28),
            },
        })
    }

    /// Write the static header into a zeroed device block.
    pub fn write(&self, buf: &mut [u8]) {
        buf[0..16].copy_from_slice(&self.software_name);
        buf[16..24].copy_from_slice(&self.version);
        buf[24..28].copy_from_slice(&self.config.block_size.ser().to_le_bytes());
        buf[28..36].copy_from_slice(&self.config.extent_size.to_le_bytes());
    }

    /// Whether the software-name field matches this engine.
    #[must_use]
    pub fn software_name_ok(&self) -> bool {
        &self.software_name == SOFTWARE_NAME
    }

    /// Whether the version field matches the version this checker
    /// understands.
    #[must_use]
    pub fn version_ok(&self) -> bool {
        &self.version == VERSION_STRING
    }

    /// The version field as printable text.
    #[must_use]
    pub fn version_str(&self) -> String {
        get_display_str(&self.version)
    }

    /// The software-name field as printable text.
    #[must_use]
    pub fn software_name_str(&self) -> String {
        get_display_str(&self.software_name)
    }

    /// A header for a fresh file of the given geometry.
    #[must_use]
    pub fn current(config: StaticConfig) -> Self {
        Self {
            software_name: *SOFTWARE_NAME,
            version: *VERSION_STRING,
            config,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> StaticHeader {
        StaticHeader::current(StaticConfig {
            block_size: BlockSize::from_ser(4096),
            extent_size: 512 * 1024,
        })
    }

    #[test]
    fn roundtrip() {
        let hdr = sample();
        let mut buf = vec![0u8; 512];
        hdr.write(&mut buf);
        let parsed = StaticHeader::parse(&buf).unwrap();
        assert_eq!(parsed, hdr);
        assert!(parsed.software_name_ok());
        assert!(parsed.version_ok());
        assert_eq!(parsed.version_str(), "0.4");
        assert_eq!(parsed.software_name_str(), "FrankenStore");
    }

    #[test]
    fn flipped_name_byte_detected() {
        let hdr = sample();
        let mut buf = vec![0u8; 512];
        hdr.write(&mut buf);
        buf[3] ^= 0x20;
        let parsed = StaticHeader::parse(&buf).unwrap();
        assert!(!parsed.software_name_ok());
        assert!(parsed.version_ok());
    }

    #[test]
    fn truncated_buffer_rejected() {
        assert!(StaticHeader::parse(&[0u8; 20]).is_err());
    }
}
