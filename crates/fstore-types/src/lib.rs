//! Core identifier and size types shared by every FrankenStore fsck crate.
//!
//! Block ids are raw `u64` indices into a serializer's block-info space;
//! the on-disk graph is a DAG keyed by block id, so nothing here owns
//! anything — these are plain values.

pub mod limits;
pub mod magic;
pub mod multiplexer;

use std::fmt;

use limits::BLOCK_HEADER_SIZE;

/// A serializer (or logical, pre-translation) block id.
///
/// The top of the id space is bounded by [`limits::MAX_BLOCK_ID`];
/// [`NULL_BLOCK_ID`] is the reserved "no block" sentinel.
pub type BlockId = u64;

/// Reserved id meaning "no block here" (tombstoned LBA entries, empty
/// tree roots).
pub const NULL_BLOCK_ID: BlockId = u64::MAX;

/// A serializer write epoch. Strictly monotonic; carried in every block
/// header and in the metablock.
pub type TransactionId = u64;

// ---------------------------------------------------------------------------
// Block size
// ---------------------------------------------------------------------------

/// The serializer's block size, as recorded in the static header.
///
/// Two views: [`BlockSize::ser`] is the raw on-disk size of one block
/// (header included), [`BlockSize::payload`] is the number of bytes the
/// cache layer sees (everything after the per-block header).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockSize(u32);

impl BlockSize {
    /// Wrap a raw serializer block size. No validation happens here; the
    /// static-header checker owns the sanity rules.
    #[must_use]
    pub const fn from_ser(raw: u32) -> Self {
        Self(raw)
    }

    /// The raw on-disk size of one block.
    #[inline]
    #[must_use]
    pub const fn ser(self) -> u32 {
        self.0
    }

    /// The usable payload size (raw size minus the per-block header).
    #[inline]
    #[must_use]
    pub const fn payload(self) -> u32 {
        self.0 - BLOCK_HEADER_SIZE as u32
    }
}

impl fmt::Display for BlockSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Flagged offsets
// ---------------------------------------------------------------------------

/// A block's location as recorded by the LBA index.
///
/// Wire encoding is a single `u64`: all-ones means [`FlaggedOffset::Unused`]
/// (padding / never written), a set top bit marks a deleted block whose
/// zeroed body still sits at the low 63 bits, anything else is a live byte
/// offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FlaggedOffset {
    /// No LBA entry has ever named this block.
    #[default]
    Unused,
    /// The block was deleted; the offset points at its zeroed body.
    Delete(u64),
    /// A live block at this byte offset.
    Value(u64),
}

const DELETE_FLAG: u64 = 1 << 63;

impl FlaggedOffset {
    /// Decode the wire representation.
    #[must_use]
    pub const fn from_wire(raw: u64) -> Self {
        if raw == u64::MAX {
            Self::Unused
        } else if raw & DELETE_FLAG != 0 {
            Self::Delete(raw & !DELETE_FLAG)
        } else {
            Self::Value(raw)
        }
    }

    /// Encode back to the wire representation.
    #[must_use]
    pub const fn to_wire(self) -> u64 {
        match self {
            Self::Unused => u64::MAX,
            Self::Delete(off) => off | DELETE_FLAG,
            Self::Value(off) => off,
        }
    }

    /// Whether there is a readable block body behind this entry (live or
    /// deleted-but-still-on-disk).
    #[must_use]
    pub const fn has_value(self) -> bool {
        matches!(self, Self::Delete(_) | Self::Value(_))
    }

    /// Whether this entry is a delete marker.
    #[must_use]
    pub const fn is_delete(self) -> bool {
        matches!(self, Self::Delete(_))
    }

    /// The byte offset, if any body exists.
    #[must_use]
    pub const fn offset(self) -> Option<u64> {
        match self {
            Self::Unused => None,
            Self::Delete(off) | Self::Value(off) => Some(off),
        }
    }
}

/// Render a NUL-padded fixed-width byte field as printable text.
///
/// Non-printable bytes come out as `.` so corrupt fields still render
/// safely in diagnostics.
#[must_use]
pub fn get_display_str(field: &[u8]) -> String {
    let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
    field[..end]
        .iter()
        .map(|&b| {
            if b.is_ascii_graphic() || b == b' ' {
                b as char
            } else {
                '.'
            }
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Learned values
// ---------------------------------------------------------------------------

/// A value the checker discovers exactly once while scanning a file.
///
/// Assigning twice is a checker bug, not file corruption, so `learn`
/// panics on a second assignment.
#[derive(Debug, Clone)]
pub struct Learned<T> {
    value: Option<T>,
}

impl<T> Default for Learned<T> {
    fn default() -> Self {
        Self { value: None }
    }
}

impl<T> Learned<T> {
    /// Record the value. Panics if a value was already learned.
    pub fn learn(&mut self, value: T) {
        assert!(self.value.is_none(), "value already learned");
        self.value = Some(value);
    }

    /// The value, if learned.
    pub fn get(&self) -> Option<&T> {
        self.value.as_ref()
    }

    /// Whether a value has been learned.
    pub fn is_known(&self) -> bool {
        self.value.is_some()
    }

    /// The value. Panics if nothing was learned; callers use this only on
    /// phases that are sequenced after the learning phase.
    pub fn expect(&self) -> &T {
        self.value.as_ref().expect("value not learned yet")
    }
}
