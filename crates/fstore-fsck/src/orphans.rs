//! Post-walk sweep over everything the LBA published for a slice.
//!
//! After the tree walk, every block the LBA placed should have been
//! visited, be a deleted block whose body is zeroed, or sit past the end
//! of the allocated prefix. Anything else is an orphan (reachable on
//! disk, referenced by nothing) or a contiguity failure.

use fstore_types::magic::ZERO_BLOCK_MAGIC;
use fstore_types::{get_display_str, BlockId, FlaggedOffset};

use crate::block_loader::{load_ser_block, BlockLoadError};
use crate::report::{Report, Scope};
use crate::slice::SliceCtx;

/// A block that is on disk but should not be.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RogueBlock {
    /// The serializer block id.
    pub block_id: BlockId,
    /// Its payload magic, when it loaded.
    pub magic: Option<[u8; 4]>,
    /// Why it did not load, otherwise.
    pub load_error: Option<BlockLoadError>,
}

impl RogueBlock {
    fn describe(&self, title: &str) -> String {
        match (self.load_error, self.magic) {
            (Some(code), _) => format!("{title} (#{}): could not load: {code}", self.block_id),
            (None, Some(magic)) => format!(
                "{title} (#{}): magic = '{}'",
                self.block_id,
                get_display_str(&magic)
            ),
            (None, None) => format!("{title} (#{})", self.block_id),
        }
    }
}

/// The sweep's verdict for one slice.
#[derive(Debug, Default)]
pub struct OtherBlockErrors {
    /// Blocks with an offset nothing ever visited.
    pub orphan_blocks: Vec<RogueBlock>,
    /// Delete markers whose body is not a zeroed block.
    pub allegedly_deleted_blocks: Vec<RogueBlock>,
    /// First id proving the allocated prefix has a hole.
    pub contiguity_failure: Option<BlockId>,
}

impl OtherBlockErrors {
    /// Convert to diagnostics.
    pub fn report(&self, scope: &Scope, out: &mut Report) {
        for b in &self.orphan_blocks {
            out.error(scope.clone(), b.describe("orphan block"));
        }
        for b in &self.allegedly_deleted_blocks {
            out.error(scope.clone(), b.describe("allegedly deleted block"));
        }
        if let Some(id) = self.contiguity_failure {
            out.error(
                scope.clone(),
                format!("slice block contiguity failure at serializer block id {id}"),
            );
        }
    }
}

fn load_for_magic(cx: &SliceCtx<'_>, ser_id: BlockId) -> RogueBlock {
    match load_ser_block(cx.file, cx.knog, ser_id, None) {
        Ok(block) => RogueBlock {
            block_id: ser_id,
            magic: Some(block.magic()),
            load_error: None,
        },
        Err(code) => RogueBlock {
            block_id: ser_id,
            magic: None,
            load_error: Some(code),
        },
    }
}

/// Sweep the slice's serializer ids in logical order. The loop ends when
/// the translated id walks off the end of the block-info vector.
pub fn check_slice_other_blocks(cx: &SliceCtx<'_>, errs: &mut OtherBlockErrors) {
    let end = cx.knog.block_info_len();
    let mut first_valueless: Option<BlockId> = None;

    let mut logical = 0;
    loop {
        let ser_id = cx.to_ser_block_id(logical);
        if ser_id >= end {
            break;
        }
        let Some(info) = cx.knog.snapshot(ser_id) else {
            break;
        };

        match info.offset {
            FlaggedOffset::Unused => {
                if first_valueless.is_none() {
                    first_valueless = Some(ser_id);
                }
            }
            FlaggedOffset::Value(_) => {
                if first_valueless.is_some() {
                    errs.contiguity_failure = first_valueless;
                }
                if !info.visited() {
                    errs.orphan_blocks.push(load_for_magic(cx, ser_id));
                }
            }
            FlaggedOffset::Delete(_) => {
                if first_valueless.is_some() {
                    errs.contiguity_failure = first_valueless;
                }
                if !info.visited() {
                    let rogue = load_for_magic(cx, ser_id);
                    match rogue.magic {
                        Some(magic) if &magic == ZERO_BLOCK_MAGIC => {}
                        _ => errs.allegedly_deleted_blocks.push(rogue),
                    }
                }
            }
        }
        logical += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rogue_block_rendering() {
        let b = RogueBlock {
            block_id: 17,
            magic: Some(*b"leaf"),
            load_error: None,
        };
        assert_eq!(b.describe("orphan block"), "orphan block (#17): magic = 'leaf'");

        let b = RogueBlock {
            block_id: 17,
            magic: None,
            load_error: Some(BlockLoadError::TransactionIdInvalid),
        };
        assert_eq!(
            b.describe("allegedly deleted block"),
            "allegedly deleted block (#17): could not load: bad transaction id"
        );
    }
}
