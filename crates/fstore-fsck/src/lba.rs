//! LBA index resolution.
//!
//! Walks each shard's superblock extents then its open extent — the
//! engine's own replay order — publishing `block_id → offset` into the
//! file's block info. A later entry legitimately supersedes an earlier
//! one, including re-activating a previously deleted id.

use fstore_layout::lba::{
    entries_per_extent, parse_superblock_entry, superblock_aligned_size, superblock_magic_ok,
    LbaEntry,
};
use fstore_layout::metablock::LbaShardRecord;
use fstore_types::limits::{DEVICE_BLOCK_SIZE, LBA_SHARD_FACTOR, MAX_BLOCK_ID};
use fstore_types::{FlaggedOffset, NULL_BLOCK_ID};
use fstore_vfs::CheckFile;
use tracing::debug;

use crate::knowledge::FileKnowledge;
use crate::raw_block::read_raw;
use crate::report::{Report, Scope};

/// Entry-level trouble found while walking one shard's extents.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LbaExtentErrors {
    /// Structural failure of one extent, if any.
    pub code: Option<LbaExtentErrorCode>,
    /// Entries naming an impossible block id.
    pub bad_block_id_count: usize,
    /// Entries filed in the wrong shard.
    pub wrong_shard_count: usize,
    /// Entries with a misaligned or out-of-file offset.
    pub bad_offset_count: usize,
    /// Entries examined.
    pub total_count: usize,
}

/// Structural failure modes of a single LBA extent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LbaExtentErrorCode {
    /// The extent offset is not a valid extent.
    BadExtentOffset,
    /// The entry count does not fit in an extent.
    BadEntriesCount,
}

/// One shard's verdict.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LbaShardErrors {
    /// Structural failure, if any.
    pub code: Option<LbaShardErrorCode>,
    /// Which extent failed (superblock index order; the open extent is
    /// one past the superblock entries), when `code` is `BadExtent`.
    pub bad_extent_number: Option<usize>,
    /// Entry-level counts across the shard's extents.
    pub extent_errors: LbaExtentErrors,
}

/// Structural failure modes of one LBA shard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LbaShardErrorCode {
    /// The superblock offset is not a valid device block.
    BadSuperblockOffset,
    /// The superblock magic is wrong.
    BadSuperblockMagic,
    /// An extent under this shard failed structurally.
    BadExtent,
    /// The superblock entry count is implausible.
    BadSuperblockEntriesCount,
    /// The superblock would straddle an extent boundary.
    SuperblockNotContainedInSingleExtent,
}

/// All shards' verdicts.
#[derive(Debug, Default, Clone)]
pub struct LbaErrors {
    /// Per-shard results, indexed by shard number.
    pub shard_errors: Vec<LbaShardErrors>,
}

impl LbaErrors {
    /// Convert to diagnostics.
    pub fn report(&self, scope: &Scope, out: &mut Report) {
        for (i, sherr) in self.shard_errors.iter().enumerate() {
            match sherr.code {
                Some(LbaShardErrorCode::BadSuperblockEntriesCount) => out.error(
                    scope.clone(),
                    format!("lba shard {i} has invalid lba superblock entries count"),
                ),
                Some(LbaShardErrorCode::SuperblockNotContainedInSingleExtent) => out.error(
                    scope.clone(),
                    format!(
                        "lba shard {i} has lba superblock with entries count crossing extent boundary"
                    ),
                ),
                Some(LbaShardErrorCode::BadSuperblockOffset) => out.error(
                    scope.clone(),
                    format!("lba shard {i} has invalid lba superblock offset"),
                ),
                Some(LbaShardErrorCode::BadSuperblockMagic) => out.error(
                    scope.clone(),
                    format!("lba shard {i} has invalid superblock magic"),
                ),
                Some(LbaShardErrorCode::BadExtent) => out.error(
                    scope.clone(),
                    format!(
                        "lba shard {i}, extent {}, {}",
                        sherr.bad_extent_number.unwrap_or(0),
                        match sherr.extent_errors.code {
                            Some(LbaExtentErrorCode::BadExtentOffset) => "has bad extent offset",
                            Some(LbaExtentErrorCode::BadEntriesCount) => "has bad entries count",
                            None => "was specified invalidly",
                        }
                    ),
                ),
                None => {
                    let e = &sherr.extent_errors;
                    if e.bad_block_id_count > 0 || e.wrong_shard_count > 0 || e.bad_offset_count > 0
                    {
                        out.error(
                            scope.clone(),
                            format!(
                                "lba shard {i} had bad lba entries: {} bad block ids, {} in wrong shard, {} with bad offset, of {} total",
                                e.bad_block_id_count,
                                e.wrong_shard_count,
                                e.bad_offset_count,
                                e.total_count
                            ),
                        );
                    }
                }
            }
        }
    }
}

fn is_valid_offset(knog: &FileKnowledge, offset: i64, alignment: u64) -> bool {
    offset >= 0
        && offset as u64 % alignment == 0
        && (offset as u64) < *knog.filesize.expect()
}

fn is_valid_extent_offset(knog: &FileKnowledge, offset: i64) -> bool {
    is_valid_offset(knog, offset, knog.extent_size())
}

fn is_valid_device_block(knog: &FileKnowledge, offset: i64) -> bool {
    is_valid_offset(knog, offset, DEVICE_BLOCK_SIZE)
}

/// Whether an LBA entry's offset may be published: live offsets must be
/// block-aligned and inside the file; delete markers pass as-is.
fn is_valid_block_offset(knog: &FileKnowledge, offset: FlaggedOffset) -> bool {
    match offset {
        FlaggedOffset::Unused => false,
        FlaggedOffset::Delete(_) => true,
        FlaggedOffset::Value(off) => {
            off % u64::from(knog.block_size().ser()) == 0 && off < *knog.filesize.expect()
        }
    }
}

/// Walk one LBA extent, publishing its usable entries.
fn check_lba_extent(
    file: &dyn CheckFile,
    knog: &FileKnowledge,
    shard_number: u64,
    extent_offset: i64,
    entry_count: u32,
    errs: &mut LbaExtentErrors,
) -> bool {
    if !is_valid_extent_offset(knog, extent_offset) {
        errs.code = Some(LbaExtentErrorCode::BadExtentOffset);
        return false;
    }
    if u64::from(entry_count) > entries_per_extent(knog.extent_size()) {
        errs.code = Some(LbaExtentErrorCode::BadEntriesCount);
        return false;
    }

    let extent_size = knog.extent_size();
    let Ok(extent) = read_raw(file, extent_size as usize, extent_offset as u64) else {
        errs.code = Some(LbaExtentErrorCode::BadExtentOffset);
        return false;
    };

    errs.total_count += entry_count as usize;

    for i in 0..entry_count as usize {
        let entry = LbaEntry::parse_at(&extent, i);
        if entry.block_id == NULL_BLOCK_ID {
            // Tombstoned during writes; nothing to publish.
        } else if entry.block_id > MAX_BLOCK_ID {
            errs.bad_block_id_count += 1;
        } else if entry.block_id % LBA_SHARD_FACTOR != shard_number {
            errs.wrong_shard_count += 1;
        } else if !is_valid_block_offset(knog, entry.offset) {
            errs.bad_offset_count += 1;
        } else {
            knog.publish_offset(entry.block_id, entry.offset);
        }
    }
    true
}

/// Walk one shard: superblock extents first, then the open extent.
fn check_lba_shard(
    file: &dyn CheckFile,
    knog: &FileKnowledge,
    shard: &LbaShardRecord,
    shard_number: u64,
    errs: &mut LbaShardErrors,
) -> bool {
    let extent_size = knog.extent_size();
    let superblock_entries = u64::from(shard.superblock_entry_count);
    let aligned_size = superblock_aligned_size(superblock_entries);
    if aligned_size > extent_size {
        errs.code = Some(LbaShardErrorCode::BadSuperblockEntriesCount);
        return false;
    }

    if shard.superblock_offset != -1 {
        if !is_valid_device_block(knog, shard.superblock_offset) {
            errs.code = Some(LbaShardErrorCode::BadSuperblockOffset);
            return false;
        }
        if shard.superblock_offset as u64 % extent_size > extent_size - aligned_size {
            errs.code = Some(LbaShardErrorCode::SuperblockNotContainedInSingleExtent);
            return false;
        }

        let Ok(superblock) = read_raw(file, aligned_size as usize, shard.superblock_offset as u64)
        else {
            errs.code = Some(LbaShardErrorCode::BadSuperblockOffset);
            return false;
        };
        if !superblock_magic_ok(&superblock) {
            errs.code = Some(LbaShardErrorCode::BadSuperblockMagic);
            return false;
        }

        for i in 0..shard.superblock_entry_count as usize {
            // The aligned read covered every entry; parse cannot fail.
            let Ok(entry) = parse_superblock_entry(&superblock, i) else {
                errs.code = Some(LbaShardErrorCode::BadSuperblockMagic);
                return false;
            };
            if !check_lba_extent(
                file,
                knog,
                shard_number,
                entry.offset,
                entry.entry_count,
                &mut errs.extent_errors,
            ) {
                errs.code = Some(LbaShardErrorCode::BadExtent);
                errs.bad_extent_number = Some(i);
                return false;
            }
        }
    }

    if shard.last_extent_offset != -1
        && !check_lba_extent(
            file,
            knog,
            shard_number,
            shard.last_extent_offset,
            shard.last_extent_entry_count,
            &mut errs.extent_errors,
        )
    {
        errs.code = Some(LbaShardErrorCode::BadExtent);
        errs.bad_extent_number = Some(shard.superblock_entry_count as usize);
        return false;
    }

    errs.extent_errors.bad_block_id_count == 0
        && errs.extent_errors.wrong_shard_count == 0
        && errs.extent_errors.bad_offset_count == 0
}

/// Resolve the whole LBA index. Returns false if any shard had trouble.
pub fn check_lba(file: &dyn CheckFile, knog: &FileKnowledge, errs: &mut LbaErrors) -> bool {
    let shards = &knog.metablock.expect().shards;
    let mut ok = true;
    for (i, shard) in shards.iter().enumerate() {
        let mut shard_errs = LbaShardErrors::default();
        ok &= check_lba_shard(file, knog, shard, i as u64, &mut shard_errs);
        errs.shard_errors.push(shard_errs);
    }
    debug!(
        file = %knog.filename,
        published = knog.block_info_len(),
        ok = ok,
        "resolved LBA index"
    );
    ok
}
