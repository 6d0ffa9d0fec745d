//! Diff-log loading and ordering.
//!
//! The log blocks sit right after the cache config block. Each is read
//! raw (the block loader's one-visit rule applies to the tree walk, not
//! the log), its patches decoded until the terminator or a decode
//! failure, and every patch filed under its target block id. Per target,
//! patches sort by `(transaction_id, patch_counter)` and counters within
//! one transaction must strictly increase.

use fstore_layout::block::{payload, BlockHeader};
use fstore_layout::patch::{decode_patch, MIN_PATCH_SIZE};
use fstore_types::limits::MC_CONFIG_BLOCK_ID;
use fstore_types::magic::LOG_BLOCK_MAGIC;
use fstore_types::FlaggedOffset;
use tracing::debug;

use crate::raw_block::read_raw;
use crate::report::{Report, Scope};
use crate::slice::SliceCtx;

/// Diff-log phase verdicts.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DiffLogErrors {
    /// Log blocks with no offset, an unreadable body, or a missing magic.
    pub missing_log_block_count: usize,
    /// Log blocks the LBA marks deleted.
    pub deleted_log_block_count: usize,
    /// Target blocks whose patch counters do not strictly increase.
    pub non_sequential_logs: usize,
    /// Log blocks containing at least one undecodable patch.
    pub corrupted_patch_blocks: usize,
}

impl DiffLogErrors {
    /// Convert to diagnostics.
    pub fn report(&self, scope: &Scope, out: &mut Report) {
        if self.deleted_log_block_count > 0 {
            out.error(
                scope.clone(),
                format!("{} diff log blocks have been deleted", self.deleted_log_block_count),
            );
        }
        if self.missing_log_block_count > 0 {
            out.error(
                scope.clone(),
                format!(
                    "{} diff log blocks are missing (maybe the log block count in the cache config block is too large?)",
                    self.missing_log_block_count
                ),
            );
        }
        if self.non_sequential_logs > 0 {
            out.error(
                scope.clone(),
                format!(
                    "the diff log for {} blocks has non-sequential patch counters",
                    self.non_sequential_logs
                ),
            );
        }
        if self.corrupted_patch_blocks > 0 {
            out.error(
                scope.clone(),
                format!(
                    "{} blocks of the diff log contain at least one corrupted patch",
                    self.corrupted_patch_blocks
                ),
            );
        }
    }
}

/// Scan the slice's log blocks into `cx.patch_map` and validate patch
/// ordering.
pub fn check_and_load_diff_log(cx: &mut SliceCtx<'_>, errs: &mut DiffLogErrors) {
    cx.patch_map.clear();

    let log_size = u64::from(cx.knog.mc_config_block.expect().n_patch_log_blocks);
    let block_size = cx.block_size();
    let payload_size = block_size.payload() as usize;

    for logical_id in MC_CONFIG_BLOCK_ID + 1..MC_CONFIG_BLOCK_ID + 1 + log_size {
        let ser_id = cx.to_ser_block_id(logical_id);
        let info = match cx.knog.snapshot(ser_id) {
            Some(info) => info,
            None => {
                errs.missing_log_block_count += 1;
                continue;
            }
        };
        let offset = match info.offset {
            FlaggedOffset::Unused => {
                errs.missing_log_block_count += 1;
                continue;
            }
            FlaggedOffset::Delete(_) => {
                errs.deleted_log_block_count += 1;
                continue;
            }
            FlaggedOffset::Value(off) => off,
        };

        let Ok(buf) = read_raw(cx.file, block_size.ser() as usize, offset) else {
            errs.missing_log_block_count += 1;
            continue;
        };
        if let Ok(header) = BlockHeader::parse(&buf) {
            cx.knog.stamp_transaction(ser_id, header.transaction_id);
        }

        let body = payload(&buf);
        if body.len() < LOG_BLOCK_MAGIC.len() || &body[..LOG_BLOCK_MAGIC.len()] != LOG_BLOCK_MAGIC {
            errs.missing_log_block_count += 1;
            continue;
        }

        let mut at = LOG_BLOCK_MAGIC.len();
        while at + MIN_PATCH_SIZE <= body.len() {
            match decode_patch(body, at, payload_size) {
                Ok(None) => break,
                Ok(Some((patch, consumed))) => {
                    cx.patch_map
                        .entry(patch.target_block_id)
                        .or_default()
                        .push(patch);
                    at += consumed;
                }
                Err(_) => {
                    errs.corrupted_patch_blocks += 1;
                    break;
                }
            }
        }
    }

    // Replay order per target: transaction id, then patch counter. Within
    // one transaction the counters must strictly increase.
    for (target, patches) in &mut cx.patch_map {
        patches.sort_by_key(|p| (p.transaction_id, p.patch_counter));

        let mut previous_transaction = 0;
        let mut previous_counter = 0;
        let mut offending = false;
        for p in patches.iter() {
            if previous_transaction == 0 || p.transaction_id != previous_transaction {
                previous_counter = 0;
            }
            if !(previous_counter == 0 || p.patch_counter > previous_counter) {
                offending = true;
            }
            previous_counter = p.patch_counter;
            previous_transaction = p.transaction_id;
        }
        if offending {
            errs.non_sequential_logs += 1;
            debug!(target_block = *target, "non-sequential patch counters");
        }
    }
}
