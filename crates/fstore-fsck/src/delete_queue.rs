//! Replication delete-queue validation.

use fstore_layout::delete_queue::DeleteQueueBlock;
use fstore_layout::large_buf::LargeBufRef;
use fstore_types::BlockId;

use crate::block_loader::BlockLoadError;
use crate::large_buf::{check_large_buf, LargeBufError};
use crate::report::{Report, Scope};
use crate::slice::SliceCtx;

/// Everything wrong with one slice's delete queue.
#[derive(Debug, Default)]
pub struct DeleteQueueErrors {
    /// The queue block failed to load.
    pub block_code: Option<BlockLoadError>,
    /// The queue block has the wrong magic.
    pub bad_magic: bool,
    /// Trouble inside the timestamps-and-offsets buffer.
    pub timestamp_buf: LargeBufError,
    /// Trouble inside the keys buffer.
    pub keys_buf: LargeBufError,
    /// The queue's primal offset, for context.
    pub primal_offset: Option<i64>,
}

impl DeleteQueueErrors {
    /// Whether anything at all is wrong.
    #[must_use]
    pub fn is_bad(&self) -> bool {
        self.block_code.is_some()
            || self.bad_magic
            || self.timestamp_buf.is_bad()
            || self.keys_buf.is_bad()
    }

    /// Convert to diagnostics.
    pub fn report(&self, scope: &Scope, out: &mut Report) {
        if let Some(code) = self.block_code {
            out.error(
                scope.clone(),
                format!("could not find delete queue block: {code}"),
            );
        }
        if self.bad_magic {
            out.error(scope.clone(), "delete queue block had bad magic");
        }
        if self.timestamp_buf.is_bad() {
            out.error(
                scope.clone(),
                format!(
                    "delete queue timestamp buffer errors:{}",
                    self.timestamp_buf.describe()
                ),
            );
        }
        if self.keys_buf.is_bad() {
            out.error(
                scope.clone(),
                format!("delete queue keys buffer errors:{}", self.keys_buf.describe()),
            );
        }
    }
}

/// Validate the delete-queue block and both of its large buffers.
pub fn check_delete_queue(cx: &SliceCtx<'_>, block_id: BlockId, errs: &mut DeleteQueueErrors) {
    let block = match cx.load(block_id) {
        Ok(block) => block,
        Err(code) => {
            errs.block_code = Some(code);
            return;
        }
    };

    let dq = match DeleteQueueBlock::parse(&block.payload) {
        Ok(Some(dq)) => dq,
        _ => {
            errs.bad_magic = true;
            return;
        }
    };
    errs.primal_offset = Some(dq.primal_offset);

    if LargeBufRef::parse(dq.timestamps_and_offsets).map_or(false, |r| r.size != 0) {
        check_large_buf(cx, dq.timestamps_and_offsets, &mut errs.timestamp_buf);
    }
    if LargeBufRef::parse(dq.keys).map_or(false, |r| r.size != 0) {
        check_large_buf(cx, dq.keys, &mut errs.keys_buf);
    }

    // TODO: once the writer's alignment rule for queue entries is pinned
    // down, verify that every timestamp's offset (less the primal offset)
    // lands on a key boundary and that each recorded key size is in
    // (0, MAX_KEY_SIZE].
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_errors_are_clean() {
        let errs = DeleteQueueErrors::default();
        assert!(!errs.is_bad());
        let mut report = Report::default();
        errs.report(&Scope::Database, &mut report);
        assert!(report.diagnostics.is_empty());
    }

    #[test]
    fn bad_magic_reports() {
        let errs = DeleteQueueErrors {
            bad_magic: true,
            ..Default::default()
        };
        assert!(errs.is_bad());
        let mut report = Report::default();
        errs.report(&Scope::Database, &mut report);
        assert_eq!(report.diagnostics.len(), 1);
        assert!(report.has_errors());
    }
}
