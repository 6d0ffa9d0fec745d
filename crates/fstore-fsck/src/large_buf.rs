//! Large-buffer reference validation and segment-tree descent.

use std::fmt;

use fstore_layout::large_buf::{
    compute_num_inlined, compute_num_sublevels, internal_segment_kids, internal_segment_magic_ok,
    leaf_segment_magic_ok, max_inline_ids, max_offset, LargeBufRef, REF_HEADER_SIZE,
};
use fstore_types::limits::{floor_aligned, LBREF_LIMIT};
use fstore_types::BlockId;

use crate::block_loader::BlockLoadError;
use crate::slice::SliceCtx;

/// One bad block inside a large buffer's segment tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentError {
    /// The segment block.
    pub block_id: BlockId,
    /// Load failure, or `None` when the block loaded with the wrong
    /// magic.
    pub cause: Option<BlockLoadError>,
}

impl fmt::Display for SegmentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.cause {
            Some(code) => write!(f, "segment_error({}, {code})", self.block_id),
            None => write!(f, "segment_error({}, bad magic)", self.block_id),
        }
    }
}

/// Everything wrong with one large buffer.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct LargeBufError {
    /// The reference does not use the shallowest-leftmost shape.
    pub not_left_shifted: bool,
    /// The reference fails a structural precondition outright.
    pub bogus_ref: bool,
    /// Bad blocks inside the segment tree.
    pub segment_errors: Vec<SegmentError>,
}

impl LargeBufError {
    /// Whether anything at all is wrong.
    #[must_use]
    pub fn is_bad(&self) -> bool {
        self.not_left_shifted || self.bogus_ref || !self.segment_errors.is_empty()
    }

    /// Render the flags and segment errors the way diagnostics print
    /// them.
    #[must_use]
    pub fn describe(&self) -> String {
        let mut s = String::new();
        if self.not_left_shifted {
            s.push_str(" not_left_shifted");
        }
        if self.bogus_ref {
            s.push_str(" bogus_ref");
        }
        for seg in &self.segment_errors {
            s.push(' ');
            s.push_str(&seg.to_string());
        }
        s
    }
}

/// Validate a large-buf reference and descend its segment tree.
///
/// `ref_bytes` is the reference as stored in the node (its byte length
/// bounds the inline id count). Structural preconditions are evaluated
/// without integer overflow; any failure flags `bogus_ref` and stops.
pub fn check_large_buf(cx: &SliceCtx<'_>, ref_bytes: &[u8], errs: &mut LargeBufError) {
    if ref_bytes.len() >= REF_HEADER_SIZE {
        if let Ok(lbref) = LargeBufRef::parse(ref_bytes) {
            if lbref.size >= 0 && lbref.offset >= 0 && i64::MAX / 4 - lbref.offset > lbref.size {
                let block_size = cx.block_size();
                let offset = lbref.offset as u64;
                let size = lbref.size as u64;
                let end = offset + size;
                let inlined = compute_num_inlined(block_size, end, LBREF_LIMIT);

                if 1 <= inlined && inlined <= max_inline_ids(ref_bytes.len()) {
                    let sublevels = compute_num_sublevels(block_size, end, LBREF_LIMIT);

                    if offset >= max_offset(block_size, sublevels)
                        || (inlined == 1
                            && sublevels > 1
                            && offset >= max_offset(block_size, sublevels - 1))
                        || (inlined == 1 && sublevels == 1 && offset > 0)
                    {
                        errs.not_left_shifted = true;
                    }

                    check_large_buf_children(cx, sublevels, offset, size, &lbref.block_ids, errs);
                    return;
                }
            }
        }
    }
    errs.bogus_ref = true;
}

/// Walk the children covering `[offset, offset + size)` at the given
/// sublevel depth.
fn check_large_buf_children(
    cx: &SliceCtx<'_>,
    sublevels: u32,
    offset: u64,
    size: u64,
    block_ids: &[BlockId],
    errs: &mut LargeBufError,
) {
    let step = max_offset(cx.block_size(), sublevels);
    let mut i = floor_aligned(offset, step);
    while i < offset + size {
        let beg = offset.max(i) - i;
        let end = (offset + size).min(i + step) - i;
        let Some(&child) = block_ids.get((i / step) as usize) else {
            // The precondition bounded the inline count; an internal
            // node shorter than its fanout cannot reach here.
            return;
        };
        check_large_buf_subtree(cx, sublevels, beg, end - beg, child, errs);
        i += step;
    }
}

/// Load one segment and recurse when it is internal.
fn check_large_buf_subtree(
    cx: &SliceCtx<'_>,
    levels: u32,
    offset: u64,
    size: u64,
    block_id: BlockId,
    errs: &mut LargeBufError,
) {
    let block = match cx.load(block_id) {
        Ok(block) => block,
        Err(code) => {
            errs.segment_errors.push(SegmentError {
                block_id,
                cause: Some(code),
            });
            return;
        }
    };

    let magic_ok = if levels == 1 {
        leaf_segment_magic_ok(&block.payload)
    } else {
        internal_segment_magic_ok(&block.payload)
    };
    if !magic_ok {
        errs.segment_errors.push(SegmentError {
            block_id,
            cause: None,
        });
        return;
    }

    if levels > 1 {
        let kids = internal_segment_kids(&block.payload);
        check_large_buf_children(cx, levels - 1, offset, size, &kids, errs);
    }
}
