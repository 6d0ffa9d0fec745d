//! B-tree traversal with key-range constraints.
//!
//! The walk starts at the slice superblock's root and carries the
//! `(lo, hi)` key window down: every key on a node must sit strictly
//! inside it. Each node accumulates an error bitset; the first detected
//! class of corruption is recorded and the walk continues wherever it
//! safely can (an out-of-order internal node still gets its children
//! inspected, just without a window).

use fstore_layout::node::{
    has_sensible_offsets, is_underfull, parse_internal_pair, parse_leaf_pair, NodeHeader, NodeKind,
    ValueRef,
};
use fstore_types::limits::{MAX_IN_NODE_VALUE_SIZE, MAX_KEY_SIZE};
use fstore_types::BlockId;
use tracing::trace;

use crate::block_loader::BlockLoadError;
use crate::large_buf::{check_large_buf, LargeBufError};
use crate::report::{Report, Scope};
use crate::slice::SliceCtx;

/// Everything wrong with one node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeError {
    /// The node's logical block id.
    pub block_id: BlockId,
    /// The node failed to load at all.
    pub load_error: Option<BlockLoadError>,
    /// Emptier than the rebalancer allows (non-root only).
    pub block_underfull: bool,
    /// Neither leaf nor internal magic.
    pub bad_magic: bool,
    /// The packed pairs do not tile the payload tail exactly.
    pub noncontiguous_offsets: bool,
    /// A pair or value runs outside the payload.
    pub value_out_of_buf: bool,
    /// A key exceeds the maximum key size.
    pub keys_too_big: bool,
    /// A key hashes to a different slice.
    pub keys_in_wrong_slice: bool,
    /// Keys violate the ordering window.
    pub out_of_order: bool,
    /// The rightmost internal pair's key is not the empty sentinel.
    pub last_internal_node_key_nonempty: bool,
}

impl NodeError {
    fn new(block_id: BlockId) -> Self {
        Self {
            block_id,
            load_error: None,
            block_underfull: false,
            bad_magic: false,
            noncontiguous_offsets: false,
            value_out_of_buf: false,
            keys_too_big: false,
            keys_in_wrong_slice: false,
            out_of_order: false,
            last_internal_node_key_nonempty: false,
        }
    }

    /// Whether anything at all is wrong.
    #[must_use]
    pub fn is_bad(&self) -> bool {
        self.load_error.is_some()
            || self.block_underfull
            || self.bad_magic
            || self.noncontiguous_offsets
            || self.value_out_of_buf
            || self.keys_too_big
            || self.keys_in_wrong_slice
            || self.out_of_order
            || self.last_internal_node_key_nonempty
    }

    fn describe(&self) -> String {
        if let Some(code) = self.load_error {
            return format!("node {}: block not found: {code}", self.block_id);
        }
        let mut s = format!("node {}:", self.block_id);
        for (set, name) in [
            (self.block_underfull, " block_underfull"),
            (self.bad_magic, " bad_magic"),
            (self.noncontiguous_offsets, " noncontiguous_offsets"),
            (self.value_out_of_buf, " value_out_of_buf"),
            (self.keys_too_big, " keys_too_big"),
            (self.keys_in_wrong_slice, " keys_in_wrong_slice"),
            (self.out_of_order, " out_of_order"),
            (
                self.last_internal_node_key_nonempty,
                " last_internal_node_key_nonempty",
            ),
        ] {
            if set {
                s.push_str(name);
            }
        }
        s
    }
}

/// Everything wrong with one value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValueError {
    /// The leaf holding the value.
    pub block_id: BlockId,
    /// The key, attached once the value proves bad.
    pub key: Vec<u8>,
    /// Unrecognized metadata flag bits.
    pub bad_metadata_flags: bool,
    /// An in-place value above the in-node limit.
    pub too_big: bool,
    /// A large value no bigger than the in-node limit.
    pub lv_too_small: bool,
    /// Trouble inside the large buffer, when there is one.
    pub largebuf: LargeBufError,
}

impl ValueError {
    fn new(block_id: BlockId) -> Self {
        Self {
            block_id,
            key: Vec::new(),
            bad_metadata_flags: false,
            too_big: false,
            lv_too_small: false,
            largebuf: LargeBufError::default(),
        }
    }

    /// Whether anything at all is wrong.
    #[must_use]
    pub fn is_bad(&self) -> bool {
        self.bad_metadata_flags || self.too_big || self.lv_too_small || self.largebuf.is_bad()
    }

    fn describe(&self) -> String {
        let mut s = format!(
            "value {}/'{}':",
            self.block_id,
            String::from_utf8_lossy(&self.key)
        );
        if self.bad_metadata_flags {
            s.push_str(" bad_metadata_flags");
        }
        if self.too_big {
            s.push_str(" too_big");
        }
        if self.lv_too_small {
            s.push_str(" lv_too_small");
        }
        s.push_str(&self.largebuf.describe());
        s
    }
}

/// The accumulated subtree verdict for one slice.
#[derive(Debug, Default)]
pub struct SubtreeErrors {
    /// Per-node findings.
    pub node_errors: Vec<NodeError>,
    /// Per-value findings.
    pub value_errors: Vec<ValueError>,
}

impl SubtreeErrors {
    /// Whether the subtree is bad anywhere.
    #[must_use]
    pub fn is_bad(&self) -> bool {
        !(self.node_errors.is_empty() && self.value_errors.is_empty())
    }

    /// Convert to diagnostics.
    pub fn report(&self, scope: &Scope, out: &mut Report) {
        for e in &self.node_errors {
            out.error(scope.clone(), e.describe());
        }
        for e in &self.value_errors {
            out.error(scope.clone(), e.describe());
        }
    }
}

/// Validate one value; large values descend into their segment trees.
fn check_value(cx: &SliceCtx<'_>, value: &ValueRef<'_>, errs: &mut ValueError) {
    errs.bad_metadata_flags = value.has_unknown_flags();

    if value.is_large() {
        if let Ok(lbref) = fstore_layout::large_buf::LargeBufRef::parse(value.body) {
            errs.lv_too_small = lbref.size <= MAX_IN_NODE_VALUE_SIZE as i64;
        }
        check_large_buf(cx, value.body, &mut errs.largebuf);
    } else {
        errs.too_big = value.inline_size as usize > MAX_IN_NODE_VALUE_SIZE;
    }
}

/// The offset-tiling test both node kinds share: sorted pair offsets must
/// cover `[frontmost, payload end)` back to back. Returns pair sizes by
/// offset, or `None` after flagging `value_out_of_buf`.
fn check_offset_tiling(
    payload: &[u8],
    header: &NodeHeader,
    offsets: &[u16],
    pair_size_at: impl Fn(&[u8], usize) -> Option<usize>,
    errs: &mut NodeError,
) -> bool {
    let mut sorted = offsets.to_vec();
    sorted.sort_unstable();

    let mut expected = header.frontmost_offset as usize;
    for &off in &sorted {
        if off as usize != expected {
            errs.noncontiguous_offsets = true;
        }
        match pair_size_at(payload, off as usize) {
            Some(size) => expected = off as usize + size,
            None => {
                errs.value_out_of_buf = true;
                return false;
            }
        }
    }
    if expected != payload.len() {
        errs.noncontiguous_offsets = true;
    }
    true
}

#[allow(clippy::too_many_arguments)]
fn check_leaf_node(
    cx: &SliceCtx<'_>,
    payload: &[u8],
    header: &NodeHeader,
    offsets: &[u16],
    lo: Option<&[u8]>,
    hi: Option<&[u8]>,
    tree_errs: &mut SubtreeErrors,
    errs: &mut NodeError,
) {
    let tiled = check_offset_tiling(
        payload,
        header,
        offsets,
        |p, off| parse_leaf_pair(p, off).ok().map(|pair| pair.size),
        errs,
    );
    if !tiled {
        return;
    }

    let mut prev_key: Option<&[u8]> = lo;
    for &off in offsets {
        let Ok(pair) = parse_leaf_pair(payload, off as usize) else {
            errs.value_out_of_buf = true;
            return;
        };

        errs.keys_too_big |= pair.key.len() > MAX_KEY_SIZE;
        errs.keys_in_wrong_slice |= !cx.is_valid_key(pair.key);
        errs.out_of_order |= prev_key.is_some_and(|p| p >= pair.key);

        let mut valerr = ValueError::new(errs.block_id);
        check_value(cx, &pair.value, &mut valerr);
        if valerr.is_bad() {
            valerr.key = pair.key.to_vec();
            tree_errs.value_errors.push(valerr);
        }

        prev_key = Some(pair.key);
    }

    if let (Some(prev), Some(hi)) = (prev_key, hi) {
        errs.out_of_order |= prev > hi;
    }
}

#[allow(clippy::too_many_arguments)]
fn check_internal_node(
    cx: &SliceCtx<'_>,
    payload: &[u8],
    header: &NodeHeader,
    offsets: &[u16],
    lo: Option<&[u8]>,
    hi: Option<&[u8]>,
    tree_errs: &mut SubtreeErrors,
    errs: &mut NodeError,
) {
    let tiled = check_offset_tiling(
        payload,
        header,
        offsets,
        |p, off| parse_internal_pair(p, off).ok().map(|pair| pair.size),
        errs,
    );
    if !tiled {
        return;
    }

    let mut prev_key: Option<&[u8]> = lo;
    let last = offsets.len().saturating_sub(1);
    for (i, &off) in offsets.iter().enumerate() {
        let Ok(pair) = parse_internal_pair(payload, off as usize) else {
            errs.value_out_of_buf = true;
            return;
        };

        errs.keys_too_big |= pair.key.len() > MAX_KEY_SIZE;

        if i != last {
            errs.out_of_order |= prev_key.is_some_and(|p| p >= pair.key);
            if errs.out_of_order {
                // No window survives disordered keys; inspect the child
                // anyway.
                check_subtree(cx, pair.child, None, None, tree_errs);
            } else {
                check_subtree(cx, pair.child, prev_key, Some(pair.key), tree_errs);
            }
        } else {
            errs.last_internal_node_key_nonempty = !pair.key.is_empty();
            if let (Some(prev), Some(hi)) = (prev_key, hi) {
                errs.out_of_order |= prev > hi;
            }
            if errs.out_of_order {
                check_subtree(cx, pair.child, None, None, tree_errs);
            } else {
                check_subtree(cx, pair.child, prev_key, hi, tree_errs);
            }
        }

        prev_key = Some(pair.key);
    }
}

/// Walk the subtree rooted at `id` with the key window `(lo, hi)`. The
/// initial call passes `(None, None)`, which also exempts the root from
/// the underfull check.
pub fn check_subtree(
    cx: &SliceCtx<'_>,
    id: BlockId,
    lo: Option<&[u8]>,
    hi: Option<&[u8]>,
    errs: &mut SubtreeErrors,
) {
    let node = match cx.load(id) {
        Ok(node) => node,
        Err(code) => {
            let mut err = NodeError::new(id);
            err.load_error = Some(code);
            errs.node_errors.push(err);
            return;
        }
    };
    trace!(block_id = id, "walking btree node");

    let mut node_err = NodeError::new(id);
    let payload = &node.payload;

    match NodeHeader::parse(payload) {
        Ok(header) => {
            let offsets = header.pair_offsets(payload).unwrap_or_default();
            if !has_sensible_offsets(payload, &header)
                || offsets
                    .iter()
                    .any(|&o| (o as usize) < header.frontmost_offset as usize
                        || o as usize >= payload.len())
            {
                node_err.value_out_of_buf = true;
            } else {
                if lo.is_some() && hi.is_some() && is_underfull(payload.len(), &header) {
                    node_err.block_underfull = true;
                }
                match header.kind {
                    Some(NodeKind::Leaf) => check_leaf_node(
                        cx, payload, &header, &offsets, lo, hi, errs, &mut node_err,
                    ),
                    Some(NodeKind::Internal) => check_internal_node(
                        cx, payload, &header, &offsets, lo, hi, errs, &mut node_err,
                    ),
                    None => node_err.bad_magic = true,
                }
            }
        }
        Err(_) => node_err.bad_magic = true,
    }

    if node_err.is_bad() {
        errs.node_errors.push(node_err);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_error_describe() {
        let mut e = NodeError::new(12);
        assert!(!e.is_bad());
        e.out_of_order = true;
        e.keys_too_big = true;
        assert_eq!(e.describe(), "node 12: keys_too_big out_of_order");

        let mut e = NodeError::new(4);
        e.load_error = Some(BlockLoadError::NoBlock);
        assert_eq!(e.describe(), "node 4: block not found: no block");
    }

    #[test]
    fn value_error_describe() {
        let mut e = ValueError::new(3);
        e.key = b"k1".to_vec();
        e.too_big = true;
        assert_eq!(e.describe(), "value 3/'k1': too_big");
    }
}
