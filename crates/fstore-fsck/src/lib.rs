//! Offline consistency checker for FrankenStore serializer files.
//!
//! The checker is strictly read-only and diagnostic: it decodes every
//! layer of the on-disk format — static header, metablock ring, LBA
//! index, config blocks, diff log, B-trees, large buffers, delete queues
//! — cross-checks each layer against what earlier layers established, and
//! accumulates typed error records instead of aborting. Corruption stops
//! only the subtree or file it sits in; everything else keeps getting
//! checked.
//!
//! Entry point: [`check::check_files`].

pub mod block_loader;
pub mod check;
pub mod config_block;
pub mod delete_queue;
pub mod diff_log;
pub mod interfile;
pub mod knowledge;
pub mod large_buf;
pub mod lba;
pub mod metablock;
pub mod orphans;
pub mod raw_block;
pub mod report;
pub mod slice;
pub mod static_check;
pub mod tree;

pub use check::{check_files, CheckConfig, InputFile};
pub use report::{Diagnostic, Report, Scope, Severity, SliceId};
