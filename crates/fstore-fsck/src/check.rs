//! Whole-run orchestration.
//!
//! Per file: static header → metablock ring → LBA → config blocks. Then
//! the files are cross-checked, and every slice (plus the metadata slice)
//! is checked on its own OS thread. Within a slice the phases are
//! strictly sequential: diff log → superblock → delete queue → tree walk
//! → orphan sweep. Slices never signal each other; the join at the end
//! concatenates their accumulators in slice order so reruns produce
//! byte-identical reports.

use std::sync::Arc;
use std::thread;

use fstore_types::limits::{ceil_divide, SUPERBLOCK_ID};
use fstore_types::NULL_BLOCK_ID;
use fstore_vfs::CheckFile;
use tracing::{debug, info};

use crate::block_loader::BlockLoadError;
use crate::config_block::{
    check_multiplexed_config_block, check_raw_config_block, ConfigBlockErrors,
};
use crate::delete_queue::{check_delete_queue, DeleteQueueErrors};
use crate::diff_log::{check_and_load_diff_log, DiffLogErrors};
use crate::interfile::{check_interfile, InterfileErrors};
use crate::knowledge::FileKnowledge;
use crate::lba::{check_lba, LbaErrors};
use crate::metablock::{check_metablock, MetablockErrors};
use crate::orphans::{check_slice_other_blocks, OtherBlockErrors};
use crate::report::{Report, Scope, SliceId};
use crate::slice::SliceCtx;
use crate::static_check::{check_static_config, prescan_info, StaticCheckErrors};
use crate::tree::{check_subtree, SubtreeErrors};

/// One input file: a display name plus its reader.
#[derive(Clone)]
pub struct InputFile {
    /// Name used in diagnostics.
    pub name: String,
    /// The opened file.
    pub file: Arc<dyn CheckFile>,
}

impl InputFile {
    /// Bundle a reader with its display name.
    pub fn new(name: impl Into<String>, file: Arc<dyn CheckFile>) -> Self {
        Self {
            name: name.into(),
            file,
        }
    }
}

/// Knobs for a run.
#[derive(Debug, Default, Clone)]
pub struct CheckConfig {
    /// Skip patch replay when loading blocks (the diff log is still
    /// scanned and validated).
    pub ignore_diff_log: bool,
}

/// Everything found while checking one slice.
#[derive(Debug, Default)]
pub struct SliceErrors {
    /// The slice superblock failed to load.
    pub superblock_code: Option<BlockLoadError>,
    /// The slice superblock has the wrong magic.
    pub superblock_bad_magic: bool,
    /// Delete-queue findings.
    pub delete_queue: DeleteQueueErrors,
    /// Diff-log findings.
    pub diff_log: DiffLogErrors,
    /// Tree-walk findings.
    pub tree: SubtreeErrors,
    /// Orphan-sweep findings.
    pub other: OtherBlockErrors,
}

impl SliceErrors {
    /// Convert to diagnostics.
    pub fn report(&self, scope: &Scope, out: &mut Report) {
        if let Some(code) = self.superblock_code {
            out.error(
                scope.clone(),
                format!("could not find btree superblock: {code}"),
            );
            return;
        }
        if self.superblock_bad_magic {
            out.error(scope.clone(), "btree superblock had bad magic");
            return;
        }
        self.delete_queue.report(scope, out);
        self.diff_log.report(scope, out);
        self.tree.report(scope, out);
        self.other.report(scope, out);
    }
}

/// Run every phase of one slice, strictly in order.
pub fn check_slice(cx: &mut SliceCtx<'_>) -> SliceErrors {
    let mut errs = SliceErrors::default();

    check_and_load_diff_log(cx, &mut errs.diff_log);

    let (root_block_id, delete_queue_block_id) = match cx.load(SUPERBLOCK_ID) {
        Err(code) => {
            errs.superblock_code = Some(code);
            return errs;
        }
        Ok(block) => {
            match fstore_layout::node::BtreeSuperblock::parse(&block.payload) {
                Ok(Some(sb)) => (sb.root_block, sb.delete_queue_block),
                _ => {
                    errs.superblock_bad_magic = true;
                    return errs;
                }
            }
        }
    };

    check_delete_queue(cx, delete_queue_block_id, &mut errs.delete_queue);

    if root_block_id != NULL_BLOCK_ID {
        check_subtree(cx, root_block_id, None, None, &mut errs.tree);
    }

    check_slice_other_blocks(cx, &mut errs.other);

    errs
}

/// The per-file pre-config pipeline. Returns false when the file cannot
/// be taken further.
fn check_to_config_block(
    file: &dyn CheckFile,
    knog: &mut FileKnowledge,
    multiplexed: bool,
    allow_version_mismatch: bool,
    out: &mut Report,
) -> bool {
    let scope = Scope::File {
        file: knog.filename.clone(),
    };
    knog.filesize.learn(file.size());

    let mut static_errs = StaticCheckErrors::default();
    let ok = check_static_config(file, knog, allow_version_mismatch, &mut static_errs);
    static_errs.report(&scope, out);
    if !ok {
        return false;
    }
    prescan_info(knog, &scope, out);

    let mut mb_errs = MetablockErrors::default();
    let ok = check_metablock(file, knog, &mut mb_errs);
    mb_errs.report(&scope, out);
    if !ok {
        return false;
    }

    let mut lba_errs = LbaErrors::default();
    let ok = check_lba(file, knog, &mut lba_errs);
    lba_errs.report(&scope, out);
    if !ok {
        return false;
    }

    let mut cfg_errs = ConfigBlockErrors::default();
    let ok = if multiplexed {
        check_multiplexed_config_block(file, knog, &mut cfg_errs)
    } else {
        check_raw_config_block(file, knog, &mut cfg_errs)
    };
    cfg_errs.report(&scope, out);
    ok
}

/// Run the pre-config pipeline over every data file and the optional
/// metadata file, then the interfile cross-check. Returns the
/// accumulated knowledge, or `None` when any file or the cross-check
/// failed (findings are in `out` either way).
fn check_through_interfile(
    files: &[InputFile],
    metadata: Option<&InputFile>,
    allow_version_mismatch: bool,
    out: &mut Report,
) -> Option<(Vec<FileKnowledge>, Option<FileKnowledge>)> {
    let mut knowledge: Vec<FileKnowledge> =
        files.iter().map(|f| FileKnowledge::new(&f.name)).collect();
    let mut metadata_knog = metadata.map(|f| FileKnowledge::new(&f.name));

    let mut success = true;
    for (input, knog) in files.iter().zip(knowledge.iter_mut()) {
        success &= check_to_config_block(&*input.file, knog, true, allow_version_mismatch, out);
    }
    if let (Some(input), Some(knog)) = (metadata, metadata_knog.as_mut()) {
        success &= check_to_config_block(&*input.file, knog, false, allow_version_mismatch, out);
    }
    if !success {
        return None;
    }

    let mut inter_errs = InterfileErrors::default();
    let inter_ok = check_interfile(&knowledge, &mut inter_errs);
    inter_errs.report(out);
    if !inter_ok {
        return None;
    }
    Some((knowledge, metadata_knog))
}

/// Check a whole database: every data file, the optional metadata file,
/// their agreement, and every slice. The returned report is complete and
/// deterministic; exit status is `!report.has_errors()`.
pub fn check_files(
    files: &[InputFile],
    metadata: Option<&InputFile>,
    cfg: &CheckConfig,
) -> Report {
    let mut report = Report::default();
    if files.is_empty() {
        report.error(Scope::Database, "no input files given");
        return report;
    }

    let Some((knowledge, metadata_knog)) =
        check_through_interfile(files, metadata, false, &mut report)
    else {
        return report;
    };

    let cb = *knowledge[0].config_block.expect();
    let mcc = *knowledge[0].mc_config_block.expect();
    report.info(
        Scope::Database,
        format!(
            "config_block creation_timestamp={} n_files={} n_proxies={} n_log_blocks={}",
            cb.creation_timestamp, cb.n_files, cb.n_proxies, mcc.n_patch_log_blocks
        ),
    );
    info!(
        n_files = cb.n_files,
        n_proxies = cb.n_proxies,
        n_log_blocks = mcc.n_patch_log_blocks,
        "pre-config phases passed; checking slices"
    );

    // One thread per slice, plus one for the metadata slice. Joining in
    // slice order keeps the report deterministic.
    let n_slices = cb.n_proxies;
    thread::scope(|scope| {
        let mut handles = Vec::new();
        for global_slice in 0..n_slices {
            // When fewer files were given than the config names (a
            // warning upstream), some slices have no home here; they are
            // simply not checkable.
            let Some(home) = knowledge
                .iter()
                .position(|k| k.config_block.expect().this_serializer == global_slice % cb.n_files)
            else {
                continue;
            };
            let knog = &knowledge[home];
            let file = Arc::clone(&files[home].file);
            let ignore = cfg.ignore_diff_log;
            let handle = scope.spawn(move || {
                let mut cx = SliceCtx::multiplexed(&*file, knog, global_slice, ignore);
                check_slice(&mut cx)
            });
            let slice_scope = Scope::Slice {
                file: knog.filename.clone(),
                slice: SliceId::Data(global_slice),
            };
            handles.push((slice_scope, handle));
        }

        let metadata_handle = metadata_knog.as_ref().map(|knog| {
            let input = metadata.expect("metadata knowledge implies a metadata input");
            let file = Arc::clone(&input.file);
            let ignore = cfg.ignore_diff_log;
            let slice_scope = Scope::Slice {
                file: knog.filename.clone(),
                slice: SliceId::Metadata,
            };
            (
                slice_scope,
                scope.spawn(move || {
                    let mut cx = SliceCtx::raw(&*file, knog, ignore);
                    check_slice(&mut cx)
                }),
            )
        });

        for (slice_scope, handle) in handles {
            let errs = handle.join().expect("slice checker thread panicked");
            errs.report(&slice_scope, &mut report);
        }
        if let Some((slice_scope, handle)) = metadata_handle {
            let errs = handle.join().expect("metadata slice checker thread panicked");
            errs.report(&slice_scope, &mut report);
        }
    });

    debug!(
        errors = report.count(crate::report::Severity::Error),
        warnings = report.count(crate::report::Severity::Warning),
        "check complete"
    );
    report
}

/// Read the version string out of a file's static header, for the
/// version-inspection mode.
pub fn extract_version(file: &dyn CheckFile) -> Option<String> {
    use fstore_types::limits::DEVICE_BLOCK_SIZE;

    let buf = crate::raw_block::read_raw(file, DEVICE_BLOCK_SIZE as usize, 0).ok()?;
    let header = fstore_layout::static_header::StaticHeader::parse(&buf).ok()?;
    Some(header.version_str())
}

/// Reconstruct the engine flags that would recreate this database's
/// geometry, for the command-line-inspection mode.
///
/// Every file (and the metadata file, if given) must pass the pre-config
/// phases and the interfile cross-check before any flags are derived; a
/// mismatched version string alone is tolerated, since the geometry
/// being reconstructed does not depend on it.
pub fn extract_creation_flags(
    files: &[InputFile],
    metadata: Option<&InputFile>,
) -> Option<String> {
    if files.is_empty() {
        return None;
    }
    let mut scratch = Report::default();
    let (knowledge, _) = check_through_interfile(files, metadata, true, &mut scratch)?;

    let knog = knowledge.first()?;
    let cfg = knog.static_config.expect();
    let cb = knog.config_block.expect();
    let mcc = knog.mc_config_block.expect();
    let diff_log_bytes = u64::from(mcc.n_patch_log_blocks)
        * u64::from(cb.n_proxies)
        * u64::from(cfg.block_size.ser());
    let diff_log_mb = ceil_divide(diff_log_bytes, 1 << 20);
    Some(format!(
        "--block-size {} --extent-size {} --slices {} --diff-log-size {}",
        cfg.block_size, cfg.extent_size, cb.n_proxies, diff_log_mb
    ))
}
