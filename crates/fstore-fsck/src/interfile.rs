//! Cross-file agreement checks over the multiplexer config blocks.

use crate::knowledge::FileKnowledge;
use crate::report::{Report, Scope};

/// The multi-file verdict.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct InterfileErrors {
    /// Every file records the number of files actually given.
    pub all_have_correct_num_files: bool,
    /// The files agree among themselves on the file count.
    pub all_have_same_num_files: bool,
    /// The files agree on the slice count.
    pub all_have_same_num_slices: bool,
    /// The files agree on the creation timestamp.
    pub all_have_same_creation_timestamp: bool,
    /// Files were given out of their preferred 0,1,… order.
    pub out_of_order_serializers: bool,
    /// Some file's serializer number is outside `[0, n_files)`.
    pub bad_this_serializer_values: bool,
    /// The slice count is not positive.
    pub bad_num_slices: bool,
    /// Two files claim the same serializer number.
    pub reused_serializer_numbers: bool,
}

impl InterfileErrors {
    /// Convert to diagnostics.
    pub fn report(&self, out: &mut Report) {
        if !self.all_have_same_num_files {
            out.error(Scope::Database, "config blocks disagree on number of files");
        } else if !self.all_have_correct_num_files {
            out.warning(
                Scope::Database,
                "wrong number of files specified on the command line",
            );
        }

        if self.bad_num_slices {
            out.error(
                Scope::Database,
                "some config blocks specify an absurd number of slices",
            );
        } else if !self.all_have_same_num_slices {
            out.error(Scope::Database, "config blocks disagree on number of slices");
        }

        if !self.all_have_same_creation_timestamp {
            out.error(
                Scope::Database,
                "config blocks have different creation timestamps",
            );
        }

        if self.bad_this_serializer_values {
            out.error(
                Scope::Database,
                "some config blocks have absurd serializer numbers",
            );
        } else if self.reused_serializer_numbers {
            out.error(
                Scope::Database,
                "some config blocks specify the same serializer number",
            );
        } else if self.out_of_order_serializers {
            out.warning(
                Scope::Database,
                "files apparently specified out of order on the command line",
            );
        }
    }
}

/// Cross-check every data file's config block. Returns false on any
/// hard disagreement.
pub fn check_interfile(files: &[FileKnowledge], errs: &mut InterfileErrors) -> bool {
    let num_files = files.len();
    let mut counts = vec![0usize; num_files];

    errs.all_have_correct_num_files = true;
    errs.all_have_same_num_files = true;
    errs.all_have_same_num_slices = true;
    errs.all_have_same_creation_timestamp = true;

    let zeroth = files[0].config_block.expect();

    for (i, knog) in files.iter().enumerate() {
        let cb = knog.config_block.expect();
        errs.all_have_correct_num_files &= cb.n_files as usize == num_files;
        errs.all_have_same_num_files &= cb.n_files == zeroth.n_files;
        errs.all_have_same_num_slices &= cb.n_proxies == zeroth.n_proxies;
        errs.all_have_same_creation_timestamp &=
            cb.creation_timestamp == zeroth.creation_timestamp;
        errs.out_of_order_serializers |= i != cb.this_serializer as usize;
        errs.bad_this_serializer_values |= cb.this_serializer >= cb.n_files;
        if (cb.this_serializer as usize) < num_files {
            counts[cb.this_serializer as usize] += 1;
        }
    }

    errs.bad_num_slices = zeroth.n_proxies == 0;
    errs.reused_serializer_numbers = counts.iter().any(|&c| c > 1);

    errs.all_have_same_num_files
        && errs.all_have_same_num_slices
        && errs.all_have_same_creation_timestamp
        && !errs.bad_this_serializer_values
        && !errs.bad_num_slices
        && !errs.reused_serializer_numbers
}
