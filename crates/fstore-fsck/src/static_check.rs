//! Static header validation (block 0).

use fstore_layout::static_header::StaticHeader;
use fstore_types::limits::DEVICE_BLOCK_SIZE;
use fstore_vfs::CheckFile;
use tracing::debug;

use crate::knowledge::FileKnowledge;
use crate::raw_block::{read_raw, RawBlockError};
use crate::report::{Report, Scope, Severity};

/// Why the static header was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StaticConfigError {
    /// Block 0 could not be read at all.
    BadFile(RawBlockError),
    /// The software-name field does not match.
    BadSoftwareName,
    /// The version field does not match.
    BadVersion,
    /// The recorded sizes are inconsistent.
    BadSizes,
}

impl StaticConfigError {
    fn message(self) -> String {
        match self {
            Self::BadFile(e) => format!("static header: could not read block 0 ({e})"),
            Self::BadSoftwareName => "static header: bad software name".to_owned(),
            Self::BadVersion => "static header: bad version".to_owned(),
            Self::BadSizes => "static header: bad block/extent sizes".to_owned(),
        }
    }
}

/// Outcome of the static-header phase.
#[derive(Debug, Default)]
pub struct StaticCheckErrors {
    /// Fatal rejection, if any.
    pub error: Option<StaticConfigError>,
    /// File size is not a whole number of extents (survivable).
    pub extent_misaligned: bool,
}

impl StaticCheckErrors {
    /// Convert to diagnostics.
    pub fn report(&self, scope: &Scope, out: &mut Report) {
        if let Some(err) = self.error {
            out.error(scope.clone(), err.message());
        }
        if self.extent_misaligned {
            out.warning(
                scope.clone(),
                "file size is not a multiple of the extent size",
            );
        }
    }
}

/// Validate block 0 and learn the file's geometry. Returns false when the
/// rest of the file cannot be interpreted.
///
/// `allow_version_mismatch` tolerates a wrong version string: the
/// flag-extraction mode only needs the geometry fields, which do not
/// depend on the version matching.
pub fn check_static_config(
    file: &dyn CheckFile,
    knog: &mut FileKnowledge,
    allow_version_mismatch: bool,
    errs: &mut StaticCheckErrors,
) -> bool {
    let buf = match read_raw(file, DEVICE_BLOCK_SIZE as usize, 0) {
        Ok(buf) => buf,
        Err(e) => {
            errs.error = Some(StaticConfigError::BadFile(e));
            return false;
        }
    };
    // The buffer is a full device block; parse cannot run out of bytes.
    let header = match StaticHeader::parse(&buf) {
        Ok(h) => h,
        Err(_) => {
            errs.error = Some(StaticConfigError::BadFile(RawBlockError::ShortRead));
            return false;
        }
    };

    let block_size = header.config.block_size.ser();
    let extent_size = header.config.extent_size;
    let file_size = *knog.filesize.expect();
    debug!(
        file = %knog.filename,
        software_name = %header.software_name_str(),
        version = %header.version_str(),
        block_size = block_size,
        extent_size = extent_size,
        file_size = file_size,
        "pre-scanned static header"
    );

    if !header.software_name_ok() {
        errs.error = Some(StaticConfigError::BadSoftwareName);
        return false;
    }
    if !header.version_ok() && !allow_version_mismatch {
        errs.error = Some(StaticConfigError::BadVersion);
        return false;
    }
    if !(u64::from(block_size) > 0
        && u64::from(block_size) % DEVICE_BLOCK_SIZE == 0
        && extent_size > 0
        && extent_size % u64::from(block_size) == 0)
    {
        errs.error = Some(StaticConfigError::BadSizes);
        return false;
    }
    if file_size % extent_size != 0 {
        errs.extent_misaligned = true;
    }

    knog.static_config.learn(header.config);
    true
}

/// The pre-scan summary line for a file whose header was accepted.
pub fn prescan_info(knog: &FileKnowledge, scope: &Scope, out: &mut Report) {
    let cfg = knog.static_config.expect();
    out.push(
        Severity::Info,
        scope.clone(),
        format!(
            "static header: block_size={} extent_size={} file_size={}",
            cfg.block_size,
            cfg.extent_size,
            knog.filesize.expect()
        ),
    );
}

#[cfg(test)]
mod tests {
    use fstore_layout::static_header::{StaticConfig, StaticHeader};
    use fstore_types::BlockSize;
    use fstore_vfs::MemoryFile;

    use super::*;

    fn image(block_size: u32, extent_size: u64, file_size: usize) -> Vec<u8> {
        let mut bytes = vec![0u8; file_size];
        StaticHeader::current(StaticConfig {
            block_size: BlockSize::from_ser(block_size),
            extent_size,
        })
        .write(&mut bytes);
        bytes
    }

    fn run(bytes: Vec<u8>) -> (bool, StaticCheckErrors, FileKnowledge) {
        let file = MemoryFile::new(bytes);
        let mut knog = FileKnowledge::new("t");
        knog.filesize.learn(file.size());
        let mut errs = StaticCheckErrors::default();
        let ok = check_static_config(&file, &mut knog, false, &mut errs);
        (ok, errs, knog)
    }

    #[test]
    fn good_header_learns_config() {
        let (ok, errs, knog) = run(image(4096, 8 * 4096, 8 * 4096));
        assert!(ok);
        assert!(errs.error.is_none());
        assert!(!errs.extent_misaligned);
        assert_eq!(knog.block_size().ser(), 4096);
        assert_eq!(knog.extent_size(), 8 * 4096);
    }

    #[test]
    fn flipped_software_name_rejected() {
        let mut bytes = image(4096, 8 * 4096, 8 * 4096);
        bytes[0] ^= 0x01;
        let (ok, errs, knog) = run(bytes);
        assert!(!ok);
        assert_eq!(errs.error, Some(StaticConfigError::BadSoftwareName));
        assert!(!knog.static_config.is_known());
    }

    #[test]
    fn bad_version_rejected() {
        let mut bytes = image(4096, 8 * 4096, 8 * 4096);
        bytes[17] = b'9';
        let (ok, errs, _) = run(bytes);
        assert!(!ok);
        assert_eq!(errs.error, Some(StaticConfigError::BadVersion));
    }

    #[test]
    fn version_mismatch_tolerated_when_allowed() {
        let mut bytes = image(4096, 8 * 4096, 8 * 4096);
        bytes[17] = b'9';

        let file = MemoryFile::new(bytes);
        let mut knog = FileKnowledge::new("t");
        knog.filesize.learn(file.size());
        let mut errs = StaticCheckErrors::default();
        assert!(check_static_config(&file, &mut knog, true, &mut errs));
        assert!(errs.error.is_none());
        // The geometry was still learned.
        assert_eq!(knog.block_size().ser(), 4096);
    }

    #[test]
    fn size_rules_enforced() {
        // block size not a device-block multiple
        let (ok, errs, _) = run(image(1000, 8000, 8000));
        assert!(!ok);
        assert_eq!(errs.error, Some(StaticConfigError::BadSizes));

        // extent size not a block-size multiple
        let (ok, errs, _) = run(image(4096, 4096 + 512, 8 * 4096));
        assert!(!ok);
        assert_eq!(errs.error, Some(StaticConfigError::BadSizes));

        // zero sizes
        let (ok, errs, _) = run(image(0, 8 * 4096, 8 * 4096));
        assert!(!ok);
        assert_eq!(errs.error, Some(StaticConfigError::BadSizes));
    }

    #[test]
    fn misaligned_file_size_is_a_warning_only() {
        let (ok, errs, _) = run(image(4096, 8 * 4096, 9 * 4096));
        assert!(ok);
        assert!(errs.error.is_none());
        assert!(errs.extent_misaligned);

        let mut report = Report::default();
        errs.report(
            &Scope::File {
                file: "t".into(),
            },
            &mut report,
        );
        assert!(!report.has_errors());
        assert_eq!(report.count(Severity::Warning), 1);
    }

    #[test]
    fn unreadable_block_zero() {
        let (ok, errs, _) = run(vec![0u8; 100]);
        assert!(!ok);
        assert!(matches!(errs.error, Some(StaticConfigError::BadFile(_))));
    }
}
