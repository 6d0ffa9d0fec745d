//! Metablock ring scan.
//!
//! Every slot in extent 0 is examined; the slot with the highest version
//! counter wins and its body becomes the file's metablock. A slot of all
//! zeroes is a never-used slot (young database), not corruption.

use fstore_layout::metablock::{metablock_offsets, CrcMetablock};
use fstore_types::limits::{DEVICE_BLOCK_SIZE, FIRST_TRANSACTION_ID, MB_START_VERSION};
use fstore_vfs::CheckFile;
use tracing::debug;

use crate::knowledge::FileKnowledge;
use crate::raw_block::read_raw;
use crate::report::{Report, Scope};

/// Slot classification counts plus ring-level verdicts.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MetablockErrors {
    /// Slots whose device block could not be read.
    pub unloadable_count: usize,
    /// Slots whose CRC does not cover their contents.
    pub bad_crc_count: usize,
    /// CRC-valid slots with damaged marker strings.
    pub bad_markers_count: usize,
    /// CRC-valid slots whose version or transaction id is impossible.
    pub bad_content_count: usize,
    /// All-zero slots.
    pub zeroed_count: usize,
    /// Total slots scanned.
    pub total_count: usize,
    /// Highest-version slot is not the highest-transaction slot.
    pub not_monotonic: bool,
    /// No slot was usable at all.
    pub no_valid_metablocks: bool,
    /// The winning slot failed to load on re-read.
    pub implausible_block_failure: bool,
}

impl MetablockErrors {
    /// Convert to diagnostics.
    pub fn report(&self, scope: &Scope, out: &mut Report) {
        if self.unloadable_count > 0 {
            out.error(
                scope.clone(),
                format!(
                    "{} of {} metablocks were unloadable",
                    self.unloadable_count, self.total_count
                ),
            );
        }
        if self.bad_crc_count > 0 {
            out.warning(
                scope.clone(),
                format!(
                    "{} of {} metablocks have bad CRC",
                    self.bad_crc_count, self.total_count
                ),
            );
        }
        if self.bad_markers_count > 0 {
            out.error(
                scope.clone(),
                format!(
                    "{} of {} metablocks have bad markers",
                    self.bad_markers_count, self.total_count
                ),
            );
        }
        if self.bad_content_count > 0 {
            out.error(
                scope.clone(),
                format!(
                    "{} of {} metablocks have bad content",
                    self.bad_content_count, self.total_count
                ),
            );
        }
        if self.zeroed_count > 0 {
            out.info(
                scope.clone(),
                format!(
                    "{} of {} metablocks uninitialized (maybe this is a new database?)",
                    self.zeroed_count, self.total_count
                ),
            );
        }
        if self.not_monotonic {
            out.warning(scope.clone(), "metablock versions not monotonic");
        }
        if self.no_valid_metablocks {
            out.error(scope.clone(), "no valid metablocks");
        }
        if self.implausible_block_failure {
            out.error(
                scope.clone(),
                "a metablock we once loaded became unloadable",
            );
        }
    }
}

/// Scan the ring and learn the winning metablock. Returns false when no
/// usable metablock exists (or the ring is structurally damaged).
pub fn check_metablock(
    file: &dyn CheckFile,
    knog: &mut FileKnowledge,
    errs: &mut MetablockErrors,
) -> bool {
    let offsets = metablock_offsets(knog.extent_size());
    errs.total_count = offsets.len();

    let mut high_version: Option<(u64, usize)> = None;
    let mut high_transaction: Option<(u64, usize)> = None;

    for (i, &off) in offsets.iter().enumerate() {
        let buf = match read_raw(file, DEVICE_BLOCK_SIZE as usize, off) {
            Ok(buf) => buf,
            Err(_) => {
                errs.unloadable_count += 1;
                continue;
            }
        };
        // A full device block always parses; classification is below.
        let Ok(slot) = CrcMetablock::parse(&buf) else {
            errs.unloadable_count += 1;
            continue;
        };

        if slot.crc_ok(&buf) {
            if !slot.markers_ok {
                errs.bad_markers_count += 1;
            }
            let version = slot.version;
            let tx = slot.metablock.transaction_id;
            if version < MB_START_VERSION || tx < FIRST_TRANSACTION_ID {
                errs.bad_content_count += 1;
            } else {
                if high_version.map_or(true, |(v, _)| v < version) {
                    high_version = Some((version, i));
                }
                if high_transaction.map_or(true, |(t, _)| t < tx) {
                    high_transaction = Some((tx, i));
                }
            }
        } else if buf.iter().all(|&b| b == 0) {
            // Bad CRC on an all-zero slot just means the ring has not
            // wrapped yet.
            errs.zeroed_count += 1;
        } else {
            errs.bad_crc_count += 1;
        }
    }

    let Some((version, winner)) = high_version else {
        errs.no_valid_metablocks = true;
        return false;
    };
    errs.not_monotonic = high_transaction.map(|(_, i)| i) != Some(winner);

    if errs.bad_markers_count != 0 || errs.bad_content_count != 0 {
        return false;
    }

    let Ok(buf) = read_raw(file, DEVICE_BLOCK_SIZE as usize, offsets[winner]) else {
        errs.implausible_block_failure = true;
        return false;
    };
    let Ok(slot) = CrcMetablock::parse(&buf) else {
        errs.implausible_block_failure = true;
        return false;
    };
    debug!(
        file = %knog.filename,
        version = version,
        transaction_id = slot.metablock.transaction_id,
        "selected metablock"
    );
    knog.metablock.learn(slot.metablock);
    true
}

#[cfg(test)]
mod tests {
    use fstore_layout::metablock::{empty_metablock, write_slot};
    use fstore_layout::static_header::StaticConfig;
    use fstore_types::BlockSize;
    use fstore_vfs::MemoryFile;

    use super::*;

    const EXTENT: u64 = 16 * 512;

    fn knog() -> FileKnowledge {
        let mut knog = FileKnowledge::new("t");
        knog.static_config.learn(StaticConfig {
            block_size: BlockSize::from_ser(512),
            extent_size: EXTENT,
        });
        knog
    }

    fn slot_bytes(version: u64, txn: u64) -> Vec<u8> {
        let mut buf = vec![0u8; 512];
        write_slot(&mut buf, version, &empty_metablock(txn));
        buf
    }

    fn image_with_slots(slots: &[(usize, Vec<u8>)]) -> Vec<u8> {
        let mut bytes = vec![0u8; EXTENT as usize];
        for (slot_index, slot) in slots {
            let off = (slot_index + 1) * 512;
            bytes[off..off + 512].copy_from_slice(slot);
        }
        bytes
    }

    #[test]
    fn highest_version_wins() {
        let image = image_with_slots(&[(0, slot_bytes(1, 5)), (1, slot_bytes(2, 9))]);
        let file = MemoryFile::new(image);
        let mut k = knog();
        let mut errs = MetablockErrors::default();
        assert!(check_metablock(&file, &mut k, &mut errs));
        assert_eq!(k.metablock.expect().transaction_id, 9);
        assert!(!errs.not_monotonic);
        assert_eq!(errs.zeroed_count, 13);
        assert_eq!(errs.total_count, 15);
    }

    #[test]
    fn non_monotonic_ring_is_a_warning_but_succeeds() {
        // Higher version carries a lower transaction id.
        let image = image_with_slots(&[(0, slot_bytes(1, 10)), (1, slot_bytes(2, 6))]);
        let file = MemoryFile::new(image);
        let mut k = knog();
        let mut errs = MetablockErrors::default();
        assert!(check_metablock(&file, &mut k, &mut errs));
        assert!(errs.not_monotonic);
        // The highest-version slot still wins.
        assert_eq!(k.metablock.expect().transaction_id, 6);

        let mut report = Report::default();
        errs.report(&Scope::File { file: "t".into() }, &mut report);
        assert!(!report.has_errors());
    }

    #[test]
    fn all_zero_ring_is_fatal() {
        let file = MemoryFile::new(vec![0u8; EXTENT as usize]);
        let mut k = knog();
        let mut errs = MetablockErrors::default();
        assert!(!check_metablock(&file, &mut k, &mut errs));
        assert!(errs.no_valid_metablocks);
        assert_eq!(errs.zeroed_count, 15);
        assert!(!k.metablock.is_known());
    }

    #[test]
    fn corrupted_slot_counts_bad_crc() {
        let mut good = slot_bytes(1, 5);
        let mut bad = slot_bytes(1, 5);
        bad[40] ^= 0xFF;
        good.truncate(512);
        let image = image_with_slots(&[(0, good), (1, bad)]);
        let file = MemoryFile::new(image);
        let mut k = knog();
        let mut errs = MetablockErrors::default();
        assert!(check_metablock(&file, &mut k, &mut errs));
        assert_eq!(errs.bad_crc_count, 1);
    }

    #[test]
    fn bad_content_is_fatal() {
        // Valid CRC, impossible transaction id.
        let image = image_with_slots(&[(0, slot_bytes(1, 0))]);
        let file = MemoryFile::new(image);
        let mut k = knog();
        let mut errs = MetablockErrors::default();
        assert!(!check_metablock(&file, &mut k, &mut errs));
        assert_eq!(errs.bad_content_count, 1);
        assert!(errs.no_valid_metablocks);
    }
}
