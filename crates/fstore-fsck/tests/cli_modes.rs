//! The version- and flag-extraction inspection modes.

mod common;

use std::sync::Arc;

use common::{errors, inputs};
use fstore_fsck::check::{extract_creation_flags, extract_version};
use fstore_fsck::{check_files, CheckConfig, InputFile};
use fstore_harness::StoreBuilder;
use fstore_vfs::MemoryFile;

fn basic_store() -> StoreBuilder {
    let mut b = StoreBuilder::new();
    b.insert(b"a", b"1").insert(b"b", b"2");
    b
}

fn two_file_store() -> StoreBuilder {
    let mut b = StoreBuilder::new();
    b.n_files = 2;
    b.n_proxies = 2;
    for i in 0..6u8 {
        b.insert(&[b'k', i], &[i]);
    }
    b
}

#[test]
fn version_is_read_from_the_static_header() {
    let files = inputs(&basic_store().build());
    assert_eq!(extract_version(&*files[0].file).as_deref(), Some("0.4"));
}

#[test]
fn version_extraction_fails_on_a_truncated_file() {
    let file = MemoryFile::new(vec![0u8; 100]);
    assert_eq!(extract_version(&file), None);
}

#[test]
fn creation_flags_reconstruct_the_geometry() {
    let files = inputs(&basic_store().build());
    let flags = extract_creation_flags(&files, None).unwrap();
    assert_eq!(
        flags,
        "--block-size 4096 --extent-size 524288 --slices 1 --diff-log-size 1"
    );
}

#[test]
fn creation_flags_tolerate_a_version_mismatch() {
    let b = basic_store();
    let mut files = b.build();
    files[0].bytes[17] = b'9';
    let files = inputs(&files);

    // The regular check refuses the file outright…
    let report = check_files(&files, None, &CheckConfig::default());
    assert!(errors(&report)
        .iter()
        .any(|d| d.message.contains("bad version")));

    // …but the geometry does not depend on the version string, so the
    // flag-extraction mode still works.
    let flags = extract_creation_flags(&files, None).unwrap();
    assert!(flags.contains("--block-size 4096"));
    assert!(flags.contains("--slices 1"));
}

#[test]
fn creation_flags_refuse_a_corrupt_second_file() {
    let b = two_file_store();
    let mut files = b.build();
    // Damage file 1's software name; file 0 alone is not enough.
    files[1].bytes[3] ^= 0x20;

    assert_eq!(extract_creation_flags(&inputs(&files), None), None);
}

#[test]
fn creation_flags_refuse_disagreeing_files() {
    let b = two_file_store();
    let mut files = b.build();
    // Perturb file 1's creation timestamp: both files pass their own
    // pre-config phases but the cross-check fails.
    let off = b.extent_size as usize + 16 + 8;
    files[1].bytes[off] ^= 0xFF;

    assert_eq!(extract_creation_flags(&inputs(&files), None), None);
}

#[test]
fn creation_flags_include_the_metadata_file_in_the_check() {
    let b = basic_store();
    let data = inputs(&b.build());
    let mut meta_image = b.build_metadata();

    let good_meta = InputFile::new(
        meta_image.name.clone(),
        Arc::new(MemoryFile::new(meta_image.bytes.clone())),
    );
    assert!(extract_creation_flags(&data, Some(&good_meta)).is_some());

    // A damaged metadata file blocks extraction too.
    meta_image.bytes[3] ^= 0x20;
    let bad_meta = InputFile::new(meta_image.name, Arc::new(MemoryFile::new(meta_image.bytes)));
    assert_eq!(extract_creation_flags(&data, Some(&bad_meta)), None);
}
