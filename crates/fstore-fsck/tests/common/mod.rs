//! Shared plumbing for the end-to-end checker tests.
#![allow(dead_code)] // each test binary uses its own subset

use std::sync::Arc;

use fstore_fsck::{check_files, CheckConfig, Diagnostic, InputFile, Report, Severity};
use fstore_harness::{StoreBuilder, StoreFile};
use fstore_vfs::MemoryFile;

/// Wrap built images as checker inputs.
pub fn inputs(files: &[StoreFile]) -> Vec<InputFile> {
    files
        .iter()
        .map(|f| InputFile::new(f.name.clone(), Arc::new(MemoryFile::new(f.bytes.clone()))))
        .collect()
}

/// Build and check a store with the default config.
pub fn check(builder: &StoreBuilder) -> Report {
    let files = inputs(&builder.build());
    check_files(&files, None, &CheckConfig::default())
}

/// The error-severity findings of a report.
pub fn errors(report: &Report) -> Vec<&Diagnostic> {
    report
        .diagnostics
        .iter()
        .filter(|d| d.severity == Severity::Error)
        .collect()
}

/// The warning-severity findings of a report.
pub fn warnings(report: &Report) -> Vec<&Diagnostic> {
    report
        .diagnostics
        .iter()
        .filter(|d| d.severity == Severity::Warning)
        .collect()
}

/// Assert a report is completely clean (no errors, no warnings).
#[track_caller]
pub fn assert_clean(report: &Report) {
    assert!(
        errors(report).is_empty() && warnings(report).is_empty(),
        "expected a clean report, got:\n{}",
        report
            .diagnostics
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("\n")
    );
}
