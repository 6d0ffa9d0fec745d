//! The diagnostic stream the checker produces.
//!
//! Every finding is a [`Diagnostic`]: a severity, a scope naming the file
//! and (post-config) slice it belongs to, and a message. The run exits
//! clean iff no [`Severity::Error`] record was produced.

use std::fmt;

use serde::{Deserialize, Serialize};

/// How bad a finding is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Severity {
    /// Context a human wants, harmless for the verdict.
    Info,
    /// Suspicious but survivable (exit stays clean).
    Warning,
    /// The file violates an on-disk invariant.
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Info => "INFO",
            Self::Warning => "WARNING",
            Self::Error => "ERROR",
        })
    }
}

/// Which slice a post-config finding belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SliceId {
    /// A data slice, by global slice number.
    Data(u32),
    /// The metadata file's slice.
    Metadata,
}

/// Where in the database a finding was made.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Scope {
    /// The database as a whole (interfile findings).
    Database,
    /// One file, before slices exist.
    File { file: String },
    /// One slice of one file.
    Slice { file: String, slice: SliceId },
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Database => Ok(()),
            Self::File { file } => write!(f, "(in file '{file}')"),
            Self::Slice {
                file,
                slice: SliceId::Data(n),
            } => write!(f, "(slice {n}, file '{file}')"),
            Self::Slice {
                file,
                slice: SliceId::Metadata,
            } => write!(f, "(metadata slice, file '{file}')"),
        }
    }
}

/// One finding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    /// How bad it is.
    pub severity: Severity,
    /// Where it was found.
    pub scope: Scope,
    /// What was found.
    pub message: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.scope {
            Scope::Database => write!(f, "{} {}", self.severity, self.message),
            scope => write!(f, "{} {} {}", self.severity, scope, self.message),
        }
    }
}

/// The accumulated findings of one run.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Report {
    /// Every finding, in discovery order.
    pub diagnostics: Vec<Diagnostic>,
}

impl Report {
    /// Append a finding.
    pub fn push(&mut self, severity: Severity, scope: Scope, message: impl Into<String>) {
        self.diagnostics.push(Diagnostic {
            severity,
            scope,
            message: message.into(),
        });
    }

    /// Append an error.
    pub fn error(&mut self, scope: Scope, message: impl Into<String>) {
        self.push(Severity::Error, scope, message);
    }

    /// Append a warning.
    pub fn warning(&mut self, scope: Scope, message: impl Into<String>) {
        self.push(Severity::Warning, scope, message);
    }

    /// Append an info line.
    pub fn info(&mut self, scope: Scope, message: impl Into<String>) {
        self.push(Severity::Info, scope, message);
    }

    /// Whether any error-severity finding exists.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.diagnostics
            .iter()
            .any(|d| d.severity == Severity::Error)
    }

    /// Count findings of a given severity.
    #[must_use]
    pub fn count(&self, severity: Severity) -> usize {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == severity)
            .count()
    }
}
