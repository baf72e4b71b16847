use crate::engine::RunSummary;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Fatal conditions raised while patching a target.
///
/// "No sources present" is not an error: it is reported through
/// [`PatchReport::sources_absent`](crate::report::PatchReport).
#[derive(Error, Debug)]
pub enum PatchError {
    #[error("Reference file not found: {0}")]
    ReferenceMissing(PathBuf),

    #[error("No rewrite matched {file}: {reason}")]
    PatternMismatch { file: PathBuf, reason: String },

    #[error("Verification failed for {file}: {expected} absent after transformation")]
    VerificationFailed { file: PathBuf, expected: String },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Rollback of {file} failed: {reason}")]
    RollbackFailed { file: PathBuf, reason: String },

    #[error("Patch step exceeded its {limit:?} time budget")]
    Timeout { limit: Duration },

    #[error("Invalid rewrite pattern: {0}")]
    InvalidPattern(String),
}

impl PatchError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        PatchError::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn mismatch(file: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        PatchError::PatternMismatch {
            file: file.into(),
            reason: reason.into(),
        }
    }
}

/// Why the prebuild gate did not publish a record.
#[derive(Error, Debug)]
pub enum GateError {
    #[error("{failed} of {total} target file(s) failed to patch")]
    TargetsFailed {
        summary: RunSummary,
        failed: usize,
        total: usize,
    },

    /// Every target succeeded but the record could not be written
    #[error("targets patched but the completion record was not written: {source}")]
    Publish {
        summary: RunSummary,
        #[source]
        source: PatchError,
    },

    #[error(transparent)]
    Patch(#[from] PatchError),
}

impl From<regex::Error> for PatchError {
    fn from(e: regex::Error) -> Self {
        PatchError::InvalidPattern(e.to_string())
    }
}
