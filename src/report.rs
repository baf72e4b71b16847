//! The run's completion record.
//!
//! The record is the hand-off to the downstream compile step: a single line
//! in `patch_applied.marker` in the report directory. Inside one run the
//! [`PatchReport`] value is authoritative; the file is only its
//! serialization. A run removes any previous record before it starts, so a
//! fatal run leaves no record behind.

use crate::atomic::atomic_write;
use crate::error::PatchError;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::debug;

pub const RECORD_FILE: &str = "patch_applied.marker";

const SKIPPED_NO_SOURCES: &str = "skipped_no_sources";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PatchReport {
    pub patched: usize,
    pub already_patched: usize,
    pub sources_absent: bool,
}

impl PatchReport {
    pub fn no_sources() -> Self {
        Self {
            sources_absent: true,
            ..Self::default()
        }
    }
}

impl fmt::Display for PatchReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.sources_absent {
            write!(f, "{SKIPPED_NO_SOURCES}")
        } else {
            write!(
                f,
                "patched={},already={}",
                self.patched, self.already_patched
            )
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseReportError(String);

impl fmt::Display for ParseReportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "malformed patch record: {:?}", self.0)
    }
}

impl std::error::Error for ParseReportError {}

impl FromStr for PatchReport {
    type Err = ParseReportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s == SKIPPED_NO_SOURCES {
            return Ok(Self::no_sources());
        }

        let malformed = || ParseReportError(s.to_string());
        let (patched, already) = s.split_once(',').ok_or_else(malformed)?;
        let patched = patched
            .strip_prefix("patched=")
            .and_then(|n| n.parse().ok())
            .ok_or_else(malformed)?;
        let already_patched = already
            .strip_prefix("already=")
            .and_then(|n| n.parse().ok())
            .ok_or_else(malformed)?;

        Ok(Self {
            patched,
            already_patched,
            sources_absent: false,
        })
    }
}

/// Reads and writes the record in one report directory.
#[derive(Debug, Clone)]
pub struct Reporter {
    dir: PathBuf,
}

impl Reporter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn record_path(&self) -> PathBuf {
        self.dir.join(RECORD_FILE)
    }

    /// Remove any record from an earlier run.
    pub fn clear(&self) -> Result<(), PatchError> {
        let path = self.record_path();
        match fs::remove_file(&path) {
            Ok(()) => {
                debug!(record = %path.display(), "stale record removed");
                Ok(())
            }
            // Nothing to clear, including when the report dir is not a directory
            Err(_) if !path.exists() => Ok(()),
            Err(e) => Err(PatchError::io(path, e)),
        }
    }

    pub fn publish(&self, report: &PatchReport) -> Result<PathBuf, PatchError> {
        fs::create_dir_all(&self.dir).map_err(|e| PatchError::io(&self.dir, e))?;
        let path = self.record_path();
        atomic_write(&path, report.to_string().as_bytes())
            .map_err(|e| PatchError::io(&path, e))?;
        Ok(path)
    }

    /// The published report, or `None` when there is no usable record.
    pub fn read(&self) -> Option<PatchReport> {
        read_record(&self.record_path())
    }
}

fn read_record(path: &Path) -> Option<PatchReport> {
    fs::read_to_string(path).ok()?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_forms() {
        let report = PatchReport {
            patched: 2,
            already_patched: 1,
            sources_absent: false,
        };
        assert_eq!(report.to_string(), "patched=2,already=1");
        assert_eq!(PatchReport::no_sources().to_string(), "skipped_no_sources");
    }

    #[test]
    fn test_parse_record() {
        let report: PatchReport = "patched=3,already=0\n".parse().unwrap();
        assert_eq!(report.patched, 3);
        assert_eq!(report.already_patched, 0);
        assert!(!report.sources_absent);

        let skipped: PatchReport = "skipped_no_sources".parse().unwrap();
        assert!(skipped.sources_absent);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!("".parse::<PatchReport>().is_err());
        assert!("patched=x,already=1".parse::<PatchReport>().is_err());
        assert!("already=1,patched=1".parse::<PatchReport>().is_err());
    }

    #[test]
    fn test_publish_clear_read() {
        let dir = tempfile::tempdir().unwrap();
        let reporter = Reporter::new(dir.path().join("work"));

        assert!(reporter.read().is_none());
        reporter.clear().unwrap();

        let path = reporter
            .publish(&PatchReport {
                patched: 1,
                already_patched: 2,
                sources_absent: false,
            })
            .unwrap();
        assert_eq!(fs::read_to_string(path).unwrap(), "patched=1,already=2");
        assert_eq!(reporter.read().unwrap().already_patched, 2);

        reporter.clear().unwrap();
        assert!(!reporter.record_path().exists());
    }
}
