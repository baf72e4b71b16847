//! Scoped physical backups of a single target file.
//!
//! A [`Backup`] owns a full byte copy of the target taken before any
//! transformation. [`with_backup`] runs a fallible body against it and
//! guarantees one of two exits: the backup is discarded after success, or
//! the original bytes are put back (and checked by hash) after failure.

use crate::atomic::atomic_write;
use crate::error::PatchError;
use filetime::FileTime;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use xxhash_rust::xxh3::xxh3_64;

/// Suffix appended to the target's file name for the on-disk copy.
pub const BACKUP_SUFFIX: &str = ".prebuild.bak";

/// Location of the backup copy for `path`.
pub fn backup_path(path: &Path) -> PathBuf {
    let mut name: OsString = path.file_name().map(OsString::from).unwrap_or_default();
    name.push(BACKUP_SUFFIX);
    path.with_file_name(name)
}

/// Remove a backup left behind by an interrupted run.
///
/// Only called once the live file has been judged authoritative.
pub fn remove_stray(path: &Path) -> Result<bool, PatchError> {
    let stray = backup_path(path);
    if !stray.exists() {
        return Ok(false);
    }
    warn!(backup = %stray.display(), "removing stale backup from an interrupted run");
    fs::remove_file(&stray).map_err(|e| PatchError::io(&stray, e))?;
    Ok(true)
}

#[derive(Debug)]
pub struct Backup {
    target: PathBuf,
    copy: PathBuf,
    original: Vec<u8>,
    hash: u64,
    mtime: FileTime,
    settled: bool,
}

impl Backup {
    /// Read the target and write a physical copy beside it.
    ///
    /// A leftover copy from a crashed run is overwritten: the live file, not
    /// the stale copy, is what gets protected.
    pub fn create(target: &Path) -> Result<Self, PatchError> {
        let original = fs::read(target).map_err(|e| PatchError::io(target, e))?;
        let meta = fs::metadata(target).map_err(|e| PatchError::io(target, e))?;
        let copy = backup_path(target);

        if copy.exists() {
            warn!(backup = %copy.display(), "overwriting stale backup from an interrupted run");
        }
        fs::copy(target, &copy).map_err(|e| PatchError::io(&copy, e))?;
        debug!(target = %target.display(), backup = %copy.display(), "backup created");

        Ok(Self {
            target: target.to_path_buf(),
            copy,
            hash: xxh3_64(&original),
            original,
            mtime: FileTime::from_last_modification_time(&meta),
            settled: false,
        })
    }

    pub fn original(&self) -> &[u8] {
        &self.original
    }

    pub fn path(&self) -> &Path {
        &self.copy
    }

    /// Drop the copy without touching the target.
    pub fn discard(mut self) -> Result<(), PatchError> {
        self.settled = true;
        fs::remove_file(&self.copy).map_err(|e| PatchError::io(&self.copy, e))
    }

    /// Put the original bytes back and remove the copy.
    ///
    /// When the target still hashes to the original (nothing was committed)
    /// no write happens; the file is only confirmed untouched.
    pub fn restore(mut self) -> Result<(), PatchError> {
        self.settled = true;
        self.restore_inner()
    }

    fn restore_inner(&self) -> Result<(), PatchError> {
        let current = fs::read(&self.target).ok();
        if current.as_deref().map(xxh3_64) == Some(self.hash) {
            debug!(target = %self.target.display(), "target untouched, nothing to restore");
        } else {
            let bytes = self.source_bytes();
            atomic_write(&self.target, &bytes).map_err(|e| PatchError::io(&self.target, e))?;
            filetime::set_file_mtime(&self.target, self.mtime)
                .map_err(|e| PatchError::io(&self.target, e))?;

            let after = fs::read(&self.target).map_err(|e| PatchError::io(&self.target, e))?;
            if xxh3_64(&after) != self.hash {
                return Err(PatchError::RollbackFailed {
                    file: self.target.clone(),
                    reason: "restored bytes differ from original".to_string(),
                });
            }
            warn!(target = %self.target.display(), "original content restored");
        }

        fs::remove_file(&self.copy).map_err(|e| PatchError::io(&self.copy, e))
    }

    /// Prefer the on-disk copy; fall back to memory if it went missing or
    /// no longer matches.
    fn source_bytes(&self) -> Vec<u8> {
        match fs::read(&self.copy) {
            Ok(bytes) if xxh3_64(&bytes) == self.hash => bytes,
            _ => {
                warn!(backup = %self.copy.display(), "backup copy unusable, restoring from memory");
                self.original.clone()
            }
        }
    }
}

impl Drop for Backup {
    fn drop(&mut self) {
        if !self.settled {
            if let Err(e) = self.restore_inner() {
                warn!(target = %self.target.display(), error = %e, "restore on drop failed");
            }
        }
    }
}

/// Run `body` with a backup of `path` held for its duration.
///
/// On `Err` from `body` the original is restored before the error is
/// returned. If the restore itself fails, that error wins: the caller must
/// know the tree is inconsistent. After `Ok`, failing to remove the copy is
/// only logged.
pub fn with_backup<T, F>(path: &Path, body: F) -> Result<T, PatchError>
where
    F: FnOnce(&Backup) -> Result<T, PatchError>,
{
    let backup = Backup::create(path)?;

    match body(&backup) {
        Ok(value) => {
            // The change is committed; a leftover copy is a stray for the next run
            if let Err(e) = backup.discard() {
                warn!(
                    target = %path.display(),
                    error = %e,
                    "patch committed but backup not removed"
                );
            }
            Ok(value)
        }
        Err(err) => {
            backup.restore()?;
            Err(err)
        }
    }
}
