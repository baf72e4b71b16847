use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// A write that has landed on disk next to its target but is not yet visible
/// under the target's name.
///
/// Content is fsynced on creation. Nothing changes for other readers until
/// [`StagedWrite::commit`] renames it into place; dropping it discards it.
#[must_use = "StagedWrite does nothing until commit() is called"]
pub struct StagedWrite {
    target: PathBuf,
    temp: NamedTempFile,
}

impl StagedWrite {
    pub fn new(target: &Path, content: &[u8]) -> io::Result<Self> {
        // Same directory keeps the final rename on one filesystem
        let parent = target.parent().ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "Path has no parent directory")
        })?;

        let mut temp = NamedTempFile::new_in(parent)?;
        temp.write_all(content)?;
        temp.as_file().sync_all()?;

        // The temp file is created 0600; keep the target's mode across the rename
        if let Ok(meta) = fs::metadata(target) {
            fs::set_permissions(temp.path(), meta.permissions())?;
        }

        Ok(Self {
            target: target.to_path_buf(),
            temp,
        })
    }

    /// Re-read the staged bytes from disk.
    pub fn read_back(&self) -> io::Result<Vec<u8>> {
        fs::read(self.temp.path())
    }

    /// Atomically rename the staged file over the target.
    ///
    /// The target's mtime is bumped so incremental builds see the change.
    pub fn commit(self) -> io::Result<()> {
        self.temp.persist(&self.target).map_err(|e| e.error)?;
        filetime::set_file_mtime(&self.target, filetime::FileTime::now())?;
        Ok(())
    }
}

/// Atomic file write: tempfile + fsync + rename.
pub fn atomic_write(path: &Path, content: &[u8]) -> io::Result<()> {
    StagedWrite::new(path, content)?.commit()
}
