use std::path::{Component, Path, PathBuf};
use thiserror::Error;

/// Package-root boundary checks for candidate paths.
#[derive(Debug, Clone)]
pub struct RootGuard {
    /// Canonical package root
    root: PathBuf,
}

#[derive(Error, Debug)]
pub enum SafetyError {
    #[error("Path is outside package root: {path} (root: {root})")]
    OutsideRoot { path: PathBuf, root: PathBuf },

    #[error("Candidate path must be relative without '..' components: {0}")]
    NotRelative(PathBuf),

    #[error("Failed to canonicalize path: {0}")]
    Canonicalize(#[from] std::io::Error),
}

impl RootGuard {
    /// Create a guard for the given package root.
    ///
    /// The root is canonicalized so symlinked layouts compare correctly.
    pub fn new(root: impl AsRef<Path>) -> Result<Self, SafetyError> {
        Ok(Self {
            root: root.as_ref().canonicalize()?,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a candidate relative path to its canonical absolute form.
    ///
    /// Fails if the candidate is absolute, climbs with `..`, does not exist,
    /// or resolves (through symlinks) to somewhere outside the root.
    pub fn resolve(&self, relative: impl AsRef<Path>) -> Result<PathBuf, SafetyError> {
        let relative = relative.as_ref();
        check_relative(relative)?;

        let canonical = self.root.join(relative).canonicalize()?;
        if !canonical.starts_with(&self.root) {
            return Err(SafetyError::OutsideRoot {
                path: canonical,
                root: self.root.clone(),
            });
        }

        Ok(canonical)
    }
}

/// Reject absolute paths and parent-directory traversal.
pub fn check_relative(path: &Path) -> Result<(), SafetyError> {
    let escapes = path.components().any(|c| {
        matches!(
            c,
            Component::ParentDir | Component::RootDir | Component::Prefix(_)
        )
    });
    if escapes || path.as_os_str().is_empty() {
        return Err(SafetyError::NotRelative(path.to_path_buf()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_resolve_inside_root() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("src")).unwrap();
        fs::write(dir.path().join("src/a.c"), "int x;").unwrap();

        let guard = RootGuard::new(dir.path()).unwrap();
        let resolved = guard.resolve("src/a.c").unwrap();
        assert!(resolved.starts_with(guard.root()));
    }

    #[test]
    fn test_rejects_parent_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let guard = RootGuard::new(dir.path()).unwrap();
        assert!(matches!(
            guard.resolve("../etc/passwd"),
            Err(SafetyError::NotRelative(_))
        ));
    }

    #[test]
    fn test_rejects_absolute() {
        assert!(check_relative(Path::new("/etc/passwd")).is_err());
        assert!(check_relative(Path::new("")).is_err());
        assert!(check_relative(Path::new("src/./a.c")).is_ok());
    }

    #[test]
    fn test_missing_file_is_canonicalize_error() {
        let dir = tempfile::tempdir().unwrap();
        let guard = RootGuard::new(dir.path()).unwrap();
        assert!(matches!(
            guard.resolve("missing.c"),
            Err(SafetyError::Canonicalize(_))
        ));
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_escape_rejected() {
        let outside = tempfile::tempdir().unwrap();
        fs::write(outside.path().join("secret.c"), "int y;").unwrap();

        let dir = tempfile::tempdir().unwrap();
        std::os::unix::fs::symlink(outside.path().join("secret.c"), dir.path().join("link.c"))
            .unwrap();

        let guard = RootGuard::new(dir.path()).unwrap();
        assert!(matches!(
            guard.resolve("link.c"),
            Err(SafetyError::OutsideRoot { .. })
        ));
    }
}
