use crate::safety::{RootGuard, SafetyError};
use std::path::PathBuf;
use tracing::{debug, info, warn};

/// Where the vendored file might live: a package root plus candidate
/// relative paths. Every candidate that exists is a separate target.
#[derive(Debug, Clone)]
pub struct PatchTarget {
    pub root: PathBuf,
    pub candidates: Vec<String>,
}

impl PatchTarget {
    pub fn new(root: impl Into<PathBuf>, candidates: Vec<String>) -> Self {
        Self {
            root: root.into(),
            candidates,
        }
    }

    /// Resolve the candidates that exist as regular files.
    ///
    /// Never fails: an empty result means "no sources to patch". Candidates
    /// escaping the root are dropped with a warning, and two candidates that
    /// resolve to the same file yield it once.
    pub fn resolve(&self) -> Vec<PathBuf> {
        let guard = match RootGuard::new(&self.root) {
            Ok(guard) => guard,
            Err(e) => {
                warn!(root = %self.root.display(), error = %e, "package root not accessible");
                return Vec::new();
            }
        };

        let mut found: Vec<PathBuf> = Vec::new();
        for candidate in &self.candidates {
            match guard.resolve(candidate) {
                Ok(path) if path.is_file() => {
                    if found.contains(&path) {
                        debug!(candidate = %candidate, "duplicate of an earlier candidate");
                        continue;
                    }
                    info!(candidate = %candidate, "found");
                    found.push(path);
                }
                Ok(_) => debug!(candidate = %candidate, "not a regular file"),
                Err(SafetyError::Canonicalize(_)) => debug!(candidate = %candidate, "absent"),
                Err(e) => warn!(
                    root = %guard.root().display(),
                    candidate = %candidate,
                    error = %e,
                    "candidate rejected"
                ),
            }
        }
        found
    }
}
