//! Prebuild Patcher: a prebuild gate that adapts one vendored C source file
//! before it is compiled.
//!
//! The engine locates the target among candidate paths, skips it when a
//! completion marker shows the adaptation is already there, and otherwise
//! rewrites it under a scoped backup. New content is staged next to the
//! target, verified, renamed into place, and verified again; any failure
//! restores the original bytes. A one-line record tells the downstream
//! build step that the tree is ready.
//!
//! # Safety
//!
//! - Reference files are loaded before any target is touched
//! - Ambiguous pattern or anchor matches are refused, never guessed
//! - Atomic file writes (tempfile + fsync + rename)
//! - Byte-exact rollback checked by hash
//! - Idempotent runs
//!
//! # Example
//!
//! ```no_run
//! use prebuild_patcher::{load_builtin, PatchEngine, Reporter};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = load_builtin()?;
//! let engine = PatchEngine::new(&config, "/path/to/package");
//! let summary = engine.run_gate(&Reporter::new("/path/to/work"))?;
//! println!("{}", summary.report);
//! # Ok(())
//! # }
//! ```

pub mod atomic;
pub mod backup;
pub mod config;
pub mod engine;
pub mod error;
pub mod locate;
pub mod marker;
pub mod report;
pub mod safety;
pub mod strategy;

// Re-exports
pub use backup::{with_backup, Backup};
pub use config::{
    load_builtin, load_from_path, load_from_str, ConfigError, PatchConfig, StrategyConfig,
};
pub use engine::{
    ApplicationOutcome, CheckStatus, Deadline, FileOutcome, PatchEngine, RunSummary,
};
pub use error::{GateError, PatchError};
pub use locate::PatchTarget;
pub use marker::{MarkerSet, PostCondition, Verifier};
pub use report::{PatchReport, Reporter, RECORD_FILE};
pub use safety::{RootGuard, SafetyError};
pub use strategy::{AnchorWrap, AppliedVia, RegexRewrite, Strategy};
