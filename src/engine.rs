//! Patch engine: locate, check, back up, transform, verify, commit.
//!
//! Targets are processed strictly one after another. A failure on one
//! target does not stop the others from being attempted, but it makes the
//! whole run fatal. A timeout is the exception: it rolls back the file in
//! flight and ends the run.

use crate::atomic::StagedWrite;
use crate::backup::{self, with_backup};
use crate::config::{PatchConfig, StrategyConfig};
use crate::error::{GateError, PatchError};
use crate::locate::PatchTarget;
use crate::marker::{decode, MarkerSet, PostCondition, Verifier};
use crate::report::{PatchReport, Reporter};
use crate::strategy::{AppliedVia, Strategy};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

/// Wall-clock budget for one run.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    started: Instant,
    limit: Option<Duration>,
}

impl Deadline {
    pub fn after(limit: Duration) -> Self {
        Self {
            started: Instant::now(),
            limit: Some(limit),
        }
    }

    pub fn unbounded() -> Self {
        Self {
            started: Instant::now(),
            limit: None,
        }
    }

    pub fn check(&self) -> Result<(), PatchError> {
        match self.limit {
            Some(limit) if self.started.elapsed() > limit => Err(PatchError::Timeout { limit }),
            _ => Ok(()),
        }
    }
}

impl Default for Deadline {
    fn default() -> Self {
        Self::unbounded()
    }
}

/// Terminal state of one target file.
#[derive(Debug)]
#[must_use = "ApplicationOutcome should be checked for failure"]
pub enum ApplicationOutcome {
    /// Already carried a completion marker
    Skipped,
    Applied(AppliedVia),
    /// Rolled back (or never written)
    Failed(PatchError),
}

impl fmt::Display for ApplicationOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApplicationOutcome::Skipped => write!(f, "already patched"),
            ApplicationOutcome::Applied(via) => write!(f, "applied via {via}"),
            ApplicationOutcome::Failed(e) => write!(f, "failed: {e}"),
        }
    }
}

#[derive(Debug)]
pub struct FileOutcome {
    pub file: PathBuf,
    pub outcome: ApplicationOutcome,
}

#[derive(Debug)]
pub struct RunSummary {
    pub outcomes: Vec<FileOutcome>,
    pub report: PatchReport,
}

impl RunSummary {
    pub fn is_fatal(&self) -> bool {
        self.failures().next().is_some()
    }

    pub fn failures(&self) -> impl Iterator<Item = (&Path, &PatchError)> {
        self.outcomes.iter().filter_map(|o| match &o.outcome {
            ApplicationOutcome::Failed(e) => Some((o.file.as_path(), e)),
            _ => None,
        })
    }
}

/// Read-only view of what a run would do to one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckStatus {
    AlreadyPatched,
    WouldApply(AppliedVia),
    WouldFail(String),
}

pub struct PatchEngine<V = PostCondition> {
    target: PatchTarget,
    markers: MarkerSet,
    strategy: StrategyConfig,
    verifier: V,
    deadline: Deadline,
}

impl PatchEngine<PostCondition> {
    /// Build an engine for `config` rooted at `root`.
    ///
    /// Strategy resources (the reference file, compiled patterns) are not
    /// loaded here but at the start of each run, once it is known that there
    /// is something to patch.
    pub fn new(config: &PatchConfig, root: impl Into<PathBuf>) -> Self {
        let markers = config
            .markers
            .legacy
            .iter()
            .fold(MarkerSet::new(&config.markers.completion), |set, legacy| {
                set.with_legacy(legacy.as_str())
            });
        let verifier = PostCondition::new(markers.clone(), config.markers.required.clone());

        Self {
            target: PatchTarget::new(root, config.target.candidates.clone()),
            markers,
            strategy: config.strategy.clone(),
            verifier,
            deadline: Deadline::unbounded(),
        }
    }
}

impl<V: Verifier> PatchEngine<V> {
    /// Replace the post-condition check.
    pub fn with_verifier<W: Verifier>(self, verifier: W) -> PatchEngine<W> {
        PatchEngine {
            target: self.target,
            markers: self.markers,
            strategy: self.strategy,
            verifier,
            deadline: self.deadline,
        }
    }

    pub fn with_deadline(mut self, deadline: Deadline) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn root(&self) -> &Path {
        &self.target.root
    }

    /// Candidate files that exist right now.
    pub fn locate(&self) -> Vec<PathBuf> {
        self.target.resolve()
    }

    /// Run the engine, clear the previous record first, and publish the new
    /// one only when every target ended `Skipped` or `Applied`.
    ///
    /// [`GateError::Publish`] means targets may already be patched on disk.
    pub fn run_gate(&self, reporter: &Reporter) -> Result<RunSummary, GateError> {
        reporter.clear()?;

        let summary = self.run()?;
        if summary.is_fatal() {
            let failed = summary.failures().count();
            let total = summary.outcomes.len();
            return Err(GateError::TargetsFailed {
                summary,
                failed,
                total,
            });
        }

        let record = match reporter.publish(&summary.report) {
            Ok(record) => record,
            Err(source) => return Err(GateError::Publish { summary, source }),
        };
        info!(record = %record.display(), report = %summary.report, "record published");
        Ok(summary)
    }

    /// Process every located candidate.
    ///
    /// `Err` is returned only for conditions found before any target is
    /// touched, such as a missing reference file.
    pub fn run(&self) -> Result<RunSummary, PatchError> {
        let files = self.target.resolve();
        if files.is_empty() {
            warn!(
                root = %self.target.root.display(),
                "no candidate source present, nothing to patch"
            );
            return Ok(RunSummary {
                outcomes: Vec::new(),
                report: PatchReport::no_sources(),
            });
        }

        let strategy = Strategy::prepare(&self.strategy, &self.target.root)?;
        info!(
            strategy = self.strategy.label(),
            targets = files.len(),
            "applying patch"
        );

        let mut report = PatchReport::default();
        let mut outcomes = Vec::with_capacity(files.len());

        for file in files {
            let outcome = match self.deadline.check() {
                Ok(()) => self.process(&strategy, &file),
                Err(e) => ApplicationOutcome::Failed(e),
            };

            match &outcome {
                ApplicationOutcome::Skipped => report.already_patched += 1,
                ApplicationOutcome::Applied(_) => report.patched += 1,
                ApplicationOutcome::Failed(e) => {
                    error!(file = %file.display(), error = %e, "patch failed")
                }
            }

            let timed_out = matches!(
                &outcome,
                ApplicationOutcome::Failed(PatchError::Timeout { .. })
            );
            outcomes.push(FileOutcome { file, outcome });
            if timed_out {
                break;
            }
        }

        Ok(RunSummary { outcomes, report })
    }

    /// Report what a run would do without writing anything.
    pub fn check(&self) -> Result<Vec<(PathBuf, CheckStatus)>, PatchError> {
        let files = self.target.resolve();
        if files.is_empty() {
            return Ok(Vec::new());
        }
        let strategy = Strategy::prepare(&self.strategy, &self.target.root)?;

        Ok(files
            .into_iter()
            .map(|file| {
                let status = self.check_one(&strategy, &file);
                (file, status)
            })
            .collect())
    }

    fn check_one(&self, strategy: &Strategy, file: &Path) -> CheckStatus {
        let content = match fs::read(file) {
            Ok(content) => content,
            Err(e) => return CheckStatus::WouldFail(e.to_string()),
        };
        if self.markers.is_patched_bytes(&content) {
            return CheckStatus::AlreadyPatched;
        }
        match strategy.transform(file, &content) {
            Ok(t) if self.verifier.is_satisfied(&decode(&t.content)) => {
                CheckStatus::WouldApply(t.via)
            }
            Ok(_) => CheckStatus::WouldFail(format!(
                "{} absent after transformation",
                self.verifier.expectation()
            )),
            Err(e) => CheckStatus::WouldFail(e.to_string()),
        }
    }

    fn process(&self, strategy: &Strategy, file: &Path) -> ApplicationOutcome {
        info!(file = %file.display(), "processing");

        let content = match fs::read(file) {
            Ok(content) => content,
            Err(e) => return ApplicationOutcome::Failed(PatchError::io(file, e)),
        };

        // The live file decides; a leftover backup never does
        if self.markers.is_patched_bytes(&content) {
            info!(file = %file.display(), "already patched, skipping");
            if let Err(e) = backup::remove_stray(file) {
                warn!(file = %file.display(), error = %e, "could not remove stale backup");
            }
            return ApplicationOutcome::Skipped;
        }

        match self.apply(strategy, file) {
            Ok(via) => {
                info!(file = %file.display(), via = %via, "patch applied and verified");
                ApplicationOutcome::Applied(via)
            }
            Err(e) => ApplicationOutcome::Failed(e),
        }
    }

    fn apply(&self, strategy: &Strategy, file: &Path) -> Result<AppliedVia, PatchError> {
        with_backup(file, |backup| {
            let transformed = strategy.transform(file, backup.original())?;
            self.deadline.check()?;

            let staged =
                StagedWrite::new(file, &transformed.content).map_err(|e| PatchError::io(file, e))?;
            let staged_bytes = staged.read_back().map_err(|e| PatchError::io(file, e))?;
            self.verify(file, &staged_bytes)?;

            staged.commit().map_err(|e| PatchError::io(file, e))?;

            // Re-read under the real name; a failure here is rolled back
            let committed = fs::read(file).map_err(|e| PatchError::io(file, e))?;
            self.verify(file, &committed)?;

            Ok(transformed.via)
        })
    }

    fn verify(&self, file: &Path, content: &[u8]) -> Result<(), PatchError> {
        if self.verifier.is_satisfied(&decode(content)) {
            Ok(())
        } else {
            Err(PatchError::VerificationFailed {
                file: file.to_path_buf(),
                expected: self.verifier.expectation(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{MarkerConfig, Metadata, TargetConfig};
    use filetime::FileTime;
    use std::cell::Cell;

    fn config(strategy: StrategyConfig) -> PatchConfig {
        PatchConfig {
            meta: Metadata::default(),
            target: TargetConfig {
                candidates: vec!["src/a.c".to_string()],
            },
            markers: MarkerConfig {
                completion: "PATCHED".to_string(),
                legacy: vec!["OLD PATCH".to_string()],
                required: None,
            },
            strategy,
        }
    }

    fn regex_strategy() -> StrategyConfig {
        StrategyConfig::RegexRewrite {
            pattern: r"assert\(x\);".to_string(),
            replacement: "/* PATCHED */".to_string(),
            fallback: None,
        }
    }

    fn workspace(content: &str) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("src")).unwrap();
        fs::write(dir.path().join("src/a.c"), content).unwrap();
        dir
    }

    /// Accepts the staged content, rejects the committed file.
    struct PassOnce(Cell<bool>);

    impl Verifier for PassOnce {
        fn is_satisfied(&self, _: &str) -> bool {
            !self.0.replace(true)
        }

        fn expectation(&self) -> String {
            "marker on the second read".to_string()
        }
    }

    struct Never;

    impl Verifier for Never {
        fn is_satisfied(&self, _: &str) -> bool {
            false
        }

        fn expectation(&self) -> String {
            "nothing".to_string()
        }
    }

    #[test]
    fn test_deadline() {
        assert!(Deadline::unbounded().check().is_ok());
        assert!(Deadline::after(Duration::from_secs(60)).check().is_ok());
        let expired = Deadline::after(Duration::ZERO);
        std::thread::sleep(Duration::from_millis(2));
        assert!(matches!(expired.check(), Err(PatchError::Timeout { .. })));
    }

    #[test]
    fn test_run_applies_then_skips() {
        let dir = workspace("int f() { assert(x); }\n");
        let engine = PatchEngine::new(&config(regex_strategy()), dir.path());

        let first = engine.run().unwrap();
        assert_eq!(first.report.patched, 1);
        assert!(matches!(
            first.outcomes[0].outcome,
            ApplicationOutcome::Applied(AppliedVia::PrimaryPattern)
        ));

        let second = engine.run().unwrap();
        assert_eq!(second.report.patched, 0);
        assert_eq!(second.report.already_patched, 1);
    }

    #[test]
    fn test_legacy_marker_skips() {
        let dir = workspace("/* OLD PATCH */ assert(x);\n");
        let engine = PatchEngine::new(&config(regex_strategy()), dir.path());
        let summary = engine.run().unwrap();
        assert!(matches!(
            summary.outcomes[0].outcome,
            ApplicationOutcome::Skipped
        ));
    }

    #[test]
    fn test_verification_failure_rolls_back() {
        let dir = workspace("int f() { assert(x); }\n");
        let engine =
            PatchEngine::new(&config(regex_strategy()), dir.path()).with_verifier(Never);

        let summary = engine.run().unwrap();
        assert!(summary.is_fatal());
        let (_, err) = summary.failures().next().unwrap();
        assert!(matches!(err, PatchError::VerificationFailed { .. }));
        assert_eq!(
            fs::read_to_string(dir.path().join("src/a.c")).unwrap(),
            "int f() { assert(x); }\n"
        );
    }

    #[test]
    fn test_failed_recheck_after_commit_restores_original() {
        let dir = workspace("int f() { assert(x); }\n");
        let target = dir.path().join("src/a.c");
        let mtime = FileTime::from_unix_time(1_500_000_000, 0);
        filetime::set_file_mtime(&target, mtime).unwrap();

        let engine = PatchEngine::new(&config(regex_strategy()), dir.path())
            .with_verifier(PassOnce(Cell::new(false)));
        let summary = engine.run().unwrap();

        assert!(matches!(
            summary.outcomes[0].outcome,
            ApplicationOutcome::Failed(PatchError::VerificationFailed { .. })
        ));
        assert_eq!(fs::read(&target).unwrap(), b"int f() { assert(x); }\n");
        let meta = fs::metadata(&target).unwrap();
        assert_eq!(FileTime::from_last_modification_time(&meta), mtime);

        let names: Vec<_> = fs::read_dir(dir.path().join("src"))
            .unwrap()
            .map(|entry| entry.unwrap().file_name())
            .collect();
        assert_eq!(names, vec![std::ffi::OsString::from("a.c")]);
    }

    #[test]
    fn test_publish_failure_is_distinct_from_patch_failure() {
        let dir = workspace("int f() { assert(x); }\n");
        // A plain file where the report directory should be
        fs::write(dir.path().join("work"), "").unwrap();
        let reporter = Reporter::new(dir.path().join("work"));

        let engine = PatchEngine::new(&config(regex_strategy()), dir.path());
        let err = engine.run_gate(&reporter).unwrap_err();

        let GateError::Publish { summary, .. } = err else {
            panic!("expected publish failure");
        };
        assert_eq!(summary.report.patched, 1);
        assert!(fs::read_to_string(dir.path().join("src/a.c"))
            .unwrap()
            .contains("PATCHED"));
    }

    #[test]
    fn test_expired_deadline_fails_without_writing() {
        let dir = workspace("int f() { assert(x); }\n");
        let engine = PatchEngine::new(&config(regex_strategy()), dir.path())
            .with_deadline(Deadline::after(Duration::ZERO));
        std::thread::sleep(Duration::from_millis(2));

        let summary = engine.run().unwrap();
        assert!(matches!(
            summary.failures().next(),
            Some((_, PatchError::Timeout { .. }))
        ));
        assert_eq!(
            fs::read_to_string(dir.path().join("src/a.c")).unwrap(),
            "int f() { assert(x); }\n"
        );
    }

    #[test]
    fn test_stray_backup_removed_when_patched() {
        let dir = workspace("/* PATCHED */\n");
        let target = dir.path().join("src/a.c");
        fs::write(backup::backup_path(&target), "stale").unwrap();

        let engine = PatchEngine::new(&config(regex_strategy()), dir.path());
        let summary = engine.run().unwrap();
        assert_eq!(summary.report.already_patched, 1);
        assert!(!backup::backup_path(&target).exists());
        assert_eq!(fs::read_to_string(&target).unwrap(), "/* PATCHED */\n");
    }

    #[test]
    fn test_check_is_read_only() {
        let dir = workspace("int f() { assert(x); }\n");
        let engine = PatchEngine::new(&config(regex_strategy()), dir.path());

        let statuses = engine.check().unwrap();
        assert_eq!(
            statuses[0].1,
            CheckStatus::WouldApply(AppliedVia::PrimaryPattern)
        );
        assert_eq!(
            fs::read_to_string(dir.path().join("src/a.c")).unwrap(),
            "int f() { assert(x); }\n"
        );
    }

    #[test]
    fn test_check_reports_mismatch() {
        let dir = workspace("int f() { return 0; }\n");
        let engine = PatchEngine::new(&config(regex_strategy()), dir.path());
        let statuses = engine.check().unwrap();
        assert!(matches!(statuses[0].1, CheckStatus::WouldFail(_)));
    }

    #[test]
    fn test_run_gate_publishes_only_on_success() {
        let dir = workspace("int f() { return 0; }\n");
        let reporter = Reporter::new(dir.path().join("work"));
        reporter.publish(&PatchReport::default()).unwrap();

        let engine = PatchEngine::new(&config(regex_strategy()), dir.path());
        let err = engine.run_gate(&reporter).unwrap_err();
        assert!(matches!(err, GateError::TargetsFailed { failed: 1, .. }));
        assert!(!reporter.record_path().exists());
    }
}
