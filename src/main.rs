use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use prebuild_patcher::{
    load_builtin, load_from_path, ApplicationOutcome, CheckStatus, Deadline, GateError,
    PatchConfig, PatchEngine, Reporter, RunSummary, StrategyConfig,
};
use similar::{ChangeTag, TextDiff};
use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "prebuild-patcher")]
#[command(about = "Prebuild gate that adapts vendored sources before compilation", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply the patch and publish the completion record
    Apply {
        /// Package root (defaults to PREBUILD_PATCH_ROOT, then the current directory)
        #[arg(short, long)]
        root: Option<PathBuf>,

        /// Directory receiving the completion record
        #[arg(short = 'o', long)]
        report_dir: PathBuf,

        /// Patch configuration (the built-in one is used otherwise)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Candidate path relative to the root; replaces the configured list
        #[arg(long = "candidate")]
        candidates: Vec<String>,

        /// Replace targets wholesale with this pre-patched file
        #[arg(long)]
        reference: Option<PathBuf>,

        /// Abort and roll back after this many seconds (0 disables the limit)
        #[arg(long, default_value_t = 120)]
        timeout_secs: u64,

        /// Show unified diff of changes
        #[arg(short, long)]
        diff: bool,
    },

    /// Show what apply would do without modifying files
    Status {
        #[arg(short, long)]
        root: Option<PathBuf>,

        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Fail unless every present candidate is already patched
    Verify {
        #[arg(short, long)]
        root: Option<PathBuf>,

        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Exit 0 only if a completion record is present and readable
    Ready {
        #[arg(short = 'o', long)]
        report_dir: PathBuf,
    },
}

fn main() -> Result<()> {
    init_logging();
    let cli = Cli::parse();

    match cli.command {
        Commands::Apply {
            root,
            report_dir,
            config,
            candidates,
            reference,
            timeout_secs,
            diff,
        } => cmd_apply(
            root,
            &report_dir,
            config,
            candidates,
            reference,
            timeout_secs,
            diff,
        ),

        Commands::Status { root, config } => cmd_status(root, config),

        Commands::Verify { root, config } => cmd_verify(root, config),

        Commands::Ready { report_dir } => cmd_ready(&report_dir),
    }
}

/// Build-log diagnostics go to stderr; `PREBUILD_PATCHER_LOG` overrides the
/// default `info` filter.
fn init_logging() {
    let filter =
        EnvFilter::try_from_env("PREBUILD_PATCHER_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

/// Resolve the package root
///
/// Priority order:
/// 1. Explicit --root flag
/// 2. PREBUILD_PATCH_ROOT environment variable
/// 3. Current directory
fn resolve_root(cli_root: Option<PathBuf>) -> Result<PathBuf> {
    let root = match cli_root {
        Some(path) => path,
        None => match env::var_os("PREBUILD_PATCH_ROOT") {
            Some(path) => PathBuf::from(path),
            None => env::current_dir()?,
        },
    };
    root.canonicalize()
        .with_context(|| format!("package root not accessible: {}", root.display()))
}

/// Load the configuration and apply command-line overrides.
fn load_config(
    path: Option<PathBuf>,
    candidates: Vec<String>,
    reference: Option<PathBuf>,
) -> Result<PatchConfig> {
    let mut config = match path {
        Some(path) => load_from_path(&path)?,
        None => load_builtin()?,
    };

    if !candidates.is_empty() {
        config.target.candidates = candidates;
    }
    if let Some(reference) = reference {
        let reference = if reference.is_absolute() {
            reference
        } else {
            env::current_dir()?.join(reference)
        };
        config.strategy = StrategyConfig::ReplaceWholeFile {
            reference: reference.to_string_lossy().into_owned(),
        };
    }

    config.validate()?;
    Ok(config)
}

fn print_header(root: &Path, config: &PatchConfig) {
    println!("Package root: {}", root.display());
    println!(
        "Patch: {} (revision {}, {})",
        config.meta.name,
        config.meta.revision,
        config.strategy.label()
    );
    println!();
}

/// Helper: Show unified diff between original and modified content
fn display_diff(file: &Path, original: &str, modified: &str) {
    println!(
        "\n{}",
        format!("--- {} (original)", file.display()).dimmed()
    );
    println!("{}", format!("+++ {} (patched)", file.display()).dimmed());

    let diff = TextDiff::from_lines(original, modified);

    for change in diff.iter_all_changes() {
        let sign = match change.tag() {
            ChangeTag::Delete => format!("-{}", change).red(),
            ChangeTag::Insert => format!("+{}", change).green(),
            ChangeTag::Equal => format!(" {}", change).normal(),
        };
        print!("{}", sign);
    }
}

fn print_outcomes(summary: &RunSummary, before: &HashMap<PathBuf, String>) {
    for outcome in &summary.outcomes {
        match &outcome.outcome {
            ApplicationOutcome::Applied(via) => {
                println!(
                    "{} Applied to {} ({})",
                    "✓".green(),
                    outcome.file.display(),
                    via
                );
                if let Some(original) = before.get(&outcome.file) {
                    if let Ok(after) = fs::read_to_string(&outcome.file) {
                        display_diff(&outcome.file, original, &after);
                    }
                }
            }
            ApplicationOutcome::Skipped => {
                println!(
                    "{} Already patched: {}",
                    "⊙".yellow(),
                    outcome.file.display()
                );
            }
            ApplicationOutcome::Failed(e) => {
                eprintln!("{} Failed: {}", "✗".red(), outcome.file.display());
                eprintln!("  {}", e);
            }
        }
    }
}

fn print_summary(summary: &RunSummary) {
    let failed = summary.failures().count();
    println!();
    println!("{}", "Summary:".bold());
    println!("  {} applied", format!("{}", summary.report.patched).green());
    println!(
        "  {} already patched",
        format!("{}", summary.report.already_patched).yellow()
    );
    println!("  {} failed", format!("{}", failed).red());
}

fn cmd_apply(
    root: Option<PathBuf>,
    report_dir: &Path,
    config: Option<PathBuf>,
    candidates: Vec<String>,
    reference: Option<PathBuf>,
    timeout_secs: u64,
    show_diff: bool,
) -> Result<()> {
    let root = resolve_root(root)?;
    let config = load_config(config, candidates, reference)?;

    let deadline = if timeout_secs == 0 {
        Deadline::unbounded()
    } else {
        Deadline::after(Duration::from_secs(timeout_secs))
    };
    let engine = PatchEngine::new(&config, root).with_deadline(deadline);
    let reporter = Reporter::new(report_dir);
    print_header(engine.root(), &config);

    // Capture contents up front so applied files can be diffed afterwards
    let mut before = HashMap::new();
    if show_diff {
        for file in engine.locate() {
            if let Ok(content) = fs::read_to_string(&file) {
                before.insert(file, content);
            }
        }
    }

    match engine.run_gate(&reporter) {
        Ok(summary) => {
            if summary.report.sources_absent {
                println!(
                    "{}",
                    "No candidate source found; this is normal before sources are extracted"
                        .yellow()
                );
            }
            print_outcomes(&summary, &before);
            print_summary(&summary);
            println!(
                "\n{} {} ({})",
                "Ready for compilation:".green().bold(),
                reporter.record_path().display(),
                summary.report
            );
            Ok(())
        }
        Err(GateError::TargetsFailed { summary, .. }) => {
            print_outcomes(&summary, &before);
            print_summary(&summary);
            eprintln!("\n{}", "Patch step failed; no completion record written".red());
            std::process::exit(1);
        }
        Err(GateError::Publish { summary, source }) => {
            print_outcomes(&summary, &before);
            print_summary(&summary);
            eprintln!("\n{} {}", "✗".red(), source);
            eprintln!(
                "{}",
                "Sources were patched but the completion record could not be written".red()
            );
            std::process::exit(1);
        }
        Err(GateError::Patch(e)) => {
            eprintln!("{} {}", "✗".red(), e);
            eprintln!("{}", "Patch step failed before any file was modified".red());
            std::process::exit(1);
        }
    }
}

fn cmd_status(root: Option<PathBuf>, config: Option<PathBuf>) -> Result<()> {
    let root = resolve_root(root)?;
    let config = load_config(config, Vec::new(), None)?;

    println!("{}", "Patch Status Report".bold());
    print_header(&root, &config);

    let statuses = PatchEngine::new(&config, &root).check()?;
    if statuses.is_empty() {
        println!("{} No candidate source present", "⊘".cyan());
        return Ok(());
    }

    for (file, status) in statuses {
        match status {
            CheckStatus::AlreadyPatched => {
                println!("{} {} {}", "✓".green(), "APPLIED".green().bold(), file.display());
            }
            CheckStatus::WouldApply(via) => {
                println!(
                    "{} {} {} (would apply via {})",
                    "⊙".yellow(),
                    "NOT APPLIED".yellow().bold(),
                    file.display(),
                    via
                );
            }
            CheckStatus::WouldFail(reason) => {
                println!(
                    "{} {} {} ({})",
                    "✗".red(),
                    "CONFLICT".red().bold(),
                    file.display(),
                    reason.dimmed()
                );
            }
        }
    }

    Ok(())
}

fn cmd_verify(root: Option<PathBuf>, config: Option<PathBuf>) -> Result<()> {
    let root = resolve_root(root)?;
    let config = load_config(config, Vec::new(), None)?;

    println!("{}", "Verifying patches...".bold());
    print_header(&root, &config);

    let mut verified = 0;
    let mut mismatch = 0;

    for (file, status) in PatchEngine::new(&config, &root).check()? {
        match status {
            CheckStatus::AlreadyPatched => {
                println!("{} {}: Verified", "✓".green(), file.display());
                verified += 1;
            }
            CheckStatus::WouldApply(_) => {
                eprintln!("{} {}: MISMATCH", "✗".red(), file.display());
                eprintln!("  Expected: patch already applied");
                eprintln!("  Found: patch not yet applied");
                mismatch += 1;
            }
            CheckStatus::WouldFail(reason) => {
                eprintln!("{} {}: MISMATCH", "✗".red(), file.display());
                eprintln!("  Error: {}", reason);
                mismatch += 1;
            }
        }
    }

    println!();
    println!("{}", "Summary:".bold());
    println!("  {} verified", format!("{}", verified).green());
    println!("  {} mismatch", format!("{}", mismatch).red());

    if mismatch > 0 {
        std::process::exit(1);
    }

    Ok(())
}

fn cmd_ready(report_dir: &Path) -> Result<()> {
    let reporter = Reporter::new(report_dir);
    match reporter.read() {
        Some(report) => {
            println!("{} {}", "ready".green(), report);
            Ok(())
        }
        None => {
            eprintln!(
                "{} no usable record at {}",
                "not ready:".red(),
                reporter.record_path().display()
            );
            std::process::exit(1);
        }
    }
}
