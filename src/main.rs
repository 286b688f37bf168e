use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use colored::Colorize;
use patch_guard::config::{
    apply_patches, discover, guards_for, load_from_path, patch_status, recover_patches,
    restore_patches, ApplicationError, PatchConfig, PatchResult, TargetLocator,
};
use patch_guard::{run_guarded, ApplyOutcome, GuardState, GuardStatus, PatchGuard, RestoreOutcome};
use serde::Serialize;
use similar::{ChangeTag, TextDiff};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitCode};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "patch-guard")]
#[command(
    about = "Patch vendor files for the duration of a build and restore them afterwards",
    long_about = None
)]
#[command(version)]
struct Cli {
    /// Patch config file (default: nearest patch-guard.toml upwards)
    #[arg(short, long, global = true, env = "PATCH_GUARD_CONFIG")]
    config: Option<PathBuf>,

    /// Root for workspace-relative paths (default: directory of the config)
    #[arg(short, long, global = true)]
    workspace: Option<PathBuf>,

    /// Increase diagnostic output (-v info, -vv debug)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Recover stale backups, then back up and patch every target (pre-build)
    Apply {
        /// Fail when the search text is absent and the patch is not already applied
        #[arg(long)]
        strict: bool,

        /// Show unified diff of changes
        #[arg(short, long)]
        diff: bool,
    },

    /// Restore every target from its backup (post-build, run unconditionally)
    Restore,

    /// Restore backups left behind by a crashed run, without patching
    Recover,

    /// Show whether each target is clean, backed up or patched
    Status {
        /// Print machine-readable JSON
        #[arg(long)]
        json: bool,
    },

    /// Patch, run a build command, and restore whatever the command does
    Run {
        /// Fail when the search text is absent and the patch is not already applied
        #[arg(long)]
        strict: bool,

        /// Command to run while patched, e.g. `pio run -e teensy41`
        #[arg(trailing_var_arg = true, required = true, num_args = 1..)]
        command: Vec<String>,
    },
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let (config_path, config, locator) = load_config(cli.config.as_deref(), cli.workspace)?;

    match cli.command {
        Commands::Apply { strict, diff } => cmd_apply(&config_path, &config, &locator, strict, diff),
        Commands::Restore => cmd_restore(&config, &locator),
        Commands::Recover => cmd_recover(&config, &locator),
        Commands::Status { json } => cmd_status(&config_path, &config, &locator, json),
        Commands::Run { strict, command } => cmd_run(&config, &locator, strict, &command),
    }
}

fn init_tracing(verbose: u8) {
    let default_level = match verbose {
        0 => "patch_guard=warn",
        1 => "patch_guard=info",
        _ => "patch_guard=debug",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Helper: locate and load the config, and build the target locator.
fn load_config(
    explicit: Option<&Path>,
    workspace: Option<PathBuf>,
) -> Result<(PathBuf, PatchConfig, TargetLocator)> {
    let cwd = env::current_dir().context("cannot determine current directory")?;
    let path = discover(explicit, &cwd)?;
    let path = if path.is_absolute() {
        path
    } else {
        cwd.join(path)
    };

    let config = load_from_path(&path)?;

    let workspace = match workspace {
        Some(dir) => dir
            .canonicalize()
            .with_context(|| format!("workspace {} does not exist", dir.display()))?,
        None => path.parent().map(Path::to_path_buf).unwrap_or(cwd),
    };

    Ok((path, config, TargetLocator::new(workspace)))
}

/// Helper: Show unified diff between original and patched content
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
            ChangeTag::Equal => continue,
        };
        print!("{}", sign);
    }
}

fn report_apply(patch_id: &str, result: &PatchResult) {
    if result.recovered {
        println!(
            "{} {}: Restored stale backup {} from a previous run",
            "↺".cyan(),
            patch_id,
            result.backup.display()
        );
    }
    match result.outcome {
        ApplyOutcome::Applied { .. } => println!("{} {}: {}", "✓".green(), patch_id, result),
        ApplyOutcome::AlreadyApplied => println!("{} {}: {}", "⊙".yellow(), patch_id, result),
        ApplyOutcome::PatternMissing => {
            println!("{} {}: {}", "⚠".yellow(), patch_id, result);
            println!("  File left unchanged; the upstream file may have changed format");
        }
    }
}

fn report_error(patch_id: &str, error: &ApplicationError) {
    eprintln!("{} {}: Error - {}", "✗".red(), patch_id, error);
    if let ApplicationError::PatternMissing { file } = error {
        eprintln!("  {}", "CONFLICT: search text not found".red());
        eprintln!("  File: {}", file.display());
        eprintln!("  Possible causes:");
        eprintln!("    - Framework package was updated and the define moved or changed");
        eprintln!("    - Whitespace in the search text does not match the file");
    }
}

fn cmd_apply(
    config_path: &Path,
    config: &PatchConfig,
    locator: &TargetLocator,
    strict: bool,
    show_diff: bool,
) -> Result<ExitCode> {
    println!("Config: {}", config_path.display());
    println!("Workspace: {}", locator.workspace_root().display());
    println!();

    let mut total_applied = 0;
    let mut total_already_applied = 0;
    let mut total_missing = 0;
    let mut total_failed = 0;

    for (patch_id, result) in apply_patches(config, locator, strict) {
        match result {
            Ok(result) => {
                report_apply(&patch_id, &result);
                match result.outcome {
                    ApplyOutcome::Applied { .. } => {
                        total_applied += 1;
                        if show_diff {
                            // The backup holds the pristine content
                            if let (Ok(before), Ok(after)) = (
                                fs::read_to_string(&result.backup),
                                fs::read_to_string(&result.file),
                            ) {
                                display_diff(&result.file, &before, &after);
                            }
                        }
                    }
                    ApplyOutcome::AlreadyApplied => total_already_applied += 1,
                    ApplyOutcome::PatternMissing => total_missing += 1,
                }
            }
            Err(e) => {
                report_error(&patch_id, &e);
                total_failed += 1;
            }
        }
    }

    println!();
    println!("{}", "Summary:".bold());
    println!("  {} applied", format!("{}", total_applied).green());
    println!(
        "  {} already applied",
        format!("{}", total_already_applied).yellow()
    );
    println!("  {} not found", format!("{}", total_missing).yellow());
    println!("  {} failed", format!("{}", total_failed).red());

    if total_failed > 0 {
        return Ok(ExitCode::FAILURE);
    }
    Ok(ExitCode::SUCCESS)
}

fn cmd_restore(config: &PatchConfig, locator: &TargetLocator) -> Result<ExitCode> {
    let mut failed = 0;

    for (patch_id, result) in restore_patches(config, locator) {
        match result {
            Ok(result) => match result.outcome {
                RestoreOutcome::Restored => println!(
                    "{} {}: Restored {}",
                    "✓".green(),
                    patch_id,
                    result.file.display()
                ),
                RestoreOutcome::NothingToRestore => println!(
                    "{} {}: Warning: no backup for {}, nothing to restore",
                    "⊙".yellow(),
                    patch_id,
                    result.file.display()
                ),
            },
            Err(e) => {
                report_error(&patch_id, &e);
                failed += 1;
            }
        }
    }

    if failed > 0 {
        return Ok(ExitCode::FAILURE);
    }
    Ok(ExitCode::SUCCESS)
}

fn cmd_recover(config: &PatchConfig, locator: &TargetLocator) -> Result<ExitCode> {
    let mut failed = 0;

    for (patch_id, result) in recover_patches(config, locator) {
        match result {
            Ok(true) => println!("{} {}: Restored stale backup", "↺".cyan(), patch_id),
            Ok(false) => println!("{} {}: Clean", "✓".green(), patch_id),
            Err(e) => {
                report_error(&patch_id, &e);
                failed += 1;
            }
        }
    }

    if failed > 0 {
        return Ok(ExitCode::FAILURE);
    }
    Ok(ExitCode::SUCCESS)
}

#[derive(Serialize)]
struct StatusEntry<'a> {
    id: &'a str,
    #[serde(flatten)]
    status: Option<&'a GuardStatus>,
    error: Option<String>,
}

fn cmd_status(
    config_path: &Path,
    config: &PatchConfig,
    locator: &TargetLocator,
    json: bool,
) -> Result<ExitCode> {
    let results = patch_status(config, locator);

    if json {
        let entries: Vec<StatusEntry<'_>> = results
            .iter()
            .map(|(id, result)| StatusEntry {
                id,
                status: result.as_ref().ok(),
                error: result.as_ref().err().map(ToString::to_string),
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(ExitCode::SUCCESS);
    }

    println!("{}", "Patch Status Report".bold());
    println!("Config: {}", config_path.display());
    println!();

    for (patch_id, result) in &results {
        match result {
            Ok(status) => {
                let state = match status.state {
                    GuardState::Clean => status.state.to_string().green(),
                    GuardState::BackedUp => status.state.to_string().yellow(),
                    GuardState::Patched => status.state.to_string().cyan(),
                };
                println!("  - {}: {}", patch_id, state.bold());
                println!("    File: {}", status.original.display());
                if status.state != GuardState::Clean {
                    println!("    Backup: {}", status.backup.display());
                }
                if status.original_hash.is_none() {
                    println!("    {}", "target file does not exist".red());
                }
            }
            Err(e) => println!("  - {}: {}", patch_id, e.to_string().red()),
        }
    }

    Ok(ExitCode::SUCCESS)
}

fn cmd_run(
    config: &PatchConfig,
    locator: &TargetLocator,
    strict: bool,
    command: &[String],
) -> Result<ExitCode> {
    let mut ids = Vec::new();
    let mut guards: Vec<PatchGuard> = Vec::new();
    for (patch_id, guard) in guards_for(config, locator) {
        match guard {
            Ok(guard) => {
                ids.push(patch_id);
                guards.push(guard);
            }
            Err(e) => {
                report_error(&patch_id, &e);
                return Ok(ExitCode::FAILURE);
            }
        }
    }

    let (program, args) = command
        .split_first()
        .context("no command given to run")?;

    let status = run_guarded(&guards, |engaged| -> Result<Option<i32>> {
        for (patch_id, scoped) in ids.iter().zip(engaged) {
            let result = PatchResult {
                file: scoped.guard().original().to_path_buf(),
                backup: scoped.guard().backup().to_path_buf(),
                recovered: scoped.recovered(),
                outcome: scoped.outcome(),
            };
            report_apply(patch_id, &result);
        }

        let missing = engaged
            .iter()
            .any(|scoped| scoped.outcome() == ApplyOutcome::PatternMissing);
        if strict && missing {
            eprintln!(
                "{} search text missing in strict mode, not running {}",
                "✗".red(),
                program
            );
            return Ok(None);
        }

        println!("{} {}", "Running:".bold(), command.join(" "));
        let status = Command::new(program)
            .args(args)
            .status()
            .with_context(|| format!("failed to start {}", program))?;
        Ok(Some(status.code().unwrap_or(1)))
    })??;

    println!("{} restored all targets", "✓".green());

    Ok(match status {
        Some(0) => ExitCode::SUCCESS,
        Some(code) => ExitCode::from(u8::try_from(code).unwrap_or(1)),
        None => ExitCode::FAILURE,
    })
}
