//! Removal of artifacts left behind by interrupted transactions.

use crate::error::{BuildError, Result};
use crate::fs::artifacts::find_orphans;
use crate::fs::writer::remove_path;

use clap::Parser;
use colored::Colorize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Arguments for the `clean` subcommand.
#[derive(Parser, Debug, Clone)]
pub struct CleanArgs {
    /// Directory to scan
    #[arg(default_value = ".")]
    pub dir: PathBuf,

    /// List artifacts without deleting them
    #[arg(long, short = 'n')]
    pub dry_run: bool,

    /// Only touch artifacts older than this many seconds
    ///
    /// Younger artifacts may belong to a build that is still running.
    #[arg(long, value_name = "SECS", default_value_t = 600)]
    pub min_age: u64,
}

pub fn execute(args: CleanArgs) -> Result<()> {
    if !args.dir.is_dir() {
        return Err(BuildError::InvalidPath(
            args.dir.display().to_string(),
            "not a directory".to_string(),
        ));
    }

    let orphans = find_orphans(&args.dir, Duration::from_secs(args.min_age))?;

    if orphans.is_empty() {
        println!("\n{}", "No orphaned artifacts found".green());
        return Ok(());
    }

    let display_path = |path: &Path| -> String {
        let relative = pathdiff::diff_paths(path, &args.dir).unwrap_or_else(|| path.to_path_buf());
        relative.to_string_lossy().replace('\\', "/")
    };

    if args.dry_run {
        println!("\n{}", "DRY RUN - Nothing will be deleted".yellow().bold());
    } else {
        println!("\n{}", "Removing orphaned artifacts:".green().bold());
    }

    let mut failed = 0usize;
    for artifact in &orphans {
        let display = display_path(&artifact.path);
        let kind = format!("({})", artifact.kind.as_str());

        if args.dry_run {
            println!("   • {} {}", display, kind.dimmed());
            continue;
        }

        match remove_path(&artifact.path) {
            Ok(()) => {
                log::debug!("Removed artifact: {}", artifact.path.display());
                println!("   {} {} {}", "✓".green(), display, kind.dimmed());
            }
            Err(e) => {
                failed += 1;
                eprintln!("   {} {}: {}", "✗".red(), display, e);
            }
        }
    }

    println!();
    if args.dry_run {
        println!(
            "{} {} found. Run without {} to delete.",
            orphans.len().to_string().cyan().bold(),
            if orphans.len() > 1 { "artifacts" } else { "artifact" },
            "--dry-run".cyan()
        );
        return Ok(());
    }

    if failed > 0 {
        return Err(BuildError::Other(anyhow::anyhow!(
            "Failed to remove {} of {} artifacts",
            failed,
            orphans.len()
        )));
    }

    println!(
        "{} Removed {} artifacts",
        "✓".green().bold(),
        orphans.len()
    );
    Ok(())
}
