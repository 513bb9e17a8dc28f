//! Orchestration logic for applying a build plan.
//!
//! All file system modifications go through a `BuildTransaction` for atomicity.

use crate::error::Result;
use crate::fs::{BuildTransaction, DirSync, WriterConfig};
use crate::plan::BuildPlan;
use crate::verify::preflight_checks;

use clap::Parser;
use colored::Colorize;
use std::path::PathBuf;

/// Arguments for the `apply` subcommand.
#[derive(Parser, Debug, Clone)]
pub struct ApplyArgs {
    /// Path to the build plan (TOML)
    pub plan: PathBuf,

    /// Directory relative plan paths resolve against (defaults to the plan's directory)
    #[arg(long, value_name = "DIR")]
    pub root: Option<PathBuf>,

    /// Preview changes without applying them
    #[arg(long, short = 'n')]
    pub dry_run: bool,

    /// Directory sync policy; overrides `[settings] dir_sync` in the plan
    #[arg(long, value_enum, value_name = "MODE")]
    pub dir_sync: Option<DirSync>,
}

impl ApplyArgs {
    /// Resolves writer settings: flag, then plan, then default.
    pub fn config(&self, plan: &BuildPlan) -> WriterConfig {
        WriterConfig {
            dir_sync: self.dir_sync.or(plan.dir_sync).unwrap_or_default(),
        }
    }
}

/// Applies a build plan.
///
/// ## Phases
///
/// 1. Load and parse the plan
/// 2. Pre-flight checks (paths, sources, parents)
/// 3. Issue every step in one transaction
/// 4. Commit (publishes staged directories, purges backups)
///
/// Any failure in 3 or 4 rolls back everything already applied.
pub fn execute(args: ApplyArgs) -> Result<()> {
    let plan = BuildPlan::load(&args.plan, args.root.as_deref())?;
    preflight_checks(&plan)?;

    let config = args.config(&plan);
    log::debug!(
        "Applying {} with root {} ({:?})",
        args.plan.display(),
        plan.root.display(),
        config.dir_sync
    );

    if plan.is_empty() {
        println!("\n{}", "No changes needed".yellow());
        return Ok(());
    }

    if args.dry_run {
        println!("\n{}", "DRY RUN - No changes will be made".yellow().bold());
        for line in plan.preview() {
            println!("   • {}", line.dimmed());
        }

        let num_ops = plan.ops.len();
        println!();
        println!(
            "{} {} will run. Run without {} to apply.",
            num_ops.to_string().cyan().bold(),
            if num_ops > 1 { "operations" } else { "operation" },
            "--dry-run".cyan()
        );
        return Ok(());
    }

    let mut txn = BuildTransaction::with_config(config);

    if let Err(e) = plan.apply(&mut txn) {
        eprintln!("{} {}", "Error:".red().bold(), e);
        eprintln!("{}", "Attempting to rollback changes...".yellow().bold());
        match txn.rollback() {
            Ok(_) => eprintln!("{}", "✓ Rollback successful.".green()),
            Err(rollback_err) => {
                eprintln!("{} {}", "✗ Rollback failed:".red().bold(), rollback_err);
            }
        }
        return Err(e);
    }

    // Commit rolls back on its own if publishing fails
    if let Err(e) = txn.commit() {
        eprintln!("{} {}", "Error during commit:".red().bold(), e);
        eprintln!("{}", "Changes were rolled back.".yellow());
        return Err(e);
    }

    txn.print_summary(&plan.root);
    Ok(())
}
