use crate::steps::apply::ApplyArgs;
use crate::steps::clean::CleanArgs;
use clap::{ArgAction, Parser, Subcommand};

#[derive(Parser)]
#[command(name = "atomic-build", version, about, long_about = None)]
pub struct Cli {
    /// Increase log output (-v info, -vv debug); RUST_LOG takes precedence
    #[arg(long, short = 'v', action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Apply a build plan as one all-or-nothing transaction.
    Apply(ApplyArgs),

    /// Remove backup, staging and temp artifacts left by interrupted builds.
    Clean(CleanArgs),
}
