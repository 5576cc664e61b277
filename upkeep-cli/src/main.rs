//! upkeep: keep templated agent and hook files current.
//!
//! # Usage
//!
//! ```text
//! upkeep update [--dry-run] [--force] [--agents-only|--hooks-only] [--backup-dir <dir>] [--project-path <dir>]
//! upkeep rollback <id> [--target <dir>] [--dry-run] [--force]
//! upkeep backups list|info <id>|validate <id>|cleanup|purge
//! upkeep templates list|clear [version]
//! upkeep status [--json] [--check-remote]
//! ```

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{
    backups::BackupsArgs, rollback::RollbackArgs, status::StatusArgs, templates::TemplatesArgs,
    update::UpdateArgs,
};

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "upkeep",
    version,
    about = "Update, back up and roll back templated agent and hook files",
    long_about = None,
)]
struct Cli {
    /// Log progress to stderr (`RUST_LOG` overrides).
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Update the workspace to the latest template release.
    Update(UpdateArgs),

    /// Restore files from a backup.
    Rollback(RollbackArgs),

    /// Inspect and maintain backups.
    Backups(BackupsArgs),

    /// Inspect and clear the template cache.
    Templates(TemplatesArgs),

    /// Show installed version, registries, backups and cache.
    Status(StatusArgs),
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn init_tracing(verbose: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default = if verbose { "info" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    match cli.command {
        Commands::Update(args) => args.run(),
        Commands::Rollback(args) => args.run(),
        Commands::Backups(args) => args.run(),
        Commands::Templates(args) => args.run(),
        Commands::Status(args) => args.run(),
    }
}
