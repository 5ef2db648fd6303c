//! Ensemble: parallel worktree sessions and agent teams for one repository.
//!
//! # Usage
//!
//! ```text
//! ensemble register [--nickname <name>]
//! ensemble list
//! ensemble get <id>
//! ensemble delete <id> [--worktree]
//! ensemble thread <id> <type> [--force]
//! ensemble create <branch> [--nickname <name>]
//! ensemble switch <id>
//! ensemble end <id> [--merge] [--strategy squash|merge]
//! ensemble spawn --count <n> [--prefix <p>] | --branches <a,b> | --from-epic <file>
//! ensemble check <id>
//! ensemble cleanup [--yes]
//! ensemble history [--limit <n>]
//! ensemble status
//! ensemble team start <template> | stop | list
//! ensemble wave plan --analyzer <name>... | run <trace> | collect <trace>
//! ```
//!
//! Every command accepts `--json`.

mod commands;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{
    lifecycle::{CheckArgs, CleanupArgs, CreateArgs, EndArgs, HistoryArgs, SpawnArgs, SwitchArgs},
    session::{DeleteArgs, GetArgs, RegisterArgs, ThreadArgs},
    team::TeamCommand,
    wave::WaveCommand,
    Globals,
};

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "ensemble",
    version,
    about = "Coordinate parallel agent sessions, teams and analysis waves in one repository",
    long_about = None,
)]
struct Cli {
    /// Emit machine-readable JSON.
    #[arg(long, global = true)]
    json: bool,

    /// Main worktree root. Defaults to the repository containing the
    /// current directory.
    #[arg(long, global = true, value_name = "DIR")]
    root: Option<PathBuf>,

    /// Debug logging on stderr (RUST_LOG overrides).
    #[arg(long, short = 'v', global = true)]
    verbose: bool,

    /// Log as JSON lines instead of text.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Register the current worktree as a session.
    Register(RegisterArgs),

    /// List registered sessions.
    List,

    /// Show one session.
    Get(GetArgs),

    /// Remove a session from the registry.
    Delete(DeleteArgs),

    /// Change a session's thread type.
    Thread(ThreadArgs),

    /// Create a worktree on a branch and register it.
    Create(CreateArgs),

    /// Print the command that resumes work in a session.
    Switch(SwitchArgs),

    /// Release a session, optionally integrating it first.
    End(EndArgs),

    /// Create several sessions at once.
    Spawn(SpawnArgs),

    /// Report whether a session can be integrated.
    Check(CheckArgs),

    /// Find and fix orphaned, missing, inactive and dead sessions.
    Cleanup(CleanupArgs),

    /// Show recent merges.
    History(HistoryArgs),

    /// Overview of the repository's sessions.
    Status,

    /// Start or stop an agent team in the current worktree.
    Team {
        #[command(subcommand)]
        command: TeamCommand,
    },

    /// Plan, run and collect analyzer waves.
    Wave {
        #[command(subcommand)]
        command: WaveCommand,
    },
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn init_tracing(verbose: bool, json: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let builder = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    let _ = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.log_json);

    let globals = Globals::new(cli.json, cli.root)?;
    match cli.command {
        Commands::Register(args) => args.run(&globals),
        Commands::List => commands::session::list(&globals),
        Commands::Get(args) => args.run(&globals),
        Commands::Delete(args) => args.run(&globals),
        Commands::Thread(args) => args.run(&globals),
        Commands::Create(args) => args.run(&globals),
        Commands::Switch(args) => args.run(&globals),
        Commands::End(args) => args.run(&globals),
        Commands::Spawn(args) => args.run(&globals),
        Commands::Check(args) => args.run(&globals),
        Commands::Cleanup(args) => args.run(&globals),
        Commands::History(args) => args.run(&globals),
        Commands::Status => commands::lifecycle::status(&globals),
        Commands::Team { command } => commands::team::run(command, &globals),
        Commands::Wave { command } => commands::wave::run(command, &globals),
    }
}
