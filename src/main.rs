//! Binary entry point for cass-memory.
//!
//! Thin CLI over the library: reflect, context, guard, outcome, status, and
//! prune. In json mode every command emits exactly one envelope on stdout;
//! otherwise output is plain lines and failures print a single `Error:` line.

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(missing_docs)]
#![forbid(unsafe_code)]
// Allow print_stderr/print_stdout in the main binary for CLI output
#![allow(clippy::print_stderr)]
#![allow(clippy::print_stdout)]
// Allow multiple crate versions from transitive dependencies
#![allow(clippy::multiple_crate_versions)]

mod commands;

use cass_memory::config::MemoryConfig;
use cass_memory::output::{error_code_for, exit_code_for, Envelope};
use cass_memory::{observability, Error};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;

/// cass-memory - a learning memory for AI coding assistants.
#[derive(Parser)]
#[command(name = "cass-memory")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit a JSON envelope instead of human output.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands.
#[derive(Subcommand)]
enum Commands {
    /// Reflect on session transcripts and fold learnings into the playbook.
    Reflect {
        /// Session transcript paths (.jsonl, .json, or .md).
        sessions: Vec<PathBuf>,

        /// Also discover sessions from the last N days via the history tool.
        #[arg(short, long)]
        days: Option<u32>,

        /// Gather and validate deltas without touching the playbook.
        #[arg(long)]
        dry_run: bool,
    },

    /// Assemble playbook context for a task.
    Context {
        /// The task to assemble context for.
        task: String,

        /// Restrict history to one workspace.
        #[arg(short, long)]
        workspace: Option<String>,

        /// Restrict history to the last N days.
        #[arg(short, long)]
        days: Option<u32>,

        /// Skip the history tool entirely.
        #[arg(long)]
        no_history: bool,
    },

    /// Check a command against the trauma list.
    Guard {
        /// The command line to check.
        command: String,
    },

    /// Record a session outcome.
    Outcome {
        /// Session identifier.
        session_id: String,

        /// Outcome: success, failure, mixed, or partial.
        outcome: String,

        /// Bullet ids consulted during the session (comma-separated).
        #[arg(short, long)]
        rules: Option<String>,

        /// Session duration in seconds.
        #[arg(long)]
        duration: Option<u64>,

        /// Errors hit during the session.
        #[arg(long)]
        errors: Option<u32>,

        /// Free-form notes.
        #[arg(long)]
        notes: Option<String>,

        /// Transcript path.
        #[arg(long)]
        path: Option<String>,
    },

    /// Show playbook statistics.
    Status,

    /// Remove tombstones and stale candidates from the playbook.
    Prune {
        /// Report what would be removed without removing it.
        #[arg(long)]
        dry_run: bool,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    observability::init(cli.verbose);

    let config = match MemoryConfig::load() {
        Ok(mut config) => {
            config.verbose = config.verbose || cli.verbose;
            config.json_output = config.json_output || cli.json;
            config
        },
        Err(e) => return fail(command_name(&cli.command), &e, cli.json, cli.verbose),
    };
    let json = config.json_output;
    let name = command_name(&cli.command);

    let result = match cli.command {
        Commands::Reflect {
            sessions,
            days,
            dry_run,
        } => commands::cmd_reflect(&config, sessions, days, dry_run, json),
        Commands::Context {
            task,
            workspace,
            days,
            no_history,
        } => commands::cmd_context(&config, &task, workspace, days, no_history, json),
        Commands::Guard { command } => commands::cmd_guard(&config, &command, json),
        Commands::Outcome {
            session_id,
            outcome,
            rules,
            duration,
            errors,
            notes,
            path,
        } => {
            let rules = rules
                .map(|r| r.split(',').map(|s| s.trim().to_string()).collect())
                .unwrap_or_default();
            commands::cmd_outcome(
                &config, &session_id, &outcome, rules, duration, errors, notes, path, json,
            )
        },
        Commands::Status => commands::cmd_status(&config, json),
        Commands::Prune { dry_run } => commands::cmd_prune(&config, dry_run, json),
    };

    match result {
        Ok(data) => {
            if json {
                println!("{}", Envelope::success(name, data).to_json());
            }
            ExitCode::SUCCESS
        },
        Err(e) => fail(name, &e, json, cli.verbose),
    }
}

fn command_name(command: &Commands) -> &'static str {
    match command {
        Commands::Reflect { .. } => "reflect",
        Commands::Context { .. } => "context",
        Commands::Guard { .. } => "guard",
        Commands::Outcome { .. } => "outcome",
        Commands::Status => "status",
        Commands::Prune { .. } => "prune",
    }
}

fn fail(command: &str, error: &Error, json: bool, verbose: bool) -> ExitCode {
    if json {
        println!("{}", Envelope::failure(command, error_code_for(error), error.to_string()).to_json());
    } else {
        eprintln!("Error: {error}");
        if verbose {
            eprintln!("{error:#?}");
        }
    }

    let code = exit_code_for(error);
    ExitCode::from(u8::try_from(code).unwrap_or(1))
}
