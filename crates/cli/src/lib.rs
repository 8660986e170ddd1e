pub mod commands;

use clap::{Parser, Subcommand};
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "bazaar",
    about = "Bazaar operator CLI",
    long_about = "Operate the Bazaar marketplace store: migrations, agent catalog, task and ledger inspection, and readiness checks.",
    after_help = "Examples:\n  bazaar doctor --json\n  bazaar seed\n  bazaar task 6f1c2d7e-...\n  bazaar ledger --rail internal --limit 20"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate,
    #[command(about = "Insert the default agent catalog where missing, then verify it")]
    Seed,
    #[command(about = "List registered agents with pricing, load, and availability")]
    Agents,
    #[command(about = "Show a task with its steps, cost breakdown, and ledger verification")]
    Task {
        #[arg(help = "Task id as returned by the turn API")]
        task_id: String,
    },
    #[command(about = "List ledger entries on one rail across every task, newest first")]
    Ledger {
        #[arg(long, help = "Rail to list: internal or external")]
        rail: String,
        #[arg(long, default_value_t = 100, help = "Maximum number of entries")]
        limit: u32,
    },
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config,
    #[command(about = "Validate config, database connectivity, reasoning, and ledger readiness")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Migrate => commands::migrate::run(),
        Command::Seed => commands::seed::run(),
        Command::Agents => commands::agents::run(),
        Command::Task { task_id } => commands::task::run(&task_id),
        Command::Ledger { rail, limit } => commands::ledger::run(&rail, limit),
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run() }
        }
        Command::Doctor { json } => commands::doctor::run(json),
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
