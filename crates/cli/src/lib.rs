pub mod commands;

use clap::{Parser, Subcommand};
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "consulta",
    about = "Consulta operator CLI",
    long_about = "Run natural-language queries against the records backend and inspect agent readiness.",
    after_help = "Examples:\n  consulta ask \"facturas de Meta de los últimos 3 meses\" --user u-7\n  consulta capabilities\n  consulta doctor --json"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Run one natural-language query through the agent and print the answer")]
    Ask {
        #[arg(help = "The question, in natural language")]
        query: String,
        #[arg(long, default_value = "cli", help = "User id for tenant-scoped capabilities")]
        user: String,
    },
    #[command(about = "List the capability catalog the agent advertises to the reasoner")]
    Capabilities,
    #[command(about = "Inspect effective configuration values with secrets redacted")]
    Config,
    #[command(about = "Validate config and reasoning-provider credential readiness")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Ask { query, user } => commands::ask::run(&query, &user),
        Command::Capabilities => {
            commands::CommandResult { exit_code: 0, output: commands::capabilities::run() }
        }
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run() }
        }
        Command::Doctor { json } => {
            commands::CommandResult { exit_code: 0, output: commands::doctor::run(json) }
        }
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
