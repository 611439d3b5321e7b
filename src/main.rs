mod commands;
mod logging;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

use crate::commands::{
    config::ConfigArgs, event::EventCommands, parse::ParseArgs, start::StartArgs,
    stats::StatsArgs, user::UserCommands,
};

#[derive(Parser)]
#[command(author, version, about = "Lead-magnet bot core CLI")]
struct Cli {
    /// Path to the configuration file. Defaults to ./.leadbot/config.toml
    #[arg(long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fold new log rows into the statistics artifact and print a summary
    Stats(StatsArgs),
    /// Update configuration
    Config(ConfigArgs),
    /// Inspect or edit the user directory
    User {
        #[command(subcommand)]
        command: UserCommands,
    },
    /// Append to the event log
    Event {
        #[command(subcommand)]
        command: EventCommands,
    },
    /// Run the /start flow for a user
    Start(StartArgs),
    /// Print the attribution fields of a start code
    Parse(ParseArgs),
}

fn main() -> Result<()> {
    logging::init()?;

    let Cli { config, command } = Cli::parse();

    match command {
        Commands::Stats(args) => commands::stats::execute(config, args)?,
        Commands::Config(args) => commands::config::execute(config, args)?,
        Commands::User { command } => commands::user::execute(config, command)?,
        Commands::Event { command } => commands::event::execute(config, command)?,
        Commands::Start(args) => commands::start::execute(config, args)?,
        Commands::Parse(args) => commands::parse::execute(args)?,
    }

    Ok(())
}
