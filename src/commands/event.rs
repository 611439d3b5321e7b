use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Subcommand};

use leadbot::{Attribution, EventTag};

use super::open_bot;

#[derive(Subcommand)]
pub enum EventCommands {
    /// Append one interaction to the event log
    Record(EventRecordArgs),
    /// Print rows of the event log as JSON lines
    List(EventListArgs),
}

#[derive(Args)]
pub struct EventRecordArgs {
    pub user_id: String,

    /// Event tag such as start, lead_sent or button_click
    pub event: String,

    /// Start code carrying the attribution (platform_theme_leadtype_creative)
    #[arg(long)]
    pub code: Option<String>,

    #[arg(long, default_value = "")]
    pub extra: String,
}

#[derive(Args)]
pub struct EventListArgs {
    /// Number of rows to skip
    #[arg(long, default_value_t = 0)]
    pub skip: u64,
}

pub fn execute(config_path: Option<PathBuf>, command: EventCommands) -> Result<()> {
    let bot = open_bot(config_path)?;
    match command {
        EventCommands::Record(args) => {
            let attribution = args
                .code
                .as_deref()
                .map(Attribution::parse)
                .unwrap_or_default();
            let record = bot.record_interaction(
                &args.user_id,
                EventTag::from(args.event.as_str()),
                &attribution,
                &args.extra,
            )?;
            println!("{}", serde_json::to_string(&record)?);
        }
        EventCommands::List(args) => {
            let read = bot.events().read_new_events(args.skip);
            for record in &read.records {
                println!("{}", serde_json::to_string(record)?);
            }
            if read.malformed > 0 {
                eprintln!("skipped {} malformed row(s)", read.malformed);
            }
        }
    }
    Ok(())
}
