use std::path::PathBuf;

use anyhow::{Result, bail};
use clap::{Args, Subcommand};

use leadbot::UserUpdate;

use super::open_bot;

#[derive(Subcommand)]
pub enum UserCommands {
    /// Show the stored record of a user
    Get(UserGetArgs),
    /// Merge the given fields into a user's record
    Update(UserUpdateArgs),
    /// List known user ids
    List,
}

#[derive(Args)]
pub struct UserGetArgs {
    pub user_id: String,

    /// Create an empty record when the user is unknown
    #[arg(long, default_value_t = false)]
    pub create: bool,
}

#[derive(Args)]
pub struct UserUpdateArgs {
    pub user_id: String,

    #[arg(long, allow_hyphen_values = true)]
    pub chat_id: Option<i64>,

    #[arg(long)]
    pub platform: Option<String>,

    #[arg(long)]
    pub theme: Option<String>,

    #[arg(long)]
    pub lead_type: Option<String>,

    #[arg(long)]
    pub creative: Option<String>,

    #[arg(long)]
    pub lead_sent: Option<bool>,
}

pub fn execute(config_path: Option<PathBuf>, command: UserCommands) -> Result<()> {
    let bot = open_bot(config_path)?;
    match command {
        UserCommands::Get(args) => {
            let record = if args.create {
                bot.get_or_create_user(&args.user_id)?
            } else {
                bot.users().get(&args.user_id)
            };
            println!("{}", serde_json::to_string_pretty(&record)?);
        }
        UserCommands::Update(args) => {
            let update = UserUpdate {
                chat_id: args.chat_id,
                platform: args.platform,
                theme: args.theme,
                lead_type: args.lead_type,
                creative: args.creative,
                lead_sent: args.lead_sent,
            };
            if update.is_empty() {
                bail!("nothing to update; pass at least one field");
            }
            let record = bot.update_user(&args.user_id, &update)?;
            println!("{}", serde_json::to_string_pretty(&record)?);
        }
        UserCommands::List => {
            let users = bot.users().load().into_value();
            if users.is_empty() {
                println!("no users recorded");
            }
            for (user_id, record) in users {
                println!(
                    "user_id={} chat_id={} lead_sent={}",
                    user_id,
                    record
                        .chat_id
                        .map(|id| id.to_string())
                        .unwrap_or_default(),
                    record.has_lead()
                );
            }
        }
    }
    Ok(())
}
