use std::path::PathBuf;

use anyhow::Result;

use leadbot::{LeadBot, config::load_or_default};

pub mod config;
pub mod event;
pub mod parse;
pub mod start;
pub mod stats;
pub mod user;

pub(crate) fn open_bot(config_path: Option<PathBuf>) -> Result<LeadBot> {
    let (config, _) = load_or_default(config_path)?;
    Ok(LeadBot::open(config))
}
