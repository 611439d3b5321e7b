use std::path::PathBuf;

use anyhow::{Result, anyhow};
use clap::Args;

use leadbot::config::{ConfigUpdate, load_stored};

#[derive(Args)]
pub struct ConfigArgs {
    #[arg(long)]
    pub data_dir: Option<PathBuf>,

    /// Channel users must join before receiving a lead magnet (e.g. @channel)
    #[arg(long)]
    pub channel_id: Option<String>,

    #[arg(long)]
    pub bot_token: Option<String>,

    #[arg(long)]
    pub free_url: Option<String>,

    #[arg(long)]
    pub base_url: Option<String>,

    #[arg(long)]
    pub pro_url: Option<String>,

    /// Map a lead key to a file under assets/leads
    #[arg(long = "lead-file", value_parser = parse_lead_file, value_name = "KEY=FILE")]
    pub lead_file: Option<(String, String)>,

    /// Remove a lead key mapping
    #[arg(long)]
    pub remove_lead_file: Option<String>,

    /// Print the resulting configuration
    #[arg(long, default_value_t = false)]
    pub show: bool,
}

pub fn execute(config_path: Option<PathBuf>, args: ConfigArgs) -> Result<()> {
    let (mut config, path) = load_stored(config_path)?;

    let ConfigArgs {
        data_dir,
        channel_id,
        bot_token,
        free_url,
        base_url,
        pro_url,
        lead_file,
        remove_lead_file,
        show,
    } = args;

    config.apply_update(ConfigUpdate {
        data_dir,
        channel_id: channel_id.map(|value| value.trim().to_string()),
        bot_token: normalize_secret(bot_token),
        free_url,
        base_url,
        pro_url,
        lead_file,
        remove_lead_file,
    });

    config.ensure_dirs()?;
    config.save(&path)?;

    if show {
        let mut shown = config.clone();
        if shown.bot_token.is_some() {
            shown.bot_token = Some("<redacted>".to_string());
        }
        println!("{}", toml::to_string_pretty(&shown)?);
    }

    tracing::info!("Configuration saved to {}", path.display());
    Ok(())
}

fn parse_lead_file(raw: &str) -> Result<(String, String)> {
    let (key, file) = raw
        .split_once('=')
        .ok_or_else(|| anyhow!("expected KEY=FILE, got '{raw}'"))?;
    let key = key.trim();
    let file = file.trim();
    if key.is_empty() || file.is_empty() {
        return Err(anyhow!("lead key and file name must not be empty"));
    }
    Ok((key.to_string(), file.to_string()))
}

fn normalize_secret(value: Option<String>) -> Option<String> {
    value.and_then(|secret| {
        let trimmed = secret.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}
