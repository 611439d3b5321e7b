use std::{
    collections::BTreeMap,
    env, fs,
    path::{Path, PathBuf},
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{LeadError, Result};

pub const BOT_TOKEN_ENV: &str = "LEADBOT_BOT_TOKEN";
pub const CHANNEL_ID_ENV: &str = "LEADBOT_CHANNEL_ID";

pub const DEFAULT_FREE_URL: &str = "https://stepik.org/a/252809";
pub const DEFAULT_BASE_URL: &str = "https://stepik.org/a/252040";
pub const DEFAULT_PRO_URL: &str = "https://stepik.org/a/252823";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub data_dir: PathBuf,
    #[serde(default)]
    pub channel_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bot_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub free_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pro_url: Option<String>,
    /// `theme_leadtype_creative` -> file name inside `leads_dir()`.
    #[serde(default)]
    pub lead_files: BTreeMap<String, String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Default for Config {
    fn default() -> Self {
        let now = Utc::now();
        Self {
            data_dir: default_data_dir(),
            channel_id: String::new(),
            bot_token: None,
            free_url: None,
            base_url: None,
            pro_url: None,
            lead_files: BTreeMap::new(),
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ConfigUpdate {
    pub data_dir: Option<PathBuf>,
    pub channel_id: Option<String>,
    pub bot_token: Option<String>,
    pub free_url: Option<String>,
    pub base_url: Option<String>,
    pub pro_url: Option<String>,
    pub lead_file: Option<(String, String)>,
    pub remove_lead_file: Option<String>,
}

pub fn default_config_path() -> Result<PathBuf> {
    let mut path = env::current_dir().map_err(|err| LeadError::Config(err.to_string()))?;
    path.push(".leadbot");
    path.push("config.toml");
    Ok(path)
}

/// Loads the configuration with environment overrides applied and the data
/// directories created.
pub fn load_or_default(path: Option<PathBuf>) -> Result<(Config, PathBuf)> {
    let (mut cfg, config_path) = load_stored(path)?;
    cfg.apply_env_overrides();
    cfg.ensure_dirs()?;
    Ok((cfg, config_path))
}

/// Loads the configuration exactly as saved, writing a default file when
/// none exists. Use this when the result is saved back.
pub fn load_stored(path: Option<PathBuf>) -> Result<(Config, PathBuf)> {
    let config_path = if let Some(path) = path {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        path
    } else {
        default_config_path()?
    };

    let cfg = if config_path.exists() {
        let contents = fs::read_to_string(&config_path)?;
        let cfg: Config = toml::from_str(&contents)?;
        cfg
    } else {
        let cfg = Config::default();
        if let Some(parent) = config_path.parent() {
            fs::create_dir_all(parent)?;
        }
        cfg.save(&config_path)?;
        cfg
    };

    Ok((cfg, config_path))
}

impl Config {
    /// Builds a configuration rooted at `data_dir`, used by tests and
    /// embedders that do not keep a config file.
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Self::default()
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let contents = toml::to_string_pretty(self)?;
        fs::write(path, contents)?;
        Ok(())
    }

    pub fn apply_update(&mut self, update: ConfigUpdate) {
        if let Some(dir) = update.data_dir {
            self.data_dir = dir;
        }
        if let Some(channel) = update.channel_id {
            self.channel_id = channel;
        }
        if let Some(token) = update.bot_token {
            self.bot_token = Some(token);
        }
        if let Some(url) = update.free_url {
            self.free_url = Some(url);
        }
        if let Some(url) = update.base_url {
            self.base_url = Some(url);
        }
        if let Some(url) = update.pro_url {
            self.pro_url = Some(url);
        }
        if let Some((key, file)) = update.lead_file {
            self.lead_files.insert(key.trim().to_string(), file.trim().to_string());
        }
        if let Some(key) = update.remove_lead_file {
            self.lead_files.remove(key.trim());
        }
        self.updated_at = Utc::now();
    }

    fn apply_env_overrides(&mut self) {
        if let Some(token) = env_value(BOT_TOKEN_ENV) {
            self.bot_token = Some(token);
        }
        if let Some(channel) = env_value(CHANNEL_ID_ENV) {
            self.channel_id = channel;
        }
    }

    /// Creates every directory the bot writes into. Failures are reported
    /// so the caller can decide whether a read-only deployment is fatal.
    pub fn ensure_dirs(&self) -> Result<()> {
        for dir in [
            self.users_dir(),
            self.logs_dir(),
            self.stats_dir(),
            self.leads_dir(),
        ] {
            fs::create_dir_all(&dir)?;
        }
        Ok(())
    }

    pub fn users_dir(&self) -> PathBuf {
        self.data_dir.join("data")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.data_dir.join("logs")
    }

    pub fn stats_dir(&self) -> PathBuf {
        self.data_dir.join("stats")
    }

    pub fn leads_dir(&self) -> PathBuf {
        self.data_dir.join("assets").join("leads")
    }

    pub fn users_path(&self) -> PathBuf {
        self.users_dir().join("users.json")
    }

    pub fn events_path(&self) -> PathBuf {
        self.logs_dir().join("events.csv")
    }

    pub fn stats_path(&self) -> PathBuf {
        self.stats_dir().join("stats.json")
    }

    pub fn channel_link(&self) -> String {
        format!("https://t.me/{}", self.channel_id.trim().trim_start_matches('@'))
    }

    pub fn course_links(&self) -> CourseLinks {
        CourseLinks {
            free: link_or(&self.free_url, DEFAULT_FREE_URL),
            base: link_or(&self.base_url, DEFAULT_BASE_URL),
            pro: link_or(&self.pro_url, DEFAULT_PRO_URL),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CourseLinks {
    pub free: String,
    pub base: String,
    pub pro: String,
}

fn link_or(value: &Option<String>, fallback: &str) -> String {
    value
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .unwrap_or(fallback)
        .to_string()
}

fn env_value(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn default_data_dir() -> PathBuf {
    let Ok(current_dir) = env::current_dir() else {
        return PathBuf::from(".leadbot");
    };
    current_dir.join(".leadbot")
}
