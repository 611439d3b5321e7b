use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::{
    attribution::Dimension,
    checkpoint::{Checkpoint, Counter, DimensionTally},
    durable::{self, LoadStatus},
    error::Result,
    users::UserMap,
};

const CHECKPOINT_KEY: &str = "meta";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Summary {
    pub total_events: u64,
    pub total_users: u64,
    pub users_with_lead: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakdownRow {
    pub key: String,
    pub events: u64,
    pub unique_users: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreativeRank {
    pub key: String,
    pub unique_users: u64,
}

/// The statistics artifact written to `stats/stats.json`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatsReport {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generated_at: Option<DateTime<Utc>>,
    pub summary: Summary,
    pub events_by_day: Counter,
    pub leads_by_day: Counter,
    pub by_platform: Vec<BreakdownRow>,
    pub by_theme: Vec<BreakdownRow>,
    pub by_lead_type: Vec<BreakdownRow>,
    pub by_creative: Vec<BreakdownRow>,
    pub best_creatives: Vec<CreativeRank>,
    pub leads_by_theme_users: Counter,
    pub users_raw: UserMap,
    pub meta: Checkpoint,
}

impl StatsReport {
    /// Derives the public tables from a checkpoint. The checkpoint itself is
    /// embedded as `meta` so the next run can resume from it.
    pub fn materialize(checkpoint: &Checkpoint, users: &UserMap) -> Self {
        Self {
            generated_at: None,
            summary: Summary {
                total_events: checkpoint.total_events,
                total_users: checkpoint.all_users.len() as u64,
                users_with_lead: checkpoint.users_with_lead.len() as u64,
            },
            events_by_day: checkpoint.events_by_day.clone(),
            leads_by_day: checkpoint.leads_by_day.clone(),
            by_platform: breakdown(checkpoint.tally(Dimension::Platform)),
            by_theme: breakdown(checkpoint.tally(Dimension::Theme)),
            by_lead_type: breakdown(checkpoint.tally(Dimension::LeadType)),
            by_creative: breakdown(checkpoint.tally(Dimension::Creative)),
            best_creatives: rank_creatives(checkpoint),
            leads_by_theme_users: checkpoint
                .lead_users_by_theme
                .iter()
                .map(|(theme, users)| (theme.clone(), users.len() as u64))
                .collect(),
            users_raw: users.clone(),
            meta: checkpoint.clone(),
        }
    }

    pub fn breakdown(&self, dimension: Dimension) -> &[BreakdownRow] {
        match dimension {
            Dimension::Platform => &self.by_platform,
            Dimension::Theme => &self.by_theme,
            Dimension::LeadType => &self.by_lead_type,
            Dimension::Creative => &self.by_creative,
        }
    }
}

fn breakdown(tally: &DimensionTally) -> Vec<BreakdownRow> {
    tally
        .events
        .iter()
        .map(|(key, events)| BreakdownRow {
            key: key.clone(),
            events: *events,
            unique_users: tally.unique_users(key) as u64,
        })
        .collect()
}

/// Creative variants by descending unique recipients; ties keep ascending
/// key order because the sort is stable over a key-ordered map.
fn rank_creatives(checkpoint: &Checkpoint) -> Vec<CreativeRank> {
    let mut ranked: Vec<CreativeRank> = checkpoint
        .creative_users
        .iter()
        .map(|(key, users)| CreativeRank {
            key: key.clone(),
            unique_users: users.len() as u64,
        })
        .collect();
    ranked.sort_by(|left, right| right.unique_users.cmp(&left.unique_users));
    ranked
}

/// Where the checkpoint for a run came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckpointSource {
    Restored,
    /// No previous artifact, or one without a checkpoint block.
    Fresh,
    /// The artifact was undecodable and has been quarantined.
    Corrupt { backup: Option<PathBuf>, reason: String },
    /// The artifact decoded but its checkpoint block did not.
    Invalid { reason: String },
    /// The artifact could not be read right now.
    Unreadable { reason: String },
}

pub struct StatsStore {
    path: PathBuf,
}

impl StatsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads the previous artifact's checkpoint, falling back to an empty
    /// one on any defect.
    pub fn load_checkpoint(&self) -> (Checkpoint, CheckpointSource) {
        let loaded = durable::load(&self.path, Value::Null);
        let document = match loaded.status {
            LoadStatus::Parsed => loaded.value,
            LoadStatus::Missing => return (Checkpoint::default(), CheckpointSource::Fresh),
            LoadStatus::Corrupt { backup, reason } => {
                return (
                    Checkpoint::default(),
                    CheckpointSource::Corrupt { backup, reason },
                );
            }
            LoadStatus::Unreadable { reason } => {
                return (
                    Checkpoint::default(),
                    CheckpointSource::Unreadable { reason },
                );
            }
        };

        let Some(meta) = document.get(CHECKPOINT_KEY) else {
            return (Checkpoint::default(), CheckpointSource::Fresh);
        };
        match serde_json::from_value::<Checkpoint>(meta.clone()) {
            Ok(checkpoint) => (checkpoint, CheckpointSource::Restored),
            Err(err) => {
                warn!(
                    target: "leadbot.stats",
                    "ignoring invalid checkpoint in {}: {}",
                    self.path.display(),
                    err
                );
                (
                    Checkpoint::default(),
                    CheckpointSource::Invalid {
                        reason: err.to_string(),
                    },
                )
            }
        }
    }

    /// Last complete artifact, if any.
    pub fn load_report(&self) -> Option<StatsReport> {
        let loaded = durable::load(&self.path, Value::Null);
        if loaded.value.is_null() {
            return None;
        }
        serde_json::from_value(loaded.value).ok()
    }

    pub fn write(&self, report: &StatsReport) -> Result<()> {
        durable::write_json_atomic(&self.path, report)
    }
}
