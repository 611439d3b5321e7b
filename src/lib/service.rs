use tracing::warn;

use crate::{
    aggregate::{self, AggregationRun},
    attribution::Attribution,
    config::Config,
    error::Result,
    event_log::{EventLog, EventRecord, EventTag},
    leads::LeadCatalog,
    stats::StatsStore,
    users::{UserDirectory, UserRecord, UserUpdate},
};

/// Entry point shared by the responder, the aggregator and the CLI. Owns
/// the on-disk stores for one data directory.
pub struct LeadBot {
    config: Config,
    events: EventLog,
    users: UserDirectory,
    stats: StatsStore,
    catalog: LeadCatalog,
}

impl LeadBot {
    /// Bootstraps the directory layout. Failures are logged and tolerated;
    /// later writes report their own errors.
    pub fn open(config: Config) -> Self {
        if let Err(err) = config.ensure_dirs() {
            warn!(
                "failed to create data directories under {}: {}",
                config.data_dir.display(),
                err
            );
        }

        let events = EventLog::new(config.events_path());
        if let Err(err) = events.ensure() {
            warn!(
                "failed to initialise event log {}: {}",
                events.path().display(),
                err
            );
        }

        Self {
            users: UserDirectory::new(config.users_path()),
            stats: StatsStore::new(config.stats_path()),
            catalog: LeadCatalog::from_config(&config),
            events,
            config,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn events(&self) -> &EventLog {
        &self.events
    }

    pub fn users(&self) -> &UserDirectory {
        &self.users
    }

    pub fn stats(&self) -> &StatsStore {
        &self.stats
    }

    pub fn catalog(&self) -> &LeadCatalog {
        &self.catalog
    }

    /// Appends one interaction, stamped now and carrying the user's stored
    /// chat id when one is known.
    pub fn record_interaction(
        &self,
        user_id: &str,
        event: EventTag,
        attribution: &Attribution,
        extra: &str,
    ) -> Result<EventRecord> {
        let chat_id = self.users.get(user_id).chat_id;
        let record =
            EventRecord::new(user_id, event, attribution.clone(), extra).with_chat_id(chat_id);
        self.events.append(&record)?;
        Ok(record)
    }

    pub fn get_or_create_user(&self, user_id: &str) -> Result<UserRecord> {
        self.users.get_or_create(user_id)
    }

    pub fn update_user(&self, user_id: &str, update: &UserUpdate) -> Result<UserRecord> {
        self.users.merge_update(user_id, update)
    }

    pub fn run_aggregation(&self) -> AggregationRun {
        aggregate::run(&self.events, &self.users, &self.stats)
    }
}
