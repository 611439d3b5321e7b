use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::attribution::Dimension;

pub type Counter = BTreeMap<String, u64>;
pub type UserSets = BTreeMap<String, BTreeSet<String>>;

/// Running event counts and contributing users for one attribution
/// dimension.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DimensionTally {
    pub events: Counter,
    pub users: UserSets,
}

impl DimensionTally {
    pub fn record(&mut self, key: &str, user_id: &str) {
        *self.events.entry(key.to_string()).or_default() += 1;
        self.users
            .entry(key.to_string())
            .or_default()
            .insert(user_id.to_string());
    }

    pub fn unique_users(&self, key: &str) -> usize {
        self.users.get(key).map(BTreeSet::len).unwrap_or(0)
    }
}

/// Everything an aggregation run needs to resume where the previous one
/// stopped. Persisted as the `meta` block of the statistics artifact.
///
/// Every field defaults when absent, so a checkpoint written by an older
/// build (or one missing blocks) still loads.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Checkpoint {
    /// Log rows already folded in, malformed rows included.
    pub processed_events: u64,
    /// Well-formed events folded in.
    pub total_events: u64,
    pub events_by_day: Counter,
    pub leads_by_day: Counter,
    pub by_platform: DimensionTally,
    pub by_theme: DimensionTally,
    pub by_lead_type: DimensionTally,
    pub by_creative: DimensionTally,
    pub all_users: BTreeSet<String>,
    pub users_with_lead: BTreeSet<String>,
    pub lead_users_by_theme: UserSets,
    /// Lead recipients per `theme_leadtype_creative`.
    pub creative_users: UserSets,
}

impl Checkpoint {
    pub fn tally(&self, dimension: Dimension) -> &DimensionTally {
        match dimension {
            Dimension::Platform => &self.by_platform,
            Dimension::Theme => &self.by_theme,
            Dimension::LeadType => &self.by_lead_type,
            Dimension::Creative => &self.by_creative,
        }
    }

    pub fn tally_mut(&mut self, dimension: Dimension) -> &mut DimensionTally {
        match dimension {
            Dimension::Platform => &mut self.by_platform,
            Dimension::Theme => &mut self.by_theme,
            Dimension::LeadType => &mut self.by_lead_type,
            Dimension::Creative => &mut self.by_creative,
        }
    }

    /// True when `self` could have been produced from `earlier` by folding
    /// more rows: counters and sets never shrink.
    pub fn extends(&self, earlier: &Checkpoint) -> bool {
        self.processed_events >= earlier.processed_events
            && self.total_events >= earlier.total_events
            && counter_extends(&self.events_by_day, &earlier.events_by_day)
            && counter_extends(&self.leads_by_day, &earlier.leads_by_day)
            && Dimension::ALL.iter().all(|dimension| {
                let now = self.tally(*dimension);
                let then = earlier.tally(*dimension);
                counter_extends(&now.events, &then.events) && sets_extend(&now.users, &then.users)
            })
            && self.all_users.is_superset(&earlier.all_users)
            && self.users_with_lead.is_superset(&earlier.users_with_lead)
            && sets_extend(&self.lead_users_by_theme, &earlier.lead_users_by_theme)
            && sets_extend(&self.creative_users, &earlier.creative_users)
    }
}

fn counter_extends(now: &Counter, then: &Counter) -> bool {
    then.iter()
        .all(|(key, count)| now.get(key).copied().unwrap_or(0) >= *count)
}

fn sets_extend(now: &UserSets, then: &UserSets) -> bool {
    then.iter().all(|(key, users)| {
        now.get(key)
            .map(|current| current.is_superset(users))
            .unwrap_or(users.is_empty())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_checkpoint_fills_defaults() {
        let checkpoint: Checkpoint = serde_json::from_str(
            r#"{"processed_events": 12, "by_theme": {"events": {"TH1": 3}}}"#,
        )
        .unwrap();
        assert_eq!(checkpoint.processed_events, 12);
        assert_eq!(checkpoint.by_theme.events.get("TH1"), Some(&3));
        assert!(checkpoint.by_theme.users.is_empty());
        assert!(checkpoint.all_users.is_empty());
    }

    #[test]
    fn extends_detects_shrinking_sets() {
        let mut earlier = Checkpoint::default();
        earlier.by_platform.record("yt", "1");
        earlier.all_users.insert("1".into());
        earlier.processed_events = 1;

        let mut later = earlier.clone();
        later.by_platform.record("yt", "2");
        later.all_users.insert("2".into());
        later.processed_events = 2;
        assert!(later.extends(&earlier));
        assert!(!earlier.extends(&later));
    }
}
