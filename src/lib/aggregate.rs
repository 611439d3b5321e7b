//! Incremental statistics: fold newly logged events into the checkpoint
//! carried over from the previous run, then materialize the report.
//!
//! [`aggregate`] is pure. [`run`] wires it to the event log, the user
//! directory and the statistics store, and owns the only recovery decision:
//! when the checkpoint claims more rows than the log holds, the log was
//! truncated or replaced and the statistics are rebuilt from row zero.

use chrono::Utc;
use tracing::{info, warn};

use crate::{
    attribution::Dimension,
    checkpoint::Checkpoint,
    event_log::{EventLog, EventRecord, LogStatus},
    stats::{CheckpointSource, StatsReport, StatsStore},
    users::{UserDirectory, UserMap},
};

/// Folds one well-formed record into `checkpoint`.
pub fn fold(checkpoint: &mut Checkpoint, record: &EventRecord) {
    let user_id = record.user_id.as_str();
    let lead = record.is_lead_delivery();

    checkpoint.total_events += 1;
    checkpoint.all_users.insert(user_id.to_string());

    if let Some(day) = record.day() {
        let day = day.format("%Y-%m-%d").to_string();
        if lead {
            *checkpoint.leads_by_day.entry(day.clone()).or_default() += 1;
        }
        *checkpoint.events_by_day.entry(day).or_default() += 1;
    }

    for dimension in Dimension::ALL {
        let value = record.attribution.get(dimension);
        if !value.is_empty() {
            checkpoint.tally_mut(dimension).record(value, user_id);
        }
    }

    if lead {
        checkpoint.users_with_lead.insert(user_id.to_string());
        let theme = record.attribution.theme.as_str();
        if !theme.is_empty() {
            checkpoint
                .lead_users_by_theme
                .entry(theme.to_string())
                .or_default()
                .insert(user_id.to_string());
        }
        if let Some(key) = record.attribution.lead_key() {
            checkpoint
                .creative_users
                .entry(key)
                .or_default()
                .insert(user_id.to_string());
        }
    }
}

/// Folds `new_records` into `previous` and materializes the report.
/// `total_rows` is the log's full row count and becomes the new
/// `processed_events`, so malformed rows are never retried.
pub fn aggregate(
    previous: Checkpoint,
    new_records: &[EventRecord],
    total_rows: u64,
    users: &UserMap,
) -> (StatsReport, Checkpoint) {
    let mut checkpoint = previous;
    for record in new_records {
        fold(&mut checkpoint, record);
    }
    checkpoint.processed_events = total_rows;

    let report = StatsReport::materialize(&checkpoint, users);
    (report, checkpoint)
}

#[derive(Debug, Clone)]
pub struct AggregationRun {
    pub report: StatsReport,
    pub checkpoint_source: CheckpointSource,
    pub log_status: LogStatus,
    /// Rows read past the previous checkpoint (malformed ones included).
    pub new_rows: u64,
    pub malformed_rows: u64,
    /// The checkpoint was ahead of the log and statistics were rebuilt.
    pub rebuilt: bool,
    /// Whether the artifact write succeeded.
    pub persisted: bool,
}

pub fn run(log: &EventLog, users: &UserDirectory, store: &StatsStore) -> AggregationRun {
    let (mut previous, checkpoint_source) = store.load_checkpoint();
    let mut read = log.read_new_events(previous.processed_events);

    if matches!(read.status, LogStatus::Unreadable { .. }) {
        // Nothing was observed; keep the checkpoint where it is.
        read.total_rows = previous.processed_events;
    }

    let mut rebuilt = false;
    if previous.processed_events > read.total_rows {
        warn!(
            target: "leadbot.aggregate",
            "checkpoint covers {} rows but {} holds {}; rebuilding statistics",
            previous.processed_events,
            log.path().display(),
            read.total_rows
        );
        previous = Checkpoint::default();
        let observed = read.status;
        read = log.read_new_events(0);
        if observed != LogStatus::Read {
            read.status = observed;
        }
        rebuilt = true;
    }

    let new_rows = read.total_rows.saturating_sub(previous.processed_events);
    let directory = users.load().into_value();
    let (mut report, checkpoint) = aggregate(previous, &read.records, read.total_rows, &directory);
    report.generated_at = Some(Utc::now());

    let persisted = match store.write(&report) {
        Ok(()) => true,
        Err(err) => {
            warn!(
                target: "leadbot.aggregate",
                "failed to write statistics to {}: {}",
                store.path().display(),
                err
            );
            false
        }
    };

    info!(
        "aggregated {} new row(s); {} processed, {} events, {} users",
        new_rows,
        checkpoint.processed_events,
        report.summary.total_events,
        report.summary.total_users
    );

    AggregationRun {
        report,
        checkpoint_source,
        log_status: read.status,
        new_rows,
        malformed_rows: read.malformed,
        rebuilt,
        persisted,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{attribution::Attribution, event_log::EventTag};

    fn event(user: &str, tag: EventTag, code: &str, timestamp: &str) -> EventRecord {
        EventRecord::new(user, tag, Attribution::parse(code), "").with_timestamp(timestamp)
    }

    fn sample() -> Vec<EventRecord> {
        vec![
            event("1", EventTag::Start, "yt_TH1_CL_01", "2024-05-01T09:00:00"),
            event("1", EventTag::LeadSent, "yt_TH1_CL_01", "2024-05-01T09:01:00"),
            event("2", EventTag::Start, "vk_TH2_MG_02", "2024-05-02T10:00:00"),
            event("2", EventTag::LeadFileNotFound, "vk_TH2_MG_02", "garbage"),
            event("3", EventTag::Start, "yt_TH1", "2024-05-02T11:00:00"),
            event("3", EventTag::LeadSent, "yt_TH1", "2024-05-02T11:05:00"),
            event("4", EventTag::LeadSent, "yt_TH1_CL_01", "2024-05-03T08:00:00"),
        ]
    }

    #[test]
    fn folds_all_breakdowns_in_one_pass() {
        let records = sample();
        let (report, checkpoint) =
            aggregate(Checkpoint::default(), &records, 7, &UserMap::new());

        assert_eq!(checkpoint.processed_events, 7);
        assert_eq!(report.summary.total_events, 7);
        assert_eq!(report.summary.total_users, 4);
        assert_eq!(report.summary.users_with_lead, 3);

        // The unparsable timestamp counts toward totals but no day.
        assert_eq!(report.events_by_day.values().sum::<u64>(), 6);
        assert_eq!(report.events_by_day.get("2024-05-02"), Some(&3));
        assert_eq!(report.leads_by_day.get("2024-05-01"), Some(&1));
        assert_eq!(report.leads_by_day.get("2024-05-02"), Some(&1));

        let themes = report.breakdown(Dimension::Theme);
        assert_eq!(themes[0].key, "TH1");
        assert_eq!(themes[0].events, 5);
        assert_eq!(themes[0].unique_users, 3);
        assert_eq!(themes[1].key, "TH2");

        let creatives = report.breakdown(Dimension::Creative);
        assert_eq!(creatives.len(), 2);
        assert_eq!(creatives[0].key, "01");

        assert_eq!(report.leads_by_theme_users.get("TH1"), Some(&3));
        assert_eq!(report.best_creatives.len(), 1);
        assert_eq!(report.best_creatives[0].key, "TH1_CL_01");
        assert_eq!(report.best_creatives[0].unique_users, 2);
    }

    #[test]
    fn incremental_folds_match_single_pass() {
        let records = sample();
        let (_, whole) = aggregate(
            Checkpoint::default(),
            &records,
            records.len() as u64,
            &UserMap::new(),
        );

        for split in 0..=records.len() {
            let (_, first) = aggregate(
                Checkpoint::default(),
                &records[..split],
                split as u64,
                &UserMap::new(),
            );
            let persisted: Checkpoint =
                serde_json::from_value(serde_json::to_value(&first).unwrap()).unwrap();
            let (_, second) = aggregate(
                persisted,
                &records[split..],
                records.len() as u64,
                &UserMap::new(),
            );
            assert_eq!(second, whole, "split at {split}");
            assert!(second.extends(&first));
        }
    }

    #[test]
    fn empty_fold_is_idempotent() {
        let records = sample();
        let (first_report, first) =
            aggregate(Checkpoint::default(), &records, 7, &UserMap::new());
        let (second_report, second) = aggregate(first.clone(), &[], 7, &UserMap::new());

        assert_eq!(first, second);
        assert_eq!(first_report, second_report);
    }

    #[test]
    fn lead_without_full_key_skips_creative_ranking() {
        let records = vec![event("9", EventTag::LeadSent, "tg__CL_01", "2024-05-01")];
        let (report, _) = aggregate(Checkpoint::default(), &records, 1, &UserMap::new());
        assert!(report.best_creatives.is_empty());
        assert!(report.leads_by_theme_users.is_empty());
        assert_eq!(report.summary.users_with_lead, 1);
    }
}
