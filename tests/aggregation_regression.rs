use std::fs;

use anyhow::Result;
use serde_json::Value;
use tempfile::TempDir;

use leadbot::{
    Attribution, EventTag, LeadBot, UserUpdate,
    config::Config,
    event_log::LogStatus,
    stats::{CheckpointSource, StatsReport},
};

const HEADER: &str = "timestamp;chat_id;user_id;event;platform;theme;lead_type;creative;extra\n";

fn open(dir: &TempDir) -> LeadBot {
    LeadBot::open(Config::with_data_dir(dir.path()))
}

fn record(bot: &LeadBot, user: &str, tag: EventTag, code: &str) -> Result<()> {
    bot.record_interaction(user, tag, &Attribution::parse(code), "")?;
    Ok(())
}

fn strip_generated_at(report: &StatsReport) -> StatsReport {
    StatsReport {
        generated_at: None,
        ..report.clone()
    }
}

#[test]
fn rerun_without_new_rows_changes_nothing() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let bot = open(&dir);
    record(&bot, "1", EventTag::Start, "yt_TH1_CL_01")?;
    record(&bot, "1", EventTag::LeadSent, "yt_TH1_CL_01")?;

    let first = bot.run_aggregation();
    let second = bot.run_aggregation();

    assert_eq!(second.checkpoint_source, CheckpointSource::Restored);
    assert_eq!(second.new_rows, 0);
    assert_eq!(
        strip_generated_at(&first.report),
        strip_generated_at(&second.report)
    );
    Ok(())
}

#[test]
fn incremental_runs_match_a_single_pass() -> Result<()> {
    let codes = [
        ("1", EventTag::Start, "yt_TH1_CL_01"),
        ("1", EventTag::LeadSent, "yt_TH1_CL_01"),
        ("2", EventTag::Start, "vk_TH2_MG_02"),
        ("2", EventTag::ButtonClick, ""),
        ("3", EventTag::Start, "yt_TH1_CL_02"),
        ("3", EventTag::LeadSent, "yt_TH1_CL_02"),
        ("2", EventTag::LeadSent, "vk_TH2_MG_02"),
    ];

    let incremental_dir = tempfile::tempdir()?;
    let incremental = open(&incremental_dir);
    let mut previous = None;
    for (user, tag, code) in codes.iter().cloned() {
        record(&incremental, user, tag, code)?;
        let run = incremental.run_aggregation();
        if let Some(earlier) = &previous {
            assert!(run.report.meta.extends(earlier), "checkpoint went backwards");
        }
        previous = Some(run.report.meta.clone());
    }

    let single_dir = tempfile::tempdir()?;
    let single = open(&single_dir);
    for (user, tag, code) in codes.iter().cloned() {
        record(&single, user, tag, code)?;
    }
    let whole = single.run_aggregation();

    let last = incremental.run_aggregation();
    assert_eq!(last.report.meta, whole.report.meta);
    assert_eq!(last.report.summary, whole.report.summary);
    assert_eq!(last.report.best_creatives, whole.report.best_creatives);
    assert_eq!(whole.report.summary.total_events, 7);
    assert_eq!(whole.report.summary.users_with_lead, 3);
    Ok(())
}

#[test]
fn malformed_rows_are_counted_but_not_folded() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let bot = open(&dir);
    fs::write(
        bot.events().path(),
        format!("{HEADER}2024-05-01T10:00:00;;1;start;yt;TH1;CL;01;\n2024-05-01;;2;start\n"),
    )?;

    let run = bot.run_aggregation();
    assert_eq!(run.log_status, LogStatus::Read);
    assert_eq!(run.malformed_rows, 1);
    assert_eq!(run.report.summary.total_events, 1);
    assert_eq!(run.report.meta.processed_events, 2);

    let rerun = bot.run_aggregation();
    assert_eq!(rerun.new_rows, 0);
    assert_eq!(rerun.malformed_rows, 0);
    Ok(())
}

#[test]
fn corrupt_user_directory_is_isolated() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let bot = open(&dir);
    record(&bot, "1", EventTag::Start, "yt_TH1_CL_01")?;
    fs::write(bot.users().path(), b"{\"1\": {\"theme\": ")?;

    let run = bot.run_aggregation();
    assert!(run.persisted);
    assert_eq!(run.report.summary.total_events, 1);
    assert!(run.report.users_raw.is_empty());

    let quarantined = fs::read_dir(bot.config().users_dir())?
        .filter_map(|entry| entry.ok())
        .any(|entry| entry.file_name().to_string_lossy().contains(".corrupt-"));
    assert!(quarantined, "expected a quarantined copy of users.json");

    let updated = bot.update_user("1", &UserUpdate::lead_sent())?;
    assert!(updated.has_lead());
    Ok(())
}

#[test]
fn shrunken_log_triggers_rebuild() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let bot = open(&dir);
    for user in ["1", "2", "3"] {
        record(&bot, user, EventTag::Start, "yt_TH1_CL_01")?;
    }
    assert_eq!(bot.run_aggregation().report.meta.processed_events, 3);

    fs::write(
        bot.events().path(),
        format!("{HEADER}2024-06-01T08:00:00;;9;lead_sent;tg;TH5;QZ;02;\n"),
    )?;
    let run = bot.run_aggregation();
    assert!(run.rebuilt);
    assert_eq!(run.report.meta.processed_events, 1);
    assert_eq!(run.report.summary.total_events, 1);
    assert_eq!(run.report.summary.total_users, 1);
    assert_eq!(run.report.best_creatives[0].key, "TH5_QZ_02");
    Ok(())
}

#[test]
fn undecodable_log_is_reset_and_stats_rebuilt() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let bot = open(&dir);
    record(&bot, "1", EventTag::Start, "yt_TH1_CL_01")?;
    record(&bot, "2", EventTag::Start, "yt_TH1_CL_01")?;
    bot.run_aggregation();

    let mut bytes = HEADER.as_bytes().to_vec();
    bytes.extend_from_slice(b"2024-05-01;;\xff\xfe;start;yt;TH1;CL;01;\n");
    fs::write(bot.events().path(), bytes)?;

    let run = bot.run_aggregation();
    assert!(matches!(run.log_status, LogStatus::Reset { .. }));
    assert_eq!(run.report.summary.total_events, 0);
    assert_eq!(run.report.meta.processed_events, 0);
    assert_eq!(fs::read_to_string(bot.events().path())?, HEADER);

    record(&bot, "3", EventTag::Start, "vk_TH2")?;
    let after = bot.run_aggregation();
    assert_eq!(after.log_status, LogStatus::Read);
    assert_eq!(after.report.summary.total_events, 1);
    Ok(())
}

#[test]
fn artifact_embeds_users_and_checkpoint() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let bot = open(&dir);
    bot.update_user(
        "1",
        &UserUpdate::from_attribution(&Attribution::parse("yt_TH1_CL_01")).with_chat_id(1),
    )?;
    record(&bot, "1", EventTag::Start, "yt_TH1_CL_01")?;
    bot.run_aggregation();

    let written: Value = serde_json::from_str(&fs::read_to_string(bot.stats().path())?)?;
    assert_eq!(written["users_raw"]["1"]["theme"], "TH1");
    assert_eq!(written["meta"]["processed_events"], 1);
    assert!(written["generated_at"].is_string());
    assert_eq!(written["by_platform"][0]["key"], "yt");
    Ok(())
}
