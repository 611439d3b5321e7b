use std::path::PathBuf;

use anyhow::Result;
use clap::Args;

use leadbot::{
    aggregate::AggregationRun, attribution::Dimension, event_log::LogStatus,
    stats::CheckpointSource,
};

use super::open_bot;

#[derive(Args)]
pub struct StatsArgs {
    /// Print the full statistics artifact as JSON
    #[arg(long, default_value_t = false)]
    pub json: bool,

    /// Print the last written artifact without reading new log rows
    #[arg(long, default_value_t = false)]
    pub cached: bool,
}

pub fn execute(config_path: Option<PathBuf>, args: StatsArgs) -> Result<()> {
    let bot = open_bot(config_path)?;

    if args.cached {
        match bot.stats().load_report() {
            Some(report) if args.json => println!("{}", serde_json::to_string_pretty(&report)?),
            Some(report) => println!(
                "events={} users={} users_with_lead={}",
                report.summary.total_events,
                report.summary.total_users,
                report.summary.users_with_lead
            ),
            None => println!("no statistics recorded"),
        }
        return Ok(());
    }

    let run = bot.run_aggregation();
    report_defects(&run);

    if args.json {
        println!("{}", serde_json::to_string_pretty(&run.report)?);
        return Ok(());
    }

    let summary = &run.report.summary;
    println!(
        "events={} users={} users_with_lead={} processed_rows={} new_rows={} malformed_rows={}",
        summary.total_events,
        summary.total_users,
        summary.users_with_lead,
        run.report.meta.processed_events,
        run.new_rows,
        run.malformed_rows
    );
    for dimension in Dimension::ALL {
        for row in run.report.breakdown(dimension) {
            println!(
                "{} key={} events={} unique_users={}",
                dimension.as_str(),
                row.key,
                row.events,
                row.unique_users
            );
        }
    }
    for rank in &run.report.best_creatives {
        println!(
            "best_creative key={} unique_users={}",
            rank.key, rank.unique_users
        );
    }

    Ok(())
}

fn report_defects(run: &AggregationRun) {
    match &run.checkpoint_source {
        CheckpointSource::Corrupt { backup, reason } => match backup {
            Some(path) => eprintln!(
                "statistics artifact was corrupt ({reason}); moved to {}",
                path.display()
            ),
            None => eprintln!("statistics artifact was corrupt ({reason})"),
        },
        CheckpointSource::Invalid { reason } => {
            eprintln!("ignored invalid checkpoint ({reason})")
        }
        CheckpointSource::Unreadable { reason } => {
            eprintln!("previous statistics unreadable ({reason})")
        }
        CheckpointSource::Restored | CheckpointSource::Fresh => {}
    }

    match &run.log_status {
        LogStatus::Reset { backup, reason } => match backup {
            Some(path) => eprintln!(
                "event log was corrupt ({reason}); moved to {} and reset",
                path.display()
            ),
            None => eprintln!("event log was corrupt ({reason}) and has been reset"),
        },
        LogStatus::Unreadable { reason } => eprintln!("event log unreadable ({reason})"),
        LogStatus::Read | LogStatus::Created => {}
    }

    if run.rebuilt {
        eprintln!("event log shrank since the last run; statistics were rebuilt");
    }
    if !run.persisted {
        eprintln!("statistics could not be written");
    }
}
