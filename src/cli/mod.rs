use crate::services::{
    aggregate_actor_runs, ActorRunSource, AggregateOutcome, DatasetSink, FileCheckpointStore,
    JsonlSink, OutputSink, PlatformClient, ProcessOptions, RemoteCheckpointStore, StateStore,
    DEFAULT_PARALLEL_CALLS,
};
use crate::types::{Result, RuntallyError};
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use clap::Parser;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

/// Per-date run statistics for a cloud actor
#[derive(Parser, Debug)]
#[command(name = "runtally")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Actor ID or name whose runs are aggregated
    pub actor: String,

    /// Only aggregate runs started on or after this date
    /// (YYYY-MM-DD or with time YYYY-MM-DDTHH:mm:ss)
    #[arg(long, value_name = "DATE")]
    pub only_runs_newer_than: Option<String>,

    /// Only aggregate runs started on or before this date
    #[arg(long, value_name = "DATE")]
    pub only_runs_older_than: Option<String>,

    /// Re-fetch each aggregated run for per-usage-type cost breakdowns
    #[arg(long)]
    pub cost_breakdown: bool,

    /// Count each aggregated run's default dataset items
    #[arg(long)]
    pub dataset_item_count: bool,

    /// Concurrent detail/dataset calls per chunk
    #[arg(long, default_value_t = DEFAULT_PARALLEL_CALLS)]
    pub parallel_calls: usize,

    /// Platform API root, e.g. https://api.example.com
    #[arg(long, value_name = "URL")]
    pub base_url: String,

    /// API token; falls back to the RUNTALLY_TOKEN environment variable
    #[arg(long, value_name = "TOKEN")]
    pub token: Option<String>,

    /// Key-value store receiving the STATE and TOTAL_STATS records;
    /// checkpoints go to local files when absent
    #[arg(long, value_name = "ID")]
    pub store_id: Option<String>,

    /// Dataset receiving the per-date records; a local date-stats.jsonl
    /// is written when absent
    #[arg(long, value_name = "ID")]
    pub dataset_id: Option<String>,

    /// Directory for local state and output files
    #[arg(long, value_name = "DIR")]
    pub state_dir: Option<PathBuf>,
}

impl Cli {
    pub async fn run(self) -> anyhow::Result<()> {
        let token = match self
            .token
            .clone()
            .or_else(|| std::env::var("RUNTALLY_TOKEN").ok())
        {
            Some(t) if !t.is_empty() => t,
            _ => anyhow::bail!("API token missing, pass --token or set RUNTALLY_TOKEN"),
        };
        if self.parallel_calls == 0 {
            anyhow::bail!("--parallel-calls must be at least 1");
        }

        let newer_than = self
            .only_runs_newer_than
            .as_deref()
            .map(parse_bound)
            .transpose()?;
        let older_than = self
            .only_runs_older_than
            .as_deref()
            .map(parse_bound)
            .transpose()?;
        if let (Some(newer), Some(older)) = (newer_than, older_than) {
            if newer > older {
                anyhow::bail!(
                    "'--only-runs-newer-than' must be an older date than '--only-runs-older-than'"
                );
            }
        }

        let client = PlatformClient::new(self.base_url.as_str(), token.as_str())?;
        let source = ActorRunSource::new(client.clone(), self.actor.as_str());

        let store = match &self.store_id {
            Some(store_id) => {
                StateStore::Remote(RemoteCheckpointStore::new(client.clone(), store_id.as_str()))
            }
            None => StateStore::Local(self.local_store()?),
        };
        let sink = match &self.dataset_id {
            Some(dataset_id) => {
                OutputSink::Dataset(DatasetSink::new(client.clone(), dataset_id.as_str()))
            }
            None => OutputSink::Jsonl(JsonlSink::new(self.local_dir()?.join("date-stats.jsonl"))),
        };

        let opts = ProcessOptions {
            newer_than,
            older_than,
            cost_breakdown: self.cost_breakdown,
            dataset_item_count: self.dataset_item_count,
            parallel_calls: self.parallel_calls,
        };

        let migrating = Arc::new(AtomicBool::new(false));
        spawn_migration_listener(migrating.clone());

        info!(actor = %self.actor, "aggregating actor runs");
        let outcome =
            aggregate_actor_runs(&source, &client, &store, &sink, opts, migrating).await?;

        print_summary(&outcome);
        Ok(())
    }

    fn local_store(&self) -> Result<FileCheckpointStore> {
        match &self.state_dir {
            Some(dir) => {
                std::fs::create_dir_all(dir)?;
                Ok(FileCheckpointStore::with_state_dir(dir.clone()))
            }
            None => FileCheckpointStore::new(),
        }
    }

    fn local_dir(&self) -> Result<PathBuf> {
        match &self.state_dir {
            Some(dir) => Ok(dir.clone()),
            None => FileCheckpointStore::default_state_dir(),
        }
    }
}

/// Parse a date bound: RFC 3339, or a naive datetime/date taken as UTC.
/// Plain dates mean midnight.
fn parse_bound(raw: &str) -> Result<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S") {
        return Ok(Utc.from_utc_datetime(&naive));
    }
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Ok(Utc.from_utc_datetime(&date.and_time(NaiveTime::MIN)));
    }
    Err(RuntallyError::Config(format!(
        "Invalid date format '{}', use YYYY-MM-DD or with time YYYY-MM-DDTHH:mm:ss",
        raw
    )))
}

/// Raise the migration flag when the host signals shutdown (SIGTERM, or
/// Ctrl-C on platforms without it).
fn spawn_migration_listener(flag: Arc<AtomicBool>) {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            match signal(SignalKind::terminate()) {
                Ok(mut term) => {
                    term.recv().await;
                }
                Err(e) => {
                    warn!("failed to install SIGTERM handler: {}", e);
                    return;
                }
            }
        }
        #[cfg(not(unix))]
        {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("failed to install shutdown handler: {}", e);
                return;
            }
        }
        warn!("shutdown signal received, treating as migration");
        flag.store(true, Ordering::Relaxed);
    });
}

fn print_summary(outcome: &AggregateOutcome) {
    let totals = &outcome.totals;
    println!(
        "Aggregated {} runs across {} dates",
        totals.run_count,
        outcome.dates.len()
    );
    println!("Total cost: ${:.4}", totals.cost);
    if let Some(items) = totals.dataset_items {
        println!("Dataset items: {}", items);
    }
    if let (Some(first), Some(last)) = (totals.first_run_date, totals.last_run_date) {
        println!("Period: {} to {}", first.to_rfc3339(), last.to_rfc3339());
    }
    println!(
        "Total stats for whole period are available at {}",
        outcome.totals_location
    );
}
