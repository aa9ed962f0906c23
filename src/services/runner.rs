//! Pagination driver: walks the actor's run list newest-first, checkpointing
//! after every page, and finishes with the rollup, sink push and totals save.

use crate::services::aggregator::Aggregator;
use crate::services::checkpoint::CheckpointStore;
use crate::services::output::RecordSink;
use crate::services::platform::{RunEnricher, RunSource};
use crate::services::processor::{ProcessOptions, ResumableProcessor};
use crate::types::{DateAggregation, Result, TotalStats};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tracing::{info, warn};

/// Page size of the run listing.
pub const PAGE_LIMIT: u64 = 1000;

/// Result of a completed aggregation pass.
#[derive(Debug)]
pub struct AggregateOutcome {
    /// Rounded per-date records, ascending by date, as pushed to the sink.
    pub dates: Vec<DateAggregation>,
    pub totals: TotalStats,
    /// Where the persisted totals can be retrieved.
    pub totals_location: String,
}

/// Aggregate every matching run of an actor into per-date statistics.
///
/// Resumes from the checkpointed offset and run marker when present. Each
/// page is checkpointed with its own offset once processed, so a restart
/// re-lists the interrupted page rather than skipping it.
pub async fn aggregate_actor_runs<S, E, C, K>(
    source: &S,
    enricher: &E,
    store: &C,
    sink: &K,
    opts: ProcessOptions,
    migrating: Arc<AtomicBool>,
) -> Result<AggregateOutcome>
where
    S: RunSource,
    E: RunEnricher,
    C: CheckpointStore,
    K: RecordSink,
{
    let mut state = store.load_state().await?.unwrap_or_default();
    if state.last_processed_offset > 0 || state.last_processed_run_id.is_some() {
        info!(
            offset = state.last_processed_offset,
            resume_run = state.last_processed_run_id.as_deref().unwrap_or("-"),
            "resuming from checkpointed state"
        );
    }

    let mut processor = ResumableProcessor::new(enricher, store, opts, migrating);
    let mut offset = state.last_processed_offset;

    loop {
        let runs = source.list_runs(offset, PAGE_LIMIT).await?;
        let newest = runs
            .first()
            .map(|r| r.started_at.to_rfc3339())
            .unwrap_or_else(|| "-".into());
        let oldest = runs
            .last()
            .map(|r| r.started_at.to_rfc3339())
            .unwrap_or_else(|| "-".into());
        info!(
            count = runs.len(),
            offset,
            newest = %newest,
            oldest = %oldest,
            "processing page of runs"
        );

        let outcome = processor.process_page(&runs, &mut state).await?;

        // The offset stays on the completed page; a restart re-lists it and
        // the resume marker dedupes whatever was already merged.
        state.last_processed_offset = offset;
        store.save_state(&state).await?;

        if outcome.stop_loop {
            warn!("reached runs older than the requested lower bound, stopping pagination");
            break;
        }
        if (runs.len() as u64) < PAGE_LIMIT {
            warn!("no more runs to process");
            break;
        }
        offset += PAGE_LIMIT;
    }

    let (dates, totals) = Aggregator::rollup(&state.date_aggregations);
    sink.push_records(&dates).await?;
    store.save_state(&state).await?;
    store.save_totals(&totals).await?;

    info!(
        dates = dates.len(),
        runs = totals.run_count,
        "aggregation complete"
    );

    Ok(AggregateOutcome {
        dates,
        totals,
        totals_location: store.totals_location(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::checkpoint::FileCheckpointStore;
    use crate::types::{ProcessorState, RunMeta, RunRecord, RuntallyError};
    use chrono::{TimeZone, Utc};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tempfile::TempDir;

    struct MockSource {
        pages: HashMap<u64, Vec<RunRecord>>,
        calls: AtomicUsize,
    }

    impl MockSource {
        fn new(pages: HashMap<u64, Vec<RunRecord>>) -> Self {
            Self {
                pages,
                calls: AtomicUsize::new(0),
            }
        }
    }

    impl RunSource for MockSource {
        async fn list_runs(&self, offset: u64, _limit: u64) -> Result<Vec<RunRecord>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.pages.get(&offset).cloned().unwrap_or_default())
        }
    }

    /// Runner tests keep enrichment off, so any call here is a wiring bug.
    struct NullEnricher;

    impl RunEnricher for NullEnricher {
        async fn run_detail(&self, run_id: &str) -> Result<RunRecord> {
            Err(RuntallyError::Api(format!(
                "unexpected detail fetch for {}",
                run_id
            )))
        }

        async fn dataset_item_count(&self, dataset_id: &str) -> Result<Option<u64>> {
            Err(RuntallyError::Api(format!(
                "unexpected dataset fetch for {}",
                dataset_id
            )))
        }
    }

    #[derive(Default)]
    struct MemorySink {
        pushed: Mutex<Vec<DateAggregation>>,
    }

    impl RecordSink for MemorySink {
        async fn push_records(&self, records: &[DateAggregation]) -> Result<()> {
            self.pushed.lock().unwrap().extend_from_slice(records);
            Ok(())
        }
    }

    fn make_run(id: &str, day: u32, hour: u32, minute: u32, cost: Option<f64>) -> RunRecord {
        RunRecord {
            id: id.into(),
            started_at: Utc.with_ymd_and_hms(2024, 3, day, hour, minute, 0).unwrap(),
            build_number: "0.1.0".into(),
            status: "SUCCEEDED".into(),
            meta: RunMeta {
                origin: "API".into(),
            },
            default_dataset_id: String::new(),
            usage_total_usd: cost,
            usage_usd: None,
            usage: None,
        }
    }

    /// A descending page of `count` runs on one day.
    fn make_page(prefix: &str, count: usize, day: u32) -> Vec<RunRecord> {
        (0..count)
            .map(|i| {
                let hour = 23 - (i / 60) as u32;
                let minute = 59 - (i % 60) as u32;
                make_run(&format!("{}-{}", prefix, i), day, hour, minute, Some(0.01))
            })
            .collect()
    }

    fn test_store() -> (FileCheckpointStore, TempDir) {
        let temp = TempDir::new().unwrap();
        let store = FileCheckpointStore::with_state_dir(temp.path().to_path_buf());
        (store, temp)
    }

    fn not_migrating() -> Arc<AtomicBool> {
        Arc::new(AtomicBool::new(false))
    }

    #[tokio::test]
    async fn test_single_short_page_completes() {
        let source = MockSource::new(HashMap::from([(
            0,
            vec![
                make_run("r3", 20, 12, 0, Some(0.3)),
                make_run("r2", 15, 12, 0, Some(0.2)),
                make_run("r1", 15, 8, 0, Some(0.1)),
            ],
        )]));
        let (store, temp) = test_store();
        let sink = MemorySink::default();

        let outcome = aggregate_actor_runs(
            &source,
            &NullEnricher,
            &store,
            &sink,
            ProcessOptions::default(),
            not_migrating(),
        )
        .await
        .unwrap();

        assert_eq!(outcome.totals.run_count, 3);
        assert!((outcome.totals.cost - 0.6).abs() < 1e-9);
        assert_eq!(outcome.dates.len(), 2);
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
        assert_eq!(sink.pushed.lock().unwrap().len(), 2);
        assert!(!outcome.totals_location.is_empty());

        // Totals were persisted alongside the state
        let totals_json =
            std::fs::read_to_string(temp.path().join("TOTAL_STATS.json")).unwrap();
        assert!(totals_json.contains("\"runCount\": 3"));
    }

    #[tokio::test]
    async fn test_full_page_advances_offset() {
        let source = MockSource::new(HashMap::from([
            (0, make_page("p0", PAGE_LIMIT as usize, 20)),
            (PAGE_LIMIT, make_page("p1", 2, 15)),
        ]));
        let (store, _temp) = test_store();
        let sink = MemorySink::default();

        let outcome = aggregate_actor_runs(
            &source,
            &NullEnricher,
            &store,
            &sink,
            ProcessOptions::default(),
            not_migrating(),
        )
        .await
        .unwrap();

        assert_eq!(outcome.totals.run_count, PAGE_LIMIT + 2);
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);

        let saved = store.load_state().await.unwrap().unwrap();
        assert_eq!(saved.last_processed_offset, PAGE_LIMIT);
    }

    #[tokio::test]
    async fn test_stop_loop_halts_following_pages() {
        // Both pages are full; without the bound a third listing would follow
        let source = MockSource::new(HashMap::from([
            (0, make_page("p0", PAGE_LIMIT as usize, 20)),
            (PAGE_LIMIT, make_page("p1", PAGE_LIMIT as usize, 15)),
        ]));
        let (store, _temp) = test_store();
        let sink = MemorySink::default();
        let opts = ProcessOptions {
            newer_than: Some(Utc.with_ymd_and_hms(2024, 3, 18, 0, 0, 0).unwrap()),
            ..Default::default()
        };

        let outcome = aggregate_actor_runs(
            &source,
            &NullEnricher,
            &store,
            &sink,
            opts,
            not_migrating(),
        )
        .await
        .unwrap();

        // Day 20 passes the bound; the first day-15 run stops the walk
        assert_eq!(outcome.totals.run_count, PAGE_LIMIT);
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);

        // The stopped page keeps its own offset
        let saved = store.load_state().await.unwrap().unwrap();
        assert_eq!(saved.last_processed_offset, PAGE_LIMIT);
    }

    #[tokio::test]
    async fn test_resume_uses_checkpointed_offset_and_marker() {
        let page = vec![
            make_run("p1-0", 15, 12, 0, Some(0.1)),
            make_run("p1-1", 15, 11, 0, Some(0.1)),
            make_run("p1-2", 15, 10, 0, Some(0.1)),
        ];
        let source = MockSource::new(HashMap::from([(PAGE_LIMIT, page)]));
        let (store, _temp) = test_store();
        let sink = MemorySink::default();

        // Simulate the state flushed after a migration mid-page: p1-0 was
        // merged before the interrupt, p1-1 is the resume point.
        let mut prior = ProcessorState {
            last_processed_run_id: Some("p1-1".into()),
            last_processed_offset: PAGE_LIMIT,
            ..Default::default()
        };
        let merged = make_run("p1-0", 15, 12, 0, Some(0.1));
        Aggregator::merge_run(&mut prior.date_aggregations, &merged, None);
        store.save_state(&prior).await.unwrap();

        let outcome = aggregate_actor_runs(
            &source,
            &NullEnricher,
            &store,
            &sink,
            ProcessOptions::default(),
            not_migrating(),
        )
        .await
        .unwrap();

        // p1-0 skipped (already merged), p1-1 reprocessed, p1-2 processed
        assert_eq!(outcome.totals.run_count, 3);
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);

        let saved = store.load_state().await.unwrap().unwrap();
        assert!(saved.last_processed_run_id.is_none());
        assert_eq!(saved.last_processed_offset, PAGE_LIMIT);
    }

    #[tokio::test]
    async fn test_empty_actor_produces_empty_totals() {
        let source = MockSource::new(HashMap::new());
        let (store, temp) = test_store();
        let sink = MemorySink::default();

        let outcome = aggregate_actor_runs(
            &source,
            &NullEnricher,
            &store,
            &sink,
            ProcessOptions::default(),
            not_migrating(),
        )
        .await
        .unwrap();

        assert_eq!(outcome.totals.run_count, 0);
        assert!(outcome.totals.first_run_date.is_none());
        assert!(outcome.dates.is_empty());
        assert!(sink.pushed.lock().unwrap().is_empty());
        assert!(temp.path().join("TOTAL_STATS.json").exists());
    }

    #[tokio::test]
    async fn test_sink_receives_rounded_ascending_records() {
        let runs = vec![
            make_run("r3", 16, 12, 0, Some(0.00004)),
            make_run("r2", 16, 11, 0, Some(0.00004)),
            make_run("r1", 15, 12, 0, Some(0.00004)),
        ];
        let source = MockSource::new(HashMap::from([(0, runs)]));
        let (store, _temp) = test_store();
        let sink = MemorySink::default();

        aggregate_actor_runs(
            &source,
            &NullEnricher,
            &store,
            &sink,
            ProcessOptions::default(),
            not_migrating(),
        )
        .await
        .unwrap();

        let pushed = sink.pushed.lock().unwrap();
        assert_eq!(pushed.len(), 2);
        assert!(pushed[0].date < pushed[1].date);
        // Two 0.00004 runs round to 0.0001 only at output time
        assert!((pushed[1].cost - 0.0001).abs() < f64::EPSILON);
    }
}
