//! Resumable run processor: filtering, enrichment fan-out and checkpointing
//!
//! Walks each page of runs newest-first. Filter and checkpoint decisions are
//! made sequentially in page order; enrichment calls fan out per chunk; merges
//! are applied in page order once the whole chunk has settled, so same-date
//! buckets always observe newest→oldest updates.

use crate::services::aggregator::Aggregator;
use crate::services::checkpoint::CheckpointStore;
use crate::services::platform::RunEnricher;
use crate::types::{ProcessorState, Result, RunRecord};
use chrono::{DateTime, Utc};
use futures::future::join_all;
use std::convert::Infallible;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Default enrichment fan-out width
pub const DEFAULT_PARALLEL_CALLS: usize = 10;

/// Options controlling run filtering and enrichment.
#[derive(Debug, Clone)]
pub struct ProcessOptions {
    /// Lower date bound: the first run started before it stops pagination.
    pub newer_than: Option<DateTime<Utc>>,
    /// Upper date bound: runs started after it are skipped.
    pub older_than: Option<DateTime<Utc>>,
    /// Re-fetch each aggregated run for its cost breakdown maps.
    pub cost_breakdown: bool,
    /// Fetch each aggregated run's dataset item count.
    pub dataset_item_count: bool,
    /// Enrichment fan-out width per chunk.
    pub parallel_calls: usize,
}

impl Default for ProcessOptions {
    fn default() -> Self {
        Self {
            newer_than: None,
            older_than: None,
            cost_breakdown: false,
            dataset_item_count: false,
            parallel_calls: DEFAULT_PARALLEL_CALLS,
        }
    }
}

/// Outcome of one processed page.
#[derive(Debug, PartialEq)]
pub struct PageOutcome {
    /// True when the lower date bound was reached and pagination must stop.
    pub stop_loop: bool,
}

/// Verdict of the sequential planning pass for a single run.
enum Verdict {
    Process,
    Skip,
    Stop,
}

/// Drives the per-run decision sequence over pages of runs.
///
/// One instance lives for the whole process: the resume-point flag must
/// survive page boundaries, since the checkpointed run can sit anywhere in
/// the re-listed page.
pub struct ResumableProcessor<'a, E, C> {
    enricher: &'a E,
    checkpoint: &'a C,
    opts: ProcessOptions,
    migrating: Arc<AtomicBool>,
    /// True once the checkpointed run id was seen again after a restart.
    found_resume_point: bool,
}

impl<'a, E, C> ResumableProcessor<'a, E, C>
where
    E: RunEnricher,
    C: CheckpointStore,
{
    pub fn new(
        enricher: &'a E,
        checkpoint: &'a C,
        opts: ProcessOptions,
        migrating: Arc<AtomicBool>,
    ) -> Self {
        Self {
            enricher,
            checkpoint,
            opts,
            migrating,
            found_resume_point: false,
        }
    }

    /// Process one page of runs, newest first, mutating `state` in place.
    ///
    /// Never returns while a migration is in progress: once the flag is
    /// observed the resume point is flushed and the future parks forever,
    /// leaving the restart to the host.
    pub async fn process_page(
        &mut self,
        runs: &[RunRecord],
        state: &mut ProcessorState,
    ) -> Result<PageOutcome> {
        let chunk_size = self.opts.parallel_calls.max(1);

        for chunk in runs.chunks(chunk_size) {
            let mut planned: Vec<&RunRecord> = Vec::with_capacity(chunk.len());
            let mut migration_at: Option<String> = None;
            let mut stop = false;

            for run in chunk {
                if self.migrating.load(Ordering::Relaxed) {
                    migration_at = Some(run.id.clone());
                    break;
                }
                match self.plan_run(run, state) {
                    Verdict::Process => planned.push(run),
                    Verdict::Skip => {}
                    Verdict::Stop => {
                        stop = true;
                        break;
                    }
                }
            }

            let enricher = self.enricher;
            let opts = &self.opts;
            let enriched =
                join_all(planned.into_iter().map(|run| enrich_run(enricher, run, opts))).await;
            for result in enriched {
                let (run, item_count) = result?;
                Aggregator::merge_run(&mut state.date_aggregations, &run, item_count);
            }

            // Runs planned ahead of the flagged one are merged above, so the
            // flushed state matches the recorded resume point exactly.
            if let Some(run_id) = migration_at {
                self.suspend_for_migration(run_id, state).await?;
            }
            if stop {
                return Ok(PageOutcome { stop_loop: true });
            }
        }

        Ok(PageOutcome { stop_loop: false })
    }

    /// Sequential per-run verdict: resume-skip first, then the date bounds.
    fn plan_run(&mut self, run: &RunRecord, state: &mut ProcessorState) -> Verdict {
        if !self.found_resume_point {
            if let Some(last_id) = &state.last_processed_run_id {
                if run.id == *last_id {
                    // The checkpointed run may be only partially persisted;
                    // reprocess it inclusively.
                    debug!(run_id = %run.id, "found resume point, reprocessing checkpointed run");
                    state.last_processed_run_id = None;
                    self.found_resume_point = true;
                } else {
                    debug!(run_id = %run.id, "skipping run processed before restart");
                    return Verdict::Skip;
                }
            }
        }

        if let Some(older_than) = self.opts.older_than {
            if run.started_at > older_than {
                return Verdict::Skip;
            }
        }
        if let Some(newer_than) = self.opts.newer_than {
            if run.started_at < newer_than {
                return Verdict::Stop;
            }
        }

        Verdict::Process
    }

    /// Record the resume point, flush state, and park until the host tears
    /// the process down.
    async fn suspend_for_migration(
        &self,
        run_id: String,
        state: &mut ProcessorState,
    ) -> Result<()> {
        warn!(run_id = %run_id, "migration signal received, flushing state and pausing processing");
        state.last_processed_run_id = Some(run_id);
        self.checkpoint.save_state(state).await?;

        // The restarted process picks up from the flushed state; this future
        // must never complete.
        let never: Infallible = std::future::pending().await;
        match never {}
    }
}

/// Enrichment for a single run: the toggled detail re-fetch, then the toggled
/// dataset item count. The calls for different runs of a chunk overlap.
async fn enrich_run<E: RunEnricher>(
    enricher: &E,
    run: &RunRecord,
    opts: &ProcessOptions,
) -> Result<(RunRecord, Option<u64>)> {
    let run = if opts.cost_breakdown {
        enricher.run_detail(&run.id).await?
    } else {
        run.clone()
    };

    let item_count = if opts.dataset_item_count && !run.default_dataset_id.is_empty() {
        enricher.dataset_item_count(&run.default_dataset_id).await?
    } else {
        None
    };

    Ok((run, item_count))
}
