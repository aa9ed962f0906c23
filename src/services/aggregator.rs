//! Aggregator service for folding runs into per-date statistics

use crate::types::{DateAggregation, RunRecord, TotalStats};
use chrono::NaiveDate;
use std::collections::BTreeMap;

/// Aggregator for per-date run statistics
pub struct Aggregator;

impl Aggregator {
    /// Fold one run into the bucket for its UTC start date.
    ///
    /// `item_count` is the dataset item count fetched by enrichment; `None`
    /// when enrichment is off or the dataset reported no count.
    pub fn merge_run(
        aggregations: &mut BTreeMap<NaiveDate, DateAggregation>,
        run: &RunRecord,
        item_count: Option<u64>,
    ) {
        let date = run.utc_date();
        let agg = aggregations
            .entry(date)
            .or_insert_with(|| DateAggregation::new(date, run.started_at));

        agg.run_count = agg.run_count.saturating_add(1);
        agg.cost += run.usage_total_usd.unwrap_or(0.0);

        if let Some(usage_usd) = &run.usage_usd {
            for (kind, amount) in usage_usd {
                *agg.cost_detail.entry(kind.clone()).or_insert(0.0) += amount;
            }
        }
        if let Some(usage) = &run.usage {
            for (kind, units) in usage {
                *agg.usage_detail.entry(kind.clone()).or_insert(0.0) += units;
            }
        }

        // Pages walk newest→oldest, so the last run merged for a date is its oldest
        agg.first_run_date = run.started_at;

        *agg
            .build_numbers
            .entry(run.build_number.clone())
            .or_insert(0) += 1;
        *agg.statuses.entry(run.status.clone()).or_insert(0) += 1;
        *agg.origins.entry(run.meta.origin.clone()).or_insert(0) += 1;

        if let Some(count) = item_count {
            *agg.dataset_items.get_or_insert(0) += count;
        }
    }

    /// One ascending pass over the buckets: rounded per-date records for
    /// output plus the whole-period totals.
    pub fn rollup(
        aggregations: &BTreeMap<NaiveDate, DateAggregation>,
    ) -> (Vec<DateAggregation>, TotalStats) {
        let mut totals = TotalStats::default();
        let mut records = Vec::with_capacity(aggregations.len());

        for agg in aggregations.values() {
            totals.run_count = totals.run_count.saturating_add(agg.run_count);
            totals.cost += agg.cost;
            if let Some(items) = agg.dataset_items {
                *totals.dataset_items.get_or_insert(0) += items;
            }
            for (kind, amount) in &agg.cost_detail {
                *totals.cost_detail.entry(kind.clone()).or_insert(0.0) += amount;
            }
            for (kind, units) in &agg.usage_detail {
                *totals.usage_detail.entry(kind.clone()).or_insert(0.0) += units;
            }
            for (build, count) in &agg.build_numbers {
                *totals.build_numbers.entry(build.clone()).or_insert(0) += count;
            }
            for (status, count) in &agg.statuses {
                *totals.statuses.entry(status.clone()).or_insert(0) += count;
            }
            for (origin, count) in &agg.origins {
                *totals.origins.entry(origin.clone()).or_insert(0) += count;
            }

            // Ascending pass: first bucket is the oldest date, last one the newest
            if totals.first_run_date.is_none() {
                totals.first_run_date = Some(agg.first_run_date);
            }
            totals.last_run_date = Some(agg.last_run_date);

            records.push(Self::rounded_copy(agg));
        }

        totals.cost = Self::round4(totals.cost);
        for amount in totals.cost_detail.values_mut() {
            *amount = Self::round4(*amount);
        }
        for units in totals.usage_detail.values_mut() {
            *units = Self::round4(*units);
        }

        (records, totals)
    }

    /// Round to 4 decimal places. Applied to output copies only; the
    /// persisted aggregations keep full precision.
    pub fn round4(value: f64) -> f64 {
        (value * 10_000.0).round() / 10_000.0
    }

    fn rounded_copy(agg: &DateAggregation) -> DateAggregation {
        let mut copy = agg.clone();
        copy.cost = Self::round4(copy.cost);
        for amount in copy.cost_detail.values_mut() {
            *amount = Self::round4(*amount);
        }
        for units in copy.usage_detail.values_mut() {
            *units = Self::round4(*units);
        }
        copy
    }
}
