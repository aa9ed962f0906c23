//! Aggregation state and output types

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Aggregated statistics for one calendar date.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DateAggregation {
    pub date: NaiveDate,
    pub run_count: u64,
    /// Accumulated `usageTotalUsd` across the date's runs.
    pub cost: f64,
    /// Accumulated dataset item counts; present only when item-count
    /// enrichment retrieved at least one count for the date.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dataset_items: Option<u64>,
    /// Per-usage-type USD totals, entries created as usage types appear.
    pub cost_detail: HashMap<String, f64>,
    /// Per-usage-type raw-unit totals.
    pub usage_detail: HashMap<String, f64>,
    /// Oldest run of the date. Overwritten on every merge; the newest-first
    /// walk makes the last write the oldest run.
    pub first_run_date: DateTime<Utc>,
    /// Newest run of the date, fixed when the bucket is created.
    pub last_run_date: DateTime<Utc>,
    pub build_numbers: HashMap<String, u64>,
    pub statuses: HashMap<String, u64>,
    pub origins: HashMap<String, u64>,
}

impl DateAggregation {
    /// Empty bucket for `date`, anchored to the first (newest) run seen.
    pub fn new(date: NaiveDate, started_at: DateTime<Utc>) -> Self {
        Self {
            date,
            run_count: 0,
            cost: 0.0,
            dataset_items: None,
            cost_detail: HashMap::new(),
            usage_detail: HashMap::new(),
            first_run_date: started_at,
            last_run_date: started_at,
            build_numbers: HashMap::new(),
            statuses: HashMap::new(),
            origins: HashMap::new(),
        }
    }
}

/// Whole-period rollup persisted as the totals artifact.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TotalStats {
    pub run_count: u64,
    pub cost: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dataset_items: Option<u64>,
    pub cost_detail: HashMap<String, f64>,
    pub usage_detail: HashMap<String, f64>,
    /// Oldest aggregated run, None until at least one run was merged.
    pub first_run_date: Option<DateTime<Utc>>,
    /// Newest aggregated run.
    pub last_run_date: Option<DateTime<Utc>>,
    pub build_numbers: HashMap<String, u64>,
    pub statuses: HashMap<String, u64>,
    pub origins: HashMap<String, u64>,
}

/// Durable processor state, persisted after every completed page and at the
/// migration flush, then reloaded on the next start.
///
/// The date keys serialize as ISO `YYYY-MM-DD` strings; the BTreeMap keeps
/// iteration chronological.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProcessorState {
    #[serde(default)]
    pub date_aggregations: BTreeMap<NaiveDate, DateAggregation>,
    /// Resume marker written by the migration guard; cleared once the run is
    /// seen again after restart.
    #[serde(default)]
    pub last_processed_run_id: Option<String>,
    /// Offset of the page most recently processed to completion.
    #[serde(default)]
    pub last_processed_offset: u64,
}
