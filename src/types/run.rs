//! Platform run wire types

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A single actor run as returned by the platform API.
///
/// The list endpoint returns a compact record; the per-run detail endpoint
/// returns the same shape with `usageUsd`/`usage` populated. One struct covers
/// both, so a cost-breakdown re-fetch simply replaces the list item.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RunRecord {
    pub id: String,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub build_number: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub meta: RunMeta,
    #[serde(default)]
    pub default_dataset_id: String,
    /// Total run cost in USD; the platform omits it for unbilled runs.
    pub usage_total_usd: Option<f64>,
    /// Per-usage-type USD breakdown, detail endpoint only.
    pub usage_usd: Option<HashMap<String, f64>>,
    /// Per-usage-type raw units, detail endpoint only.
    pub usage: Option<HashMap<String, f64>>,
}

impl RunRecord {
    /// Calendar date of `startedAt` in UTC.
    /// Date bucketing follows the platform's own day boundaries.
    pub fn utc_date(&self) -> NaiveDate {
        self.started_at.date_naive()
    }
}

/// Run metadata envelope; only `origin` matters for aggregation.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RunMeta {
    #[serde(default)]
    pub origin: String,
}

/// Dataset detail record; only the clean item count is consumed.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatasetInfo {
    pub clean_item_count: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_record_list_item_deserialize() {
        // Compact list item: no usage maps, extra fields ignored
        let json = r#"{
            "id": "run-1",
            "startedAt": "2024-03-01T12:30:00.000Z",
            "finishedAt": "2024-03-01T12:31:00.000Z",
            "buildNumber": "0.4.21",
            "status": "SUCCEEDED",
            "meta": {"origin": "API"},
            "defaultDatasetId": "ds-1",
            "usageTotalUsd": 0.125
        }"#;
        let run: RunRecord = serde_json::from_str(json).unwrap();
        assert_eq!(run.id, "run-1");
        assert_eq!(run.build_number, "0.4.21");
        assert_eq!(run.status, "SUCCEEDED");
        assert_eq!(run.meta.origin, "API");
        assert_eq!(run.usage_total_usd, Some(0.125));
        assert!(run.usage_usd.is_none());
        assert!(run.usage.is_none());
    }

    #[test]
    fn test_run_record_detail_deserialize() {
        let json = r#"{
            "id": "run-1",
            "startedAt": "2024-03-01T12:30:00Z",
            "buildNumber": "0.4.21",
            "status": "SUCCEEDED",
            "meta": {"origin": "WEB"},
            "defaultDatasetId": "ds-1",
            "usageTotalUsd": 0.125,
            "usageUsd": {"ACTOR_COMPUTE_UNITS": 0.1, "DATASET_WRITES": 0.025},
            "usage": {"ACTOR_COMPUTE_UNITS": 0.25, "DATASET_WRITES": 50.0}
        }"#;
        let run: RunRecord = serde_json::from_str(json).unwrap();
        let usage_usd = run.usage_usd.unwrap();
        assert_eq!(usage_usd.len(), 2);
        assert!((usage_usd["ACTOR_COMPUTE_UNITS"] - 0.1).abs() < f64::EPSILON);
    }

    #[test]
    fn test_run_record_tolerates_missing_optionals() {
        // Aborted runs may carry no billing data and no meta origin
        let json = r#"{"id": "run-2", "startedAt": "2024-03-01T00:00:00Z", "status": "ABORTED"}"#;
        let run: RunRecord = serde_json::from_str(json).unwrap();
        assert_eq!(run.build_number, "");
        assert_eq!(run.meta.origin, "");
        assert_eq!(run.default_dataset_id, "");
        assert!(run.usage_total_usd.is_none());
    }

    #[test]
    fn test_utc_date_ignores_time_of_day() {
        let json = r#"{"id": "r", "startedAt": "2024-03-01T23:59:59Z", "status": "SUCCEEDED"}"#;
        let run: RunRecord = serde_json::from_str(json).unwrap();
        assert_eq!(run.utc_date(), NaiveDate::from_ymd_opt(2024, 3, 1).unwrap());
    }

    #[test]
    fn test_dataset_info_null_count() {
        let info: DatasetInfo = serde_json::from_str(r#"{"cleanItemCount": null}"#).unwrap();
        assert!(info.clean_item_count.is_none());
        let info: DatasetInfo = serde_json::from_str(r#"{"cleanItemCount": 42}"#).unwrap();
        assert_eq!(info.clean_item_count, Some(42));
    }
}
