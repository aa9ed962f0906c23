//! Output sinks for the per-date statistics records

use crate::services::platform::PlatformClient;
use crate::types::{DateAggregation, Result, RuntallyError};
use fs2::FileExt;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Destination for the rolled-up per-date records.
#[allow(async_fn_in_trait)]
pub trait RecordSink {
    async fn push_records(&self, records: &[DateAggregation]) -> Result<()>;
}

/// Appends records to a platform dataset.
pub struct DatasetSink {
    client: PlatformClient,
    dataset_id: String,
}

impl DatasetSink {
    pub fn new(client: PlatformClient, dataset_id: impl Into<String>) -> Self {
        Self {
            client,
            dataset_id: dataset_id.into(),
        }
    }
}

impl RecordSink for DatasetSink {
    async fn push_records(&self, records: &[DateAggregation]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        self.client.push_items(&self.dataset_id, records).await
    }
}

/// Appends records as JSON lines to a local file.
pub struct JsonlSink {
    path: PathBuf,
}

impl JsonlSink {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl RecordSink for JsonlSink {
    async fn push_records(&self, records: &[DateAggregation]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut lines = String::new();
        for record in records {
            let line = serde_json::to_string(record)
                .map_err(|e| RuntallyError::Output(format!("Serialization failed: {}", e)))?;
            lines.push_str(&line);
            lines.push('\n');
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.lock_exclusive()
            .map_err(|e| RuntallyError::Output(format!("Failed to acquire write lock: {}", e)))?;
        let write = file.write_all(lines.as_bytes()).and_then(|_| file.flush());
        let _ = file.unlock();
        write?;
        Ok(())
    }
}

/// Either output backend, picked at startup from the CLI flags.
pub enum OutputSink {
    Dataset(DatasetSink),
    Jsonl(JsonlSink),
}

impl RecordSink for OutputSink {
    async fn push_records(&self, records: &[DateAggregation]) -> Result<()> {
        match self {
            OutputSink::Dataset(sink) => sink.push_records(records).await,
            OutputSink::Jsonl(sink) => sink.push_records(records).await,
        }
    }
}
