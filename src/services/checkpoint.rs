//! Checkpoint persistence for processor state and totals
//!
//! The resumable state lives under the `STATE` key and the whole-period
//! totals under `TOTAL_STATS`, either in a platform key-value store or in a
//! local state directory.

use crate::services::platform::PlatformClient;
use crate::types::{ProcessorState, Result, RuntallyError, TotalStats};
use directories::BaseDirs;
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::PathBuf;

/// Key of the resumable processor state record.
pub const STATE_KEY: &str = "STATE";
/// Key of the whole-period totals record.
pub const TOTALS_KEY: &str = "TOTAL_STATS";

/// Durable storage for processor state and the totals artifact.
#[allow(async_fn_in_trait)]
pub trait CheckpointStore {
    /// Load the persisted state; None when no checkpoint exists yet.
    async fn load_state(&self) -> Result<Option<ProcessorState>>;
    async fn save_state(&self, state: &ProcessorState) -> Result<()>;
    async fn save_totals(&self, totals: &TotalStats) -> Result<()>;
    /// Where the totals can be retrieved after the process exits.
    fn totals_location(&self) -> String;
}

/// Local checkpoint store writing JSON records into a state directory.
pub struct FileCheckpointStore {
    state_dir: PathBuf,
}

impl FileCheckpointStore {
    /// Store under the default state directory, creating it if needed.
    pub fn new() -> Result<Self> {
        let state_dir = Self::default_state_dir()?;
        fs::create_dir_all(&state_dir)?;
        Ok(Self { state_dir })
    }

    /// Default state directory (~/.runtally/state)
    pub fn default_state_dir() -> Result<PathBuf> {
        let base_dirs = BaseDirs::new()
            .ok_or_else(|| RuntallyError::Checkpoint("Cannot determine home directory".into()))?;
        Ok(base_dirs.home_dir().join(".runtally").join("state"))
    }

    pub fn with_state_dir(state_dir: PathBuf) -> Self {
        Self { state_dir }
    }

    pub fn record_path(&self, key: &str) -> PathBuf {
        self.state_dir.join(format!("{}.json", key))
    }

    /// Load with a shared lock. A missing file is simply no checkpoint;
    /// a corrupt one is fatal, since restarting from scratch would re-push
    /// already-delivered records downstream.
    fn load_json<T: serde::de::DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let path = self.record_path(key);
        if !path.exists() {
            return Ok(None);
        }

        let file = File::open(&path)?;
        file.lock_shared()
            .map_err(|e| RuntallyError::Checkpoint(format!("Failed to acquire read lock: {}", e)))?;

        let mut content = String::new();
        let mut reader = std::io::BufReader::new(&file);
        let read = reader.read_to_string(&mut content);
        let _ = file.unlock();
        read?;

        let value = serde_json::from_str(&content)
            .map_err(|e| RuntallyError::Checkpoint(format!("Corrupted {} record: {}", key, e)))?;
        Ok(Some(value))
    }

    /// Save using atomic write (temp file + rename) with exclusive lock.
    fn save_json<T: serde::Serialize>(&self, key: &str, value: &T) -> Result<()> {
        fs::create_dir_all(&self.state_dir)?;

        let content = serde_json::to_string_pretty(value)
            .map_err(|e| RuntallyError::Checkpoint(format!("Serialization failed: {}", e)))?;

        let path = self.record_path(key);
        let temp_path = path.with_extension("json.tmp");

        {
            let mut file = File::create(&temp_path).map_err(|e| {
                RuntallyError::Checkpoint(format!("Failed to create temp file: {}", e))
            })?;
            file.write_all(content.as_bytes()).map_err(|e| {
                RuntallyError::Checkpoint(format!("Failed to write temp file: {}", e))
            })?;
            file.sync_all()
                .map_err(|e| RuntallyError::Checkpoint(format!("Failed to sync temp file: {}", e)))?;
        }

        let target = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        target
            .lock_exclusive()
            .map_err(|e| RuntallyError::Checkpoint(format!("Failed to acquire write lock: {}", e)))?;

        fs::rename(&temp_path, &path)
            .map_err(|e| RuntallyError::Checkpoint(format!("Failed to rename temp file: {}", e)))?;

        let _ = target.unlock();
        Ok(())
    }
}

impl CheckpointStore for FileCheckpointStore {
    async fn load_state(&self) -> Result<Option<ProcessorState>> {
        self.load_json(STATE_KEY)
    }

    async fn save_state(&self, state: &ProcessorState) -> Result<()> {
        self.save_json(STATE_KEY, state)
    }

    async fn save_totals(&self, totals: &TotalStats) -> Result<()> {
        self.save_json(TOTALS_KEY, totals)
    }

    fn totals_location(&self) -> String {
        self.record_path(TOTALS_KEY).display().to_string()
    }
}

/// Checkpoint store backed by a platform key-value store.
pub struct RemoteCheckpointStore {
    client: PlatformClient,
    store_id: String,
}

impl RemoteCheckpointStore {
    pub fn new(client: PlatformClient, store_id: impl Into<String>) -> Self {
        Self {
            client,
            store_id: store_id.into(),
        }
    }
}

impl CheckpointStore for RemoteCheckpointStore {
    async fn load_state(&self) -> Result<Option<ProcessorState>> {
        self.client.get_record(&self.store_id, STATE_KEY).await
    }

    async fn save_state(&self, state: &ProcessorState) -> Result<()> {
        self.client.put_record(&self.store_id, STATE_KEY, state).await
    }

    async fn save_totals(&self, totals: &TotalStats) -> Result<()> {
        self.client.put_record(&self.store_id, TOTALS_KEY, totals).await
    }

    fn totals_location(&self) -> String {
        self.client.record_url(&self.store_id, TOTALS_KEY)
    }
}

/// Either checkpoint backend, picked at startup from the CLI flags.
pub enum StateStore {
    Remote(RemoteCheckpointStore),
    Local(FileCheckpointStore),
}

impl CheckpointStore for StateStore {
    async fn load_state(&self) -> Result<Option<ProcessorState>> {
        match self {
            StateStore::Remote(store) => store.load_state().await,
            StateStore::Local(store) => store.load_state().await,
        }
    }

    async fn save_state(&self, state: &ProcessorState) -> Result<()> {
        match self {
            StateStore::Remote(store) => store.save_state(state).await,
            StateStore::Local(store) => store.save_state(state).await,
        }
    }

    async fn save_totals(&self, totals: &TotalStats) -> Result<()> {
        match self {
            StateStore::Remote(store) => store.save_totals(totals).await,
            StateStore::Local(store) => store.save_totals(totals).await,
        }
    }

    fn totals_location(&self) -> String {
        match self {
            StateStore::Remote(store) => store.totals_location(),
            StateStore::Local(store) => store.totals_location(),
        }
    }
}
