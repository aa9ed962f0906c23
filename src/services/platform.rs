//! Platform API client for runs, datasets and key-value records
//!
//! Thin async wrapper over the platform's REST surface. Listing and detail
//! payloads arrive wrapped in a `data` envelope; key-value records are stored
//! and served raw.

use crate::types::{DatasetInfo, Result, RunRecord, RuntallyError};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// HTTP request timeout in seconds
const REQUEST_TIMEOUT_SECS: u64 = 30;

#[derive(Deserialize)]
struct ApiEnvelope<T> {
    data: T,
}

#[derive(Deserialize)]
struct RunList {
    items: Vec<RunRecord>,
}

/// Paginated, newest-first provider of run summaries.
#[allow(async_fn_in_trait)]
pub trait RunSource {
    async fn list_runs(&self, offset: u64, limit: u64) -> Result<Vec<RunRecord>>;
}

/// Optional per-run detail fetches.
#[allow(async_fn_in_trait)]
pub trait RunEnricher {
    /// Full run record including the usage breakdown maps.
    async fn run_detail(&self, run_id: &str) -> Result<RunRecord>;
    /// Clean item count of a dataset; None when the platform reports none.
    async fn dataset_item_count(&self, dataset_id: &str) -> Result<Option<u64>>;
}

/// Async client for the platform REST API.
#[derive(Clone)]
pub struct PlatformClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
}

impl PlatformClient {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| RuntallyError::Api(format!("HTTP client error: {}", e)))?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/v2/{}", self.base_url, path)
    }

    fn runs_url(&self, actor: &str, offset: u64, limit: u64) -> String {
        format!(
            "{}?desc=true&offset={}&limit={}",
            self.url(&format!("actors/{}/runs", actor)),
            offset,
            limit
        )
    }

    /// Public retrieval URL of a key-value record.
    pub fn record_url(&self, store_id: &str, key: &str) -> String {
        self.url(&format!("key-value-stores/{}/records/{}", store_id, key))
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        let response = self
            .http
            .get(url)
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| RuntallyError::Api(format!("GET {} failed: {}", url, e)))?;
        let status = response.status();
        if !status.is_success() {
            return Err(RuntallyError::Api(format!(
                "GET {} returned {}",
                url, status
            )));
        }
        response
            .json()
            .await
            .map_err(|e| RuntallyError::Api(format!("Invalid response from {}: {}", url, e)))
    }

    /// One page of an actor's runs, newest first.
    pub async fn list_actor_runs(
        &self,
        actor: &str,
        offset: u64,
        limit: u64,
    ) -> Result<Vec<RunRecord>> {
        let url = self.runs_url(actor, offset, limit);
        let list: ApiEnvelope<RunList> = self.get_json(&url).await?;
        Ok(list.data.items)
    }

    /// Full record of a single run.
    pub async fn run(&self, run_id: &str) -> Result<RunRecord> {
        let url = self.url(&format!("actor-runs/{}", run_id));
        let run: ApiEnvelope<RunRecord> = self.get_json(&url).await?;
        Ok(run.data)
    }

    pub async fn dataset(&self, dataset_id: &str) -> Result<DatasetInfo> {
        let url = self.url(&format!("datasets/{}", dataset_id));
        let info: ApiEnvelope<DatasetInfo> = self.get_json(&url).await?;
        Ok(info.data)
    }

    /// Fetch a key-value record; 404 means the record does not exist.
    pub async fn get_record<T: DeserializeOwned>(
        &self,
        store_id: &str,
        key: &str,
    ) -> Result<Option<T>> {
        let url = self.record_url(store_id, key);
        let response = self
            .http
            .get(&url)
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| RuntallyError::Api(format!("GET {} failed: {}", url, e)))?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let status = response.status();
        if !status.is_success() {
            return Err(RuntallyError::Api(format!(
                "GET {} returned {}",
                url, status
            )));
        }
        let value = response
            .json()
            .await
            .map_err(|e| RuntallyError::Api(format!("Invalid record at {}: {}", url, e)))?;
        Ok(Some(value))
    }

    /// Store a key-value record, overwriting any previous value.
    pub async fn put_record<T: Serialize>(&self, store_id: &str, key: &str, value: &T) -> Result<()> {
        let url = self.record_url(store_id, key);
        let response = self
            .http
            .put(&url)
            .bearer_auth(&self.token)
            .json(value)
            .send()
            .await
            .map_err(|e| RuntallyError::Api(format!("PUT {} failed: {}", url, e)))?;
        let status = response.status();
        if !status.is_success() {
            return Err(RuntallyError::Api(format!(
                "PUT {} returned {}",
                url, status
            )));
        }
        Ok(())
    }

    /// Append items to a dataset.
    pub async fn push_items<T: Serialize>(&self, dataset_id: &str, items: &[T]) -> Result<()> {
        let url = self.url(&format!("datasets/{}/items", dataset_id));
        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.token)
            .json(items)
            .send()
            .await
            .map_err(|e| RuntallyError::Api(format!("POST {} failed: {}", url, e)))?;
        let status = response.status();
        if !status.is_success() {
            return Err(RuntallyError::Api(format!(
                "POST {} returned {}",
                url, status
            )));
        }
        Ok(())
    }
}

/// Run source scoped to a single actor's history.
pub struct ActorRunSource {
    client: PlatformClient,
    actor: String,
}

impl ActorRunSource {
    pub fn new(client: PlatformClient, actor: impl Into<String>) -> Self {
        Self {
            client,
            actor: actor.into(),
        }
    }
}

impl RunSource for ActorRunSource {
    async fn list_runs(&self, offset: u64, limit: u64) -> Result<Vec<RunRecord>> {
        self.client.list_actor_runs(&self.actor, offset, limit).await
    }
}

impl RunEnricher for PlatformClient {
    async fn run_detail(&self, run_id: &str) -> Result<RunRecord> {
        self.run(run_id).await
    }

    async fn dataset_item_count(&self, dataset_id: &str) -> Result<Option<u64>> {
        Ok(self.dataset(dataset_id).await?.clean_item_count)
    }
}
