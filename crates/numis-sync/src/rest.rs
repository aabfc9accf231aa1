//! PostgREST-style remote coin store.

use std::time::Duration;

use async_trait::async_trait;
use numis_core::CoinRecord;
use numis_store::{CoinStore, StoreError};
use reqwest::RequestBuilder;
use serde::Deserialize;
use tracing::info;

use crate::error::{SyncError, check_status};

const COINS_PATH: &str = "/rest/v1/coins";

#[derive(Deserialize)]
struct Inserted {
    id: i64,
}

/// [`CoinStore`] over a PostgREST endpoint at `{base}/rest/v1/coins`.
///
/// Every request carries the key both as `apikey` and as a bearer token.
pub struct RestStore {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl RestStore {
    /// `base_url` should be like `https://project.example.co` (no trailing slash).
    pub fn new(base_url: &str, api_key: String, timeout: Duration) -> Result<Self, SyncError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }

    fn coins_url(&self) -> String {
        format!("{}{COINS_PATH}", self.base_url)
    }

    fn authed(&self, req: RequestBuilder) -> RequestBuilder {
        req.header("apikey", &self.api_key)
            .bearer_auth(&self.api_key)
    }

    async fn post_record(&self, record: &CoinRecord) -> Result<i64, SyncError> {
        let url = self.coins_url();
        info!(url = %url, name = %record.name, "inserting coin");
        let req = self
            .client
            .post(&url)
            .header("Prefer", "return=representation")
            .json(record);
        let resp = check_status(self.authed(req).send().await?).await?;
        let body = resp.text().await?;
        parse_inserted(&body)
    }

    async fn get_records(&self) -> Result<Vec<CoinRecord>, SyncError> {
        let url = format!("{}?select=*&order=created_at.desc,id.desc", self.coins_url());
        let req = self.client.get(&url);
        let resp = check_status(self.authed(req).send().await?).await?;
        let body = resp.text().await?;
        let records: Vec<CoinRecord> = serde_json::from_str(&body)?;
        info!(count = records.len(), "listed coins");
        Ok(records)
    }

    async fn delete_record(&self, id: i64) -> Result<bool, SyncError> {
        let url = format!("{}?id=eq.{id}", self.coins_url());
        let req = self
            .client
            .delete(&url)
            .header("Prefer", "return=representation");
        let resp = check_status(self.authed(req).send().await?).await?;
        let body = resp.text().await?;
        let deleted: Vec<serde_json::Value> = serde_json::from_str(&body)?;
        info!(id, deleted = deleted.len(), "delete coin");
        Ok(!deleted.is_empty())
    }
}

#[async_trait]
impl CoinStore for RestStore {
    async fn insert(&self, record: &CoinRecord) -> Result<i64, StoreError> {
        Ok(self.post_record(record).await?)
    }

    async fn list_recent(&self) -> Result<Vec<CoinRecord>, StoreError> {
        Ok(self.get_records().await?)
    }

    async fn delete(&self, id: i64) -> Result<bool, StoreError> {
        Ok(self.delete_record(id).await?)
    }
}

/// Id of the first row in a `return=representation` reply.
fn parse_inserted(body: &str) -> Result<i64, SyncError> {
    let rows: Vec<Inserted> = serde_json::from_str(body)?;
    rows.first().map(|r| r.id).ok_or_else(|| SyncError::Server {
        status: 200,
        body: "insert returned no rows".into(),
    })
}
