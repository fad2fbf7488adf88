use super::record::{ProgressKey, ProgressRecord};
use chrono::{DateTime, Utc};
use log::debug;
use reqwest::StatusCode;
use reqwest::blocking::{Client, RequestBuilder};
use reqwest::header::{CONTENT_TYPE, HeaderValue};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_TABLE: &str = "reading_progress";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RemoteError {
    #[error("network error: {0}")]
    Network(String),
    #[error("not authorized to access reading progress")]
    Unauthorized,
    #[error("remote store answered with status {0}")]
    Status(u16),
    #[error("could not decode remote response: {0}")]
    Decode(String),
    #[error("remote store unavailable: {0}")]
    Unavailable(String),
}

/// Keyed progress records kept by a backend that may be unreachable.
///
/// A key without a user only ever matches records stored without a user.
pub trait RemoteProgressStore: Send + Sync {
    fn fetch(&self, key: &ProgressKey) -> Result<Option<ProgressRecord>, RemoteError>;
    fn upsert(
        &self,
        key: &ProgressKey,
        record: &ProgressRecord,
    ) -> Result<Option<ProgressRecord>, RemoteError>;
    fn delete(&self, key: &ProgressKey) -> Result<(), RemoteError>;
}

/// Used when no backend is configured: nothing is stored remotely.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalOnly;

impl RemoteProgressStore for LocalOnly {
    fn fetch(&self, _key: &ProgressKey) -> Result<Option<ProgressRecord>, RemoteError> {
        Ok(None)
    }

    fn upsert(
        &self,
        _key: &ProgressKey,
        _record: &ProgressRecord,
    ) -> Result<Option<ProgressRecord>, RemoteError> {
        Ok(None)
    }

    fn delete(&self, _key: &ProgressKey) -> Result<(), RemoteError> {
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct MemoryRemoteStore {
    records: Mutex<HashMap<ProgressKey, ProgressRecord>>,
}

impl MemoryRemoteStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_record(self, key: ProgressKey, record: ProgressRecord) -> Self {
        if let Ok(mut records) = self.records.lock() {
            records.insert(key, record);
        }
        self
    }

    pub fn get(&self, key: &ProgressKey) -> Option<ProgressRecord> {
        self.records.lock().ok()?.get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.records.lock().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<ProgressKey, ProgressRecord>>, RemoteError> {
        self.records
            .lock()
            .map_err(|_| RemoteError::Unavailable("memory remote lock poisoned".to_string()))
    }
}

impl RemoteProgressStore for MemoryRemoteStore {
    fn fetch(&self, key: &ProgressKey) -> Result<Option<ProgressRecord>, RemoteError> {
        Ok(self.lock()?.get(key).cloned())
    }

    fn upsert(
        &self,
        key: &ProgressKey,
        record: &ProgressRecord,
    ) -> Result<Option<ProgressRecord>, RemoteError> {
        self.lock()?.insert(key.clone(), record.clone());
        Ok(Some(record.clone()))
    }

    fn delete(&self, key: &ProgressKey) -> Result<(), RemoteError> {
        self.lock()?.remove(key);
        Ok(())
    }
}

/// One row of the remote progress table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct ProgressRow {
    book_id: String,
    user_id: Option<String>,
    location: String,
    percentage: f64,
    last_read: DateTime<Utc>,
    #[serde(default)]
    current_location_index: Option<u32>,
    #[serde(default)]
    total_locations: Option<u32>,
}

impl ProgressRow {
    fn new(key: &ProgressKey, record: &ProgressRecord) -> Self {
        Self {
            book_id: key.book_id.clone(),
            user_id: key.user_id.clone(),
            location: record.location.clone(),
            percentage: record.percentage,
            last_read: record.last_read,
            current_location_index: record.current_location_index,
            total_locations: record.total_locations,
        }
    }
}

impl From<ProgressRow> for ProgressRecord {
    fn from(row: ProgressRow) -> Self {
        ProgressRecord {
            location: row.location,
            percentage: row.percentage,
            last_read: row.last_read,
            current_location_index: row.current_location_index,
            total_locations: row.total_locations,
        }
    }
}

/// Blocking client for a PostgREST-style progress table
/// (e.g. `https://project.supabase.co` + `reading_progress`).
#[derive(Clone, Debug)]
pub struct HttpProgressStore {
    base_url: String,
    table: String,
    api_key: Option<String>,
    client: Client,
}

impl HttpProgressStore {
    pub fn new(base_url: impl Into<String>, table: impl Into<String>) -> anyhow::Result<Self> {
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        let base_url = base_url.into();
        debug!("Creating HttpProgressStore for {base_url}");
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            table: table.into(),
            api_key: None,
            client,
        })
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    fn table_url(&self) -> String {
        format!("{}/rest/v1/{}", self.base_url, self.table)
    }

    /// Row filters for `key`. No user means "user is null", never "any user".
    fn key_filters(key: &ProgressKey) -> Vec<(&'static str, String)> {
        let user_filter = match &key.user_id {
            Some(user) => format!("eq.{user}"),
            None => "is.null".to_string(),
        };
        vec![
            ("book_id", format!("eq.{}", key.book_id)),
            ("user_id", user_filter),
        ]
    }

    fn authorize(&self, req: RequestBuilder) -> RequestBuilder {
        match &self.api_key {
            Some(key) => req.header("apikey", key).bearer_auth(key),
            None => req,
        }
    }

    fn send(req: RequestBuilder) -> Result<reqwest::blocking::Response, RemoteError> {
        let resp = req.send().map_err(map_reqwest_error)?;
        match resp.status() {
            status if status.is_success() => Ok(resp),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(RemoteError::Unauthorized),
            status => Err(RemoteError::Status(status.as_u16())),
        }
    }

    fn first_row(resp: reqwest::blocking::Response) -> Result<Option<ProgressRecord>, RemoteError> {
        let rows: Vec<ProgressRow> = resp
            .json()
            .map_err(|e| RemoteError::Decode(e.to_string()))?;
        Ok(rows.into_iter().next().map(ProgressRecord::from))
    }
}

fn map_reqwest_error(e: reqwest::Error) -> RemoteError {
    if e.is_decode() {
        RemoteError::Decode(e.to_string())
    } else {
        RemoteError::Network(e.to_string())
    }
}

impl RemoteProgressStore for HttpProgressStore {
    fn fetch(&self, key: &ProgressKey) -> Result<Option<ProgressRecord>, RemoteError> {
        let url = self.table_url();
        debug!("GET {url} for {key}");
        let req = self
            .client
            .get(&url)
            .query(&[("select", "*"), ("limit", "1")])
            .query(&Self::key_filters(key));
        let resp = Self::send(self.authorize(req))?;
        Self::first_row(resp)
    }

    fn upsert(
        &self,
        key: &ProgressKey,
        record: &ProgressRecord,
    ) -> Result<Option<ProgressRecord>, RemoteError> {
        let url = self.table_url();
        let row = ProgressRow::new(key, record);

        // on_conflict cannot match NULL user ids, so update in place when the row exists
        let req = if self.fetch(key)?.is_some() {
            debug!("PATCH {url} for {key}");
            self.client.patch(&url).query(&Self::key_filters(key))
        } else {
            debug!("POST {url} for {key}");
            self.client.post(&url)
        };

        let req = req
            .header(CONTENT_TYPE, HeaderValue::from_static("application/json"))
            .header("Prefer", "return=representation")
            .json(&row);
        let resp = Self::send(self.authorize(req))?;
        Self::first_row(resp)
    }

    fn delete(&self, key: &ProgressKey) -> Result<(), RemoteError> {
        let url = self.table_url();
        debug!("DELETE {url} for {key}");
        let req = self.client.delete(&url).query(&Self::key_filters(key));
        Self::send(self.authorize(req))?;
        Ok(())
    }
}
