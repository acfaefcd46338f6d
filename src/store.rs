// src/store.rs
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::info;
use scylla::{query::Query, Session, SessionBuilder};
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to connect to ScyllaDB: {0}")]
    Connect(String),

    #[error("query failed: {0}")]
    Query(String),

    #[error("malformed row: missing {0}")]
    Malformed(&'static str),

    #[error("stored payload is not valid JSON: {0}")]
    Decode(#[from] serde_json::Error),
}

/// A cached upstream response as kept by the persistent tier.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredEntry {
    pub payload: Value,
    pub fetched_at: DateTime<Utc>,
    pub ttl: Duration,
}

impl StoredEntry {
    /// Time left before the entry goes stale, or `None` if it already has.
    pub fn remaining(&self, now: DateTime<Utc>) -> Option<Duration> {
        let age = (now - self.fetched_at).to_std().unwrap_or_default();
        self.ttl.checked_sub(age).filter(|left| !left.is_zero())
    }
}

/// Second cache tier behind the in-memory map.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn load(&self, key: &str) -> Result<Option<StoredEntry>, StoreError>;
    async fn save(&self, key: &str, entry: &StoredEntry) -> Result<(), StoreError>;
    /// Drops every stored entry.
    async fn clear(&self) -> Result<(), StoreError>;
    fn name(&self) -> &'static str;
}

/// `stock_data` table: query string -> JSON payload -> fetch timestamp.
pub struct ScyllaStore {
    session: Session,
}

impl ScyllaStore {
    pub async fn connect(node: &str) -> Result<Self, StoreError> {
        let session = SessionBuilder::new()
            .known_node(node)
            .build()
            .await
            .map_err(|e| StoreError::Connect(e.to_string()))?;

        session.query("CREATE KEYSPACE IF NOT EXISTS stock_dashboard WITH REPLICATION = {'class': 'SimpleStrategy', 'replication_factor': 1}", &[]).await.map_err(|e| StoreError::Query(e.to_string()))?;
        session.query("CREATE TABLE IF NOT EXISTS stock_dashboard.stock_data (query TEXT PRIMARY KEY, payload TEXT, fetched_at BIGINT, ttl_secs INT)", &[]).await.map_err(|e| StoreError::Query(e.to_string()))?;

        info!("Connected to ScyllaDB at {}.", node);
        Ok(ScyllaStore { session })
    }
}

#[async_trait]
impl CacheStore for ScyllaStore {
    async fn load(&self, key: &str) -> Result<Option<StoredEntry>, StoreError> {
        let query = Query::new(
            "SELECT payload, fetched_at, ttl_secs FROM stock_dashboard.stock_data WHERE query = ?",
        );
        let result = self
            .session
            .query(query, (key,))
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?;

        let row = match result.rows.and_then(|rows| rows.into_iter().next()) {
            Some(row) => row,
            None => return Ok(None),
        };

        let payload = row
            .columns
            .first()
            .and_then(|col| col.as_ref())
            .and_then(|v| v.as_text())
            .ok_or(StoreError::Malformed("payload"))?;
        let fetched_at = row
            .columns
            .get(1)
            .and_then(|col| col.as_ref())
            .and_then(|v| v.as_bigint())
            .and_then(DateTime::<Utc>::from_timestamp_millis)
            .ok_or(StoreError::Malformed("fetched_at"))?;
        let ttl_secs = row
            .columns
            .get(2)
            .and_then(|col| col.as_ref())
            .and_then(|v| v.as_int())
            .ok_or(StoreError::Malformed("ttl_secs"))?;

        Ok(Some(StoredEntry {
            payload: serde_json::from_str(payload)?,
            fetched_at,
            ttl: Duration::from_secs(ttl_secs.max(0) as u64),
        }))
    }

    async fn save(&self, key: &str, entry: &StoredEntry) -> Result<(), StoreError> {
        let payload = serde_json::to_string(&entry.payload)?;
        let ttl_secs = i32::try_from(entry.ttl.as_secs()).unwrap_or(i32::MAX);
        let query = Query::new(
            "INSERT INTO stock_dashboard.stock_data (query, payload, fetched_at, ttl_secs) VALUES (?, ?, ?, ?) USING TTL ?",
        );
        self.session
            .query(
                query,
                (
                    key,
                    payload,
                    entry.fetched_at.timestamp_millis(),
                    ttl_secs,
                    ttl_secs,
                ),
            )
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?;
        Ok(())
    }

    async fn clear(&self) -> Result<(), StoreError> {
        self.session
            .query("TRUNCATE stock_dashboard.stock_data", &[])
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?;
        info!("Truncated stock_dashboard.stock_data.");
        Ok(())
    }

    fn name(&self) -> &'static str {
        "scylla"
    }
}
