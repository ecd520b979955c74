//! Storage seams for the discovery run: keyed cache rows with expiry, and a
//! delayed update queue consumed by the graph updater.

pub mod postgres;

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;

use ownergraph_common::{SortKey, UpdateMessage};

pub use postgres::{PgCacheStore, PgUpdateQueue};

/// One row, partitioned by account and distinguished by sort key.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheRow {
    pub account_id: String,
    pub sort_key: SortKey,
    pub payload: serde_json::Value,
    pub expires_at: DateTime<Utc>,
}

impl CacheRow {
    pub fn new<T: Serialize>(
        account_id: &str,
        sort_key: SortKey,
        payload: &T,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<Self> {
        Ok(Self {
            account_id: account_id.to_string(),
            sort_key,
            payload: serde_json::to_value(payload)
                .with_context(|| format!("serializing {sort_key} for {account_id}"))?,
            expires_at: now + ttl,
        })
    }

    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(self.payload.clone())
            .with_context(|| format!("decoding {} for {}", self.sort_key, self.account_id))
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Upsert; last write wins.
    async fn put(&self, row: CacheRow) -> Result<()>;

    /// Expired rows read as absent.
    async fn get(&self, account_id: &str, sort_key: &SortKey) -> Result<Option<CacheRow>>;

    /// Delete expired rows. Returns how many were removed.
    async fn purge_expired(&self) -> Result<u64>;
}

/// A message claimed from the queue, pending `ack` or `release`.
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedMessage {
    pub id: i64,
    pub message: UpdateMessage,
    pub attempts: i32,
}

#[async_trait]
pub trait UpdateChannel: Send + Sync {
    /// Queue a message, invisible to consumers until `delay` has passed.
    async fn enqueue(&self, message: &UpdateMessage, delay: Duration) -> Result<()>;

    /// Claim up to `limit` visible messages.
    async fn dequeue_ready(&self, limit: u32) -> Result<Vec<QueuedMessage>>;

    /// Remove a processed message.
    async fn ack(&self, id: i64) -> Result<()>;

    /// Return a claimed message to the queue after `delay`.
    async fn release(&self, id: i64, delay: Duration) -> Result<()>;
}

#[async_trait]
impl<T: CacheStore + ?Sized> CacheStore for Arc<T> {
    async fn put(&self, row: CacheRow) -> Result<()> {
        (**self).put(row).await
    }

    async fn get(&self, account_id: &str, sort_key: &SortKey) -> Result<Option<CacheRow>> {
        (**self).get(account_id, sort_key).await
    }

    async fn purge_expired(&self) -> Result<u64> {
        (**self).purge_expired().await
    }
}

#[async_trait]
impl<T: UpdateChannel + ?Sized> UpdateChannel for Arc<T> {
    async fn enqueue(&self, message: &UpdateMessage, delay: Duration) -> Result<()> {
        (**self).enqueue(message, delay).await
    }

    async fn dequeue_ready(&self, limit: u32) -> Result<Vec<QueuedMessage>> {
        (**self).dequeue_ready(limit).await
    }

    async fn ack(&self, id: i64) -> Result<()> {
        (**self).ack(id).await
    }

    async fn release(&self, id: i64, delay: Duration) -> Result<()> {
        (**self).release(id, delay).await
    }
}
