//! Postgres-backed cache rows and update queue.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::PgPool;
use tracing::{info, warn};

use ownergraph_common::{SortKey, UpdateMessage};

use super::{CacheRow, CacheStore, QueuedMessage, UpdateChannel};

/// A claim older than this is considered abandoned and can be taken again.
const CLAIM_TIMEOUT_SECS: i64 = 900;

/// Create tables and indexes. Idempotent.
pub async fn migrate(pool: &PgPool) -> Result<()> {
    info!("Running cache/queue migrations...");

    let statements = [
        r#"
        CREATE TABLE IF NOT EXISTS cache_rows (
            account_id  TEXT         NOT NULL,
            sort_key    TEXT         NOT NULL,
            payload     JSONB        NOT NULL,
            expires_at  TIMESTAMPTZ  NOT NULL,
            updated_at  TIMESTAMPTZ  NOT NULL DEFAULT now(),
            PRIMARY KEY (account_id, sort_key)
        )
        "#,
        "CREATE INDEX IF NOT EXISTS cache_rows_expires_at ON cache_rows (expires_at)",
        r#"
        CREATE TABLE IF NOT EXISTS update_queue (
            id           BIGSERIAL    PRIMARY KEY,
            channel      TEXT         NOT NULL,
            account_id   TEXT         NOT NULL,
            payload      JSONB        NOT NULL,
            visible_at   TIMESTAMPTZ  NOT NULL,
            claimed_at   TIMESTAMPTZ,
            attempts     INT          NOT NULL DEFAULT 0,
            created_at   TIMESTAMPTZ  NOT NULL DEFAULT now()
        )
        "#,
        "CREATE INDEX IF NOT EXISTS update_queue_visible_at ON update_queue (visible_at)",
    ];
    for statement in statements {
        sqlx::query(statement)
            .execute(pool)
            .await
            .context("cache/queue migration failed")?;
    }

    info!("Cache/queue migrations complete");
    Ok(())
}

#[derive(Clone)]
pub struct PgCacheStore {
    pool: PgPool,
}

impl PgCacheStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CacheStore for PgCacheStore {
    async fn put(&self, row: CacheRow) -> Result<()> {
        sqlx::query(
            "INSERT INTO cache_rows (account_id, sort_key, payload, expires_at)
             VALUES ($1, $2, $3, $4)
             ON CONFLICT (account_id, sort_key)
             DO UPDATE SET payload = EXCLUDED.payload,
                           expires_at = EXCLUDED.expires_at,
                           updated_at = now()",
        )
        .bind(&row.account_id)
        .bind(row.sort_key.to_string())
        .bind(&row.payload)
        .bind(row.expires_at)
        .execute(&self.pool)
        .await
        .with_context(|| format!("writing {} for {}", row.sort_key, row.account_id))?;
        Ok(())
    }

    async fn get(&self, account_id: &str, sort_key: &SortKey) -> Result<Option<CacheRow>> {
        let row = sqlx::query_as::<_, (serde_json::Value, DateTime<Utc>)>(
            "SELECT payload, expires_at FROM cache_rows
             WHERE account_id = $1 AND sort_key = $2 AND expires_at > now()",
        )
        .bind(account_id)
        .bind(sort_key.to_string())
        .fetch_optional(&self.pool)
        .await
        .with_context(|| format!("reading {sort_key} for {account_id}"))?;

        Ok(row.map(|(payload, expires_at)| CacheRow {
            account_id: account_id.to_string(),
            sort_key: *sort_key,
            payload,
            expires_at,
        }))
    }

    async fn purge_expired(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM cache_rows WHERE expires_at <= now()")
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

#[derive(Clone)]
pub struct PgUpdateQueue {
    pool: PgPool,
}

impl PgUpdateQueue {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UpdateChannel for PgUpdateQueue {
    async fn enqueue(&self, message: &UpdateMessage, delay: Duration) -> Result<()> {
        sqlx::query(
            "INSERT INTO update_queue (channel, account_id, payload, visible_at)
             VALUES ($1, $2, $3, $4)",
        )
        .bind(message.update_type())
        .bind(message.account_id())
        .bind(serde_json::to_value(message)?)
        .bind(Utc::now() + delay)
        .execute(&self.pool)
        .await
        .context("enqueueing update message")?;
        Ok(())
    }

    async fn dequeue_ready(&self, limit: u32) -> Result<Vec<QueuedMessage>> {
        let rows = sqlx::query_as::<_, (i64, serde_json::Value, i32)>(
            "UPDATE update_queue SET claimed_at = now(), attempts = attempts + 1
             WHERE id IN (
                 SELECT id FROM update_queue
                 WHERE visible_at <= now()
                   AND (claimed_at IS NULL OR claimed_at < now() - make_interval(secs => $2))
                 ORDER BY visible_at, id
                 LIMIT $1
                 FOR UPDATE SKIP LOCKED
             )
             RETURNING id, payload, attempts",
        )
        .bind(limit as i64)
        .bind(CLAIM_TIMEOUT_SECS as f64)
        .fetch_all(&self.pool)
        .await
        .context("claiming update messages")?;

        let mut claimed = Vec::with_capacity(rows.len());
        for (id, payload, attempts) in rows {
            match serde_json::from_value::<UpdateMessage>(payload) {
                Ok(message) => claimed.push(QueuedMessage {
                    id,
                    message,
                    attempts,
                }),
                Err(e) => {
                    // Undecodable messages would be reclaimed forever; drop them.
                    warn!(id, error = %e, "Dropping malformed update message");
                    self.ack(id).await?;
                }
            }
        }
        Ok(claimed)
    }

    async fn ack(&self, id: i64) -> Result<()> {
        sqlx::query("DELETE FROM update_queue WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn release(&self, id: i64, delay: Duration) -> Result<()> {
        sqlx::query(
            "UPDATE update_queue SET claimed_at = NULL, visible_at = $2 WHERE id = $1",
        )
        .bind(id)
        .bind(Utc::now() + delay)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
