//! Graph update consumer: drains ready update messages and feeds the
//! tag-derived ownership they carry into the reconciler.

use std::fmt;
use std::sync::Arc;

use anyhow::Result;
use chrono::Duration;
use tracing::{info, warn};

use ownergraph_common::{CategoryOutcome, CompressedResult, ResourceRecord, SortKey, UpdateMessage};
use ownergraph_graph::{assertions_from_records, OwnershipReconciler, ReconcileStats, RelationshipStore};

use crate::store::{CacheStore, QueuedMessage, UpdateChannel};

/// A message that keeps failing is dropped after this many claims.
const MAX_ATTEMPTS: i32 = 5;

/// Backoff before a failed message becomes visible again.
const RETRY_DELAY_SECS: i64 = 60;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ConsumeStats {
    pub messages: u32,
    pub acked: u32,
    pub released: u32,
    pub dropped: u32,
    pub records: u64,
    pub reconcile: ReconcileStats,
}

impl fmt::Display for ConsumeStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "\n=== Graph Update Complete ===")?;
        writeln!(f, "Messages claimed: {}", self.messages)?;
        writeln!(f, "  acked:          {}", self.acked)?;
        writeln!(f, "  released:       {}", self.released)?;
        writeln!(f, "  dropped:        {}", self.dropped)?;
        writeln!(f, "Records read:     {}", self.records)?;
        write!(f, "{}", self.reconcile)
    }
}

pub struct GraphUpdateConsumer<S> {
    store: Arc<dyn CacheStore>,
    channel: Arc<dyn UpdateChannel>,
    reconciler: OwnershipReconciler<S>,
    owner_tag_prefix: String,
}

impl<S: RelationshipStore> GraphUpdateConsumer<S> {
    pub fn new(
        store: Arc<dyn CacheStore>,
        channel: Arc<dyn UpdateChannel>,
        reconciler: OwnershipReconciler<S>,
        owner_tag_prefix: impl Into<String>,
    ) -> Self {
        Self {
            store,
            channel,
            reconciler,
            owner_tag_prefix: owner_tag_prefix.into(),
        }
    }

    pub fn reconciler(&self) -> &OwnershipReconciler<S> {
        &self.reconciler
    }

    /// Claim up to `limit` visible messages and apply each one.
    pub async fn consume(&self, limit: u32) -> Result<ConsumeStats> {
        let claimed = self.channel.dequeue_ready(limit).await?;
        let mut stats = ConsumeStats {
            messages: claimed.len() as u32,
            ..ConsumeStats::default()
        };

        for queued in claimed {
            self.apply(queued, &mut stats).await?;
        }

        info!(
            messages = stats.messages,
            acked = stats.acked,
            released = stats.released,
            dropped = stats.dropped,
            records = stats.records,
            "Update messages consumed"
        );
        Ok(stats)
    }

    async fn apply(&self, queued: QueuedMessage, stats: &mut ConsumeStats) -> Result<()> {
        let update_type = queued.message.update_type();
        let account_id = queued.message.account_id().to_string();

        let records = match self.load_records(&queued.message).await {
            Ok(Some(records)) => records,
            Ok(None) => {
                self.channel.ack(queued.id).await?;
                stats.dropped += 1;
                return Ok(());
            }
            Err(e) => {
                warn!(id = queued.id, update_type, error = %e, "Failed to load update records");
                return self.retry_or_drop(&queued, stats).await;
            }
        };

        stats.records += records.len() as u64;
        let assertions = assertions_from_records(&records, &self.owner_tag_prefix);
        let result = self.reconciler.reconcile_all(&assertions).await;
        info!(
            id = queued.id,
            update_type,
            account_id = account_id.as_str(),
            records = records.len(),
            assertions = assertions.len(),
            "Applied update message"
        );
        let failed = result.failed;
        absorb(&mut stats.reconcile, result);

        if failed > 0 {
            self.retry_or_drop(&queued, stats).await
        } else {
            self.channel.ack(queued.id).await?;
            stats.acked += 1;
            Ok(())
        }
    }

    /// Records carried by a message. `None` means the message points at
    /// nothing usable and should be dropped.
    async fn load_records(&self, message: &UpdateMessage) -> Result<Option<Vec<ResourceRecord>>> {
        match message {
            UpdateMessage::DirectSmall {
                category_results, ..
            } => Ok(Some(
                category_results
                    .iter()
                    .filter_map(|outcome| match outcome {
                        CategoryOutcome::Success { records, .. } => Some(records.clone()),
                        CategoryOutcome::Failure { .. } => None,
                    })
                    .flatten()
                    .collect(),
            )),
            UpdateMessage::BatchLarge {
                account_id,
                cache_key,
                ..
            } => {
                let key = match cache_key.parse::<SortKey>() {
                    Ok(key @ SortKey::Compressed(_)) => key,
                    Ok(other) => {
                        warn!(cache_key = cache_key.as_str(), kind = %other, "Pointer does not name a compressed row");
                        return Ok(None);
                    }
                    Err(e) => {
                        warn!(cache_key = cache_key.as_str(), error = %e, "Malformed cache key");
                        return Ok(None);
                    }
                };
                match self.store.get(account_id, &key).await? {
                    Some(row) => Ok(Some(row.decode::<CompressedResult>()?.into_records())),
                    None => {
                        warn!(
                            account_id = account_id.as_str(),
                            %key,
                            "Compressed row missing or expired, dropping pointer"
                        );
                        Ok(None)
                    }
                }
            }
        }
    }

    async fn retry_or_drop(&self, queued: &QueuedMessage, stats: &mut ConsumeStats) -> Result<()> {
        if queued.attempts >= MAX_ATTEMPTS {
            warn!(id = queued.id, attempts = queued.attempts, "Dropping update message after repeated failures");
            self.channel.ack(queued.id).await?;
            stats.dropped += 1;
        } else {
            self.channel
                .release(queued.id, Duration::seconds(RETRY_DELAY_SECS))
                .await?;
            stats.released += 1;
        }
        Ok(())
    }
}

fn absorb(total: &mut ReconcileStats, batch: ReconcileStats) {
    total.created += batch.created;
    total.merged += batch.merged;
    total.refreshed += batch.refreshed;
    total.conflicts += batch.conflicts;
    total.failed += batch.failed;
}
