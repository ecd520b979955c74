use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use ownergraph_common::{
    BatchSummary, CategoryOutcome, CompressedResult, ScrapeRun, SmallBatchResult, SortKey,
    UpdateMessage,
};

use crate::pipeline::aggregate::{per_category, RunTotals};
use crate::scheduling::planner::ProcessingMode;
use crate::store::{CacheRow, CacheStore, UpdateChannel};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RoutingPolicy {
    /// Runs below this many resources go direct.
    pub direct_max_resources: u64,
    /// Delay before a buffered pointer becomes visible.
    pub batch_delay: Duration,
    /// Expiry on persisted batch rows.
    pub result_ttl: Duration,
}

impl Default for RoutingPolicy {
    fn default() -> Self {
        Self {
            direct_max_resources: 1000,
            batch_delay: Duration::minutes(5),
            result_ttl: Duration::hours(48),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Route {
    Direct,
    Buffered,
}

impl std::fmt::Display for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Route::Direct => write!(f, "direct"),
            Route::Buffered => write!(f, "buffered"),
        }
    }
}

impl RoutingPolicy {
    pub fn route(&self, mode: ProcessingMode, total_resources: u64) -> Route {
        if mode == ProcessingMode::SmallBatch || total_resources < self.direct_max_resources {
            Route::Direct
        } else {
            Route::Buffered
        }
    }
}

/// What persistence achieved. Failures are warnings, never errors.
#[derive(Debug, Clone, PartialEq)]
pub struct PersistOutcome {
    pub route: Route,
    pub enqueued: bool,
    pub warnings: Vec<String>,
}

pub struct PersistenceRouter {
    store: Arc<dyn CacheStore>,
    channel: Arc<dyn UpdateChannel>,
    policy: RoutingPolicy,
}

impl PersistenceRouter {
    pub fn new(
        store: Arc<dyn CacheStore>,
        channel: Arc<dyn UpdateChannel>,
        policy: RoutingPolicy,
    ) -> Self {
        Self {
            store,
            channel,
            policy,
        }
    }

    pub async fn persist(
        &self,
        scraper_id: &str,
        run: &ScrapeRun,
        processing_mode: ProcessingMode,
        outcomes: &[CategoryOutcome],
        totals: RunTotals,
    ) -> PersistOutcome {
        let route = self.policy.route(processing_mode, totals.total_resources);
        info!(
            run_id = %run.run_id,
            %route,
            %processing_mode,
            total_resources = totals.total_resources,
            "Routing run results"
        );
        match route {
            Route::Direct => self.persist_direct(scraper_id, run, outcomes, totals).await,
            Route::Buffered => self.persist_buffered(scraper_id, run, outcomes, totals).await,
        }
    }

    async fn persist_direct(
        &self,
        scraper_id: &str,
        run: &ScrapeRun,
        outcomes: &[CategoryOutcome],
        totals: RunTotals,
    ) -> PersistOutcome {
        let mut warnings = Vec::new();

        let small = SmallBatchResult {
            run_id: run.run_id,
            account_id: run.account_id.clone(),
            category_results: outcomes.to_vec(),
            total_resources: totals.total_resources,
        };
        let key = SortKey::SmallBatch(run.run_id);
        if let Err(e) = self.write_row(&run.account_id, key, &small, run.timestamp).await {
            warn!(%key, error = %e, "Small batch write failed");
            warnings.push(format!("{key}: {e:#}"));
        }

        let message = UpdateMessage::DirectSmall {
            scraper_id: scraper_id.to_string(),
            account_id: run.account_id.clone(),
            category_results: outcomes.to_vec(),
            total_resources: totals.total_resources,
        };
        let enqueued = match self.channel.enqueue(&message, Duration::zero()).await {
            Ok(()) => true,
            Err(e) => {
                warn!(run_id = %run.run_id, error = %e, "Direct update enqueue failed");
                warnings.push(format!("direct update: {e:#}"));
                false
            }
        };

        PersistOutcome {
            route: Route::Direct,
            enqueued,
            warnings,
        }
    }

    async fn persist_buffered(
        &self,
        scraper_id: &str,
        run: &ScrapeRun,
        outcomes: &[CategoryOutcome],
        totals: RunTotals,
    ) -> PersistOutcome {
        let mut warnings = Vec::new();

        let summary = BatchSummary {
            run_id: run.run_id,
            account_id: run.account_id.clone(),
            scrape_type: run.mode,
            total_resources: totals.total_resources,
            successful_categories: totals.successful_categories,
            failed_categories: totals.failed_categories,
            per_category: per_category(outcomes),
            created_at: run.timestamp,
        };
        let compressed = CompressedResult::from_outcomes(run.run_id, &run.account_id, outcomes);
        let summary_key = SortKey::Summary(run.run_id);
        let compressed_key = SortKey::Compressed(run.run_id);

        // Independent writes; neither rolls back the other.
        let (summary_written, compressed_written) = tokio::join!(
            self.write_row(&run.account_id, summary_key, &summary, run.timestamp),
            self.write_row(&run.account_id, compressed_key, &compressed, run.timestamp),
        );
        if let Err(e) = summary_written {
            warn!(key = %summary_key, error = %e, "Summary write failed");
            warnings.push(format!("{summary_key}: {e:#}"));
        }

        let enqueued = match compressed_written {
            Err(e) => {
                warn!(key = %compressed_key, error = %e, "Compressed write failed, pointer not queued");
                warnings.push(format!("{compressed_key}: {e:#}"));
                false
            }
            Ok(()) => {
                let pointer = UpdateMessage::BatchLarge {
                    scraper_id: scraper_id.to_string(),
                    account_id: run.account_id.clone(),
                    cache_key: compressed_key.to_string(),
                    total_resources: totals.total_resources,
                };
                match self.channel.enqueue(&pointer, self.policy.batch_delay).await {
                    Ok(()) => true,
                    Err(e) => {
                        warn!(run_id = %run.run_id, error = %e, "Batch pointer enqueue failed");
                        warnings.push(format!("batch update: {e:#}"));
                        false
                    }
                }
            }
        };

        PersistOutcome {
            route: Route::Buffered,
            enqueued,
            warnings,
        }
    }

    async fn write_row<T: Serialize + Sync>(
        &self,
        account_id: &str,
        key: SortKey,
        payload: &T,
        now: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        let row = CacheRow::new(account_id, key, payload, self.policy.result_ttl, now)?;
        self.store.put(row).await
    }
}
