//! Run metadata: the `LAST_FULL_SCRAPE` / `LAST_DELTA_SCRAPE` rows read
//! before a run and written after it.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use tracing::{info, warn};

use ownergraph_common::{CategoryOutcome, MetadataRow, RunMetadata, ScrapeRun, SortKey};

use crate::store::{CacheRow, CacheStore};

pub struct MetadataRecorder {
    store: Arc<dyn CacheStore>,
    ttl: Duration,
}

impl MetadataRecorder {
    pub fn new(store: Arc<dyn CacheStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    /// Load both metadata rows. `Ok(None)` when the account has neither.
    pub async fn load(&self, account_id: &str) -> Result<Option<RunMetadata>> {
        let full = self.read_row(account_id, SortKey::LastFullScrape).await?;
        let delta = self.read_row(account_id, SortKey::LastDeltaScrape).await?;
        if full.is_none() && delta.is_none() {
            return Ok(None);
        }

        let mut category_refreshed: BTreeMap<String, DateTime<Utc>> = BTreeMap::new();
        for row in full.iter().chain(delta.iter()) {
            for (name, at) in &row.category_refreshed {
                let entry = category_refreshed.entry(name.clone()).or_insert(*at);
                if *at > *entry {
                    *entry = *at;
                }
            }
        }

        Ok(Some(RunMetadata {
            account_id: account_id.to_string(),
            last_full_scrape: full.as_ref().map(|r| r.timestamp),
            last_delta_scrape: delta.as_ref().map(|r| r.timestamp),
            category_refreshed,
        }))
    }

    /// Write the row for this run's mode. Categories that succeeded get this
    /// run's timestamp; the rest keep their previous one.
    pub async fn record(
        &self,
        previous: Option<&RunMetadata>,
        run: &ScrapeRun,
        outcomes: &[CategoryOutcome],
    ) -> Result<()> {
        let row = next_row(previous, run, outcomes);
        let key = SortKey::for_mode(run.mode);
        let cache_row = CacheRow::new(&run.account_id, key, &row, self.ttl, run.timestamp)?;
        self.store.put(cache_row).await?;
        info!(
            account_id = run.account_id.as_str(),
            %key,
            categories_refreshed = outcomes.iter().filter(|o| o.is_success()).count(),
            "Run metadata recorded"
        );
        Ok(())
    }

    async fn read_row(&self, account_id: &str, key: SortKey) -> Result<Option<MetadataRow>> {
        match self.store.get(account_id, &key).await? {
            Some(row) => match row.decode::<MetadataRow>() {
                Ok(decoded) => Ok(Some(decoded)),
                Err(e) => {
                    warn!(account_id, %key, error = %e, "Ignoring unreadable metadata row");
                    Ok(None)
                }
            },
            None => Ok(None),
        }
    }
}

pub fn next_row(
    previous: Option<&RunMetadata>,
    run: &ScrapeRun,
    outcomes: &[CategoryOutcome],
) -> MetadataRow {
    let mut category_refreshed = previous
        .map(|m| m.category_refreshed.clone())
        .unwrap_or_default();
    for outcome in outcomes.iter().filter(|o| o.is_success()) {
        category_refreshed.insert(outcome.category().to_string(), run.timestamp);
    }

    MetadataRow {
        run_id: run.run_id,
        timestamp: run.timestamp,
        mode: run.mode,
        categories_processed: run.categories_processed,
        total_records: run.total_records,
        category_refreshed,
    }
}
