//! Wire and storage shapes shared between the discovery run and the graph
//! update consumer.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{CategoryOutcome, ResourceRecord, ScrapeMode};

// --- Update channel ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "updateType", rename_all_fields = "camelCase")]
pub enum UpdateMessage {
    /// Small result sets travel inline on the low-latency channel.
    #[serde(rename = "direct_small")]
    DirectSmall {
        scraper_id: String,
        account_id: String,
        category_results: Vec<CategoryOutcome>,
        total_resources: u64,
    },
    /// Large result sets are stored; only a pointer is queued.
    #[serde(rename = "batch_large")]
    BatchLarge {
        scraper_id: String,
        account_id: String,
        cache_key: String,
        total_resources: u64,
    },
}

impl UpdateMessage {
    pub fn update_type(&self) -> &'static str {
        match self {
            UpdateMessage::DirectSmall { .. } => "direct_small",
            UpdateMessage::BatchLarge { .. } => "batch_large",
        }
    }

    pub fn account_id(&self) -> &str {
        match self {
            UpdateMessage::DirectSmall { account_id, .. }
            | UpdateMessage::BatchLarge { account_id, .. } => account_id,
        }
    }

    pub fn total_resources(&self) -> u64 {
        match self {
            UpdateMessage::DirectSmall { total_resources, .. }
            | UpdateMessage::BatchLarge { total_resources, .. } => *total_resources,
        }
    }
}

// --- Cache row payloads ---

/// Full per-category results for a small run (`SMALL_BATCH#<runId>`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SmallBatchResult {
    pub run_id: Uuid,
    pub account_id: String,
    pub category_results: Vec<CategoryOutcome>,
    pub total_resources: u64,
}

/// Aggregate counts for a large run (`SUMMARY#<runId>`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchSummary {
    pub run_id: Uuid,
    pub account_id: String,
    pub scrape_type: ScrapeMode,
    pub total_resources: u64,
    pub successful_categories: u32,
    pub failed_categories: u32,
    pub per_category: BTreeMap<String, u64>,
    pub created_at: DateTime<Utc>,
}

/// Identifier and owner-tag projection of a record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompactRecord {
    pub arn: String,
    pub region: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub owner_tags: BTreeMap<String, String>,
}

impl CompactRecord {
    pub fn from_record(record: &ResourceRecord) -> Self {
        Self {
            arn: record.arn.clone(),
            region: record.region.clone(),
            owner_tags: record.tags.clone(),
        }
    }

    pub fn into_record(self, category: &str) -> ResourceRecord {
        ResourceRecord {
            arn: self.arn,
            region: self.region,
            tags: self.owner_tags,
            category: category.to_string(),
        }
    }
}

/// Per-category identifier arrays for a large run (`COMPRESSED#<runId>`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompressedResult {
    pub run_id: Uuid,
    pub account_id: String,
    pub categories: BTreeMap<String, Vec<CompactRecord>>,
}

impl CompressedResult {
    pub fn from_outcomes(run_id: Uuid, account_id: &str, outcomes: &[CategoryOutcome]) -> Self {
        let mut categories: BTreeMap<String, Vec<CompactRecord>> = BTreeMap::new();
        for outcome in outcomes.iter().filter(|o| o.is_success()) {
            categories
                .entry(outcome.category().to_string())
                .or_default()
                .extend(outcome.records().iter().map(CompactRecord::from_record));
        }
        Self {
            run_id,
            account_id: account_id.to_string(),
            categories,
        }
    }

    pub fn into_records(self) -> Vec<ResourceRecord> {
        self.categories
            .into_iter()
            .flat_map(|(category, records)| {
                records
                    .into_iter()
                    .map(move |r| r.into_record(&category))
            })
            .collect()
    }
}

/// Payload of the `LAST_FULL_SCRAPE` / `LAST_DELTA_SCRAPE` rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetadataRow {
    pub run_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub mode: ScrapeMode,
    pub categories_processed: u32,
    pub total_records: u64,
    #[serde(default)]
    pub category_refreshed: BTreeMap<String, DateTime<Utc>>,
}
