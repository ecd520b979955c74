use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// --- Category registry types ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Critical,
    High,
    Medium,
    Low,
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Priority::Critical => write!(f, "critical"),
            Priority::High => write!(f, "high"),
            Priority::Medium => write!(f, "medium"),
            Priority::Low => write!(f, "low"),
        }
    }
}

/// A named class of discoverable resources sharing one refresh policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Category {
    pub name: &'static str,
    pub resource_type: &'static str,
    pub cache_ttl_hours: i64,
    pub priority: Priority,
}

impl Category {
    pub const fn new(
        name: &'static str,
        resource_type: &'static str,
        cache_ttl_hours: i64,
        priority: Priority,
    ) -> Self {
        Self {
            name,
            resource_type,
            cache_ttl_hours,
            priority,
        }
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::hours(self.cache_ttl_hours)
    }
}

// --- Run bookkeeping ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScrapeMode {
    Full,
    Delta,
}

impl std::fmt::Display for ScrapeMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScrapeMode::Full => write!(f, "full"),
            ScrapeMode::Delta => write!(f, "delta"),
        }
    }
}

impl std::str::FromStr for ScrapeMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "full" => Ok(ScrapeMode::Full),
            "delta" => Ok(ScrapeMode::Delta),
            other => Err(format!("unknown scrape mode '{other}' (expected full or delta)")),
        }
    }
}

/// Last-scrape bookkeeping for one account. Absent rows mean "never scraped".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunMetadata {
    pub account_id: String,
    pub last_full_scrape: Option<DateTime<Utc>>,
    pub last_delta_scrape: Option<DateTime<Utc>>,
    /// Last successful refresh per category name.
    #[serde(default)]
    pub category_refreshed: BTreeMap<String, DateTime<Utc>>,
}

impl RunMetadata {
    pub fn never_scraped(account_id: &str) -> Self {
        Self {
            account_id: account_id.to_string(),
            ..Default::default()
        }
    }

    /// When `category` last refreshed successfully. `None` if it never has,
    /// even when a full scrape ran (the category failed in it).
    pub fn last_refreshed(&self, category: &str) -> Option<DateTime<Utc>> {
        self.category_refreshed.get(category).copied()
    }
}

/// One invocation of the discovery pipeline. Immutable once persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScrapeRun {
    pub run_id: Uuid,
    pub account_id: String,
    pub timestamp: DateTime<Utc>,
    pub mode: ScrapeMode,
    pub categories_processed: u32,
    pub total_records: u64,
}

// --- Discovered resources ---

/// A single discovered resource. Duplicates across categories are expected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceRecord {
    pub arn: String,
    pub region: String,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    pub category: String,
}

/// Per-category fetch result. A failure never carries records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum CategoryOutcome {
    Success {
        category: String,
        records: Vec<ResourceRecord>,
    },
    Failure {
        category: String,
        error: String,
    },
}

impl CategoryOutcome {
    pub fn category(&self) -> &str {
        match self {
            CategoryOutcome::Success { category, .. } | CategoryOutcome::Failure { category, .. } => {
                category
            }
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, CategoryOutcome::Success { .. })
    }

    pub fn resource_count(&self) -> u64 {
        match self {
            CategoryOutcome::Success { records, .. } => records.len() as u64,
            CategoryOutcome::Failure { .. } => 0,
        }
    }

    pub fn records(&self) -> &[ResourceRecord] {
        match self {
            CategoryOutcome::Success { records, .. } => records,
            CategoryOutcome::Failure { .. } => &[],
        }
    }
}
