use chrono::{DateTime, Duration, Utc};
use tracing::info;

use ownergraph_common::{Category, Priority, RunMetadata, ScrapeMode};

/// Decides, once per run, whether a full scrape is due and which categories
/// need refreshing.
#[derive(Debug, Clone, Copy)]
pub struct StalenessEvaluator {
    /// A full scrape is forced once the last one is strictly older than this.
    full_scrape_interval: Duration,
}

/// What triggered the run, beyond elapsed time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunTrigger {
    pub force_full: bool,
    pub mode: Option<ScrapeMode>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StalenessDecision {
    pub needs_full_scrape: bool,
    pub selected: Vec<ScheduledCategory>,
    /// Categories still within their TTL.
    pub skipped: usize,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduledCategory {
    pub category: Category,
    pub reason: SelectionReason,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionReason {
    /// Part of a full scrape.
    FullScrape,
    /// Never refreshed successfully.
    NeverRefreshed,
    /// Older than its cache TTL.
    Stale,
    /// Critical categories refresh on every run.
    Critical,
}

impl StalenessDecision {
    pub fn mode(&self) -> ScrapeMode {
        if self.needs_full_scrape {
            ScrapeMode::Full
        } else {
            ScrapeMode::Delta
        }
    }

    pub fn categories(&self) -> Vec<Category> {
        self.selected.iter().map(|s| s.category).collect()
    }

    /// Nothing to refresh; the run ends without fetching.
    pub fn all_cached(&self) -> bool {
        self.selected.is_empty()
    }
}

impl Default for StalenessEvaluator {
    fn default() -> Self {
        Self::new(Duration::days(7))
    }
}

impl StalenessEvaluator {
    pub fn new(full_scrape_interval: Duration) -> Self {
        Self {
            full_scrape_interval,
        }
    }

    /// Evaluate the registry against the account's metadata. Absent metadata
    /// means the account was never scraped.
    pub fn evaluate(
        &self,
        metadata: Option<&RunMetadata>,
        registry: &[Category],
        trigger: RunTrigger,
        now: DateTime<Utc>,
    ) -> StalenessDecision {
        let last_full = metadata.and_then(|m| m.last_full_scrape);
        let full_due = match last_full {
            None => true,
            Some(at) => now - at > self.full_scrape_interval,
        };
        let needs_full_scrape =
            trigger.force_full || trigger.mode == Some(ScrapeMode::Full) || full_due;

        if needs_full_scrape {
            info!(
                force_full = trigger.force_full,
                last_full_scrape = ?last_full,
                categories = registry.len(),
                "Full scrape due"
            );
            return StalenessDecision {
                needs_full_scrape,
                selected: registry
                    .iter()
                    .map(|&category| ScheduledCategory {
                        category,
                        reason: SelectionReason::FullScrape,
                    })
                    .collect(),
                skipped: 0,
            };
        }

        let mut selected = Vec::new();
        let mut skipped = 0usize;
        for &category in registry {
            match self.reason_for(metadata, &category, now) {
                Some(reason) => selected.push(ScheduledCategory { category, reason }),
                None => skipped += 1,
            }
        }

        info!(
            selected = selected.len(),
            skipped,
            "Delta scrape scheduled"
        );

        StalenessDecision {
            needs_full_scrape,
            selected,
            skipped,
        }
    }

    fn reason_for(
        &self,
        metadata: Option<&RunMetadata>,
        category: &Category,
        now: DateTime<Utc>,
    ) -> Option<SelectionReason> {
        let last = metadata.and_then(|m| m.last_refreshed(category.name));
        match last {
            None => Some(SelectionReason::NeverRefreshed),
            Some(at) if now - at > category.cache_ttl() => Some(SelectionReason::Stale),
            Some(_) if category.priority == Priority::Critical => Some(SelectionReason::Critical),
            Some(_) => None,
        }
    }
}
