//! Sort keys for cache rows. Rows are partitioned by account id; the sort key
//! prefix distinguishes the row kind.

use uuid::Uuid;

use crate::error::OwnerGraphError;
use crate::types::ScrapeMode;

pub const LAST_FULL_SCRAPE: &str = "LAST_FULL_SCRAPE";
pub const LAST_DELTA_SCRAPE: &str = "LAST_DELTA_SCRAPE";
const SMALL_BATCH_PREFIX: &str = "SMALL_BATCH#";
const SUMMARY_PREFIX: &str = "SUMMARY#";
const COMPRESSED_PREFIX: &str = "COMPRESSED#";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SortKey {
    LastFullScrape,
    LastDeltaScrape,
    SmallBatch(Uuid),
    Summary(Uuid),
    Compressed(Uuid),
}

impl SortKey {
    /// Metadata row written after a run in the given mode.
    pub fn for_mode(mode: ScrapeMode) -> Self {
        match mode {
            ScrapeMode::Full => SortKey::LastFullScrape,
            ScrapeMode::Delta => SortKey::LastDeltaScrape,
        }
    }

    pub fn run_id(&self) -> Option<Uuid> {
        match self {
            SortKey::SmallBatch(id) | SortKey::Summary(id) | SortKey::Compressed(id) => Some(*id),
            SortKey::LastFullScrape | SortKey::LastDeltaScrape => None,
        }
    }
}

impl std::fmt::Display for SortKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SortKey::LastFullScrape => write!(f, "{LAST_FULL_SCRAPE}"),
            SortKey::LastDeltaScrape => write!(f, "{LAST_DELTA_SCRAPE}"),
            SortKey::SmallBatch(id) => write!(f, "{SMALL_BATCH_PREFIX}{id}"),
            SortKey::Summary(id) => write!(f, "{SUMMARY_PREFIX}{id}"),
            SortKey::Compressed(id) => write!(f, "{COMPRESSED_PREFIX}{id}"),
        }
    }
}

impl std::str::FromStr for SortKey {
    type Err = OwnerGraphError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parse_id = |raw: &str| {
            Uuid::parse_str(raw)
                .map_err(|e| OwnerGraphError::Validation(format!("bad run id in sort key '{s}': {e}")))
        };

        if s == LAST_FULL_SCRAPE {
            Ok(SortKey::LastFullScrape)
        } else if s == LAST_DELTA_SCRAPE {
            Ok(SortKey::LastDeltaScrape)
        } else if let Some(id) = s.strip_prefix(SMALL_BATCH_PREFIX) {
            Ok(SortKey::SmallBatch(parse_id(id)?))
        } else if let Some(id) = s.strip_prefix(SUMMARY_PREFIX) {
            Ok(SortKey::Summary(parse_id(id)?))
        } else if let Some(id) = s.strip_prefix(COMPRESSED_PREFIX) {
            Ok(SortKey::Compressed(parse_id(id)?))
        } else {
            Err(OwnerGraphError::Validation(format!("unknown sort key '{s}'")))
        }
    }
}
