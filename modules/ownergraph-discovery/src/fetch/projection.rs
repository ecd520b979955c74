//! Reduced projection for the large-batch path: keep only ownership tags,
//! with their marker prefix stripped.

use std::collections::BTreeMap;

use tracing::debug;

use ownergraph_common::ResourceRecord;

pub const DEFAULT_OWNER_TAG_PREFIX: &str = "ownership:";

/// Keep the owner-relevant tags of `record`.
pub fn project_owner_tags(mut record: ResourceRecord, prefix: &str) -> ResourceRecord {
    record.tags = owner_tags(&record.tags, prefix, &record.arn);
    record
}

/// Select tags whose key starts with `prefix` and strip it.
///
/// Matching is case-sensitive. The stripped key is trimmed; a key that is
/// empty after stripping is dropped. When two keys strip to the same name,
/// the first in key order wins.
pub fn owner_tags(
    tags: &BTreeMap<String, String>,
    prefix: &str,
    arn: &str,
) -> BTreeMap<String, String> {
    let mut owned = BTreeMap::new();
    for (key, value) in tags {
        let Some(stripped) = key.strip_prefix(prefix) else {
            continue;
        };
        let stripped = stripped.trim();
        if stripped.is_empty() {
            debug!(arn, key = key.as_str(), "Dropping owner tag with empty name");
            continue;
        }
        if owned.contains_key(stripped) {
            debug!(arn, key = key.as_str(), "Dropping duplicate owner tag");
            continue;
        }
        owned.insert(stripped.to_string(), value.clone());
    }
    owned
}
