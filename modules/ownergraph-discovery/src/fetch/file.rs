use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::info;

use ownergraph_common::{Category, ResourceRecord};

use super::{FetchDetail, ResourceFetcher};

/// Serves categories from a JSON inventory snapshot, for local runs.
///
/// ```json
/// {
///   "categories": { "s3_buckets": [{ "arn": "...", "region": "us-east-1", "tags": {} }] },
///   "errors": { "rds_instances": "AccessDenied" }
/// }
/// ```
///
/// Categories absent from the snapshot list no resources.
pub struct FileFetcher {
    categories: HashMap<String, Vec<InventoryEntry>>,
    errors: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct Inventory {
    #[serde(default)]
    categories: HashMap<String, Vec<InventoryEntry>>,
    #[serde(default)]
    errors: HashMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
struct InventoryEntry {
    arn: String,
    region: String,
    #[serde(default)]
    tags: BTreeMap<String, String>,
}

impl FileFetcher {
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("reading inventory {}", path.display()))?;
        let fetcher = Self::from_json(&raw)
            .with_context(|| format!("parsing inventory {}", path.display()))?;
        info!(
            path = %path.display(),
            categories = fetcher.categories.len(),
            "Loaded inventory snapshot"
        );
        Ok(fetcher)
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        let inventory: Inventory = serde_json::from_str(raw)?;
        Ok(Self {
            categories: inventory.categories,
            errors: inventory.errors,
        })
    }
}

#[async_trait]
impl ResourceFetcher for FileFetcher {
    async fn fetch(&self, category: &Category, _detail: FetchDetail) -> Result<Vec<ResourceRecord>> {
        if let Some(error) = self.errors.get(category.name) {
            bail!("{}: {error}", category.name);
        }
        Ok(self
            .categories
            .get(category.name)
            .map(|entries| {
                entries
                    .iter()
                    .map(|e| ResourceRecord {
                        arn: e.arn.clone(),
                        region: e.region.clone(),
                        tags: e.tags.clone(),
                        category: category.name.to_string(),
                    })
                    .collect()
            })
            .unwrap_or_default())
    }
}
