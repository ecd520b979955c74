//! ResourceFetcher: the seam to external inventory APIs.

pub mod file;
pub mod projection;

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use ownergraph_common::{Category, ResourceRecord};

pub use file::FileFetcher;

/// How much of each record the fetcher should return.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FetchDetail {
    /// Every tag, region and timestamp.
    Full,
    /// Identifier, region and owner tags only.
    Reduced,
}

#[async_trait]
pub trait ResourceFetcher: Send + Sync {
    /// List one category's resources. Timeouts and retries are the
    /// implementation's concern; an `Err` fails only this category.
    async fn fetch(&self, category: &Category, detail: FetchDetail) -> Result<Vec<ResourceRecord>>;
}

#[async_trait]
impl<T: ResourceFetcher + ?Sized> ResourceFetcher for Arc<T> {
    async fn fetch(&self, category: &Category, detail: FetchDetail) -> Result<Vec<ResourceRecord>> {
        (**self).fetch(category, detail).await
    }
}
