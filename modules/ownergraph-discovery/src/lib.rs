pub mod consumer;
pub mod fetch;
pub mod pipeline;
pub mod scheduling;
pub mod store;
#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use consumer::{ConsumeStats, GraphUpdateConsumer};
pub use fetch::{FetchDetail, FileFetcher, ResourceFetcher};
pub use pipeline::run::{DiscoveryRun, RunReport, RunRequest};
pub use scheduling::registry::CategoryRegistry;
pub use store::{CacheRow, CacheStore, QueuedMessage, UpdateChannel};
