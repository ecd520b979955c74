pub mod client;
pub mod migrate;
pub mod reader;
pub mod reconciler;
pub mod store;
pub mod tag_adapter;
#[cfg(any(test, feature = "test-support"))]
pub mod testing;
#[cfg(feature = "test-utils")]
pub mod testutil;
pub mod writer;

pub use client::GraphClient;
pub use reader::OwnershipReader;
pub use reconciler::{
    BulkOutcome, OwnershipReconciler, ReconcileAction, ReconcileStats, ReconcilerPolicy,
    Reconciliation, DEFAULT_CONFLICT_TOLERANCE,
};
pub use store::RelationshipStore;
pub use tag_adapter::{assertions_from_records, TAG_SOURCE};
pub use writer::GraphWriter;
