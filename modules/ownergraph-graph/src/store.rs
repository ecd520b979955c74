// RelationshipStore: the persistence seam behind the ownership reconciler.
//
// GraphWriter implements it against Neo4j; MemoryRelationshipStore (testing.rs)
// implements it in memory so reconciliation can be tested without Docker.

use anyhow::Result;
use async_trait::async_trait;
use uuid::Uuid;

use ownergraph_common::Relationship;

#[async_trait]
pub trait RelationshipStore: Send + Sync {
    /// Every edge (any subject, any state) pointing at `resource`.
    async fn edges_for_resource(&self, resource: &str) -> Result<Vec<Relationship>>;

    /// Look up a single edge by id.
    async fn edge(&self, id: Uuid) -> Result<Option<Relationship>>;

    /// Upsert edges by id. Edges are never deleted.
    async fn save(&self, edges: &[Relationship]) -> Result<()>;
}

#[async_trait]
impl<T: RelationshipStore + ?Sized> RelationshipStore for std::sync::Arc<T> {
    async fn edges_for_resource(&self, resource: &str) -> Result<Vec<Relationship>> {
        (**self).edges_for_resource(resource).await
    }

    async fn edge(&self, id: Uuid) -> Result<Option<Relationship>> {
        (**self).edge(id).await
    }

    async fn save(&self, edges: &[Relationship]) -> Result<()> {
        (**self).save(edges).await
    }
}
