// In-memory RelationshipStore for tests that exercise reconciliation
// without a Neo4j container.

use std::collections::BTreeMap;
use std::sync::Mutex;

use anyhow::Result;
use async_trait::async_trait;
use uuid::Uuid;

use ownergraph_common::Relationship;

use crate::store::RelationshipStore;

#[derive(Default)]
pub struct MemoryRelationshipStore {
    edges: Mutex<BTreeMap<Uuid, Relationship>>,
    saves: Mutex<u32>,
}

impl MemoryRelationshipStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn all(&self) -> Vec<Relationship> {
        self.edges.lock().unwrap().values().cloned().collect()
    }

    pub async fn conflicted(&self) -> Vec<Relationship> {
        self.edges
            .lock()
            .unwrap()
            .values()
            .filter(|e| e.has_conflict())
            .cloned()
            .collect()
    }

    /// Number of `save` calls, for asserting write behaviour.
    pub fn save_count(&self) -> u32 {
        *self.saves.lock().unwrap()
    }
}

#[async_trait]
impl RelationshipStore for MemoryRelationshipStore {
    async fn edges_for_resource(&self, resource: &str) -> Result<Vec<Relationship>> {
        let mut edges: Vec<Relationship> = self
            .edges
            .lock()
            .unwrap()
            .values()
            .filter(|e| e.resource == resource)
            .cloned()
            .collect();
        edges.sort_by_key(|e| e.created_at);
        Ok(edges)
    }

    async fn edge(&self, id: Uuid) -> Result<Option<Relationship>> {
        Ok(self.edges.lock().unwrap().get(&id).cloned())
    }

    async fn save(&self, edges: &[Relationship]) -> Result<()> {
        let mut stored = self.edges.lock().unwrap();
        for edge in edges {
            stored.insert(edge.id, edge.clone());
        }
        *self.saves.lock().unwrap() += 1;
        Ok(())
    }
}
