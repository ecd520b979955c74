use neo4rs::query;
use uuid::Uuid;

use ownergraph_common::{ConfidenceLevel, Relationship};

use crate::writer::{row_to_relationship, EDGE_COLUMNS};
use crate::GraphClient;

/// Read-only query surface over the ownership graph.
///
/// Listings return live edges only (active or conflicted). Superseded and
/// rejected edges are still reachable by id.
pub struct OwnershipReader {
    client: GraphClient,
}

impl OwnershipReader {
    pub fn new(client: GraphClient) -> Self {
        Self { client }
    }

    /// Live edges at or above `min_confidence`, highest first.
    pub async fn by_min_confidence(
        &self,
        min_confidence: f64,
        limit: u32,
    ) -> Result<Vec<Relationship>, neo4rs::Error> {
        let cypher = format!(
            "MATCH (s:Subject)-[e]->(r:Resource)
             WHERE e.state IN ['active', 'conflicted'] AND e.confidence >= $min
             RETURN {EDGE_COLUMNS}
             ORDER BY e.confidence DESC, r.arn
             LIMIT $limit"
        );
        let q = query(&cypher)
            .param("min", min_confidence)
            .param("limit", limit as i64);
        self.collect(q).await
    }

    /// Live edges bucketed at `level`. Buckets are derived, so this filters
    /// client-side after a coarse confidence cut.
    pub async fn by_confidence_level(
        &self,
        level: ConfidenceLevel,
        limit: u32,
    ) -> Result<Vec<Relationship>, neo4rs::Error> {
        let floor = match level {
            ConfidenceLevel::VeryHigh => 0.9,
            ConfidenceLevel::High => 0.8,
            ConfidenceLevel::Medium => 0.6,
            ConfidenceLevel::Low => 0.4,
            ConfidenceLevel::VeryLow | ConfidenceLevel::Disputed => 0.0,
        };
        let edges = self.by_min_confidence(floor, u32::MAX).await?;
        Ok(edges
            .into_iter()
            .filter(|e| e.confidence_level() == level)
            .take(limit as usize)
            .collect())
    }

    /// Everything a subject has a live edge to.
    pub async fn by_owner(&self, subject: &str) -> Result<Vec<Relationship>, neo4rs::Error> {
        let cypher = format!(
            "MATCH (s:Subject {{name: $subject}})-[e]->(r:Resource)
             WHERE e.state IN ['active', 'conflicted']
             RETURN {EDGE_COLUMNS}
             ORDER BY r.arn"
        );
        self.collect(query(&cypher).param("subject", subject)).await
    }

    /// All disputed edges, grouped by resource.
    pub async fn conflicts(&self) -> Result<Vec<Relationship>, neo4rs::Error> {
        let cypher = format!(
            "MATCH (s:Subject)-[e {{state: 'conflicted'}}]->(r:Resource)
             RETURN {EDGE_COLUMNS}
             ORDER BY r.arn, e.created_at"
        );
        self.collect(query(&cypher)).await
    }

    pub async fn relationship(&self, id: Uuid) -> Result<Option<Relationship>, neo4rs::Error> {
        let cypher = format!(
            "MATCH (s:Subject)-[e {{id: $id}}]->(r:Resource)
             RETURN {EDGE_COLUMNS}
             LIMIT 1"
        );
        Ok(self
            .collect(query(&cypher).param("id", id.to_string()))
            .await?
            .into_iter()
            .next())
    }

    async fn collect(&self, q: neo4rs::Query) -> Result<Vec<Relationship>, neo4rs::Error> {
        let mut stream = self.client.graph.execute(q).await?;
        let mut edges = Vec::new();
        while let Some(row) = stream.next().await? {
            if let Some(edge) = row_to_relationship(&row) {
                edges.push(edge);
            }
        }
        Ok(edges)
    }
}
