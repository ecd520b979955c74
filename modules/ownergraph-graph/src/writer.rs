use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use neo4rs::query;
use tracing::{debug, warn};
use uuid::Uuid;

use ownergraph_common::{EdgeState, Relationship, RelationshipType};

use crate::store::RelationshipStore;
use crate::GraphClient;

/// Columns every ownership read returns, for [`row_to_relationship`].
pub(crate) const EDGE_COLUMNS: &str = "s.name AS subject, r.arn AS resource, type(e) AS rel_type,
         e.id AS id, e.confidence AS confidence, e.sources AS sources,
         e.state AS state, e.conflicts_with AS conflicts_with,
         e.superseded_by AS superseded_by,
         e.created_at AS created_at, e.updated_at AS updated_at";

/// Write-side wrapper for the ownership graph. Used by the reconciler only.
pub struct GraphWriter {
    client: GraphClient,
}

impl GraphWriter {
    pub fn new(client: GraphClient) -> Self {
        Self { client }
    }

    /// Upsert one edge, creating its endpoint nodes on first sight.
    pub async fn upsert_edge(&self, edge: &Relationship) -> Result<(), neo4rs::Error> {
        // Relationship types cannot be parameterised; the label comes from a closed enum.
        let cypher = format!(
            "MERGE (s:Subject {{name: $subject}})
             MERGE (r:Resource {{arn: $resource}})
             MERGE (s)-[e:{rel} {{id: $id}}]->(r)
             ON CREATE SET e.created_at = datetime($created_at)
             SET e.confidence = $confidence,
                 e.sources = $sources,
                 e.state = $state,
                 e.conflicts_with = $conflicts_with,
                 e.superseded_by = $superseded_by,
                 e.updated_at = datetime($updated_at)",
            rel = edge.rel_type.as_str()
        );

        let superseded_by = match edge.state {
            EdgeState::Superseded { by } => by.to_string(),
            _ => String::new(),
        };
        let conflicts_with: Vec<String> = edge
            .conflicts_with()
            .iter()
            .map(|id| id.to_string())
            .collect();

        let q = query(&cypher)
            .param("subject", edge.subject.as_str())
            .param("resource", edge.resource.as_str())
            .param("id", edge.id.to_string())
            .param("confidence", edge.confidence)
            .param("sources", edge.sources.clone())
            .param("state", edge.state.as_str())
            .param("conflicts_with", conflicts_with)
            .param("superseded_by", superseded_by)
            .param("created_at", format_datetime(&edge.created_at))
            .param("updated_at", format_datetime(&edge.updated_at));

        self.client.graph.run(q).await?;
        debug!(id = %edge.id, state = edge.state.as_str(), "Upserted ownership edge");
        Ok(())
    }

    pub async fn edges_for_resource(&self, arn: &str) -> Result<Vec<Relationship>, neo4rs::Error> {
        let cypher = format!(
            "MATCH (s:Subject)-[e]->(r:Resource {{arn: $arn}})
             RETURN {EDGE_COLUMNS}
             ORDER BY e.created_at"
        );
        let mut stream = self.client.graph.execute(query(&cypher).param("arn", arn)).await?;

        let mut edges = Vec::new();
        while let Some(row) = stream.next().await? {
            if let Some(edge) = row_to_relationship(&row) {
                edges.push(edge);
            }
        }
        Ok(edges)
    }

    pub async fn edge_by_id(&self, id: Uuid) -> Result<Option<Relationship>, neo4rs::Error> {
        let cypher = format!(
            "MATCH (s:Subject)-[e {{id: $id}}]->(r:Resource)
             RETURN {EDGE_COLUMNS}
             LIMIT 1"
        );
        let mut stream = self
            .client
            .graph
            .execute(query(&cypher).param("id", id.to_string()))
            .await?;

        match stream.next().await? {
            Some(row) => Ok(row_to_relationship(&row)),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl RelationshipStore for GraphWriter {
    async fn edges_for_resource(&self, resource: &str) -> Result<Vec<Relationship>> {
        Ok(GraphWriter::edges_for_resource(self, resource).await?)
    }

    async fn edge(&self, id: Uuid) -> Result<Option<Relationship>> {
        Ok(self.edge_by_id(id).await?)
    }

    async fn save(&self, edges: &[Relationship]) -> Result<()> {
        for edge in edges {
            self.upsert_edge(edge).await?;
        }
        Ok(())
    }
}

/// Rebuild a relationship from a row projected with [`EDGE_COLUMNS`].
/// Rows with an unknown type or a malformed id are skipped.
pub(crate) fn row_to_relationship(row: &neo4rs::Row) -> Option<Relationship> {
    let id_str: String = row.get("id").unwrap_or_default();
    let id = match Uuid::parse_str(&id_str) {
        Ok(id) => id,
        Err(_) => {
            warn!(id = id_str.as_str(), "Skipping ownership edge with malformed id");
            return None;
        }
    };

    let rel_type: String = row.get("rel_type").unwrap_or_default();
    let rel_type: RelationshipType = match rel_type.parse() {
        Ok(t) => t,
        Err(_) => {
            debug!(rel_type = rel_type.as_str(), "Ignoring non-ownership edge");
            return None;
        }
    };

    let state_str: String = row.get("state").unwrap_or_default();
    let conflicts_with: Vec<Uuid> = row
        .get::<Vec<String>>("conflicts_with")
        .unwrap_or_default()
        .iter()
        .filter_map(|s| Uuid::parse_str(s).ok())
        .collect();
    let superseded_by: String = row.get("superseded_by").unwrap_or_default();

    let state = match state_str.as_str() {
        "conflicted" => EdgeState::conflicted(conflicts_with),
        "superseded" => match Uuid::parse_str(&superseded_by) {
            Ok(by) => EdgeState::Superseded { by },
            Err(_) => {
                warn!(%id, "Superseded edge without a winner; treating as rejected");
                EdgeState::Rejected
            }
        },
        "rejected" => EdgeState::Rejected,
        _ => EdgeState::Active,
    };

    let now = Utc::now();
    let created_at = row_datetime_opt(row, "created_at").unwrap_or(now);
    let updated_at = row_datetime_opt(row, "updated_at").unwrap_or(created_at);

    Some(Relationship {
        id,
        subject: row.get("subject").unwrap_or_default(),
        resource: row.get("resource").unwrap_or_default(),
        rel_type,
        confidence: row.get("confidence").unwrap_or(0.0),
        sources: row.get("sources").unwrap_or_default(),
        state,
        created_at,
        updated_at,
    })
}

/// Format a DateTime<Utc> for Cypher `datetime()`.
pub(crate) fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.format("%Y-%m-%dT%H:%M:%S%.6f").to_string()
}

fn parse_datetime_opt(s: &str) -> Option<DateTime<Utc>> {
    if s.is_empty() {
        return None;
    }
    chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|ndt| ndt.and_utc())
        .ok()
}

/// Read an optional datetime from a row, accepting Neo4j DateTime,
/// LocalDateTime, or a plain string.
pub(crate) fn row_datetime_opt(row: &neo4rs::Row, key: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = row.get::<chrono::DateTime<chrono::FixedOffset>>(key) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(ndt) = row.get::<chrono::NaiveDateTime>(key) {
        return Some(ndt.and_utc());
    }
    row.get::<String>(key).ok().and_then(|s| parse_datetime_opt(&s))
}
