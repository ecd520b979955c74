use neo4rs::query;
use tracing::info;

use crate::GraphClient;

/// Run idempotent schema migrations: constraints and indexes for the
/// ownership graph.
pub async fn migrate(client: &GraphClient) -> Result<(), neo4rs::Error> {
    let g = &client.graph;

    info!("Running schema migrations...");

    let constraints = [
        "CREATE CONSTRAINT subject_name IF NOT EXISTS FOR (s:Subject) REQUIRE s.name IS UNIQUE",
        "CREATE CONSTRAINT resource_arn IF NOT EXISTS FOR (r:Resource) REQUIRE r.arn IS UNIQUE",
    ];
    for c in &constraints {
        g.run(query(c)).await?;
    }
    info!("Uniqueness constraints created");

    // Relationship property indexes are per type.
    for rel_type in ownergraph_common::RelationshipType::ALL {
        let label = rel_type.as_str();
        let lower = label.to_lowercase();
        let indexes = [
            format!("CREATE INDEX {lower}_id IF NOT EXISTS FOR ()-[e:{label}]-() ON (e.id)"),
            format!("CREATE INDEX {lower}_state IF NOT EXISTS FOR ()-[e:{label}]-() ON (e.state)"),
            format!(
                "CREATE INDEX {lower}_confidence IF NOT EXISTS FOR ()-[e:{label}]-() ON (e.confidence)"
            ),
        ];
        for idx in &indexes {
            g.run(query(idx)).await?;
        }
    }
    info!("Relationship property indexes created");

    info!("Schema migrations complete");
    Ok(())
}
