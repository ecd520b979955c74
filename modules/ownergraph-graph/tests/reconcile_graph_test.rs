//! Reconciliation against a real Neo4j instance: edge persistence, conflict
//! round-trips, and the query surface.
//!
//! Requirements: Docker (for Neo4j via testcontainers)
//!
//! Run with: cargo test -p ownergraph-graph --features test-utils --test reconcile_graph_test

#![cfg(feature = "test-utils")]

use ownergraph_common::{EdgeState, OwnershipAssertion, RelationshipType};
use ownergraph_graph::{
    GraphClient, GraphWriter, OwnershipReader, OwnershipReconciler, ReconcilerPolicy,
};

async fn setup() -> (impl std::any::Any, GraphClient) {
    ownergraph_graph::testutil::neo4j_container().await
}

fn assertion(subject: &str, resource: &str, rel_type: RelationshipType, confidence: f64, source: &str) -> OwnershipAssertion {
    OwnershipAssertion {
        subject: subject.to_string(),
        resource: resource.to_string(),
        rel_type,
        confidence,
        source: source.to_string(),
    }
}

#[tokio::test]
async fn migrations_are_idempotent() {
    let (_container, client) = setup().await;
    ownergraph_graph::migrate::migrate(&client)
        .await
        .expect("second migration run failed");
}

#[tokio::test]
async fn merged_edge_round_trips_sources_and_confidence() {
    let (_container, client) = setup().await;
    let reconciler = OwnershipReconciler::new(GraphWriter::new(client.clone()), ReconcilerPolicy::default());
    let arn = "arn:aws:s3:::billing-exports";

    reconciler
        .reconcile(&assertion("team-billing", arn, RelationshipType::Owns, 0.8, "catalog"))
        .await
        .unwrap();
    let merged = reconciler
        .reconcile(&assertion("team-billing", arn, RelationshipType::Owns, 0.9, "codeowners"))
        .await
        .unwrap();

    let reader = OwnershipReader::new(client);
    let edge = reader
        .relationship(merged.action.edge_id())
        .await
        .unwrap()
        .expect("edge should exist");
    assert_eq!(edge.rel_type, RelationshipType::Owns);
    assert_eq!(edge.confidence, 0.9);
    assert_eq!(edge.sources, vec!["catalog".to_string(), "codeowners".to_string()]);
    assert_eq!(edge.state, EdgeState::Active);

    let owned = reader.by_owner("team-billing").await.unwrap();
    assert_eq!(owned.len(), 1);
}

#[tokio::test]
async fn conflict_and_resolution_persist() {
    let (_container, client) = setup().await;
    let reconciler = OwnershipReconciler::new(GraphWriter::new(client.clone()), ReconcilerPolicy::default());
    let arn = "arn:aws:rds:us-east-1:123:db:ledger";

    let a = reconciler
        .reconcile(&assertion("team-billing", arn, RelationshipType::Owns, 0.9, "catalog"))
        .await
        .unwrap();
    let b = reconciler
        .reconcile(&assertion("team-finance", arn, RelationshipType::Owns, 0.7, "tags"))
        .await
        .unwrap();
    assert_eq!(b.new_conflicts, vec![a.action.edge_id()]);

    let reader = OwnershipReader::new(client);
    let conflicts = reader.conflicts().await.unwrap();
    assert_eq!(conflicts.len(), 2);
    assert!(conflicts.iter().all(|e| e.conflicts_with().len() == 1));

    reconciler
        .resolve_conflict(b.action.edge_id(), a.action.edge_id())
        .await
        .unwrap();

    assert!(reader.conflicts().await.unwrap().is_empty());
    let loser = reader
        .relationship(b.action.edge_id())
        .await
        .unwrap()
        .expect("superseded edges are kept");
    assert_eq!(loser.state, EdgeState::Superseded { by: a.action.edge_id() });
    assert!(reader.by_owner("team-finance").await.unwrap().is_empty());

    let high = reader.by_min_confidence(0.8, 10).await.unwrap();
    assert_eq!(high.len(), 1);
    assert_eq!(high[0].subject, "team-billing");
}
