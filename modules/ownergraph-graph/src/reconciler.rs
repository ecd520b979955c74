//! Ownership reconciliation.
//!
//! Independent sources (CODEOWNERS, the service catalog, resource tags) each
//! assert edges between a subject and a resource. All edges of one resource
//! are reconciled together: an assertion either refreshes the edge its source
//! already owns, merges into an agreeing edge from another source, or creates
//! a new edge. A new or changed edge that contradicts a live edge from a
//! different source puts both into the conflicted state, reciprocally.
//!
//! Edges are never deleted. Resolution supersedes the losers and rejection
//! marks an edge rejected; both release the retired edge from its peers'
//! conflict sets.

use std::collections::BTreeSet;
use std::fmt;

use anyhow::Result;
use chrono::{DateTime, Utc};
use tracing::{info, warn};
use uuid::Uuid;

use ownergraph_common::{
    EdgeState, OwnerGraphError, OwnershipAssertion, PairState, Relationship, RelationshipType,
};

use crate::store::RelationshipStore;

/// Confidence divergence at or beyond which two same-type assertions for one
/// pair are treated as a conflict rather than merged.
pub const DEFAULT_CONFLICT_TOLERANCE: f64 = 0.2;

/// Confidence gaps within this of the tolerance count as reaching it.
const DIVERGENCE_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReconcilerPolicy {
    pub tolerance: f64,
}

impl Default for ReconcilerPolicy {
    fn default() -> Self {
        Self {
            tolerance: DEFAULT_CONFLICT_TOLERANCE,
        }
    }
}

impl ReconcilerPolicy {
    pub fn new(tolerance: f64) -> Result<Self, OwnerGraphError> {
        if !(0.0..=1.0).contains(&tolerance) {
            return Err(OwnerGraphError::Config(format!(
                "conflict tolerance {tolerance} must be within [0, 1]"
            )));
        }
        Ok(Self { tolerance })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileAction {
    /// First assertion of this (subject, resource, type) by any source.
    Created(Uuid),
    /// The asserting source already backs this edge.
    Refreshed(Uuid),
    /// Another source agreed within tolerance; sources joined.
    Merged(Uuid),
}

impl ReconcileAction {
    pub fn edge_id(&self) -> Uuid {
        match self {
            ReconcileAction::Created(id)
            | ReconcileAction::Refreshed(id)
            | ReconcileAction::Merged(id) => *id,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Reconciliation {
    pub action: ReconcileAction,
    /// Peers that entered a conflict with the asserted edge in this step.
    pub new_conflicts: Vec<Uuid>,
    /// Peers the asserted edge no longer contradicts after this step.
    pub cleared_conflicts: Vec<Uuid>,
    pub pair_state: PairState,
    /// Every edge whose stored form changed.
    pub changed: Vec<Relationship>,
}

// ---------------------------------------------------------------------------
// Pure state transitions over one resource's edges
// ---------------------------------------------------------------------------

/// Apply one assertion to the edges of its resource.
pub fn apply_assertion(
    edges: &mut Vec<Relationship>,
    assertion: &OwnershipAssertion,
    policy: &ReconcilerPolicy,
    now: DateTime<Utc>,
) -> Result<Reconciliation, OwnerGraphError> {
    assertion.validate()?;
    if let Some(stray) = edges.iter().find(|e| e.resource != assertion.resource) {
        return Err(OwnerGraphError::Validation(format!(
            "edge {} belongs to {}, not {}",
            stray.id, stray.resource, assertion.resource
        )));
    }

    let mut changed = BTreeSet::new();

    let (idx, action) = if let Some(idx) = edges
        .iter()
        .position(|e| same_pair_and_type(e, assertion) && e.has_source(&assertion.source))
    {
        let edge = &mut edges[idx];
        edge.confidence = if edge.sources.len() == 1 {
            assertion.confidence
        } else {
            edge.confidence.max(assertion.confidence)
        };
        edge.updated_at = now;
        (idx, ReconcileAction::Refreshed(edge.id))
    } else if let Some(idx) = closest_agreeing(edges, assertion, policy) {
        let edge = &mut edges[idx];
        edge.confidence = edge.confidence.max(assertion.confidence);
        edge.sources.push(assertion.source.clone());
        edge.updated_at = now;
        (idx, ReconcileAction::Merged(edge.id))
    } else {
        let edge = Relationship::from_assertion(assertion, now);
        let id = edge.id;
        edges.push(edge);
        (edges.len() - 1, ReconcileAction::Created(id))
    };
    changed.insert(edges[idx].id);

    let cleared_conflicts = release_settled(edges, idx, policy, now, &mut changed);
    let new_conflicts = detect_conflicts(edges, idx, policy, now, &mut changed);
    let pair_state = pair_state(edges, &assertion.subject, &assertion.resource);

    Ok(Reconciliation {
        action,
        new_conflicts,
        cleared_conflicts,
        pair_state,
        changed: collect_changed(edges, &changed),
    })
}

/// Resolve the conflict around `edge_id` in favour of `winner_id`.
///
/// The winner must be `edge_id` itself or one of its conflict peers. Every
/// edge the winner conflicts with is superseded by it.
pub fn resolve_conflict(
    edges: &mut [Relationship],
    edge_id: Uuid,
    winner_id: Uuid,
    now: DateTime<Utc>,
) -> Result<Vec<Relationship>, OwnerGraphError> {
    let edge_idx = position(edges, edge_id)?;
    let winner_idx = position(edges, winner_id)?;

    if edge_id != winner_id && !edges[edge_idx].conflicts_with().contains(&winner_id) {
        return Err(OwnerGraphError::Validation(format!(
            "edge {winner_id} is not in conflict with {edge_id}"
        )));
    }

    let losers = edges[winner_idx].conflicts_with().to_vec();
    if losers.is_empty() {
        return Err(OwnerGraphError::Validation(format!(
            "edge {winner_id} has no conflict to resolve"
        )));
    }

    let mut changed = BTreeSet::new();
    for loser in losers {
        let loser_idx = position(edges, loser)?;
        retire(
            edges,
            loser_idx,
            EdgeState::Superseded { by: winner_id },
            now,
            &mut changed,
        );
    }

    let winner = &mut edges[winner_idx];
    winner.state = EdgeState::Active;
    winner.updated_at = now;
    changed.insert(winner_id);

    Ok(collect_changed(edges, &changed))
}

/// Operator approval: a conflicted edge wins its conflict; an active edge is
/// left as is.
pub fn approve(
    edges: &mut [Relationship],
    edge_id: Uuid,
    now: DateTime<Utc>,
) -> Result<Vec<Relationship>, OwnerGraphError> {
    let idx = position(edges, edge_id)?;
    match edges[idx].state {
        EdgeState::Conflicted { .. } => resolve_conflict(edges, edge_id, edge_id, now),
        EdgeState::Active => Ok(Vec::new()),
        ref retired => Err(OwnerGraphError::Validation(format!(
            "edge {edge_id} is {} and cannot be approved",
            retired.as_str()
        ))),
    }
}

/// Operator rejection: the edge is retired and released from its peers.
pub fn reject(
    edges: &mut [Relationship],
    edge_id: Uuid,
    now: DateTime<Utc>,
) -> Result<Vec<Relationship>, OwnerGraphError> {
    let idx = position(edges, edge_id)?;
    if !edges[idx].is_live() {
        return Err(OwnerGraphError::Validation(format!(
            "edge {edge_id} is already {}",
            edges[idx].state.as_str()
        )));
    }
    let mut changed = BTreeSet::new();
    retire(edges, idx, EdgeState::Rejected, now, &mut changed);
    Ok(collect_changed(edges, &changed))
}

/// Derive the pair state from the live edges of (subject, resource).
pub fn pair_state(edges: &[Relationship], subject: &str, resource: &str) -> PairState {
    let pair: Vec<&Relationship> = edges
        .iter()
        .filter(|e| e.is_live() && e.subject == subject && e.resource == resource)
        .collect();

    if pair.is_empty() {
        return PairState::NoRelationship;
    }
    if pair.iter().any(|e| e.has_conflict()) {
        return PairState::MultiSourceConflicted;
    }
    let sources: BTreeSet<&str> = pair
        .iter()
        .flat_map(|e| e.sources.iter().map(String::as_str))
        .collect();
    if sources.len() > 1 {
        PairState::MultiSourceAgreeing
    } else {
        PairState::SingleSourceAsserted
    }
}

/// Whether two live edges from disjoint sources contradict each other.
///
/// Same subject: different types, or confidence apart by at least the
/// tolerance. Different subjects: both claim exclusive ownership.
fn contradicts(a: &Relationship, b: &Relationship, policy: &ReconcilerPolicy) -> bool {
    if a.subject == b.subject {
        a.rel_type != b.rel_type || diverges(a.confidence, b.confidence, policy)
    } else {
        a.rel_type == RelationshipType::Owns && b.rel_type == RelationshipType::Owns
    }
}

/// `|a - b| >= tolerance`, insensitive to rounding in the subtraction.
fn diverges(a: f64, b: f64, policy: &ReconcilerPolicy) -> bool {
    (a - b).abs() + DIVERGENCE_EPSILON >= policy.tolerance
}

/// Whether `other` should sit in `target`'s conflict set.
fn in_conflict(target: &Relationship, other: &Relationship, policy: &ReconcilerPolicy) -> bool {
    other.is_live()
        && !other.sources.iter().any(|s| target.has_source(s))
        && contradicts(target, other, policy)
}

fn same_pair_and_type(edge: &Relationship, assertion: &OwnershipAssertion) -> bool {
    edge.is_live() && edge.subject == assertion.subject && edge.rel_type == assertion.rel_type
}

fn closest_agreeing(
    edges: &[Relationship],
    assertion: &OwnershipAssertion,
    policy: &ReconcilerPolicy,
) -> Option<usize> {
    edges
        .iter()
        .enumerate()
        .filter(|(_, e)| same_pair_and_type(e, assertion) && !e.has_source(&assertion.source))
        .filter(|(_, e)| !diverges(e.confidence, assertion.confidence, policy))
        .map(|(i, e)| (i, (e.confidence - assertion.confidence).abs()))
        .min_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(i, _)| i)
}

/// Drop peers the changed edge no longer contradicts, on both sides.
fn release_settled(
    edges: &mut [Relationship],
    idx: usize,
    policy: &ReconcilerPolicy,
    now: DateTime<Utc>,
    changed: &mut BTreeSet<Uuid>,
) -> Vec<Uuid> {
    let target = edges[idx].clone();
    let settled: Vec<Uuid> = target
        .conflicts_with()
        .iter()
        .copied()
        .filter(|peer_id| {
            edges
                .iter()
                .find(|e| e.id == *peer_id)
                .map_or(true, |peer| !in_conflict(&target, peer, policy))
        })
        .collect();
    if settled.is_empty() {
        return settled;
    }

    for edge in edges.iter_mut() {
        let remaining = if edge.id == target.id {
            edge.conflicts_with()
                .iter()
                .copied()
                .filter(|id| !settled.contains(id))
                .collect()
        } else if settled.contains(&edge.id) && edge.conflicts_with().contains(&target.id) {
            edge.conflicts_with()
                .iter()
                .copied()
                .filter(|id| *id != target.id)
                .collect()
        } else {
            continue;
        };
        edge.state = EdgeState::conflicted(remaining);
        edge.updated_at = now;
        changed.insert(edge.id);
    }
    settled
}

fn detect_conflicts(
    edges: &mut [Relationship],
    idx: usize,
    policy: &ReconcilerPolicy,
    now: DateTime<Utc>,
    changed: &mut BTreeSet<Uuid>,
) -> Vec<Uuid> {
    let target = edges[idx].clone();
    let peers: Vec<usize> = edges
        .iter()
        .enumerate()
        .filter(|(i, other)| {
            *i != idx
                && !target.conflicts_with().contains(&other.id)
                && in_conflict(&target, other, policy)
        })
        .map(|(i, _)| i)
        .collect();

    let mut new_conflicts = Vec::with_capacity(peers.len());
    for peer_idx in peers {
        let peer_id = edges[peer_idx].id;
        add_peer(&mut edges[peer_idx], target.id, now);
        add_peer(&mut edges[idx], peer_id, now);
        changed.insert(peer_id);
        new_conflicts.push(peer_id);
    }
    new_conflicts
}

fn add_peer(edge: &mut Relationship, peer: Uuid, now: DateTime<Utc>) {
    let mut peers = edge.conflicts_with().to_vec();
    peers.push(peer);
    edge.state = EdgeState::conflicted(peers);
    edge.updated_at = now;
}

/// Move an edge out of the live set and drop it from every peer's conflict set.
fn retire(
    edges: &mut [Relationship],
    idx: usize,
    state: EdgeState,
    now: DateTime<Utc>,
    changed: &mut BTreeSet<Uuid>,
) {
    let retired_id = edges[idx].id;
    edges[idx].state = state;
    edges[idx].updated_at = now;
    changed.insert(retired_id);

    for edge in edges.iter_mut() {
        if edge.conflicts_with().contains(&retired_id) {
            let remaining = edge
                .conflicts_with()
                .iter()
                .copied()
                .filter(|id| *id != retired_id)
                .collect();
            edge.state = EdgeState::conflicted(remaining);
            edge.updated_at = now;
            changed.insert(edge.id);
        }
    }
}

fn position(edges: &[Relationship], id: Uuid) -> Result<usize, OwnerGraphError> {
    edges
        .iter()
        .position(|e| e.id == id)
        .ok_or_else(|| OwnerGraphError::NotFound(format!("relationship {id}")))
}

fn collect_changed(edges: &[Relationship], ids: &BTreeSet<Uuid>) -> Vec<Relationship> {
    edges.iter().filter(|e| ids.contains(&e.id)).cloned().collect()
}

// ---------------------------------------------------------------------------
// Store-backed driver
// ---------------------------------------------------------------------------

/// Counts from reconciling a batch of assertions.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReconcileStats {
    pub created: u32,
    pub merged: u32,
    pub refreshed: u32,
    pub conflicts: u32,
    pub failed: u32,
}

impl fmt::Display for ReconcileStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "\n=== Reconciliation Complete ===")?;
        writeln!(f, "Edges created:    {}", self.created)?;
        writeln!(f, "Edges merged:     {}", self.merged)?;
        writeln!(f, "Edges refreshed:  {}", self.refreshed)?;
        writeln!(f, "New conflicts:    {}", self.conflicts)?;
        writeln!(f, "Failed:           {}", self.failed)
    }
}

/// Result of a bulk operator action.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct BulkOutcome {
    pub updated: Vec<Uuid>,
    pub skipped: Vec<(Uuid, String)>,
}

pub struct OwnershipReconciler<S> {
    store: S,
    policy: ReconcilerPolicy,
}

impl<S: RelationshipStore> OwnershipReconciler<S> {
    pub fn new(store: S, policy: ReconcilerPolicy) -> Self {
        Self { store, policy }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Reconcile one assertion against the stored edges of its resource.
    pub async fn reconcile(&self, assertion: &OwnershipAssertion) -> Result<Reconciliation> {
        let mut edges = self.store.edges_for_resource(&assertion.resource).await?;
        let outcome = apply_assertion(&mut edges, assertion, &self.policy, Utc::now())?;
        self.store.save(&outcome.changed).await?;

        if !outcome.new_conflicts.is_empty() {
            warn!(
                resource = assertion.resource.as_str(),
                subject = assertion.subject.as_str(),
                source = assertion.source.as_str(),
                conflicts = outcome.new_conflicts.len(),
                "Ownership conflict detected"
            );
        }
        if !outcome.cleared_conflicts.is_empty() {
            info!(
                resource = assertion.resource.as_str(),
                source = assertion.source.as_str(),
                cleared = outcome.cleared_conflicts.len(),
                "Ownership conflict cleared by reassertion"
            );
        }
        Ok(outcome)
    }

    /// Reconcile a batch. One resource's edges are read-modify-written at a
    /// time, so assertions are applied serially; failures are counted, not
    /// propagated.
    pub async fn reconcile_all(&self, assertions: &[OwnershipAssertion]) -> ReconcileStats {
        let mut stats = ReconcileStats::default();
        for assertion in assertions {
            match self.reconcile(assertion).await {
                Ok(outcome) => {
                    match outcome.action {
                        ReconcileAction::Created(_) => stats.created += 1,
                        ReconcileAction::Merged(_) => stats.merged += 1,
                        ReconcileAction::Refreshed(_) => stats.refreshed += 1,
                    }
                    stats.conflicts += outcome.new_conflicts.len() as u32;
                }
                Err(e) => {
                    warn!(
                        resource = assertion.resource.as_str(),
                        source = assertion.source.as_str(),
                        error = %e,
                        "Failed to reconcile assertion"
                    );
                    stats.failed += 1;
                }
            }
        }
        info!(
            created = stats.created,
            merged = stats.merged,
            refreshed = stats.refreshed,
            conflicts = stats.conflicts,
            failed = stats.failed,
            "Reconciliation batch complete"
        );
        stats
    }

    /// Resolve the conflict around `edge_id` in favour of `winner_id`.
    pub async fn resolve_conflict(&self, edge_id: Uuid, winner_id: Uuid) -> Result<Vec<Relationship>> {
        let mut edges = self.resource_edges_of(edge_id).await?;
        let changed = resolve_conflict(&mut edges, edge_id, winner_id, Utc::now())?;
        self.store.save(&changed).await?;
        info!(%edge_id, %winner_id, superseded = changed.len() - 1, "Conflict resolved");
        Ok(changed)
    }

    pub async fn approve_relationships(&self, ids: &[Uuid]) -> BulkOutcome {
        self.bulk(ids, approve).await
    }

    pub async fn reject_relationships(&self, ids: &[Uuid]) -> BulkOutcome {
        self.bulk(ids, reject).await
    }

    async fn bulk(
        &self,
        ids: &[Uuid],
        transition: fn(
            &mut [Relationship],
            Uuid,
            DateTime<Utc>,
        ) -> Result<Vec<Relationship>, OwnerGraphError>,
    ) -> BulkOutcome {
        let mut outcome = BulkOutcome::default();
        for &id in ids {
            let result = async {
                let mut edges = self.resource_edges_of(id).await?;
                let changed = transition(&mut edges, id, Utc::now())?;
                self.store.save(&changed).await?;
                Ok::<_, anyhow::Error>(changed)
            }
            .await;

            match result {
                Ok(_) => outcome.updated.push(id),
                Err(e) => {
                    warn!(edge_id = %id, error = %e, "Bulk relationship update skipped");
                    outcome.skipped.push((id, e.to_string()));
                }
            }
        }
        outcome
    }

    async fn resource_edges_of(&self, edge_id: Uuid) -> Result<Vec<Relationship>> {
        let edge = self
            .store
            .edge(edge_id)
            .await?
            .ok_or_else(|| OwnerGraphError::NotFound(format!("relationship {edge_id}")))?;
        self.store.edges_for_resource(&edge.resource).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MemoryRelationshipStore;
    use ownergraph_common::ConfidenceLevel;

    const BUCKET: &str = "arn:aws:s3:::billing-exports";

    fn assert_edge(subject: &str, rel_type: RelationshipType, confidence: f64, source: &str) -> OwnershipAssertion {
        OwnershipAssertion {
            subject: subject.to_string(),
            resource: BUCKET.to_string(),
            rel_type,
            confidence,
            source: source.to_string(),
        }
    }

    fn apply(edges: &mut Vec<Relationship>, a: OwnershipAssertion) -> Reconciliation {
        apply_assertion(edges, &a, &ReconcilerPolicy::default(), Utc::now()).unwrap()
    }

    fn find(edges: &[Relationship], id: Uuid) -> &Relationship {
        edges.iter().find(|e| e.id == id).unwrap()
    }

    #[test]
    fn first_assertion_is_single_source() {
        let mut edges = Vec::new();
        let r = apply(&mut edges, assert_edge("team-billing", RelationshipType::Owns, 0.8, "catalog"));
        assert!(matches!(r.action, ReconcileAction::Created(_)));
        assert_eq!(r.pair_state, PairState::SingleSourceAsserted);
        assert_eq!(edges.len(), 1);
    }

    #[test]
    fn agreeing_sources_merge_with_max_confidence() {
        let mut edges = Vec::new();
        apply(&mut edges, assert_edge("team-billing", RelationshipType::Owns, 0.8, "catalog"));
        let r = apply(&mut edges, assert_edge("team-billing", RelationshipType::Owns, 0.9, "codeowners"));

        assert!(matches!(r.action, ReconcileAction::Merged(_)));
        assert_eq!(r.pair_state, PairState::MultiSourceAgreeing);
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].confidence, 0.9);
        assert_eq!(edges[0].source(), "catalog,codeowners");
        assert!(!edges[0].has_conflict());
    }

    #[test]
    fn divergent_confidence_conflicts_both_edges() {
        let mut edges = Vec::new();
        let a = apply(&mut edges, assert_edge("team-billing", RelationshipType::Owns, 0.9, "catalog"));
        let b = apply(&mut edges, assert_edge("team-billing", RelationshipType::Owns, 0.4, "tags"));

        let a_id = a.action.edge_id();
        let b_id = b.action.edge_id();
        assert_eq!(b.new_conflicts, vec![a_id]);
        assert_eq!(b.pair_state, PairState::MultiSourceConflicted);
        assert_eq!(find(&edges, a_id).conflicts_with(), &[b_id]);
        assert_eq!(find(&edges, b_id).conflicts_with(), &[a_id]);
        assert_eq!(find(&edges, a_id).confidence_level(), ConfidenceLevel::Disputed);
    }

    #[test]
    fn tolerance_boundary_conflicts_regardless_of_rounding() {
        // 0.7 - 0.5 and 0.9 - 0.7 round to either side of 0.2 in f64.
        for (first, second) in [(0.7, 0.5), (0.9, 0.7), (0.5, 0.7)] {
            let mut edges = Vec::new();
            apply(&mut edges, assert_edge("team-billing", RelationshipType::Owns, first, "catalog"));
            let r = apply(&mut edges, assert_edge("team-billing", RelationshipType::Owns, second, "tags"));
            assert!(matches!(r.action, ReconcileAction::Created(_)), "{first} vs {second}");
            assert_eq!(r.new_conflicts.len(), 1, "{first} vs {second}");
            assert_eq!(edges.len(), 2);
        }

        let mut edges = Vec::new();
        apply(&mut edges, assert_edge("team-billing", RelationshipType::Owns, 0.7, "catalog"));
        let r = apply(&mut edges, assert_edge("team-billing", RelationshipType::Owns, 0.51, "tags"));
        assert!(matches!(r.action, ReconcileAction::Merged(_)));
    }

    #[test]
    fn reassertion_within_tolerance_clears_conflict() {
        let mut edges = Vec::new();
        let a = apply(&mut edges, assert_edge("team-billing", RelationshipType::Owns, 0.9, "catalog"));
        let b = apply(&mut edges, assert_edge("team-billing", RelationshipType::Owns, 0.4, "tags"));
        let (a_id, b_id) = (a.action.edge_id(), b.action.edge_id());
        assert_eq!(b.new_conflicts, vec![a_id]);

        let r = apply(&mut edges, assert_edge("team-billing", RelationshipType::Owns, 0.85, "tags"));
        assert_eq!(r.action, ReconcileAction::Refreshed(b_id));
        assert_eq!(r.cleared_conflicts, vec![a_id]);
        assert!(r.new_conflicts.is_empty());
        assert_eq!(r.pair_state, PairState::MultiSourceAgreeing);
        assert_eq!(r.changed.len(), 2);

        for id in [a_id, b_id] {
            let edge = find(&edges, id);
            assert_eq!(edge.state, EdgeState::Active);
            assert_ne!(edge.confidence_level(), ConfidenceLevel::Disputed);
        }
    }

    #[test]
    fn reassertion_keeps_conflicts_that_still_hold() {
        let mut edges = Vec::new();
        let a = apply(&mut edges, assert_edge("team-billing", RelationshipType::Owns, 0.9, "catalog"));
        let b = apply(&mut edges, assert_edge("team-billing", RelationshipType::Owns, 0.4, "tags"));
        let c = apply(&mut edges, assert_edge("team-finance", RelationshipType::Owns, 0.8, "codeowners"));
        let (a_id, b_id, c_id) = (a.action.edge_id(), b.action.edge_id(), c.action.edge_id());
        assert_eq!(find(&edges, b_id).conflicts_with().len(), 2);

        let r = apply(&mut edges, assert_edge("team-billing", RelationshipType::Owns, 0.85, "tags"));
        assert_eq!(r.cleared_conflicts, vec![a_id]);
        assert_eq!(find(&edges, b_id).conflicts_with(), &[c_id]);
        assert_eq!(find(&edges, a_id).conflicts_with(), &[c_id]);
        assert_eq!(find(&edges, c_id).conflicts_with().len(), 2);
    }

    #[test]
    fn contradicting_type_conflicts() {
        let mut edges = Vec::new();
        apply(&mut edges, assert_edge("team-billing", RelationshipType::Owns, 0.8, "catalog"));
        let r = apply(&mut edges, assert_edge("team-billing", RelationshipType::Monitors, 0.8, "codeowners"));
        assert_eq!(r.new_conflicts.len(), 1);
        assert!(edges.iter().all(|e| e.has_conflict()));
    }

    #[test]
    fn rival_owners_from_different_sources_conflict() {
        let mut edges = Vec::new();
        apply(&mut edges, assert_edge("team-billing", RelationshipType::Owns, 0.8, "catalog"));
        let r = apply(&mut edges, assert_edge("team-finance", RelationshipType::Owns, 0.8, "codeowners"));
        assert_eq!(r.new_conflicts.len(), 1);

        // A second subject merely monitoring is not a contradiction.
        let r = apply(&mut edges, assert_edge("team-sre", RelationshipType::Monitors, 0.6, "tags"));
        assert!(r.new_conflicts.is_empty());
        assert_eq!(r.pair_state, PairState::SingleSourceAsserted);
    }

    #[test]
    fn same_source_reassertion_refreshes_in_place() {
        let mut edges = Vec::new();
        apply(&mut edges, assert_edge("team-billing", RelationshipType::Owns, 0.6, "catalog"));
        let r = apply(&mut edges, assert_edge("team-billing", RelationshipType::Owns, 0.75, "catalog"));
        assert!(matches!(r.action, ReconcileAction::Refreshed(_)));
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].confidence, 0.75);
        assert_eq!(edges[0].sources, vec!["catalog".to_string()]);
    }

    #[test]
    fn resolution_leaves_exactly_one_unconflicted_edge() {
        let mut edges = Vec::new();
        let a = apply(&mut edges, assert_edge("team-billing", RelationshipType::Owns, 0.9, "catalog"));
        let b = apply(&mut edges, assert_edge("team-billing", RelationshipType::Owns, 0.3, "tags"));
        let (a_id, b_id) = (a.action.edge_id(), b.action.edge_id());

        let changed = resolve_conflict(&mut edges, b_id, a_id, Utc::now()).unwrap();
        assert_eq!(changed.len(), 2);

        let live: Vec<_> = edges.iter().filter(|e| e.is_live()).collect();
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].id, a_id);
        assert!(!live[0].has_conflict());
        assert_eq!(find(&edges, b_id).state, EdgeState::Superseded { by: a_id });
    }

    #[test]
    fn resolution_releases_loser_from_third_parties() {
        let mut edges = Vec::new();
        let a = apply(&mut edges, assert_edge("team-billing", RelationshipType::Owns, 0.9, "catalog"));
        let b = apply(&mut edges, assert_edge("team-finance", RelationshipType::Owns, 0.9, "codeowners"));
        let c = apply(&mut edges, assert_edge("team-data", RelationshipType::Owns, 0.9, "tags"));
        let (a_id, b_id, c_id) = (a.action.edge_id(), b.action.edge_id(), c.action.edge_id());

        // Three-way ownership dispute; every edge conflicts with the other two.
        assert_eq!(find(&edges, c_id).conflicts_with().len(), 2);

        resolve_conflict(&mut edges, a_id, a_id, Utc::now()).unwrap();
        assert_eq!(find(&edges, a_id).state, EdgeState::Active);
        assert_eq!(find(&edges, b_id).state, EdgeState::Superseded { by: a_id });
        assert_eq!(find(&edges, c_id).state, EdgeState::Superseded { by: a_id });
    }

    #[test]
    fn resolve_rejects_unrelated_winner() {
        let mut edges = Vec::new();
        let a = apply(&mut edges, assert_edge("team-billing", RelationshipType::Owns, 0.9, "catalog"));
        apply(&mut edges, assert_edge("team-billing", RelationshipType::Owns, 0.3, "tags"));
        let other = apply(&mut edges, assert_edge("team-sre", RelationshipType::Monitors, 0.5, "catalog"));

        let err = resolve_conflict(&mut edges, a.action.edge_id(), other.action.edge_id(), Utc::now())
            .unwrap_err();
        assert!(matches!(err, OwnerGraphError::Validation(_)));
    }

    #[test]
    fn reject_returns_peer_to_active() {
        let mut edges = Vec::new();
        let a = apply(&mut edges, assert_edge("team-billing", RelationshipType::Owns, 0.9, "catalog"));
        let b = apply(&mut edges, assert_edge("team-billing", RelationshipType::Owns, 0.3, "tags"));

        reject(&mut edges, b.action.edge_id(), Utc::now()).unwrap();
        assert_eq!(find(&edges, b.action.edge_id()).state, EdgeState::Rejected);
        assert_eq!(find(&edges, a.action.edge_id()).state, EdgeState::Active);

        // Retired edges stay retired.
        assert!(reject(&mut edges, b.action.edge_id(), Utc::now()).is_err());
        assert!(approve(&mut edges, b.action.edge_id(), Utc::now()).is_err());
    }

    #[test]
    fn retired_edges_do_not_reconflict() {
        let mut edges = Vec::new();
        let a = apply(&mut edges, assert_edge("team-billing", RelationshipType::Owns, 0.9, "catalog"));
        let b = apply(&mut edges, assert_edge("team-billing", RelationshipType::Owns, 0.3, "tags"));
        resolve_conflict(&mut edges, a.action.edge_id(), a.action.edge_id(), Utc::now()).unwrap();

        // The superseded tag edge no longer participates; a fresh tag
        // assertion creates a new edge that conflicts with the winner only.
        let c = apply(&mut edges, assert_edge("team-billing", RelationshipType::Owns, 0.2, "tags"));
        assert_eq!(c.new_conflicts, vec![a.action.edge_id()]);
        assert!(!find(&edges, b.action.edge_id()).is_live());
    }

    #[test]
    fn mismatched_resource_is_rejected() {
        let mut edges = Vec::new();
        apply(&mut edges, assert_edge("team-billing", RelationshipType::Owns, 0.9, "catalog"));
        let mut stray = assert_edge("team-billing", RelationshipType::Owns, 0.9, "tags");
        stray.resource = "arn:aws:s3:::other".into();
        assert!(apply_assertion(&mut edges, &stray, &ReconcilerPolicy::default(), Utc::now()).is_err());
    }

    #[test]
    fn policy_rejects_out_of_range_tolerance() {
        assert!(ReconcilerPolicy::new(-0.1).is_err());
        assert!(ReconcilerPolicy::new(1.5).is_err());
        assert_eq!(ReconcilerPolicy::new(0.1).unwrap().tolerance, 0.1);
    }

    #[tokio::test]
    async fn driver_persists_conflicts_and_resolution() {
        let reconciler =
            OwnershipReconciler::new(MemoryRelationshipStore::new(), ReconcilerPolicy::default());

        let a = reconciler
            .reconcile(&assert_edge("team-billing", RelationshipType::Owns, 0.95, "codeowners"))
            .await
            .unwrap();
        let b = reconciler
            .reconcile(&assert_edge("team-billing", RelationshipType::Maintains, 0.95, "catalog"))
            .await
            .unwrap();
        let (a_id, b_id) = (a.action.edge_id(), b.action.edge_id());

        let stored = reconciler.store().edge(a_id).await.unwrap().unwrap();
        assert_eq!(stored.conflicts_with(), &[b_id]);

        reconciler.resolve_conflict(a_id, b_id).await.unwrap();
        let winner = reconciler.store().edge(b_id).await.unwrap().unwrap();
        let loser = reconciler.store().edge(a_id).await.unwrap().unwrap();
        assert_eq!(winner.state, EdgeState::Active);
        assert_eq!(loser.state, EdgeState::Superseded { by: b_id });
    }

    #[tokio::test]
    async fn bulk_approve_reports_skips() {
        let reconciler =
            OwnershipReconciler::new(MemoryRelationshipStore::new(), ReconcilerPolicy::default());
        let a = reconciler
            .reconcile(&assert_edge("team-billing", RelationshipType::Owns, 0.9, "catalog"))
            .await
            .unwrap();
        reconciler
            .reconcile(&assert_edge("team-finance", RelationshipType::Owns, 0.9, "codeowners"))
            .await
            .unwrap();

        let missing = Uuid::new_v4();
        let outcome = reconciler
            .approve_relationships(&[a.action.edge_id(), missing])
            .await;
        assert_eq!(outcome.updated, vec![a.action.edge_id()]);
        assert_eq!(outcome.skipped.len(), 1);
        assert_eq!(outcome.skipped[0].0, missing);

        let conflicted = reconciler.store().conflicted().await;
        assert!(conflicted.is_empty());
    }

    #[tokio::test]
    async fn reconcile_all_counts_failures_without_aborting() {
        let reconciler =
            OwnershipReconciler::new(MemoryRelationshipStore::new(), ReconcilerPolicy::default());
        let batch = vec![
            assert_edge("team-billing", RelationshipType::Owns, 0.8, "catalog"),
            assert_edge("team-billing", RelationshipType::Owns, 1.4, "tags"),
            assert_edge("team-billing", RelationshipType::Owns, 0.85, "codeowners"),
        ];
        let stats = reconciler.reconcile_all(&batch).await;
        assert_eq!(stats.created, 1);
        assert_eq!(stats.merged, 1);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.conflicts, 0);
    }
}
