use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::OwnerGraphError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RelationshipType {
    Owns,
    Maintains,
    ContributesTo,
    Manages,
    Deploys,
    Monitors,
}

impl RelationshipType {
    pub const ALL: [RelationshipType; 6] = [
        RelationshipType::Owns,
        RelationshipType::Maintains,
        RelationshipType::ContributesTo,
        RelationshipType::Manages,
        RelationshipType::Deploys,
        RelationshipType::Monitors,
    ];

    /// Neo4j relationship type label.
    pub fn as_str(&self) -> &'static str {
        match self {
            RelationshipType::Owns => "OWNS",
            RelationshipType::Maintains => "MAINTAINS",
            RelationshipType::ContributesTo => "CONTRIBUTES_TO",
            RelationshipType::Manages => "MANAGES",
            RelationshipType::Deploys => "DEPLOYS",
            RelationshipType::Monitors => "MONITORS",
        }
    }
}

impl std::fmt::Display for RelationshipType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RelationshipType {
    type Err = OwnerGraphError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RelationshipType::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| OwnerGraphError::Validation(format!("unknown relationship type '{s}'")))
    }
}

/// Display/query bucket derived from confidence and conflict state. Never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConfidenceLevel {
    VeryHigh,
    High,
    Medium,
    Low,
    VeryLow,
    Disputed,
}

impl ConfidenceLevel {
    pub fn from_score(confidence: f64, disputed: bool) -> Self {
        if disputed {
            ConfidenceLevel::Disputed
        } else if confidence >= 0.9 {
            ConfidenceLevel::VeryHigh
        } else if confidence >= 0.8 {
            ConfidenceLevel::High
        } else if confidence >= 0.6 {
            ConfidenceLevel::Medium
        } else if confidence >= 0.4 {
            ConfidenceLevel::Low
        } else {
            ConfidenceLevel::VeryLow
        }
    }
}

/// Lifecycle of a single edge. Edges are never deleted; losers are superseded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum EdgeState {
    Active,
    /// Always holds at least one peer; build with [`EdgeState::conflicted`].
    Conflicted { conflicts_with: Vec<Uuid> },
    Superseded { by: Uuid },
    Rejected,
}

impl EdgeState {
    /// Conflicted with the given peers, or Active when there are none.
    pub fn conflicted(mut peers: Vec<Uuid>) -> Self {
        peers.sort();
        peers.dedup();
        if peers.is_empty() {
            EdgeState::Active
        } else {
            EdgeState::Conflicted {
                conflicts_with: peers,
            }
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EdgeState::Active => "active",
            EdgeState::Conflicted { .. } => "conflicted",
            EdgeState::Superseded { .. } => "superseded",
            EdgeState::Rejected => "rejected",
        }
    }
}

/// An ownership edge between a subject (user/team) and a resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relationship {
    pub id: Uuid,
    pub subject: String,
    pub resource: String,
    pub rel_type: RelationshipType,
    pub confidence: f64,
    /// Sources that asserted this edge, in assertion order.
    pub sources: Vec<String>,
    pub state: EdgeState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Relationship {
    pub fn from_assertion(assertion: &OwnershipAssertion, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            subject: assertion.subject.clone(),
            resource: assertion.resource.clone(),
            rel_type: assertion.rel_type,
            confidence: assertion.confidence,
            sources: vec![assertion.source.clone()],
            state: EdgeState::Active,
            created_at: now,
            updated_at: now,
        }
    }

    /// Joined source list, e.g. `"codeowners,catalog"`.
    pub fn source(&self) -> String {
        self.sources.join(",")
    }

    pub fn has_source(&self, source: &str) -> bool {
        self.sources.iter().any(|s| s == source)
    }

    pub fn has_conflict(&self) -> bool {
        matches!(self.state, EdgeState::Conflicted { .. })
    }

    pub fn conflicts_with(&self) -> &[Uuid] {
        match &self.state {
            EdgeState::Conflicted { conflicts_with } => conflicts_with,
            _ => &[],
        }
    }

    /// Active or conflicted edges still participate in reconciliation.
    pub fn is_live(&self) -> bool {
        matches!(self.state, EdgeState::Active | EdgeState::Conflicted { .. })
    }

    pub fn confidence_level(&self) -> ConfidenceLevel {
        ConfidenceLevel::from_score(self.confidence, self.has_conflict())
    }
}

/// A source adapter's claim about one (subject, resource) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OwnershipAssertion {
    pub subject: String,
    pub resource: String,
    pub rel_type: RelationshipType,
    pub confidence: f64,
    pub source: String,
}

impl OwnershipAssertion {
    pub fn validate(&self) -> Result<(), OwnerGraphError> {
        if self.subject.trim().is_empty() || self.resource.trim().is_empty() {
            return Err(OwnerGraphError::Validation(
                "assertion needs a subject and a resource".to_string(),
            ));
        }
        if self.source.trim().is_empty() {
            return Err(OwnerGraphError::Validation(format!(
                "assertion for {} has no source",
                self.resource
            )));
        }
        if !(0.0..=1.0).contains(&self.confidence) {
            return Err(OwnerGraphError::Validation(format!(
                "confidence {} for {} is outside [0, 1]",
                self.confidence, self.resource
            )));
        }
        Ok(())
    }
}

/// Reconciliation state of one (subject, resource) pair across sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PairState {
    NoRelationship,
    SingleSourceAsserted,
    MultiSourceAgreeing,
    MultiSourceConflicted,
}
