//! Tag-derived ownership: turns owner tags on discovered resources into
//! assertions for the reconciler.

use std::collections::BTreeSet;

use ownergraph_common::{OwnershipAssertion, RelationshipType, ResourceRecord};

pub const TAG_SOURCE: &str = "tags";

/// Relationship type and confidence implied by an owner tag key.
fn mapping(key: &str) -> Option<(RelationshipType, f64)> {
    match key.to_ascii_lowercase().as_str() {
        "team" | "owner" => Some((RelationshipType::Owns, 0.7)),
        "maintainer" => Some((RelationshipType::Maintains, 0.6)),
        "oncall" => Some((RelationshipType::Monitors, 0.5)),
        "deployer" => Some((RelationshipType::Deploys, 0.5)),
        _ => None,
    }
}

/// Build assertions from resource tags.
///
/// Keys are matched with or without `prefix`, so both full-detail records
/// and prefix-stripped projections work. Duplicate (subject, resource, type)
/// triples collapse to one assertion.
pub fn assertions_from_records(records: &[ResourceRecord], prefix: &str) -> Vec<OwnershipAssertion> {
    let mut seen = BTreeSet::new();
    let mut assertions = Vec::new();

    for record in records {
        for (key, value) in &record.tags {
            let key = key.strip_prefix(prefix).unwrap_or(key).trim();
            let Some((rel_type, confidence)) = mapping(key) else {
                continue;
            };
            let subject = value.trim();
            if subject.is_empty() || record.arn.trim().is_empty() {
                continue;
            }
            if !seen.insert((subject.to_string(), record.arn.clone(), rel_type.as_str())) {
                continue;
            }
            assertions.push(OwnershipAssertion {
                subject: subject.to_string(),
                resource: record.arn.clone(),
                rel_type,
                confidence,
                source: TAG_SOURCE.to_string(),
            });
        }
    }
    assertions
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn record(arn: &str, tags: &[(&str, &str)]) -> ResourceRecord {
        ResourceRecord {
            arn: arn.to_string(),
            region: "us-east-1".to_string(),
            tags: tags
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<BTreeMap<_, _>>(),
            category: "s3_buckets".to_string(),
        }
    }

    #[test]
    fn maps_owner_tags_to_relationships() {
        let records = vec![record(
            "arn:aws:s3:::logs",
            &[("team", "platform"), ("oncall", "sre"), ("env", "prod")],
        )];
        let assertions = assertions_from_records(&records, "ownership:");
        assert_eq!(assertions.len(), 2);

        let owns = assertions.iter().find(|a| a.rel_type == RelationshipType::Owns).unwrap();
        assert_eq!(owns.subject, "platform");
        assert_eq!(owns.confidence, 0.7);
        assert_eq!(owns.source, TAG_SOURCE);

        let monitors = assertions.iter().find(|a| a.rel_type == RelationshipType::Monitors).unwrap();
        assert_eq!(monitors.subject, "sre");
    }

    #[test]
    fn accepts_prefixed_keys_from_full_detail_records() {
        let records = vec![record("arn:aws:lambda:fn", &[("ownership:maintainer", "alice")])];
        let assertions = assertions_from_records(&records, "ownership:");
        assert_eq!(assertions.len(), 1);
        assert_eq!(assertions[0].rel_type, RelationshipType::Maintains);
    }

    #[test]
    fn duplicate_claims_collapse() {
        let records = vec![
            record("arn:aws:s3:::logs", &[("team", "platform"), ("owner", "platform")]),
            record("arn:aws:s3:::logs", &[("team", "platform")]),
        ];
        assert_eq!(assertions_from_records(&records, "ownership:").len(), 1);
    }

    #[test]
    fn blank_values_are_ignored() {
        let records = vec![record("arn:aws:s3:::logs", &[("team", "  ")])];
        assert!(assertions_from_records(&records, "ownership:").is_empty());
    }
}
