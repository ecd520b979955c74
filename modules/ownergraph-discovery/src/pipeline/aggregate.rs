use std::collections::BTreeMap;

use ownergraph_common::CategoryOutcome;

/// Raw fetch output. The large path yields one vector per group.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchResults {
    Small(Vec<CategoryOutcome>),
    Large(Vec<Vec<CategoryOutcome>>),
}

impl FetchResults {
    pub fn flatten(self) -> Vec<CategoryOutcome> {
        match self {
            FetchResults::Small(outcomes) => outcomes,
            FetchResults::Large(groups) => groups.into_iter().flatten().collect(),
        }
    }
}

/// Run-level counts. `merge` is associative and commutative, so totals do
/// not depend on the order categories finished in.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RunTotals {
    pub total_resources: u64,
    pub successful_categories: u32,
    pub failed_categories: u32,
}

impl RunTotals {
    pub fn of(outcome: &CategoryOutcome) -> Self {
        if outcome.is_success() {
            Self {
                total_resources: outcome.resource_count(),
                successful_categories: 1,
                failed_categories: 0,
            }
        } else {
            Self {
                total_resources: 0,
                successful_categories: 0,
                failed_categories: 1,
            }
        }
    }

    pub fn merge(self, other: Self) -> Self {
        Self {
            total_resources: self.total_resources + other.total_resources,
            successful_categories: self.successful_categories + other.successful_categories,
            failed_categories: self.failed_categories + other.failed_categories,
        }
    }

    pub fn categories_processed(&self) -> u32 {
        self.successful_categories + self.failed_categories
    }
}

pub fn aggregate(outcomes: &[CategoryOutcome]) -> RunTotals {
    outcomes
        .iter()
        .map(RunTotals::of)
        .fold(RunTotals::default(), RunTotals::merge)
}

/// Resource count per successful category.
pub fn per_category(outcomes: &[CategoryOutcome]) -> BTreeMap<String, u64> {
    outcomes
        .iter()
        .filter(|o| o.is_success())
        .map(|o| (o.category().to_string(), o.resource_count()))
        .collect()
}
