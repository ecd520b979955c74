use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{info, warn};

use ownergraph_common::{Category, CategoryOutcome, ResourceRecord};

use crate::fetch::projection::project_owner_tags;
use crate::fetch::{FetchDetail, ResourceFetcher};
use crate::pipeline::aggregate::FetchResults;

/// Failure recorded for a category cut off by the run deadline.
pub const DEADLINE_EXCEEDED: &str = "run deadline exceeded";

/// Batch sizing and concurrency bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlannerLimits {
    /// Up to this many categories take the small-batch path.
    pub small_batch_max: usize,
    pub small_concurrency: usize,
    pub group_size: usize,
    pub group_concurrency: usize,
    pub inner_concurrency: usize,
}

impl Default for PlannerLimits {
    fn default() -> Self {
        Self {
            small_batch_max: 3,
            small_concurrency: 3,
            group_size: 5,
            group_concurrency: 8,
            inner_concurrency: 5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingMode {
    SmallBatch,
    LargeBatch,
}

impl std::fmt::Display for ProcessingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProcessingMode::SmallBatch => write!(f, "small_batch"),
            ProcessingMode::LargeBatch => write!(f, "large_batch"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum BatchPlan {
    /// Nothing selected.
    AllCached,
    /// Full-detail fetch per category.
    Small(Vec<Category>),
    /// Reduced-projection fetch, partitioned into groups.
    Large(Vec<Vec<Category>>),
}

impl BatchPlan {
    pub fn processing_mode(&self) -> Option<ProcessingMode> {
        match self {
            BatchPlan::AllCached => None,
            BatchPlan::Small(_) => Some(ProcessingMode::SmallBatch),
            BatchPlan::Large(_) => Some(ProcessingMode::LargeBatch),
        }
    }

    pub fn category_count(&self) -> usize {
        match self {
            BatchPlan::AllCached => 0,
            BatchPlan::Small(categories) => categories.len(),
            BatchPlan::Large(groups) => groups.iter().map(Vec::len).sum(),
        }
    }
}

/// Output of [`BatchPlanner::execute`].
#[derive(Debug, Clone, PartialEq)]
pub struct Execution {
    pub results: FetchResults,
    /// Categories the run deadline cut off before their fetch finished.
    pub cut_off: Vec<String>,
}

impl Execution {
    pub fn timed_out(&self) -> bool {
        !self.cut_off.is_empty()
    }
}

/// One category's outcome and whether the deadline produced it.
struct Fetched {
    outcome: CategoryOutcome,
    cut_off: bool,
}

impl Fetched {
    fn done(outcome: CategoryOutcome) -> Self {
        Self {
            outcome,
            cut_off: false,
        }
    }

    fn deadline(category: String) -> Self {
        Self {
            outcome: CategoryOutcome::Failure {
                category,
                error: DEADLINE_EXCEEDED.to_string(),
            },
            cut_off: true,
        }
    }
}

fn split(fetched: Vec<Fetched>, cut_off: &mut Vec<String>) -> Vec<CategoryOutcome> {
    fetched
        .into_iter()
        .map(|f| {
            if f.cut_off {
                cut_off.push(f.outcome.category().to_string());
            }
            f.outcome
        })
        .collect()
}

pub struct BatchPlanner {
    limits: PlannerLimits,
}

impl BatchPlanner {
    pub fn new(limits: PlannerLimits) -> Self {
        Self { limits }
    }

    pub fn plan(&self, selected: Vec<Category>) -> BatchPlan {
        match selected.len() {
            0 => BatchPlan::AllCached,
            n if n <= self.limits.small_batch_max => BatchPlan::Small(selected),
            _ => BatchPlan::Large(
                selected
                    .chunks(self.limits.group_size.max(1))
                    .map(<[Category]>::to_vec)
                    .collect(),
            ),
        }
    }

    /// Fetch every planned category. All tasks finish (or hit the deadline)
    /// before this returns; a failing category never affects the others.
    pub async fn execute(
        &self,
        plan: BatchPlan,
        fetcher: &dyn ResourceFetcher,
        owner_tag_prefix: &str,
        deadline: Instant,
    ) -> Execution {
        let mut cut_off = Vec::new();
        let results = match plan {
            BatchPlan::AllCached => FetchResults::Small(Vec::new()),
            BatchPlan::Small(categories) => {
                info!(categories = categories.len(), "Fetching small batch");
                let outcomes = stream::iter(categories.into_iter().map(|category| {
                    fetch_category(fetcher, category, FetchDetail::Full, owner_tag_prefix, deadline)
                }))
                .buffer_unordered(self.limits.small_concurrency.max(1))
                .collect::<Vec<_>>()
                .await;
                FetchResults::Small(split(outcomes, &mut cut_off))
            }
            BatchPlan::Large(groups) => {
                info!(groups = groups.len(), "Fetching large batch");
                let inner = self.limits.inner_concurrency.max(1);
                let groups = stream::iter(groups.into_iter().map(|group| async move {
                    stream::iter(group.into_iter().map(|category| {
                        fetch_category(
                            fetcher,
                            category,
                            FetchDetail::Reduced,
                            owner_tag_prefix,
                            deadline,
                        )
                    }))
                    .buffer_unordered(inner)
                    .collect::<Vec<_>>()
                    .await
                }))
                .buffer_unordered(self.limits.group_concurrency.max(1))
                .collect::<Vec<_>>()
                .await;
                FetchResults::Large(
                    groups
                        .into_iter()
                        .map(|group| split(group, &mut cut_off))
                        .collect(),
                )
            }
        };
        Execution { results, cut_off }
    }
}

async fn fetch_category(
    fetcher: &dyn ResourceFetcher,
    category: Category,
    detail: FetchDetail,
    owner_tag_prefix: &str,
    deadline: Instant,
) -> Fetched {
    let name = category.name.to_string();
    if Instant::now() >= deadline {
        warn!(category = category.name, "Skipping fetch, run deadline passed");
        return Fetched::deadline(name);
    }

    match tokio::time::timeout_at(deadline, fetcher.fetch(&category, detail)).await {
        Ok(Ok(records)) => {
            let records: Vec<ResourceRecord> = records
                .into_iter()
                .map(|mut record| {
                    record.category = name.clone();
                    match detail {
                        FetchDetail::Full => record,
                        FetchDetail::Reduced => project_owner_tags(record, owner_tag_prefix),
                    }
                })
                .collect();
            info!(category = category.name, records = records.len(), "Fetched category");
            Fetched::done(CategoryOutcome::Success {
                category: name,
                records,
            })
        }
        Ok(Err(e)) => {
            warn!(category = category.name, error = %e, "Fetch failed");
            Fetched::done(CategoryOutcome::Failure {
                category: name,
                error: format!("{e:#}"),
            })
        }
        Err(_) => {
            warn!(category = category.name, "Fetch cancelled at run deadline");
            Fetched::deadline(name)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockFetcher;
    use ownergraph_common::Priority;
    use std::collections::BTreeMap;
    use std::time::Duration;

    fn categories(n: usize) -> Vec<Category> {
        const NAMES: [&str; 12] = [
            "c0", "c1", "c2", "c3", "c4", "c5", "c6", "c7", "c8", "c9", "c10", "c11",
        ];
        NAMES[..n]
            .iter()
            .map(|&name| Category::new(name, "test:thing", 24, Priority::Medium))
            .collect()
    }

    fn far_deadline() -> Instant {
        Instant::now() + Duration::from_secs(60)
    }

    #[test]
    fn three_categories_take_small_path() {
        let plan = BatchPlanner::new(PlannerLimits::default()).plan(categories(3));
        assert_eq!(plan.processing_mode(), Some(ProcessingMode::SmallBatch));
    }

    #[test]
    fn four_categories_take_large_path() {
        let plan = BatchPlanner::new(PlannerLimits::default()).plan(categories(4));
        assert_eq!(plan.processing_mode(), Some(ProcessingMode::LargeBatch));
        assert_eq!(plan.category_count(), 4);
    }

    #[test]
    fn large_path_groups_by_five() {
        let plan = BatchPlanner::new(PlannerLimits::default()).plan(categories(12));
        let BatchPlan::Large(groups) = plan else {
            panic!("expected large plan");
        };
        let sizes: Vec<_> = groups.iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![5, 5, 2]);
    }

    #[test]
    fn empty_selection_is_all_cached() {
        let plan = BatchPlanner::new(PlannerLimits::default()).plan(Vec::new());
        assert_eq!(plan, BatchPlan::AllCached);
        assert_eq!(plan.processing_mode(), None);
    }

    #[tokio::test]
    async fn one_failure_does_not_abort_the_batch() {
        let fetcher = MockFetcher::new()
            .on_category("c0", MockFetcher::records("c0", 2))
            .failing("c1", "AccessDenied")
            .on_category("c2", MockFetcher::records("c2", 3));
        let planner = BatchPlanner::new(PlannerLimits::default());
        let results = planner
            .execute(planner.plan(categories(3)), &fetcher, "ownership:", far_deadline())
            .await
            .results
            .flatten();

        assert_eq!(results.len(), 3);
        let failed: Vec<_> = results.iter().filter(|o| !o.is_success()).collect();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].category(), "c1");
        assert_eq!(results.iter().map(|o| o.resource_count()).sum::<u64>(), 5);
    }

    #[tokio::test]
    async fn large_path_projects_owner_tags() {
        let mut tags = BTreeMap::new();
        tags.insert("ownership:team".to_string(), "platform".to_string());
        tags.insert("env".to_string(), "prod".to_string());
        let record = ResourceRecord {
            arn: "arn:aws:s3:::logs".into(),
            region: "us-east-1".into(),
            tags,
            category: String::new(),
        };

        let mut fetcher = MockFetcher::new();
        for category in categories(4) {
            fetcher = fetcher.on_category(category.name, vec![record.clone()]);
        }
        let planner = BatchPlanner::new(PlannerLimits::default());
        let results = planner
            .execute(planner.plan(categories(4)), &fetcher, "ownership:", far_deadline())
            .await
            .results;
        assert!(matches!(results, FetchResults::Large(_)));

        for outcome in results.flatten() {
            let record = &outcome.records()[0];
            assert_eq!(record.category, outcome.category());
            assert_eq!(record.tags.len(), 1);
            assert_eq!(record.tags["team"], "platform");
        }
        assert_eq!(fetcher.detail_requests(FetchDetail::Reduced), 4);
    }

    #[tokio::test]
    async fn deadline_fails_slow_categories() {
        let fetcher = MockFetcher::new()
            .on_category("c0", MockFetcher::records("c0", 1))
            .slow("c1", Duration::from_secs(30));
        let planner = BatchPlanner::new(PlannerLimits::default());
        let deadline = Instant::now() + Duration::from_millis(50);
        let execution = planner
            .execute(planner.plan(categories(2)), &fetcher, "ownership:", deadline)
            .await;
        assert!(execution.timed_out());
        assert_eq!(execution.cut_off, vec!["c1".to_string()]);
        let results = execution.results.flatten();

        let slow = results.iter().find(|o| o.category() == "c1").unwrap();
        assert_eq!(
            slow,
            &CategoryOutcome::Failure {
                category: "c1".into(),
                error: DEADLINE_EXCEEDED.into()
            }
        );
        assert!(results.iter().find(|o| o.category() == "c0").unwrap().is_success());
    }

    #[tokio::test]
    async fn fetcher_error_matching_deadline_text_is_not_a_timeout() {
        let fetcher = MockFetcher::new()
            .on_category("c0", MockFetcher::records("c0", 1))
            .failing("c1", DEADLINE_EXCEEDED);
        let planner = BatchPlanner::new(PlannerLimits::default());
        let execution = planner
            .execute(planner.plan(categories(2)), &fetcher, "ownership:", far_deadline())
            .await;

        assert!(!execution.timed_out());
        assert!(execution.cut_off.is_empty());
        assert_eq!(execution.results.flatten().iter().filter(|o| !o.is_success()).count(), 1);
    }

    #[tokio::test]
    async fn small_path_runs_at_most_three_fetches_at_once() {
        let planner = BatchPlanner::new(PlannerLimits::default());
        let selected = categories(3);
        let fetcher = selected.iter().fold(MockFetcher::new(), |f, c| {
            f.on_category(c.name, MockFetcher::records(c.name, 1))
        });
        let fetcher = fetcher.with_latency(Duration::from_millis(20));

        planner
            .execute(planner.plan(selected), &fetcher, "ownership:", far_deadline())
            .await;
        assert_eq!(fetcher.peak_in_flight(), 3);
    }

    #[tokio::test]
    async fn large_path_bounds_each_group_to_five_fetches() {
        // A single group isolates the inner bound from the group bound.
        let planner = BatchPlanner::new(PlannerLimits {
            group_size: 12,
            ..PlannerLimits::default()
        });
        let selected = categories(12);
        let fetcher = selected.iter().fold(MockFetcher::new(), |f, c| {
            f.on_category(c.name, MockFetcher::records(c.name, 1))
        });
        let fetcher = fetcher.with_latency(Duration::from_millis(20));

        let execution = planner
            .execute(planner.plan(selected), &fetcher, "ownership:", far_deadline())
            .await;
        assert_eq!(execution.results.flatten().len(), 12);
        assert_eq!(fetcher.peak_in_flight(), 5);
    }

    #[tokio::test]
    async fn large_path_bounds_groups_in_flight() {
        // Groups of one make every fetch its own group, so the peak is the
        // group bound.
        let planner = BatchPlanner::new(PlannerLimits {
            group_size: 1,
            ..PlannerLimits::default()
        });
        let selected = categories(12);
        let fetcher = selected.iter().fold(MockFetcher::new(), |f, c| {
            f.on_category(c.name, MockFetcher::records(c.name, 1))
        });
        let fetcher = fetcher.with_latency(Duration::from_millis(20));

        planner
            .execute(planner.plan(selected), &fetcher, "ownership:", far_deadline())
            .await;
        assert_eq!(fetcher.peak_in_flight(), 8);
    }
}
