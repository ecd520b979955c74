//! The discovery run: evaluate staleness, fetch what is due, route the
//! results and record metadata for the next run.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};
use typed_builder::TypedBuilder;
use uuid::Uuid;

use ownergraph_common::{CategoryOutcome, OwnerGraphError, ScrapeMode, ScrapeRun};

use crate::fetch::projection::DEFAULT_OWNER_TAG_PREFIX;
use crate::fetch::ResourceFetcher;
use crate::pipeline::aggregate::{aggregate, RunTotals};
use crate::pipeline::recorder::MetadataRecorder;
use crate::pipeline::router::{PersistOutcome, PersistenceRouter, Route, RoutingPolicy};
use crate::scheduling::planner::{BatchPlanner, PlannerLimits, ProcessingMode};
use crate::scheduling::registry::CategoryRegistry;
use crate::scheduling::staleness::{RunTrigger, StalenessEvaluator};
use crate::store::{CacheStore, UpdateChannel};

/// Long-lived run dependencies. One instance serves many runs.
#[derive(Clone, TypedBuilder)]
pub struct DiscoveryRun {
    pub fetcher: Arc<dyn ResourceFetcher>,
    pub store: Arc<dyn CacheStore>,
    pub channel: Arc<dyn UpdateChannel>,
    #[builder(default)]
    pub registry: CategoryRegistry,
    #[builder(default)]
    pub evaluator: StalenessEvaluator,
    #[builder(default)]
    pub limits: PlannerLimits,
    #[builder(default)]
    pub routing: RoutingPolicy,
    #[builder(default = "ownergraph-discovery".to_string())]
    pub scraper_id: String,
    #[builder(default = DEFAULT_OWNER_TAG_PREFIX.to_string())]
    pub owner_tag_prefix: String,
    #[builder(default = Duration::from_secs(840))]
    pub run_timeout: Duration,
    #[builder(default = chrono::Duration::days(30))]
    pub metadata_ttl: chrono::Duration,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunRequest {
    pub account_id: String,
    pub force_full: bool,
    pub mode: Option<ScrapeMode>,
    /// Restrict the run to these registry categories.
    pub categories: Option<Vec<String>>,
}

impl RunRequest {
    pub fn for_account(account_id: impl Into<String>) -> Self {
        Self {
            account_id: account_id.into(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunSource {
    /// Everything was within TTL; nothing fetched.
    Cache,
    Fresh,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunMetrics {
    pub categories_processed: u32,
    pub total_resources: u64,
    pub execution_time_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CategoryFailure {
    pub category: String,
    pub error: String,
}

/// Caller-facing result. Contained failures show up here, never as `Err`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    pub scraper_id: String,
    pub account_id: String,
    pub run_id: Uuid,
    pub completed_at: DateTime<Utc>,
    pub scrape_type: ScrapeMode,
    pub source: RunSource,
    pub metrics: RunMetrics,
    pub successful_categories: u32,
    pub failed_categories: u32,
    pub failures: Vec<CategoryFailure>,
    pub processing_mode: Option<ProcessingMode>,
    pub route: Option<Route>,
    pub update_enqueued: bool,
    pub timed_out: bool,
    pub persistence_warnings: Vec<String>,
}

impl std::fmt::Display for RunReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "\n=== Discovery Run Complete ===")?;
        writeln!(f, "Account:              {}", self.account_id)?;
        writeln!(f, "Run:                  {}", self.run_id)?;
        writeln!(f, "Scrape type:          {}", self.scrape_type)?;
        let source = match self.source {
            RunSource::Cache => "cache",
            RunSource::Fresh => "fresh",
        };
        writeln!(f, "Source:               {source}")?;
        writeln!(f, "Categories processed: {}", self.metrics.categories_processed)?;
        writeln!(f, "  succeeded:          {}", self.successful_categories)?;
        writeln!(f, "  failed:             {}", self.failed_categories)?;
        writeln!(f, "Resources:            {}", self.metrics.total_resources)?;
        writeln!(f, "Execution time:       {}ms", self.metrics.execution_time_ms)?;
        if let Some(mode) = self.processing_mode {
            writeln!(f, "Processing mode:      {mode}")?;
        }
        if let Some(route) = self.route {
            writeln!(f, "Route:                {route} (enqueued: {})", self.update_enqueued)?;
        }
        if self.timed_out {
            writeln!(f, "Run hit its deadline")?;
        }
        if !self.failures.is_empty() {
            writeln!(f, "\nFailures:")?;
            for failure in &self.failures {
                writeln!(f, "  {}: {}", failure.category, failure.error)?;
            }
        }
        if !self.persistence_warnings.is_empty() {
            writeln!(f, "\nPersistence warnings:")?;
            for warning in &self.persistence_warnings {
                writeln!(f, "  {warning}")?;
            }
        }
        Ok(())
    }
}

impl DiscoveryRun {
    /// Execute one run for one account.
    ///
    /// Only input errors return `Err`: an empty account id, or a category
    /// filter naming something outside the registry.
    pub async fn run(&self, request: &RunRequest) -> Result<RunReport, OwnerGraphError> {
        let started = std::time::Instant::now();
        let account_id = request.account_id.trim();
        if account_id.is_empty() {
            return Err(OwnerGraphError::Validation("account id is required".into()));
        }
        let registry = match &request.categories {
            Some(names) if names.is_empty() => {
                return Err(OwnerGraphError::Validation(
                    "category filter must name at least one category".into(),
                ));
            }
            Some(names) => self.registry.subset(names)?,
            None => self.registry.clone(),
        };
        let deadline = tokio::time::Instant::now() + self.run_timeout;
        let now = Utc::now();

        let recorder = MetadataRecorder::new(self.store.clone(), self.metadata_ttl);
        let metadata = match recorder.load(account_id).await {
            Ok(metadata) => metadata,
            Err(e) => {
                warn!(account_id, error = %e, "Metadata read failed, treating account as never scraped");
                None
            }
        };

        let trigger = RunTrigger {
            force_full: request.force_full,
            mode: request.mode,
        };
        let decision = self
            .evaluator
            .evaluate(metadata.as_ref(), registry.all(), trigger, now);
        let mut run = ScrapeRun {
            run_id: Uuid::new_v4(),
            account_id: account_id.to_string(),
            timestamp: now,
            mode: decision.mode(),
            categories_processed: 0,
            total_records: 0,
        };
        info!(
            account_id,
            run_id = %run.run_id,
            mode = %run.mode,
            selected = decision.selected.len(),
            skipped = decision.skipped,
            "Starting discovery run"
        );

        let planner = BatchPlanner::new(self.limits);
        let plan = planner.plan(decision.categories());
        let Some(processing_mode) = plan.processing_mode() else {
            info!(account_id, "All categories within TTL, nothing to fetch");
            return Ok(self.report(&run, RunSource::Cache, &[], RunTotals::default(), None, None, false, started));
        };

        let execution = planner
            .execute(plan, self.fetcher.as_ref(), &self.owner_tag_prefix, deadline)
            .await;
        let timed_out = execution.timed_out();
        let outcomes = execution.results.flatten();
        let totals = aggregate(&outcomes);
        run.categories_processed = totals.categories_processed();
        run.total_records = totals.total_resources;

        let router = PersistenceRouter::new(self.store.clone(), self.channel.clone(), self.routing);
        let persisted = router
            .persist(&self.scraper_id, &run, processing_mode, &outcomes, totals)
            .await;

        if let Err(e) = recorder.record(metadata.as_ref(), &run, &outcomes).await {
            warn!(account_id, run_id = %run.run_id, error = %e, "Metadata write failed");
        }

        let report = self.report(
            &run,
            RunSource::Fresh,
            &outcomes,
            totals,
            Some(processing_mode),
            Some(persisted),
            timed_out,
            started,
        );
        info!(
            account_id,
            run_id = %report.run_id,
            total_resources = report.metrics.total_resources,
            failed_categories = report.failed_categories,
            timed_out = report.timed_out,
            "Discovery run finished"
        );
        Ok(report)
    }

    #[allow(clippy::too_many_arguments)]
    fn report(
        &self,
        run: &ScrapeRun,
        source: RunSource,
        outcomes: &[CategoryOutcome],
        totals: RunTotals,
        processing_mode: Option<ProcessingMode>,
        persisted: Option<PersistOutcome>,
        timed_out: bool,
        started: std::time::Instant,
    ) -> RunReport {
        let failures: Vec<CategoryFailure> = outcomes
            .iter()
            .filter_map(|outcome| match outcome {
                CategoryOutcome::Failure { category, error } => Some(CategoryFailure {
                    category: category.clone(),
                    error: error.clone(),
                }),
                CategoryOutcome::Success { .. } => None,
            })
            .collect();
        let (route, update_enqueued, persistence_warnings) = match persisted {
            Some(p) => (Some(p.route), p.enqueued, p.warnings),
            None => (None, false, Vec::new()),
        };

        RunReport {
            scraper_id: self.scraper_id.clone(),
            account_id: run.account_id.clone(),
            run_id: run.run_id,
            completed_at: Utc::now(),
            scrape_type: run.mode,
            source,
            metrics: RunMetrics {
                categories_processed: totals.categories_processed(),
                total_resources: totals.total_resources,
                execution_time_ms: started.elapsed().as_millis() as u64,
            },
            successful_categories: totals.successful_categories,
            failed_categories: totals.failed_categories,
            failures,
            processing_mode,
            route,
            update_enqueued,
            timed_out,
            persistence_warnings,
        }
    }
}
