use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use sqlx::PgPool;
use tracing::info;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use ownergraph_common::{Config, ScrapeMode};
use ownergraph_discovery::pipeline::router::RoutingPolicy;
use ownergraph_discovery::scheduling::staleness::StalenessEvaluator;
use ownergraph_discovery::store::{postgres, CacheStore, PgCacheStore, PgUpdateQueue};
use ownergraph_discovery::{DiscoveryRun, FileFetcher, GraphUpdateConsumer, RunRequest};
use ownergraph_graph::{
    migrate::migrate, GraphClient, GraphWriter, OwnershipReader, OwnershipReconciler,
    ReconcilerPolicy,
};

#[derive(Parser)]
#[command(name = "discovery", about = "Incremental resource discovery and ownership reconciliation")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create Postgres tables and Neo4j constraints
    Migrate,
    /// Run discovery for one account
    Run {
        /// Account to scrape (falls back to ACCOUNT_ID)
        #[arg(long)]
        account: Option<String>,
        #[arg(long)]
        force_full: bool,
        /// full or delta
        #[arg(long)]
        mode: Option<ScrapeMode>,
        /// JSON inventory snapshot to serve categories from
        #[arg(long)]
        inventory: PathBuf,
        /// Comma-separated category names
        #[arg(long, value_delimiter = ',')]
        categories: Option<Vec<String>>,
    },
    /// Apply ready update messages to the ownership graph
    Consume {
        #[arg(long, default_value_t = 25)]
        limit: u32,
    },
    /// List disputed ownership edges
    Conflicts,
    /// Resolve the conflict around an edge in favour of a winner
    Resolve { edge: Uuid, winner: Uuid },
    /// Delete expired cache rows
    Purge,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("ownergraph=info".parse()?))
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Migrate => {
            let config = Config::reconciler_from_env();
            config.log_redacted();
            let pool = PgPool::connect(&config.database_url).await?;
            postgres::migrate(&pool).await?;
            let client = connect_graph(&config).await?;
            migrate(&client).await?;
        }
        Command::Run {
            account,
            force_full,
            mode,
            inventory,
            categories,
        } => {
            let config = Config::discovery_from_env();
            config.log_redacted();
            let pool = PgPool::connect(&config.database_url).await?;

            let run = DiscoveryRun::builder()
                .fetcher(Arc::new(FileFetcher::load(&inventory).await?))
                .store(Arc::new(PgCacheStore::new(pool.clone())))
                .channel(Arc::new(PgUpdateQueue::new(pool)))
                .evaluator(StalenessEvaluator::new(chrono::Duration::days(
                    config.full_scrape_interval_days,
                )))
                .routing(RoutingPolicy {
                    direct_max_resources: config.direct_route_max_resources,
                    batch_delay: chrono::Duration::seconds(config.batch_update_delay_secs as i64),
                    result_ttl: chrono::Duration::hours(config.result_ttl_hours),
                })
                .scraper_id(config.scraper_id.clone())
                .owner_tag_prefix(config.owner_tag_prefix.clone())
                .run_timeout(Duration::from_secs(config.run_timeout_secs))
                .build();

            let request = RunRequest {
                account_id: account.or(config.account_id).unwrap_or_default(),
                force_full,
                mode,
                categories,
            };
            let report = run.run(&request).await?;
            info!("{report}");
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Consume { limit } => {
            let config = Config::reconciler_from_env();
            config.log_redacted();
            let pool = PgPool::connect(&config.database_url).await?;
            let client = connect_graph(&config).await?;

            let reconciler = OwnershipReconciler::new(
                GraphWriter::new(client),
                ReconcilerPolicy::new(config.conflict_tolerance)?,
            );
            let consumer = GraphUpdateConsumer::new(
                Arc::new(PgCacheStore::new(pool.clone())),
                Arc::new(PgUpdateQueue::new(pool)),
                reconciler,
                config.owner_tag_prefix.clone(),
            );
            let stats = consumer.consume(limit).await?;
            info!("{stats}");
        }
        Command::Conflicts => {
            let config = Config::reconciler_from_env();
            let client = connect_graph(&config).await?;
            let conflicts = OwnershipReader::new(client).conflicts().await?;
            info!(count = conflicts.len(), "Disputed edges");
            for edge in conflicts {
                println!(
                    "{}  {} -[{}]-> {}  confidence={:.2} sources={} conflicts_with={:?}",
                    edge.id,
                    edge.subject,
                    edge.rel_type,
                    edge.resource,
                    edge.confidence,
                    edge.source(),
                    edge.conflicts_with(),
                );
            }
        }
        Command::Resolve { edge, winner } => {
            let config = Config::reconciler_from_env();
            let client = connect_graph(&config).await?;
            let reconciler = OwnershipReconciler::new(
                GraphWriter::new(client),
                ReconcilerPolicy::new(config.conflict_tolerance)?,
            );
            let changed = reconciler.resolve_conflict(edge, winner).await?;
            info!(%edge, %winner, changed = changed.len(), "Resolution applied");
        }
        Command::Purge => {
            let config = Config::discovery_from_env();
            let pool = PgPool::connect(&config.database_url).await?;
            let removed = PgCacheStore::new(pool).purge_expired().await?;
            info!(removed, "Expired cache rows purged");
        }
    }

    Ok(())
}

async fn connect_graph(config: &Config) -> Result<GraphClient> {
    let client =
        GraphClient::connect(&config.neo4j_uri, &config.neo4j_user, &config.neo4j_password)
            .await?;
    Ok(client)
}
