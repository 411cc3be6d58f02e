use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::{Duration, Utc};
use clap::{Parser, Subcommand};
use jobhub_core::{Source, SyncTier};
use jobhub_storage::{JobQuery, JobStore, MemoryJobStore, PgJobStore};
use jobhub_sync::{start_scheduler, SyncConfig, SyncOutcome, SyncService};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "jobhub")]
#[command(about = "JobHub ingestion engine command-line interface")]
struct Cli {
    /// Use an in-process store instead of Postgres; nothing is persisted.
    #[arg(long, global = true)]
    memory: bool,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run one sync now, for every tier unless one is given.
    Sync {
        #[arg(long)]
        tier: Option<SyncTier>,
        /// Print run summaries as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Delete records older than the retention window.
    Evict,
    /// Apply database migrations.
    Migrate,
    /// Run the sync and eviction scheduler until ctrl-c.
    Schedule {
        #[arg(long)]
        skip_initial_sync: bool,
    },
    /// List stored records.
    List {
        #[arg(long)]
        text: Option<String>,
        #[arg(long)]
        category: Option<String>,
        #[arg(long)]
        source: Option<Source>,
        /// Only records first seen within this many hours.
        #[arg(long)]
        fresh_hours: Option<i64>,
        #[arg(long)]
        include_inactive: bool,
        #[arg(long, default_value_t = 20)]
        limit: usize,
        #[arg(long, default_value_t = 0)]
        offset: usize,
    },
}

async fn open_store(config: &SyncConfig, memory: bool) -> Result<Arc<dyn JobStore>> {
    if memory {
        tracing::warn!("using in-memory store; records are discarded on exit");
        return Ok(Arc::new(MemoryJobStore::new()));
    }
    let store = PgJobStore::connect(&config.database_url, config.max_db_connections)
        .await
        .context("connecting to database")?;
    Ok(Arc::new(store))
}

fn print_outcome(tier: SyncTier, outcome: &SyncOutcome) {
    match outcome {
        SyncOutcome::Completed(summary) => {
            println!(
                "sync {tier}: run_id={} fetched={} unique={} inserted={} updated={} preserved={} failed={} deactivated={}",
                summary.run_id,
                summary.stats.total_fetched,
                summary.unique_candidates,
                summary.merge.inserted,
                summary.merge.updated,
                summary.merge.preserved_descriptions,
                summary.merge.failed,
                summary.deactivated,
            );
            for (source, error) in &summary.stats.errors {
                println!("  {source}: {error}");
            }
        }
        SyncOutcome::Coalesced => println!("sync {tier}: coalesced into a run already in progress"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = SyncConfig::from_env();

    match cli.command.unwrap_or(Commands::Sync { tier: None, json: false }) {
        Commands::Sync { tier, json } => {
            let store = open_store(&config, cli.memory).await?;
            let service = SyncService::from_config(config, store).await?;
            let outcomes = match tier {
                Some(tier) => vec![(tier, service.run_tier(tier).await)],
                None => service.run_now().await,
            };
            for (tier, outcome) in &outcomes {
                if json {
                    println!("{}", serde_json::to_string(outcome).context("serializing run summary")?);
                } else {
                    print_outcome(*tier, outcome);
                }
            }
        }
        Commands::Evict => {
            let store = open_store(&config, cli.memory).await?;
            let service = SyncService::from_config(config, store).await?;
            let deleted = service.evict(Utc::now()).await?;
            println!("evicted {deleted} records");
        }
        Commands::Migrate => {
            if cli.memory {
                bail!("migrate needs a database; drop --memory");
            }
            let store = PgJobStore::connect(&config.database_url, config.max_db_connections)
                .await
                .context("connecting to database")?;
            store.migrate().await.context("running migrations")?;
            println!("migrations applied");
        }
        Commands::Schedule { skip_initial_sync } => {
            if !config.scheduler_enabled {
                bail!("scheduler disabled (JOBHUB_SCHEDULER_ENABLED=false)");
            }
            let store = open_store(&config, cli.memory).await?;
            let service = Arc::new(SyncService::from_config(config, store).await?);
            let mut scheduler = start_scheduler(service.clone())
                .await
                .context("starting scheduler")?;
            if !skip_initial_sync {
                for (tier, outcome) in service.run_now().await {
                    print_outcome(tier, &outcome);
                }
            }
            tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
            tracing::info!("shutting down scheduler");
            scheduler.shutdown().await.context("stopping scheduler")?;
        }
        Commands::List {
            text,
            category,
            source,
            fresh_hours,
            include_inactive,
            limit,
            offset,
        } => {
            let store = open_store(&config, cli.memory).await?;
            let query = JobQuery {
                text,
                category,
                source,
                fresh_within: fresh_hours.map(Duration::hours),
                include_inactive,
                limit: Some(limit),
                offset: Some(offset),
            };
            let now = Utc::now();
            let total = store.count(&query, now).await?;
            for record in store.page(&query, now).await? {
                println!(
                    "{}  {:<40}  {} | {} | {}",
                    record.created_at.format("%Y-%m-%d %H:%M"),
                    record.external_id,
                    record.title,
                    record.company,
                    record.categories.join(",")
                );
            }
            println!("{total} matching records");
        }
    }

    Ok(())
}
