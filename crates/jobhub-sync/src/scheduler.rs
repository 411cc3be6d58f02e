//! Periodic sync and eviction jobs on `tokio-cron-scheduler`.

use std::sync::Arc;

use chrono::Utc;
use jobhub_core::SyncTier;
use jobhub_storage::StoreError;
use thiserror::Error;
use tokio_cron_scheduler::{Job, JobScheduler, JobSchedulerError};
use tracing::{debug, error, info};

use crate::service::{SyncOutcome, SyncService};

/// Conditions that stop the scheduler from starting at all.
#[derive(Debug, Error)]
pub enum SchedulerFatal {
    #[error("store unreachable at startup: {0}")]
    StoreUnreachable(#[source] StoreError),
    #[error("scheduler setup failed: {0}")]
    Scheduler(#[from] JobSchedulerError),
}

async fn sync_tick(service: Arc<SyncService>, tier: SyncTier) {
    // Each tick runs in its own task so a panic is reported here and the
    // next tick still fires.
    match tokio::spawn(async move { service.run_tier(tier).await }).await {
        Ok(SyncOutcome::Completed(summary)) => {
            if !summary.stats.errors.is_empty() {
                info!(tier = %tier, errors = ?summary.stats.errors, "sync tick finished with source errors");
            }
        }
        Ok(SyncOutcome::Coalesced) => debug!(tier = %tier, "sync tick coalesced"),
        Err(err) => error!(tier = %tier, error = %err, "sync tick aborted"),
    }
}

async fn eviction_tick(service: Arc<SyncService>) {
    match tokio::spawn(async move { service.evict(Utc::now()).await }).await {
        Ok(Ok(_)) => {}
        Ok(Err(err)) => error!(error = %err, "eviction tick failed; retrying next tick"),
        Err(err) => error!(error = %err, "eviction tick aborted"),
    }
}

/// Ping the store, register one repeated job per populated tier plus the
/// eviction job, and start the scheduler.
pub async fn start_scheduler(service: Arc<SyncService>) -> Result<JobScheduler, SchedulerFatal> {
    service
        .store()
        .ping()
        .await
        .map_err(SchedulerFatal::StoreUnreachable)?;

    let scheduler = JobScheduler::new().await?;

    for tier in SyncTier::ALL {
        if !service.sources().has_tier(tier) {
            info!(tier = %tier, "no sources in tier; not scheduling");
            continue;
        }
        let every = service.config().interval_for(tier);
        let tick_service = service.clone();
        let job = Job::new_repeated_async(every, move |_uuid, _lock| {
            let service = tick_service.clone();
            Box::pin(async move { sync_tick(service, tier).await })
        })?;
        scheduler.add(job).await?;
        info!(tier = %tier, every_secs = every.as_secs(), "scheduled sync job");
    }

    let eviction_every = service.config().eviction_interval;
    let evict_service = service.clone();
    let eviction = Job::new_repeated_async(eviction_every, move |_uuid, _lock| {
        let service = evict_service.clone();
        Box::pin(async move { eviction_tick(service).await })
    })?;
    scheduler.add(eviction).await?;

    scheduler.start().await?;
    info!(
        eviction_every_secs = eviction_every.as_secs(),
        retention_hours = service.config().retention.num_hours(),
        "scheduler started"
    );
    Ok(scheduler)
}
