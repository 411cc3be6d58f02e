//! End-to-end sync runs, trigger coalescing, retirement and eviction.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use jobhub_adapters::{adapter_for, SourceAdapter};
use jobhub_core::{Source, SyncTier};
use jobhub_storage::{HttpFetcher, JobStore, StoreError};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

use crate::aggregate::{aggregate, AggregateOptions, AggregateStats, SourceRun};
use crate::config::{SourceRegistry, SyncConfig};
use crate::dedup::dedupe;
use crate::enrich::CategoryRules;
use crate::merge::{MergeEngine, MergeReport};

#[derive(Debug, Error)]
#[error("eviction failed: {0}")]
pub struct EvictionError(#[from] pub StoreError);

pub struct RegisteredAdapter {
    pub tier: SyncTier,
    pub limit: usize,
    pub adapter: Arc<dyn SourceAdapter>,
}

/// An enabled source whose adapter could not be built (e.g. missing key).
#[derive(Debug, Clone)]
pub struct UnavailableSource {
    pub source: Source,
    pub tier: SyncTier,
    pub reason: String,
}

/// Adapters grouped for the service, resolved once from the registry.
#[derive(Default)]
pub struct SourceSet {
    pub adapters: Vec<RegisteredAdapter>,
    pub unavailable: Vec<UnavailableSource>,
    /// Listed but disabled; their records are soft-disabled on every run.
    pub retired: Vec<Source>,
}

impl SourceSet {
    pub fn from_registry(registry: &SourceRegistry) -> Self {
        let mut set = SourceSet {
            retired: registry.retired(),
            ..Default::default()
        };
        let enabled = SyncTier::ALL.into_iter().flat_map(|tier| registry.enabled_for(tier));
        for entry in enabled {
            match adapter_for(entry) {
                Ok(adapter) => set.adapters.push(RegisteredAdapter {
                    tier: entry.tier,
                    limit: entry.limit,
                    adapter: Arc::from(adapter),
                }),
                Err(err) => {
                    warn!(source = %entry.source, error = %err, "source enabled but unavailable");
                    set.unavailable.push(UnavailableSource {
                        source: entry.source,
                        tier: entry.tier,
                        reason: err.kind.to_string(),
                    });
                }
            }
        }
        set
    }

    pub fn has_tier(&self, tier: SyncTier) -> bool {
        self.adapters.iter().any(|a| a.tier == tier)
            || self.unavailable.iter().any(|u| u.tier == tier)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncRunSummary {
    pub run_id: Uuid,
    pub tier: SyncTier,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub stats: AggregateStats,
    pub unique_candidates: usize,
    pub merge: MergeReport,
    /// Records soft-disabled because their source was switched off.
    pub deactivated: u64,
}

#[derive(Debug, Clone, Serialize)]
pub enum SyncOutcome {
    Completed(SyncRunSummary),
    /// A run for this tier was already in flight; this trigger was folded into it.
    Coalesced,
}

pub struct SyncService {
    config: SyncConfig,
    store: Arc<dyn JobStore>,
    http: Arc<HttpFetcher>,
    rules: CategoryRules,
    merge: MergeEngine,
    sources: SourceSet,
    fast_lock: Mutex<()>,
    slow_lock: Mutex<()>,
}

impl SyncService {
    pub fn new(
        config: SyncConfig,
        store: Arc<dyn JobStore>,
        rules: CategoryRules,
        sources: SourceSet,
    ) -> anyhow::Result<Self> {
        let http = Arc::new(HttpFetcher::new(config.http_client_config())?);
        let merge = MergeEngine::new(store.clone(), config.richness_threshold);
        Ok(Self {
            config,
            store,
            http,
            rules,
            merge,
            sources,
            fast_lock: Mutex::new(()),
            slow_lock: Mutex::new(()),
        })
    }

    /// Load `sources.yaml` and the category rules named by `config`.
    pub async fn from_config(config: SyncConfig, store: Arc<dyn JobStore>) -> anyhow::Result<Self> {
        let registry = SourceRegistry::load(&config.sources_path).await?;
        let rules = CategoryRules::load_or_default(&config.category_rules_path)?;
        let sources = SourceSet::from_registry(&registry);
        Self::new(config, store, rules, sources)
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    pub fn sources(&self) -> &SourceSet {
        &self.sources
    }

    fn lock_for(&self, tier: SyncTier) -> &Mutex<()> {
        match tier {
            SyncTier::Fast => &self.fast_lock,
            SyncTier::Slow => &self.slow_lock,
        }
    }

    async fn retire_disabled_sources(&self) -> u64 {
        let mut changed = 0;
        for source in &self.sources.retired {
            match self.store.set_source_active(*source, false).await {
                Ok(rows) => {
                    if rows > 0 {
                        info!(source = %source, rows, "deactivated records of disabled source");
                    }
                    changed += rows;
                }
                Err(err) => warn!(source = %source, error = %err, "could not deactivate disabled source"),
            }
        }
        changed
    }

    /// Aggregate, dedupe, tag and merge every source of `tier`.
    ///
    /// Runs of the same tier never overlap: a trigger that finds the tier
    /// busy returns [`SyncOutcome::Coalesced`] immediately.
    pub async fn run_tier(&self, tier: SyncTier) -> SyncOutcome {
        let Ok(_guard) = self.lock_for(tier).try_lock() else {
            info!(tier = %tier, "sync already running for tier; coalescing trigger");
            return SyncOutcome::Coalesced;
        };

        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let deactivated = self.retire_disabled_sources().await;

        let runs = self
            .sources
            .adapters
            .iter()
            .filter(|a| a.tier == tier)
            .map(|a| SourceRun {
                adapter: a.adapter.clone(),
                limit: a.limit,
            })
            .collect();
        let options = AggregateOptions {
            adapter_timeout: self.config.adapter_timeout,
            max_concurrent_fetches: self.config.max_concurrent_fetches,
        };
        let (candidates, mut stats) = aggregate(self.http.clone(), runs, run_id, started_at, options).await;
        for missing in self.sources.unavailable.iter().filter(|u| u.tier == tier) {
            stats.counts.insert(missing.source, 0);
            stats.errors.insert(missing.source, missing.reason.clone());
        }

        let mut unique = dedupe(candidates);
        self.rules.apply(&mut unique);
        let unique_candidates = unique.len();
        let merge = self.merge.merge_all(unique, Utc::now()).await;

        let summary = SyncRunSummary {
            run_id,
            tier,
            started_at,
            finished_at: Utc::now(),
            stats,
            unique_candidates,
            merge,
            deactivated,
        };
        info!(
            run_id = %summary.run_id,
            tier = %tier,
            fetched = summary.stats.total_fetched,
            unique = summary.unique_candidates,
            inserted = summary.merge.inserted,
            updated = summary.merge.updated,
            failed = summary.merge.failed,
            source_errors = summary.stats.errors.len(),
            "sync run finished"
        );
        SyncOutcome::Completed(summary)
    }

    /// Run every tier once, coalescing with anything already in flight.
    pub async fn run_now(&self) -> Vec<(SyncTier, SyncOutcome)> {
        let mut outcomes = Vec::with_capacity(SyncTier::ALL.len());
        for tier in SyncTier::ALL {
            outcomes.push((tier, self.run_tier(tier).await));
        }
        outcomes
    }

    /// Hard-delete every record first seen before `now - retention`.
    pub async fn evict(&self, now: DateTime<Utc>) -> Result<u64, EvictionError> {
        let cutoff = now - self.config.retention;
        let deleted = self.store.delete_created_before(cutoff).await?;
        info!(deleted, cutoff = %cutoff, "evicted stale records");
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::tests::{draft, Behavior, FakeAdapter};
    use async_trait::async_trait;
    use chrono::Duration;
    use jobhub_adapters::{FetchContext, SourceConfig, SourceError};
    use jobhub_core::{JobDraft, JobRecord};
    use jobhub_storage::{JobQuery, MemoryJobStore};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Notify;

    fn registered(tier: SyncTier, adapter: impl SourceAdapter + 'static) -> RegisteredAdapter {
        RegisteredAdapter {
            tier,
            limit: 50,
            adapter: Arc::new(adapter),
        }
    }

    fn service(store: Arc<MemoryJobStore>, sources: SourceSet) -> SyncService {
        SyncService::new(SyncConfig::default(), store, CategoryRules::default(), sources).unwrap()
    }

    fn completed(outcome: SyncOutcome) -> SyncRunSummary {
        match outcome {
            SyncOutcome::Completed(summary) => summary,
            SyncOutcome::Coalesced => panic!("expected a completed run"),
        }
    }

    #[tokio::test]
    async fn tier_run_merges_unique_tagged_candidates() {
        let store = Arc::new(MemoryJobStore::new());
        let mut startup = draft(Source::RemoteOk, "Rust Engineer", "https://acme.io/jobs/1");
        startup.full_description = "Early startup".into();
        let sources = SourceSet {
            adapters: vec![
                registered(
                    SyncTier::Fast,
                    FakeAdapter::new(Source::RemoteOk, Behavior::Items(vec![startup])),
                ),
                registered(
                    SyncTier::Fast,
                    FakeAdapter::new(
                        Source::Remotive,
                        Behavior::Items(vec![draft(Source::Remotive, "Senior Rust Engineer", "https://ACME.io/jobs/1")]),
                    ),
                ),
                registered(SyncTier::Slow, FakeAdapter::new(Source::JSearch, Behavior::Fail)),
            ],
            ..Default::default()
        };
        let svc = service(store.clone(), sources);

        let summary = completed(svc.run_tier(SyncTier::Fast).await);
        assert_eq!(summary.stats.total_fetched, 2);
        assert_eq!(summary.unique_candidates, 1);
        assert_eq!(summary.merge.inserted, 1);
        assert!(summary.stats.errors.is_empty());

        let stored = store.page(&JobQuery::default(), Utc::now()).await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].source, Source::RemoteOk);
        assert_eq!(stored[0].categories, vec!["startup"]);
    }

    #[tokio::test]
    async fn unavailable_sources_surface_in_stats() {
        let store = Arc::new(MemoryJobStore::new());
        let sources = SourceSet {
            unavailable: vec![UnavailableSource {
                source: Source::Adzuna,
                tier: SyncTier::Slow,
                reason: "missing credentials: set ADZUNA_APP_ID".into(),
            }],
            ..Default::default()
        };
        let svc = service(store, sources);
        assert!(svc.sources().has_tier(SyncTier::Slow));
        assert!(!svc.sources().has_tier(SyncTier::Fast));

        let summary = completed(svc.run_tier(SyncTier::Slow).await);
        assert_eq!(summary.stats.counts[&Source::Adzuna], 0);
        assert!(summary.stats.errors[&Source::Adzuna].contains("ADZUNA_APP_ID"));
    }

    #[tokio::test]
    async fn disabled_sources_are_deactivated_each_run() {
        let store = Arc::new(MemoryJobStore::new());
        let mut old = draft(Source::Lever, "QA Lead", "https://jobs.lever.co/initech/1");
        old.native_id = Some("1".into());
        let record = JobRecord::from_draft(old.clone(), old.external_id(), Utc::now());
        store.upsert(&record).await.unwrap();

        let svc = service(
            store.clone(),
            SourceSet {
                retired: vec![Source::Lever],
                ..Default::default()
            },
        );
        let summary = completed(svc.run_tier(SyncTier::Fast).await);
        assert_eq!(summary.deactivated, 1);
        assert_eq!(store.count(&JobQuery::default(), Utc::now()).await.unwrap(), 0);
        let all = JobQuery {
            include_inactive: true,
            ..Default::default()
        };
        assert_eq!(store.count(&all, Utc::now()).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn eviction_respects_the_retention_boundary() {
        let store = Arc::new(MemoryJobStore::new());
        let now = Utc::now();
        for (title, age) in [("stale", 73), ("fresh", 71), ("exact", 72)] {
            let mut d = draft(Source::Greenhouse, title, &format!("https://g/{title}"));
            d.native_id = Some(title.into());
            let record = JobRecord::from_draft(d.clone(), d.external_id(), now - Duration::hours(age));
            store.upsert(&record).await.unwrap();
        }
        let svc = service(store.clone(), SourceSet::default());

        assert_eq!(svc.evict(now).await.unwrap(), 1);
        assert!(store.get("greenhouse:stale").await.unwrap().is_none());
        assert!(store.get("greenhouse:fresh").await.unwrap().is_some());
        assert!(store.get("greenhouse:exact").await.unwrap().is_some());
    }

    /// Blocks inside `fetch` until released, so a run can be held open.
    struct GateAdapter {
        entered: Arc<Notify>,
        release: Arc<Notify>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl SourceAdapter for GateAdapter {
        fn source(&self) -> Source {
            Source::RemoteOk
        }

        async fn fetch(&self, _http: &HttpFetcher, _ctx: &FetchContext) -> Result<Vec<JobDraft>, SourceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.entered.notify_one();
            self.release.notified().await;
            Ok(vec![draft(Source::RemoteOk, "Gated", "https://r/gated")])
        }
    }

    #[tokio::test]
    async fn overlapping_triggers_for_a_tier_are_coalesced() {
        let entered = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        let gate = Arc::new(GateAdapter {
            entered: entered.clone(),
            release: release.clone(),
            calls: AtomicUsize::new(0),
        });
        let sources = SourceSet {
            adapters: vec![RegisteredAdapter {
                tier: SyncTier::Fast,
                limit: 10,
                adapter: gate.clone(),
            }],
            ..Default::default()
        };
        let store = Arc::new(MemoryJobStore::new());
        let svc = Arc::new(service(store.clone(), sources));

        let first = tokio::spawn({
            let svc = svc.clone();
            async move { svc.run_tier(SyncTier::Fast).await }
        });
        entered.notified().await;

        assert!(matches!(svc.run_tier(SyncTier::Fast).await, SyncOutcome::Coalesced));
        let outcomes = svc.run_now().await;
        assert!(matches!(outcomes[0], (SyncTier::Fast, SyncOutcome::Coalesced)));
        assert!(matches!(outcomes[1], (SyncTier::Slow, SyncOutcome::Completed(_))));

        release.notify_one();
        let summary = completed(first.await.unwrap());
        assert_eq!(summary.merge.inserted, 1);
        assert_eq!(gate.calls.load(Ordering::SeqCst), 1);
        assert_eq!(store.len().await, 1);
    }

    #[test]
    fn registry_entries_without_credentials_become_unavailable() {
        let mut jsearch = SourceConfig::new(Source::JSearch);
        jsearch.tier = SyncTier::Slow;
        jsearch.api_key_env = Some("JOBHUB_TEST_UNSET_SERVICE_KEY".into());
        let mut lever = SourceConfig::new(Source::Lever);
        lever.enabled = false;
        let registry = SourceRegistry {
            sources: vec![SourceConfig::new(Source::RemoteOk), jsearch, lever],
        };

        let set = SourceSet::from_registry(&registry);
        assert_eq!(set.adapters.len(), 1);
        assert_eq!(set.unavailable[0].source, Source::JSearch);
        assert_eq!(set.retired, vec![Source::Lever]);
    }
}
