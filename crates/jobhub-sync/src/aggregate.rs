//! Fan out to every enabled adapter concurrently and collect raw candidates.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use jobhub_adapters::{FetchContext, SourceAdapter, SourceError, SourceErrorKind};
use jobhub_core::{JobDraft, Source};
use jobhub_storage::HttpFetcher;
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

/// One adapter scheduled for this tick, with its item cap.
pub struct SourceRun {
    pub adapter: Arc<dyn SourceAdapter>,
    pub limit: usize,
}

#[derive(Debug, Clone, Copy)]
pub struct AggregateOptions {
    pub adapter_timeout: Duration,
    pub max_concurrent_fetches: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AggregateStats {
    pub counts: BTreeMap<Source, usize>,
    pub errors: BTreeMap<Source, String>,
    pub total_fetched: usize,
}

impl AggregateStats {
    pub fn record(&mut self, source: Source, result: &Result<Vec<JobDraft>, SourceError>) {
        match result {
            Ok(drafts) => {
                self.counts.insert(source, drafts.len());
                self.total_fetched += drafts.len();
            }
            Err(err) => {
                self.counts.insert(source, 0);
                self.errors.insert(source, err.kind.to_string());
            }
        }
    }
}

async fn fetch_one(
    run: SourceRun,
    http: Arc<HttpFetcher>,
    permits: Arc<Semaphore>,
    ctx: FetchContext,
    timeout: Duration,
) -> Result<Vec<JobDraft>, SourceError> {
    let source = run.adapter.source();
    let _permit = permits
        .acquire_owned()
        .await
        .map_err(|e| SourceError::new(source, SourceErrorKind::TaskFailed(e.to_string())))?;
    let ctx = FetchContext {
        limit: run.limit,
        ..ctx
    };
    match tokio::time::timeout(timeout, run.adapter.fetch(&http, &ctx)).await {
        Ok(Ok(mut drafts)) => {
            drafts.truncate(run.limit);
            Ok(drafts)
        }
        Ok(Err(err)) => Err(err),
        Err(_) => Err(SourceError::new(source, SourceErrorKind::Timeout(timeout))),
    }
}

/// Run every adapter in its own task and union their output.
///
/// Never fails: a failed, timed-out or panicking adapter contributes zero
/// items and an entry in `stats.errors`. Output keeps the order of `runs`,
/// so a stable registry order gives a stable candidate order.
pub async fn aggregate(
    http: Arc<HttpFetcher>,
    runs: Vec<SourceRun>,
    run_id: Uuid,
    fetched_at: DateTime<Utc>,
    options: AggregateOptions,
) -> (Vec<JobDraft>, AggregateStats) {
    let permits = Arc::new(Semaphore::new(options.max_concurrent_fetches.max(1)));
    let ctx = FetchContext {
        run_id,
        fetched_at,
        limit: 0,
    };

    let handles: Vec<(Source, JoinHandle<Result<Vec<JobDraft>, SourceError>>)> = runs
        .into_iter()
        .map(|run| {
            let source = run.adapter.source();
            let handle = tokio::spawn(fetch_one(
                run,
                http.clone(),
                permits.clone(),
                ctx.clone(),
                options.adapter_timeout,
            ));
            (source, handle)
        })
        .collect();

    let mut candidates = Vec::new();
    let mut stats = AggregateStats::default();
    for (source, handle) in handles {
        let result = handle.await.unwrap_or_else(|join_err| {
            Err(SourceError::new(
                source,
                SourceErrorKind::TaskFailed(join_err.to_string()),
            ))
        });
        stats.record(source, &result);
        match result {
            Ok(drafts) => {
                info!(run_id = %run_id, source = %source, fetched = drafts.len(), "source fetched");
                candidates.extend(drafts);
            }
            Err(err) => warn!(run_id = %run_id, source = %source, error = %err, "source failed"),
        }
    }

    (candidates, stats)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    pub(crate) enum Behavior {
        Items(Vec<JobDraft>),
        Fail,
        Hang,
        Panic,
    }

    pub(crate) struct FakeAdapter {
        pub source: Source,
        pub behavior: Behavior,
        pub calls: AtomicUsize,
    }

    impl FakeAdapter {
        pub(crate) fn new(source: Source, behavior: Behavior) -> Self {
            Self {
                source,
                behavior,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl SourceAdapter for FakeAdapter {
        fn source(&self) -> Source {
            self.source
        }

        async fn fetch(&self, _http: &HttpFetcher, _ctx: &FetchContext) -> Result<Vec<JobDraft>, SourceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.behavior {
                Behavior::Items(items) => Ok(items.clone()),
                Behavior::Fail => Err(SourceError::decode(self.source, "unexpected end of input")),
                Behavior::Hang => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Ok(Vec::new())
                }
                Behavior::Panic => panic!("adapter blew up"),
            }
        }
    }

    pub(crate) fn draft(source: Source, title: &str, url: &str) -> JobDraft {
        let mut draft = JobDraft::new(source, Utc::now());
        draft.title = title.to_string();
        draft.company = "Acme".to_string();
        draft.url = url.to_string();
        draft
    }

    pub(crate) fn http() -> Arc<HttpFetcher> {
        Arc::new(HttpFetcher::new(Default::default()).unwrap())
    }

    fn options() -> AggregateOptions {
        AggregateOptions {
            adapter_timeout: Duration::from_millis(200),
            max_concurrent_fetches: 2,
        }
    }

    fn run(adapter: FakeAdapter, limit: usize) -> SourceRun {
        SourceRun {
            adapter: Arc::new(adapter),
            limit,
        }
    }

    #[tokio::test]
    async fn failing_source_does_not_affect_the_others() {
        let a = FakeAdapter::new(
            Source::RemoteOk,
            Behavior::Items(vec![
                draft(Source::RemoteOk, "A1", "https://a/1"),
                draft(Source::RemoteOk, "A2", "https://a/2"),
            ]),
        );
        let b = FakeAdapter::new(Source::Remotive, Behavior::Fail);
        let c = FakeAdapter::new(
            Source::Lever,
            Behavior::Items(vec![draft(Source::Lever, "C1", "https://c/1")]),
        );

        let (candidates, stats) = aggregate(
            http(),
            vec![run(a, 10), run(b, 10), run(c, 10)],
            Uuid::new_v4(),
            Utc::now(),
            options(),
        )
        .await;

        let titles: Vec<&str> = candidates.iter().map(|d| d.title.as_str()).collect();
        assert_eq!(titles, vec!["A1", "A2", "C1"]);
        assert_eq!(stats.total_fetched, 3);
        assert_eq!(stats.counts[&Source::Remotive], 0);
        assert_eq!(stats.errors.len(), 1);
        assert!(stats.errors[&Source::Remotive].contains("malformed response"));
    }

    #[tokio::test]
    async fn hung_adapter_times_out_as_source_error() {
        let slow = FakeAdapter::new(Source::Adzuna, Behavior::Hang);
        let fast = FakeAdapter::new(
            Source::Greenhouse,
            Behavior::Items(vec![draft(Source::Greenhouse, "G", "https://g/1")]),
        );

        let (candidates, stats) = aggregate(
            http(),
            vec![run(slow, 10), run(fast, 10)],
            Uuid::new_v4(),
            Utc::now(),
            options(),
        )
        .await;

        assert_eq!(candidates.len(), 1);
        assert!(stats.errors[&Source::Adzuna].starts_with("timed out"));
    }

    #[tokio::test]
    async fn panicking_adapter_is_recorded_not_propagated() {
        let boom = FakeAdapter::new(Source::JSearch, Behavior::Panic);
        let (candidates, stats) =
            aggregate(http(), vec![run(boom, 10)], Uuid::new_v4(), Utc::now(), options()).await;
        assert!(candidates.is_empty());
        assert!(stats.errors[&Source::JSearch].starts_with("fetch task failed"));
    }

    #[tokio::test]
    async fn per_source_limit_is_enforced() {
        let many = FakeAdapter::new(
            Source::RemoteOk,
            Behavior::Items(
                (0..5)
                    .map(|i| draft(Source::RemoteOk, &format!("T{i}"), &format!("https://r/{i}")))
                    .collect(),
            ),
        );
        let (candidates, stats) =
            aggregate(http(), vec![run(many, 3)], Uuid::new_v4(), Utc::now(), options()).await;
        assert_eq!(candidates.len(), 3);
        assert_eq!(stats.counts[&Source::RemoteOk], 3);
    }
}
