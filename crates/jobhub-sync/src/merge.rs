//! Reconcile unique candidates with stored records.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use jobhub_core::{description_len, JobDraft, JobRecord};
use jobhub_storage::{JobStore, StoreError};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum MergeError {
    #[error("store write failed for {external_id}: {source}")]
    Store {
        external_id: String,
        #[source]
        source: StoreError,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MergeAction {
    Inserted,
    Updated,
    /// Updated, but the stored description outranked the candidate's.
    PreservedDescription,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MergeReport {
    pub stored: usize,
    pub inserted: usize,
    pub updated: usize,
    pub preserved_descriptions: usize,
    pub failed: usize,
}

/// Whether the stored description should survive a merge with `candidate`.
pub fn keeps_existing_description(existing: &JobRecord, candidate: &JobDraft, threshold: usize) -> bool {
    description_len(&existing.full_description) > threshold
        && description_len(&candidate.full_description) < threshold
}

/// Apply `candidate` over `existing`: identity and first-seen time are kept,
/// everything else comes from the candidate except a rich description.
pub fn merge_into(existing: JobRecord, candidate: JobDraft, threshold: usize, now: DateTime<Utc>) -> (JobRecord, MergeAction) {
    let preserve = keeps_existing_description(&existing, &candidate, threshold);
    let (description, full_description, sections, action) = if preserve {
        (
            existing.description,
            existing.full_description,
            existing.sections,
            MergeAction::PreservedDescription,
        )
    } else {
        (
            candidate.description,
            candidate.full_description,
            candidate.sections,
            MergeAction::Updated,
        )
    };

    let record = JobRecord {
        id: existing.id,
        external_id: existing.external_id,
        source: candidate.source,
        title: candidate.title,
        company: candidate.company,
        location: candidate.location,
        description,
        full_description,
        sections,
        url: candidate.url,
        categories: candidate.categories,
        is_active: candidate.is_active,
        salary_min: candidate.salary_min,
        salary_max: candidate.salary_max,
        salary_currency: candidate.salary_currency,
        posted_at: candidate.posted_at.or(existing.posted_at),
        created_at: existing.created_at,
        updated_at: now,
    };
    (record, action)
}

pub struct MergeEngine {
    store: Arc<dyn JobStore>,
    richness_threshold: usize,
}

impl MergeEngine {
    pub fn new(store: Arc<dyn JobStore>, richness_threshold: usize) -> Self {
        Self {
            store,
            richness_threshold,
        }
    }

    pub async fn upsert(&self, candidate: JobDraft, now: DateTime<Utc>) -> Result<(JobRecord, MergeAction), MergeError> {
        let external_id = candidate.external_id();
        let store_err = |source| MergeError::Store {
            external_id: external_id.clone(),
            source,
        };

        let existing = self.store.get(&external_id).await.map_err(store_err)?;
        let (record, action) = match existing {
            None => (
                JobRecord::from_draft(candidate, external_id.clone(), now),
                MergeAction::Inserted,
            ),
            Some(existing) => merge_into(existing, candidate, self.richness_threshold, now),
        };

        let stored = self.store.upsert(&record).await.map_err(store_err)?;
        debug!(external_id = %stored.external_id, ?action, "merged record");
        Ok((stored, action))
    }

    /// Upsert every candidate; one failure is logged and counted, never fatal.
    pub async fn merge_all(&self, candidates: Vec<JobDraft>, now: DateTime<Utc>) -> MergeReport {
        let mut report = MergeReport::default();
        for candidate in candidates {
            match self.upsert(candidate, now).await {
                Ok((_, action)) => {
                    report.stored += 1;
                    match action {
                        MergeAction::Inserted => report.inserted += 1,
                        MergeAction::Updated => report.updated += 1,
                        MergeAction::PreservedDescription => {
                            report.updated += 1;
                            report.preserved_descriptions += 1;
                        }
                    }
                }
                Err(err) => {
                    warn!(error = %err, "merge failed; continuing with remaining candidates");
                    report.failed += 1;
                }
            }
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::{Duration, TimeZone};
    use jobhub_core::{DescriptionSection, Source};
    use jobhub_storage::{JobQuery, MemoryJobStore};
    use uuid::Uuid;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).single().unwrap()
    }

    fn candidate(full_len: usize, location: &str) -> JobDraft {
        let mut draft = JobDraft::new(Source::Greenhouse, t0());
        draft.native_id = Some("777".into());
        draft.title = "Platform Engineer".into();
        draft.company = "Acme".into();
        draft.url = "https://boards.greenhouse.io/acme/jobs/777".into();
        draft.location = location.into();
        draft.full_description = "x".repeat(full_len);
        draft.description = format!("snippet-{full_len}");
        draft.sections = vec![DescriptionSection {
            heading: format!("len {full_len}"),
            items: vec!["item".into()],
        }];
        draft
    }

    fn engine(store: Arc<MemoryJobStore>) -> MergeEngine {
        MergeEngine::new(store, 200)
    }

    #[tokio::test]
    async fn thin_candidate_keeps_rich_description() {
        let store = Arc::new(MemoryJobStore::new());
        let engine = engine(store.clone());
        let (first, action) = engine.upsert(candidate(500, "Remote"), t0()).await.unwrap();
        assert_eq!(action, MergeAction::Inserted);

        let later = t0() + Duration::hours(1);
        let mut thin = candidate(50, "Berlin");
        thin.categories = vec!["startup".into()];
        let (merged, action) = engine.upsert(thin, later).await.unwrap();

        assert_eq!(action, MergeAction::PreservedDescription);
        assert_eq!(merged.full_description.len(), 500);
        assert_eq!(merged.description, "snippet-500");
        assert_eq!(merged.sections[0].heading, "len 500");
        assert_eq!(merged.location, "Berlin");
        assert_eq!(merged.categories, vec!["startup"]);
        assert_eq!(merged.updated_at, later);
        assert_eq!(merged.created_at, first.created_at);
        assert_eq!(merged.id, first.id);
    }

    #[tokio::test]
    async fn rich_candidate_overwrites_thin_description() {
        let store = Arc::new(MemoryJobStore::new());
        let engine = engine(store.clone());
        engine.upsert(candidate(50, "Remote"), t0()).await.unwrap();
        let (merged, action) = engine
            .upsert(candidate(500, "Remote"), t0() + Duration::minutes(10))
            .await
            .unwrap();
        assert_eq!(action, MergeAction::Updated);
        assert_eq!(merged.full_description.len(), 500);
        assert_eq!(merged.description, "snippet-500");
    }

    #[test]
    fn threshold_boundaries_are_strict() {
        let fresh = JobRecord::from_draft(candidate(200, ""), "greenhouse:777".into(), t0());
        assert!(!keeps_existing_description(&fresh, &candidate(10, ""), 200));

        let rich = JobRecord::from_draft(candidate(201, ""), "greenhouse:777".into(), t0());
        assert!(keeps_existing_description(&rich, &candidate(199, ""), 200));
        assert!(!keeps_existing_description(&rich, &candidate(200, ""), 200));
    }

    #[tokio::test]
    async fn merging_the_same_batch_twice_is_stable() {
        let store = Arc::new(MemoryJobStore::new());
        let engine = engine(store.clone());
        let mut other = candidate(300, "NYC");
        other.native_id = None;
        other.title = "Data Engineer".into();
        let batch = vec![candidate(500, "Remote"), other];

        let first = engine.merge_all(batch.clone(), t0()).await;
        assert_eq!(first.inserted, 2);
        let snapshot = store.page(&JobQuery::default(), t0()).await.unwrap();

        let second = engine.merge_all(batch, t0()).await;
        assert_eq!(second.updated, 2);
        assert_eq!(second.inserted, 0);
        assert_eq!(store.page(&JobQuery::default(), t0()).await.unwrap(), snapshot);
    }

    struct BrokenStore;

    #[async_trait]
    impl JobStore for BrokenStore {
        async fn ping(&self) -> Result<(), StoreError> {
            Err(StoreError::Database(sqlx_pool_closed()))
        }
        async fn get(&self, _: &str) -> Result<Option<JobRecord>, StoreError> {
            Err(StoreError::Database(sqlx_pool_closed()))
        }
        async fn get_by_id(&self, _: Uuid) -> Result<Option<JobRecord>, StoreError> {
            Ok(None)
        }
        async fn upsert(&self, record: &JobRecord) -> Result<JobRecord, StoreError> {
            Ok(record.clone())
        }
        async fn page(&self, _: &JobQuery, _: DateTime<Utc>) -> Result<Vec<JobRecord>, StoreError> {
            Ok(Vec::new())
        }
        async fn count(&self, _: &JobQuery, _: DateTime<Utc>) -> Result<u64, StoreError> {
            Ok(0)
        }
        async fn delete_created_before(&self, _: DateTime<Utc>) -> Result<u64, StoreError> {
            Ok(0)
        }
        async fn set_source_active(&self, _: Source, _: bool) -> Result<u64, StoreError> {
            Ok(0)
        }
    }

    fn sqlx_pool_closed() -> jobhub_storage::sqlx::Error {
        jobhub_storage::sqlx::Error::PoolClosed
    }

    #[tokio::test]
    async fn store_failures_are_counted_not_fatal() {
        let engine = MergeEngine::new(Arc::new(BrokenStore), 200);
        let report = engine
            .merge_all(vec![candidate(10, ""), candidate(20, "")], t0())
            .await;
        assert_eq!(report.failed, 2);
        assert_eq!(report.stored, 0);
    }
}
