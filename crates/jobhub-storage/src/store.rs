//! The `JobStore` contract shared by the sync pipeline and any read-side caller.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use jobhub_core::{JobRecord, Source};
use thiserror::Error;
use uuid::Uuid;

pub const DEFAULT_PAGE_SIZE: usize = 50;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration failed: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error("corrupt row {external_id}: {reason}")]
    Decode { external_id: String, reason: String },
}

/// Filters for listing and counting records.
#[derive(Debug, Clone, Default)]
pub struct JobQuery {
    /// Case-insensitive substring over title, company, location and description.
    pub text: Option<String>,
    pub category: Option<String>,
    pub source: Option<Source>,
    /// Only records first seen within this window of `now`.
    pub fresh_within: Option<Duration>,
    pub include_inactive: bool,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl JobQuery {
    pub fn text_needle(&self) -> Option<String> {
        self.text
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_lowercase)
    }

    pub fn fresh_cutoff(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.fresh_within.map(|window| now - window)
    }

    pub fn page_size(&self) -> usize {
        self.limit.unwrap_or(DEFAULT_PAGE_SIZE)
    }
}

/// Persistent table of job records keyed by `external_id`.
///
/// `upsert` is atomic insert-or-update on `external_id`, so concurrent
/// upserts of different keys need no application-level lock. `created_at`
/// on an existing row is never overwritten.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn ping(&self) -> Result<(), StoreError>;

    async fn get(&self, external_id: &str) -> Result<Option<JobRecord>, StoreError>;

    async fn get_by_id(&self, id: Uuid) -> Result<Option<JobRecord>, StoreError>;

    async fn upsert(&self, record: &JobRecord) -> Result<JobRecord, StoreError>;

    /// Most recently discovered first, ties broken by `external_id`.
    async fn page(&self, query: &JobQuery, now: DateTime<Utc>) -> Result<Vec<JobRecord>, StoreError>;

    async fn count(&self, query: &JobQuery, now: DateTime<Utc>) -> Result<u64, StoreError>;

    /// Hard-delete every record with `created_at < cutoff`; returns the count.
    async fn delete_created_before(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError>;

    /// Flip `is_active` for every record of `source`; returns rows changed.
    async fn set_source_active(&self, source: Source, active: bool) -> Result<u64, StoreError>;
}
