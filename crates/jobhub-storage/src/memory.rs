//! In-process `JobStore` used by tests and `--memory` runs.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use jobhub_core::{JobRecord, Source};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::store::{JobQuery, JobStore, StoreError};

#[derive(Debug, Default)]
pub struct MemoryJobStore {
    rows: RwLock<HashMap<String, JobRecord>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.rows.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.rows.read().await.is_empty()
    }
}

fn record_matches(record: &JobRecord, query: &JobQuery, now: DateTime<Utc>) -> bool {
    if !query.include_inactive && !record.is_active {
        return false;
    }
    if let Some(source) = query.source {
        if record.source != source {
            return false;
        }
    }
    if let Some(category) = &query.category {
        if !record.categories.iter().any(|c| c == category) {
            return false;
        }
    }
    if let Some(cutoff) = query.fresh_cutoff(now) {
        if record.created_at < cutoff {
            return false;
        }
    }
    if let Some(needle) = query.text_needle() {
        let haystacks = [
            &record.title,
            &record.company,
            &record.location,
            &record.description,
        ];
        if !haystacks
            .iter()
            .any(|field| field.to_lowercase().contains(&needle))
        {
            return false;
        }
    }
    true
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn get(&self, external_id: &str) -> Result<Option<JobRecord>, StoreError> {
        Ok(self.rows.read().await.get(external_id).cloned())
    }

    async fn get_by_id(&self, id: Uuid) -> Result<Option<JobRecord>, StoreError> {
        Ok(self
            .rows
            .read()
            .await
            .values()
            .find(|record| record.id == id)
            .cloned())
    }

    async fn upsert(&self, record: &JobRecord) -> Result<JobRecord, StoreError> {
        let mut rows = self.rows.write().await;
        let stored = match rows.get(&record.external_id) {
            Some(existing) => JobRecord {
                id: existing.id,
                created_at: existing.created_at,
                ..record.clone()
            },
            None => record.clone(),
        };
        rows.insert(stored.external_id.clone(), stored.clone());
        Ok(stored)
    }

    async fn page(&self, query: &JobQuery, now: DateTime<Utc>) -> Result<Vec<JobRecord>, StoreError> {
        let rows = self.rows.read().await;
        let mut matched = rows
            .values()
            .filter(|record| record_matches(record, query, now))
            .cloned()
            .collect::<Vec<_>>();
        matched.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| a.external_id.cmp(&b.external_id))
        });
        Ok(matched
            .into_iter()
            .skip(query.offset.unwrap_or(0))
            .take(query.page_size())
            .collect())
    }

    async fn count(&self, query: &JobQuery, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let rows = self.rows.read().await;
        Ok(rows
            .values()
            .filter(|record| record_matches(record, query, now))
            .count() as u64)
    }

    async fn delete_created_before(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut rows = self.rows.write().await;
        let before = rows.len();
        rows.retain(|_, record| record.created_at >= cutoff);
        Ok((before - rows.len()) as u64)
    }

    async fn set_source_active(&self, source: Source, active: bool) -> Result<u64, StoreError> {
        let mut rows = self.rows.write().await;
        let mut changed = 0;
        for record in rows.values_mut() {
            if record.source == source && record.is_active != active {
                record.is_active = active;
                changed += 1;
            }
        }
        Ok(changed)
    }
}
