//! Postgres-backed `JobStore`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use jobhub_core::{DescriptionSection, JobRecord, Source};
use sqlx::postgres::PgPoolOptions;
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

use crate::store::{JobQuery, JobStore, StoreError};

const COLUMNS: &str = "id, external_id, source, title, company, location, description, \
     full_description, sections, url, categories, is_active, salary_min, salary_max, \
     salary_currency, posted_at, created_at, updated_at";

#[derive(Debug, sqlx::FromRow)]
struct JobRow {
    id: Uuid,
    external_id: String,
    source: String,
    title: String,
    company: String,
    location: String,
    description: String,
    full_description: String,
    sections: Json<Vec<DescriptionSection>>,
    url: String,
    categories: Vec<String>,
    is_active: bool,
    salary_min: Option<f64>,
    salary_max: Option<f64>,
    salary_currency: Option<String>,
    posted_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<JobRow> for JobRecord {
    type Error = StoreError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        let source = row.source.parse::<Source>().map_err(|e| StoreError::Decode {
            external_id: row.external_id.clone(),
            reason: e.to_string(),
        })?;
        Ok(JobRecord {
            id: row.id,
            external_id: row.external_id,
            source,
            title: row.title,
            company: row.company,
            location: row.location,
            description: row.description,
            full_description: row.full_description,
            sections: row.sections.0,
            url: row.url,
            categories: row.categories,
            is_active: row.is_active,
            salary_min: row.salary_min,
            salary_max: row.salary_max,
            salary_currency: row.salary_currency,
            posted_at: row.posted_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// Escape LIKE metacharacters so user text matches literally.
fn like_pattern(needle: &str) -> String {
    let escaped = needle
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{escaped}%")
}

/// LIMIT and OFFSET are BIGINT; larger requests saturate instead of wrapping.
fn clamp_i64(value: usize) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn push_filters(builder: &mut QueryBuilder<'_, Postgres>, query: &JobQuery, now: DateTime<Utc>) {
    builder.push(" WHERE TRUE");
    if !query.include_inactive {
        builder.push(" AND is_active");
    }
    if let Some(source) = query.source {
        builder.push(" AND source = ").push_bind(source.as_str());
    }
    if let Some(category) = &query.category {
        builder
            .push(" AND categories @> ARRAY[")
            .push_bind(category.clone())
            .push("]::TEXT[]");
    }
    if let Some(cutoff) = query.fresh_cutoff(now) {
        builder.push(" AND created_at >= ").push_bind(cutoff);
    }
    if let Some(needle) = query.text_needle() {
        let pattern = like_pattern(&needle);
        builder.push(" AND (");
        for (i, column) in ["title", "company", "location", "description"].iter().enumerate() {
            if i > 0 {
                builder.push(" OR ");
            }
            builder
                .push(*column)
                .push(" ILIKE ")
                .push_bind(pattern.clone());
        }
        builder.push(")");
    }
}

#[derive(Debug, Clone)]
pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect(database_url)
            .await?;
        Ok(Self::new(pool))
    }

    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn get(&self, external_id: &str) -> Result<Option<JobRecord>, StoreError> {
        let row = sqlx::query_as::<_, JobRow>(&format!(
            "SELECT {COLUMNS} FROM job_records WHERE external_id = $1"
        ))
        .bind(external_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(JobRecord::try_from).transpose()
    }

    async fn get_by_id(&self, id: Uuid) -> Result<Option<JobRecord>, StoreError> {
        let row = sqlx::query_as::<_, JobRow>(&format!(
            "SELECT {COLUMNS} FROM job_records WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(JobRecord::try_from).transpose()
    }

    async fn upsert(&self, record: &JobRecord) -> Result<JobRecord, StoreError> {
        let row = sqlx::query_as::<_, JobRow>(&format!(
            r#"
            INSERT INTO job_records ({COLUMNS})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)
            ON CONFLICT (external_id) DO UPDATE SET
                source = EXCLUDED.source,
                title = EXCLUDED.title,
                company = EXCLUDED.company,
                location = EXCLUDED.location,
                description = EXCLUDED.description,
                full_description = EXCLUDED.full_description,
                sections = EXCLUDED.sections,
                url = EXCLUDED.url,
                categories = EXCLUDED.categories,
                is_active = EXCLUDED.is_active,
                salary_min = EXCLUDED.salary_min,
                salary_max = EXCLUDED.salary_max,
                salary_currency = EXCLUDED.salary_currency,
                posted_at = EXCLUDED.posted_at,
                updated_at = EXCLUDED.updated_at
            RETURNING {COLUMNS}
            "#
        ))
        .bind(record.id)
        .bind(&record.external_id)
        .bind(record.source.as_str())
        .bind(&record.title)
        .bind(&record.company)
        .bind(&record.location)
        .bind(&record.description)
        .bind(&record.full_description)
        .bind(Json(&record.sections))
        .bind(&record.url)
        .bind(record.categories.as_slice())
        .bind(record.is_active)
        .bind(record.salary_min)
        .bind(record.salary_max)
        .bind(record.salary_currency.as_deref())
        .bind(record.posted_at)
        .bind(record.created_at)
        .bind(record.updated_at)
        .fetch_one(&self.pool)
        .await?;
        JobRecord::try_from(row)
    }

    async fn page(&self, query: &JobQuery, now: DateTime<Utc>) -> Result<Vec<JobRecord>, StoreError> {
        let mut builder = QueryBuilder::<Postgres>::new(format!("SELECT {COLUMNS} FROM job_records"));
        push_filters(&mut builder, query, now);
        builder
            .push(" ORDER BY created_at DESC, external_id ASC LIMIT ")
            .push_bind(clamp_i64(query.page_size()))
            .push(" OFFSET ")
            .push_bind(clamp_i64(query.offset.unwrap_or(0)));

        let rows = builder
            .build_query_as::<JobRow>()
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(JobRecord::try_from).collect()
    }

    async fn count(&self, query: &JobQuery, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut builder = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM job_records");
        push_filters(&mut builder, query, now);
        let count = builder
            .build_query_scalar::<i64>()
            .fetch_one(&self.pool)
            .await?;
        Ok(count.max(0) as u64)
    }

    async fn delete_created_before(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM job_records WHERE created_at < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn set_source_active(&self, source: Source, active: bool) -> Result<u64, StoreError> {
        let result = sqlx::query(
            "UPDATE job_records SET is_active = $1 WHERE source = $2 AND is_active <> $1",
        )
        .bind(active)
        .bind(source.as_str())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}
