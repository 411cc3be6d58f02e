//! RemoteOK public JSON feed.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use jobhub_core::{JobDraft, Source};
use jobhub_storage::HttpFetcher;
use serde::Deserialize;
use serde_json::Value as JsonValue;

use crate::{
    accept, html_to_text, parse_timestamp, positive, snippet, text_or_none, FetchContext, NativeId,
    SourceAdapter, SourceError,
};

pub const DEFAULT_BASE_URL: &str = "https://remoteok.com/api";

#[derive(Debug, Deserialize)]
struct RemoteOkJob {
    id: NativeId,
    #[serde(default)]
    position: String,
    #[serde(default)]
    company: String,
    #[serde(default)]
    location: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    apply_url: Option<String>,
    #[serde(default)]
    date: Option<String>,
    #[serde(default)]
    salary_min: Option<f64>,
    #[serde(default)]
    salary_max: Option<f64>,
}

fn to_draft(job: RemoteOkJob, fetched_at: DateTime<Utc>) -> Option<JobDraft> {
    let plain = html_to_text(&job.description);
    let mut draft = JobDraft::new(Source::RemoteOk, fetched_at);
    draft.native_id = job.id.into_string();
    draft.title = job.position.trim().to_string();
    draft.company = job.company.trim().to_string();
    draft.location = job.location.trim().to_string();
    draft.description = snippet(&plain);
    draft.full_description = job.description;
    draft.url = text_or_none(job.url)
        .or_else(|| job.apply_url.and_then(text_or_none))
        .unwrap_or_default();
    draft.salary_min = positive(job.salary_min);
    draft.salary_max = positive(job.salary_max);
    draft.salary_currency = draft.salary_max.or(draft.salary_min).map(|_| "USD".to_string());
    draft.posted_at = job.date.as_deref().and_then(parse_timestamp);
    accept(draft)
}

/// The feed's first element is a legal notice without an `id`; entries that
/// do not decode as postings are skipped.
pub fn parse_feed(body: &[u8], fetched_at: DateTime<Utc>) -> Result<Vec<JobDraft>, SourceError> {
    let entries: Vec<JsonValue> = crate::decode_json(Source::RemoteOk, body)?;
    Ok(crate::decode_items::<RemoteOkJob>(Source::RemoteOk, entries)
        .into_iter()
        .filter_map(|job| to_draft(job, fetched_at))
        .collect())
}

#[derive(Debug, Clone)]
pub struct RemoteOkAdapter {
    pub base_url: String,
}

#[async_trait]
impl SourceAdapter for RemoteOkAdapter {
    fn source(&self) -> Source {
        Source::RemoteOk
    }

    async fn fetch(&self, http: &HttpFetcher, ctx: &FetchContext) -> Result<Vec<JobDraft>, SourceError> {
        let resp = http
            .fetch_bytes(ctx.run_id, Source::RemoteOk.as_str(), &self.base_url)
            .await
            .map_err(|e| SourceError::new(Source::RemoteOk, e))?;
        let mut drafts = parse_feed(&resp.body, ctx.fetched_at)?;
        drafts.truncate(ctx.limit);
        Ok(drafts)
    }
}
