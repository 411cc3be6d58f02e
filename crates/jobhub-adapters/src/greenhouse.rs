//! Greenhouse job board API, one request per employer board token.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use jobhub_core::{JobDraft, Source};
use jobhub_storage::{HttpFetcher, Url};
use serde::Deserialize;
use serde_json::Value as JsonValue;

use crate::{
    accept, html_to_text, join_segments, keep_partial, parse_rfc3339, snippet, unescape_html, FetchContext,
    NativeId, SourceAdapter, SourceError,
};

pub const DEFAULT_BASE_URL: &str = "https://boards-api.greenhouse.io/v1/boards";

#[derive(Debug, Deserialize)]
struct BoardResponse {
    #[serde(default)]
    jobs: Vec<JsonValue>,
}

#[derive(Debug, Deserialize)]
struct GreenhouseJob {
    id: NativeId,
    #[serde(default)]
    title: String,
    #[serde(default)]
    absolute_url: String,
    #[serde(default)]
    company_name: Option<String>,
    #[serde(default)]
    location: Option<GreenhouseLocation>,
    /// Entity-escaped HTML.
    #[serde(default)]
    content: String,
    #[serde(default)]
    first_published: Option<String>,
    #[serde(default)]
    updated_at: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GreenhouseLocation {
    #[serde(default)]
    name: String,
}

fn to_draft(job: GreenhouseJob, board: &str, fetched_at: DateTime<Utc>) -> Option<JobDraft> {
    let html = unescape_html(&job.content);
    let mut draft = JobDraft::new(Source::Greenhouse, fetched_at);
    draft.native_id = job.id.into_string();
    draft.title = job.title.trim().to_string();
    draft.company = job
        .company_name
        .and_then(crate::text_or_none)
        .unwrap_or_else(|| board.to_string());
    draft.location = job.location.map(|l| l.name.trim().to_string()).unwrap_or_default();
    draft.description = snippet(&html_to_text(&html));
    draft.full_description = html;
    draft.url = job.absolute_url.trim().to_string();
    draft.posted_at = job
        .first_published
        .as_deref()
        .or(job.updated_at.as_deref())
        .and_then(parse_rfc3339);
    accept(draft)
}

pub fn parse_board(body: &[u8], board: &str, fetched_at: DateTime<Utc>) -> Result<Vec<JobDraft>, SourceError> {
    let resp: BoardResponse = crate::decode_json(Source::Greenhouse, body)?;
    Ok(crate::decode_items::<GreenhouseJob>(Source::Greenhouse, resp.jobs)
        .into_iter()
        .filter_map(|job| to_draft(job, board, fetched_at))
        .collect())
}

#[derive(Debug, Clone)]
pub struct GreenhouseAdapter {
    pub boards: Vec<String>,
    pub base_url: String,
}

impl GreenhouseAdapter {
    fn board_url(&self, board: &str) -> Result<Url, SourceError> {
        let mut url = join_segments(Source::Greenhouse, &self.base_url, &[board, "jobs"])?;
        url.set_query(Some("content=true"));
        Ok(url)
    }
}

#[async_trait]
impl SourceAdapter for GreenhouseAdapter {
    fn source(&self) -> Source {
        Source::Greenhouse
    }

    async fn fetch(&self, http: &HttpFetcher, ctx: &FetchContext) -> Result<Vec<JobDraft>, SourceError> {
        let mut collected = Vec::new();
        let mut last_error = None;

        for board in &self.boards {
            if collected.len() >= ctx.limit {
                break;
            }
            let url = self.board_url(board)?;
            let result = match http
                .fetch_bytes(ctx.run_id, Source::Greenhouse.as_str(), url.as_str())
                .await
            {
                Ok(resp) => parse_board(&resp.body, board, ctx.fetched_at),
                Err(err) => Err(SourceError::new(Source::Greenhouse, err)),
            };
            match result {
                Ok(drafts) => collected.extend(drafts),
                Err(err) => {
                    tracing::warn!(board = %board, error = %err, "greenhouse board failed");
                    last_error = Some(err);
                }
            }
        }

        collected.truncate(ctx.limit);
        match last_error {
            Some(err) => keep_partial(Source::Greenhouse, collected, err),
            None => Ok(collected),
        }
    }
}
