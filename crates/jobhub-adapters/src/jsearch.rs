//! JSearch (RapidAPI) paid search API. Paginated, quota-limited.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use jobhub_core::{DescriptionSection, JobDraft, Source};
use jobhub_storage::{HttpFetcher, Url};
use serde::Deserialize;
use serde_json::Value as JsonValue;

use crate::{
    accept, keep_partial, parse_rfc3339, positive, snippet, squash_whitespace, text_or_none,
    FetchContext, SourceAdapter, SourceError, SourceErrorKind,
};

pub const DEFAULT_BASE_URL: &str = "https://jsearch.p.rapidapi.com/search";
const RAPIDAPI_HOST: &str = "jsearch.p.rapidapi.com";

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    data: Vec<JsonValue>,
}

#[derive(Debug, Deserialize)]
struct JSearchJob {
    job_id: String,
    #[serde(default)]
    job_title: String,
    #[serde(default)]
    employer_name: String,
    #[serde(default)]
    job_apply_link: String,
    #[serde(default)]
    job_google_link: Option<String>,
    #[serde(default)]
    job_description: String,
    #[serde(default)]
    job_city: Option<String>,
    #[serde(default)]
    job_state: Option<String>,
    #[serde(default)]
    job_country: Option<String>,
    #[serde(default)]
    job_is_remote: Option<bool>,
    #[serde(default)]
    job_posted_at_datetime_utc: Option<String>,
    #[serde(default)]
    job_min_salary: Option<f64>,
    #[serde(default)]
    job_max_salary: Option<f64>,
    #[serde(default)]
    job_salary_currency: Option<String>,
    #[serde(default)]
    job_highlights: Option<BTreeMap<String, Vec<String>>>,
}

fn location_of(job: &JSearchJob) -> String {
    let parts = [&job.job_city, &job.job_state, &job.job_country]
        .into_iter()
        .filter_map(|p| p.clone().and_then(text_or_none))
        .collect::<Vec<_>>();
    match (parts.is_empty(), job.job_is_remote.unwrap_or(false)) {
        (true, true) => "Remote".to_string(),
        (false, true) => format!("{} (Remote)", parts.join(", ")),
        _ => parts.join(", "),
    }
}

fn to_draft(job: JSearchJob, fetched_at: DateTime<Utc>) -> Option<JobDraft> {
    let location = location_of(&job);
    let sections = job
        .job_highlights
        .unwrap_or_default()
        .into_iter()
        .filter(|(_, items)| !items.is_empty())
        .map(|(heading, items)| DescriptionSection { heading, items })
        .collect();

    let mut draft = JobDraft::new(Source::JSearch, fetched_at);
    draft.native_id = text_or_none(job.job_id);
    draft.title = job.job_title.trim().to_string();
    draft.company = job.employer_name.trim().to_string();
    draft.location = location;
    draft.description = snippet(&squash_whitespace(&job.job_description));
    draft.full_description = job.job_description;
    draft.sections = sections;
    draft.url = text_or_none(job.job_apply_link)
        .or_else(|| job.job_google_link.and_then(text_or_none))
        .unwrap_or_default();
    draft.salary_min = positive(job.job_min_salary);
    draft.salary_max = positive(job.job_max_salary);
    draft.salary_currency = job.job_salary_currency.and_then(text_or_none);
    draft.posted_at = job
        .job_posted_at_datetime_utc
        .as_deref()
        .and_then(parse_rfc3339);
    accept(draft)
}

pub fn parse_page(body: &[u8], fetched_at: DateTime<Utc>) -> Result<Vec<JobDraft>, SourceError> {
    let resp: SearchResponse = crate::decode_json(Source::JSearch, body)?;
    if let Some(status) = resp.status.as_deref() {
        if !status.eq_ignore_ascii_case("ok") {
            return Err(SourceError::decode(
                Source::JSearch,
                format!("api status {status}"),
            ));
        }
    }
    Ok(crate::decode_items::<JSearchJob>(Source::JSearch, resp.data)
        .into_iter()
        .filter_map(|job| to_draft(job, fetched_at))
        .collect())
}

#[derive(Debug, Clone)]
pub struct JSearchAdapter {
    pub api_key: String,
    pub query: String,
    pub max_pages: u32,
    pub base_url: String,
}

impl JSearchAdapter {
    fn page_url(&self, page: u32) -> Result<Url, SourceError> {
        let page = page.to_string();
        Url::parse_with_params(
            &self.base_url,
            &[
                ("query", self.query.as_str()),
                ("page", page.as_str()),
                ("num_pages", "1"),
            ],
        )
        .map_err(|e| SourceError::new(Source::JSearch, SourceErrorKind::Config(e.to_string())))
    }
}

#[async_trait]
impl SourceAdapter for JSearchAdapter {
    fn source(&self) -> Source {
        Source::JSearch
    }

    async fn fetch(&self, http: &HttpFetcher, ctx: &FetchContext) -> Result<Vec<JobDraft>, SourceError> {
        let headers = [
            ("X-RapidAPI-Key", self.api_key.as_str()),
            ("X-RapidAPI-Host", RAPIDAPI_HOST),
        ];
        let mut collected = Vec::new();

        for page in 1..=self.max_pages {
            if collected.len() >= ctx.limit {
                break;
            }
            let url = self.page_url(page)?;
            let page_result = match http
                .fetch_with_headers(ctx.run_id, Source::JSearch.as_str(), url.as_str(), &headers)
                .await
            {
                Ok(resp) => parse_page(&resp.body, ctx.fetched_at),
                Err(err) => Err(SourceError::new(Source::JSearch, err)),
            };
            match page_result {
                Ok(drafts) if drafts.is_empty() => break,
                Ok(drafts) => collected.extend(drafts),
                Err(err) => return keep_partial(Source::JSearch, collected, err),
            }
        }

        collected.truncate(ctx.limit);
        Ok(collected)
    }
}
