//! Remotive public remote-jobs API.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use jobhub_core::{JobDraft, Source};
use jobhub_storage::{HttpFetcher, Url};
use serde::Deserialize;
use serde_json::Value as JsonValue;

use crate::{
    accept, html_to_text, parse_timestamp, snippet, FetchContext, NativeId, SourceAdapter,
    SourceError, SourceErrorKind,
};

pub const DEFAULT_BASE_URL: &str = "https://remotive.com/api/remote-jobs";

#[derive(Debug, Deserialize)]
struct RemotiveResponse {
    #[serde(default)]
    jobs: Vec<JsonValue>,
}

#[derive(Debug, Deserialize)]
struct RemotiveJob {
    id: NativeId,
    #[serde(default)]
    url: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    company_name: String,
    #[serde(default)]
    candidate_required_location: String,
    #[serde(default)]
    publication_date: Option<String>,
    #[serde(default)]
    description: String,
}

fn to_draft(job: RemotiveJob, fetched_at: DateTime<Utc>) -> Option<JobDraft> {
    let mut draft = JobDraft::new(Source::Remotive, fetched_at);
    draft.native_id = job.id.into_string();
    draft.title = job.title.trim().to_string();
    draft.company = job.company_name.trim().to_string();
    draft.location = job.candidate_required_location.trim().to_string();
    draft.description = snippet(&html_to_text(&job.description));
    draft.full_description = job.description;
    draft.url = job.url.trim().to_string();
    draft.posted_at = job.publication_date.as_deref().and_then(parse_timestamp);
    accept(draft)
}

pub fn parse_jobs(body: &[u8], fetched_at: DateTime<Utc>) -> Result<Vec<JobDraft>, SourceError> {
    let resp: RemotiveResponse = crate::decode_json(Source::Remotive, body)?;
    Ok(crate::decode_items::<RemotiveJob>(Source::Remotive, resp.jobs)
        .into_iter()
        .filter_map(|job| to_draft(job, fetched_at))
        .collect())
}

#[derive(Debug, Clone)]
pub struct RemotiveAdapter {
    pub query: Option<String>,
    pub base_url: String,
}

impl RemotiveAdapter {
    fn request_url(&self, limit: usize) -> Result<Url, SourceError> {
        let mut params = vec![("limit".to_string(), limit.to_string())];
        if let Some(query) = &self.query {
            params.push(("search".to_string(), query.clone()));
        }
        Url::parse_with_params(&self.base_url, &params)
            .map_err(|e| SourceError::new(Source::Remotive, SourceErrorKind::Config(e.to_string())))
    }
}

#[async_trait]
impl SourceAdapter for RemotiveAdapter {
    fn source(&self) -> Source {
        Source::Remotive
    }

    async fn fetch(&self, http: &HttpFetcher, ctx: &FetchContext) -> Result<Vec<JobDraft>, SourceError> {
        let url = self.request_url(ctx.limit)?;
        let resp = http
            .fetch_bytes(ctx.run_id, Source::Remotive.as_str(), url.as_str())
            .await
            .map_err(|e| SourceError::new(Source::Remotive, e))?;
        let mut drafts = parse_jobs(&resp.body, ctx.fetched_at)?;
        drafts.truncate(ctx.limit);
        Ok(drafts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn parses_jobs_with_naive_publication_dates() {
        let body = r#"{
            "job-count": 1,
            "jobs": [{
                "id": 1904321,
                "url": "https://remotive.com/remote-jobs/software-dev/platform-engineer-1904321",
                "title": "Platform Engineer",
                "company_name": "Orbit Labs",
                "category": "Software Development",
                "job_type": "full_time",
                "publication_date": "2026-02-27T14:05:11",
                "candidate_required_location": "Europe",
                "salary": "",
                "description": "<h2>About</h2><p>Kubernetes all day.</p>"
            }]
        }"#;
        let drafts = parse_jobs(body.as_bytes(), Utc::now()).unwrap();
        assert_eq!(drafts.len(), 1);
        let job = &drafts[0];
        assert_eq!(job.native_id.as_deref(), Some("1904321"));
        assert_eq!(job.company, "Orbit Labs");
        assert_eq!(job.location, "Europe");
        assert_eq!(job.description, "About Kubernetes all day.");
        assert_eq!(
            job.posted_at,
            Some(Utc.with_ymd_and_hms(2026, 2, 27, 14, 5, 11).unwrap())
        );
    }

    #[test]
    fn job_with_unusable_id_is_skipped() {
        let body = r#"{"jobs": [
            {"id": {"nested": true}, "title": "Odd", "url": "https://remotive.com/remote-jobs/odd"},
            {"id": 5, "title": "Writer", "url": "https://remotive.com/remote-jobs/writer-5"}
        ]}"#;
        let drafts = parse_jobs(body.as_bytes(), Utc::now()).unwrap();
        assert_eq!(drafts.len(), 1);
        assert_eq!(drafts[0].native_id.as_deref(), Some("5"));
    }

    #[test]
    fn request_url_encodes_search() {
        let adapter = RemotiveAdapter {
            query: Some("rust & go".into()),
            base_url: DEFAULT_BASE_URL.into(),
        };
        let url = adapter.request_url(25).unwrap();
        assert_eq!(
            url.as_str(),
            "https://remotive.com/api/remote-jobs?limit=25&search=rust+%26+go"
        );
    }
}
