//! Adzuna paid search API. Returns teaser descriptions only.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use jobhub_core::{JobDraft, Source};
use jobhub_storage::{HttpFetcher, Url};
use serde::Deserialize;
use serde_json::Value as JsonValue;

use crate::{
    accept, join_segments, keep_partial, parse_rfc3339, positive, snippet, squash_whitespace,
    FetchContext, NativeId, SourceAdapter, SourceError,
};

pub const DEFAULT_BASE_URL: &str = "https://api.adzuna.com/v1/api/jobs";
const RESULTS_PER_PAGE: usize = 50;

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<JsonValue>,
}

#[derive(Debug, Deserialize)]
struct AdzunaJob {
    id: NativeId,
    #[serde(default)]
    title: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    redirect_url: String,
    #[serde(default)]
    created: Option<String>,
    #[serde(default)]
    company: Option<DisplayName>,
    #[serde(default)]
    location: Option<DisplayName>,
    #[serde(default)]
    salary_min: Option<f64>,
    #[serde(default)]
    salary_max: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct DisplayName {
    #[serde(default)]
    display_name: String,
}

fn currency_for(country: &str) -> &'static str {
    match country {
        "gb" => "GBP",
        "de" | "fr" | "nl" | "it" | "es" | "at" | "be" => "EUR",
        "ca" => "CAD",
        "au" => "AUD",
        "in" => "INR",
        _ => "USD",
    }
}

fn to_draft(job: AdzunaJob, country: &str, fetched_at: DateTime<Utc>) -> Option<JobDraft> {
    // Adzuna titles and teasers carry <strong> highlight markup.
    let teaser = squash_whitespace(&crate::html_to_text(&job.description));
    let mut draft = JobDraft::new(Source::Adzuna, fetched_at);
    draft.native_id = job.id.into_string();
    draft.title = crate::html_to_text(&job.title);
    draft.company = job.company.map(|c| c.display_name.trim().to_string()).unwrap_or_default();
    draft.location = job.location.map(|l| l.display_name.trim().to_string()).unwrap_or_default();
    draft.description = snippet(&teaser);
    draft.full_description = teaser;
    draft.url = job.redirect_url.trim().to_string();
    draft.salary_min = positive(job.salary_min);
    draft.salary_max = positive(job.salary_max);
    draft.salary_currency = draft
        .salary_max
        .or(draft.salary_min)
        .map(|_| currency_for(country).to_string());
    draft.posted_at = job.created.as_deref().and_then(parse_rfc3339);
    accept(draft)
}

pub fn parse_page(body: &[u8], country: &str, fetched_at: DateTime<Utc>) -> Result<Vec<JobDraft>, SourceError> {
    let resp: SearchResponse = crate::decode_json(Source::Adzuna, body)?;
    Ok(crate::decode_items::<AdzunaJob>(Source::Adzuna, resp.results)
        .into_iter()
        .filter_map(|job| to_draft(job, country, fetched_at))
        .collect())
}

#[derive(Debug, Clone)]
pub struct AdzunaAdapter {
    pub app_id: String,
    pub app_key: String,
    pub country: String,
    pub query: Option<String>,
    pub max_pages: u32,
    pub base_url: String,
}

impl AdzunaAdapter {
    fn page_url(&self, page: u32) -> Result<Url, SourceError> {
        let page = page.to_string();
        let mut url = join_segments(Source::Adzuna, &self.base_url, &[self.country.as_str(), "search", page.as_str()])?;
        let mut params = vec![
            ("app_id", self.app_id.clone()),
            ("app_key", self.app_key.clone()),
            ("results_per_page", RESULTS_PER_PAGE.to_string()),
            ("content-type", "application/json".to_string()),
        ];
        if let Some(query) = &self.query {
            params.push(("what", query.clone()));
        }
        url.query_pairs_mut().extend_pairs(&params);
        Ok(url)
    }
}

#[async_trait]
impl SourceAdapter for AdzunaAdapter {
    fn source(&self) -> Source {
        Source::Adzuna
    }

    async fn fetch(&self, http: &HttpFetcher, ctx: &FetchContext) -> Result<Vec<JobDraft>, SourceError> {
        let mut collected = Vec::new();

        for page in 1..=self.max_pages {
            if collected.len() >= ctx.limit {
                break;
            }
            let url = self.page_url(page)?;
            let page_result = match http
                .fetch_bytes(ctx.run_id, Source::Adzuna.as_str(), url.as_str())
                .await
            {
                Ok(resp) => parse_page(&resp.body, &self.country, ctx.fetched_at),
                Err(err) => Err(SourceError::new(Source::Adzuna, err)),
            };
            match page_result {
                Ok(drafts) => {
                    let last_page = drafts.len() < RESULTS_PER_PAGE;
                    collected.extend(drafts);
                    if last_page {
                        break;
                    }
                }
                Err(err) => return keep_partial(Source::Adzuna, collected, err),
            }
        }

        collected.truncate(ctx.limit);
        Ok(collected)
    }
}

#[cfg(test)]
mod tests {
    use jobhub_storage::testing::ScriptedServer;

    use super::*;
    use crate::test_support::{ctx, fetcher};

    #[test]
    fn parses_results_and_strips_highlight_markup() {
        let body = r#"{
            "count": 1,
            "results": [{
                "id": "4581726354",
                "title": "<strong>Rust</strong> Engineer",
                "description": "Join a <strong>startup</strong> building…",
                "redirect_url": "https://www.adzuna.co.uk/jobs/land/ad/4581726354",
                "created": "2026-03-02T11:15:00Z",
                "company": {"display_name": "Crabtree Ltd"},
                "location": {"display_name": "London, UK", "area": ["UK", "London"]},
                "salary_min": 70000,
                "salary_max": 90000,
                "salary_is_predicted": "0"
            }]
        }"#;
        let drafts = parse_page(body.as_bytes(), "gb", Utc::now()).unwrap();
        assert_eq!(drafts.len(), 1);
        let job = &drafts[0];
        assert_eq!(job.title, "Rust Engineer");
        assert_eq!(job.company, "Crabtree Ltd");
        assert_eq!(job.full_description, "Join a startup building…");
        assert_eq!(job.salary_currency.as_deref(), Some("GBP"));
        assert_eq!(job.external_id(), "adzuna:4581726354");
    }

    #[test]
    fn page_url_includes_credentials_and_query() {
        let adapter = AdzunaAdapter {
            app_id: "id1".into(),
            app_key: "key1".into(),
            country: "gb".into(),
            query: Some("rust".into()),
            max_pages: 1,
            base_url: DEFAULT_BASE_URL.into(),
        };
        assert_eq!(
            adapter.page_url(3).unwrap().as_str(),
            "https://api.adzuna.com/v1/api/jobs/gb/search/3?app_id=id1&app_key=key1&results_per_page=50&content-type=application%2Fjson&what=rust"
        );
    }

    #[test]
    fn result_without_id_is_skipped() {
        let body = r#"{"results": [
            {"id": null, "title": "Broken", "redirect_url": "https://x.example/1"},
            {"id": 77, "title": "Data Analyst", "redirect_url": "https://x.example/77"}
        ]}"#;
        let drafts = parse_page(body.as_bytes(), "us", Utc::now()).unwrap();
        assert_eq!(drafts.len(), 1);
        assert_eq!(drafts[0].external_id(), "adzuna:77");
    }

    #[tokio::test]
    async fn rejected_credentials_do_not_appear_in_the_error() {
        let server = ScriptedServer::start(|_| (401, "bad key".to_string())).await.unwrap();
        let adapter = AdzunaAdapter {
            app_id: "myid".into(),
            app_key: "SUPERSECRETKEY".into(),
            country: "gb".into(),
            query: None,
            max_pages: 2,
            base_url: server.url("/v1/api/jobs"),
        };

        let err = adapter.fetch(&fetcher(), &ctx(50)).await.unwrap_err();
        let rendered = format!("{err} {err:?}");
        assert!(rendered.contains("401"));
        assert!(!rendered.contains("SUPERSECRETKEY"));
        assert!(!rendered.contains("myid"));

        let sent = server.requests().await;
        assert!(sent[0].starts_with("/v1/api/jobs/gb/search/1?"));
        assert!(sent[0].contains("app_key=SUPERSECRETKEY"));
    }
}
