//! Lever postings API, one request per employer handle.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use jobhub_core::{DescriptionSection, JobDraft, Source};
use jobhub_storage::{HttpFetcher, Url};
use serde::Deserialize;
use serde_json::Value as JsonValue;

use crate::{
    accept, join_segments, keep_partial, list_items, positive, snippet, squash_whitespace, FetchContext,
    SourceAdapter, SourceError,
};

pub const DEFAULT_BASE_URL: &str = "https://api.lever.co/v0/postings";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LeverPosting {
    id: String,
    #[serde(default)]
    text: String,
    #[serde(default)]
    hosted_url: String,
    #[serde(default)]
    apply_url: Option<String>,
    /// Milliseconds since the epoch.
    #[serde(default)]
    created_at: Option<i64>,
    #[serde(default)]
    categories: LeverCategories,
    #[serde(default)]
    description: String,
    #[serde(default)]
    description_plain: String,
    #[serde(default)]
    lists: Vec<LeverList>,
    #[serde(default)]
    additional: String,
    #[serde(default)]
    salary_range: Option<LeverSalaryRange>,
}

#[derive(Debug, Default, Deserialize)]
struct LeverCategories {
    #[serde(default)]
    location: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LeverList {
    #[serde(default)]
    text: String,
    #[serde(default)]
    content: String,
}

#[derive(Debug, Deserialize)]
struct LeverSalaryRange {
    #[serde(default)]
    min: Option<f64>,
    #[serde(default)]
    max: Option<f64>,
    #[serde(default)]
    currency: Option<String>,
}

fn to_draft(posting: LeverPosting, company: &str, fetched_at: DateTime<Utc>) -> Option<JobDraft> {
    let mut full = posting.description.clone();
    let mut sections = Vec::new();
    for list in posting.lists {
        full.push_str(&format!("<h3>{}</h3><ul>{}</ul>", list.text, list.content));
        let items = list_items(&list.content);
        if !items.is_empty() {
            sections.push(DescriptionSection {
                heading: list.text.trim().to_string(),
                items,
            });
        }
    }
    full.push_str(&posting.additional);

    let mut draft = JobDraft::new(Source::Lever, fetched_at);
    draft.native_id = crate::text_or_none(posting.id);
    draft.title = posting.text.trim().to_string();
    draft.company = company.to_string();
    draft.location = posting.categories.location.unwrap_or_default().trim().to_string();
    draft.description = snippet(&squash_whitespace(&posting.description_plain));
    draft.full_description = full;
    draft.sections = sections;
    draft.url = if posting.hosted_url.trim().is_empty() {
        posting.apply_url.unwrap_or_default()
    } else {
        posting.hosted_url
    };
    if let Some(range) = posting.salary_range {
        draft.salary_min = positive(range.min);
        draft.salary_max = positive(range.max);
        draft.salary_currency = range.currency;
    }
    draft.posted_at = posting.created_at.and_then(DateTime::from_timestamp_millis);
    accept(draft)
}

pub fn parse_postings(body: &[u8], company: &str, fetched_at: DateTime<Utc>) -> Result<Vec<JobDraft>, SourceError> {
    let postings: Vec<JsonValue> = crate::decode_json(Source::Lever, body)?;
    Ok(crate::decode_items::<LeverPosting>(Source::Lever, postings)
        .into_iter()
        .filter_map(|p| to_draft(p, company, fetched_at))
        .collect())
}

#[derive(Debug, Clone)]
pub struct LeverAdapter {
    pub companies: Vec<String>,
    pub base_url: String,
}

impl LeverAdapter {
    fn postings_url(&self, company: &str, limit: usize) -> Result<Url, SourceError> {
        let mut url = join_segments(Source::Lever, &self.base_url, &[company])?;
        url.query_pairs_mut()
            .append_pair("mode", "json")
            .append_pair("limit", &limit.to_string());
        Ok(url)
    }
}

#[async_trait]
impl SourceAdapter for LeverAdapter {
    fn source(&self) -> Source {
        Source::Lever
    }

    async fn fetch(&self, http: &HttpFetcher, ctx: &FetchContext) -> Result<Vec<JobDraft>, SourceError> {
        let mut collected: Vec<JobDraft> = Vec::new();
        let mut last_error = None;

        for company in &self.companies {
            let remaining = ctx.limit.saturating_sub(collected.len());
            if remaining == 0 {
                break;
            }
            let url = self.postings_url(company, remaining)?;
            let result = match http.fetch_bytes(ctx.run_id, Source::Lever.as_str(), url.as_str()).await {
                Ok(resp) => parse_postings(&resp.body, company, ctx.fetched_at),
                Err(err) => Err(SourceError::new(Source::Lever, err)),
            };
            match result {
                Ok(drafts) => collected.extend(drafts),
                Err(err) => {
                    tracing::warn!(company = %company, error = %err, "lever postings failed");
                    last_error = Some(err);
                }
            }
        }

        collected.truncate(ctx.limit);
        match last_error {
            Some(err) => keep_partial(Source::Lever, collected, err),
            None => Ok(collected),
        }
    }
}

#[cfg(test)]
mod tests {
    use jobhub_storage::testing::ScriptedServer;

    use super::*;
    use crate::test_support::{ctx, fetcher};
    use chrono::TimeZone;

    const POSTINGS: &str = r#"[{
        "id": "5f0c2a8e-1b7d-4e0a-9a31-0d3f1c2b4a10",
        "text": "Senior Backend Engineer",
        "hostedUrl": "https://jobs.lever.co/acme/5f0c2a8e-1b7d-4e0a-9a31-0d3f1c2b4a10",
        "applyUrl": "https://jobs.lever.co/acme/5f0c2a8e-1b7d-4e0a-9a31-0d3f1c2b4a10/apply",
        "createdAt": 1772352000000,
        "categories": {"location": "Toronto", "team": "Platform", "commitment": "Full-time"},
        "description": "<div>We ship payments infra.</div>",
        "descriptionPlain": "We ship   payments infra.",
        "lists": [
            {"text": "Requirements", "content": "<li>5+ years Rust</li><li>Postgres</li>"},
            {"text": "Empty", "content": ""}
        ],
        "additional": "<div>Visa sponsorship available.</div>",
        "salaryRange": {"min": 150000, "max": 190000, "currency": "CAD", "interval": "per-year-salary"}
    }]"#;

    #[test]
    fn parses_postings_with_sections_and_salary() {
        let drafts = parse_postings(POSTINGS.as_bytes(), "acme", Utc::now()).unwrap();
        assert_eq!(drafts.len(), 1);
        let job = &drafts[0];
        assert_eq!(job.external_id(), "lever:5f0c2a8e-1b7d-4e0a-9a31-0d3f1c2b4a10");
        assert_eq!(job.company, "acme");
        assert_eq!(job.location, "Toronto");
        assert_eq!(job.description, "We ship payments infra.");
        assert!(job.full_description.contains("<h3>Requirements</h3>"));
        assert!(job.full_description.ends_with("<div>Visa sponsorship available.</div>"));
        assert_eq!(
            job.sections,
            vec![DescriptionSection {
                heading: "Requirements".into(),
                items: vec!["5+ years Rust".into(), "Postgres".into()],
            }]
        );
        assert_eq!(job.salary_currency.as_deref(), Some("CAD"));
        assert_eq!(
            job.posted_at,
            Some(Utc.with_ymd_and_hms(2026, 3, 1, 8, 0, 0).unwrap())
        );
    }

    #[test]
    fn postings_url_requests_json_mode() {
        let adapter = LeverAdapter {
            companies: vec!["acme".into()],
            base_url: DEFAULT_BASE_URL.into(),
        };
        assert_eq!(
            adapter.postings_url("acme", 40).unwrap().as_str(),
            "https://api.lever.co/v0/postings/acme?mode=json&limit=40"
        );
        assert_eq!(
            adapter.postings_url("big co", 5).unwrap().as_str(),
            "https://api.lever.co/v0/postings/big%20co?mode=json&limit=5"
        );
    }

    #[test]
    fn posting_without_id_is_skipped() {
        let body = r#"[
            {"text": "No id", "hostedUrl": "https://jobs.lever.co/acme/x"},
            {"id": "p2", "text": "Designer", "hostedUrl": "https://jobs.lever.co/acme/p2"}
        ]"#;
        let drafts = parse_postings(body.as_bytes(), "acme", Utc::now()).unwrap();
        assert_eq!(drafts.len(), 1);
        assert_eq!(drafts[0].external_id(), "lever:p2");
    }

    #[tokio::test]
    async fn failed_company_keeps_earlier_postings() {
        let server = ScriptedServer::start(|target| {
            if target.starts_with("/postings/acme?") {
                (200, POSTINGS.to_string())
            } else {
                (503, "maintenance".to_string())
            }
        })
        .await
        .unwrap();
        let adapter = LeverAdapter {
            companies: vec!["acme".into(), "initech".into()],
            base_url: server.url("/postings"),
        };

        let drafts = adapter.fetch(&fetcher(), &ctx(50)).await.unwrap();
        assert_eq!(drafts.len(), 1);
        assert_eq!(drafts[0].company, "acme");
        let sent = server.requests().await;
        assert_eq!(sent.len(), 2);
        assert!(sent[1].starts_with("/postings/initech?mode=json&limit=49"));
    }
}
