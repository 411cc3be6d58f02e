//! Source adapter contract + one adapter per job provider.
//!
//! Every adapter decodes its provider's payload into typed structs, maps them
//! onto [`JobDraft`], and reports ordinary provider failures as
//! [`SourceError`]. Pagination and per-board iteration stay inside the
//! adapter: a failure after some items were fetched returns what was fetched.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use jobhub_core::{JobDraft, Source, SyncTier};
use jobhub_storage::{FetchError, HttpFetcher, Url};
use scraper::{Html, Node, Selector};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

pub mod adzuna;
pub mod greenhouse;
pub mod jsearch;
pub mod lever;
pub mod remoteok;
pub mod remotive;

pub const CRATE_NAME: &str = "jobhub-adapters";

/// Characters kept in the short `description` snippet.
pub const SNIPPET_CHARS: usize = 280;

pub const DEFAULT_SOURCE_LIMIT: usize = 200;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchContext {
    pub run_id: Uuid,
    pub fetched_at: DateTime<Utc>,
    /// Upper bound on drafts returned by one fetch.
    pub limit: usize,
}

#[derive(Debug, Error)]
pub enum SourceErrorKind {
    #[error(transparent)]
    Http(#[from] FetchError),
    #[error("malformed response: {0}")]
    Decode(String),
    #[error("missing credentials: set {0}")]
    MissingCredentials(String),
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("fetch task failed: {0}")]
    TaskFailed(String),
    #[error("invalid source config: {0}")]
    Config(String),
}

/// One adapter's fetch failed. Carries the provider and the cause.
#[derive(Debug, Error)]
#[error("{provider}: {kind}")]
pub struct SourceError {
    pub provider: Source,
    #[source]
    pub kind: SourceErrorKind,
}

impl SourceError {
    pub fn new(provider: Source, kind: impl Into<SourceErrorKind>) -> Self {
        Self {
            provider,
            kind: kind.into(),
        }
    }

    pub fn decode(provider: Source, err: impl std::fmt::Display) -> Self {
        Self::new(provider, SourceErrorKind::Decode(err.to_string()))
    }
}

#[async_trait]
pub trait SourceAdapter: Send + Sync {
    fn source(&self) -> Source;

    async fn fetch(&self, http: &HttpFetcher, ctx: &FetchContext) -> Result<Vec<JobDraft>, SourceError>;
}

/// One entry of `sources.yaml`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SourceConfig {
    pub source: Source,
    pub enabled: bool,
    #[serde(default = "default_tier")]
    pub tier: SyncTier,
    #[serde(default = "default_limit")]
    pub limit: usize,
    /// Search terms for search APIs.
    #[serde(default)]
    pub query: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
    /// Employer board tokens for ATS sources.
    #[serde(default)]
    pub boards: Vec<String>,
    #[serde(default)]
    pub max_pages: Option<u32>,
    /// Name of the env var holding the API key.
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default)]
    pub app_id_env: Option<String>,
    /// Overrides the provider's public endpoint.
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

fn default_tier() -> SyncTier {
    SyncTier::Fast
}

fn default_limit() -> usize {
    DEFAULT_SOURCE_LIMIT
}

impl SourceConfig {
    pub fn new(source: Source) -> Self {
        Self {
            source,
            enabled: true,
            tier: default_tier(),
            limit: default_limit(),
            query: None,
            country: None,
            boards: Vec::new(),
            max_pages: None,
            api_key_env: None,
            app_id_env: None,
            base_url: None,
            notes: None,
        }
    }

    fn credential(&self, configured: Option<&str>, fallback_env: &str) -> Result<String, SourceError> {
        let name = configured.unwrap_or(fallback_env);
        std::env::var(name)
            .ok()
            .and_then(text_or_none)
            .ok_or_else(|| SourceError::new(self.source, SourceErrorKind::MissingCredentials(name.to_string())))
    }

    fn require_boards(&self) -> Result<Vec<String>, SourceError> {
        let boards: Vec<String> = self
            .boards
            .iter()
            .filter_map(|b| text_or_none(b.clone()))
            .collect();
        if boards.is_empty() {
            return Err(SourceError::new(
                self.source,
                SourceErrorKind::Config("at least one board token is required".into()),
            ));
        }
        Ok(boards)
    }
}

/// Build the adapter for a registry entry, resolving credentials from env.
pub fn adapter_for(config: &SourceConfig) -> Result<Box<dyn SourceAdapter>, SourceError> {
    let adapter: Box<dyn SourceAdapter> = match config.source {
        Source::JSearch => Box::new(jsearch::JSearchAdapter {
            api_key: config.credential(config.api_key_env.as_deref(), "JSEARCH_API_KEY")?,
            query: config.query.clone().unwrap_or_else(|| "software engineer".into()),
            max_pages: config.max_pages.unwrap_or(3).max(1),
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| jsearch::DEFAULT_BASE_URL.into()),
        }),
        Source::Adzuna => Box::new(adzuna::AdzunaAdapter {
            app_id: config.credential(config.app_id_env.as_deref(), "ADZUNA_APP_ID")?,
            app_key: config.credential(config.api_key_env.as_deref(), "ADZUNA_APP_KEY")?,
            country: config.country.clone().unwrap_or_else(|| "us".into()),
            query: config.query.clone(),
            max_pages: config.max_pages.unwrap_or(2).max(1),
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| adzuna::DEFAULT_BASE_URL.into()),
        }),
        Source::RemoteOk => Box::new(remoteok::RemoteOkAdapter {
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| remoteok::DEFAULT_BASE_URL.into()),
        }),
        Source::Remotive => Box::new(remotive::RemotiveAdapter {
            query: config.query.clone(),
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| remotive::DEFAULT_BASE_URL.into()),
        }),
        Source::Greenhouse => Box::new(greenhouse::GreenhouseAdapter {
            boards: config.require_boards()?,
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| greenhouse::DEFAULT_BASE_URL.into()),
        }),
        Source::Lever => Box::new(lever::LeverAdapter {
            companies: config.require_boards()?,
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| lever::DEFAULT_BASE_URL.into()),
        }),
    };
    Ok(adapter)
}

/// Provider ids arrive as strings or numbers depending on the API.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum NativeId {
    Text(String),
    Number(i64),
}

impl NativeId {
    pub fn into_string(self) -> Option<String> {
        match self {
            NativeId::Text(s) => text_or_none(s),
            NativeId::Number(n) => Some(n.to_string()),
        }
    }
}

pub fn text_or_none(value: String) -> Option<String> {
    let trimmed = value.trim().to_string();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}

/// Collapse runs of whitespace into single spaces.
pub fn squash_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

const BLOCK_TAGS: &[&str] = &[
    "address", "article", "blockquote", "br", "dd", "div", "dl", "dt", "footer", "h1", "h2", "h3",
    "h4", "h5", "h6", "header", "hr", "li", "ol", "p", "pre", "section", "table", "td", "th", "tr",
    "ul",
];

/// Visible text of an HTML fragment, whitespace-collapsed. Block elements
/// separate words; inline ones do not.
pub fn html_to_text(html: &str) -> String {
    let fragment = Html::parse_fragment(html);
    let mut text = String::new();
    for node in fragment.root_element().descendants() {
        match node.value() {
            Node::Text(chunk) => text.push_str(chunk),
            Node::Element(el) if BLOCK_TAGS.contains(&el.name()) => text.push(' '),
            _ => {}
        }
    }
    squash_whitespace(&text)
}

/// Decode entity-escaped markup (`&lt;p&gt;`) back into HTML.
pub fn unescape_html(escaped: &str) -> String {
    let fragment = Html::parse_fragment(escaped);
    fragment.root_element().text().collect::<String>()
}

/// Text of every `<li>` in an HTML fragment.
pub fn list_items(html: &str) -> Vec<String> {
    let Ok(selector) = Selector::parse("li") else {
        return Vec::new();
    };
    Html::parse_fragment(html)
        .select(&selector)
        .filter_map(|li| text_or_none(squash_whitespace(&li.text().collect::<String>())))
        .collect()
}

/// First [`SNIPPET_CHARS`] characters of plain text, cut on a char boundary.
pub fn snippet(plain: &str) -> String {
    if plain.chars().count() <= SNIPPET_CHARS {
        return plain.to_string();
    }
    let mut cut = plain.chars().take(SNIPPET_CHARS).collect::<String>();
    if let Some(space) = cut.rfind(' ') {
        cut.truncate(space);
    }
    cut.push('…');
    cut
}

pub fn parse_rfc3339(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value.trim())
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// RFC 3339, falling back to a naive `YYYY-MM-DDTHH:MM:SS` read as UTC.
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    parse_rfc3339(value).or_else(|| {
        NaiveDateTime::parse_from_str(value.trim(), "%Y-%m-%dT%H:%M:%S")
            .ok()
            .map(|naive| naive.and_utc())
    })
}

pub fn positive(value: Option<f64>) -> Option<f64> {
    value.filter(|v| v.is_finite() && *v > 0.0)
}

/// Reject drafts without a title or link; those cannot be deduplicated or shown.
pub fn accept(draft: JobDraft) -> Option<JobDraft> {
    if draft.title.trim().is_empty() || draft.url.trim().is_empty() {
        debug!(source = %draft.source, title = %draft.title, "dropping draft without title or url");
        return None;
    }
    Some(draft)
}

/// Decide between partial success and failure once a page or board failed.
pub(crate) fn keep_partial(
    provider: Source,
    collected: Vec<JobDraft>,
    err: SourceError,
) -> Result<Vec<JobDraft>, SourceError> {
    if collected.is_empty() {
        return Err(err);
    }
    warn!(
        source = %provider,
        kept = collected.len(),
        error = %err,
        "partial fetch; returning items fetched before the failure"
    );
    Ok(collected)
}

/// `base` with `segments` appended as percent-encoded path segments.
pub(crate) fn join_segments(provider: Source, base: &str, segments: &[&str]) -> Result<Url, SourceError> {
    let config_err = |msg: String| SourceError::new(provider, SourceErrorKind::Config(msg));
    let mut url = Url::parse(base).map_err(|e| config_err(format!("{base}: {e}")))?;
    url.path_segments_mut()
        .map_err(|_| config_err(format!("{base}: cannot carry a path")))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

/// Decode each element of a provider list on its own; an entry that does not
/// fit `T` is skipped and logged instead of failing its neighbours.
pub(crate) fn decode_items<T: serde::de::DeserializeOwned>(provider: Source, items: Vec<JsonValue>) -> Vec<T> {
    let mut decoded = Vec::with_capacity(items.len());
    for (index, item) in items.into_iter().enumerate() {
        match serde_json::from_value(item) {
            Ok(value) => decoded.push(value),
            Err(err) => debug!(source = %provider, index, error = %err, "skipping malformed entry"),
        }
    }
    decoded
}

pub(crate) fn decode_json<T: serde::de::DeserializeOwned>(provider: Source, body: &[u8]) -> Result<T, SourceError> {
    serde_json::from_slice(body).map_err(|e| SourceError::decode(provider, e))
}
