//! Core job record model and identity rules for JobHub.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

pub const CRATE_NAME: &str = "jobhub-core";

/// Hex characters kept from the synthetic id digest.
pub const SYNTHETIC_ID_HEX_LEN: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    JSearch,
    Adzuna,
    RemoteOk,
    Remotive,
    Greenhouse,
    Lever,
}

impl Source {
    pub const ALL: [Source; 6] = [
        Source::JSearch,
        Source::Adzuna,
        Source::RemoteOk,
        Source::Remotive,
        Source::Greenhouse,
        Source::Lever,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Source::JSearch => "jsearch",
            Source::Adzuna => "adzuna",
            Source::RemoteOk => "remoteok",
            Source::Remotive => "remotive",
            Source::Greenhouse => "greenhouse",
            Source::Lever => "lever",
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownSource(pub String);

impl fmt::Display for UnknownSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown source `{}`", self.0)
    }
}

impl std::error::Error for UnknownSource {}

impl FromStr for Source {
    type Err = UnknownSource;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.trim().to_ascii_lowercase();
        Source::ALL
            .into_iter()
            .find(|source| source.as_str() == needle)
            .ok_or_else(|| UnknownSource(s.to_string()))
    }
}

/// Scheduling tier a source syncs under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncTier {
    /// Fast-moving sources polled every few minutes.
    Fast,
    /// Quota-limited or slow-changing sources.
    Slow,
}

impl SyncTier {
    pub const ALL: [SyncTier; 2] = [SyncTier::Fast, SyncTier::Slow];

    pub fn as_str(&self) -> &'static str {
        match self {
            SyncTier::Fast => "fast",
            SyncTier::Slow => "slow",
        }
    }
}

impl fmt::Display for SyncTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fast" => Ok(SyncTier::Fast),
            "slow" => Ok(SyncTier::Slow),
            other => Err(format!("unknown sync tier `{other}`")),
        }
    }
}

/// Structured section parsed out of a posting (e.g. "Requirements").
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DescriptionSection {
    pub heading: String,
    pub items: Vec<String>,
}

/// Normalized candidate handed from adapters into the sync pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobDraft {
    pub source: Source,
    pub native_id: Option<String>,
    pub title: String,
    pub company: String,
    pub location: String,
    pub description: String,
    pub full_description: String,
    #[serde(default)]
    pub sections: Vec<DescriptionSection>,
    pub url: String,
    #[serde(default)]
    pub categories: Vec<String>,
    pub is_active: bool,
    pub salary_min: Option<f64>,
    pub salary_max: Option<f64>,
    pub salary_currency: Option<String>,
    pub posted_at: Option<DateTime<Utc>>,
    pub fetched_at: DateTime<Utc>,
}

impl JobDraft {
    /// Empty active draft for `source`; adapters fill in the rest.
    pub fn new(source: Source, fetched_at: DateTime<Utc>) -> Self {
        Self {
            source,
            native_id: None,
            title: String::new(),
            company: String::new(),
            location: String::new(),
            description: String::new(),
            full_description: String::new(),
            sections: Vec::new(),
            url: String::new(),
            categories: Vec::new(),
            is_active: true,
            salary_min: None,
            salary_max: None,
            salary_currency: None,
            posted_at: None,
            fetched_at,
        }
    }

    pub fn external_id(&self) -> String {
        external_id_for(self.source, self.native_id.as_deref(), &self.title, &self.company)
    }

    pub fn normalized_url(&self) -> String {
        normalize_key(&self.url)
    }

    pub fn normalized_title_company(&self) -> (String, String) {
        (normalize_key(&self.title), normalize_key(&self.company))
    }
}

/// Persisted job record. `external_id` is the upsert key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: Uuid,
    pub external_id: String,
    pub source: Source,
    pub title: String,
    pub company: String,
    pub location: String,
    pub description: String,
    pub full_description: String,
    pub sections: Vec<DescriptionSection>,
    pub url: String,
    pub categories: Vec<String>,
    pub is_active: bool,
    pub salary_min: Option<f64>,
    pub salary_max: Option<f64>,
    pub salary_currency: Option<String>,
    pub posted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl JobRecord {
    /// First sighting of a draft: fresh id, `created_at == updated_at == now`.
    pub fn from_draft(draft: JobDraft, external_id: String, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            external_id,
            source: draft.source,
            title: draft.title,
            company: draft.company,
            location: draft.location,
            description: draft.description,
            full_description: draft.full_description,
            sections: draft.sections,
            url: draft.url,
            categories: draft.categories,
            is_active: draft.is_active,
            salary_min: draft.salary_min,
            salary_max: draft.salary_max,
            salary_currency: draft.salary_currency,
            posted_at: draft.posted_at,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Dedup/identity normalization: trimmed and lower-cased.
pub fn normalize_key(input: &str) -> String {
    input.trim().to_lowercase()
}

/// Description length in Unicode scalar values, the unit for richness checks.
pub fn description_len(text: &str) -> usize {
    text.chars().count()
}

/// Deterministic id for postings whose provider exposes no native id.
///
/// SHA-256 over `source|title|company` (each trimmed and lower-cased),
/// truncated to [`SYNTHETIC_ID_HEX_LEN`] hex characters. The same inputs
/// always produce the same id, across runs and processes.
pub fn synthetic_job_id(source: &str, title: &str, company: &str) -> String {
    let material = format!(
        "{}|{}|{}",
        normalize_key(source),
        normalize_key(title),
        normalize_key(company)
    );
    let mut hasher = Sha256::new();
    hasher.update(material.as_bytes());
    let mut digest = hex::encode(hasher.finalize());
    digest.truncate(SYNTHETIC_ID_HEX_LEN);
    digest
}

/// `source:native_id`, or `source:h<hash>` when `native_id` is missing or blank.
pub fn external_id_for(source: Source, native_id: Option<&str>, title: &str, company: &str) -> String {
    match native_id.map(str::trim).filter(|id| !id.is_empty()) {
        Some(id) => format!("{}:{}", source.as_str(), id),
        None => format!(
            "{}:h{}",
            source.as_str(),
            synthetic_job_id(source.as_str(), title, company)
        ),
    }
}
