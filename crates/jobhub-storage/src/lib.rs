//! Job record persistence + HTTP fetch utilities for JobHub.

pub mod http;
pub mod memory;
pub mod postgres;
pub mod store;
#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use http::{
    redact_url, BackoffPolicy, FetchError, FetchedResponse, HttpClientConfig, HttpFetcher,
    RequestBudget, TokenBucketConfig,
};
pub use memory::MemoryJobStore;
pub use reqwest::Url;
pub use sqlx;
pub use postgres::PgJobStore;
pub use store::{JobQuery, JobStore, StoreError};

pub const CRATE_NAME: &str = "jobhub-storage";
