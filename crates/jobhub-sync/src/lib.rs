//! Sync pipeline: aggregate → dedupe → tag → merge, plus retention scheduling.

pub mod aggregate;
pub mod config;
pub mod dedup;
pub mod enrich;
pub mod merge;
pub mod scheduler;
pub mod service;

pub use aggregate::{aggregate, AggregateOptions, AggregateStats, SourceRun};
pub use config::{SourceRegistry, SyncConfig};
pub use dedup::dedupe;
pub use enrich::CategoryRules;
pub use merge::{MergeAction, MergeEngine, MergeError, MergeReport};
pub use scheduler::{start_scheduler, SchedulerFatal};
pub use service::{
    EvictionError, RegisteredAdapter, SourceSet, SyncOutcome, SyncRunSummary, SyncService,
    UnavailableSource,
};

pub const CRATE_NAME: &str = "jobhub-sync";
