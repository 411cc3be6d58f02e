//! Exact two-key deduplication of raw candidates.

use std::collections::HashSet;

use jobhub_core::JobDraft;
use tracing::debug;

/// Drop candidates whose normalized URL, or failing that normalized
/// `(title, company)` pair, was already seen earlier in the list.
///
/// First occurrence wins, so the survivor between two duplicates depends on
/// input order. The result is a subsequence of `candidates` in which no two
/// entries share a non-empty normalized URL or a normalized pair.
pub fn dedupe(candidates: Vec<JobDraft>) -> Vec<JobDraft> {
    let total = candidates.len();
    let mut seen_urls: HashSet<String> = HashSet::with_capacity(total);
    let mut seen_pairs: HashSet<(String, String)> = HashSet::with_capacity(total);
    let mut unique = Vec::with_capacity(total);

    for candidate in candidates {
        let url = candidate.normalized_url();
        if !url.is_empty() && seen_urls.contains(&url) {
            continue;
        }
        let pair = candidate.normalized_title_company();
        if seen_pairs.contains(&pair) {
            continue;
        }
        if !url.is_empty() {
            seen_urls.insert(url);
        }
        seen_pairs.insert(pair);
        unique.push(candidate);
    }

    debug!(total, unique = unique.len(), dropped = total - unique.len(), "deduplicated candidates");
    unique
}
