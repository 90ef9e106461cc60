// src/telemetry.rs
//! Counter registration. Only the `metrics` facade is used; without an installed
//! recorder every increment is a no-op.

use metrics::{describe_counter, describe_gauge};
use once_cell::sync::OnceCell;

pub const FETCH_ATTEMPTS: &str = "fetch_attempts_total";
pub const FETCH_FAILURES: &str = "fetch_failures_total";
pub const CACHE_HITS: &str = "cache_hits_total";
pub const IMAGES_DOWNLOADED: &str = "images_downloaded_total";
pub const IMAGES_REUSED: &str = "images_reused_total";
pub const IMAGES_FAILED: &str = "images_failed_total";
pub const RECORDS_LABELED: &str = "records_labeled_total";
pub const RECORDS_SKIPPED: &str = "records_skipped_total";
pub const LAST_RUN_TS: &str = "enrich_last_run_ts";

/// One-time description so the series carry help text once a recorder exists.
pub fn ensure_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!(FETCH_ATTEMPTS, "Content fetch attempts, retries included.");
        describe_counter!(FETCH_FAILURES, "Content fetches that exhausted all retries.");
        describe_counter!(CACHE_HITS, "Content fetches answered from the fingerprint cache.");
        describe_counter!(IMAGES_DOWNLOADED, "Icons fetched and written.");
        describe_counter!(IMAGES_REUSED, "Icons already present on disk.");
        describe_counter!(IMAGES_FAILED, "Icon tasks that failed.");
        describe_counter!(RECORDS_LABELED, "Records scored by the labeling engine.");
        describe_counter!(
            RECORDS_SKIPPED,
            "Records left untouched because they were already labeled."
        );
        describe_gauge!(LAST_RUN_TS, "Unix ts when the enrichment pipeline last ran.");
    });
}
