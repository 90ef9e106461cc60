// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod cache;
pub mod config;
pub mod fetcher;
pub mod http;
pub mod images;
pub mod labeling;
pub mod pipeline;
pub mod record;
pub mod telemetry;
pub mod validation;

// ---- Re-exports for stable public API ----
pub use crate::cache::{fingerprint, normalize_url, FingerprintCache};
pub use crate::config::EnricherConfig;
pub use crate::fetcher::{ContentFetcher, FetchSettings, PageMetadata};
pub use crate::http::{FetchError, PageSource, ReqwestSource};
pub use crate::images::{DownloadOutcome, DownloadTask, ImageManager};
pub use crate::labeling::{FallbackPolicy, KnownAuthors, LabelEngine, TriggerTable};
pub use crate::pipeline::{Enricher, EnrichmentOutcome};
pub use crate::record::{PublicationRecord, SubscriptionStatus};
