// tests/fetcher_retry.rs
mod common;

use common::MockSource;
use reads_enricher::cache::FingerprintCache;
use reads_enricher::fetcher::{ContentFetcher, FetchSettings};
use std::sync::Arc;
use std::time::{Duration, Instant};

const PAGE: &str = r#"<html><head><title>Signal Weekly</title>
<meta name="description" content="Notes on software and AI"></head>
<body><main><p>Engineering essays.</p></main></body></html>"#;

fn settings(max_retries: u32, timeout_ms: u64) -> FetchSettings {
    FetchSettings {
        max_retries,
        timeout: Duration::from_millis(timeout_ms),
        retry_delay: Duration::from_millis(1),
    }
}

fn fetcher(source: Arc<MockSource>, cache: FingerprintCache, s: FetchSettings) -> ContentFetcher {
    ContentFetcher::new(source, Arc::new(cache), s)
}

#[tokio::test]
async fn transient_failures_are_retried_until_success() {
    let url = "https://signal.example.com";
    let src = Arc::new(MockSource::new().page(url, PAGE).fail_first(url, 2));
    let f = fetcher(src.clone(), FingerprintCache::disabled(), settings(3, 500));

    let meta = f.fetch(url).await.expect("third attempt succeeds");
    assert_eq!(meta.description, "Notes on software and AI");
    assert_eq!(src.text_calls(), 3);
}

#[tokio::test]
async fn exhausted_retries_mean_no_data() {
    let url = "https://down.example.com";
    let src = Arc::new(MockSource::new().page(url, PAGE).fail_first(url, 10));
    let f = fetcher(src.clone(), FingerprintCache::disabled(), settings(2, 500));

    assert!(f.fetch(url).await.is_none());
    assert_eq!(src.text_calls(), 2);
}

#[tokio::test]
async fn zero_retries_still_makes_one_attempt() {
    let url = "https://once.example.com";
    let src = Arc::new(MockSource::new().page(url, PAGE));
    let f = fetcher(src.clone(), FingerprintCache::disabled(), settings(0, 500));

    assert!(f.fetch(url).await.is_some());
    assert_eq!(src.text_calls(), 1);
}

#[tokio::test]
async fn hanging_request_is_cut_off_by_timeout() {
    let url = "https://slow.example.com";
    let src = Arc::new(MockSource::new().page(url, PAGE).hang_on(url));
    let f = fetcher(src.clone(), FingerprintCache::disabled(), settings(2, 50));

    let started = Instant::now();
    assert!(f.fetch(url).await.is_none());
    assert_eq!(src.text_calls(), 2);
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn cached_metadata_skips_the_network() {
    let dir = tempfile::tempdir().unwrap();
    let url = "https://signal.example.com/";
    let src = Arc::new(MockSource::new().page(url, PAGE));
    let f = fetcher(
        src.clone(),
        FingerprintCache::new(dir.path(), 7),
        settings(2, 500),
    );

    let first = f.fetch(url).await.expect("fetched");
    // different spelling, same normalized key
    let second = f.fetch("signal.example.com").await.expect("cached");
    assert_eq!(first, second);
    assert_eq!(src.text_calls(), 1);
}

#[tokio::test]
async fn fetch_many_respects_worker_bound() {
    let mut src = MockSource::new().with_delay(Duration::from_millis(20));
    let mut items = Vec::new();
    for i in 0..8 {
        let url = format!("https://p{i}.example.com");
        src = src.page(&url, PAGE);
        items.push((i, url));
    }
    let src = Arc::new(src);
    let f = fetcher(src.clone(), FingerprintCache::disabled(), settings(1, 1_000));

    let mut out = f.fetch_many(items, 3).await;
    out.sort_by_key(|(k, _)| *k);
    assert_eq!(out.len(), 8);
    assert!(out.iter().all(|(_, m)| m.is_some()));
    assert!(src.peak_in_flight() <= 3);
    assert_eq!(src.text_calls(), 8);
}
