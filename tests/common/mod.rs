// tests/common/mod.rs
// In-memory PageSource shared by the integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use reads_enricher::http::{FetchError, PageSource};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

#[derive(Default)]
pub struct MockSource {
    pages: HashMap<String, String>,
    blobs: HashMap<String, Vec<u8>>,
    /// url -> number of leading calls that fail
    flaky: Mutex<HashMap<String, usize>>,
    hang: Vec<String>,
    delay: Duration,
    text_calls: AtomicUsize,
    byte_calls: AtomicUsize,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl MockSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn page(mut self, url: &str, html: &str) -> Self {
        self.pages.insert(url.to_string(), html.to_string());
        self
    }

    pub fn blob(mut self, url: &str, bytes: &[u8]) -> Self {
        self.blobs.insert(url.to_string(), bytes.to_vec());
        self
    }

    pub fn fail_first(self, url: &str, times: usize) -> Self {
        self.flaky
            .lock()
            .unwrap()
            .insert(url.to_string(), times);
        self
    }

    pub fn hang_on(mut self, url: &str) -> Self {
        self.hang.push(url.to_string());
        self
    }

    pub fn with_delay(mut self, d: Duration) -> Self {
        self.delay = d;
        self
    }

    pub fn text_calls(&self) -> usize {
        self.text_calls.load(Ordering::SeqCst)
    }

    pub fn byte_calls(&self) -> usize {
        self.byte_calls.load(Ordering::SeqCst)
    }

    pub fn peak_in_flight(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    async fn enter(&self, url: &str) -> Result<(), FetchError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        if self.hang.iter().any(|h| h == url) {
            tokio::time::sleep(Duration::from_secs(30)).await;
        }
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let mut flaky = self.flaky.lock().unwrap();
        if let Some(left) = flaky.get_mut(url) {
            if *left > 0 {
                *left -= 1;
                return Err(FetchError::Transport("connection reset".into()));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl PageSource for MockSource {
    async fn get_text(&self, url: &str) -> Result<String, FetchError> {
        self.text_calls.fetch_add(1, Ordering::SeqCst);
        self.enter(url).await?;
        self.pages.get(url).cloned().ok_or(FetchError::Status(404))
    }

    async fn get_bytes(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        self.byte_calls.fetch_add(1, Ordering::SeqCst);
        self.enter(url).await?;
        self.blobs.get(url).cloned().ok_or(FetchError::Status(404))
    }
}
