// src/fetcher.rs
//! Content fetcher: cache-aware page fetch with bounded retries, plus best-effort
//! extraction of description / subscriber count / about text from the HTML.

use crate::cache::{fingerprint, FingerprintCache};
use crate::config::NetworkSection;
use crate::http::{FetchError, PageSource};
use crate::telemetry;
use futures::stream::{self, StreamExt};
use metrics::counter;
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html, Node, Selector};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

const ABOUT_MAX_CHARS: usize = 500;
const SECTION_MAX_CHARS: usize = 500;
const BODY_MAX_CHARS: usize = 1000;
const MIN_CONTENT_CHARS: usize = 100;

/// Signals extracted from a publication's home page.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageMetadata {
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub subscriber_info: String,
    #[serde(default)]
    pub about_text: String,
    /// Lowercased title + description + about + main content.
    #[serde(default)]
    pub content_text: String,
}

impl PageMetadata {
    /// All extracted pieces joined into one text blob for keyword scanning.
    pub fn blob(&self) -> String {
        [
            self.description.as_str(),
            self.subscriber_info.as_str(),
            self.about_text.as_str(),
            self.content_text.as_str(),
        ]
        .iter()
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
    }

    pub fn is_empty(&self) -> bool {
        self.blob().is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct FetchSettings {
    pub max_retries: u32,
    pub timeout: Duration,
    pub retry_delay: Duration,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self::from(&NetworkSection::default())
    }
}

impl From<&NetworkSection> for FetchSettings {
    fn from(n: &NetworkSection) -> Self {
        Self {
            max_retries: n.max_retries,
            timeout: n.timeout(),
            retry_delay: n.retry_delay(),
        }
    }
}

pub struct ContentFetcher {
    source: Arc<dyn PageSource>,
    cache: Arc<FingerprintCache>,
    settings: FetchSettings,
}

impl ContentFetcher {
    pub fn new(
        source: Arc<dyn PageSource>,
        cache: Arc<FingerprintCache>,
        settings: FetchSettings,
    ) -> Self {
        Self {
            source,
            cache,
            settings,
        }
    }

    /// Cached metadata, or a fresh fetch. `None` means "no data" once retries are spent.
    pub async fn fetch(&self, url: &str) -> Option<PageMetadata> {
        telemetry::ensure_described();
        let fp = fingerprint(url);
        let fp_short = &fp[..12];

        if let Some(raw) = self.cache.get(url) {
            match serde_json::from_str::<PageMetadata>(&raw) {
                Ok(hit) => {
                    counter!(telemetry::CACHE_HITS).increment(1);
                    debug!(target: "fetcher", fp = fp_short, "cache hit");
                    return Some(hit);
                }
                Err(e) => {
                    debug!(target: "fetcher", fp = fp_short, error = %e, "unusable cache payload");
                }
            }
        }

        let attempts = self.settings.max_retries.max(1);
        for attempt in 1..=attempts {
            counter!(telemetry::FETCH_ATTEMPTS).increment(1);
            let outcome =
                match tokio::time::timeout(self.settings.timeout, self.source.get_text(url)).await
                {
                    Ok(r) => r,
                    Err(_) => Err(FetchError::Timeout(self.settings.timeout)),
                };

            match outcome {
                Ok(body) => {
                    let meta = extract_metadata(&body);
                    if let Ok(json) = serde_json::to_string(&meta) {
                        if let Err(e) = self.cache.put(url, &json) {
                            debug!(target: "fetcher", fp = fp_short, error = %e, "cache write failed");
                        }
                    }
                    debug!(target: "fetcher", fp = fp_short, attempt, chars = meta.content_text.len(), "fetched");
                    return Some(meta);
                }
                Err(e) if attempt < attempts => {
                    debug!(target: "fetcher", fp = fp_short, attempt, attempts, error = %e, "fetch failed, retrying");
                    tokio::time::sleep(self.settings.retry_delay).await;
                }
                Err(e) => {
                    warn!(target: "fetcher", %url, attempts, error = %e, "giving up on content fetch");
                }
            }
        }

        counter!(telemetry::FETCH_FAILURES).increment(1);
        None
    }

    /// Fetch many URLs with at most `workers` requests in flight.
    /// Results come back in completion order.
    pub async fn fetch_many<K>(
        &self,
        items: Vec<(K, String)>,
        workers: usize,
    ) -> Vec<(K, Option<PageMetadata>)>
    where
        K: Send,
    {
        stream::iter(items)
            .map(|(key, url)| async move {
                let meta = self.fetch(&url).await;
                (key, meta)
            })
            .buffer_unordered(workers.max(1))
            .collect()
            .await
    }
}

/* ----------------------------
HTML extraction
---------------------------- */

// Constant selectors; parse failures would be programming errors.
fn selector(css: &str) -> Selector {
    Selector::parse(css).expect("constant CSS selector")
}

static SEL_DESCRIPTION: Lazy<Selector> = Lazy::new(|| selector(r#"meta[name="description"]"#));
static SEL_OG_DESCRIPTION: Lazy<Selector> =
    Lazy::new(|| selector(r#"meta[property="og:description"]"#));
static SEL_TITLE: Lazy<Selector> = Lazy::new(|| selector("title"));
static SEL_HEADINGS: Lazy<Selector> = Lazy::new(|| selector("h1, h2, h3, h4"));
static SEL_BODY: Lazy<Selector> = Lazy::new(|| selector("body"));
/// Tried in order; the first match of each contributes.
static SEL_CONTENT: Lazy<Vec<Selector>> = Lazy::new(|| {
    [
        "article",
        ".post-content",
        ".entry-content",
        r#"[class*="post"]"#,
        "main",
        ".content",
    ]
    .iter()
    .map(|css| selector(css))
    .collect()
});

const NOISE_TAGS: [&str; 5] = ["script", "style", "nav", "footer", "header"];
const HEADING_TAGS: [&str; 4] = ["h1", "h2", "h3", "h4"];

static RE_WS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("ws regex"));
static RE_SUBSCRIBERS: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
    vec![
        (
            Regex::new(r"(?i)(\d[\d,]*)\s+subscribers?\b").expect("subs regex"),
            "subscribers",
        ),
        (
            Regex::new(r"(?i)(\d[\d,]*)\s+readers?\b").expect("readers regex"),
            "readers",
        ),
        (
            Regex::new(r"(?i)(\d+(?:\.\d+)?[km])\+?\s+subscribers?\b").expect("short subs regex"),
            "subscribers",
        ),
    ]
});

fn collapse_ws(s: &str) -> String {
    RE_WS.replace_all(s, " ").trim().to_string()
}

/// Text nodes of an element, trimmed and joined by single spaces.
fn element_text(el: ElementRef<'_>) -> String {
    collapse_ws(&el.text().collect::<Vec<_>>().join(" "))
}

/// Like [`element_text`], skipping anything inside script/style/nav/footer/header.
fn visible_text(el: ElementRef<'_>) -> String {
    let parts: Vec<&str> = el
        .descendants()
        .filter_map(|node| match node.value() {
            Node::Text(t) => {
                let hidden = node.ancestors().any(|a| {
                    a.value()
                        .as_element()
                        .is_some_and(|e| NOISE_TAGS.contains(&e.name()))
                });
                (!hidden).then_some(&**t)
            }
            _ => None,
        })
        .collect();
    collapse_ws(&parts.join(" "))
}

fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

fn meta_content(doc: &Html, sel: &Selector) -> Option<String> {
    doc.select(sel)
        .filter_map(|el| el.value().attr("content"))
        .map(collapse_ws)
        .find(|c| !c.is_empty())
}

fn find_subscribers(page_text: &str) -> Option<String> {
    RE_SUBSCRIBERS.iter().find_map(|(re, label)| {
        re.captures(page_text)
            .and_then(|c| c.get(1))
            .map(|m| format!("{} {}", m.as_str(), label))
    })
}

/// First heading mentioning "about", then up to three non-empty `p`/`div`
/// siblings before the next heading.
fn find_about(doc: &Html) -> Option<String> {
    for heading in doc.select(&SEL_HEADINGS) {
        if !element_text(heading).to_lowercase().contains("about") {
            continue;
        }
        let parts: Vec<String> = heading
            .next_siblings()
            .filter_map(ElementRef::wrap)
            .take_while(|el| !HEADING_TAGS.contains(&el.value().name()))
            .filter(|el| matches!(el.value().name(), "p" | "div"))
            .map(element_text)
            .filter(|t| !t.is_empty())
            .take(3)
            .collect();
        if !parts.is_empty() {
            return Some(truncate_chars(&parts.join(" "), ABOUT_MAX_CHARS));
        }
    }
    None
}

/// Best-effort extraction; absent pieces stay empty.
pub fn extract_metadata(html: &str) -> PageMetadata {
    let doc = Html::parse_document(html);
    let root = doc.root_element();

    let mut meta = PageMetadata {
        description: meta_content(&doc, &SEL_DESCRIPTION)
            .or_else(|| meta_content(&doc, &SEL_OG_DESCRIPTION))
            .unwrap_or_default(),
        ..Default::default()
    };
    meta.subscriber_info = find_subscribers(&element_text(root)).unwrap_or_default();
    meta.about_text = find_about(&doc).unwrap_or_default();

    let mut pieces: Vec<String> = Vec::new();
    if let Some(title) = doc.select(&SEL_TITLE).next() {
        pieces.push(element_text(title));
    }
    pieces.push(meta.description.clone());
    pieces.push(meta.about_text.clone());
    for sel in SEL_CONTENT.iter() {
        if let Some(el) = doc.select(sel).next() {
            pieces.push(truncate_chars(&element_text(el), SECTION_MAX_CHARS));
        }
    }
    let mut content = pieces
        .into_iter()
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join(" ");

    if content.chars().count() < MIN_CONTENT_CHARS {
        let body = doc.select(&SEL_BODY).next().unwrap_or(root);
        let text = truncate_chars(&visible_text(body), BODY_MAX_CHARS);
        if !text.is_empty() {
            if !content.is_empty() {
                content.push(' ');
            }
            content.push_str(&text);
        }
    }
    meta.content_text = content.to_lowercase();
    meta
}
