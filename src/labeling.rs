// src/labeling.rs
//! Labeling engine: trigger table (TOML), known-author bios, weighted signal scoring,
//! threshold + fallback policy, and include/exclude post-filters.
//!
//! Signals and default weights:
//! - publication name: 3
//! - bio of a known author: 4
//! - URL tokens (host label + path segments): 2
//! - fetched page blob: 1.5
//! - free-text author field: 1
//!
//! Each trigger found in a signal adds that signal's weight to the trigger's category,
//! once per trigger per signal.

use crate::fetcher::{ContentFetcher, PageMetadata};
use crate::record::{PublicationRecord, SubscriptionStatus};
use crate::telemetry;
use anyhow::Context;
use metrics::counter;
use regex::Regex;
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

pub const BUILTIN_CATEGORIES: &str = include_str!("../config/categories.toml");
pub const BUILTIN_AUTHORS: &str = include_str!("../config/authors.toml");

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SignalKind {
    Name,
    AuthorBio,
    Url,
    Content,
    Author,
}

/* ----------------------------
Config schema (from TOML)
---------------------------- */

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SignalWeights {
    pub name: f32,
    pub author_bio: f32,
    pub url: f32,
    pub content: f32,
    pub author: f32,
}

impl Default for SignalWeights {
    fn default() -> Self {
        Self {
            name: 3.0,
            author_bio: 4.0,
            url: 2.0,
            content: 1.5,
            author: 1.0,
        }
    }
}

impl SignalWeights {
    pub fn weight(&self, kind: SignalKind) -> f32 {
        match kind {
            SignalKind::Name => self.name,
            SignalKind::AuthorBio => self.author_bio,
            SignalKind::Url => self.url,
            SignalKind::Content => self.content,
            SignalKind::Author => self.author,
        }
    }
}

/// What to do when no category reaches the threshold.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackPolicy {
    /// Leave the record without topical labels.
    None,
    /// Take the single best category with a positive score; ties go to the first name.
    #[default]
    Highest,
    /// Assign a fixed generic label.
    Marker(String),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LabelingRules {
    pub threshold: f32,
    pub fallback: FallbackPolicy,
    /// Add `<category>-focused` once a category collects this many distinct triggers (0 = off).
    pub focused_min_triggers: usize,
    /// Add paid/free, subscription-state and premium labels.
    pub status_labels: bool,
}

impl Default for LabelingRules {
    fn default() -> Self {
        Self {
            threshold: 3.0,
            fallback: FallbackPolicy::default(),
            focused_min_triggers: 0,
            status_labels: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TriggerRoot {
    #[serde(default)]
    pub labeling: LabelingRules,
    #[serde(default)]
    pub weights: SignalWeights,
    pub categories: BTreeMap<String, Vec<String>>,
}

/* ----------------------------
Compiled table
---------------------------- */

#[derive(Debug)]
struct CompiledTrigger {
    phrase: String,
    re: Regex,
}

/// Immutable after load; share it by `Arc` across workers.
#[derive(Debug)]
pub struct TriggerTable {
    pub cfg: TriggerRoot,
    compiled: Vec<(String, Vec<CompiledTrigger>)>,
}

/// Case-insensitive, word-bounded pattern; words of a phrase may be separated by any
/// whitespace run but must be contiguous.
pub fn trigger_pattern(phrase: &str) -> Option<String> {
    let words: Vec<String> = phrase.split_whitespace().map(regex::escape).collect();
    if words.is_empty() {
        return None;
    }
    let is_word = |c: Option<char>| c.is_some_and(|c| c.is_alphanumeric() || c == '_');
    let trimmed = phrase.trim();
    let lead = if is_word(trimmed.chars().next()) { r"\b" } else { "" };
    let tail = if is_word(trimmed.chars().last()) { r"\b" } else { "" };
    Some(format!("(?i){lead}{}{tail}", words.join(r"\s+")))
}

impl TriggerTable {
    pub fn builtin() -> anyhow::Result<Self> {
        Self::from_toml_str(BUILTIN_CATEGORIES)
    }

    pub fn from_path(path: &Path) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading trigger table from {}", path.display()))?;
        Self::from_toml_str(&content)
            .with_context(|| format!("parsing trigger table {}", path.display()))
    }

    pub fn from_toml_str(toml_str: &str) -> anyhow::Result<Self> {
        let cfg: TriggerRoot = toml::from_str(toml_str)?;
        let compiled = cfg
            .categories
            .iter()
            .map(|(category, phrases)| {
                let mut seen = BTreeSet::new();
                let triggers = phrases
                    .iter()
                    .filter(|p| seen.insert(p.trim().to_lowercase()))
                    .filter_map(|p| trigger_pattern(p).map(|pat| (p, pat)))
                    .map(|(p, pat)| {
                        let re = Regex::new(&pat).map_err(|e| {
                            anyhow::anyhow!("category `{category}` trigger `{p}` regex error: {e}")
                        })?;
                        Ok(CompiledTrigger {
                            phrase: p.trim().to_string(),
                            re,
                        })
                    })
                    .collect::<anyhow::Result<Vec<_>>>()?;
                Ok((category.clone(), triggers))
            })
            .collect::<anyhow::Result<Vec<_>>>()?;
        Ok(Self { cfg, compiled })
    }

    pub fn rules(&self) -> &LabelingRules {
        &self.cfg.labeling
    }

    /// Triggers of each category found in `text`, in table order.
    pub fn matches<'a>(&'a self, text: &str) -> Vec<(&'a str, &'a str)> {
        let mut out = Vec::new();
        for (category, triggers) in &self.compiled {
            for t in triggers {
                if t.re.is_match(text) {
                    out.push((category.as_str(), t.phrase.as_str()));
                }
            }
        }
        out
    }

    /// Accumulate weighted scores over all present signals.
    pub fn score(&self, signals: &[(SignalKind, String)]) -> CategoryScores {
        let mut scores = CategoryScores::default();
        for (kind, text) in signals {
            if text.trim().is_empty() {
                continue;
            }
            let w = self.cfg.weights.weight(*kind);
            for (category, phrase) in self.matches(text) {
                *scores.scores.entry(category.to_string()).or_insert(0.0) += w;
                scores
                    .triggers
                    .entry(category.to_string())
                    .or_default()
                    .insert(phrase.to_string());
            }
        }
        scores
    }

    /// Topical labels for a score card: threshold first, then the fallback policy.
    pub fn decide(&self, scores: &CategoryScores) -> BTreeSet<String> {
        let rules = &self.cfg.labeling;
        let mut labels: BTreeSet<String> = scores
            .scores
            .iter()
            .filter(|(_, s)| **s >= rules.threshold)
            .map(|(c, _)| c.clone())
            .collect();

        if labels.is_empty() {
            match &rules.fallback {
                FallbackPolicy::None => {}
                FallbackPolicy::Highest => {
                    if let Some(best) = scores.best() {
                        labels.insert(best.to_string());
                    }
                }
                FallbackPolicy::Marker(m) => {
                    labels.insert(m.clone());
                }
            }
        }

        if rules.focused_min_triggers > 0 {
            let focused: Vec<String> = labels
                .iter()
                .filter(|c| {
                    scores
                        .triggers
                        .get(*c)
                        .is_some_and(|t| t.len() >= rules.focused_min_triggers)
                })
                .map(|c| format!("{c}-focused"))
                .collect();
            labels.extend(focused);
        }
        labels
    }
}

/// Per-record score card, rebuilt on every pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CategoryScores {
    pub scores: BTreeMap<String, f32>,
    /// Distinct trigger phrases that fired per category.
    pub triggers: BTreeMap<String, BTreeSet<String>>,
}

impl CategoryScores {
    pub fn get(&self, category: &str) -> f32 {
        self.scores.get(category).copied().unwrap_or(0.0)
    }

    /// Highest positive score; ties resolve to the alphabetically first category.
    pub fn best(&self) -> Option<&str> {
        let mut best: Option<(&str, f32)> = None;
        for (c, s) in &self.scores {
            if *s <= 0.0 {
                continue;
            }
            if best.map_or(true, |(_, b)| *s > b) {
                best = Some((c.as_str(), *s));
            }
        }
        best.map(|(c, _)| c)
    }
}

/* ----------------------------
Known authors
---------------------------- */

#[derive(Debug, Clone, Default, Deserialize)]
struct AuthorsRoot {
    #[serde(default)]
    authors: HashMap<String, String>,
}

#[derive(Debug, Clone, Default)]
pub struct KnownAuthors {
    bios: HashMap<String, String>,
}

fn author_key(s: &str) -> String {
    s.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

impl KnownAuthors {
    pub fn builtin() -> anyhow::Result<Self> {
        Self::from_toml_str(BUILTIN_AUTHORS)
    }

    pub fn from_path(path: &Path) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading author table from {}", path.display()))?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(s: &str) -> anyhow::Result<Self> {
        let root: AuthorsRoot = toml::from_str(s)?;
        let bios = root
            .authors
            .into_iter()
            .map(|(k, v)| (author_key(&k), v))
            .collect();
        Ok(Self { bios })
    }

    pub fn bio_for(&self, author: &str) -> Option<&str> {
        self.bios.get(&author_key(author)).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.bios.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bios.is_empty()
    }
}

/* ----------------------------
Signals
---------------------------- */

/// Host label and path segments split on separators, e.g.
/// `https://ai-weekly.example.com/p/deep_learning` → `ai weekly p deep learning`.
pub fn url_tokens(link: &str) -> String {
    let Ok(u) = url::Url::parse(link.trim()) else {
        return String::new();
    };
    let mut parts = Vec::new();
    if let Some(label) = u
        .host_str()
        .and_then(|h| h.split('.').find(|l| !l.eq_ignore_ascii_case("www")))
    {
        parts.push(label.to_string());
    }
    if let Some(segments) = u.path_segments() {
        parts.extend(segments.filter(|s| !s.is_empty()).map(str::to_string));
    }
    parts
        .iter()
        .flat_map(|p| p.split(['-', '_', '.', '+']))
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LabelSettings {
    pub skip_if_labeled: bool,
    pub analyze_content: bool,
    pub extract_metadata: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LabelingSummary {
    pub labeled: usize,
    pub skipped: usize,
    pub fetched: usize,
    pub no_data: usize,
}

pub struct LabelEngine {
    table: Arc<TriggerTable>,
    authors: Arc<KnownAuthors>,
    settings: LabelSettings,
}

impl LabelEngine {
    pub fn new(table: Arc<TriggerTable>, authors: Arc<KnownAuthors>, settings: LabelSettings) -> Self {
        Self {
            table,
            authors,
            settings,
        }
    }

    pub fn should_skip(&self, rec: &PublicationRecord) -> bool {
        self.settings.skip_if_labeled && rec.has_labels()
    }

    pub fn signals(&self, rec: &PublicationRecord, content: Option<&str>) -> Vec<(SignalKind, String)> {
        let mut out = Vec::with_capacity(5);
        out.push((SignalKind::Name, rec.name.clone()));
        if let Some(bio) = self.authors.bio_for(&rec.author) {
            out.push((SignalKind::AuthorBio, bio.to_string()));
        }
        out.push((SignalKind::Url, url_tokens(&rec.link)));
        if let Some(c) = content {
            out.push((SignalKind::Content, c.to_string()));
        }
        out.push((SignalKind::Author, rec.author.clone()));
        out.retain(|(_, t)| !t.trim().is_empty());
        out
    }

    /// Full label set for one record (topical + optional status labels).
    pub fn labels_for(&self, rec: &PublicationRecord, content: Option<&str>) -> BTreeSet<String> {
        let signals = self.signals(rec, content);
        let scores = self.table.score(&signals);
        let mut labels = self.table.decide(&scores);

        if self.table.rules().status_labels {
            let paid = if rec.is_paid { "paid" } else { "free" };
            labels.insert(paid.to_string());
            if let Some(s) = rec.subscription_status.label() {
                labels.insert(s.to_string());
            }
            if rec.is_paid && rec.subscription_status == SubscriptionStatus::Subscribed {
                labels.insert("premium".to_string());
            }
        }

        debug!(
            target: "labeling",
            name = %rec.name,
            signals = signals.len(),
            scores = ?scores.scores,
            labels = ?labels,
            "scored publication"
        );
        labels
    }

    /// Label every record that needs it. Content for those records is fetched through
    /// the fetcher's bounded pool first; scoring then runs in record order.
    pub async fn label_records(
        &self,
        records: &mut [PublicationRecord],
        fetcher: Option<&ContentFetcher>,
        workers: usize,
    ) -> LabelingSummary {
        telemetry::ensure_described();
        let mut summary = LabelingSummary::default();

        let todo: Vec<usize> = records
            .iter()
            .enumerate()
            .filter(|(_, r)| !self.should_skip(r))
            .map(|(i, _)| i)
            .collect();
        summary.skipped = records.len() - todo.len();
        counter!(telemetry::RECORDS_SKIPPED).increment(summary.skipped as u64);

        let mut content: HashMap<usize, PageMetadata> = HashMap::new();
        if let (true, Some(fetcher)) = (self.settings.analyze_content, fetcher) {
            let items: Vec<(usize, String)> = todo
                .iter()
                .filter(|&&i| !records[i].link.trim().is_empty())
                .map(|&i| (i, records[i].link.clone()))
                .collect();
            for (i, meta) in fetcher.fetch_many(items, workers).await {
                match meta {
                    Some(m) => {
                        summary.fetched += 1;
                        content.insert(i, m);
                    }
                    None => summary.no_data += 1,
                }
            }
        }

        for &i in &todo {
            let meta = content.get(&i);
            let rec = &mut records[i];
            if let (true, Some(m)) = (self.settings.extract_metadata, meta) {
                fill_rich_fields(rec, m);
            }
            let blob = meta.filter(|m| !m.is_empty()).map(PageMetadata::blob);
            rec.labels = self.labels_for(rec, blob.as_deref());
            summary.labeled += 1;
        }
        counter!(telemetry::RECORDS_LABELED).increment(summary.labeled as u64);

        info!(
            target: "labeling",
            labeled = summary.labeled,
            skipped = summary.skipped,
            fetched = summary.fetched,
            no_data = summary.no_data,
            "labeling pass finished"
        );
        summary
    }
}

fn fill_rich_fields(rec: &mut PublicationRecord, m: &PageMetadata) {
    fn fill(slot: &mut Option<String>, value: &str) {
        if slot.as_deref().map_or(true, |s| s.trim().is_empty()) && !value.trim().is_empty() {
            *slot = Some(value.trim().to_string());
        }
    }
    fill(&mut rec.description, &m.description);
    fill(&mut rec.subscriber_info, &m.subscriber_info);
    fill(&mut rec.about_text, &m.about_text);
}

/// Keep records with at least one `include` label (if any are given), then drop
/// records carrying any `exclude` label.
pub fn apply_label_filters(
    records: Vec<PublicationRecord>,
    include: &[String],
    exclude: &[String],
) -> Vec<PublicationRecord> {
    let before = records.len();
    let out: Vec<_> = records
        .into_iter()
        .filter(|r| include.is_empty() || r.has_any_label(include))
        .filter(|r| exclude.is_empty() || !r.has_any_label(exclude))
        .collect();
    if out.len() != before {
        debug!(target: "labeling", before, after = out.len(), "label filters applied");
    }
    out
}
