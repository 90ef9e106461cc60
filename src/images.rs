// src/images.rs
//! Icon acquisition: plan one download per target path, skip files already on
//! disk, fetch the rest through a bounded worker pool.
//!
//! Target paths are `<dir>/<sanitized name><ext>`, so an unchanged list resolves to
//! the same files run after run and the second run is all `Reused`.

use crate::http::{FetchError, PageSource};
use crate::record::PublicationRecord;
use crate::telemetry;
use futures::stream::{self, StreamExt};
use metrics::counter;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

const MAX_FILENAME_CHARS: usize = 200;
const DEFAULT_EXTENSION: &str = ".jpg";

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DownloadTask {
    pub url: String,
    pub target: PathBuf,
    /// Publication name the target was derived from.
    pub identity: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadOutcome {
    Reused,
    Downloaded { bytes: u64 },
    Failed(String),
}

impl DownloadOutcome {
    pub fn is_success(&self) -> bool {
        !matches!(self, DownloadOutcome::Failed(_))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DownloadSummary {
    pub reused: usize,
    pub downloaded: usize,
    pub failed: usize,
    pub bytes_written: u64,
}

impl DownloadSummary {
    pub fn from_results(results: &[(DownloadTask, DownloadOutcome)]) -> Self {
        let mut s = Self::default();
        for (_, outcome) in results {
            match outcome {
                DownloadOutcome::Reused => s.reused += 1,
                DownloadOutcome::Downloaded { bytes } => {
                    s.downloaded += 1;
                    s.bytes_written += bytes;
                }
                DownloadOutcome::Failed(_) => s.failed += 1,
            }
        }
        s
    }
}

static RE_UNSAFE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^A-Za-z0-9_\-.]").expect("unsafe regex"));
static RE_UNDERSCORES: Lazy<Regex> = Lazy::new(|| Regex::new(r"_{2,}").expect("underscore regex"));
static RE_EXT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9]{1,5}$").expect("extension regex"));

/// Filesystem-safe file name. Never empty.
pub fn sanitize_filename(name: &str) -> String {
    let replaced = RE_UNSAFE.replace_all(name.trim(), "_");
    let collapsed = RE_UNDERSCORES.replace_all(&replaced, "_");
    let trimmed = collapsed.trim_matches(|c| c == '_' || c == '.');
    if trimmed.is_empty() {
        return "unnamed_file".to_string();
    }
    trimmed.chars().take(MAX_FILENAME_CHARS).collect()
}

/// Extension (with dot) of the remote resource's last path segment, `.jpg` if none.
pub fn remote_extension(url: &str) -> String {
    let path = url::Url::parse(url)
        .map(|u| u.path().to_string())
        .unwrap_or_else(|_| url.split(['?', '#']).next().unwrap_or_default().to_string());
    let last = path.rsplit('/').next().unwrap_or_default();
    match last.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() && RE_EXT.is_match(ext) => {
            format!(".{}", ext.to_ascii_lowercase())
        }
        _ => DEFAULT_EXTENSION.to_string(),
    }
}

/// Deterministic local path for a publication's icon.
pub fn target_path(dir: &Path, publication_name: &str, icon_url: &str) -> PathBuf {
    dir.join(format!(
        "{}{}",
        sanitize_filename(publication_name),
        remote_extension(icon_url)
    ))
}

fn icon_target(dir: &Path, rec: &PublicationRecord) -> Option<PathBuf> {
    let url = rec.icon_url.as_deref().filter(|u| !u.trim().is_empty())?;
    if rec.name.trim().is_empty() {
        return None;
    }
    Some(target_path(dir, &rec.name, url))
}

/// One task per distinct target path, in record order. A later record that collapses
/// onto an already planned path gets no task of its own.
pub fn plan_downloads(records: &[PublicationRecord], dir: &Path) -> Vec<DownloadTask> {
    let mut planned: HashMap<PathBuf, usize> = HashMap::new();
    let mut tasks: Vec<DownloadTask> = Vec::new();
    for rec in records {
        let (Some(target), Some(url)) = (icon_target(dir, rec), rec.icon_url.as_deref()) else {
            continue;
        };
        let url = url.trim();
        if let Some(&i) = planned.get(&target) {
            let first = &tasks[i];
            if first.url == url {
                debug!(target: "images", name = %rec.name, path = %target.display(), "icon path already planned");
            } else {
                warn!(
                    target: "images",
                    name = %rec.name,
                    planned_for = %first.identity,
                    path = %target.display(),
                    "icon file name collides with another publication; icon skipped"
                );
            }
            continue;
        }
        planned.insert(target.clone(), tasks.len());
        tasks.push(DownloadTask {
            url: url.to_string(),
            target,
            identity: rec.name.clone(),
        });
    }
    tasks
}

/// Set `icon_path` on every record whose planned file is now on disk and was
/// fetched from that record's own icon URL.
pub fn apply_icons(
    records: &mut [PublicationRecord],
    dir: &Path,
    results: &[(DownloadTask, DownloadOutcome)],
) {
    let done: HashMap<&Path, &str> = results
        .iter()
        .filter(|(_, o)| o.is_success())
        .map(|(t, _)| (t.target.as_path(), t.url.as_str()))
        .collect();
    for rec in records.iter_mut() {
        let (Some(target), Some(url)) = (icon_target(dir, rec), rec.icon_url.as_deref()) else {
            continue;
        };
        if done.get(target.as_path()) == Some(&url.trim()) {
            rec.icon_path = Some(absolutize(&target));
        }
    }
}

fn absolutize(p: &Path) -> PathBuf {
    if p.is_absolute() {
        return p.to_path_buf();
    }
    std::env::current_dir()
        .map(|cwd| cwd.join(p))
        .unwrap_or_else(|_| p.to_path_buf())
}

pub struct ImageManager {
    source: Arc<dyn PageSource>,
    workers: usize,
    timeout: Duration,
}

impl ImageManager {
    pub fn new(source: Arc<dyn PageSource>, workers: usize, timeout: Duration) -> Self {
        Self {
            source,
            workers: workers.max(1),
            timeout,
        }
    }

    /// Process all tasks with at most `workers` in flight. Output order is completion order.
    pub async fn run(&self, tasks: Vec<DownloadTask>) -> Vec<(DownloadTask, DownloadOutcome)> {
        telemetry::ensure_described();
        let total = tasks.len();
        let results: Vec<_> = stream::iter(tasks)
            .map(|task| async move {
                let outcome = self.acquire(&task).await;
                (task, outcome)
            })
            .buffer_unordered(self.workers)
            .collect()
            .await;

        let s = DownloadSummary::from_results(&results);
        info!(
            target: "images",
            total,
            reused = s.reused,
            downloaded = s.downloaded,
            failed = s.failed,
            bytes = s.bytes_written,
            workers = self.workers,
            "icon acquisition finished"
        );
        results
    }

    async fn acquire(&self, task: &DownloadTask) -> DownloadOutcome {
        match tokio::fs::metadata(&task.target).await {
            Ok(m) if m.is_file() && m.len() > 0 => {
                counter!(telemetry::IMAGES_REUSED).increment(1);
                return DownloadOutcome::Reused;
            }
            Ok(m) if m.is_file() => {
                // zero-byte leftover from an earlier failure
                let _ = tokio::fs::remove_file(&task.target).await;
            }
            _ => {}
        }

        match self.download(task).await {
            Ok(bytes) => {
                counter!(telemetry::IMAGES_DOWNLOADED).increment(1);
                debug!(target: "images", path = %task.target.display(), bytes, "icon downloaded");
                DownloadOutcome::Downloaded { bytes }
            }
            Err(reason) => {
                counter!(telemetry::IMAGES_FAILED).increment(1);
                warn!(target: "images", url = %task.url, identity = %task.identity, %reason, "icon download failed");
                DownloadOutcome::Failed(reason)
            }
        }
    }

    async fn download(&self, task: &DownloadTask) -> Result<u64, String> {
        let bytes = match tokio::time::timeout(self.timeout, self.source.get_bytes(&task.url)).await
        {
            Ok(r) => r.map_err(|e| e.to_string())?,
            Err(_) => return Err(FetchError::Timeout(self.timeout).to_string()),
        };
        if bytes.is_empty() {
            return Err("empty response body".to_string());
        }

        if let Some(parent) = task.target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| format!("creating {}: {e}", parent.display()))?;
        }
        let tmp = partial_path(&task.target);
        if let Err(e) = tokio::fs::write(&tmp, &bytes).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(format!("writing {}: {e}", tmp.display()));
        }
        if let Err(e) = tokio::fs::rename(&tmp, &task.target).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(format!("renaming into {}: {e}", task.target.display()));
        }
        Ok(bytes.len() as u64)
    }
}

fn partial_path(target: &Path) -> PathBuf {
    let mut name = target
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".part");
    target.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_replaces_and_collapses() {
        assert_eq!(sanitize_filename("Money Stuff: Daily!"), "Money_Stuff_Daily");
        assert_eq!(sanitize_filename("  ..__  "), "unnamed_file");
        assert_eq!(sanitize_filename(""), "unnamed_file");
        assert_eq!(sanitize_filename("a/b\\c"), "a_b_c");
        assert_eq!(sanitize_filename(&"x".repeat(300)).len(), MAX_FILENAME_CHARS);
    }

    #[test]
    fn extension_follows_remote_resource() {
        assert_eq!(remote_extension("https://cdn.example/i/logo.PNG?w=80"), ".png");
        assert_eq!(remote_extension("https://cdn.example/i/logo"), ".jpg");
        assert_eq!(remote_extension("https://cdn.example/i/.hidden"), ".jpg");
        assert_eq!(remote_extension("https://cdn.example/i/a.b,c_d"), ".jpg");
        assert_eq!(remote_extension("not a url.webp"), ".webp");
    }

    #[test]
    fn target_path_is_stable_across_calls() {
        let dir = Path::new("images");
        let a = target_path(dir, "The Gradient", "https://cdn.example/x.png");
        let b = target_path(dir, "The Gradient", "https://cdn.example/x.png");
        assert_eq!(a, b);
        assert_eq!(a, PathBuf::from("images/The_Gradient.png"));
    }

    #[test]
    fn plan_collapses_colliding_names() {
        let mut a = PublicationRecord::new("Daily Brief", "", "https://a.example");
        a.icon_url = Some("https://cdn.example/a.png".into());
        let mut b = PublicationRecord::new("Daily  Brief!", "", "https://b.example");
        b.icon_url = Some("https://cdn.example/b.png".into());
        let mut c = PublicationRecord::new("Other", "", "https://c.example");
        c.icon_url = None;
        let tasks = plan_downloads(&[a, b, c], Path::new("img"));
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].identity, "Daily Brief");
    }

    #[test]
    fn colliding_record_with_other_url_gets_no_icon() {
        let dir = Path::new("img");
        let mut a = PublicationRecord::new("Daily Brief", "", "https://a.example");
        a.icon_url = Some("https://cdn.example/a.png".into());
        let mut b = PublicationRecord::new("Daily Brief!", "", "https://b.example");
        b.icon_url = Some("https://cdn.example/b.png".into());
        let mut c = PublicationRecord::new("Daily  Brief", "", "https://c.example");
        c.icon_url = Some(" https://cdn.example/a.png".into());
        let mut recs = vec![a, b, c];

        let tasks = plan_downloads(&recs, dir);
        assert_eq!(tasks.len(), 1);
        let results = vec![(tasks[0].clone(), DownloadOutcome::Downloaded { bytes: 4 })];
        apply_icons(&mut recs, dir, &results);

        assert!(recs[0].icon_path.is_some());
        assert!(recs[1].icon_path.is_none());
        // same remote icon, so sharing the file is correct
        assert_eq!(recs[2].icon_path, recs[0].icon_path);
    }

    #[test]
    fn failed_task_sets_no_icon() {
        let dir = Path::new("img");
        let mut a = PublicationRecord::new("Solo", "", "https://a.example");
        a.icon_url = Some("https://cdn.example/solo.png".into());
        let mut recs = vec![a];
        let tasks = plan_downloads(&recs, dir);
        let results = vec![(tasks[0].clone(), DownloadOutcome::Failed("404".into()))];
        apply_icons(&mut recs, dir, &results);
        assert!(recs[0].icon_path.is_none());
    }

    #[test]
    fn partial_path_is_sibling() {
        let p = partial_path(Path::new("/tmp/img/a.png"));
        assert_eq!(p, PathBuf::from("/tmp/img/a.png.part"));
    }
}
