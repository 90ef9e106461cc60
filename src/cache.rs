// src/cache.rs
//! Fingerprint cache: one JSON file per normalized URL, expiring after N days.
//!
//! - Key: SHA-256 of the normalized URL (see [`normalize_url`]).
//! - Writes go to a unique temp file and are renamed over the target, so
//!   concurrent workers on different keys never see each other's partial writes.
//! - Unreadable or corrupted entries are misses; the next `put` replaces them.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info};
use url::Url;

/// Normalize a URL so that spellings of the same resource share one key.
///
/// Adds `https://` when the scheme is missing, lowercases scheme and host,
/// drops default ports, query and fragment, and strips trailing slashes.
pub fn normalize_url(raw: &str) -> String {
    let trimmed = raw.trim();
    let with_scheme = if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("https://{trimmed}")
    };

    let Ok(parsed) = Url::parse(&with_scheme) else {
        return trimmed.trim_end_matches('/').to_ascii_lowercase();
    };

    let mut out = String::new();
    out.push_str(parsed.scheme());
    out.push_str("://");
    if let Some(host) = parsed.host_str() {
        out.push_str(&host.to_ascii_lowercase());
    }
    // `Url::port` already returns None for the scheme's default port
    if let Some(port) = parsed.port() {
        out.push(':');
        out.push_str(&port.to_string());
    }
    out.push_str(parsed.path().trim_end_matches('/'));
    out
}

/// Hex SHA-256 digest of the normalized URL.
pub fn fingerprint(raw_url: &str) -> String {
    use sha2::{Digest, Sha256};
    let digest = Sha256::digest(normalize_url(raw_url).as_bytes());
    let mut out = String::with_capacity(64);
    for b in digest.iter() {
        use std::fmt::Write as _;
        let _ = write!(&mut out, "{:02x}", b);
    }
    out
}

/// On-disk entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CacheEntry {
    pub fingerprint: String,
    pub stored_at: DateTime<Utc>,
    /// Original URL, diagnostic only.
    pub url: String,
    pub payload: String,
}

#[derive(Debug)]
pub struct FingerprintCache {
    dir: PathBuf,
    expiry: ChronoDuration,
    enabled: bool,
}

static TMP_SEQ: AtomicU64 = AtomicU64::new(0);

impl FingerprintCache {
    pub fn new(dir: impl Into<PathBuf>, expiry_days: u32) -> Self {
        Self {
            dir: dir.into(),
            expiry: ChronoDuration::days(i64::from(expiry_days)),
            enabled: true,
        }
    }

    /// A cache that never hits and never writes.
    pub fn disabled() -> Self {
        Self {
            dir: PathBuf::new(),
            expiry: ChronoDuration::zero(),
            enabled: false,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", fingerprint(key)))
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.get_at(key, Utc::now())
    }

    /// Lookup relative to `now`. Entries older than the expiry are misses.
    pub fn get_at(&self, key: &str, now: DateTime<Utc>) -> Option<String> {
        if !self.enabled {
            return None;
        }
        let path = self.entry_path(key);
        let raw = fs::read_to_string(&path).ok()?;
        let entry: CacheEntry = match serde_json::from_str(&raw) {
            Ok(e) => e,
            Err(e) => {
                debug!(target: "cache", path = %path.display(), error = %e, "corrupted cache entry");
                return None;
            }
        };
        if now.signed_duration_since(entry.stored_at) > self.expiry {
            debug!(target: "cache", fp = entry.fingerprint.get(..12).unwrap_or_default(), "cache entry expired");
            return None;
        }
        Some(entry.payload)
    }

    pub fn put(&self, key: &str, payload: &str) -> io::Result<()> {
        self.put_at(key, payload, Utc::now())
    }

    /// Store `payload` stamped with `now`, replacing whatever was there.
    pub fn put_at(&self, key: &str, payload: &str, now: DateTime<Utc>) -> io::Result<()> {
        if !self.enabled {
            return Ok(());
        }
        fs::create_dir_all(&self.dir)?;
        let fp = fingerprint(key);
        let entry = CacheEntry {
            fingerprint: fp.clone(),
            stored_at: now,
            url: key.to_string(),
            payload: payload.to_string(),
        };
        let json = serde_json::to_string(&entry)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

        let path = self.dir.join(format!("{fp}.json"));
        // unique per process and call: two workers writing one key must not share a temp file
        let seq = TMP_SEQ.fetch_add(1, Ordering::Relaxed);
        let tmp = self
            .dir
            .join(format!("{fp}.{}.{seq}.tmp", std::process::id()));
        let mut f = fs::File::create(&tmp)?;
        f.write_all(json.as_bytes())?;
        f.sync_all()?;
        drop(f);
        if let Err(e) = fs::rename(&tmp, &path) {
            let _ = fs::remove_file(&tmp);
            return Err(e);
        }
        Ok(())
    }

    /// Remove every entry. Returns `true` if a cache directory existed.
    pub fn clear(&self) -> io::Result<bool> {
        if !self.enabled || !self.dir.exists() {
            info!(target: "cache", dir = %self.dir.display(), "no cache directory to clear");
            return Ok(false);
        }
        fs::remove_dir_all(&self.dir)?;
        info!(target: "cache", dir = %self.dir.display(), "cleared cache directory");
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalization_collapses_equivalent_spellings() {
        let a = normalize_url("https://Example.com/x/");
        let b = normalize_url("example.com/x?utm_source=feed");
        let c = normalize_url("https://example.com:443/x#top");
        assert_eq!(a, "https://example.com/x");
        assert_eq!(a, b);
        assert_eq!(a, c);
        assert_eq!(normalize_url("https://example.com/"), "https://example.com");
    }

    #[test]
    fn normalization_keeps_distinct_resources_apart() {
        assert_ne!(
            normalize_url("https://example.com/x"),
            normalize_url("https://example.com/y")
        );
        assert_ne!(
            normalize_url("http://example.com:8080/x"),
            normalize_url("http://example.com/x")
        );
    }

    #[test]
    fn fingerprint_is_stable_hex() {
        let a = fingerprint("https://example.com/x/");
        let b = fingerprint("example.com/x");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn put_then_get_and_overwrite() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = FingerprintCache::new(tmp.path().join("c"), 7);
        assert_eq!(cache.get("https://a.example/"), None);
        cache.put("https://a.example/", "one").unwrap();
        assert_eq!(cache.get("a.example").as_deref(), Some("one"));
        cache.put("a.example", "two").unwrap();
        assert_eq!(cache.get("https://a.example").as_deref(), Some("two"));
    }

    #[test]
    fn corrupted_entry_is_miss_and_self_heals() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = FingerprintCache::new(tmp.path(), 7);
        let path = tmp.path().join(format!("{}.json", fingerprint("https://b.example")));
        fs::write(&path, b"{not json").unwrap();
        assert_eq!(cache.get("https://b.example"), None);
        cache.put("https://b.example", "fresh").unwrap();
        assert_eq!(cache.get("https://b.example").as_deref(), Some("fresh"));
    }

    #[test]
    fn disabled_cache_never_hits() {
        let cache = FingerprintCache::disabled();
        cache.put("https://a.example", "x").unwrap();
        assert_eq!(cache.get("https://a.example"), None);
        assert!(!cache.clear().unwrap());
    }

    #[test]
    fn clear_reports_existence() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = FingerprintCache::new(tmp.path().join("c"), 7);
        assert!(!cache.clear().unwrap());
        cache.put("https://a.example", "x").unwrap();
        assert!(cache.clear().unwrap());
        assert_eq!(cache.get("https://a.example"), None);
    }
}
