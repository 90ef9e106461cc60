// src/config.rs
//! Pipeline settings loaded from TOML with env overrides.
//!
//! Resolution order:
//! 1) `$ENRICHER_CONFIG_PATH`
//! 2) `config/enricher.toml`
//! 3) built-in defaults
//!
//! Individual knobs can then be overridden through `ENRICHER_*` env vars.

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_CONFIG_PATH: &str = "config/enricher.toml";
pub const DEFAULT_CATEGORIES_PATH: &str = "config/categories.toml";
pub const DEFAULT_AUTHORS_PATH: &str = "config/authors.toml";

pub const ENV_CONFIG_PATH: &str = "ENRICHER_CONFIG_PATH";
pub const ENV_WORKERS: &str = "ENRICHER_WORKERS";
pub const ENV_CACHE_DIR: &str = "ENRICHER_CACHE_DIR";
pub const ENV_CACHE_EXPIRY_DAYS: &str = "ENRICHER_CACHE_EXPIRY_DAYS";
pub const ENV_STRICT: &str = "ENRICHER_STRICT";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NetworkSection {
    /// Per-attempt timeout, seconds.
    pub timeout_secs: f64,
    pub max_retries: u32,
    /// Delay between attempts against the same resource, seconds.
    pub retry_delay_secs: f64,
    pub user_agent: String,
}

impl Default for NetworkSection {
    fn default() -> Self {
        Self {
            timeout_secs: 10.0,
            max_retries: 2,
            retry_delay_secs: 1.0,
            user_agent: "reads-enricher/0.1".to_string(),
        }
    }
}

impl NetworkSection {
    pub fn timeout(&self) -> Duration {
        secs(self.timeout_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        secs(self.retry_delay_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheSection {
    pub enabled: bool,
    pub dir: PathBuf,
    pub expiry_days: u32,
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: PathBuf::from(".cache"),
            expiry_days: 7,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ImagesSection {
    pub enabled: bool,
    pub dir: PathBuf,
    pub workers: usize,
}

impl Default for ImagesSection {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: PathBuf::from("images"),
            workers: 5,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ValidationSection {
    pub enabled: bool,
    pub strict: bool,
    pub duplicate_threshold: f64,
}

impl Default for ValidationSection {
    fn default() -> Self {
        Self {
            enabled: true,
            strict: false,
            duplicate_threshold: 0.9,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LabelingSection {
    pub skip_if_labeled: bool,
    pub analyze_content: bool,
    /// Copy fetched description/subscriber/about text onto records.
    pub extract_metadata: bool,
    pub categories_path: PathBuf,
    pub authors_path: PathBuf,
    #[serde(default)]
    pub include_labels: Vec<String>,
    #[serde(default)]
    pub exclude_labels: Vec<String>,
}

impl Default for LabelingSection {
    fn default() -> Self {
        Self {
            skip_if_labeled: true,
            analyze_content: true,
            extract_metadata: false,
            categories_path: PathBuf::from(DEFAULT_CATEGORIES_PATH),
            authors_path: PathBuf::from(DEFAULT_AUTHORS_PATH),
            include_labels: Vec::new(),
            exclude_labels: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct EnricherConfig {
    pub network: NetworkSection,
    pub cache: CacheSection,
    pub images: ImagesSection,
    pub validation: ValidationSection,
    pub labeling: LabelingSection,
}

impl EnricherConfig {
    /// Load from env path / default path, falling back to defaults when no file exists,
    /// then apply env overrides.
    pub fn load() -> Result<Self> {
        let mut cfg = if let Ok(p) = std::env::var(ENV_CONFIG_PATH) {
            let pb = PathBuf::from(p);
            if !pb.exists() {
                return Err(anyhow!(
                    "{ENV_CONFIG_PATH} points to non-existent path {}",
                    pb.display()
                ));
            }
            Self::from_path(&pb)?
        } else {
            let pb = PathBuf::from(DEFAULT_CONFIG_PATH);
            if pb.exists() {
                Self::from_path(&pb)?
            } else {
                Self::default()
            }
        };
        cfg.apply_env_overrides();
        Ok(cfg)
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading enricher config from {}", path.display()))?;
        Self::from_toml_str(&content)
            .with_context(|| format!("parsing enricher config {}", path.display()))
    }

    pub fn from_toml_str(s: &str) -> Result<Self> {
        let cfg: Self = toml::from_str(s)?;
        Ok(cfg)
    }

    fn apply_env_overrides(&mut self) {
        if let Some(w) = parse_env::<usize>(ENV_WORKERS) {
            self.images.workers = w.max(1);
        }
        if let Ok(dir) = std::env::var(ENV_CACHE_DIR) {
            if !dir.trim().is_empty() {
                self.cache.dir = PathBuf::from(dir.trim());
            }
        }
        if let Some(days) = parse_env::<u32>(ENV_CACHE_EXPIRY_DAYS) {
            self.cache.expiry_days = days;
        }
        if let Ok(v) = std::env::var(ENV_STRICT) {
            self.validation.strict = matches!(v.trim(), "1" | "true" | "yes");
        }
    }
}

fn parse_env<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|s| s.trim().parse::<T>().ok())
}

fn secs(v: f64) -> Duration {
    if v.is_finite() && v > 0.0 {
        Duration::from_secs_f64(v)
    } else {
        Duration::ZERO
    }
}
