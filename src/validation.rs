// src/validation.rs
//! Record validation and fuzzy duplicate detection.
//!
//! - Errors exclude a record; warnings annotate it. Strict mode turns warnings into errors.
//! - Duplicates: normalized Levenshtein similarity over punctuation-insensitive names,
//!   compared pairwise across the whole list.

use crate::record::PublicationRecord;
use std::path::Path;
use strsim::normalized_levenshtein;
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

pub const MIN_NAME_CHARS: usize = 2;
pub const MAX_NAME_CHARS: usize = 200;
pub const DEFAULT_DUPLICATE_THRESHOLD: f64 = 0.9;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UrlError {
    #[error("URL is empty")]
    Empty,
    #[error("invalid URL format")]
    InvalidFormat,
    #[error("invalid scheme: {0}")]
    InvalidScheme(String),
    #[error("invalid domain: {0}")]
    InvalidDomain(String),
    #[error("URL parsing error: {0}")]
    Parse(String),
}

/// Clean and check a link. Scheme-less input gets `https://`.
pub fn validate_url(raw: &str) -> Result<String, UrlError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(UrlError::Empty);
    }
    let lowered = trimmed.to_ascii_lowercase();
    let cleaned = if lowered.starts_with("http://")
        || lowered.starts_with("https://")
        || trimmed.contains("://")
    {
        trimmed.to_string()
    } else {
        format!("https://{trimmed}")
    };

    let parsed = Url::parse(&cleaned).map_err(|e| match e {
        url::ParseError::EmptyHost => UrlError::InvalidFormat,
        other => UrlError::Parse(other.to_string()),
    })?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(UrlError::InvalidScheme(parsed.scheme().to_string()));
    }
    let host = parsed.host_str().ok_or(UrlError::InvalidFormat)?;
    if !host.contains('.') {
        return Err(UrlError::InvalidDomain(host.to_string()));
    }
    Ok(cleaned)
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationIssue {
    #[error("missing name")]
    MissingName,
    #[error("missing link")]
    MissingLink,
    #[error("invalid URL: {0}")]
    InvalidUrl(UrlError),
    #[error("missing author")]
    MissingAuthor,
    #[error("name is very short: '{0}'")]
    NameTooShort(String),
    #[error("name is unusually long ({0} chars)")]
    NameTooLong(usize),
    #[error("icon path is not absolute: {0}")]
    IconNotAbsolute(String),
    #[error("icon file does not exist: {0}")]
    IconMissing(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationReport {
    pub errors: Vec<ValidationIssue>,
    pub warnings: Vec<ValidationIssue>,
    /// Normalized link when it differs from the input.
    pub cleaned_link: Option<String>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Check a single record without mutating it.
pub fn validate_record(rec: &PublicationRecord, strict: bool) -> ValidationReport {
    let mut report = ValidationReport::default();
    let name = rec.name.trim();

    if name.is_empty() {
        report.errors.push(ValidationIssue::MissingName);
    } else {
        let len = name.chars().count();
        if len < MIN_NAME_CHARS {
            report
                .warnings
                .push(ValidationIssue::NameTooShort(name.to_string()));
        } else if len > MAX_NAME_CHARS {
            report.warnings.push(ValidationIssue::NameTooLong(len));
        }
    }

    if rec.link.trim().is_empty() {
        report.errors.push(ValidationIssue::MissingLink);
    } else {
        match validate_url(&rec.link) {
            Ok(cleaned) if cleaned != rec.link => report.cleaned_link = Some(cleaned),
            Ok(_) => {}
            Err(e) => report.errors.push(ValidationIssue::InvalidUrl(e)),
        }
    }

    if rec.author.trim().is_empty() {
        report.warnings.push(ValidationIssue::MissingAuthor);
    }

    if let Some(icon) = &rec.icon_path {
        let shown = icon.display().to_string();
        if !icon.is_absolute() {
            report.warnings.push(ValidationIssue::IconNotAbsolute(shown));
        } else if !Path::new(icon).exists() {
            report.warnings.push(ValidationIssue::IconMissing(shown));
        }
    }

    if strict {
        let promoted = std::mem::take(&mut report.warnings);
        report.errors.extend(promoted);
    }
    report
}

/// Records that failed validation, with their reports.
#[derive(Debug, Clone)]
pub struct Rejected {
    pub record: PublicationRecord,
    pub report: ValidationReport,
}

/// Validate every record, apply cleaned links to the survivors and split off the rest.
pub fn validate_all(
    records: Vec<PublicationRecord>,
    strict: bool,
) -> (Vec<PublicationRecord>, Vec<Rejected>) {
    let mut kept = Vec::with_capacity(records.len());
    let mut rejected = Vec::new();
    for mut rec in records {
        let report = validate_record(&rec, strict);
        if !report.is_valid() {
            warn!(
                target: "validation",
                name = %rec.name,
                errors = ?report.errors.iter().map(ToString::to_string).collect::<Vec<_>>(),
                "skipping invalid publication"
            );
            rejected.push(Rejected {
                record: rec,
                report,
            });
            continue;
        }
        if !report.warnings.is_empty() {
            debug!(
                target: "validation",
                name = %rec.name,
                warnings = ?report.warnings.iter().map(ToString::to_string).collect::<Vec<_>>(),
                "publication has warnings"
            );
        }
        if let Some(cleaned) = report.cleaned_link {
            rec.link = cleaned;
        }
        kept.push(rec);
    }
    (kept, rejected)
}

/// Lowercase, map punctuation to spaces, collapse whitespace.
pub fn normalize_name(s: &str) -> String {
    s.chars()
        .map(|c| {
            if c.is_alphanumeric() {
                c.to_lowercase().next().unwrap_or(c)
            } else {
                ' '
            }
        })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Similarity in [0, 1]; empty names never match.
pub fn name_similarity(a: &str, b: &str) -> f64 {
    let (na, nb) = (normalize_name(a), normalize_name(b));
    if na.is_empty() || nb.is_empty() {
        return 0.0;
    }
    normalized_levenshtein(&na, &nb)
}

#[derive(Debug, Clone, PartialEq)]
pub struct DuplicatePair {
    pub first: usize,
    pub second: usize,
    pub similarity: f64,
    pub same_link: bool,
}

/// Every pair (i < j) whose name similarity reaches `threshold`, or that share a link.
pub fn find_duplicates(records: &[PublicationRecord], threshold: f64) -> Vec<DuplicatePair> {
    let mut out = Vec::new();
    for i in 0..records.len() {
        for j in (i + 1)..records.len() {
            let (a, b) = (&records[i], &records[j]);
            let similarity = name_similarity(&a.name, &b.name);
            let same_link = !a.link.trim().is_empty() && a.link.trim() == b.link.trim();
            if similarity >= threshold || same_link {
                out.push(DuplicatePair {
                    first: i,
                    second: j,
                    similarity,
                    same_link,
                });
            }
        }
    }
    out
}
