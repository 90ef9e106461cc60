// src/record.rs
//! Publication records exchanged with the list-parsing and export collaborators.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::PathBuf;

/// Subscription state as scraped from the reads page.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionStatus {
    Subscribed,
    Following,
    Unsubscribed,
    #[default]
    Unknown,
}

impl SubscriptionStatus {
    /// Lenient parse of the free-text status shown on the page.
    pub fn from_text(s: &str) -> Self {
        let s = s.trim().to_ascii_lowercase();
        // "unsubscribed" contains "subscribed", check it first
        if s.contains("unsubscribed") {
            Self::Unsubscribed
        } else if s.contains("subscribed") {
            Self::Subscribed
        } else if s.contains("follow") {
            Self::Following
        } else {
            Self::Unknown
        }
    }

    pub fn label(self) -> Option<&'static str> {
        match self {
            Self::Subscribed => Some("subscribed"),
            Self::Following => Some("following"),
            Self::Unsubscribed => Some("unsubscribed"),
            Self::Unknown => None,
        }
    }
}

/// One subscribed publication. The core mutates `link` (normalization),
/// `icon_path`, `labels` and the rich fields.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PublicationRecord {
    pub name: String,
    #[serde(default)]
    pub author: String,
    pub link: String,
    /// Remote icon URL as found on the reads page.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon_url: Option<String>,
    /// Local icon file, absolute once downloaded or reused.
    #[serde(default, rename = "icon", skip_serializing_if = "Option::is_none")]
    pub icon_path: Option<PathBuf>,
    #[serde(default)]
    pub is_paid: bool,
    #[serde(default)]
    pub subscription_status: SubscriptionStatus,
    #[serde(default)]
    pub labels: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subscriber_info: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub about_text: Option<String>,
}

impl PublicationRecord {
    pub fn new(name: impl Into<String>, author: impl Into<String>, link: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            author: author.into(),
            link: link.into(),
            ..Default::default()
        }
    }

    pub fn with_labels<I, S>(mut self, labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.labels = labels.into_iter().map(Into::into).collect();
        self
    }

    pub fn has_labels(&self) -> bool {
        !self.labels.is_empty()
    }

    pub fn has_any_label(&self, set: &[String]) -> bool {
        set.iter().any(|l| self.labels.contains(l))
    }
}
