//! Persisted link previews.

use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};

use super::links::{LinkItem, LinkType};

/// Consolidated preview document, keyed by link id.
pub const PREVIEWS_FILE: &str = "link-previews.json";
/// Id-keyed link source produced from the site configuration.
pub const LINKS_FILE: &str = "links.json";

/// Per-category preview document for `kind`.
pub fn category_file(kind: LinkType) -> String {
    format!("link-previews-{}.json", kind.as_str())
}

/// Fields scraped from a page. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publisher: Option<String>,
}

/// Outcome of a metadata fetch, tagged by `status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum LinkMetadata {
    Success(PageMetadata),
    Error { message: String },
}

impl LinkMetadata {
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, LinkMetadata::Error { .. })
    }

    /// Scraped fields, absent for error records.
    pub fn page(&self) -> Option<&PageMetadata> {
        match self {
            LinkMetadata::Success(page) => Some(page),
            LinkMetadata::Error { .. } => None,
        }
    }

    pub fn title(&self) -> Option<&str> {
        self.page().and_then(|page| page.title.as_deref())
    }

    pub fn description(&self) -> Option<&str> {
        self.page().and_then(|page| page.description.as_deref())
    }

    pub fn image(&self) -> Option<&str> {
        self.page().and_then(|page| page.image.as_deref())
    }

    pub fn error_message(&self) -> Option<&str> {
        match self {
            LinkMetadata::Error { message } => Some(message),
            LinkMetadata::Success(_) => None,
        }
    }
}

/// The enriched, persisted form of a [`LinkItem`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreviewRecord {
    #[serde(flatten)]
    pub link: LinkItem,
    #[serde(default)]
    pub metadata: Option<LinkMetadata>,
    #[serde(default)]
    pub screenshot: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub last_checked: OffsetDateTime,
}

impl PreviewRecord {
    pub fn new(
        link: LinkItem,
        metadata: Option<LinkMetadata>,
        screenshot: Option<String>,
        last_checked: OffsetDateTime,
    ) -> Self {
        Self {
            link,
            metadata,
            screenshot,
            last_checked,
        }
    }

    /// True when the record has no usable metadata yet.
    pub fn lacks_metadata(&self) -> bool {
        self.metadata.as_ref().is_none_or(LinkMetadata::is_error)
    }

    /// True once `freshness` has elapsed since the last check.
    pub fn is_stale(&self, now: OffsetDateTime, freshness: Duration) -> bool {
        now - self.last_checked >= freshness
    }
}
