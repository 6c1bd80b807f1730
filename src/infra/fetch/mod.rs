//! External fetchers: page metadata over HTTP and screenshots via a headless browser CLI.
//!
//! Both sit behind traits so pipelines can be exercised without network access.

use std::path::Path;

use async_trait::async_trait;
use url::Url;

use crate::domain::{links::host_matches, preview::LinkMetadata};

use super::error::InfraError;

mod metadata;
mod screenshot;

pub use metadata::{HttpMetadataFetcher, MetadataFetcherConfig, extract_metadata};
pub use screenshot::{CliScreenshotCapturer, ScreenshotConfig};

/// Message recorded for links whose domain is on the skip list.
pub const SKIPPED_MESSAGE: &str = "skipped: domain blocks automated previews";

/// Domains known to block headless scraping.
pub const DEFAULT_SKIP_DOMAINS: [&str; 5] = [
    "linkedin.com",
    "instagram.com",
    "facebook.com",
    "x.com",
    "twitter.com",
];

/// Contract implemented by page metadata scrapers.
#[async_trait]
pub trait MetadataFetcher: Send + Sync {
    /// Scrape `url`. Failures are reported as [`LinkMetadata::Error`], never raised.
    async fn fetch_metadata(&self, url: &str) -> LinkMetadata;
}

/// Contract implemented by screenshot backends.
#[async_trait]
pub trait ScreenshotCapturer: Send + Sync {
    /// Capture `url` as a JPEG at `output`.
    async fn capture(&self, url: &str, output: &Path) -> Result<(), InfraError>;
}

/// Fixed denylist of domains that are never fetched.
#[derive(Debug, Clone)]
pub struct SkipList {
    domains: Vec<String>,
}

impl SkipList {
    pub fn new<I, S>(domains: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let domains = domains
            .into_iter()
            .map(|domain| domain.as_ref().trim().to_ascii_lowercase())
            .filter(|domain| !domain.is_empty())
            .collect();
        Self { domains }
    }

    /// True when `url` points at a skip-listed domain (or is not a URL at all).
    pub fn blocks(&self, url: &str) -> bool {
        let Ok(parsed) = Url::parse(url) else {
            return true;
        };
        let Some(host) = parsed.host_str() else {
            return true;
        };
        self.domains
            .iter()
            .any(|domain| host_matches(host, domain))
    }

    pub fn domains(&self) -> &[String] {
        &self.domains
    }
}

impl Default for SkipList {
    fn default() -> Self {
        Self::new(DEFAULT_SKIP_DOMAINS)
    }
}
