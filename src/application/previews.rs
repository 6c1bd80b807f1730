//! Link preview refresh: site config links -> `links.json` -> `link-previews*.json`.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use async_trait::async_trait;
use serde_json::{Map, Value};
use time::{Duration, OffsetDateTime};
use tracing::{info, warn};

use crate::{
    domain::{
        links::{LinkItem, LinkType},
        preview::{LINKS_FILE, LinkMetadata, PREVIEWS_FILE, PreviewRecord, category_file},
        stats::UpdateStats,
    },
    infra::{
        fetch::{MetadataFetcher, SKIPPED_MESSAGE, SkipList},
        json_store::{read_json_if_exists, shape_name, write_json_pretty},
    },
};

use super::{
    batch::BatchOptions,
    error::AppError,
    incremental::{RecordProcessor, UpdateRequest, update_data_incrementally},
    screenshots::ScreenshotStore,
    site_config::{collect_links, merge_site_config},
};

pub const DEFAULT_FRESHNESS_DAYS: i64 = 7;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefreshOptions {
    /// Recompute every record regardless of age.
    pub force: bool,
    /// Maximum number of network fetches in this run.
    ///
    /// Records past the budget are still counted as added or updated in the
    /// stats, but keep their previous content. [`PreviewReport::deferred`]
    /// counts them.
    pub limit: Option<usize>,
    /// Only refresh records without usable metadata.
    pub missing_only: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreviewReport {
    pub stats: UpdateStats,
    pub links: usize,
    /// Records scheduled for a fetch that the `limit` budget left unchanged.
    pub deferred: usize,
    pub categories: Vec<(LinkType, usize)>,
}

pub struct PreviewPipeline {
    fetcher: Arc<dyn MetadataFetcher>,
    screenshots: Option<ScreenshotStore>,
    skip_list: SkipList,
    data_dir: PathBuf,
    site_config_dir: PathBuf,
    batch: BatchOptions,
    freshness: Duration,
}

impl PreviewPipeline {
    pub fn new(
        fetcher: Arc<dyn MetadataFetcher>,
        data_dir: impl Into<PathBuf>,
        site_config_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            fetcher,
            screenshots: None,
            skip_list: SkipList::default(),
            data_dir: data_dir.into(),
            site_config_dir: site_config_dir.into(),
            batch: BatchOptions::default(),
            freshness: Duration::days(DEFAULT_FRESHNESS_DAYS),
        }
    }

    pub fn with_screenshots(mut self, store: ScreenshotStore) -> Self {
        self.screenshots = Some(store);
        self
    }

    pub fn with_skip_list(mut self, skip_list: SkipList) -> Self {
        self.skip_list = skip_list;
        self
    }

    pub fn with_batch(mut self, batch: BatchOptions) -> Self {
        self.batch = batch;
        self
    }

    pub fn with_freshness(mut self, freshness: Duration) -> Self {
        self.freshness = freshness;
        self
    }

    /// Rebuild `links.json` from the site config and refresh previews incrementally.
    pub async fn refresh(&self, options: RefreshOptions) -> Result<PreviewReport, AppError> {
        let config = merge_site_config(&self.site_config_dir);
        let links = collect_links(&config);
        let source_path = self.data_dir.join(LINKS_FILE);
        write_links(&source_path, &links)?;

        let processor = PreviewProcessor {
            fetcher: self.fetcher.as_ref(),
            screenshots: self.screenshots.as_ref(),
            skip_list: &self.skip_list,
            freshness: self.freshness,
            missing_only: options.missing_only,
            budget: options.limit.map(AtomicUsize::new),
            deferred: AtomicUsize::new(0),
            now: OffsetDateTime::now_utc(),
        };

        let request = UpdateRequest::new(source_path, self.data_dir.join(PREVIEWS_FILE))
            .force_regenerate(options.force)
            .batch(self.batch);
        let stats = update_data_incrementally(&request, &processor).await?;
        let categories = write_category_splits(&self.data_dir)?;
        let deferred = processor.deferred.load(Ordering::SeqCst);
        if deferred > 0 {
            warn!(
                target = "sitebake::previews",
                op = "refresh",
                deferred,
                limit = options.limit,
                "Fetch budget exhausted, some records were left unchanged"
            );
        }

        info!(
            target = "sitebake::previews",
            op = "refresh",
            result = "success",
            links = links.len(),
            added = stats.added,
            updated = stats.updated,
            skipped = stats.skipped,
            removed = stats.removed,
            elapsed_ms = stats.processing_time,
            "Link previews refreshed"
        );

        Ok(PreviewReport {
            stats,
            links: links.len(),
            deferred,
            categories,
        })
    }
}

/// Id-keyed link document. Duplicate ids keep the last link.
fn write_links(path: &Path, links: &[LinkItem]) -> Result<(), AppError> {
    let mut document = Map::with_capacity(links.len());
    for link in links {
        if document.contains_key(&link.id) {
            warn!(
                target = "sitebake::previews",
                op = "write_links",
                id = %link.id,
                "Duplicate link id, the later link wins"
            );
        }
        document.insert(link.id.clone(), serde_json::to_value(link)?);
    }
    write_json_pretty(path, &Value::Object(document))?;
    Ok(())
}

/// Split `link-previews.json` into one file per link type.
pub fn write_category_splits(data_dir: &Path) -> Result<Vec<(LinkType, usize)>, AppError> {
    let path = data_dir.join(PREVIEWS_FILE);
    let previews = match read_json_if_exists(&path)? {
        Some(Value::Object(previews)) => previews,
        Some(other) => {
            warn!(
                target = "sitebake::previews",
                op = "write_category_splits",
                path = %path.display(),
                found = shape_name(&other),
                "Previews file is not an object, writing empty categories"
            );
            Map::new()
        }
        None => Map::new(),
    };

    let mut split: HashMap<LinkType, Map<String, Value>> = LinkType::ALL
        .into_iter()
        .map(|kind| (kind, Map::new()))
        .collect();

    for (id, value) in previews {
        match serde_json::from_value::<PreviewRecord>(value.clone()) {
            Ok(record) => {
                split.entry(record.link.kind).or_default().insert(id, value);
            }
            Err(err) => warn!(
                target = "sitebake::previews",
                op = "write_category_splits",
                id = %id,
                error = %err,
                "Skipping preview record that failed validation"
            ),
        }
    }

    let mut counts = Vec::with_capacity(split.len());
    for kind in LinkType::ALL {
        let records = split.remove(&kind).unwrap_or_default();
        counts.push((kind, records.len()));
        write_json_pretty(&data_dir.join(category_file(kind)), &Value::Object(records))?;
    }
    Ok(counts)
}

struct PreviewProcessor<'a> {
    fetcher: &'a dyn MetadataFetcher,
    screenshots: Option<&'a ScreenshotStore>,
    skip_list: &'a SkipList,
    freshness: Duration,
    missing_only: bool,
    /// Remaining network fetches, unbounded when `None`.
    budget: Option<AtomicUsize>,
    deferred: AtomicUsize,
    now: OffsetDateTime,
}

impl PreviewProcessor<'_> {
    fn take_budget(&self) -> bool {
        match &self.budget {
            None => true,
            Some(remaining) => remaining
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok(),
        }
    }

    async fn screenshot_for(
        &self,
        link: &LinkItem,
        previous: Option<&PreviewRecord>,
    ) -> Option<String> {
        let kept = previous.and_then(|record| record.screenshot.clone());
        let Some(store) = self.screenshots else {
            return kept;
        };
        match store.capture_for(&link.id, &link.url).await {
            Ok(path) => Some(path),
            // The capturer already logged the failure.
            Err(_) => kept,
        }
    }
}

#[async_trait]
impl RecordProcessor for PreviewProcessor<'_> {
    fn should_update(&self, item: &Value, existing: &Value) -> bool {
        let Ok(record) = serde_json::from_value::<PreviewRecord>(existing.clone()) else {
            return true;
        };
        if item.get("url").and_then(Value::as_str) != Some(record.link.url.as_str()) {
            return true;
        }
        if self.skip_list.blocks(&record.link.url) {
            return !self.missing_only && record.is_stale(self.now, self.freshness);
        }
        if self.missing_only {
            return record.lacks_metadata();
        }
        record.lacks_metadata() || record.is_stale(self.now, self.freshness)
    }

    async fn process(&self, item: &Value, existing: Option<&Value>) -> Result<Value, AppError> {
        let link: LinkItem = serde_json::from_value(item.clone())?;
        let previous = existing.and_then(|value| {
            serde_json::from_value::<PreviewRecord>(value.clone()).ok()
        });

        if self.skip_list.blocks(&link.url) {
            let record = PreviewRecord::new(
                link,
                Some(LinkMetadata::error(SKIPPED_MESSAGE)),
                None,
                self.now,
            );
            return Ok(serde_json::to_value(record)?);
        }

        if !self.take_budget() {
            self.deferred.fetch_add(1, Ordering::SeqCst);
            let record = match previous {
                Some(mut record) => {
                    record.link = link;
                    record
                }
                None => PreviewRecord::new(link, None, None, self.now),
            };
            return Ok(serde_json::to_value(record)?);
        }

        let metadata = self.fetcher.fetch_metadata(&link.url).await;
        let screenshot = if metadata.is_error() {
            previous.as_ref().and_then(|record| record.screenshot.clone())
        } else {
            self.screenshot_for(&link, previous.as_ref()).await
        };

        let record = PreviewRecord::new(link, Some(metadata), screenshot, self.now);
        Ok(serde_json::to_value(record)?)
    }
}
