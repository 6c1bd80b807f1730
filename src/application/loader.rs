//! Cached, never-failing reads of the baked JSON data files.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::{Arc, RwLock},
    time::{Duration, Instant},
};

use metrics::counter;
use serde_json::Value;
use tracing::{debug, error, warn};

use crate::{
    domain::{
        links::LinkType,
        preview::{PREVIEWS_FILE, PreviewRecord, category_file},
    },
    infra::{
        error::InfraError,
        json_store::{empty_document_for, read_json},
    },
    util::lock::{rw_read, rw_write},
};

const CACHE_TARGET: &str = "sitebake::loader::cache";
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadOptions {
    /// Read from the published data directory instead of the internal one.
    pub use_public: bool,
    pub cache: bool,
    pub ttl: Duration,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            use_public: false,
            cache: true,
            ttl: DEFAULT_CACHE_TTL,
        }
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    data: Value,
    expiry: Instant,
}

type CacheKey = (String, bool);

/// In-memory cache of parsed data files keyed by `(filename, use_public)`.
#[derive(Debug, Default)]
pub struct DataCache {
    entries: RwLock<HashMap<CacheKey, CacheEntry>>,
}

impl DataCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Live entry for `key`; expired entries are evicted.
    fn get(&self, key: &CacheKey) -> Option<Value> {
        let now = Instant::now();
        {
            let entries = rw_read(&self.entries, CACHE_TARGET, "get");
            match entries.get(key) {
                Some(entry) if now < entry.expiry => return Some(entry.data.clone()),
                Some(_) => {}
                None => return None,
            }
        }

        let mut entries = rw_write(&self.entries, CACHE_TARGET, "evict");
        if entries.get(key).is_some_and(|entry| now >= entry.expiry) {
            entries.remove(key);
        }
        None
    }

    fn insert(&self, key: CacheKey, data: Value, ttl: Duration) {
        let expiry = Instant::now() + ttl;
        rw_write(&self.entries, CACHE_TARGET, "insert").insert(key, CacheEntry { data, expiry });
    }

    pub fn clear(&self) {
        rw_write(&self.entries, CACHE_TARGET, "clear").clear();
    }

    pub fn len(&self) -> usize {
        rw_read(&self.entries, CACHE_TARGET, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone)]
pub struct DataLoader {
    internal_dir: PathBuf,
    public_dir: PathBuf,
    cache: Arc<DataCache>,
    defaults: LoadOptions,
}

impl DataLoader {
    pub fn new(internal_dir: impl Into<PathBuf>, public_dir: impl Into<PathBuf>) -> Self {
        Self {
            internal_dir: internal_dir.into(),
            public_dir: public_dir.into(),
            cache: Arc::new(DataCache::new()),
            defaults: LoadOptions::default(),
        }
    }

    pub fn with_cache(mut self, cache: Arc<DataCache>) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_defaults(mut self, defaults: LoadOptions) -> Self {
        self.defaults = defaults;
        self
    }

    pub fn cache(&self) -> &Arc<DataCache> {
        &self.cache
    }

    pub fn defaults(&self) -> LoadOptions {
        self.defaults
    }

    fn path_for(&self, filename: &str, use_public: bool) -> PathBuf {
        let dir: &Path = if use_public {
            &self.public_dir
        } else {
            &self.internal_dir
        };
        dir.join(filename)
    }

    /// Load with the loader's default options.
    pub fn load(&self, filename: &str) -> Value {
        self.load_data(filename, self.defaults)
    }

    /// Load `filename`, falling back to a typed-empty document on any failure.
    pub fn load_data(&self, filename: &str, options: LoadOptions) -> Value {
        let key = (filename.to_string(), options.use_public);
        if options.cache {
            if let Some(data) = self.cache.get(&key) {
                counter!("sitebake_loader_cache_hit_total").increment(1);
                debug!(
                    target = "sitebake::loader",
                    op = "load_data",
                    result = "cache_hit",
                    filename,
                    "Served data file from cache"
                );
                return data;
            }
            counter!("sitebake_loader_cache_miss_total").increment(1);
        }

        let path = self.path_for(filename, options.use_public);
        let data = match read_json(&path) {
            Ok(data) => data,
            Err(err) if err.is_not_found() => {
                warn!(
                    target = "sitebake::loader",
                    op = "load_data",
                    result = "missing",
                    path = %path.display(),
                    "Data file not found, using empty fallback"
                );
                empty_document_for(filename)
            }
            Err(err) => {
                report_unreadable(&path, &err);
                empty_document_for(filename)
            }
        };

        if options.cache {
            self.cache.insert(key, data.clone(), options.ttl);
        }
        data
    }

    /// `data[key]` when the loaded document is an object holding `key`.
    pub fn get_data_item(&self, filename: &str, key: &str, default: Value) -> Value {
        match self.load(filename) {
            Value::Object(mut map) => map.remove(key).unwrap_or(default),
            _ => default,
        }
    }

    /// First preview whose url equals `url`: the consolidated file, then each category.
    pub fn get_preview_by_url(&self, url: &str) -> Option<PreviewRecord> {
        let files = std::iter::once(PREVIEWS_FILE.to_string())
            .chain(LinkType::ALL.into_iter().map(category_file));

        for filename in files {
            let data = self.load(&filename);
            if let Some(record) = find_record(&filename, data, url) {
                return Some(record);
            }
        }
        None
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
    }
}

fn find_record(filename: &str, data: Value, url: &str) -> Option<PreviewRecord> {
    let values: Vec<Value> = match data {
        Value::Object(map) => map.into_iter().map(|(_, value)| value).collect(),
        Value::Array(items) => items,
        _ => return None,
    };

    values
        .into_iter()
        .filter(|value| value.get("url").and_then(Value::as_str) == Some(url))
        .find_map(|value| match serde_json::from_value::<PreviewRecord>(value) {
            Ok(record) => Some(record),
            Err(err) => {
                warn!(
                    target = "sitebake::loader",
                    op = "get_preview_by_url",
                    result = "invalid_record",
                    filename,
                    url,
                    error = %err,
                    "Skipping preview record that failed validation"
                );
                None
            }
        })
}

fn report_unreadable(path: &Path, err: &InfraError) {
    error!(
        target = "sitebake::loader",
        op = "load_data",
        result = "unreadable",
        path = %path.display(),
        error = %err,
        "Data file could not be read, using empty fallback"
    );
}
