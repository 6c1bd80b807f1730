//! Page screenshots for baked previews.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Instant,
};

use serde_json::Value;
use tracing::{info, warn};

use crate::{
    domain::{
        preview::{PREVIEWS_FILE, PreviewRecord},
        slug::file_stem_for,
    },
    infra::{
        fetch::{ScreenshotCapturer, SkipList},
        json_store::{read_json, write_json_pretty},
    },
};

use super::{
    batch::{BatchOptions, ChunkOutcome, process_in_chunks},
    error::AppError,
    previews::write_category_splits,
};

const SCREENSHOT_EXTENSION: &str = "jpg";

/// Where screenshots are written on disk and how pages refer to them.
#[derive(Clone)]
pub struct ScreenshotStore {
    capturer: Arc<dyn ScreenshotCapturer>,
    output_dir: PathBuf,
    public_prefix: String,
}

impl ScreenshotStore {
    pub fn new(
        capturer: Arc<dyn ScreenshotCapturer>,
        output_dir: impl Into<PathBuf>,
        public_prefix: impl Into<String>,
    ) -> Self {
        Self {
            capturer,
            output_dir: output_dir.into(),
            public_prefix: public_prefix.into(),
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Capture `url` for the link `id` and return the site-relative image path.
    pub async fn capture_for(&self, id: &str, url: &str) -> Result<String, AppError> {
        let stem = file_stem_for(id).map_err(|err| AppError::validation(err.to_string()))?;
        let filename = format!("{stem}.{SCREENSHOT_EXTENSION}");
        self.capturer
            .capture(url, &self.output_dir.join(&filename))
            .await?;
        Ok(format!(
            "{}/{filename}",
            self.public_prefix.trim_end_matches('/')
        ))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScreenshotReport {
    /// Records in the requested window.
    pub selected: usize,
    pub skipped: usize,
    pub captured: usize,
    pub failed: usize,
}

/// Captures screenshots for a window of the baked previews and writes the paths back.
pub struct ScreenshotPipeline {
    store: ScreenshotStore,
    skip_list: SkipList,
    data_dir: PathBuf,
    batch: BatchOptions,
}

impl ScreenshotPipeline {
    pub fn new(store: ScreenshotStore, data_dir: impl Into<PathBuf>) -> Self {
        Self {
            store,
            skip_list: SkipList::default(),
            data_dir: data_dir.into(),
            batch: BatchOptions::default(),
        }
    }

    pub fn with_skip_list(mut self, skip_list: SkipList) -> Self {
        self.skip_list = skip_list;
        self
    }

    pub fn with_batch(mut self, batch: BatchOptions) -> Self {
        self.batch = batch;
        self
    }

    /// Capture records `start..start + count` of the previews sorted by id.
    pub async fn capture_range(
        &self,
        start: usize,
        count: Option<usize>,
    ) -> Result<ScreenshotReport, AppError> {
        let started_at = Instant::now();
        let path = self.data_dir.join(PREVIEWS_FILE);
        let Value::Object(mut previews) = read_json(&path)? else {
            return Err(AppError::validation(format!(
                "`{}` must be an object keyed by link id",
                path.display()
            )));
        };

        let mut records: Vec<PreviewRecord> = previews
            .iter()
            .filter_map(|(id, value)| match serde_json::from_value(value.clone()) {
                Ok(record) => Some(record),
                Err(err) => {
                    warn!(
                        target = "sitebake::screenshots",
                        op = "capture_range",
                        result = "invalid_record",
                        id = %id,
                        error = %err,
                        "Skipping preview record that failed validation"
                    );
                    None
                }
            })
            .collect();
        records.sort_by(|a, b| a.link.id.cmp(&b.link.id));

        let window: Vec<PreviewRecord> = records
            .into_iter()
            .skip(start)
            .take(count.unwrap_or(usize::MAX))
            .collect();

        let mut report = ScreenshotReport {
            selected: window.len(),
            ..ScreenshotReport::default()
        };
        let (blocked, targets): (Vec<_>, Vec<_>) = window
            .into_iter()
            .partition(|record| self.skip_list.blocks(&record.link.url));
        report.skipped = blocked.len();

        let outcomes = process_in_chunks(
            targets,
            |record: PreviewRecord| async move {
                let shot = self
                    .store
                    .capture_for(&record.link.id, &record.link.url)
                    .await?;
                Ok::<_, AppError>((record.link.id, shot))
            },
            self.batch,
        )
        .await;

        for outcome in outcomes {
            match outcome {
                ChunkOutcome::Done((id, shot)) => {
                    if let Some(Value::Object(record)) = previews.get_mut(&id) {
                        record.insert("screenshot".to_string(), Value::String(shot));
                    }
                    report.captured += 1;
                }
                ChunkOutcome::Failed { .. } => report.failed += 1,
            }
        }

        if report.captured > 0 {
            write_json_pretty(&path, &Value::Object(previews))?;
            write_category_splits(&self.data_dir)?;
        }

        info!(
            target = "sitebake::screenshots",
            op = "capture_range",
            result = "success",
            start,
            selected = report.selected,
            skipped = report.skipped,
            captured = report.captured,
            failed = report.failed,
            elapsed_ms = started_at.elapsed().as_millis() as u64,
            "Screenshot batch finished"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use std::{fs, sync::Mutex, time::Duration};

    use async_trait::async_trait;
    use serde_json::json;
    use tempfile::TempDir;

    use super::*;
    use crate::infra::error::InfraError;

    #[derive(Default)]
    struct RecordingCapturer {
        seen: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ScreenshotCapturer for RecordingCapturer {
        async fn capture(&self, url: &str, output: &Path) -> Result<(), InfraError> {
            self.seen.lock().unwrap().push(url.to_string());
            if url.contains("broken") {
                return Err(InfraError::screenshot("navigation failed"));
            }
            fs::create_dir_all(output.parent().unwrap())?;
            fs::write(output, b"jpeg")?;
            Ok(())
        }
    }

    fn record(id: &str, url: &str) -> Value {
        json!({
            "id": id,
            "url": url,
            "name": id,
            "group": "misc",
            "type": "link",
            "metadata": null,
            "screenshot": null,
            "last_checked": "2026-01-01T00:00:00Z"
        })
    }

    #[tokio::test]
    async fn captures_a_sorted_window_and_writes_paths_back() {
        let dir = TempDir::new().unwrap();
        let data = dir.path().join("data");
        write_json_pretty(
            &data.join(PREVIEWS_FILE),
            &json!({
                "c": record("c", "https://c.example/"),
                "a": record("a", "https://a.example/"),
                "b": record("b", "https://broken.example/"),
                "d": record("d", "https://www.linkedin.com/in/d"),
            }),
        )
        .unwrap();

        let capturer = Arc::new(RecordingCapturer::default());
        let store = ScreenshotStore::new(capturer.clone(), dir.path().join("shots"), "/images/screenshots/");
        let pipeline = ScreenshotPipeline::new(store, &data)
            .with_batch(BatchOptions::new(2, Duration::ZERO));

        let report = pipeline.capture_range(1, Some(3)).await.unwrap();
        assert_eq!(
            report,
            ScreenshotReport {
                selected: 3,
                skipped: 1,
                captured: 1,
                failed: 1
            }
        );
        assert_eq!(
            *capturer.seen.lock().unwrap(),
            vec!["https://broken.example/".to_string(), "https://c.example/".to_string()]
        );

        let previews = read_json(&data.join(PREVIEWS_FILE)).unwrap();
        assert_eq!(previews["c"]["screenshot"], "/images/screenshots/c.jpg");
        assert_eq!(previews["a"]["screenshot"], Value::Null);
        assert!(dir.path().join("shots").join("c.jpg").exists());
        let split = read_json(&data.join("link-previews-link.json")).unwrap();
        assert_eq!(split["c"]["screenshot"], "/images/screenshots/c.jpg");
    }

    #[tokio::test]
    async fn missing_previews_file_is_fatal() {
        let dir = TempDir::new().unwrap();
        let store = ScreenshotStore::new(
            Arc::new(RecordingCapturer::default()),
            dir.path().join("shots"),
            "/shots",
        );
        let err = ScreenshotPipeline::new(store, dir.path())
            .capture_range(0, None)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Infra(_)));
    }
}
