//! Keep/refresh/drop merge of a source document into a previously baked target.
//!
//! The source drives the output: every source entry ends up in the target,
//! either copied from the previous run or recomputed by a [`RecordProcessor`].
//! Entries that exist only in the old target are dropped and counted. The
//! target is written exactly once, after every entry has been resolved, so a
//! failed run leaves the previous file in place.

use std::{
    collections::{HashMap, HashSet},
    path::PathBuf,
    time::Instant,
};

use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::{info, warn};

use crate::{
    domain::{error::DomainError, stats::UpdateStats},
    infra::json_store::{empty_like, read_json, read_json_if_exists, shape_name, write_json_pretty},
};

use super::{
    batch::{BatchOptions, ChunkOutcome, process_in_chunks},
    error::AppError,
};

/// Per-item behaviour plugged into [`update_data_incrementally`].
#[async_trait]
pub trait RecordProcessor: Send + Sync {
    /// Identifier used to match array entries against the previous target.
    fn identify(&self, item: &Value) -> Option<String> {
        item.get("id").and_then(Value::as_str).map(str::to_string)
    }

    /// Whether an entry that already has a baked counterpart must be recomputed.
    fn should_update(&self, _item: &Value, _existing: &Value) -> bool {
        false
    }

    async fn process(&self, item: &Value, existing: Option<&Value>) -> Result<Value, AppError>;
}

#[derive(Debug, Clone)]
pub struct UpdateRequest {
    pub source_path: PathBuf,
    pub target_path: PathBuf,
    pub force_regenerate: bool,
    pub batch: BatchOptions,
}

impl UpdateRequest {
    pub fn new(source_path: impl Into<PathBuf>, target_path: impl Into<PathBuf>) -> Self {
        Self {
            source_path: source_path.into(),
            target_path: target_path.into(),
            force_regenerate: false,
            batch: BatchOptions::default(),
        }
    }

    pub fn force_regenerate(mut self, force: bool) -> Self {
        self.force_regenerate = force;
        self
    }

    pub fn batch(mut self, batch: BatchOptions) -> Self {
        self.batch = batch;
        self
    }
}

enum Slot {
    Keep(Value),
    Pending(usize),
}

struct Job {
    item: Value,
    existing: Option<Value>,
}

/// Classified source entries, ready to be resolved.
struct Plan {
    /// Output keys for object-shaped sources, `None` for arrays.
    keys: Option<Vec<String>>,
    slots: Vec<Slot>,
    jobs: Vec<Job>,
    labels: Vec<String>,
    stats: UpdateStats,
}

impl Plan {
    fn new(capacity: usize, keyed: bool) -> Self {
        Self {
            keys: keyed.then(|| Vec::with_capacity(capacity)),
            slots: Vec::with_capacity(capacity),
            jobs: Vec::new(),
            labels: Vec::new(),
            stats: UpdateStats {
                total: capacity,
                ..UpdateStats::default()
            },
        }
    }

    fn keep(&mut self, existing: Value) {
        self.stats.skipped += 1;
        self.slots.push(Slot::Keep(existing));
    }

    fn schedule(&mut self, label: String, item: Value, existing: Option<Value>) {
        if existing.is_some() {
            self.stats.updated += 1;
        } else {
            self.stats.added += 1;
        }
        self.slots.push(Slot::Pending(self.jobs.len()));
        self.labels.push(label);
        self.jobs.push(Job { item, existing });
    }
}

/// Merge `request.source_path` into `request.target_path`.
pub async fn update_data_incrementally<P>(
    request: &UpdateRequest,
    processor: &P,
) -> Result<UpdateStats, AppError>
where
    P: RecordProcessor + ?Sized,
{
    let started_at = Instant::now();

    let source = read_json(&request.source_path)?;
    if !matches!(source, Value::Array(_) | Value::Object(_)) {
        return Err(AppError::validation(format!(
            "source `{}` must be an array or an object, found {}",
            request.source_path.display(),
            shape_name(&source)
        )));
    }
    let target = read_target(request, &source);

    let plan = match (source, target) {
        (Value::Array(items), Value::Array(previous)) => {
            plan_array(items, previous, request.force_regenerate, processor)
        }
        (Value::Object(entries), Value::Object(previous)) => {
            plan_object(entries, previous, request.force_regenerate, processor)
        }
        _ => {
            return Err(AppError::unexpected(
                "target shape diverged from source after normalisation",
            ));
        }
    };

    let Plan {
        keys,
        slots,
        jobs,
        labels,
        mut stats,
    } = plan;

    let outcomes = process_in_chunks(
        jobs,
        |job: Job| async move { processor.process(&job.item, job.existing.as_ref()).await },
        request.batch,
    )
    .await;

    let mut processed = Vec::with_capacity(outcomes.len());
    for (label, outcome) in labels.into_iter().zip(outcomes) {
        match outcome {
            ChunkOutcome::Done(value) => processed.push(Some(value)),
            ChunkOutcome::Failed { message } => {
                warn!(
                    target = "sitebake::incremental",
                    op = "update",
                    result = "error",
                    item = %label,
                    error = %message,
                    "Processing failed, target left untouched"
                );
                return Err(AppError::processing(label, message));
            }
        }
    }

    let mut resolved = slots.into_iter().map(|slot| match slot {
        Slot::Keep(value) => Ok(value),
        Slot::Pending(index) => processed
            .get_mut(index)
            .and_then(Option::take)
            .ok_or_else(|| AppError::unexpected(format!("missing result for job {index}"))),
    });

    let output = match keys {
        Some(keys) => {
            let mut map = Map::with_capacity(keys.len());
            for key in keys {
                let value = resolved
                    .next()
                    .ok_or_else(|| AppError::unexpected("fewer slots than keys"))??;
                map.insert(key, value);
            }
            Value::Object(map)
        }
        None => Value::Array(resolved.collect::<Result<Vec<_>, _>>()?),
    };

    write_json_pretty(&request.target_path, &output)?;

    stats.processing_time = started_at.elapsed().as_millis() as u64;
    if !stats.is_balanced() {
        return Err(DomainError::invariant(format!(
            "update classified {} of {} entries",
            stats.added + stats.updated + stats.skipped,
            stats.total
        ))
        .into());
    }

    info!(
        target = "sitebake::incremental",
        op = "update",
        result = "success",
        target_path = %request.target_path.display(),
        total = stats.total,
        added = stats.added,
        updated = stats.updated,
        skipped = stats.skipped,
        removed = stats.removed,
        elapsed_ms = stats.processing_time,
        "Incremental update finished"
    );
    Ok(stats)
}

/// Previous output, normalised to the source's shape. Never fails.
fn read_target(request: &UpdateRequest, source: &Value) -> Value {
    let path = &request.target_path;
    match read_json_if_exists(path) {
        Ok(Some(target)) if shape_name(&target) == shape_name(source) => target,
        Ok(Some(target)) => {
            warn!(
                target = "sitebake::incremental",
                op = "read_target",
                result = "shape_mismatch",
                path = %path.display(),
                expected = shape_name(source),
                found = shape_name(&target),
                "Target shape differs from source, starting from empty"
            );
            empty_like(source)
        }
        Ok(None) => empty_like(source),
        Err(err) => {
            warn!(
                target = "sitebake::incremental",
                op = "read_target",
                result = "unreadable",
                path = %path.display(),
                error = %err,
                "Target could not be read, starting from empty"
            );
            empty_like(source)
        }
    }
}

fn plan_array<P>(
    items: Vec<Value>,
    previous: Vec<Value>,
    force: bool,
    processor: &P,
) -> Plan
where
    P: RecordProcessor + ?Sized,
{
    let mut existing: HashMap<String, Value> = HashMap::with_capacity(previous.len());
    for entry in previous {
        if let Some(id) = processor.identify(&entry) {
            existing.insert(id, entry);
        }
    }

    let mut plan = Plan::new(items.len(), false);
    let mut consumed: HashSet<String> = HashSet::with_capacity(items.len());

    for (index, item) in items.into_iter().enumerate() {
        let Some(id) = processor.identify(&item) else {
            plan.schedule(format!("#{index}"), item, None);
            continue;
        };

        match existing.get(&id) {
            None => plan.schedule(id.clone(), item, None),
            Some(previous) if force || processor.should_update(&item, previous) => {
                plan.schedule(id.clone(), item, Some(previous.clone()))
            }
            Some(previous) => plan.keep(previous.clone()),
        }
        consumed.insert(id);
    }

    plan.stats.removed = existing
        .keys()
        .filter(|id| !consumed.contains(*id))
        .count();
    plan
}

fn plan_object<P>(
    entries: Map<String, Value>,
    mut previous: Map<String, Value>,
    force: bool,
    processor: &P,
) -> Plan
where
    P: RecordProcessor + ?Sized,
{
    let mut plan = Plan::new(entries.len(), true);

    for (key, item) in entries {
        match previous.remove(&key) {
            None => plan.schedule(key.clone(), item, None),
            Some(existing) if force || processor.should_update(&item, &existing) => {
                plan.schedule(key.clone(), item, Some(existing))
            }
            Some(existing) => plan.keep(existing),
        }
        if let Some(keys) = plan.keys.as_mut() {
            keys.push(key);
        }
    }

    plan.stats.removed = previous.len();
    plan
}

#[cfg(test)]
mod tests {
    use std::{
        fs,
        sync::atomic::{AtomicUsize, Ordering},
        time::Duration,
    };

    use serde_json::json;
    use tempfile::TempDir;

    use super::*;

    /// Stamps each processed item with a counter so recomputation is visible.
    #[derive(Default)]
    struct Stamp {
        calls: AtomicUsize,
        refresh: Option<&'static str>,
        fail_on: Option<&'static str>,
    }

    #[async_trait]
    impl RecordProcessor for Stamp {
        fn should_update(&self, item: &Value, _existing: &Value) -> bool {
            self.refresh.is_some_and(|id| item["id"] == id)
        }

        async fn process(&self, item: &Value, existing: Option<&Value>) -> Result<Value, AppError> {
            if self.fail_on.is_some_and(|id| item["id"] == id) {
                return Err(AppError::unexpected("boom"));
            }
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            let mut out = item.clone();
            out["processed"] = json!(call);
            out["had_existing"] = json!(existing.is_some());
            Ok(out)
        }
    }

    struct Fixture {
        _dir: TempDir,
        request: UpdateRequest,
    }

    fn fixture(source: Value, target: Option<&str>) -> Fixture {
        let dir = TempDir::new().unwrap();
        let source_path = dir.path().join("source.json");
        let target_path = dir.path().join("out").join("target.json");
        fs::write(&source_path, serde_json::to_vec(&source).unwrap()).unwrap();
        if let Some(target) = target {
            fs::create_dir_all(target_path.parent().unwrap()).unwrap();
            fs::write(&target_path, target).unwrap();
        }
        let request = UpdateRequest::new(source_path, target_path)
            .batch(BatchOptions::new(2, Duration::ZERO));
        Fixture { _dir: dir, request }
    }

    fn target(fixture: &Fixture) -> Value {
        serde_json::from_str(&fs::read_to_string(&fixture.request.target_path).unwrap()).unwrap()
    }

    #[tokio::test]
    async fn empty_target_adds_everything() {
        let fx = fixture(json!([{ "id": "a" }, { "id": "b" }, { "id": "c" }]), None);
        let stats = update_data_incrementally(&fx.request, &Stamp::default())
            .await
            .unwrap();

        assert_eq!((stats.total, stats.added, stats.updated, stats.skipped, stats.removed), (3, 3, 0, 0, 0));
        let ids: Vec<_> = target(&fx).as_array().unwrap().iter().map(|v| v["id"].clone()).collect();
        assert_eq!(ids, vec![json!("a"), json!("b"), json!("c")]);
    }

    #[tokio::test]
    async fn second_run_is_byte_identical() {
        let fx = fixture(json!([{ "id": "a" }, { "id": "b" }]), None);
        let processor = Stamp::default();
        update_data_incrementally(&fx.request, &processor).await.unwrap();
        let first = fs::read(&fx.request.target_path).unwrap();

        let stats = update_data_incrementally(&fx.request, &processor).await.unwrap();
        let second = fs::read(&fx.request.target_path).unwrap();

        assert_eq!(stats.skipped, 2);
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn dropped_identifiers_are_counted_and_omitted() {
        let fx = fixture(
            json!([{ "id": "a" }, { "id": "b" }]),
            Some(r#"[{"id":"a","old":true},{"id":"b","old":true},{"id":"c","old":true}]"#),
        );
        let stats = update_data_incrementally(&fx.request, &Stamp::default())
            .await
            .unwrap();

        assert_eq!(stats.removed, 1);
        assert_eq!(stats.skipped, 2);
        let out = target(&fx);
        assert!(out.as_array().unwrap().iter().all(|v| v["id"] != "c"));
        assert_eq!(out[0]["old"], true);
    }

    #[tokio::test]
    async fn should_update_and_force_recompute_with_existing() {
        let fx = fixture(
            json!([{ "id": "a" }, { "id": "b" }]),
            Some(r#"[{"id":"a"},{"id":"b"}]"#),
        );
        let processor = Stamp {
            refresh: Some("b"),
            ..Stamp::default()
        };
        let stats = update_data_incrementally(&fx.request, &processor).await.unwrap();
        assert_eq!((stats.updated, stats.skipped), (1, 1));
        assert_eq!(target(&fx)[1]["had_existing"], true);

        let forced = fx.request.clone().force_regenerate(true);
        let stats = update_data_incrementally(&forced, &processor).await.unwrap();
        assert_eq!((stats.updated, stats.skipped), (2, 0));
    }

    #[tokio::test]
    async fn items_without_identifier_are_always_added() {
        let fx = fixture(json!([{ "name": "anon" }]), Some(r#"[{"name":"anon"}]"#));
        let stats = update_data_incrementally(&fx.request, &Stamp::default())
            .await
            .unwrap();
        assert_eq!((stats.added, stats.skipped), (1, 0));
    }

    #[tokio::test]
    async fn object_sources_merge_by_key() {
        let fx = fixture(
            json!({ "a": { "id": "a" }, "b": { "id": "b" } }),
            Some(r#"{"a":{"id":"a","kept":true},"z":{"id":"z"}}"#),
        );
        let stats = update_data_incrementally(&fx.request, &Stamp::default())
            .await
            .unwrap();

        assert_eq!((stats.total, stats.added, stats.skipped, stats.removed), (2, 1, 1, 1));
        let out = target(&fx);
        assert_eq!(out["a"]["kept"], true);
        assert_eq!(out["b"]["had_existing"], false);
        assert!(out.get("z").is_none());
    }

    #[tokio::test]
    async fn corrupt_or_mismatched_target_is_treated_as_empty() {
        let corrupt = fixture(json!([{ "id": "a" }]), Some("{ nope"));
        let stats = update_data_incrementally(&corrupt.request, &Stamp::default())
            .await
            .unwrap();
        assert_eq!(stats.added, 1);

        let mismatched = fixture(json!([{ "id": "a" }]), Some(r#"{"a":{"id":"a"}}"#));
        let stats = update_data_incrementally(&mismatched.request, &Stamp::default())
            .await
            .unwrap();
        assert_eq!((stats.added, stats.removed), (1, 0));
    }

    #[tokio::test]
    async fn processor_failure_leaves_previous_target_untouched() {
        let previous = r#"[{"id":"a"}]"#;
        let fx = fixture(json!([{ "id": "a" }, { "id": "b" }]), Some(previous));
        let processor = Stamp {
            fail_on: Some("b"),
            ..Stamp::default()
        };

        let err = update_data_incrementally(&fx.request, &processor)
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::Processing { ref item, .. } if item == "b"));
        assert_eq!(fs::read_to_string(&fx.request.target_path).unwrap(), previous);
    }

    #[tokio::test]
    async fn missing_or_scalar_source_is_fatal() {
        let dir = TempDir::new().unwrap();
        let missing = UpdateRequest::new(dir.path().join("nope.json"), dir.path().join("t.json"));
        let err = update_data_incrementally(&missing, &Stamp::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Infra(_)));

        let fx = fixture(json!("just a string"), None);
        let err = update_data_incrementally(&fx.request, &Stamp::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
        assert!(!fx.request.target_path.exists());
    }
}
