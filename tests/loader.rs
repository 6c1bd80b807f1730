use std::{
    fs, io,
    sync::{Arc, Mutex},
    thread,
    time::Duration,
};

use serde_json::{Value, json};
use sitebake::{
    application::loader::{DataCache, DataLoader, LoadOptions},
    domain::{links::LinkType, preview::category_file},
};
use tempfile::TempDir;
use tracing::Level;
use tracing_subscriber::fmt::MakeWriter;

#[derive(Clone, Default)]
struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

struct BufferWriter(Arc<Mutex<Vec<u8>>>);

impl<'a> MakeWriter<'a> for SharedBuffer {
    type Writer = BufferWriter;

    fn make_writer(&'a self) -> Self::Writer {
        BufferWriter(Arc::clone(&self.0))
    }
}

impl io::Write for BufferWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut guard = self
            .0
            .lock()
            .map_err(|_| io::Error::other("lock poisoned"))?;
        guard.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Run `f` and return the JSON log lines it emitted.
fn captured_logs(f: impl FnOnce()) -> Vec<Value> {
    let sink = SharedBuffer::default();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(sink.clone())
        .json()
        .with_max_level(Level::WARN)
        .finish();
    tracing::subscriber::with_default(subscriber, f);

    let bytes = sink.0.lock().expect("lock output").clone();
    String::from_utf8(bytes)
        .expect("utf8 log output")
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| serde_json::from_str(line).expect("json log line"))
        .collect()
}

fn options(ttl: Duration) -> LoadOptions {
    LoadOptions {
        use_public: false,
        cache: true,
        ttl,
    }
}

#[test]
fn cached_reads_expire_after_the_ttl() {
    let dir = TempDir::new().expect("temp dir");
    let internal = dir.path().join("internal");
    fs::create_dir_all(&internal).expect("internal dir");
    fs::write(internal.join("projects.json"), r#"[{"name":"one"}]"#).expect("data");

    let loader = DataLoader::new(&internal, dir.path().join("public"))
        .with_defaults(options(Duration::from_millis(100)));

    assert_eq!(loader.load("projects.json"), json!([{ "name": "one" }]));

    fs::write(internal.join("projects.json"), r#"[{"name":"two"}]"#).expect("rewrite");
    assert_eq!(
        loader.load("projects.json"),
        json!([{ "name": "one" }]),
        "served from cache inside the ttl"
    );

    thread::sleep(Duration::from_millis(150));
    assert_eq!(loader.load("projects.json"), json!([{ "name": "two" }]));
}

#[test]
fn loaders_sharing_a_cache_see_each_others_entries() {
    let dir = TempDir::new().expect("temp dir");
    fs::write(dir.path().join("facts.json"), r#"{"answer":42}"#).expect("data");

    let cache = Arc::new(DataCache::new());
    let first = DataLoader::new(dir.path(), dir.path().join("public"))
        .with_cache(Arc::clone(&cache))
        .with_defaults(options(Duration::from_secs(60)));
    let second = DataLoader::new(dir.path(), dir.path().join("public"))
        .with_cache(Arc::clone(&cache))
        .with_defaults(options(Duration::from_secs(60)));

    assert_eq!(first.get_data_item("facts.json", "answer", Value::Null), 42);
    fs::remove_file(dir.path().join("facts.json")).expect("remove");
    assert_eq!(second.get_data_item("facts.json", "answer", Value::Null), 42);

    second.clear_cache();
    assert!(cache.is_empty());
    assert_eq!(
        first.get_data_item("facts.json", "answer", json!("missing")),
        "missing"
    );
}

#[test]
fn public_and_internal_copies_are_cached_separately() {
    let dir = TempDir::new().expect("temp dir");
    let internal = dir.path().join("internal");
    let public = dir.path().join("public");
    fs::create_dir_all(&internal).expect("internal dir");
    fs::create_dir_all(&public).expect("public dir");
    fs::write(internal.join("site.json"), r#"["internal"]"#).expect("internal");
    fs::write(public.join("site.json"), r#"["public"]"#).expect("public");

    let loader = DataLoader::new(&internal, &public);
    let ttl = Duration::from_secs(60);

    assert_eq!(loader.load_data("site.json", options(ttl)), json!(["internal"]));
    assert_eq!(
        loader.load_data(
            "site.json",
            LoadOptions {
                use_public: true,
                ..options(ttl)
            }
        ),
        json!(["public"])
    );
    assert_eq!(loader.cache().len(), 2);
}

#[test]
fn unreadable_files_never_raise() {
    let dir = TempDir::new().expect("temp dir");
    fs::write(dir.path().join("broken.json"), "{ not json").expect("broken");
    fs::create_dir_all(dir.path().join("directory.json")).expect("dir named like a file");

    let loader = DataLoader::new(dir.path(), dir.path());
    let uncached = LoadOptions {
        cache: false,
        ..options(Duration::from_secs(1))
    };

    assert_eq!(loader.load_data("broken.json", uncached), json!([]));
    assert_eq!(loader.load_data("directory.json", uncached), json!([]));
    assert_eq!(loader.load_data("absent.json", uncached), json!([]));
    assert!(loader.cache().is_empty());
}

#[test]
fn fallbacks_are_logged() {
    let dir = TempDir::new().expect("temp dir");
    fs::write(dir.path().join("broken.json"), "{ not json").expect("broken");
    let loader = DataLoader::new(dir.path(), dir.path());
    let uncached = LoadOptions {
        cache: false,
        ..options(Duration::from_secs(1))
    };

    let logs = captured_logs(|| {
        assert_eq!(loader.load_data("absent.json", uncached), json!([]));
        assert_eq!(loader.load_data("link-previews.json", uncached), json!({}));
        assert_eq!(loader.load_data("broken.json", uncached), json!([]));
    });

    let by_result = |result: &str| {
        logs.iter()
            .filter(|line| line["fields"]["result"] == result)
            .collect::<Vec<_>>()
    };
    let missing = by_result("missing");
    assert_eq!(missing.len(), 2, "{logs:?}");
    assert!(missing.iter().all(|line| line["level"] == "WARN"));
    assert!(
        missing[0]["fields"]["path"]
            .as_str()
            .is_some_and(|path| path.ends_with("absent.json"))
    );

    let unreadable = by_result("unreadable");
    assert_eq!(unreadable.len(), 1, "{logs:?}");
    assert_eq!(unreadable[0]["level"], "ERROR");
    assert!(
        unreadable[0]["fields"]["path"]
            .as_str()
            .is_some_and(|path| path.ends_with("broken.json"))
    );
}

#[test]
fn previews_are_found_in_category_files() {
    let dir = TempDir::new().expect("temp dir");
    fs::write(
        dir.path().join(category_file(LinkType::Repository)),
        serde_json::to_vec(&json!({
            "sitebake": {
                "id": "sitebake",
                "url": "https://github.com/octocat/sitebake",
                "name": "sitebake",
                "group": "code",
                "type": "repository",
                "metadata": { "status": "success", "title": "sitebake" },
                "screenshot": null,
                "last_checked": "2026-10-01T12:00:00Z"
            }
        }))
        .expect("encode"),
    )
    .expect("category file");

    let loader = DataLoader::new(dir.path(), dir.path());
    let record = loader
        .get_preview_by_url("https://github.com/octocat/sitebake")
        .expect("record found");

    assert_eq!(record.link.id, "sitebake");
    assert_eq!(record.link.kind, LinkType::Repository);
    assert_eq!(record.metadata.and_then(|m| m.title().map(str::to_string)), Some("sitebake".to_string()));
    assert!(loader.get_preview_by_url("https://example.com/").is_none());
}
