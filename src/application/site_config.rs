//! Merge a directory tree of JSON fragments into one site configuration object.
//!
//! Entries are visited in sorted file-name order so the result does not depend
//! on the platform's directory listing order. Files at one level are
//! shallow-merged first (later names win), then subdirectories:
//!
//! * `links/` becomes `{"groups": .., "items": [..]}` built from its files,
//! * `homepage/` is merged under a single `homepage` key,
//! * any other directory is merged recursively and flattened into its parent.

use std::path::{Path, PathBuf};

use serde_json::{Map, Value};
use tracing::{error, warn};
use walkdir::WalkDir;

use crate::{
    domain::links::{LinkItem, RawLink},
    infra::json_store::{read_json, shape_name},
};

const LINKS_DIR: &str = "links";
const HOMEPAGE_DIR: &str = "homepage";
const GROUPS_FILE: &str = "groups.json";

/// Merge every fragment under `dir`. Unreadable fragments contribute nothing.
pub fn merge_site_config(dir: &Path) -> Value {
    if !dir.is_dir() {
        warn!(
            target = "sitebake::site_config",
            op = "merge",
            result = "missing",
            dir = %dir.display(),
            "Site config directory not found"
        );
        return Value::Object(Map::new());
    }
    Value::Object(merge_dir(dir))
}

struct Listing {
    files: Vec<PathBuf>,
    dirs: Vec<(String, PathBuf)>,
}

fn list(dir: &Path) -> Listing {
    let mut listing = Listing {
        files: Vec::new(),
        dirs: Vec::new(),
    };

    for entry in WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
    {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                error!(
                    target = "sitebake::site_config",
                    op = "list",
                    dir = %dir.display(),
                    error = %err,
                    "Failed to list site config entry"
                );
                continue;
            }
        };

        let path = entry.into_path();
        if path.is_dir() {
            if let Some(name) = path.file_name().and_then(|name| name.to_str()) {
                listing.dirs.push((name.to_string(), path.clone()));
            }
        } else if path.extension().is_some_and(|ext| ext == "json") {
            listing.files.push(path);
        }
    }
    listing
}

fn read_fragment(path: &Path) -> Value {
    match read_json(path) {
        Ok(value) => value,
        Err(err) => {
            error!(
                target = "sitebake::site_config",
                op = "read_fragment",
                path = %path.display(),
                error = %err,
                "Skipping unreadable site config fragment"
            );
            Value::Object(Map::new())
        }
    }
}

fn merge_dir(dir: &Path) -> Map<String, Value> {
    let Listing { files, dirs } = list(dir);
    let mut merged = Map::new();

    for file in files {
        match read_fragment(&file) {
            Value::Object(fragment) => merged.extend(fragment),
            other => warn!(
                target = "sitebake::site_config",
                op = "merge",
                path = %file.display(),
                found = shape_name(&other),
                "Ignoring non-object site config fragment"
            ),
        }
    }

    for (name, path) in dirs {
        match name.as_str() {
            LINKS_DIR => {
                merged.insert(LINKS_DIR.to_string(), merge_links(&path));
            }
            HOMEPAGE_DIR => {
                merged.insert(HOMEPAGE_DIR.to_string(), Value::Object(merge_dir(&path)));
            }
            _ => merged.extend(merge_dir(&path)),
        }
    }

    merged
}

fn merge_links(dir: &Path) -> Value {
    let mut groups = Value::Object(Map::new());
    let mut items = Vec::new();

    for file in list(dir).files {
        let is_groups = file
            .file_name()
            .is_some_and(|name| name == GROUPS_FILE);
        if is_groups {
            groups = read_fragment(&file);
            continue;
        }

        let stem = file
            .file_stem()
            .and_then(|stem| stem.to_str())
            .unwrap_or_default()
            .to_string();

        let entries = match read_fragment(&file) {
            Value::Array(entries) => entries,
            Value::Object(mut map) => match map.remove("items").or_else(|| map.remove("links")) {
                Some(Value::Array(entries)) => entries,
                _ => Vec::new(),
            },
            _ => Vec::new(),
        };

        items.extend(entries.into_iter().map(|mut entry| {
            if let Value::Object(fields) = &mut entry {
                fields
                    .entry("group")
                    .or_insert_with(|| Value::String(stem.clone()));
            }
            entry
        }));
    }

    let mut links = Map::new();
    links.insert("groups".to_string(), groups);
    links.insert("items".to_string(), Value::Array(items));
    Value::Object(links)
}

/// Validated links from a merged configuration. Invalid entries are logged and skipped.
pub fn collect_links(config: &Value) -> Vec<LinkItem> {
    let Some(items) = config
        .get(LINKS_DIR)
        .and_then(|links| links.get("items"))
        .and_then(Value::as_array)
    else {
        return Vec::new();
    };

    items
        .iter()
        .enumerate()
        .filter_map(|(index, raw)| {
            let parsed = serde_json::from_value::<RawLink>(raw.clone())
                .map_err(|err| err.to_string())
                .and_then(|raw| LinkItem::from_raw(raw).map_err(|err| err.to_string()));
            match parsed {
                Ok(item) => Some(item),
                Err(reason) => {
                    warn!(
                        target = "sitebake::site_config",
                        op = "collect_links",
                        result = "rejected",
                        index,
                        error = %reason,
                        "Skipping invalid link"
                    );
                    None
                }
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::fs;

    use serde_json::json;
    use tempfile::TempDir;

    use super::*;
    use crate::domain::links::LinkType;

    fn write(root: &Path, relative: &str, contents: &str) {
        let path = root.join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }

    #[test]
    fn later_file_names_win_and_directories_flatten() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "b.json", r#"{"title":"B","b":1}"#);
        write(dir.path(), "a.json", r#"{"title":"A","a":1}"#);
        write(dir.path(), "nested/deep.json", r#"{"deep":true,"title":"Nested"}"#);
        write(dir.path(), "notes.txt", "ignored");

        let merged = merge_site_config(dir.path());
        assert_eq!(
            merged,
            json!({ "a": 1, "b": 1, "deep": true, "title": "Nested" })
        );
    }

    #[test]
    fn links_directory_collects_items_and_groups() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "links/groups.json", r#"{"friends":{"title":"Friends"}}"#);
        write(
            dir.path(),
            "links/friends.json",
            r#"[{"name":"Jane","url":"https://jane.example/"}]"#,
        );
        write(
            dir.path(),
            "links/social.json",
            r#"{"items":[{"name":"Fedi","url":"https://hachyderm.io/@me","group":"elsewhere","type":"social"}]}"#,
        );

        let merged = merge_site_config(dir.path());
        assert_eq!(merged["links"]["groups"]["friends"]["title"], "Friends");
        let items = merged["links"]["items"].as_array().unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0]["group"], "friends");
        assert_eq!(items[1]["group"], "elsewhere");
    }

    #[test]
    fn homepage_directory_stays_under_its_key() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "homepage/hero.json", r#"{"hero":"Hi"}"#);
        write(dir.path(), "homepage/intro.json", r#"{"intro":"There"}"#);

        let merged = merge_site_config(dir.path());
        assert_eq!(merged, json!({ "homepage": { "hero": "Hi", "intro": "There" } }));
    }

    #[test]
    fn broken_fragments_contribute_nothing() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "a.json", r#"{"ok":true}"#);
        write(dir.path(), "b.json", "{ broken");
        write(dir.path(), "c.json", "[1,2,3]");

        assert_eq!(merge_site_config(dir.path()), json!({ "ok": true }));
    }

    #[test]
    fn missing_directory_merges_to_empty_object() {
        let dir = TempDir::new().unwrap();
        assert_eq!(merge_site_config(&dir.path().join("absent")), json!({}));
    }

    #[test]
    fn collect_links_validates_and_derives_ids() {
        let config = json!({
            "links": {
                "groups": {},
                "items": [
                    { "name": "Example Site", "url": "https://example.com/", "group": "misc" },
                    { "name": "Relative", "url": "/about" },
                    { "url": "https://no-name.example/" },
                    { "name": "Code", "url": "https://github.com/me/code", "group": "code" }
                ]
            }
        });

        let links = collect_links(&config);
        assert_eq!(links.len(), 2);
        assert_eq!(links[0].id, "example-site");
        assert_eq!(links[1].kind, LinkType::Repository);
        assert!(collect_links(&json!({})).is_empty());
    }
}
