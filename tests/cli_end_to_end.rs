#![deny(clippy::all, clippy::pedantic)]

use assert_cmd::Command;
use httpmock::MockServer;
use predicates::str::contains;
use serde_json::Value;
use std::{fs, path::Path};
use tempfile::TempDir;

const AMBIENT_VARS: [&str; 6] = [
    "CI",
    "NODE_ENV",
    "USE_FALLBACK_DATA",
    "GITHUB_TOKEN",
    "GH_TOKEN",
    "SITEBAKE_CONFIG_FILE",
];

fn sitebake(workdir: &Path) -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("sitebake"));
    cmd.current_dir(workdir);
    for var in AMBIENT_VARS {
        cmd.env_remove(var);
    }
    cmd
}

fn read_json(path: &Path) -> Value {
    serde_json::from_str(&fs::read_to_string(path).expect("readable")).expect("valid json")
}

fn write_site(root: &Path, links: &str) {
    let site = root.join("site");
    fs::create_dir_all(site.join("links")).expect("site dirs");
    fs::write(site.join("meta.json"), r#"{"title":"My Site"}"#).expect("meta");
    fs::write(site.join("links").join("elsewhere.json"), links).expect("links");
}

#[test]
fn site_config_prints_the_merged_document() {
    let dir = TempDir::new().expect("temp dir");
    write_site(
        dir.path(),
        r#"[{"name":"Blog","url":"https://blog.example.com/"}]"#,
    );

    let assert = sitebake(dir.path())
        .arg("site-config")
        .arg("--site-config-dir")
        .arg(dir.path().join("site"))
        .assert()
        .success();

    let merged: Value =
        serde_json::from_slice(&assert.get_output().stdout).expect("stdout is json");
    assert_eq!(merged["title"], "My Site");
    assert_eq!(merged["links"]["items"][0]["group"], "elsewhere");
}

#[test]
fn previews_bake_live_pages() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method("GET").path("/blog");
        then.status(200)
            .header("content-type", "text/html")
            .body(r#"<html><head><meta property="og:title" content="Blog Title"></head></html>"#);
    });

    let dir = TempDir::new().expect("temp dir");
    write_site(
        dir.path(),
        &format!(r#"[{{"name":"Blog","url":"{}"}}]"#, server.url("/blog")),
    );
    let data = dir.path().join("data");

    let assert = sitebake(dir.path())
        .arg("previews")
        .arg("--site-config-dir")
        .arg(dir.path().join("site"))
        .arg("--data-internal-dir")
        .arg(&data)
        .arg("--previews-chunk-delay-ms")
        .arg("0")
        .assert()
        .success();

    let stats: Value =
        serde_json::from_slice(&assert.get_output().stdout).expect("stats on stdout");
    assert_eq!(stats["added"], 1);
    assert_eq!(stats["total"], 1);
    mock.assert();

    let previews = read_json(&data.join("link-previews.json"));
    assert_eq!(previews["blog"]["metadata"]["status"], "success");
    assert_eq!(previews["blog"]["metadata"]["title"], "Blog Title");
    assert!(data.join("links.json").is_file());
    assert!(data.join("link-previews-link.json").is_file());
}

#[test]
fn previews_in_ci_restore_fallback_data() {
    let dir = TempDir::new().expect("temp dir");
    let fallback = dir.path().join("fallback");
    fs::create_dir_all(&fallback).expect("fallback dir");
    fs::write(
        fallback.join("link-previews.json"),
        r#"{"gh":{"id":"gh","url":"https://github.com/octocat","name":"GitHub","group":"","type":"social","metadata":null,"screenshot":null,"last_checked":"2026-10-01T00:00:00Z"}}"#,
    )
    .expect("fallback previews");
    let data = dir.path().join("data");

    sitebake(dir.path())
        .env("CI", "true")
        .arg("previews")
        .arg("--data-internal-dir")
        .arg(&data)
        .arg("--fallback-dir")
        .arg(&fallback)
        .assert()
        .success();

    let social = read_json(&data.join("link-previews-social.json"));
    assert_eq!(social["gh"]["name"], "GitHub");
    assert_eq!(read_json(&data.join("link-previews-repository.json")), serde_json::json!({}));
}

#[test]
fn lookup_prints_a_known_preview() {
    let dir = TempDir::new().expect("temp dir");
    fs::write(
        dir.path().join("link-previews.json"),
        r#"{"blog":{"id":"blog","url":"https://blog.example.com/","name":"Blog","group":"","type":"link","metadata":{"status":"error","message":"timeout"},"screenshot":null,"last_checked":"2026-10-01T00:00:00Z"}}"#,
    )
    .expect("previews");

    sitebake(dir.path())
        .arg("lookup")
        .arg("--data-internal-dir")
        .arg(dir.path())
        .arg("https://blog.example.com/")
        .assert()
        .success()
        .stdout(contains("\"id\": \"blog\""));
}

#[test]
fn lookup_of_an_unknown_url_fails() {
    let dir = TempDir::new().expect("temp dir");

    sitebake(dir.path())
        .arg("lookup")
        .arg("--data-internal-dir")
        .arg(dir.path())
        .arg("https://nowhere.example.com/")
        .assert()
        .failure()
        .stderr(contains("no preview found"));
}
