use std::time::Duration;

use httpmock::prelude::*;
use sitebake::{
    domain::preview::LinkMetadata,
    infra::fetch::{HttpMetadataFetcher, MetadataFetcher, MetadataFetcherConfig},
};

fn fetcher(max_body_bytes: u64) -> HttpMetadataFetcher {
    HttpMetadataFetcher::new(MetadataFetcherConfig {
        timeout: Duration::from_secs(5),
        max_body_bytes,
        ..MetadataFetcherConfig::default()
    })
    .expect("client builds")
}

#[tokio::test]
async fn scrapes_open_graph_metadata() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(GET).path("/post");
            then.status(200)
                .header("content-type", "text/html; charset=utf-8")
                .body(
                    r#"<html><head>
                    <title>Plain</title>
                    <meta property="og:title" content="Rich &amp; Shiny">
                    <meta name="twitter:description" content="From twitter">
                    <meta property="og:image" content="/card.png">
                    <meta property="og:site_name" content="Example">
                    </head><body>hi</body></html>"#,
                );
        })
        .await;

    let metadata = fetcher(1024 * 1024)
        .fetch_metadata(&server.url("/post"))
        .await;

    mock.assert_async().await;
    assert_eq!(metadata.title(), Some("Rich & Shiny"));
    assert_eq!(metadata.description(), Some("From twitter"));
    assert_eq!(metadata.image(), Some(server.url("/card.png").as_str()));
    assert_eq!(
        metadata.page().and_then(|page| page.publisher.as_deref()),
        Some("Example")
    );
}

#[tokio::test]
async fn non_success_status_becomes_error_metadata() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/gone");
            then.status(404).body("not here");
        })
        .await;

    let metadata = fetcher(1024).fetch_metadata(&server.url("/gone")).await;

    assert!(metadata.is_error());
    assert_eq!(metadata.title(), None);
    assert!(metadata.error_message().unwrap_or_default().contains("404"));
}

#[tokio::test]
async fn redirects_are_followed_and_images_resolve_against_the_final_url() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/old");
            then.status(301).header("location", "/blog/new");
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/blog/new");
            then.status(200)
                .body(r#"<meta property="og:title" content="Moved"><meta property="og:image" content="img.png">"#);
        })
        .await;

    let metadata = fetcher(1024).fetch_metadata(&server.url("/old")).await;

    assert_eq!(metadata.title(), Some("Moved"));
    assert_eq!(metadata.image(), Some(server.url("/blog/img.png").as_str()));
}

#[tokio::test]
async fn bodies_are_capped_but_the_head_is_still_scanned() {
    let server = MockServer::start_async().await;
    let body = format!(
        "<html><head><title>Huge</title></head><body>{}</body></html>",
        "x".repeat(256 * 1024)
    );
    server
        .mock_async(move |when, then| {
            when.method(GET).path("/huge");
            then.status(200).body(body.clone());
        })
        .await;

    let metadata = fetcher(4096).fetch_metadata(&server.url("/huge")).await;

    assert_eq!(metadata.title(), Some("Huge"));
}

#[tokio::test]
async fn unreachable_hosts_never_raise() {
    let metadata = fetcher(1024)
        .fetch_metadata("http://127.0.0.1:1/unreachable")
        .await;
    assert!(matches!(metadata, LinkMetadata::Error { .. }));
}
