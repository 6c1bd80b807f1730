use std::{cell::RefCell, collections::HashMap, rc::Rc, time::Duration, time::Instant};

use async_trait::async_trait;
use lol_html::{RewriteStrSettings, element, rewrite_str, text};
use metrics::counter;
use reqwest::{Client, Response, redirect::Policy};
use tracing::{info, warn};
use url::Url;

use crate::domain::preview::{LinkMetadata, PageMetadata};
use crate::infra::error::InfraError;

use super::MetadataFetcher;

const DEFAULT_TIMEOUT_SECS: u64 = 20;
const DEFAULT_MAX_BODY_BYTES: u64 = 2 * 1024 * 1024;
const MAX_REDIRECTS: usize = 5;
const MAX_ENTITY_LEN: usize = 10;

const TITLE_KEYS: [&str; 2] = ["og:title", "twitter:title"];
const DESCRIPTION_KEYS: [&str; 3] = ["og:description", "twitter:description", "description"];
const IMAGE_KEYS: [&str; 4] = [
    "og:image",
    "og:image:url",
    "og:image:secure_url",
    "twitter:image",
];
const AUTHOR_KEYS: [&str; 2] = ["author", "article:author"];
const PUBLISHER_KEYS: [&str; 2] = ["og:site_name", "application-name"];

#[derive(Debug, Clone)]
pub struct MetadataFetcherConfig {
    pub timeout: Duration,
    pub max_body_bytes: u64,
    pub user_agent: String,
}

impl Default for MetadataFetcherConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            user_agent: default_user_agent().to_string(),
        }
    }
}

pub(crate) fn default_user_agent() -> &'static str {
    concat!("sitebake/", env!("CARGO_PKG_VERSION"))
}

/// Scrapes `<meta>` tags and `<title>` over plain HTTP.
#[derive(Debug, Clone)]
pub struct HttpMetadataFetcher {
    client: Client,
    max_body_bytes: u64,
}

impl HttpMetadataFetcher {
    pub fn new(config: MetadataFetcherConfig) -> Result<Self, InfraError> {
        let client = Client::builder()
            .user_agent(config.user_agent)
            .timeout(config.timeout)
            .redirect(Policy::limited(MAX_REDIRECTS))
            .build()?;
        Ok(Self {
            client,
            max_body_bytes: config.max_body_bytes,
        })
    }

    async fn try_fetch(&self, url: &str) -> Result<PageMetadata, InfraError> {
        let parsed =
            Url::parse(url).map_err(|err| InfraError::http(format!("invalid url: {err}")))?;
        let response = self.client.get(parsed).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(InfraError::http(format!("unexpected status {status}")));
        }

        let final_url = response.url().clone();
        let body = read_capped(response, self.max_body_bytes).await?;
        extract_metadata(&body, &final_url)
    }
}

#[async_trait]
impl MetadataFetcher for HttpMetadataFetcher {
    async fn fetch_metadata(&self, url: &str) -> LinkMetadata {
        let started_at = Instant::now();
        match self.try_fetch(url).await {
            Ok(page) => {
                counter!("sitebake_fetch_total", "result" => "success").increment(1);
                info!(
                    target = "sitebake::fetch",
                    op = "fetch_metadata",
                    result = "success",
                    url,
                    elapsed_ms = started_at.elapsed().as_millis() as u64,
                    has_title = page.title.is_some(),
                    "Fetched link metadata"
                );
                LinkMetadata::Success(page)
            }
            Err(err) => {
                counter!("sitebake_fetch_total", "result" => "error").increment(1);
                warn!(
                    target = "sitebake::fetch",
                    op = "fetch_metadata",
                    result = "error",
                    url,
                    elapsed_ms = started_at.elapsed().as_millis() as u64,
                    error = %err,
                    "Failed to fetch link metadata"
                );
                LinkMetadata::error(err.to_string())
            }
        }
    }
}

async fn read_capped(mut response: Response, limit: u64) -> Result<String, InfraError> {
    let mut buffer: Vec<u8> = Vec::new();
    while let Some(chunk) = response.chunk().await? {
        let remaining = limit.saturating_sub(buffer.len() as u64) as usize;
        if chunk.len() >= remaining {
            // The head of the document is all the metadata scan needs.
            buffer.extend_from_slice(&chunk[..remaining]);
            break;
        }
        buffer.extend_from_slice(&chunk);
    }
    Ok(String::from_utf8_lossy(&buffer).into_owned())
}

#[derive(Default)]
struct ScannedTags {
    meta: HashMap<String, String>,
    title: String,
}

impl ScannedTags {
    fn record(&mut self, key: &str, content: &str) {
        let content = content.trim();
        if content.is_empty() {
            return;
        }
        self.meta
            .entry(key.trim().to_ascii_lowercase())
            .or_insert_with(|| decode_entities(content));
    }

    fn first_of(&self, keys: &[&str]) -> Option<String> {
        keys.iter().find_map(|key| self.meta.get(*key).cloned())
    }
}

/// Extract preview fields from an HTML document served at `base`.
pub fn extract_metadata(html: &str, base: &Url) -> Result<PageMetadata, InfraError> {
    let scanned = Rc::new(RefCell::new(ScannedTags::default()));

    rewrite_str(
        html,
        RewriteStrSettings {
            element_content_handlers: vec![
                element!("meta[content]", {
                    let scanned = Rc::clone(&scanned);
                    move |el| {
                        let key = el
                            .get_attribute("property")
                            .or_else(|| el.get_attribute("name"));
                        if let (Some(key), Some(content)) = (key, el.get_attribute("content")) {
                            scanned.borrow_mut().record(&key, &content);
                        }
                        Ok(())
                    }
                }),
                text!("title", {
                    let scanned = Rc::clone(&scanned);
                    move |chunk| {
                        scanned.borrow_mut().title.push_str(chunk.as_str());
                        Ok(())
                    }
                }),
            ],
            ..RewriteStrSettings::default()
        },
    )
    .map_err(|err| InfraError::http(format!("failed to scan html: {err}")))?;

    let scanned = scanned.take();
    let fallback_title = {
        let collapsed = scanned.title.split_whitespace().collect::<Vec<_>>().join(" ");
        (!collapsed.is_empty()).then(|| decode_entities(&collapsed))
    };

    let image = scanned
        .first_of(&IMAGE_KEYS)
        .and_then(|raw| base.join(&raw).ok().map(String::from));

    Ok(PageMetadata {
        title: scanned.first_of(&TITLE_KEYS).or(fallback_title),
        description: scanned.first_of(&DESCRIPTION_KEYS),
        image,
        author: scanned.first_of(&AUTHOR_KEYS),
        publisher: scanned.first_of(&PUBLISHER_KEYS),
    })
}

/// Named references common in page titles and descriptions.
fn named_entity(name: &str) -> Option<char> {
    let decoded = match name {
        "amp" => '&',
        "lt" => '<',
        "gt" => '>',
        "quot" => '"',
        "apos" => '\'',
        "nbsp" => ' ',
        "hellip" => '\u{2026}',
        "mdash" => '\u{2014}',
        "ndash" => '\u{2013}',
        "lsquo" => '\u{2018}',
        "rsquo" => '\u{2019}',
        "ldquo" => '\u{201C}',
        "rdquo" => '\u{201D}',
        "laquo" => '\u{00AB}',
        "raquo" => '\u{00BB}',
        "middot" => '\u{00B7}',
        "bull" => '\u{2022}',
        "copy" => '\u{00A9}',
        "reg" => '\u{00AE}',
        "trade" => '\u{2122}',
        "deg" => '\u{00B0}',
        "times" => '\u{00D7}',
        "euro" => '\u{20AC}',
        "pound" => '\u{00A3}',
        "aacute" => '\u{00E1}',
        "eacute" => '\u{00E9}',
        "iacute" => '\u{00ED}',
        "oacute" => '\u{00F3}',
        "uacute" => '\u{00FA}',
        "agrave" => '\u{00E0}',
        "egrave" => '\u{00E8}',
        "ccedil" => '\u{00E7}',
        "ntilde" => '\u{00F1}',
        "auml" => '\u{00E4}',
        "ouml" => '\u{00F6}',
        "uuml" => '\u{00FC}',
        "szlig" => '\u{00DF}',
        _ => return None,
    };
    Some(decoded)
}

fn numeric_entity(reference: &str) -> Option<char> {
    let code = match reference.strip_prefix(['x', 'X']) {
        Some(hex) => u32::from_str_radix(hex, 16).ok()?,
        None => reference.parse().ok()?,
    };
    char::from_u32(code).filter(|decoded| *decoded != '\0')
}

/// Decode character references. Unknown or malformed ones are kept verbatim.
fn decode_entities(input: &str) -> String {
    if !input.contains('&') {
        return input.to_string();
    }

    let mut decoded = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(start) = rest.find('&') {
        decoded.push_str(&rest[..start]);
        let candidate = &rest[start + 1..];
        let reference = candidate
            .find(';')
            .filter(|end| *end > 0 && *end <= MAX_ENTITY_LEN)
            .map(|end| &candidate[..end]);

        let resolved = reference.and_then(|reference| match reference.strip_prefix('#') {
            Some(numeric) => numeric_entity(numeric),
            None => named_entity(reference),
        });

        match (reference, resolved) {
            (Some(reference), Some(ch)) => {
                decoded.push(ch);
                rest = &candidate[reference.len() + 1..];
            }
            _ => {
                decoded.push('&');
                rest = candidate;
            }
        }
    }
    decoded.push_str(rest);
    decoded
}
