//! Configured external links and their validation rules.

use std::fmt;

use serde::{Deserialize, Serialize};
use url::Url;

use super::{error::DomainError, slug::derive_link_id};

const REPOSITORY_HOSTS: [&str; 3] = ["github.com", "gitlab.com", "codeberg.org"];

/// Category of a configured link.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkType {
    Social,
    #[default]
    Link,
    Repository,
}

impl LinkType {
    /// Fixed enumeration order used for category files and lookups.
    pub const ALL: [LinkType; 3] = [LinkType::Social, LinkType::Link, LinkType::Repository];

    pub fn as_str(self) -> &'static str {
        match self {
            LinkType::Social => "social",
            LinkType::Link => "link",
            LinkType::Repository => "repository",
        }
    }

    /// Best-effort type for links that do not declare one.
    pub fn infer(url: &Url) -> Self {
        let is_repository = url.host_str().is_some_and(|host| {
            REPOSITORY_HOSTS
                .iter()
                .any(|candidate| host_matches(host, candidate))
        });
        let has_repo_path = url
            .path_segments()
            .map(|segments| segments.filter(|segment| !segment.is_empty()).count() >= 2)
            .unwrap_or(false);

        if is_repository && has_repo_path {
            LinkType::Repository
        } else {
            LinkType::Link
        }
    }
}

impl fmt::Display for LinkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A link as written in the site configuration, before validation.
#[derive(Debug, Clone, Deserialize)]
pub struct RawLink {
    #[serde(default)]
    pub id: Option<String>,
    pub url: String,
    pub name: String,
    #[serde(default)]
    pub group: Option<String>,
    #[serde(default, rename = "type")]
    pub kind: Option<LinkType>,
}

/// One external link to preview.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkItem {
    pub id: String,
    pub url: String,
    pub name: String,
    #[serde(default)]
    pub group: String,
    #[serde(rename = "type", default)]
    pub kind: LinkType,
}

impl LinkItem {
    /// Validate a configured link and fill in the derived fields.
    pub fn from_raw(raw: RawLink) -> Result<Self, DomainError> {
        let url = validate_url(&raw.url)?;

        let id = match raw.id.as_deref().map(str::trim) {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => derive_link_id(&raw.name).map_err(|err| {
                DomainError::validation(format!("link `{}` has no usable id: {err}", raw.url))
            })?,
        };

        let kind = raw.kind.unwrap_or_else(|| LinkType::infer(&url));

        Ok(Self {
            id,
            url: raw.url.trim().to_string(),
            name: raw.name.trim().to_string(),
            group: raw.group.unwrap_or_default(),
            kind,
        })
    }

    pub fn host(&self) -> Option<String> {
        Url::parse(&self.url)
            .ok()
            .and_then(|url| url.host_str().map(str::to_ascii_lowercase))
    }
}

/// Parse `input` as an absolute `http`/`https` URL.
pub fn validate_url(input: &str) -> Result<Url, DomainError> {
    let trimmed = input.trim();
    let url = Url::parse(trimmed)
        .map_err(|err| DomainError::validation(format!("invalid url `{trimmed}`: {err}")))?;

    match url.scheme() {
        "http" | "https" => {}
        other => {
            return Err(DomainError::validation(format!(
                "unsupported scheme `{other}` in `{trimmed}`"
            )));
        }
    }

    if url.host_str().is_none() {
        return Err(DomainError::validation(format!(
            "url `{trimmed}` has no host"
        )));
    }

    Ok(url)
}

/// True when `host` equals `domain` or is one of its subdomains.
pub fn host_matches(host: &str, domain: &str) -> bool {
    let host = host.trim_end_matches('.').to_ascii_lowercase();
    let domain = domain.trim_start_matches('.').to_ascii_lowercase();
    host == domain || host.ends_with(&format!(".{domain}"))
}
