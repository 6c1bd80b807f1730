//! Minimal GitHub GraphQL client for pinned repositories.

use reqwest::{Client, header};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;
use url::Url;

use super::{error::InfraError, fetch::MetadataFetcherConfig};

const PINNED_QUERY: &str = r#"
query($login: String!, $first: Int!) {
  user(login: $login) {
    pinnedItems(first: $first, types: REPOSITORY) {
      nodes {
        ... on Repository {
          name
          description
          url
          stargazerCount
          forkCount
          primaryLanguage { name color }
        }
      }
    }
  }
}
"#;

const MAX_PINNED: u32 = 6;

/// A pinned repository as baked into `github-pins.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PinnedRepo {
    pub name: String,
    pub description: Option<String>,
    pub url: String,
    pub stars: u64,
    pub forks: u64,
    pub language: Option<String>,
    pub language_color: Option<String>,
}

#[derive(Debug, Clone)]
pub struct GithubClient {
    client: Client,
    endpoint: Url,
    token: String,
}

impl GithubClient {
    pub fn new(
        endpoint: Url,
        token: String,
        fetch: &MetadataFetcherConfig,
    ) -> Result<Self, InfraError> {
        let client = Client::builder()
            .user_agent(fetch.user_agent.clone())
            .timeout(fetch.timeout)
            .build()?;
        Ok(Self {
            client,
            endpoint,
            token,
        })
    }

    pub async fn fetch_pinned(&self, login: &str) -> Result<Vec<PinnedRepo>, InfraError> {
        let body = json!({
            "query": PINNED_QUERY,
            "variables": { "login": login, "first": MAX_PINNED },
        });

        let response = self
            .client
            .post(self.endpoint.clone())
            .header(header::AUTHORIZATION, format!("bearer {}", self.token))
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(InfraError::http(format!(
                "github responded {status}: {}",
                text.trim()
            )));
        }

        let envelope: GraphqlEnvelope = response.json().await?;
        if let Some(errors) = envelope.errors.filter(|errors| !errors.is_empty()) {
            let messages = errors
                .into_iter()
                .map(|error| error.message)
                .collect::<Vec<_>>()
                .join("; ");
            return Err(InfraError::http(format!("github graphql error: {messages}")));
        }

        let user = envelope
            .data
            .and_then(|data| data.user)
            .ok_or_else(|| InfraError::http(format!("github user `{login}` not found")))?;

        let repos: Vec<PinnedRepo> = user
            .pinned_items
            .nodes
            .into_iter()
            // Non-repository pins deserialize as empty objects.
            .filter_map(GraphqlRepo::into_repo)
            .collect();

        info!(
            target = "sitebake::github",
            op = "fetch_pinned",
            login,
            count = repos.len(),
            "Fetched pinned repositories"
        );
        Ok(repos)
    }
}

#[derive(Debug, Deserialize)]
struct GraphqlEnvelope {
    data: Option<GraphqlData>,
    errors: Option<Vec<GraphqlError>>,
}

#[derive(Debug, Deserialize)]
struct GraphqlError {
    message: String,
}

#[derive(Debug, Deserialize)]
struct GraphqlData {
    user: Option<GraphqlUser>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphqlUser {
    pinned_items: GraphqlConnection,
}

#[derive(Debug, Deserialize)]
struct GraphqlConnection {
    nodes: Vec<GraphqlRepo>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphqlRepo {
    name: Option<String>,
    description: Option<String>,
    url: Option<String>,
    #[serde(default)]
    stargazer_count: u64,
    #[serde(default)]
    fork_count: u64,
    primary_language: Option<GraphqlLanguage>,
}

#[derive(Debug, Deserialize)]
struct GraphqlLanguage {
    name: String,
    color: Option<String>,
}

impl GraphqlRepo {
    fn into_repo(self) -> Option<PinnedRepo> {
        let (language, language_color) = match self.primary_language {
            Some(language) => (Some(language.name), language.color),
            None => (None, None),
        };
        Some(PinnedRepo {
            name: self.name?,
            description: self.description,
            url: self.url?,
            stars: self.stargazer_count,
            forks: self.fork_count,
            language,
            language_color,
        })
    }
}
