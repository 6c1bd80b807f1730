//! Pinned GitHub repositories baked into `github-pins.json`.

use std::path::PathBuf;

use tracing::{info, warn};

use crate::infra::{github::GithubClient, json_store::write_json_pretty};

use super::{error::AppError, fallback::FallbackStore};

pub const PINS_FILE: &str = "github-pins.json";

/// How the pins file was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinsOutcome {
    Fetched(usize),
    Restored,
    Empty,
}

pub struct PinsService {
    client: Option<GithubClient>,
    user: Option<String>,
    fallback: FallbackStore,
    data_dir: PathBuf,
}

impl PinsService {
    /// `client` is `None` when no token is configured.
    pub fn new(
        client: Option<GithubClient>,
        user: Option<String>,
        fallback: FallbackStore,
        data_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            client,
            user,
            fallback,
            data_dir: data_dir.into(),
        }
    }

    pub async fn refresh(&self) -> Result<PinsOutcome, AppError> {
        let live = match (&self.client, self.user.as_deref()) {
            (Some(client), Some(user)) if !self.fallback.enabled() => Some((client, user)),
            _ => None,
        };

        let Some((client, user)) = live else {
            warn!(
                target = "sitebake::pins",
                op = "refresh",
                fallback = self.fallback.enabled(),
                has_token = self.client.is_some(),
                has_user = self.user.is_some(),
                "Using fallback pinned repositories"
            );
            let restored = self.fallback.restore_or_empty(PINS_FILE, &self.data_dir)?;
            return Ok(if restored {
                PinsOutcome::Restored
            } else {
                PinsOutcome::Empty
            });
        };

        let repos = client.fetch_pinned(user).await?;
        write_json_pretty(&self.data_dir.join(PINS_FILE), &repos)?;
        info!(
            target = "sitebake::pins",
            op = "refresh",
            result = "success",
            count = repos.len(),
            "Wrote pinned repositories"
        );
        Ok(PinsOutcome::Fetched(repos.len()))
    }
}
