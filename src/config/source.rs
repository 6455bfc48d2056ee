//! Where the server list comes from.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::TargetList;
use crate::fetch::auth::BasicAuth;
use crate::fetch::{HttpClient, fetch_json};
use crate::models::ServerTarget;
use crate::report::{ErrorReporter, ReportOptions};
use crate::tasks::run_periodic;

#[async_trait]
pub trait TargetSource: Send + Sync {
    async fn load(&self) -> Result<Vec<ServerTarget>>;

    /// Short description for logs and error tags.
    fn describe(&self) -> String;
}

/// Reads a JSON array of servers from disk.
pub struct FileTargetSource {
    path: PathBuf,
}

impl FileTargetSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl TargetSource for FileTargetSource {
    async fn load(&self) -> Result<Vec<ServerTarget>> {
        let content = tokio::fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("failed to read config file {}", self.path.display()))?;
        let targets: Vec<ServerTarget> =
            serde_json::from_str(&content).context("failed to parse server list JSON")?;
        validate(&targets)?;
        Ok(targets)
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// Fetches the server list over HTTP, with basic auth when both credentials are set.
pub struct UrlTargetSource<C> {
    client: C,
    url: String,
    cancel: CancellationToken,
    max_retries: u32,
}

impl<C: HttpClient> UrlTargetSource<BasicAuth<C>> {
    pub fn with_basic_auth(
        client: C,
        url: impl Into<String>,
        user: &str,
        pass: &str,
        cancel: CancellationToken,
        max_retries: u32,
    ) -> Result<Self> {
        let client = BasicAuth::new(client, user, pass).context("invalid config credentials")?;
        Ok(Self::new(client, url, cancel, max_retries))
    }
}

impl<C: HttpClient> UrlTargetSource<C> {
    pub fn new(client: C, url: impl Into<String>, cancel: CancellationToken, max_retries: u32) -> Self {
        Self {
            client,
            url: url.into(),
            cancel,
            max_retries,
        }
    }
}

#[async_trait]
impl<C: HttpClient> TargetSource for UrlTargetSource<C> {
    async fn load(&self) -> Result<Vec<ServerTarget>> {
        let targets: Vec<ServerTarget> =
            fetch_json(&self.client, &self.url, &self.cancel, self.max_retries)
                .await
                .context("failed to fetch remote config")?;
        validate(&targets)?;
        Ok(targets)
    }

    fn describe(&self) -> String {
        self.url.clone()
    }
}

fn validate(targets: &[ServerTarget]) -> Result<()> {
    let mut seen = std::collections::HashSet::new();
    for target in targets {
        if !seen.insert(target.id) {
            bail!("duplicate server id {}", target.id);
        }
        if target.rest_base_url.is_empty() {
            bail!("server {} has no oba_base_url", target.id);
        }
    }
    Ok(())
}

/// Periodically reloads `source` into `targets`. A failed load is reported
/// and the previous list stays in place.
pub async fn refresh_targets(
    source: Arc<dyn TargetSource>,
    targets: Arc<TargetList>,
    reporter: Arc<dyn ErrorReporter>,
    period: Duration,
    cancel: CancellationToken,
) {
    run_periodic("config_refresh", period, cancel, move || {
        let source = Arc::clone(&source);
        let targets = Arc::clone(&targets);
        let reporter = Arc::clone(&reporter);
        async move {
            match source.load().await {
                Ok(list) => {
                    info!(servers = list.len(), "Refreshed server configuration");
                    targets.replace(list);
                }
                Err(e) => {
                    warn!(error = %e, source = %source.describe(), "Failed to refresh server configuration");
                    reporter.report(&e, &ReportOptions::new().tag("config_source", source.describe()));
                }
            }
        }
    })
    .await;
}
