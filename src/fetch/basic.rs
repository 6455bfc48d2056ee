use super::client::HttpClient;
use anyhow::{Context, Result};
use async_trait::async_trait;

use crate::config::HttpTimeouts;

/// Plain `reqwest` client with connect, total and pool limits applied.
///
/// The timeouts bound every individual attempt, so a stuck connection can
/// never stall the retry loop that sits on top of it.
#[derive(Clone)]
pub struct BasicClient(reqwest::Client);

impl BasicClient {
    pub fn new(timeouts: &HttpTimeouts) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(timeouts.connect)
            .timeout(timeouts.total)
            .pool_idle_timeout(timeouts.pool_idle)
            .pool_max_idle_per_host(timeouts.max_idle_per_host)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self(client))
    }
}

#[async_trait]
impl HttpClient for BasicClient {
    async fn execute(&self, req: reqwest::Request) -> reqwest::Result<reqwest::Response> {
        self.0.execute(req).await
    }
}
