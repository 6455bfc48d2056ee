use anyhow::{Context, Result};
use async_trait::async_trait;

use super::{Check, CheckContext, Observation};
use crate::models::ServerTarget;

/// Hits `current-time.json` and publishes `oba_api_status`.
pub struct Ping;

#[async_trait]
impl Check for Ping {
    fn name(&self) -> &'static str {
        "ping"
    }

    async fn run(&self, ctx: &CheckContext, target: &ServerTarget) -> Result<Observation> {
        let status = ctx
            .metrics
            .api_status
            .with_label_values(&[target.label().as_str(), target.rest_base_url.as_str()]);

        let current = match ctx.rest(target).current_time().await {
            Ok(current) => current,
            Err(e) => {
                status.set(0.0);
                return Err(e)
                    .with_context(|| format!("failed to ping server {}", target.rest_base_url));
            }
        };

        // A server that answers without a readable time is up but not healthy.
        let up = if current.readable_time.is_empty() { 0.0 } else { 1.0 };
        status.set(up);
        Ok(Observation::new().with("status", up))
    }
}
