use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use tokio_util::sync::CancellationToken;

use super::{Check, CheckContext, Observation};
use crate::fetch::auth::ApiKey;
use crate::fetch::{HttpClient, fetch_bytes};
use crate::models::{RealtimeSnapshot, ServerTarget};
use crate::parser::{parse_feed, realtime_snapshot_from_feed};

/// Downloads and decodes a target's vehicle-positions feed, sending the
/// target's custom auth header when one is configured.
pub async fn fetch_realtime(
    client: &dyn HttpClient,
    target: &ServerTarget,
    cancel: &CancellationToken,
    max_retries: u32,
) -> Result<RealtimeSnapshot> {
    let url = &target.vehicle_position_url;
    let bytes = match target.realtime_auth_header() {
        Some((name, value)) => {
            let client = ApiKey::new(client, name, value)?;
            fetch_bytes(&client, url, cancel, max_retries).await
        }
        None => fetch_bytes(client, url, cancel, max_retries).await,
    }
    .context("failed to fetch GTFS-RT feed")?;

    let feed = parse_feed(&bytes).context("failed to decode GTFS-RT feed")?;
    Ok(realtime_snapshot_from_feed(&feed, Utc::now()))
}

/// Fetches the realtime feed into the realtime store. Every later check reads
/// that snapshot, so a failure here ends the target's run.
pub struct RealtimeFeed;

#[async_trait]
impl Check for RealtimeFeed {
    fn name(&self) -> &'static str {
        "realtime_feed"
    }

    fn is_critical(&self) -> bool {
        true
    }

    async fn run(&self, ctx: &CheckContext, target: &ServerTarget) -> Result<Observation> {
        let snapshot =
            fetch_realtime(ctx.client.as_ref(), target, &ctx.cancel, ctx.max_retries).await?;
        let vehicles = snapshot.vehicles.len();
        ctx.realtime_store.set(target.id, snapshot);
        Ok(Observation::new().with("vehicles", vehicles as f64))
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::{Vehicle, feed_bytes};
    use super::*;
    use crate::checks::testing::{context, target};
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_stores_snapshot_per_server() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/vehicle-positions"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(feed_bytes(&[
                Vehicle::at("a", 47.6, -122.3),
                Vehicle::at("b", 47.61, -122.31),
            ])))
            .mount(&server)
            .await;
        let ctx = context();

        let obs = RealtimeFeed.run(&ctx, &target(5, &server.uri())).await.unwrap();

        assert_eq!(obs.get("vehicles"), Some(2.0));
        assert_eq!(ctx.realtime_store.get(5).unwrap().vehicles.len(), 2);
        assert!(ctx.realtime_store.get(6).is_none());
    }

    #[tokio::test]
    async fn test_sends_custom_auth_header() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/vehicle-positions"))
            .and(header("x-api-key", "secret"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(feed_bytes(&[])))
            .expect(1)
            .mount(&server)
            .await;

        let mut t = target(1, &server.uri());
        t.gtfs_rt_api_key = "x-api-key".to_string();
        t.gtfs_rt_api_value = "secret".to_string();

        RealtimeFeed.run(&context(), &t).await.unwrap();
    }

    #[tokio::test]
    async fn test_garbage_body_fails() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0xff, 0xff, 0xff]))
            .mount(&server)
            .await;
        let ctx = context();

        let err = RealtimeFeed.run(&ctx, &target(1, &server.uri())).await.unwrap_err();

        assert!(err.to_string().contains("failed to decode GTFS-RT feed"));
        assert!(ctx.realtime_store.get(1).is_none());
        assert!(RealtimeFeed.is_critical());
    }
}
