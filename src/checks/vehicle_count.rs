use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;

use super::{Check, CheckContext, Observation};
use crate::fetch::{parse_url, strip_query};
use crate::models::ServerTarget;

/// Compares the number of vehicles in the realtime feed with the server's
/// vehicles-for-agency list.
pub struct VehicleCount;

#[async_trait]
impl Check for VehicleCount {
    fn name(&self) -> &'static str {
        "vehicle_count"
    }

    async fn run(&self, ctx: &CheckContext, target: &ServerTarget) -> Result<Observation> {
        let server = target.label();
        let snapshot = ctx
            .realtime_store
            .get(target.id)
            .ok_or_else(|| anyhow!("no GTFS-RT data available for server {}", target.id))?;

        let in_feed = snapshot.vehicles.len();
        let feed_label = parse_url(&target.vehicle_position_url)
            .map(|u| strip_query(&u))
            .unwrap_or_else(|_| target.vehicle_position_url.clone());
        ctx.metrics
            .realtime_vehicle_positions
            .with_label_values(&[feed_label.as_str(), server.as_str()])
            .set(in_feed as f64);

        if target.agency_id.is_empty() {
            bail!("server {} has no agency_id to count vehicles for", target.id);
        }
        let agency = target.agency_id.as_str();

        let in_api = ctx
            .rest(target)
            .vehicles_for_agency(agency)
            .await
            .context("failed to count vehicles from API")?
            .len();
        ctx.metrics
            .vehicle_count_api
            .with_label_values(&[agency, server.as_str()])
            .set(in_api as f64);

        let matched = if in_feed == in_api { 1.0 } else { 0.0 };
        ctx.metrics
            .vehicle_count_match
            .with_label_values(&[agency, server.as_str()])
            .set(matched);

        Ok(Observation::new()
            .with("feed", in_feed as f64)
            .with("api", in_api as f64)
            .with("match", matched))
    }
}
