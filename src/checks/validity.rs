use anyhow::{Result, anyhow};
use async_trait::async_trait;

use super::{Check, CheckContext, Observation};
use crate::geo::{BoundingBox, is_valid_lat_lon};
use crate::models::{ServerTarget, VehicleRecord};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ValidityScore {
    /// Missing or out-of-range coordinates, or the (0, 0) sentinel.
    pub invalid: usize,
    /// Stopped at a stop but outside the stop envelope.
    pub out_of_bounds: usize,
}

/// Scores one realtime sample. Bounds are only checked for vehicles reporting
/// STOPPED_AT; vehicles between stops may legitimately leave the envelope of
/// the static stops. Without a box only `invalid` is counted.
pub fn score_positions(vehicles: &[VehicleRecord], bbox: Option<&BoundingBox>) -> ValidityScore {
    let mut score = ValidityScore::default();

    for vehicle in vehicles {
        let Some(p) = vehicle
            .position
            .filter(|p| is_valid_lat_lon(p.latitude, p.longitude))
        else {
            score.invalid += 1;
            continue;
        };

        if let Some(bbox) = bbox {
            if vehicle.is_stopped_at_stop() && !bbox.contains(p.latitude, p.longitude) {
                score.out_of_bounds += 1;
            }
        }
    }

    score
}

/// Counts invalid coordinates and stopped vehicles outside the bounding box.
pub struct PositionValidity;

#[async_trait]
impl Check for PositionValidity {
    fn name(&self) -> &'static str {
        "position_validity"
    }

    async fn run(&self, ctx: &CheckContext, target: &ServerTarget) -> Result<Observation> {
        let snapshot = ctx
            .realtime_store
            .get(target.id)
            .ok_or_else(|| anyhow!("no GTFS-RT data available for server {}", target.id))?;
        let bbox = ctx.bbox_store.get(target.id);
        let score = score_positions(&snapshot.vehicles, bbox.as_deref());

        let server = target.label();
        let labels = [server.as_str()];
        let m = &ctx.metrics;
        m.invalid_vehicle_coordinates
            .with_label_values(&labels)
            .set(score.invalid as i64);
        m.invalid_vehicle_coordinates_total
            .with_label_values(&labels)
            .inc_by(score.invalid as u64);

        if bbox.is_none() {
            return Err(anyhow!("no bounding box found for server {}", target.id));
        }

        m.out_of_bounds_vehicle_coordinates
            .with_label_values(&labels)
            .set(score.out_of_bounds as i64);
        m.out_of_bounds_vehicle_coordinates_total
            .with_label_values(&labels)
            .inc_by(score.out_of_bounds as u64);

        Ok(Observation::new()
            .with("invalid", score.invalid as f64)
            .with("out_of_bounds", score.out_of_bounds as f64))
    }
}
