use anyhow::{Result, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{Check, CheckContext, Observation};
use crate::geo::{is_valid_lat_lon, speed_between};
use crate::models::{ServerTarget, VehicleRecord};
use crate::telemetry::{TelemetryRecord, TelemetryStore};

/// What one realtime sample told us about one vehicle.
#[derive(Debug, Clone, PartialEq)]
pub struct TelemetryUpdate {
    pub vehicle_id: String,
    /// Seconds between the vehicle's own timestamp and `now`.
    pub interval_secs: f64,
    /// m/s since the previous sample, when there is one and time moved forward.
    pub speed: Option<f64>,
    /// `|computed - reported| / reported`, when the feed reports a positive speed.
    pub discrepancy: Option<f64>,
}

/// Folds a realtime sample into the telemetry store.
///
/// Vehicles without an id or without usable coordinates are skipped: every
/// vehicle that produces an update also leaves a record behind, so eviction
/// can later retire its series.
pub fn reconcile(
    store: &TelemetryStore,
    server_id: u32,
    agency_id: &str,
    vehicles: &[VehicleRecord],
    now: DateTime<Utc>,
) -> Vec<TelemetryUpdate> {
    let mut updates = Vec::with_capacity(vehicles.len());

    for vehicle in vehicles {
        let Some(vehicle_id) = vehicle.vehicle_id.as_deref() else {
            continue;
        };
        let Some(position) = vehicle
            .position
            .filter(|p| is_valid_lat_lon(p.latitude, p.longitude))
        else {
            continue;
        };

        let seen_at = vehicle.timestamp.unwrap_or(now);
        let here = (position.latitude, position.longitude);
        let mut update = TelemetryUpdate {
            vehicle_id: vehicle_id.to_string(),
            interval_secs: (now - seen_at).num_milliseconds() as f64 / 1000.0,
            speed: None,
            discrepancy: None,
        };

        if let Some(prev) = store.get(server_id, vehicle_id) {
            let elapsed = (seen_at - prev.seen_at).num_milliseconds() as f64 / 1000.0;
            update.speed = speed_between((prev.latitude, prev.longitude), here, elapsed);
        }
        if let (Some(computed), Some(reported)) = (update.speed, position.speed) {
            let reported = f64::from(reported);
            if reported > 0.0 {
                update.discrepancy = Some((computed - reported).abs() / reported);
            }
        }

        store.set(
            server_id,
            vehicle_id,
            TelemetryRecord {
                seen_at,
                latitude: here.0,
                longitude: here.1,
                agency_id: agency_id.to_string(),
            },
        );
        updates.push(update);
    }

    updates
}

/// Per-vehicle report counts, report intervals, computed speeds and speed
/// discrepancies.
pub struct VehicleTelemetry;

#[async_trait]
impl Check for VehicleTelemetry {
    fn name(&self) -> &'static str {
        "vehicle_telemetry"
    }

    async fn run(&self, ctx: &CheckContext, target: &ServerTarget) -> Result<Observation> {
        let snapshot = ctx
            .realtime_store
            .get(target.id)
            .ok_or_else(|| anyhow!("no GTFS-RT data available for server {}", target.id))?;

        let server = target.label();
        let agency = target.agency_id.as_str();
        let updates = reconcile(
            &ctx.telemetry,
            target.id,
            agency,
            &snapshot.vehicles,
            Utc::now(),
        );

        let m = &ctx.metrics;
        let mut with_speed = 0usize;
        for update in &updates {
            let vehicle = update.vehicle_id.as_str();
            m.vehicle_report_total
                .with_label_values(&[vehicle, server.as_str()])
                .inc();
            m.vehicle_report_interval_seconds
                .with_label_values(&[vehicle, server.as_str()])
                .set(update.interval_secs);

            if let Some(speed) = update.speed {
                with_speed += 1;
                m.vehicle_computed_speed
                    .with_label_values(&[vehicle, agency, server.as_str()])
                    .set(speed);
            }
            if let Some(ratio) = update.discrepancy {
                m.vehicle_speed_discrepancy_ratio
                    .with_label_values(&[vehicle, agency, server.as_str()])
                    .set(ratio);
            }
        }

        let tracked = ctx.telemetry.count(target.id);
        m.tracked_vehicles
            .with_label_values(&[server.as_str()])
            .set(tracked as i64);

        Ok(Observation::new()
            .with("reported", updates.len() as f64)
            .with("with_speed", with_speed as f64)
            .with("tracked", tracked as f64))
    }
}
