//! Last-seen positions per vehicle, used to derive speed between fetches.
//!
//! A missing record means either "never observed" or "evicted"; callers treat
//! both the same way and simply skip the speed computation.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::metrics::Metrics;
use crate::tasks::run_periodic;

#[derive(Debug, Clone, PartialEq)]
pub struct TelemetryRecord {
    pub seen_at: DateTime<Utc>,
    pub latitude: f64,
    pub longitude: f64,
    /// Agency label the vehicle's series were published under.
    pub agency_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct EvictedVehicle {
    pub server_id: u32,
    pub vehicle_id: String,
    pub agency_id: String,
}

#[derive(Debug, Default)]
pub struct TelemetryStore {
    servers: RwLock<HashMap<u32, HashMap<String, TelemetryRecord>>>,
}

impl TelemetryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, server_id: u32, vehicle_id: &str) -> Option<TelemetryRecord> {
        let servers = self.servers.read().unwrap_or_else(PoisonError::into_inner);
        servers.get(&server_id)?.get(vehicle_id).cloned()
    }

    pub fn set(&self, server_id: u32, vehicle_id: impl Into<String>, record: TelemetryRecord) {
        let mut servers = self.servers.write().unwrap_or_else(PoisonError::into_inner);
        servers
            .entry(server_id)
            .or_default()
            .insert(vehicle_id.into(), record);
    }

    pub fn count(&self, server_id: u32) -> usize {
        let servers = self.servers.read().unwrap_or_else(PoisonError::into_inner);
        servers.get(&server_id).map_or(0, HashMap::len)
    }

    /// Removes records last seen more than `threshold` before `now`, and any
    /// server map left empty. Returns what was removed, sorted.
    pub fn evict_stale(&self, threshold: TimeDelta, now: DateTime<Utc>) -> Vec<EvictedVehicle> {
        let mut evicted = Vec::new();
        let mut servers = self.servers.write().unwrap_or_else(PoisonError::into_inner);

        servers.retain(|&server_id, vehicles| {
            vehicles.retain(|vehicle_id, record| {
                let stale = record.seen_at < now && now - record.seen_at > threshold;
                if stale {
                    evicted.push(EvictedVehicle {
                        server_id,
                        vehicle_id: vehicle_id.clone(),
                        agency_id: record.agency_id.clone(),
                    });
                }
                !stale
            });
            !vehicles.is_empty()
        });

        evicted.sort();
        evicted
    }
}

/// Periodically evicts stale records and drops their vehicle-labelled series.
pub async fn run_eviction(
    store: Arc<TelemetryStore>,
    metrics: Arc<Metrics>,
    interval: Duration,
    threshold: Duration,
    cancel: CancellationToken,
) {
    let threshold = TimeDelta::from_std(threshold).unwrap_or(TimeDelta::MAX);
    run_periodic("telemetry_eviction", interval, cancel, move || {
        let store = Arc::clone(&store);
        let metrics = Arc::clone(&metrics);
        async move {
            let evicted = sweep(&store, &metrics, threshold, Utc::now());
            if !evicted.is_empty() {
                info!(evicted = evicted.len(), "Evicted stale vehicle telemetry");
            }
        }
    })
    .await;
}

/// One eviction pass: removes stale records, forgets their series and
/// refreshes the tracked-vehicle gauge of every affected server.
pub fn sweep(
    store: &TelemetryStore,
    metrics: &Metrics,
    threshold: TimeDelta,
    now: DateTime<Utc>,
) -> Vec<EvictedVehicle> {
    let evicted = store.evict_stale(threshold, now);

    let mut last_server = None;
    for vehicle in &evicted {
        let server = vehicle.server_id.to_string();
        metrics.forget_vehicle(&server, &vehicle.vehicle_id, &vehicle.agency_id);

        // Sorted by server, so each server's gauge is touched once.
        if last_server != Some(vehicle.server_id) {
            last_server = Some(vehicle.server_id);
            metrics
                .tracked_vehicles
                .with_label_values(&[server.as_str()])
                .set(store.count(vehicle.server_id) as i64);
        }
    }
    evicted
}
