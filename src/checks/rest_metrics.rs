use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use tracing::debug;

use super::{Check, CheckContext, Observation};
use crate::geo::{ClusterAssignment, cluster_id};
use crate::models::{ServerTarget, StaticSnapshot, Stop};

/// Mirrors the server's own `metrics.json` counters into per-agency gauges and
/// locates the stops it could not match.
pub struct RestMetrics;

#[async_trait]
impl Check for RestMetrics {
    fn name(&self) -> &'static str {
        "rest_metrics"
    }

    async fn run(&self, ctx: &CheckContext, target: &ServerTarget) -> Result<Observation> {
        let entry = ctx.rest(target).metrics().await?;
        let server = target.label();
        let m = &ctx.metrics;

        m.agencies_with_coverage_count
            .with_label_values(&[server.as_str()])
            .set(entry.agencies_with_coverage_count as f64);

        let snapshot = ctx.static_store.get(target.id);
        let mut unmatched_located = 0usize;

        for agency in &entry.agency_ids {
            let labels = [server.as_str(), agency.as_str()];

            macro_rules! mirror {
                ($gauge:ident, $field:ident) => {
                    if let Some(&count) = entry.$field.get(agency) {
                        m.$gauge.with_label_values(&labels).set(count as f64);
                    }
                };
            }
            mirror!(realtime_records_total, realtime_records_total);
            mirror!(realtime_trips_matched, realtime_trip_counts_matched);
            mirror!(realtime_trips_unmatched, realtime_trip_counts_unmatched);
            mirror!(scheduled_trips, scheduled_trips_count);
            mirror!(stops_matched, stop_ids_matched_count);
            mirror!(stops_unmatched, stop_ids_unmatched_count);
            mirror!(time_since_last_update_seconds, time_since_last_realtime_update);

            let trips = match_ratio(
                &entry.realtime_trip_counts_matched,
                &entry.realtime_trip_counts_unmatched,
                agency,
            );
            if let Some(ratio) = trips {
                m.trip_match_ratio.with_label_values(&labels).set(ratio);
            }
            let stops = match_ratio(
                &entry.stop_ids_matched_count,
                &entry.stop_ids_unmatched_count,
                agency,
            );
            if let Some(ratio) = stops {
                m.stop_match_ratio.with_label_values(&labels).set(ratio);
            }

            let Some(ids) = entry.stop_ids_unmatched.get(agency).filter(|ids| !ids.is_empty()) else {
                continue;
            };
            let Some(snapshot) = snapshot.as_deref() else {
                debug!(agency, "No static bundle to resolve unmatched stops against");
                continue;
            };

            let stops = resolve_unmatched(snapshot, agency, ids);
            for stop in &stops {
                let Some((lat, lon)) = stop.coordinates() else {
                    continue;
                };
                m.unmatched_stop_location
                    .with_label_values(&[
                        server.as_str(),
                        agency.as_str(),
                        stop.id.as_str(),
                        stop.name.as_deref().unwrap_or_default(),
                        format!("{lat:.6}").as_str(),
                        format!("{lon:.6}").as_str(),
                    ])
                    .set(1.0);
                unmatched_located += 1;
            }

            for (cluster, count) in count_clusters(&stops, snapshot) {
                m.unmatched_stop_cluster_count
                    .with_label_values(&[
                        server.as_str(),
                        agency.as_str(),
                        cluster.cluster_id.as_str(),
                        cluster.cluster_type.as_str(),
                    ])
                    .set(count as f64);
            }
        }

        Ok(Observation::new()
            .with("agencies", entry.agency_ids.len() as f64)
            .with("unmatched_stops_located", unmatched_located as f64))
    }
}

fn match_ratio(
    matched: &HashMap<String, i64>,
    unmatched: &HashMap<String, i64>,
    agency: &str,
) -> Option<f64> {
    let matched = matched.get(agency).copied().unwrap_or(0);
    let total = matched + unmatched.get(agency).copied().unwrap_or(0);
    (total > 0).then(|| matched as f64 / total as f64)
}

/// Looks up unmatched stop ids in the static bundle. The server reports ids
/// prefixed with `{agency}_`; bundles usually carry the bare id, so both are tried.
fn resolve_unmatched<'a>(snapshot: &'a StaticSnapshot, agency: &str, ids: &[String]) -> Vec<&'a Stop> {
    let prefix = format!("{agency}_");
    let mut stops: Vec<&Stop> = ids
        .iter()
        .filter_map(|id| {
            snapshot
                .stop(id)
                .or_else(|| id.strip_prefix(&prefix).and_then(|bare| snapshot.stop(bare)))
        })
        .collect();
    stops.sort_by(|a, b| a.id.cmp(&b.id));
    stops.dedup_by(|a, b| a.id == b.id);
    stops
}

fn count_clusters(stops: &[&Stop], snapshot: &StaticSnapshot) -> HashMap<ClusterAssignment, usize> {
    let mut counts = HashMap::new();
    for stop in stops {
        if let Some(cluster) = cluster_id(stop, snapshot) {
            *counts.entry(cluster).or_insert(0) += 1;
        }
    }
    counts
}
