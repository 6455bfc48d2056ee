//! Prometheus series published by the checks.
//!
//! Every series lives in a registry owned by [`Metrics`], so tests can build
//! isolated instances. Label names and order match the dashboards that read
//! them and must not change.

use anyhow::{Context, Result};
use prometheus::{
    Encoder, GaugeVec, HistogramOpts, HistogramVec, IntCounterVec, IntGaugeVec, Opts, Registry,
    TextEncoder,
};

pub struct Metrics {
    registry: Registry,

    pub api_status: GaugeVec,
    pub bundle_earliest_expiration_days: GaugeVec,
    pub bundle_latest_expiration_days: GaugeVec,

    pub agencies_in_static_gtfs: GaugeVec,
    pub agencies_in_coverage_endpoint: GaugeVec,
    pub agencies_match: GaugeVec,

    pub realtime_vehicle_positions: GaugeVec,
    pub vehicle_count_api: GaugeVec,
    pub vehicle_count_match: GaugeVec,

    pub vehicle_report_interval_seconds: GaugeVec,
    pub vehicle_report_total: IntCounterVec,
    pub vehicle_computed_speed: GaugeVec,
    pub vehicle_speed_discrepancy_ratio: GaugeVec,
    pub tracked_vehicles: IntGaugeVec,

    pub invalid_vehicle_coordinates: IntGaugeVec,
    pub invalid_vehicle_coordinates_total: IntCounterVec,
    pub out_of_bounds_vehicle_coordinates: IntGaugeVec,
    pub out_of_bounds_vehicle_coordinates_total: IntCounterVec,

    pub agencies_with_coverage_count: GaugeVec,
    pub realtime_records_total: GaugeVec,
    pub realtime_trips_matched: GaugeVec,
    pub realtime_trips_unmatched: GaugeVec,
    pub scheduled_trips: GaugeVec,
    pub stops_matched: GaugeVec,
    pub stops_unmatched: GaugeVec,
    pub trip_match_ratio: GaugeVec,
    pub stop_match_ratio: GaugeVec,
    pub time_since_last_update_seconds: GaugeVec,
    pub unmatched_stop_location: GaugeVec,
    pub unmatched_stop_cluster_count: GaugeVec,

    pub http_request_duration_seconds: HistogramVec,
}

impl Metrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        macro_rules! register {
            ($kind:ident, $name:expr, $help:expr, $labels:expr) => {{
                let metric = $kind::new(Opts::new($name, $help), $labels)
                    .with_context(|| format!("invalid metric {}", $name))?;
                registry
                    .register(Box::new(metric.clone()))
                    .with_context(|| format!("failed to register {}", $name))?;
                metric
            }};
        }

        let server = &["server_id"];
        let rest = &["server", "agency"];
        let vehicle = &["vehicle_id", "server_id"];
        let vehicle_agency = &["vehicle_id", "agency_id", "server_id"];

        let http_request_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "watchdog_http_request_duration_seconds",
                "Duration of outbound HTTP requests",
            ),
            &["url", "method", "status"],
        )?;
        registry.register(Box::new(http_request_duration_seconds.clone()))?;

        Ok(Self {
            api_status: register!(
                GaugeVec,
                "oba_api_status",
                "Status of the OneBusAway API Server (0 = not working, 1 = working)",
                &["server_id", "server_url"]
            ),
            bundle_earliest_expiration_days: register!(
                GaugeVec,
                "gtfs_bundle_days_until_earliest_expiration",
                "Number of days until the earliest GTFS bundle expiration",
                server
            ),
            bundle_latest_expiration_days: register!(
                GaugeVec,
                "gtfs_bundle_days_until_latest_expiration",
                "Number of days until the latest GTFS bundle expiration",
                server
            ),
            agencies_in_static_gtfs: register!(
                GaugeVec,
                "oba_agencies_in_static_gtfs",
                "Number of agencies in the static GTFS file",
                server
            ),
            agencies_in_coverage_endpoint: register!(
                GaugeVec,
                "oba_agencies_in_coverage_endpoint",
                "Number of agencies in the agencies-with-coverage endpoint",
                server
            ),
            agencies_match: register!(
                GaugeVec,
                "oba_agencies_match",
                "Whether the static GTFS agency count matches the coverage endpoint (1 = match, 0 = no match)",
                server
            ),
            realtime_vehicle_positions: register!(
                GaugeVec,
                "realtime_vehicle_positions_count_gtfs_rt",
                "Number of realtime vehicle positions in the GTFS-RT feed",
                &["gtfs_rt_url", "server_id"]
            ),
            vehicle_count_api: register!(
                GaugeVec,
                "vehicle_count_api",
                "Number of vehicles in the API response",
                &["agency_id", "server_id"]
            ),
            vehicle_count_match: register!(
                GaugeVec,
                "vehicle_count_match",
                "Whether the API vehicle count matches the GTFS-RT feed (1 = match, 0 = no match)",
                &["agency_id", "server_id"]
            ),
            vehicle_report_interval_seconds: register!(
                GaugeVec,
                "vehicle_position_report_interval_seconds",
                "Time in seconds since each vehicle last reported a GTFS-RT position",
                vehicle
            ),
            vehicle_report_total: register!(
                IntCounterVec,
                "vehicle_report_total",
                "Total number of GTFS-RT updates received from each vehicle",
                vehicle
            ),
            vehicle_computed_speed: register!(
                GaugeVec,
                "gtfs_rt_vehicle_computed_speed",
                "Speed in m/s computed from consecutive GTFS-RT positions",
                vehicle_agency
            ),
            vehicle_speed_discrepancy_ratio: register!(
                GaugeVec,
                "gtfs_rt_vehicle_speed_discrepancy_ratio",
                "Relative difference between computed and reported vehicle speed",
                vehicle_agency
            ),
            tracked_vehicles: register!(
                IntGaugeVec,
                "gtfs_rt_tracked_vehicles",
                "Number of vehicles with a retained telemetry record",
                server
            ),
            invalid_vehicle_coordinates: register!(
                IntGaugeVec,
                "gtfs_rt_invalid_vehicle_coordinates",
                "Current number of GTFS-RT vehicle positions with invalid coordinates",
                server
            ),
            invalid_vehicle_coordinates_total: register!(
                IntCounterVec,
                "gtfs_rt_invalid_vehicle_coordinates_total",
                "GTFS-RT vehicle positions seen with invalid coordinates",
                server
            ),
            out_of_bounds_vehicle_coordinates: register!(
                IntGaugeVec,
                "gtfs_rt_out_of_bounds_vehicle_coordinates",
                "Current number of stopped GTFS-RT vehicles outside the bounding box",
                server
            ),
            out_of_bounds_vehicle_coordinates_total: register!(
                IntCounterVec,
                "gtfs_rt_out_of_bounds_vehicle_coordinates_total",
                "Stopped GTFS-RT vehicles seen outside the bounding box",
                server
            ),
            agencies_with_coverage_count: register!(
                GaugeVec,
                "oba_agencies_with_coverage_count",
                "Number of agencies with coverage",
                &["server"]
            ),
            realtime_records_total: register!(
                GaugeVec,
                "oba_realtime_records_total",
                "Total number of realtime records",
                rest
            ),
            realtime_trips_matched: register!(
                GaugeVec,
                "oba_realtime_trips_matched_count",
                "Number of matched realtime trips",
                rest
            ),
            realtime_trips_unmatched: register!(
                GaugeVec,
                "oba_realtime_trips_unmatched_count",
                "Number of unmatched realtime trips",
                rest
            ),
            scheduled_trips: register!(
                GaugeVec,
                "oba_scheduled_trips_count",
                "Number of scheduled trips",
                rest
            ),
            stops_matched: register!(
                GaugeVec,
                "oba_stops_matched_count",
                "Number of matched stops",
                rest
            ),
            stops_unmatched: register!(
                GaugeVec,
                "oba_stops_unmatched_count",
                "Number of unmatched stops",
                rest
            ),
            trip_match_ratio: register!(
                GaugeVec,
                "oba_realtime_trip_match_ratio",
                "Ratio of matched realtime trips to total realtime trips",
                rest
            ),
            stop_match_ratio: register!(
                GaugeVec,
                "oba_stop_match_ratio",
                "Ratio of matched stops to total stops",
                rest
            ),
            time_since_last_update_seconds: register!(
                GaugeVec,
                "oba_time_since_last_update_seconds",
                "Time since last realtime update in seconds",
                rest
            ),
            unmatched_stop_location: register!(
                GaugeVec,
                "oba_unmatched_stop_location",
                "Location info of unmatched stops from static GTFS",
                &["server", "agency", "stop_id", "stop_name", "lat", "lon"]
            ),
            unmatched_stop_cluster_count: register!(
                GaugeVec,
                "oba_unmatched_stop_cluster_count",
                "Number of unmatched stops grouped by station or spatial cluster",
                &["server", "agency", "cluster_id", "cluster_type"]
            ),
            http_request_duration_seconds,
            registry,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Serializes every registered series in the text exposition format.
    pub fn render(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        TextEncoder::new()
            .encode(&self.registry.gather(), &mut buf)
            .context("failed to encode metrics")?;
        Ok(buf)
    }

    /// Drops every vehicle-labelled series for one vehicle.
    ///
    /// Missing series are not an error: a vehicle may have been evicted before
    /// a speed was ever computed for it.
    pub fn forget_vehicle(&self, server_id: &str, vehicle_id: &str, agency_id: &str) {
        let _ = self
            .vehicle_report_interval_seconds
            .remove_label_values(&[vehicle_id, server_id]);
        let _ = self
            .vehicle_report_total
            .remove_label_values(&[vehicle_id, server_id]);
        let _ = self
            .vehicle_computed_speed
            .remove_label_values(&[vehicle_id, agency_id, server_id]);
        let _ = self
            .vehicle_speed_discrepancy_ratio
            .remove_label_values(&[vehicle_id, agency_id, server_id]);
    }
}
